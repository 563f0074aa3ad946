use crate::domain::account::{Account, Amount};
use crate::domain::ports::Wallet;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// One executed monetary action, kept so callers can audit how often each
/// transfer actually happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Movement {
    Deposit { user: String, amount: Amount },
    Transfer { from: String, to: String, amount: Amount },
    Invoice { from: String, invoice: String, amount: Amount },
}

#[derive(Default)]
struct Ledger {
    accounts: BTreeMap<String, Account>,
    movements: Vec<Movement>,
}

impl Ledger {
    fn account(&mut self, user: &str) -> &mut Account {
        self.accounts
            .entry(user.to_string())
            .or_insert_with(|| Account::new(user))
    }
}

/// A thread-safe in-memory stand-in for the external wallet service.
///
/// An optional per-call latency widens the window between claiming a record
/// and finishing the transfer, which is where duplicate execution would show.
#[derive(Default, Clone)]
pub struct InMemoryWallet {
    ledger: Arc<RwLock<Ledger>>,
    latency: Option<Duration>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Every movement executed so far, in execution order.
    pub async fn movements(&self) -> Vec<Movement> {
        self.ledger.read().await.movements.clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn deposit(&self, user: &str, amount: Amount) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        ledger.account(user).deposit(amount);
        ledger.movements.push(Movement::Deposit {
            user: user.to_string(),
            amount,
        });
        Ok(())
    }

    async fn transfer(&self, from: &str, to: &str, amount: Amount) -> Result<()> {
        self.simulate_latency().await;
        let mut ledger = self.ledger.write().await;
        ledger.account(from).withdraw(amount)?;
        ledger.account(to).deposit(amount);
        ledger.movements.push(Movement::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            amount,
        });
        Ok(())
    }

    async fn pay_invoice(&self, from: &str, invoice: &str, amount: Amount) -> Result<()> {
        self.simulate_latency().await;
        let mut ledger = self.ledger.write().await;
        ledger.account(from).withdraw(amount)?;
        ledger.movements.push(Movement::Invoice {
            from: from.to_string(),
            invoice: invoice.to_string(),
            amount,
        });
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let ledger = self.ledger.read().await;
        Ok(ledger.accounts.values().cloned().collect())
    }
}
