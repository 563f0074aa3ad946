use crate::error::GuardError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

/// A positive amount of satoshis moved by a single monetary action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    pub fn new(sats: u64) -> Result<Self, GuardError> {
        if sats > 0 {
            Ok(Self(sats))
        } else {
            Err(GuardError::Validation("Amount must be positive".to_string()))
        }
    }

    pub fn sats(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = GuardError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// Satoshi balance held by a wallet user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Balance(pub u64);

impl Balance {
    pub const ZERO: Self = Self(0);

    pub fn checked_sub(self, amount: Amount) -> Option<Self> {
        self.0.checked_sub(amount.0).map(Self)
    }
}

impl Add<Amount> for Balance {
    type Output = Self;
    fn add(self, rhs: Amount) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign<Amount> for Balance {
    fn add_assign(&mut self, rhs: Amount) {
        *self = *self + rhs;
    }
}

/// Final balance of a single user, as reported by the wallet.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Account {
    pub user: String,
    pub balance: Balance,
}

impl Account {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            balance: Balance::ZERO,
        }
    }

    pub fn deposit(&mut self, amount: Amount) {
        self.balance += amount;
    }

    /// Withdraws funds if sufficient
    pub fn withdraw(&mut self, amount: Amount) -> Result<(), GuardError> {
        match self.balance.checked_sub(amount) {
            Some(rest) => {
                self.balance = rest;
                Ok(())
            }
            None => Err(GuardError::Wallet(format!(
                "Insufficient funds for {}",
                self.user
            ))),
        }
    }
}
