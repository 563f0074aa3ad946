use super::handle::{Held, TransactionHandle};
use super::rate_limit::{RateLimiter, Scope};
use crate::domain::account::Amount;
use crate::domain::event::{Event, EventType};
use crate::domain::ports::{StateStoreRef, WalletRef};
use crate::domain::record::{
    Faucet, InlineSend, Jar, PendingPayment, Record, StoredRecord, Tip, load_any,
};
use crate::error::{GuardError, Result};
use std::sync::Arc;

/// Runs the monetary flows on top of the transaction handle.
///
/// Every state-changing flow follows the same shape: admission, get-with-lock,
/// check `active`, persist the claim, call the wallet, persist the outcome,
/// release. A second caller for the same id can only observe the record after
/// the first one released it, so a duplicate tap sees `NotActive` instead of
/// executing the transfer again.
#[derive(Clone)]
pub struct Dispatcher {
    handle: TransactionHandle,
    limiter: Arc<RateLimiter>,
    wallet: WalletRef,
}

impl Dispatcher {
    pub fn new(handle: TransactionHandle, limiter: Arc<RateLimiter>, wallet: WalletRef) -> Self {
        Self {
            handle,
            limiter,
            wallet,
        }
    }

    fn store(&self) -> &StateStoreRef {
        self.handle.store()
    }

    async fn admit(&self, recipient: &str) {
        self.limiter
            .check_limit(&Scope::for_recipient(recipient))
            .await;
    }

    /// Releases the record and merges the release outcome into the result.
    async fn settle<R: Record, T>(&self, record: &mut Held<R>, outcome: Result<T>) -> Result<T> {
        let released = self.handle.release(record).await;
        let value = outcome?;
        if let Err(e) = &released {
            tracing::error!(id = %record.id(), error = %e, "Action done but release not persisted");
        }
        released.map(|_| value)
    }

    /// Persists a new record. Ids are never reused and must carry the
    /// record kind as their prefix.
    pub async fn create<R: Record>(&self, record: R) -> Result<()> {
        self.handle.insert(&record).await?;
        tracing::debug!(id = %record.id(), kind = R::KIND, "Record created");
        Ok(())
    }

    pub async fn deposit(&self, user: &str, amount: Amount) -> Result<()> {
        self.limiter.check_limit(&Scope::Global).await;
        self.wallet.deposit(user, amount).await
    }

    /// Confirm tap on a pending payment or tip, routed by the stored kind.
    pub async fn confirm(&self, id: &str, user: &str) -> Result<Amount> {
        match load_any(self.store().as_ref(), id).await? {
            StoredRecord::Payment(_) => self.confirm_payment(id, user).await,
            StoredRecord::Tip(_) => self.confirm_tip(id, user).await,
            other => Err(GuardError::InvalidType {
                id: id.to_string(),
                expected: "pay|tip",
                found: other.kind().to_string(),
            }),
        }
    }

    pub async fn confirm_payment(&self, id: &str, user: &str) -> Result<Amount> {
        self.admit(user).await;
        let mut payment = self.handle.get::<PendingPayment>(id).await?;
        let outcome = self.pay_locked(&mut payment, user).await;
        self.settle(&mut payment, outcome).await
    }

    async fn pay_locked(&self, payment: &mut Held<PendingPayment>, user: &str) -> Result<Amount> {
        self.handle.ensure_active(payment)?;
        if payment.from != user {
            return Err(GuardError::Validation(
                "Only the payer can confirm a payment".to_string(),
            ));
        }
        self.handle.lock(payment).await?;
        self.wallet
            .pay_invoice(&payment.from, &payment.invoice, payment.amount)
            .await?;
        self.handle.inactivate(payment).await?;
        tracing::info!(id = %payment.tx.id, from = %payment.from, amount = %payment.amount, "Invoice paid");
        Ok(payment.amount)
    }

    pub async fn confirm_tip(&self, id: &str, user: &str) -> Result<Amount> {
        self.admit(user).await;
        let mut tip = self.handle.get::<Tip>(id).await?;
        let outcome = self.tip_locked(&mut tip, user).await;
        self.settle(&mut tip, outcome).await
    }

    async fn tip_locked(&self, tip: &mut Held<Tip>, user: &str) -> Result<Amount> {
        self.handle.ensure_active(tip)?;
        if tip.from != user {
            return Err(GuardError::Validation(
                "Only the tipper can confirm a tip".to_string(),
            ));
        }
        self.handle.lock(tip).await?;
        self.wallet.transfer(&tip.from, &tip.to, tip.amount).await?;
        self.handle.inactivate(tip).await?;
        tracing::info!(id = %tip.tx.id, from = %tip.from, to = %tip.to, amount = %tip.amount, "Tip sent");
        Ok(tip.amount)
    }

    pub async fn accept_send(&self, id: &str, user: &str) -> Result<Amount> {
        self.admit(user).await;
        let mut send = self.handle.get::<InlineSend>(id).await?;
        let outcome = self.accept_locked(&mut send, user).await;
        self.settle(&mut send, outcome).await
    }

    async fn accept_locked(&self, send: &mut Held<InlineSend>, user: &str) -> Result<Amount> {
        self.handle.ensure_active(send)?;
        // Validate on a copy; the record only changes once funds moved
        let mut accepted = InlineSend::clone(send);
        accepted.accept(user)?;

        self.handle.lock(send).await?;
        self.wallet.transfer(&send.from, user, send.amount).await?;
        send.to = accepted.to;
        self.handle.inactivate(send).await?;
        tracing::info!(id = %send.tx.id, from = %send.from, to = %user, amount = %send.amount, "Inline send accepted");
        Ok(send.amount)
    }

    pub async fn claim_faucet(&self, id: &str, user: &str) -> Result<Amount> {
        self.admit(user).await;
        let mut faucet = self.handle.get::<Faucet>(id).await?;
        let outcome = self.claim_locked(&mut faucet, user).await;
        self.settle(&mut faucet, outcome).await
    }

    async fn claim_locked(&self, faucet: &mut Held<Faucet>, user: &str) -> Result<Amount> {
        self.handle.ensure_active(faucet)?;
        let mut claimed = Faucet::clone(faucet);
        let share = match claimed.claim(user) {
            Ok(share) => share,
            Err(e) => {
                if faucet.has_claimed(user) {
                    faucet.duplicate_claims += 1;
                    self.handle.touch(faucet).await;
                }
                return Err(e);
            }
        };

        self.handle.lock(faucet).await?;
        self.wallet.transfer(&faucet.from, user, share).await?;
        faucet.remaining = claimed.remaining;
        faucet.claimed_by = claimed.claimed_by;
        if faucet.is_exhausted() {
            self.handle.inactivate(faucet).await?;
        } else {
            self.handle.save(faucet).await?;
        }
        tracing::info!(id = %faucet.tx.id, user = %user, remaining = faucet.remaining, "Faucet claimed");
        Ok(share)
    }

    pub async fn contribute(&self, id: &str, user: &str) -> Result<Amount> {
        self.admit(user).await;
        let mut jar = self.handle.get::<Jar>(id).await?;
        let outcome = self.contribute_locked(&mut jar, user).await;
        self.settle(&mut jar, outcome).await
    }

    async fn contribute_locked(&self, jar: &mut Held<Jar>, user: &str) -> Result<Amount> {
        self.handle.ensure_active(jar)?;
        let mut updated = Jar::clone(jar);
        let amount = updated.contribute(user)?;

        self.handle.lock(jar).await?;
        self.wallet.transfer(user, &jar.owner, amount).await?;
        jar.contributors = updated.contributors;
        jar.collected = updated.collected;
        self.handle.save(jar).await?;
        tracing::info!(id = %jar.tx.id, user = %user, collected = jar.collected, "Jar contribution collected");
        Ok(amount)
    }

    /// Closes a jar for further contributions.
    pub async fn close_jar(&self, id: &str, user: &str) -> Result<()> {
        self.cancel::<Jar>(id, user).await
    }

    /// Withdraws an offer before it executed. Only its creator may do so.
    pub async fn cancel<R: Record>(&self, id: &str, user: &str) -> Result<()> {
        self.admit(user).await;
        let mut record = self.handle.get::<R>(id).await?;
        let outcome = self.cancel_locked(&mut record, user).await;
        self.settle(&mut record, outcome).await
    }

    async fn cancel_locked<R: Record>(&self, record: &mut Held<R>, user: &str) -> Result<()> {
        self.handle.ensure_active(record)?;
        if record.creator() != user {
            return Err(GuardError::Validation(format!(
                "Only {} can cancel {}",
                record.creator(),
                record.id()
            )));
        }
        self.handle.inactivate(record).await?;
        tracing::info!(id = %record.id(), "Record cancelled");
        Ok(())
    }

    /// Cancels whatever kind of record `id` is.
    pub async fn cancel_any(&self, id: &str, user: &str) -> Result<()> {
        match load_any(self.store().as_ref(), id).await? {
            StoredRecord::Payment(_) => self.cancel::<PendingPayment>(id, user).await,
            StoredRecord::Send(_) => self.cancel::<InlineSend>(id, user).await,
            StoredRecord::Tip(_) => self.cancel::<Tip>(id, user).await,
            StoredRecord::Faucet(_) => self.cancel::<Faucet>(id, user).await,
            StoredRecord::Jar(_) => self.cancel::<Jar>(id, user).await,
        }
    }

    /// Applies one inbound event. Returns the amount moved, if any.
    pub async fn dispatch(&self, event: &Event) -> Result<Option<Amount>> {
        let user = event.user.as_str();
        let id = event.id.as_str();

        match event.r#type {
            EventType::Deposit => {
                let amount = event.amount()?;
                self.deposit(user, amount).await?;
                Ok(Some(amount))
            }
            EventType::Pay => self
                .create(PendingPayment::new(id, user, event.target()?, event.amount()?))
                .await
                .map(|_| None),
            EventType::Send => self
                .create(InlineSend::new(id, user, event.amount()?))
                .await
                .map(|_| None),
            EventType::Tip => self
                .create(Tip::new(id, user, event.target()?, event.amount()?))
                .await
                .map(|_| None),
            EventType::Faucet => {
                let shares = event.shares.filter(|s| *s > 0).ok_or_else(|| {
                    GuardError::Validation("Faucet event requires shares".to_string())
                })?;
                self.create(Faucet::new(id, user, event.amount()?, shares))
                    .await
                    .map(|_| None)
            }
            EventType::Jar => self
                .create(Jar::new(id, user, event.amount()?))
                .await
                .map(|_| None),
            EventType::Confirm => self.confirm(id, user).await.map(Some),
            EventType::Accept => self.accept_send(id, user).await.map(Some),
            EventType::Claim => self.claim_faucet(id, user).await.map(Some),
            EventType::Contribute => self.contribute(id, user).await.map(Some),
            EventType::Close => self.close_jar(id, user).await.map(|_| None),
            EventType::Cancel => self.cancel_any(id, user).await.map(|_| None),
        }
    }
}
