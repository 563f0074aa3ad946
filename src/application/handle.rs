use super::lock_registry::{LockRegistry, LockToken};
use crate::config::LockSettings;
use crate::domain::ports::StateStoreRef;
use crate::domain::record::{Record, load_record, save_record};
use crate::error::{GuardError, Result};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::time::Instant;

/// Releases the process lock if it is abandoned before being handed over,
/// whether by error, timeout or the caller dropping the future.
struct PendingLock<'a> {
    registry: &'a LockRegistry,
    id: &'a str,
    token: LockToken,
    armed: bool,
}

impl PendingLock<'_> {
    fn disarm(mut self) -> LockToken {
        self.armed = false;
        self.token
    }
}

impl Drop for PendingLock<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release(self.id, self.token);
        }
    }
}

/// A record returned by [`TransactionHandle::get`], together with the process
/// lock it was loaded under. Give it back through [`TransactionHandle::release`].
#[derive(Debug)]
pub struct Held<R> {
    record: R,
    token: LockToken,
    released: bool,
}

impl<R> Held<R> {
    pub fn token(&self) -> LockToken {
        self.token
    }

    pub fn into_inner(self) -> R {
        self.record
    }
}

impl<R> Deref for Held<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.record
    }
}

impl<R> DerefMut for Held<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.record
    }
}

/// Lock/release/inactivate operations over records in the state store.
///
/// Serializes callers for the same id through the [`LockRegistry`] and
/// mirrors ownership in the persisted `in_transaction` flag.
#[derive(Clone)]
pub struct TransactionHandle {
    store: StateStoreRef,
    registry: Arc<LockRegistry>,
    settings: LockSettings,
}

impl TransactionHandle {
    pub fn new(store: StateStoreRef, registry: Arc<LockRegistry>, settings: LockSettings) -> Self {
        Self {
            store,
            registry,
            settings,
        }
    }

    pub fn store(&self) -> &StateStoreRef {
        &self.store
    }

    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    async fn lock_id<'a>(&'a self, id: &'a str, deadline: Instant) -> Result<PendingLock<'a>> {
        let token = self.registry.acquire(id, deadline).await?;
        Ok(PendingLock {
            registry: &self.registry,
            id,
            token,
            armed: true,
        })
    }

    /// Persists a new record under the process lock of its id.
    ///
    /// Fails with `Validation` when the id does not match the record kind or
    /// is already taken; ids are never reused.
    pub async fn insert<R: Record>(&self, record: &R) -> Result<()> {
        record.validate_key()?;
        let id = record.id();
        let deadline = Instant::now() + self.settings.timeout();
        let pending = self.lock_id(id, deadline).await?;

        let outcome = match self.store.get(id).await {
            Ok(_) => Err(GuardError::Validation(format!("Record {id} already exists"))),
            Err(GuardError::NotFound(_)) => save_record(self.store.as_ref(), record).await,
            Err(e) => Err(e),
        };
        self.registry.release(id, pending.disarm());
        outcome
    }

    /// Loads `id` and returns it with the process lock held, once no other
    /// holder has the persisted flag set.
    ///
    /// Fails with `NotFound` immediately if the record is absent, and with
    /// `TransactionTimeout` if the lock or flag is not free within the
    /// configured timeout.
    pub async fn get<R: Record>(&self, id: &str) -> Result<Held<R>> {
        self.get_until(id, Instant::now() + self.settings.timeout())
            .await
    }

    /// [`TransactionHandle::get`] with a caller-supplied deadline.
    pub async fn get_until<R: Record>(&self, id: &str, deadline: Instant) -> Result<Held<R>> {
        let started = Instant::now();
        load_record::<R>(self.store.as_ref(), id).await?;

        let pending = self.lock_id(id, deadline).await?;
        let entry = self.registry.entry(id);
        loop {
            // Register interest before reading so a clear between the read
            // and the wait is not missed
            let notified = entry.flag_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let record: R = load_record(self.store.as_ref(), id).await?;
            if !record.transaction().in_transaction {
                return Ok(Held {
                    record,
                    token: pending.disarm(),
                    released: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(id = %id, "Persisted transaction flag never cleared");
                return Err(GuardError::TransactionTimeout {
                    id: id.to_string(),
                    waited: now - started,
                });
            }

            let wake = (now + self.settings.poll_interval()).min(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Fails with `StaleLock` once the process lock behind `held` was
    /// force-released, so a displaced holder cannot write over the next one.
    fn ensure_owner<R: Record>(&self, held: &Held<R>) -> Result<()> {
        if !held.released && self.registry.holds(held.id(), held.token) {
            Ok(())
        } else {
            Err(GuardError::StaleLock(held.id().to_string()))
        }
    }

    /// Marks the record as being mutated and persists the claim.
    pub async fn lock<R: Record>(&self, held: &mut Held<R>) -> Result<()> {
        self.ensure_active(held)?;
        self.ensure_owner(held)?;
        let tx = held.transaction_mut();
        tx.in_transaction = true;
        tx.touch();
        save_record(self.store.as_ref(), &held.record).await
    }

    /// Clears the claim and hands the process lock to the next caller.
    ///
    /// The process lock is released even when persisting fails; the error is
    /// still returned so the caller does not treat the action as settled.
    /// Releasing twice is a no-op.
    pub async fn release<R: Record>(&self, held: &mut Held<R>) -> Result<()> {
        if held.released {
            return Ok(());
        }
        if let Err(e) = self.ensure_owner(held) {
            held.released = true;
            tracing::warn!(id = %held.id(), "Process lock was taken over before release");
            return Err(e);
        }

        let persisted = if held.transaction().in_transaction {
            let tx = held.transaction_mut();
            tx.in_transaction = false;
            tx.touch();
            save_record(self.store.as_ref(), &held.record).await
        } else {
            Ok(())
        };

        held.released = true;
        self.registry.release(held.id(), held.token);
        persisted
    }

    /// Moves the record to its terminal state. Calling it again is a no-op.
    pub async fn inactivate<R: Record>(&self, held: &mut Held<R>) -> Result<()> {
        if !held.transaction().active {
            return Ok(());
        }
        self.ensure_owner(held)?;
        let tx = held.transaction_mut();
        tx.active = false;
        tx.touch();
        save_record(self.store.as_ref(), &held.record).await?;
        tracing::debug!(id = %held.id(), "Record inactivated");
        Ok(())
    }

    pub fn ensure_active<R: Record>(&self, held: &Held<R>) -> Result<()> {
        if held.transaction().active {
            Ok(())
        } else {
            Err(GuardError::NotActive(held.id().to_string()))
        }
    }

    /// Persists a mutation made while holding the lock.
    pub async fn save<R: Record>(&self, held: &mut Held<R>) -> Result<()> {
        self.ensure_active(held)?;
        self.ensure_owner(held)?;
        held.transaction_mut().touch();
        save_record(self.store.as_ref(), &held.record).await
    }

    /// Best-effort write of a display-only change; failures are logged.
    pub async fn touch<R: Record>(&self, held: &mut Held<R>) {
        if self.ensure_owner(held).is_err() {
            tracing::debug!(id = %held.id(), "Informational update skipped, lock not owned");
            return;
        }
        held.transaction_mut().touch();
        if let Err(e) = save_record(self.store.as_ref(), &held.record).await {
            tracing::warn!(id = %held.id(), error = %e, "Informational update not persisted");
        }
    }
}
