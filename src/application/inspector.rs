use super::lock_registry::{LockRegistry, LockStatus};
use crate::domain::ports::StateStoreRef;
use crate::domain::record::{StoredRecord, index_pattern, load_any, save_any};
use crate::error::{GuardError, Result};
use std::sync::Arc;

/// Operator-facing view of the lock registry, plus the recovery path for a
/// holder that died between claiming a record and releasing it.
#[derive(Clone)]
pub struct LockInspector {
    registry: Arc<LockRegistry>,
    store: StateStoreRef,
}

impl LockInspector {
    pub fn new(registry: Arc<LockRegistry>, store: StateStoreRef) -> Self {
        Self { registry, store }
    }

    /// Every transaction id this process has ever locked.
    pub fn tracked(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn status(&self) -> Vec<LockStatus> {
        self.registry.snapshot()
    }

    /// Releases the process lock on `id` whoever holds it.
    pub fn force_unlock(&self, id: &str) -> Result<bool> {
        self.registry.force_unlock(id)
    }

    /// Clears a persisted `in_transaction` flag left behind by a dead holder
    /// and wakes any caller waiting on it. Returns whether the flag was set.
    pub async fn clear_stale(&self, id: &str) -> Result<bool> {
        let mut record = load_any(self.store.as_ref(), id).await?;
        let tx = record.transaction_mut();
        if !tx.in_transaction {
            return Ok(false);
        }
        tx.in_transaction = false;
        tx.touch();
        save_any(self.store.as_ref(), &record).await?;
        tracing::warn!(id = %id, kind = record.kind(), "Cleared stale transaction flag");
        self.registry.notify(id);
        Ok(true)
    }

    /// Scans the store for records persisted mid-transaction, either of one
    /// kind or of every kind when `kind` is `None`.
    ///
    /// Records that fail to decode are logged and skipped.
    pub async fn stale_records(&self, kind: Option<&str>) -> Result<Vec<StoredRecord>> {
        let pattern = match kind {
            Some(kind) if StoredRecord::KINDS.contains(&kind) => index_pattern(kind),
            Some(kind) => {
                return Err(GuardError::Validation(format!("Unknown record kind {kind}")));
            }
            None => "*".to_string(),
        };

        let mut stale = Vec::new();
        self.store
            .iterate(&pattern, &mut |key, value| {
                match StoredRecord::decode(key, value) {
                    Ok(record) if record.transaction().in_transaction => stale.push(record),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(key = %key, error = %e, "Skipping undecodable record"),
                }
                true
            })
            .await?;
        Ok(stale)
    }
}
