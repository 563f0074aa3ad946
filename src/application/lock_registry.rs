use crate::error::{GuardError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, Semaphore};
use tokio::time::Instant;

/// Proof of one acquisition of a transaction lock.
///
/// Only the matching token releases the lock, so a holder that was
/// force-unlocked cannot free the lock of whoever acquired it next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken {
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    generation: u64,
    since: DateTime<Utc>,
}

/// Process-local exclusive lock for one transaction id.
///
/// A single-permit semaphore is used instead of a mutex guard so that the lock
/// can be released by id, including by an operator who never acquired it.
pub(crate) struct LockEntry {
    permit: Semaphore,
    holder: Mutex<Option<Holder>>,
    /// Signalled whenever the persisted `in_transaction` flag may have cleared.
    pub(crate) flag_changed: Notify,
}

impl LockEntry {
    fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            holder: Mutex::new(None),
            flag_changed: Notify::new(),
        }
    }

    /// Frees the lock if it is held by `token`, or by anyone when `token` is
    /// `None`.
    fn unlock(&self, token: Option<LockToken>) -> bool {
        let mut holder = self.holder.lock();
        match *holder {
            Some(current) if token.is_none_or(|t| t.generation == current.generation) => {
                *holder = None;
                self.permit.add_permits(1);
                true
            }
            _ => false,
        }
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockStatus {
    pub id: String,
    pub held: bool,
    pub held_since: Option<DateTime<Utc>>,
}

/// Process-wide table of transaction id to exclusive lock.
///
/// The table mutex only guards entry creation; callers then lock and unlock
/// the per-id entry directly. Entries are never removed, so a stuck lock can
/// always be found and force-released.
#[derive(Default)]
pub struct LockRegistry {
    entries: Mutex<HashMap<String, Arc<LockEntry>>>,
    generations: AtomicU64,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn entry(&self, id: &str) -> Arc<LockEntry> {
        let mut entries = self.entries.lock();
        entries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(LockEntry::new()))
            .clone()
    }

    fn existing(&self, id: &str) -> Option<Arc<LockEntry>> {
        self.entries.lock().get(id).cloned()
    }

    fn claim(&self, entry: &LockEntry) -> LockToken {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        *entry.holder.lock() = Some(Holder {
            generation,
            since: Utc::now(),
        });
        LockToken { generation }
    }

    /// Waits for the lock on `id` until `deadline`.
    pub async fn acquire(&self, id: &str, deadline: Instant) -> Result<LockToken> {
        let entry = self.entry(id);
        let started = Instant::now();

        match tokio::time::timeout_at(deadline, entry.permit.acquire()).await {
            Ok(Ok(permit)) => {
                // Ownership moves to the holder slot; released by token later
                permit.forget();
                let token = self.claim(&entry);
                tracing::debug!(id = %id, "Transaction lock acquired");
                Ok(token)
            }
            Ok(Err(_)) => Err(GuardError::Storage(format!("Lock for {id} was closed"))),
            Err(_) => Err(GuardError::TransactionTimeout {
                id: id.to_string(),
                waited: started.elapsed(),
            }),
        }
    }

    /// Non-blocking variant of [`LockRegistry::acquire`].
    pub fn try_acquire(&self, id: &str) -> Option<LockToken> {
        let entry = self.entry(id);
        let permit = entry.permit.try_acquire().ok()?;
        permit.forget();
        Some(self.claim(&entry))
    }

    /// Releases the lock on `id` if `token` still owns it. Returns `false`
    /// when the lock is free or was handed to another holder meanwhile.
    pub fn release(&self, id: &str, token: LockToken) -> bool {
        let released = self
            .existing(id)
            .is_some_and(|entry| entry.unlock(Some(token)));
        if released {
            tracing::debug!(id = %id, "Transaction lock released");
        }
        released
    }

    /// Releases the lock on `id` whoever holds it.
    ///
    /// Fails with `NotFound` when the id was never locked in this process.
    pub fn force_unlock(&self, id: &str) -> Result<bool> {
        let entry = self
            .existing(id)
            .ok_or_else(|| GuardError::NotFound(id.to_string()))?;
        let released = entry.unlock(None);
        if released {
            tracing::warn!(
                id = %id,
                error = %GuardError::StaleLock(id.to_string()),
                "Lock force-released by operator"
            );
        }
        entry.flag_changed.notify_waiters();
        Ok(released)
    }

    /// Wakes callers waiting for the persisted flag of `id` to clear.
    pub fn notify(&self, id: &str) {
        if let Some(entry) = self.existing(id) {
            entry.flag_changed.notify_waiters();
        }
    }

    /// Whether `token` is still the current holder of `id`.
    pub fn holds(&self, id: &str, token: LockToken) -> bool {
        self.existing(id).is_some_and(|entry| {
            (*entry.holder.lock()).is_some_and(|h| h.generation == token.generation)
        })
    }

    pub fn is_held(&self, id: &str) -> bool {
        self.existing(id)
            .is_some_and(|entry| entry.holder.lock().is_some())
    }

    /// All tracked ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn snapshot(&self) -> Vec<LockStatus> {
        let entries = self.entries.lock();
        let mut statuses: Vec<LockStatus> = entries
            .iter()
            .map(|(id, entry)| {
                let held_since = (*entry.holder.lock()).map(|h| h.since);
                LockStatus {
                    id: id.clone(),
                    held: held_since.is_some(),
                    held_since,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_acquire_release_reacquire() {
        let registry = LockRegistry::new();
        let token = registry.acquire("pay:1", in_secs(1)).await.unwrap();
        assert!(registry.is_held("pay:1"));
        assert!(registry.try_acquire("pay:1").is_none());

        assert!(registry.release("pay:1", token));
        assert!(!registry.release("pay:1", token), "double release is a no-op");
        assert!(registry.try_acquire("pay:1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_at_deadline() {
        let registry = LockRegistry::new();
        registry.acquire("jar:7", in_secs(1)).await.unwrap();

        let start = Instant::now();
        let result = registry.acquire("jar:7", in_secs(3)).await;
        assert!(matches!(result, Err(GuardError::TransactionTimeout { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_waiter_is_woken_by_release() {
        let registry = Arc::new(LockRegistry::new());
        let token = registry.acquire("tip:1", in_secs(1)).await.unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire("tip:1", in_secs(5)).await })
        };
        tokio::task::yield_now().await;
        registry.release("tip:1", token);

        let next = waiter.await.unwrap().unwrap();
        assert_ne!(next, token);
        assert!(registry.is_held("tip:1"));
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let registry = LockRegistry::new();
        assert!(matches!(
            registry.force_unlock("ghost"),
            Err(GuardError::NotFound(_))
        ));

        registry.acquire("send:1", in_secs(1)).await.unwrap();
        assert!(registry.force_unlock("send:1").unwrap());
        assert!(!registry.force_unlock("send:1").unwrap());
        assert!(registry.try_acquire("send:1").is_some());
    }

    #[tokio::test]
    async fn test_late_release_after_force_unlock_keeps_new_holder() {
        let registry = LockRegistry::new();
        let slow = registry.acquire("tip:9", in_secs(1)).await.unwrap();
        registry.force_unlock("tip:9").unwrap();
        let current = registry.acquire("tip:9", in_secs(1)).await.unwrap();

        assert!(!registry.holds("tip:9", slow));
        assert!(registry.holds("tip:9", current));
        assert!(!registry.release("tip:9", slow));
        assert!(registry.is_held("tip:9"));
        assert!(registry.try_acquire("tip:9").is_none());

        assert!(registry.release("tip:9", current));
        assert!(!registry.is_held("tip:9"));
    }

    #[tokio::test]
    async fn test_entries_are_never_removed() {
        let registry = LockRegistry::new();
        let b = registry.acquire("b", in_secs(1)).await.unwrap();
        let a = registry.acquire("a", in_secs(1)).await.unwrap();
        registry.release("a", a);
        registry.release("b", b);

        assert_eq!(registry.ids(), vec!["a", "b"]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|s| !s.held && s.held_since.is_none()));
    }
}
