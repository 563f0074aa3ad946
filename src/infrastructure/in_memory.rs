use crate::domain::ports::{StateStore, Visitor, pattern_prefix};
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory state store.
///
/// Uses `Arc<RwLock<BTreeMap<String, Vec<u8>>>>` so that scans come back in key
/// order. Ideal for testing or for a bot that does not need to survive restarts.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let records = self.records.read().await;
        records
            .get(key)
            .cloned()
            .ok_or_else(|| GuardError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records.remove(key);
        Ok(())
    }

    async fn iterate(&self, pattern: &str, visit: Visitor<'_>) -> Result<()> {
        let (prefix, is_scan) = pattern_prefix(pattern);
        // Snapshot first so the visitor never runs under the lock
        let matches: Vec<(String, Vec<u8>)> = {
            let records = self.records.read().await;
            if is_scan {
                records
                    .range(prefix.to_string()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            } else {
                records
                    .get_key_value(prefix)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .into_iter()
                    .collect()
            }
        };

        for (key, value) in &matches {
            if !visit(key.as_str(), value.as_slice()) {
                break;
            }
        }
        Ok(())
    }
}

/// Store whose writes can be switched to fail, for exercising error paths.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FailingStore {
    inner: InMemoryStore,
    fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self, key: &str) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            Err(GuardError::Storage(format!("write to {key} refused")))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl StateStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(key)?;
        self.inner.delete(key).await
    }

    async fn iterate(&self, pattern: &str, visit: Visitor<'_>) -> Result<()> {
        self.inner.iterate(pattern, visit).await
    }
}
