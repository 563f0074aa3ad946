use super::account::{Account, Amount};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Visitor passed to [`StateStore::iterate`]. Returning `false` stops the scan.
pub type Visitor<'a> = &'a mut (dyn FnMut(&str, &[u8]) -> bool + Send);

/// Opaque persistent key/value service holding JSON-serialized records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fails with `GuardError::NotFound` when the key is absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Scans keys matching `pattern` in key order.
    ///
    /// A trailing `*` matches any suffix (`"jar:*"`, or `"*"` for everything);
    /// a pattern without `*` matches a single key.
    async fn iterate(&self, pattern: &str, visit: Visitor<'_>) -> Result<()>;
}

/// External wallet service that executes the actual monetary transfers.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn deposit(&self, user: &str, amount: Amount) -> Result<()>;
    async fn transfer(&self, from: &str, to: &str, amount: Amount) -> Result<()>;
    async fn pay_invoice(&self, from: &str, invoice: &str, amount: Amount) -> Result<()>;
    async fn accounts(&self) -> Result<Vec<Account>>;
}

pub type StateStoreRef = Arc<dyn StateStore>;
pub type WalletRef = Arc<dyn Wallet>;
pub type StateStoreFactory = Box<dyn Fn() -> StateStoreRef + Send + Sync>;

/// Splits an index pattern into the key prefix it selects and whether it is a
/// prefix scan at all.
pub fn pattern_prefix(pattern: &str) -> (&str, bool) {
    match pattern.strip_suffix('*') {
        Some(prefix) => (prefix, true),
        None => (pattern, false),
    }
}
