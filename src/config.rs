//! Runtime configuration.
//!
//! Every field has a default, so an empty (or absent) config file yields a
//! working single-instance setup. Values are read once at startup; nothing here
//! can be changed while the process runs.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub admin: AdminSettings,

    #[serde(default)]
    pub wallet: WalletSettings,

    /// RocksDB directory. In-memory storage when absent.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl GuardConfig {
    /// Loads a JSON config file, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read(path)?;
                Ok(serde_json::from_slice(&raw)?)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Bounds of the get-with-lock wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Overall deadline for acquiring the process lock and seeing the
    /// persisted flag clear.
    #[serde(default = "default_lock_timeout")]
    pub timeout_ms: u64,

    /// Re-read interval while the persisted flag is still set.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl LockSettings {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            poll_interval_ms: poll_interval.as_millis() as u64,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Capacity and refill interval of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSettings {
    pub capacity: u32,
    pub interval_ms: u64,
}

impl BucketSettings {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            capacity,
            interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Bot-wide ceiling.
    #[serde(default = "default_global_bucket")]
    pub global: BucketSettings,

    /// Ceiling per conversation.
    #[serde(default = "default_scope_bucket")]
    pub per_scope: BucketSettings,

    /// Lower bound on the sleep between admission retries.
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            global: default_global_bucket(),
            per_scope: default_scope_bucket(),
            backoff_ms: default_backoff(),
        }
    }
}

impl RateLimitSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSettings {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

impl Default for AdminSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// The built-in demo wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Simulated delay of every wallet call.
    #[serde(default)]
    pub latency_ms: u64,
}

impl WalletSettings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

fn default_lock_timeout() -> u64 {
    10_000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_global_bucket() -> BucketSettings {
    BucketSettings::new(30, Duration::from_secs(1))
}

fn default_scope_bucket() -> BucketSettings {
    BucketSettings::new(20, Duration::from_secs(60))
}

fn default_backoff() -> u64 {
    50
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}
