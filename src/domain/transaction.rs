use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a lockable record, derived from its flags.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransactionState {
    Idle,
    Locked,
    Inactive,
}

/// Lock and lifecycle flags embedded in every lockable record.
///
/// The store owns the durable copy. `in_transaction` is `true` exactly while a
/// holder of the process-local lock is mutating the record, and `active == false`
/// is terminal.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    /// Store key and lock key. Never changes after creation.
    pub id: String,
    pub active: bool,
    pub in_transaction: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            active: true,
            in_transaction: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> TransactionState {
        match (self.active, self.in_transaction) {
            (false, _) => TransactionState::Inactive,
            (true, true) => TransactionState::Locked,
            (true, false) => TransactionState::Idle,
        }
    }

    /// Index tag of the record, i.e. the part of the id before the first `:`.
    pub fn index_tag(&self) -> &str {
        self.id.split_once(':').map_or(self.id.as_str(), |(tag, _)| tag)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
