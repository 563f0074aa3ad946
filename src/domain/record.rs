//! Record contract and the closed set of lockable record kinds.
//!
//! Every record embeds a [`Transaction`] and is persisted as one JSON object
//! under its id, carrying a `kind` discriminator so that heterogeneous records
//! sharing one store decode into the matching concrete type.

use super::account::Amount;
use super::ports::StateStore;
use super::transaction::Transaction;
use crate::error::{GuardError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Minimal interface of a lockable entity.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Discriminator stored in the `kind` field, also the key prefix used as
    /// the index tag for range scans.
    const KIND: &'static str;

    fn transaction(&self) -> &Transaction;
    fn transaction_mut(&mut self) -> &mut Transaction;
    /// User who created the record and may cancel it.
    fn creator(&self) -> &str;
    /// Returns the record back when it is of another kind.
    fn from_stored(stored: StoredRecord) -> std::result::Result<Self, StoredRecord>;

    fn id(&self) -> &str {
        &self.transaction().id
    }

    /// Checks that the id has the `<kind>:<suffix>` shape, so that the record
    /// is found by the index pattern of its own kind.
    fn validate_key(&self) -> Result<()> {
        let tx = self.transaction();
        let suffix = tx.id.split_once(':').map_or("", |(_, suffix)| suffix);
        if tx.index_tag() == Self::KIND && !suffix.is_empty() {
            Ok(())
        } else {
            Err(GuardError::Validation(format!(
                "Record id {} must look like {}:<suffix>",
                tx.id,
                Self::KIND
            )))
        }
    }
}

/// Index pattern selecting every record of `kind`.
pub fn index_pattern(kind: &str) -> String {
    format!("{kind}:*")
}

/// A payment of an invoice awaiting the payer's confirm tap.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PendingPayment {
    #[serde(flatten)]
    pub tx: Transaction,
    pub from: String,
    pub invoice: String,
    pub amount: Amount,
}

/// An inline send offer; the first user to accept receives the funds.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct InlineSend {
    #[serde(flatten)]
    pub tx: Transaction,
    pub from: String,
    pub amount: Amount,
    pub to: Option<String>,
}

/// A tip from one user to another awaiting confirmation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Tip {
    #[serde(flatten)]
    pub tx: Transaction,
    pub from: String,
    pub to: String,
    pub amount: Amount,
}

/// A faucet handing out a fixed share to each distinct claimant.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Faucet {
    #[serde(flatten)]
    pub tx: Transaction,
    pub from: String,
    pub amount_per_user: Amount,
    pub remaining: u32,
    pub claimed_by: Vec<String>,
    /// Repeated claim taps, shown on the faucet message.
    #[serde(default)]
    pub duplicate_claims: u32,
}

/// A pooled jar collecting a fixed contribution from each distinct user.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Jar {
    #[serde(flatten)]
    pub tx: Transaction,
    pub owner: String,
    pub amount_per_contribution: Amount,
    pub contributors: Vec<String>,
    pub collected: u64,
}

/// Every record kind that can live in the state store.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "kind")]
pub enum StoredRecord {
    #[serde(rename = "pay")]
    Payment(PendingPayment),
    #[serde(rename = "send")]
    Send(InlineSend),
    #[serde(rename = "tip")]
    Tip(Tip),
    #[serde(rename = "faucet")]
    Faucet(Faucet),
    #[serde(rename = "jar")]
    Jar(Jar),
}

impl StoredRecord {
    pub const KINDS: [&'static str; 5] = ["pay", "send", "tip", "faucet", "jar"];

    /// Decodes a persisted record, rejecting unknown discriminators with
    /// `InvalidType` instead of a bare deserialization error.
    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct KindOnly {
            kind: Option<String>,
        }

        let header: KindOnly = serde_json::from_slice(bytes)?;
        match header.kind {
            Some(kind) if Self::KINDS.contains(&kind.as_str()) => {
                Ok(serde_json::from_slice(bytes)?)
            }
            found => Err(GuardError::InvalidType {
                id: id.to_string(),
                expected: "record",
                found: found.unwrap_or_else(|| "<missing>".to_string()),
            }),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoredRecord::Payment(_) => PendingPayment::KIND,
            StoredRecord::Send(_) => InlineSend::KIND,
            StoredRecord::Tip(_) => Tip::KIND,
            StoredRecord::Faucet(_) => Faucet::KIND,
            StoredRecord::Jar(_) => Jar::KIND,
        }
    }

    pub fn transaction(&self) -> &Transaction {
        match self {
            StoredRecord::Payment(r) => &r.tx,
            StoredRecord::Send(r) => &r.tx,
            StoredRecord::Tip(r) => &r.tx,
            StoredRecord::Faucet(r) => &r.tx,
            StoredRecord::Jar(r) => &r.tx,
        }
    }

    pub fn transaction_mut(&mut self) -> &mut Transaction {
        match self {
            StoredRecord::Payment(r) => &mut r.tx,
            StoredRecord::Send(r) => &mut r.tx,
            StoredRecord::Tip(r) => &mut r.tx,
            StoredRecord::Faucet(r) => &mut r.tx,
            StoredRecord::Jar(r) => &mut r.tx,
        }
    }
}

macro_rules! impl_record {
    ($ty:ty, $variant:ident, $kind:literal, $creator:ident) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn transaction(&self) -> &Transaction {
                &self.tx
            }

            fn transaction_mut(&mut self) -> &mut Transaction {
                &mut self.tx
            }

            fn creator(&self) -> &str {
                &self.$creator
            }

            fn from_stored(stored: StoredRecord) -> std::result::Result<Self, StoredRecord> {
                match stored {
                    StoredRecord::$variant(record) => Ok(record),
                    other => Err(other),
                }
            }
        }
    };
}

impl_record!(PendingPayment, Payment, "pay", from);
impl_record!(InlineSend, Send, "send", from);
impl_record!(Tip, Tip, "tip", from);
impl_record!(Faucet, Faucet, "faucet", from);
impl_record!(Jar, Jar, "jar", owner);

impl PendingPayment {
    pub fn new(id: impl Into<String>, from: &str, invoice: &str, amount: Amount) -> Self {
        Self {
            tx: Transaction::new(id),
            from: from.to_string(),
            invoice: invoice.to_string(),
            amount,
        }
    }
}

impl InlineSend {
    pub fn new(id: impl Into<String>, from: &str, amount: Amount) -> Self {
        Self {
            tx: Transaction::new(id),
            from: from.to_string(),
            amount,
            to: None,
        }
    }

    /// Assigns the receiver of this offer.
    pub fn accept(&mut self, user: &str) -> Result<()> {
        if user == self.from {
            return Err(GuardError::Validation(
                "Cannot accept your own send".to_string(),
            ));
        }
        if let Some(to) = &self.to {
            return Err(GuardError::Validation(format!(
                "Send already accepted by {to}"
            )));
        }
        self.to = Some(user.to_string());
        Ok(())
    }
}

impl Tip {
    pub fn new(id: impl Into<String>, from: &str, to: &str, amount: Amount) -> Self {
        Self {
            tx: Transaction::new(id),
            from: from.to_string(),
            to: to.to_string(),
            amount,
        }
    }
}

impl Faucet {
    pub fn new(id: impl Into<String>, from: &str, amount_per_user: Amount, shares: u32) -> Self {
        Self {
            tx: Transaction::new(id),
            from: from.to_string(),
            amount_per_user,
            remaining: shares,
            claimed_by: Vec::new(),
            duplicate_claims: 0,
        }
    }

    /// Records a claim and returns the share owed to `user`.
    pub fn claim(&mut self, user: &str) -> Result<Amount> {
        if user == self.from {
            return Err(GuardError::Validation(
                "Cannot claim your own faucet".to_string(),
            ));
        }
        if self.has_claimed(user) {
            return Err(GuardError::Validation(format!("{user} already claimed")));
        }
        if self.remaining == 0 {
            return Err(GuardError::NotActive(self.tx.id.clone()));
        }
        self.remaining -= 1;
        self.claimed_by.push(user.to_string());
        Ok(self.amount_per_user)
    }

    pub fn has_claimed(&self, user: &str) -> bool {
        self.claimed_by.iter().any(|u| u == user)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

impl Jar {
    pub fn new(id: impl Into<String>, owner: &str, amount_per_contribution: Amount) -> Self {
        Self {
            tx: Transaction::new(id),
            owner: owner.to_string(),
            amount_per_contribution,
            contributors: Vec::new(),
            collected: 0,
        }
    }

    /// Records a contribution and returns the amount `user` pays into the jar.
    pub fn contribute(&mut self, user: &str) -> Result<Amount> {
        if user == self.owner {
            return Err(GuardError::Validation(
                "Cannot contribute to your own jar".to_string(),
            ));
        }
        if self.contributors.iter().any(|u| u == user) {
            return Err(GuardError::Validation(format!(
                "{user} already contributed"
            )));
        }
        self.collected = self
            .collected
            .checked_add(self.amount_per_contribution.sats())
            .ok_or_else(|| GuardError::Validation(format!("Jar {} is full", self.tx.id)))?;
        self.contributors.push(user.to_string());
        Ok(self.amount_per_contribution)
    }
}

#[derive(Serialize)]
struct Tagged<'a, R: Record> {
    kind: &'static str,
    #[serde(flatten)]
    record: &'a R,
}

/// Serializes a record with its `kind` discriminator.
pub fn encode_record<R: Record>(record: &R) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Tagged {
        kind: R::KIND,
        record,
    })?)
}

pub fn decode_record<R: Record>(id: &str, bytes: &[u8]) -> Result<R> {
    let stored = StoredRecord::decode(id, bytes)?;
    R::from_stored(stored).map_err(|other| GuardError::InvalidType {
        id: id.to_string(),
        expected: R::KIND,
        found: other.kind().to_string(),
    })
}

/// Loads a record of a known kind.
pub async fn load_record<R: Record>(store: &dyn StateStore, id: &str) -> Result<R> {
    let bytes = store.get(id).await?;
    decode_record(id, &bytes)
}

/// Loads a record of any kind.
pub async fn load_any(store: &dyn StateStore, id: &str) -> Result<StoredRecord> {
    let bytes = store.get(id).await?;
    StoredRecord::decode(id, &bytes)
}

pub async fn save_record<R: Record>(store: &dyn StateStore, record: &R) -> Result<()> {
    store.set(record.id(), encode_record(record)?).await
}

pub async fn save_any(store: &dyn StateStore, record: &StoredRecord) -> Result<()> {
    store
        .set(&record.transaction().id, serde_json::to_vec(record)?)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sats(n: u64) -> Amount {
        Amount::new(n).unwrap()
    }

    #[test]
    fn test_encoded_record_carries_kind_and_flat_flags() {
        let payment = PendingPayment::new("pay:42", "alice", "lnbc1", sats(100));
        let value: serde_json::Value =
            serde_json::from_slice(&encode_record(&payment).unwrap()).unwrap();

        assert_eq!(value["kind"], "pay");
        assert_eq!(value["id"], "pay:42");
        assert_eq!(value["active"], true);
        assert_eq!(value["in_transaction"], false);
        assert_eq!(value["amount"], 100);
    }

    #[test]
    fn test_decode_into_matching_variant() {
        let jar = Jar::new("jar:7", "carol", sats(10));
        let bytes = encode_record(&jar).unwrap();

        let stored = StoredRecord::decode("jar:7", &bytes).unwrap();
        assert_eq!(stored.kind(), "jar");
        assert_eq!(stored, StoredRecord::Jar(jar.clone()));

        let typed: Jar = decode_record("jar:7", &bytes).unwrap();
        assert_eq!(typed, jar);
    }

    #[test]
    fn test_decode_wrong_kind_is_invalid_type() {
        let tip = Tip::new("tip:1", "alice", "bob", sats(5));
        let bytes = encode_record(&tip).unwrap();

        let result = decode_record::<Faucet>("tip:1", &bytes);
        assert!(matches!(
            result,
            Err(GuardError::InvalidType { expected: "faucet", ref found, .. }) if found == "tip"
        ));
    }

    #[test]
    fn test_decode_unknown_discriminator() {
        let bytes = br#"{"kind":"lottery","id":"lottery:1"}"#;
        let result = StoredRecord::decode("lottery:1", bytes);
        assert!(matches!(
            result,
            Err(GuardError::InvalidType { ref found, .. }) if found == "lottery"
        ));

        let missing = StoredRecord::decode("x", br#"{"id":"x"}"#);
        assert!(matches!(missing, Err(GuardError::InvalidType { .. })));
    }

    #[test]
    fn test_key_must_match_kind() {
        assert!(PendingPayment::new("pay:42", "alice", "lnbc1", sats(1)).validate_key().is_ok());
        for id in ["jar:7", "pay", "pay:", "payment:1"] {
            let payment = PendingPayment::new(id, "alice", "lnbc1", sats(1));
            assert!(
                matches!(payment.validate_key(), Err(GuardError::Validation(_))),
                "{id} accepted"
            );
        }
        assert_eq!(index_pattern(Jar::KIND), "jar:*");
    }

    #[test]
    fn test_inline_send_accept_once() {
        let mut send = InlineSend::new("send:1", "alice", sats(50));
        assert!(matches!(send.accept("alice"), Err(GuardError::Validation(_))));
        send.accept("bob").unwrap();
        assert_eq!(send.to.as_deref(), Some("bob"));
        assert!(matches!(send.accept("carol"), Err(GuardError::Validation(_))));
    }

    #[test]
    fn test_faucet_claims() {
        let mut faucet = Faucet::new("faucet:1", "alice", sats(10), 2);
        assert_eq!(faucet.claim("bob").unwrap(), sats(10));
        assert!(matches!(faucet.claim("bob"), Err(GuardError::Validation(_))));
        faucet.claim("carol").unwrap();
        assert!(faucet.is_exhausted());
        assert!(matches!(faucet.claim("dave"), Err(GuardError::NotActive(_))));
        assert_eq!(faucet.claimed_by, vec!["bob", "carol"]);
    }

    #[test]
    fn test_jar_contributions() {
        let mut jar = Jar::new("jar:1", "alice", sats(21));
        jar.contribute("bob").unwrap();
        jar.contribute("carol").unwrap();
        assert!(matches!(jar.contribute("bob"), Err(GuardError::Validation(_))));
        assert!(matches!(jar.contribute("alice"), Err(GuardError::Validation(_))));
        assert_eq!(jar.collected, 42);
    }

    #[test]
    fn test_jar_overflow_is_rejected() {
        let mut jar = Jar::new("jar:1", "alice", sats(1 << 63));
        jar.contribute("bob").unwrap();
        assert!(matches!(jar.contribute("carol"), Err(GuardError::Validation(_))));
        assert_eq!(jar.collected, 1 << 63);
        assert_eq!(jar.contributors, vec!["bob"]);
    }
}
