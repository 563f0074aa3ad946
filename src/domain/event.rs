use super::account::Amount;
use crate::error::{GuardError, Result};
use serde::Deserialize;

/// Kind of inbound event delivered by the chat platform or a webhook.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Funds a user's wallet.
    Deposit,
    /// Creates a pending invoice payment (`target` is the invoice).
    Pay,
    /// Confirm tap on a pending payment or tip.
    Confirm,
    /// Creates an inline send offer.
    Send,
    Accept,
    /// Creates a tip (`target` is the receiver).
    Tip,
    /// Creates a faucet (`shares` claims of `amount` each).
    Faucet,
    Claim,
    /// Creates a pooled jar collecting `amount` per contributor.
    Jar,
    Contribute,
    /// Closes a jar.
    Close,
    Cancel,
}

/// One inbound event: who did what to which transaction.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
pub struct Event {
    pub r#type: EventType,
    #[serde(default)]
    pub id: String,
    pub user: String,
    pub amount: Option<u64>,
    pub target: Option<String>,
    pub shares: Option<u32>,
}

impl Event {
    /// Whether the event creates state that later events depend on.
    pub fn is_creation(&self) -> bool {
        matches!(
            self.r#type,
            EventType::Deposit
                | EventType::Pay
                | EventType::Send
                | EventType::Tip
                | EventType::Faucet
                | EventType::Jar
        )
    }

    pub fn amount(&self) -> Result<Amount> {
        let sats = self.amount.ok_or_else(|| {
            GuardError::Validation(format!("{:?} event requires an amount", self.r#type))
        })?;
        Amount::new(sats)
    }

    pub fn target(&self) -> Result<&str> {
        self.target.as_deref().ok_or_else(|| {
            GuardError::Validation(format!("{:?} event requires a target", self.r#type))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserialization_with_missing_columns() {
        let csv = "type, id, user, amount, target, shares\naccept, send:1, bob\nfaucet, faucet:1, alice, 10, , 3";
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(csv.as_bytes());
        let events: Vec<Event> = reader.deserialize().map(|r| r.unwrap()).collect();

        assert_eq!(events[0].r#type, EventType::Accept);
        assert_eq!(events[0].amount, None);
        assert!(!events[0].is_creation());

        assert_eq!(events[1].shares, Some(3));
        assert_eq!(events[1].amount().unwrap().sats(), 10);
        assert!(matches!(events[1].target(), Err(GuardError::Validation(_))));
        assert!(events[1].is_creation());
    }
}
