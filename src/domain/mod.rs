//! Domain types: the lockable records, their embedded transaction flags,
//! and the ports to the state store and the wallet service.

pub mod account;
pub mod event;
pub mod ports;
pub mod record;
pub mod transaction;
