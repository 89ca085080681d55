//! Canonical event model, key pair crypto, and filter matching for a Nostr client.
//!
//! This crate has no network or async dependency; relay connectivity and the
//! inbound message pool live in `nostr-relay`, which builds on top of it.

pub mod bech32;
pub mod error;
pub mod event;
pub mod filter;
pub mod keys;
pub mod message_type;
pub mod request;
pub mod subscription;

pub use error::{NostrError, Result};
pub use event::{EncryptedDirectMessage, Event, EventKind};
pub use filter::{Filter, FilterSet};
pub use keys::{PublicKey, SecretKey};
pub use message_type::{ClientMessageType, RelayMessageType};
pub use request::Request;
pub use subscription::Subscription;
