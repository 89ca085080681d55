//! Async relay connectivity and the inbound message pool for a Nostr client.
//!
//! Builds on `nostr-core`'s wire types; this crate owns everything that
//! touches a socket.

pub mod error;
pub mod message_pool;
pub mod relay;
pub mod relay_manager;

pub use error::RelayError;
pub use message_pool::{EoseMessage, EventMessage, MessagePool, NoticeMessage, OkMessage};
pub use relay::{Relay, RelayPolicy, RelayProxyConfig, RelayStatus};
pub use relay_manager::RelayManager;
