//! # MQTT Integration Module
//!
//! Owns the agent's single broker session: one client identity, one feed, one transport
//! handle that is swapped out whenever the session has to be rebuilt.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs        - Session identity, broker address and feed path
//! ├── message.rs       - Inbound message representation
//! ├── session.rs       - BrokerSession contract and error taxonomy
//! └── mqtt_handler.rs  - rumqttc-backed session implementation
//! ```
//!
//! ## Design Philosophy
//!
//! - **Poll, don't call back**: inbound messages are pulled with
//!   [`BrokerSession::check_inbound`] from the scheduler tick, never pushed from a
//!   background task, so at most one message is handled per tick and ordering is preserved
//! - **Replace in place**: reconnecting builds a fresh transport and only swaps it in once
//!   the broker has acknowledged it; a failed reconnect leaves the old (broken) one behind
//! - **Typed failures**: transport errors are sorted into [`SessionError`] kinds so the
//!   logs say whether credentials, timeouts or the network were at fault
//!
//! The wire protocol itself is rumqttc's business.

pub mod config;
pub mod message;
pub mod mqtt_handler;
pub mod session;

#[cfg(test)]
pub(crate) mod test_broker;

pub use config::{ClientId, SessionConfig};
pub use message::InboundMessage;
pub use mqtt_handler::{ConnectionState, MqttSession, SessionStatus};
pub use session::{BrokerSession, SessionError};

/// Delivery level for everything the agent sends and subscribes to.
pub const FEED_QOS: rumqttc::QoS = rumqttc::QoS::AtMostOnce;
