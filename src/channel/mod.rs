//! Grouped, connection-oriented broadcast channel
//!
//! ## Connection lifecycle
//!
//! ```text
//! connect ──→ Connected (snapshot pushed) ──→ ... ──→ disconnect (memberships dropped)
//! ```
//!
//! Groups are opt-in: only a connection can add itself to, or remove
//! itself from, a group. Reconnecting creates a new connection identity.
//!
//! ## Communication Patterns
//!
//! 1. **Group pushes**: lifecycle and metric events, fanned out by the relay
//! 2. **Global pushes**: switch advisories and results
//! 3. **Direct replies**: per-invocation responses to the calling connection

pub mod hub;
pub mod messages;
pub mod relay;

pub use hub::{Connection, ConnectionId, Hub, METRICS_GROUP, MODELS_GROUP};
pub use messages::{ClientMessage, ServerMessage, SwitchResult};
pub use relay::RelayHandle;
