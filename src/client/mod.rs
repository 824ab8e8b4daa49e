//! The `client` module is the chat participant side.
//!
//! - `session`: one connection to the server, its lifecycle and console loop.
//! - `presence`: the username → status table built from status-change events.
//! - `sink`: where the session sends every line it wants displayed.

pub mod presence;
pub mod session;
pub mod sink;

pub use presence::{PresenceNotice, PresenceTable, StatusEvent, reconcile};
pub use session::{ChatSession, Delivery, SessionState};
pub use sink::{ChannelSink, ConsoleSink, DisplayEvent, DisplaySink};
