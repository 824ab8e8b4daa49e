//! The `broker` module holds the server-side state of the chat room: the
//! registry of connected peers and the rules deciding who receives what.

pub mod engine;
pub mod peer;

pub use engine::{Broker, Dispatch, SERVER_NAME};
pub use peer::{Peer, PeerId};

#[cfg(test)]
mod tests;
