//! The `transport` module is responsible for moving frames over TCP.
//!
//! `connection` wraps a byte stream with the frame buffer used to read
//! length-prefixed envelopes; `server` runs the accept/read/write loops and
//! feeds everything it reads to the broker.

pub mod connection;
pub mod server;

pub use connection::{Connection, ConnectionState, Received};
pub use server::{ChatServer, start_chat_server};

#[cfg(test)]
mod tests;
