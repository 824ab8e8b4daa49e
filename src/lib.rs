//! # Chatroom
//!
//! `chatroom` is a small multi-user chat room over TCP. Every frame on the
//! wire is a 4-byte big-endian length followed by a JSON envelope; the server
//! relays each user message to every other participant, and clients keep a
//! presence table built from the status changes they see.
//!
//! ## Core Modules
//!
//! - `protocol`: the message model and the length-prefixed envelope codec.
//! - `transport`: framed connections and the TCP server reactor.
//! - `broker`: the set of connected peers and the broadcast/dispatch rules.
//! - `client`: the chat session, presence table and display sinks.
//! - `config`: loading settings from the config file and environment.
//! - `utils`: error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod protocol;
pub mod transport;
pub mod utils;
