//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `chatroom` application.
//!
//! It centralizes the error taxonomy shared by the codec, the server and the
//! client session, and the tracing setup used by the binary.

pub mod error;
pub mod logging;

pub use error::ChatError;

#[cfg(test)]
mod tests;
