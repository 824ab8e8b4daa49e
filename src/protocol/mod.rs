//! The `protocol` module defines the chat wire protocol: the `Message` model
//! shared by server and client, and the length-prefixed JSON envelope codec.

pub mod codec;
pub mod message;

pub use codec::{decode, encode};
pub use message::{Content, Message, MessageKind, ServiceCommand, ServicePayload, Status};
