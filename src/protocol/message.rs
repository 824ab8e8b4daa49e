//! Message definitions for the chat protocol
//!
//! `Message` is the canonical in-memory representation of one wire frame.
//! The two message kinds share only `id` and `sender`; everything else lives
//! in the `Content` variant so that a user message can never carry service
//! fields and vice versa.
//!
//! Service command codes:
//! - `0`: normalized status change, status code in `action`
//! - `1`: shut down this connection
//! - `5`..`8`: status change to online / away / do-not-disturb / offline
//! - `9`: shut down the server (always refused)

use std::fmt;

use uuid::Uuid;

use crate::utils::ChatError;

/// Wire discriminant of a message, carried in the `type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    UserMessage,
    ServiceMessage,
}

impl MessageKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            MessageKind::UserMessage => "usrmsg",
            MessageKind::ServiceMessage => "svcmsg",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "usrmsg" => Some(MessageKind::UserMessage),
            "svcmsg" => Some(MessageKind::ServiceMessage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque unique id, generated by whoever builds the message.
    pub id: String,
    /// Display name claimed by the sending peer. Not authenticated.
    pub sender: String,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    User { body: String },
    Service(ServicePayload),
}

/// Structured fields of a service message.
///
/// Codes are kept raw so that a frame with an unknown command still decodes
/// and can be logged; `command()` classifies them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePayload {
    pub command: Option<i64>,
    pub action: Option<i64>,
    pub primary_key: Option<i64>,
    pub secondary_key: Option<i64>,
    /// Human-readable text sent in `body` alongside the command, if any.
    pub note: Option<String>,
}

/// Presence status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    Online,
    Away,
    DoNotDisturb,
    Offline,
}

impl Status {
    pub const ALL: [Status; 4] = [
        Status::Online,
        Status::Away,
        Status::DoNotDisturb,
        Status::Offline,
    ];

    /// Service command code selecting this status.
    pub fn code(self) -> i64 {
        match self {
            Status::Online => 5,
            Status::Away => 6,
            Status::DoNotDisturb => 7,
            Status::Offline => 8,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Status::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Name used by the console `!status:<name>` command.
    pub fn short_name(self) -> &'static str {
        match self {
            Status::Online => "on",
            Status::Away => "afk",
            Status::DoNotDisturb => "dnd",
            Status::Offline => "off",
        }
    }

    pub fn from_short_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Status::ALL.into_iter().find(|s| s.short_name() == name)
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Online => "Online",
            Status::Away => "Away",
            Status::DoNotDisturb => "Do not Disturb",
            Status::Offline => "Offline",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A recognized service command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceCommand {
    Shutdown,
    ForceShutdownServer,
    StatusChange(Status),
}

impl ServiceCommand {
    pub const STATUS_CHANGE: i64 = 0;
    pub const SHUTDOWN: i64 = 1;
    pub const FORCE_SHUTDOWN_SERVER: i64 = 9;

    /// Code a client puts in `command` to request this.
    pub fn code(self) -> i64 {
        match self {
            ServiceCommand::Shutdown => Self::SHUTDOWN,
            ServiceCommand::ForceShutdownServer => Self::FORCE_SHUTDOWN_SERVER,
            ServiceCommand::StatusChange(status) => status.code(),
        }
    }
}

impl ServicePayload {
    pub fn for_command(command: ServiceCommand) -> Self {
        Self {
            command: Some(command.code()),
            ..Default::default()
        }
    }

    /// The normalized form the server relays for every status change.
    pub fn status_change(status: Status, note: Option<String>) -> Self {
        Self {
            command: Some(ServiceCommand::STATUS_CHANGE),
            action: Some(status.code()),
            note,
            ..Default::default()
        }
    }

    pub fn command(&self) -> Result<ServiceCommand, ChatError> {
        match self.command {
            None => Err(ChatError::ProtocolViolation(
                "service message without a command".to_string(),
            )),
            Some(ServiceCommand::SHUTDOWN) => Ok(ServiceCommand::Shutdown),
            Some(ServiceCommand::FORCE_SHUTDOWN_SERVER) => Ok(ServiceCommand::ForceShutdownServer),
            Some(ServiceCommand::STATUS_CHANGE) => self
                .action
                .and_then(Status::from_code)
                .map(ServiceCommand::StatusChange)
                .ok_or_else(|| {
                    ChatError::ProtocolViolation(format!(
                        "status change with invalid status {:?}",
                        self.action
                    ))
                }),
            Some(code) => Status::from_code(code)
                .map(ServiceCommand::StatusChange)
                .ok_or_else(|| ChatError::ProtocolViolation(format!("unknown command {code}"))),
        }
    }
}

impl Message {
    pub fn new(sender: impl Into<String>, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            content,
        }
    }

    pub fn user(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(sender, Content::User { body: body.into() })
    }

    pub fn service(sender: impl Into<String>, payload: ServicePayload) -> Self {
        Self::new(sender, Content::Service(payload))
    }

    pub fn command(sender: impl Into<String>, command: ServiceCommand) -> Self {
        Self::service(sender, ServicePayload::for_command(command))
    }

    pub fn kind(&self) -> MessageKind {
        match self.content {
            Content::User { .. } => MessageKind::UserMessage,
            Content::Service(_) => MessageKind::ServiceMessage,
        }
    }
}
