//! Envelope codec
//!
//! Frame layout: a 4-byte big-endian length `L`, then `L` bytes of UTF-8 JSON:
//!
//! ```text
//! {"uuid": "...", "username": "...", "type": "usrmsg" | "svcmsg",
//!  "body": "..." | 1, "command": 1 | null, "action": null,
//!  "primarykey": null, "secondarykey": null}
//! ```
//!
//! Unlike the protocol it interoperates with, the codec caps `L`
//! (`DEFAULT_MAX_FRAME_LEN` unless configured). A peer announcing a larger
//! frame cannot be resynchronised, so that error is fatal for its connection.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::protocol::message::{Content, Message, MessageKind, ServicePayload};
use crate::utils::ChatError;

pub const LEN_PREFIX: usize = 4;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    uuid: Option<String>,
    username: Option<String>,
    #[serde(rename = "type")]
    kind: Option<Value>,
    body: Option<Value>,
    command: Option<i64>,
    action: Option<i64>,
    primarykey: Option<i64>,
    secondarykey: Option<i64>,
}

impl From<&Message> for Envelope {
    fn from(msg: &Message) -> Self {
        let mut envelope = Envelope {
            uuid: Some(msg.id.clone()),
            username: Some(msg.sender.clone()),
            kind: Some(Value::from(msg.kind().as_wire())),
            body: None,
            command: None,
            action: None,
            primarykey: None,
            secondarykey: None,
        };
        match &msg.content {
            Content::User { body } => envelope.body = Some(Value::from(body.as_str())),
            Content::Service(svc) => {
                // older peers read the command code from `body`
                envelope.body = match (&svc.note, svc.command) {
                    (Some(note), _) => Some(Value::from(note.as_str())),
                    (None, Some(code)) => Some(Value::from(code)),
                    (None, None) => None,
                };
                envelope.command = svc.command;
                envelope.action = svc.action;
                envelope.primarykey = svc.primary_key;
                envelope.secondarykey = svc.secondary_key;
            }
        }
        envelope
    }
}

/// Encodes a message into a complete frame, length prefix included.
pub fn encode(msg: &Message) -> Result<Bytes, ChatError> {
    let payload = serde_json::to_vec(&Envelope::from(msg))
        .map_err(|e| ChatError::MalformedEnvelope(e.to_string()))?;
    let len = u32::try_from(payload.len()).map_err(|_| ChatError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    frame.put_u32(len);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Decodes the JSON payload of one frame (without its length prefix).
pub fn decode_payload(payload: &[u8]) -> Result<Message, ChatError> {
    let envelope: Envelope = serde_json::from_slice(payload)
        .map_err(|e| ChatError::MalformedEnvelope(e.to_string()))?;

    let sender = envelope
        .username
        .ok_or(ChatError::IncompleteEnvelope("username"))?;
    let kind = match envelope.kind {
        None => return Err(ChatError::IncompleteEnvelope("type")),
        Some(Value::String(s)) => MessageKind::from_wire(&s)
            .ok_or_else(|| ChatError::ProtocolViolation(format!("unknown message type `{s}`")))?,
        Some(other) => {
            return Err(ChatError::ProtocolViolation(format!(
                "unknown message type {other}"
            )));
        }
    };

    let content = match kind {
        MessageKind::UserMessage => {
            let body = match envelope.body {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => return Err(ChatError::IncompleteEnvelope("body")),
            };
            Content::User { body }
        }
        MessageKind::ServiceMessage => {
            let (note, legacy_command) = match envelope.body {
                Some(Value::String(s)) => (Some(s), None),
                Some(Value::Number(n)) => (None, n.as_i64()),
                Some(other) => (Some(other.to_string()), None),
                None => (None, None),
            };
            Content::Service(ServicePayload {
                command: envelope.command.or(legacy_command),
                action: envelope.action,
                primary_key: envelope.primarykey,
                secondary_key: envelope.secondarykey,
                note,
            })
        }
    };

    Ok(Message {
        id: envelope.uuid.unwrap_or_else(|| Uuid::new_v4().to_string()),
        sender,
        content,
    })
}

/// Splits one complete frame off the front of `buf`, prefix included.
///
/// Returns `Ok(None)` while more bytes are needed; nothing is consumed in
/// that case.
pub fn parse_frame(buf: &mut BytesMut, max_frame_len: usize) -> Result<Option<Bytes>, ChatError> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > max_frame_len {
        return Err(ChatError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }
    if buf.len() < LEN_PREFIX + len {
        buf.reserve(LEN_PREFIX + len - buf.len());
        return Ok(None);
    }
    Ok(Some(buf.split_to(LEN_PREFIX + len).freeze()))
}

/// Payload slice of a frame produced by `encode` or `parse_frame`.
pub fn frame_payload(frame: &[u8]) -> &[u8] {
    &frame[LEN_PREFIX.min(frame.len())..]
}

/// Reads exactly one frame from `reader` and decodes it.
///
/// Partial reads are assembled transparently. End of stream anywhere inside
/// the frame, including before the first prefix byte, is `ConnectionClosed`.
pub async fn decode<R>(reader: &mut R, max_frame_len: usize) -> Result<Message, ChatError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    read_exact_or_closed(reader, &mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame_len {
        return Err(ChatError::FrameTooLarge {
            len,
            max: max_frame_len,
        });
    }

    let mut payload = vec![0u8; len];
    read_exact_or_closed(reader, &mut payload).await?;
    decode_payload(&payload)
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(ChatError::ConnectionClosed),
        Err(e) => Err(ChatError::Transport(e)),
    }
}
