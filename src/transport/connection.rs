//! Framed connection
//!
//! `Connection` wraps one byte stream (a `TcpStream`, or one half of a split
//! stream) together with its read buffer. Reads go through an internal
//! `BytesMut` so that `read` is cancellation safe: a `read` future dropped
//! inside `tokio::select!` loses no bytes, the next call picks up where the
//! previous one stopped.

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::codec;
use crate::protocol::message::Message;
use crate::utils::ChatError;

const READ_BUFFER: usize = 4096;

/// Lifecycle of a `Connection`. A connection wraps an already established
/// stream, so it starts `Open`; it never goes back to `Open` once closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Outcome of reading one frame.
#[derive(Debug)]
pub enum Received {
    /// A decoded message, with the exact frame it came from.
    Message { message: Message, frame: Bytes },
    /// A complete frame whose payload did not decode. The connection is
    /// still in sync and can keep being read.
    Invalid { error: ChatError, frame: Bytes },
    /// The peer closed the stream cleanly, between two frames.
    Closed,
}

#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    state: ConnectionState,
    max_frame_len: usize,
}

impl<S> Connection<S> {
    /// Wraps an established stream.
    ///
    /// Frames whose length prefix exceeds `max_frame_len` make `read` fail
    /// with `FrameTooLarge`.
    pub fn new(stream: S, max_frame_len: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(READ_BUFFER),
            state: ConnectionState::Open,
            max_frame_len,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `true` until the write side is half-closed or the stream ends.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Marks the connection closed without touching the stream.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Reads the next frame.
    ///
    /// Frame-level decode errors come back as `Received::Invalid`. `Err` means
    /// the connection is unusable: transport failure, end of stream in the
    /// middle of a frame (`ConnectionClosed`), or an oversized length prefix.
    pub async fn read(&mut self) -> Result<Received, ChatError> {
        loop {
            if let Some(frame) = codec::parse_frame(&mut self.buffer, self.max_frame_len)? {
                return match codec::decode_payload(codec::frame_payload(&frame)) {
                    Ok(message) => Ok(Received::Message { message, frame }),
                    Err(error) if error.is_recoverable() => Ok(Received::Invalid { error, frame }),
                    Err(error) => Err(error),
                };
            }

            if self.state == ConnectionState::Closed {
                return Ok(Received::Closed);
            }

            let n = self.stream.read_buf(&mut self.buffer).await.inspect_err(|_| {
                self.state = ConnectionState::Closed;
            })?;

            if n == 0 {
                self.state = ConnectionState::Closed;
                if self.buffer.is_empty() {
                    return Ok(Received::Closed);
                }
                return Err(ChatError::ConnectionClosed);
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    /// Encodes `msg` and writes the resulting frame.
    ///
    /// Fails with `NotConnected` once the write side has been closed.
    pub async fn write_message(&mut self, msg: &Message) -> Result<(), ChatError> {
        let frame = codec::encode(msg)?;
        self.write_frame(&frame).await
    }

    /// Writes an already encoded frame as is.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChatError> {
        if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
            return Err(ChatError::NotConnected);
        }
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Half-closes the write side. Reading stays possible until the peer
    /// closes its side.
    pub async fn close_write(&mut self) -> Result<(), ChatError> {
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
        }
        self.stream.shutdown().await?;
        Ok(())
    }
}
