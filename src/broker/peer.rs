//! Peer representation
//!
//! `Peer` is the server-side handle of one registered connection. It holds
//! the sending side of the per-peer outbound queue drained by that peer's
//! write loop, and the abort handle of its read loop. Dropping a `Peer`
//! closes the queue, which makes the write loop half-close the socket.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use uuid::Uuid;

pub type PeerId = String;

#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub addr: SocketAddr,
    pub sender: UnboundedSender<Bytes>,
    /// Last username this peer sent a message under.
    pub username: Option<String>,
    reader: Option<AbortHandle>,
}

impl Peer {
    pub fn new(addr: SocketAddr, sender: UnboundedSender<Bytes>) -> Self {
        Self {
            id: format!("peer-{}", Uuid::new_v4()),
            addr,
            sender,
            username: None,
            reader: None,
        }
    }

    pub fn with_reader(mut self, reader: AbortHandle) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Queues a frame for this peer. `false` once its write loop has ended.
    pub fn send(&self, frame: Bytes) -> bool {
        self.sender.send(frame).is_ok()
    }

    /// Closes both directions right away.
    pub fn close(self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }

    /// Closes the write side now and stops reading after `grace`, giving the
    /// remote end time to finish its own teardown.
    pub fn close_after(self, grace: Duration) {
        if let Some(reader) = self.reader {
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                reader.abort();
            });
        }
    }
}
