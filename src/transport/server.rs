//! TCP chat server
//!
//! This file implements the reactor of the broadcast server. Responsibilities:
//! - Accept TCP connections and register each one with the `Broker`
//! - Run one read loop per connection that only decodes frames and forwards
//!   them to the reactor, and one write loop that only drains the peer's
//!   outbound queue onto the socket
//! - Apply every event to the `Broker` from a single task, so the set of
//!   registered peers is only ever touched from here
//!
//! One loop iteration waits for the first of: a new connection, a frame or
//! disconnect from any peer, the housekeeping timeout, or the shutdown signal.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::broker::{Broker, Peer, PeerId};
use crate::config::ServerSettings;
use crate::transport::connection::{Connection, Received};
use crate::utils::ChatError;

/// Pause after a failed `accept` before polling the listener again.
pub(crate) const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Event sent by a read loop to the reactor.
#[derive(Debug)]
pub enum PeerEvent {
    Frame { id: PeerId, received: Received },
    Closed { id: PeerId, error: Option<ChatError> },
}

pub struct ChatServer {
    listener: TcpListener,
    broker: Broker,
    settings: ServerSettings,
    events_tx: UnboundedSender<PeerEvent>,
    events_rx: UnboundedReceiver<PeerEvent>,
}

impl ChatServer {
    /// Binds the listening socket described by `settings`.
    pub async fn bind(settings: ServerSettings) -> Result<Self, ChatError> {
        let addr = format!("{}:{}", settings.host, settings.port);
        let listener = TcpListener::bind(&addr).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            listener,
            broker: Broker::new(&settings),
            settings,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs until the process is stopped.
    pub async fn run(self) -> Result<(), ChatError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` completes, then closes every connection.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ChatError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let housekeeping = Duration::from_secs(self.settings.poll_timeout_secs.max(1));
        info!("Starting server. Listening to {}...", self.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(
                        "Stopping server. Closing {} connections...",
                        self.broker.peer_count()
                    );
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => {
                        warn!("Failed to accept connection: {e}");
                        // errors such as EMFILE persist; don't spin on them
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = tokio::time::sleep(housekeeping) => {
                    debug!("{} clients connected", self.broker.peer_count());
                }
            }
        }

        self.broker.close_all();
        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {addr}: {e}");
        }
        let max_frame_len = self.settings.max_frame_len;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

        let peer = Peer::new(addr, tx);
        let id = peer.id.clone();

        spawn(write_loop(
            id.clone(),
            Connection::new(write_half, max_frame_len),
            rx,
        ));
        let reader = spawn(read_loop(
            id,
            Connection::new(read_half, max_frame_len),
            self.events_tx.clone(),
        ));

        self.broker.register(peer.with_reader(reader.abort_handle()));
    }

    fn on_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Frame { id, received } => {
                let outcome = self.broker.handle(&id, received);
                debug!("Dispatched frame from {id}: {outcome:?}");
            }
            PeerEvent::Closed { id, error } => {
                self.broker.disconnect(&id, error.as_ref());
            }
        }
    }
}

/// Binds and runs a server with the given settings.
pub async fn start_chat_server(settings: ServerSettings) -> Result<(), ChatError> {
    ChatServer::bind(settings).await?.run().await
}

async fn read_loop(
    id: PeerId,
    mut conn: Connection<OwnedReadHalf>,
    events: UnboundedSender<PeerEvent>,
) {
    loop {
        let event = match conn.read().await {
            Ok(Received::Closed) => PeerEvent::Closed {
                id: id.clone(),
                error: None,
            },
            Ok(received) => PeerEvent::Frame {
                id: id.clone(),
                received,
            },
            Err(error) => PeerEvent::Closed {
                id: id.clone(),
                error: Some(error),
            },
        };

        let last = matches!(event, PeerEvent::Closed { .. });
        if events.send(event).is_err() || last {
            break;
        }
    }
    debug!("Read loop closed for {id}");
}

async fn write_loop(
    id: PeerId,
    mut conn: Connection<OwnedWriteHalf>,
    mut rx: UnboundedReceiver<Bytes>,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = conn.write_frame(&frame).await {
            warn!("Failed to send message to {id}: {e}");
            break;
        }
    }

    // queue closed: the peer was deregistered or its socket failed
    let _ = conn.close_write().await;
    debug!("Send loop closed for {id}");
}
