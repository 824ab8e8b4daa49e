//! Broker engine
//!
//! This module contains the broadcast registry and the protocol dispatch
//! rules of the chat server:
//! - registering peers and announcing arrivals
//! - relaying user messages to every peer except the sender
//! - normalizing and relaying status changes
//! - honouring per-connection shutdown requests, refusing server shutdown
//! - announcing departures and dropping peers whose write loop died
//!
//! Concurrency and usage notes:
//! - The broker is owned by the server's reactor task and is never shared.
//!   Every register/deregister happens on that task, so no lock is needed.
//! - Broadcasting never removes entries while iterating the peer map: peers
//!   whose queue is closed are collected and deregistered after the fan-out.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::broker::peer::{Peer, PeerId};
use crate::config::ServerSettings;
use crate::protocol::codec;
use crate::protocol::message::{Content, Message, ServiceCommand, ServicePayload, Status};
use crate::transport::connection::Received;
use crate::utils::ChatError;

/// Name used as `sender` on messages the server makes up itself.
pub const SERVER_NAME: &str = "Server";

/// What the broker did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Frame relayed unchanged to `delivered` peers.
    Relayed { delivered: usize },
    /// Normalized status change relayed to `delivered` peers.
    StatusRelayed { status: Status, delivered: usize },
    /// The sender asked to close its connection and was deregistered.
    Disconnected,
    /// The sender asked for something the server does not allow.
    Refused,
    /// Nothing was sent.
    Dropped,
    /// The sender went away; departure notices reached `delivered` peers.
    Departed { delivered: usize },
}

/// Registry of the connected peers, keyed by `PeerId`.
///
/// Owned by the server reactor; nothing outside it can reach the peer map.
#[derive(Debug)]
pub struct Broker {
    peers: HashMap<PeerId, Peer>,
    rebroadcast_malformed: bool,
    shutdown_grace: Duration,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(&ServerSettings::default())
    }
}

impl Broker {
    /// Creates an empty broker.
    ///
    /// `settings` decides whether malformed frames are relayed and how long a
    /// peer that asked to disconnect keeps its read side.
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            peers: HashMap::new(),
            rebroadcast_malformed: settings.rebroadcast_malformed,
            shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
        }
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Whether `id` is still registered.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Registers a new peer and tells everybody else it arrived.
    /// Returns the number of peers the announcement reached.
    pub fn register(&mut self, peer: Peer) -> usize {
        let id = peer.id.clone();
        let addr = peer.addr;
        self.peers.insert(id.clone(), peer);
        info!("Client {addr} connected ({id})");

        let notice = Message::user(
            SERVER_NAME,
            format!("[{}, {}] entered the chat room", addr.ip(), addr.port()),
        );
        self.broadcast_message(Some(&id), &notice)
    }

    /// Removes a peer from the registry without closing it.
    pub fn deregister(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    /// Queues `frame` for every registered peer except `from`.
    ///
    /// A peer whose queue is closed is deregistered after the loop; the
    /// remaining peers still get the frame. Returns the delivery count.
    pub fn broadcast(&mut self, from: Option<&PeerId>, frame: &Bytes) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for (id, peer) in &self.peers {
            if Some(id) == from {
                continue;
            }
            if peer.send(frame.clone()) {
                delivered += 1;
            } else {
                failed.push(id.clone());
            }
        }

        for id in failed {
            if let Some(peer) = self.deregister(&id) {
                warn!("Failed to send to {} ({id}); dropping it", peer.addr);
                peer.close();
            }
        }

        delivered
    }

    fn broadcast_message(&mut self, from: Option<&PeerId>, msg: &Message) -> usize {
        match codec::encode(msg) {
            Ok(frame) => self.broadcast(from, &frame),
            Err(e) => {
                warn!("Failed to encode message: {e}");
                0
            }
        }
    }

    fn relay_status(&mut self, from: Option<&PeerId>, user: &str, status: Status) -> usize {
        let notice = Message::service(
            user,
            ServicePayload::status_change(
                status,
                Some(format!("{user} has changed their status to {status}")),
            ),
        );
        self.broadcast_message(from, &notice)
    }

    /// Applies the protocol rules to one frame read from `from`.
    pub fn handle(&mut self, from: &PeerId, received: Received) -> Dispatch {
        let Some(peer) = self.peers.get_mut(from) else {
            debug!("Ignoring frame from unregistered peer {from}");
            return Dispatch::Dropped;
        };
        let addr = peer.addr;

        match received {
            Received::Message { message, frame } => {
                peer.username = Some(message.sender.clone());
                match &message.content {
                    Content::User { .. } => {
                        info!("Received/Broadcasting user message from {addr}");
                        let delivered = self.broadcast(Some(from), &frame);
                        Dispatch::Relayed { delivered }
                    }
                    Content::Service(svc) => match svc.command() {
                        Ok(ServiceCommand::Shutdown) => {
                            info!("Shutdown client command received; disconnecting {addr}");
                            if let Some(peer) = self.deregister(from) {
                                peer.close_after(self.shutdown_grace);
                            }
                            Dispatch::Disconnected
                        }
                        Ok(ServiceCommand::StatusChange(status)) => {
                            info!("{} ({addr}) changed status to {status}", message.sender);
                            let delivered = self.relay_status(Some(from), &message.sender, status);
                            Dispatch::StatusRelayed { status, delivered }
                        }
                        Ok(ServiceCommand::ForceShutdownServer) => {
                            warn!("Refusing server shutdown requested by {addr}");
                            Dispatch::Refused
                        }
                        Err(e) => {
                            warn!("Ignoring service message from {addr}: {e}");
                            Dispatch::Dropped
                        }
                    },
                }
            }
            Received::Invalid { error, frame } => {
                warn!("Received invalid message from {addr}: {error}");
                if self.rebroadcast_malformed && matches!(error, ChatError::MalformedEnvelope(_)) {
                    let delivered = self.broadcast(Some(from), &frame);
                    Dispatch::Relayed { delivered }
                } else {
                    Dispatch::Dropped
                }
            }
            Received::Closed => self.disconnect(from, None),
        }
    }

    /// Deregisters a peer whose connection ended and tells the others.
    pub fn disconnect(&mut self, from: &PeerId, error: Option<&ChatError>) -> Dispatch {
        let Some(peer) = self.deregister(from) else {
            debug!("Connection {from} ended after deregistration");
            return Dispatch::Dropped;
        };
        let addr = peer.addr;
        match error {
            Some(e) => info!("Client {addr} has been disconnected: {e}"),
            None => info!("Client {addr} has been disconnected"),
        }

        let notice = Message::user(
            SERVER_NAME,
            format!("Client [{}, {}] has gone offline", addr.ip(), addr.port()),
        );
        let delivered = self.broadcast_message(None, &notice);
        if let Some(username) = &peer.username {
            self.relay_status(None, username, Status::Offline);
        }
        peer.close();

        Dispatch::Departed { delivered }
    }

    /// Deregisters and closes every peer.
    pub fn close_all(&mut self) {
        for (_, peer) in self.peers.drain() {
            peer.close();
        }
    }
}
