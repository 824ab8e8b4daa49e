use super::engine::{Broker, Dispatch, SERVER_NAME};
use super::peer::{Peer, PeerId};
use crate::config::ServerSettings;
use crate::protocol::codec::{self, encode};
use crate::protocol::message::{Content, Message, ServiceCommand, ServicePayload, Status};
use crate::transport::connection::Received;
use crate::utils::ChatError;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, UnboundedReceiver};

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn add_peer(broker: &mut Broker, port: u16) -> (PeerId, UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let peer = Peer::new(addr(port), tx);
    let id = peer.id.clone();
    broker.register(peer);
    (id, rx)
}

fn received(msg: &Message) -> Received {
    Received::Message {
        message: msg.clone(),
        frame: encode(msg).unwrap(),
    }
}

fn drain(rx: &mut UnboundedReceiver<Bytes>) -> Vec<Message> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        out.push(codec::decode_payload(codec::frame_payload(&frame)).unwrap());
    }
    out
}

#[test]
fn test_broker_new() {
    let broker = Broker::default();
    assert_eq!(broker.peer_count(), 0);
}

#[test]
fn test_register_announces_to_others_only() {
    let mut broker = Broker::default();
    let (_a, mut rx_a) = add_peer(&mut broker, 1000);
    assert!(drain(&mut rx_a).is_empty());

    let (b, mut rx_b) = add_peer(&mut broker, 1001);
    assert!(broker.contains(&b));
    assert_eq!(broker.peer_count(), 2);

    let seen_by_a = drain(&mut rx_a);
    assert_eq!(seen_by_a.len(), 1);
    assert_eq!(seen_by_a[0].sender, SERVER_NAME);
    assert_eq!(
        seen_by_a[0].content,
        Content::User {
            body: "[127.0.0.1, 1001] entered the chat room".to_string()
        }
    );
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn test_user_message_reaches_everyone_but_sender() {
    let mut broker = Broker::default();
    let mut peers: Vec<_> = (0..5).map(|i| add_peer(&mut broker, 2000 + i)).collect();
    for (_, rx) in peers.iter_mut() {
        drain(rx);
    }

    let msg = Message::user("alice", "hi");
    let sender = peers[2].0.clone();
    let outcome = broker.handle(&sender, received(&msg));
    assert_eq!(outcome, Dispatch::Relayed { delivered: 4 });

    for (id, rx) in peers.iter_mut() {
        let got = drain(rx);
        if *id == sender {
            assert!(got.is_empty());
        } else {
            assert_eq!(got, vec![msg.clone()]);
        }
    }
}

#[test]
fn test_shutdown_command_deregisters_without_broadcast() {
    let mut broker = Broker::default();
    let (a, mut rx_a) = add_peer(&mut broker, 3000);
    let (b, mut rx_b) = add_peer(&mut broker, 3001);
    drain(&mut rx_a);

    let msg = Message::command("bob", ServiceCommand::Shutdown);
    assert_eq!(broker.handle(&b, received(&msg)), Dispatch::Disconnected);
    assert!(!broker.contains(&b));
    assert!(broker.contains(&a));
    assert!(drain(&mut rx_a).is_empty());

    // the queue of the closed peer is gone
    assert!(matches!(
        rx_b.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));

    // its read side reporting EOF later changes nothing
    assert_eq!(broker.disconnect(&b, None), Dispatch::Dropped);
    assert!(drain(&mut rx_a).is_empty());
}

#[test]
fn test_status_change_is_normalized() {
    let mut broker = Broker::default();
    let (a, mut rx_a) = add_peer(&mut broker, 4000);
    let (b, mut rx_b) = add_peer(&mut broker, 4001);
    drain(&mut rx_a);

    // bare status code (6) instead of command 0 + action
    let msg = Message::service(
        "bob",
        ServicePayload {
            command: Some(Status::Away.code()),
            ..Default::default()
        },
    );
    let outcome = broker.handle(&b, received(&msg));
    assert_eq!(
        outcome,
        Dispatch::StatusRelayed {
            status: Status::Away,
            delivered: 1
        }
    );

    let got = drain(&mut rx_a);
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].sender, "bob");
    let Content::Service(svc) = &got[0].content else {
        panic!("expected a service message");
    };
    assert_eq!(svc.command, Some(ServiceCommand::STATUS_CHANGE));
    assert_eq!(svc.action, Some(Status::Away.code()));
    assert_eq!(
        svc.note.as_deref(),
        Some("bob has changed their status to Away")
    );
    assert!(drain(&mut rx_b).is_empty());
    assert!(broker.contains(&a));
}

#[test]
fn test_unknown_and_refused_commands_are_not_broadcast() {
    let mut broker = Broker::default();
    let (_a, mut rx_a) = add_peer(&mut broker, 5000);
    let (b, _rx_b) = add_peer(&mut broker, 5001);
    drain(&mut rx_a);

    let unknown = Message::service(
        "bob",
        ServicePayload {
            command: Some(42),
            ..Default::default()
        },
    );
    assert_eq!(broker.handle(&b, received(&unknown)), Dispatch::Dropped);

    let kill = Message::command("bob", ServiceCommand::ForceShutdownServer);
    assert_eq!(broker.handle(&b, received(&kill)), Dispatch::Refused);

    assert!(drain(&mut rx_a).is_empty());
    assert!(broker.contains(&b));
}

#[test]
fn test_malformed_frames_dropped_by_default() {
    let mut broker = Broker::default();
    let (_a, mut rx_a) = add_peer(&mut broker, 6000);
    let (b, _rx_b) = add_peer(&mut broker, 6001);
    drain(&mut rx_a);

    let invalid = Received::Invalid {
        error: ChatError::MalformedEnvelope("expected value".into()),
        frame: Bytes::from_static(b"\x00\x00\x00\x03abc"),
    };
    assert_eq!(broker.handle(&b, invalid), Dispatch::Dropped);
    assert!(drain(&mut rx_a).is_empty());
    assert!(broker.contains(&b));
}

#[test]
fn test_malformed_frames_rebroadcast_when_enabled() {
    let settings = ServerSettings {
        rebroadcast_malformed: true,
        ..Default::default()
    };
    let mut broker = Broker::new(&settings);
    let (_a, mut rx_a) = add_peer(&mut broker, 7000);
    let (b, _rx_b) = add_peer(&mut broker, 7001);
    while rx_a.try_recv().is_ok() {}

    let frame = Bytes::from_static(b"\x00\x00\x00\x03abc");
    let invalid = Received::Invalid {
        error: ChatError::MalformedEnvelope("expected value".into()),
        frame: frame.clone(),
    };
    assert_eq!(broker.handle(&b, invalid), Dispatch::Relayed { delivered: 1 });
    assert_eq!(rx_a.try_recv().unwrap(), frame);

    // incomplete envelopes are never relayed
    let incomplete = Received::Invalid {
        error: ChatError::IncompleteEnvelope("username"),
        frame,
    };
    assert_eq!(broker.handle(&b, incomplete), Dispatch::Dropped);
}

#[test]
fn test_departure_announced_with_offline_status() {
    let mut broker = Broker::default();
    let (_a, mut rx_a) = add_peer(&mut broker, 8000);
    let (b, _rx_b) = add_peer(&mut broker, 8001);
    broker.handle(&b, received(&Message::user("bob", "bye")));
    drain(&mut rx_a);

    let outcome = broker.handle(&b, Received::Closed);
    assert_eq!(outcome, Dispatch::Departed { delivered: 1 });
    assert!(!broker.contains(&b));

    let got = drain(&mut rx_a);
    assert_eq!(got.len(), 2);
    assert_eq!(
        got[0].content,
        Content::User {
            body: "Client [127.0.0.1, 8001] has gone offline".to_string()
        }
    );
    let Content::Service(svc) = &got[1].content else {
        panic!("expected a status change");
    };
    assert_eq!(got[1].sender, "bob");
    assert_eq!(
        svc.command().unwrap(),
        ServiceCommand::StatusChange(Status::Offline)
    );
}

#[test]
fn test_send_failure_drops_only_that_peer() {
    let mut broker = Broker::default();
    let (a, mut rx_a) = add_peer(&mut broker, 9000);
    let (b, rx_b) = add_peer(&mut broker, 9001);
    let (c, mut rx_c) = add_peer(&mut broker, 9002);
    drain(&mut rx_a);
    drain(&mut rx_c);

    // b's write loop is gone
    drop(rx_b);

    let outcome = broker.handle(&a, received(&Message::user("alice", "anyone?")));
    assert_eq!(outcome, Dispatch::Relayed { delivered: 1 });
    assert!(!broker.contains(&b));
    assert!(broker.contains(&c));
    assert_eq!(drain(&mut rx_c).len(), 1);
}

#[test]
fn test_frame_from_unregistered_peer_is_ignored() {
    let mut broker = Broker::default();
    let (_a, mut rx_a) = add_peer(&mut broker, 9100);
    let outcome = broker.handle(&"peer-unknown".to_string(), received(&Message::user("x", "y")));
    assert_eq!(outcome, Dispatch::Dropped);
    assert!(drain(&mut rx_a).is_empty());
}

#[test]
fn test_close_all() {
    let mut broker = Broker::default();
    let (_a, mut rx_a) = add_peer(&mut broker, 9200);
    let (_b, _rx_b) = add_peer(&mut broker, 9201);
    drain(&mut rx_a);

    broker.close_all();
    assert_eq!(broker.peer_count(), 0);
    assert!(matches!(
        rx_a.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
}
