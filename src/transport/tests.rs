use super::connection::{Connection, ConnectionState, Received};
use crate::protocol::codec::encode;
use crate::protocol::message::{Message, ServiceCommand};
use crate::utils::ChatError;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const MAX: usize = 64 * 1024;

fn frame_of(payload: &[u8]) -> Vec<u8> {
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

#[tokio::test]
async fn test_reads_back_to_back_frames_from_one_chunk() {
    let first = Message::user("alice", "one");
    let second = Message::command("alice", ServiceCommand::Shutdown);
    let mut bytes = encode(&first).unwrap().to_vec();
    bytes.extend_from_slice(&encode(&second).unwrap());

    let mock = tokio_test::io::Builder::new().read(&bytes).build();
    let mut conn = Connection::new(mock, MAX);

    match conn.read().await.unwrap() {
        Received::Message { message, .. } => assert_eq!(message, first),
        other => panic!("unexpected {other:?}"),
    }
    match conn.read().await.unwrap() {
        Received::Message { message, .. } => assert_eq!(message, second),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(conn.read().await.unwrap(), Received::Closed));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_invalid_frame_keeps_stream_in_sync() {
    let good = Message::user("bob", "still here");
    let bad = frame_of(b"{this is not json");
    let good_frame = encode(&good).unwrap();

    let mock = tokio_test::io::Builder::new()
        .read(&bad[..6])
        .read(&bad[6..])
        .read(&good_frame)
        .build();
    let mut conn = Connection::new(mock, MAX);

    match conn.read().await.unwrap() {
        Received::Invalid { error, frame } => {
            assert!(matches!(error, ChatError::MalformedEnvelope(_)));
            assert_eq!(&frame[..], &bad[..]);
        }
        other => panic!("unexpected {other:?}"),
    }
    match conn.read().await.unwrap() {
        Received::Message { message, frame } => {
            assert_eq!(message, good);
            assert_eq!(frame, good_frame);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(conn.is_open());
}

#[tokio::test]
async fn test_eof_inside_frame_is_connection_closed() {
    let frame = encode(&Message::user("alice", "truncated")).unwrap();
    let mock = tokio_test::io::Builder::new()
        .read(&frame[..frame.len() - 1])
        .build();
    let mut conn = Connection::new(mock, MAX);

    let err = conn.read().await.unwrap_err();
    assert!(matches!(err, ChatError::ConnectionClosed));
    assert_eq!(conn.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() {
    let frame = encode(&Message::user("alice", "x".repeat(100))).unwrap();
    let mock = tokio_test::io::Builder::new().read(&frame).build();
    let mut conn = Connection::new(mock, 16);

    let err = conn.read().await.unwrap_err();
    assert!(matches!(err, ChatError::FrameTooLarge { max: 16, .. }));
}

#[tokio::test]
async fn test_write_then_read_over_duplex() {
    let (client, server) = tokio::io::duplex(64);
    let mut writer = Connection::new(client, MAX);
    let mut reader = Connection::new(server, MAX);

    let msg = Message::user("carol", "a message longer than the duplex buffer of 64 bytes");
    let (written, read) = tokio::join!(writer.write_message(&msg), reader.read());
    written.unwrap();
    match read.unwrap() {
        Received::Message { message, .. } => assert_eq!(message, msg),
        other => panic!("unexpected {other:?}"),
    }

    writer.close_write().await.unwrap();
    assert_eq!(writer.state(), ConnectionState::Closing);
    assert!(matches!(reader.read().await.unwrap(), Received::Closed));

    let err = writer.write_message(&msg).await.unwrap_err();
    assert!(matches!(err, ChatError::NotConnected));
}

#[tokio::test]
async fn test_read_is_cancellation_safe() {
    let (mut raw, server) = tokio::io::duplex(1024);
    let mut conn = Connection::new(server, MAX);

    let msg = Message::user("dave", "arrives in two parts");
    let frame = encode(&msg).unwrap();
    raw.write_all(&frame[..5]).await.unwrap();

    // the read is abandoned midway through the frame
    let timed_out = tokio::time::timeout(Duration::from_millis(20), conn.read()).await;
    assert!(timed_out.is_err());

    raw.write_all(&frame[5..]).await.unwrap();
    match conn.read().await.unwrap() {
        Received::Message { message, .. } => assert_eq!(message, msg),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_connection_starts_open() {
    let (stream, _other) = tokio::io::duplex(64);
    let mut conn = Connection::new(stream, MAX);
    assert_eq!(conn.state(), ConnectionState::Open);
    assert!(conn.is_open());
    assert_eq!(conn.state().to_string(), "open");

    conn.mark_closed();
    assert!(!conn.is_open());
    assert_eq!(conn.state().to_string(), "closed");
}

#[test]
fn test_accept_retry_delay_is_short_but_nonzero() {
    use super::server::ACCEPT_RETRY_DELAY;
    use crate::config::ServerSettings;

    // the reactor does not watch for shutdown while it waits
    assert!(ACCEPT_RETRY_DELAY > Duration::ZERO);
    let grace = Duration::from_millis(ServerSettings::default().shutdown_grace_ms);
    assert!(ACCEPT_RETRY_DELAY < grace);
}
