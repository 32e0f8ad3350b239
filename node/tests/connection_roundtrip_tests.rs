//! End-to-end tests of the framed connection layer over real TCP sockets:
//! a listener accepts, both sides speak the wire protocol, and the reader
//! tasks turn received frames into the expected `Event`s.

use common::wire::{AdHocMessage, Header, RoutedKind, RoutedMessage};
use node::event::Event;
use tokio::net::TcpListener;

#[tokio::test]
async fn routed_message_round_trips_into_an_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client_stream = node::connection::dial(addr).await.unwrap();
    let server_stream = accept.await.unwrap();

    let (mut client_send, _client_recv) = node::connection::split(client_stream);
    let (_server_send, server_recv) = node::connection::split(server_stream);

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    node::connection::spawn_neighbor_reader(7, server_recv, tx);

    let msg = RoutedMessage {
        header: Header { dest_id: 1, source_id: 2, seq: 0, ttl: 10 },
        kind: RoutedKind::QueryFileLocation { filename: "report.txt".to_string() },
    };
    client_send.send(&msg).await.unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::Routed { neighbor_id, msg: got } => {
            assert_eq!(neighbor_id, 7);
            assert_eq!(got.header.source_id, 2);
            match got.kind {
                RoutedKind::QueryFileLocation { filename } => assert_eq!(filename, "report.txt"),
                other => panic!("unexpected kind: {other:?}"),
            }
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn neighbor_disconnect_is_reported_once_sender_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client_stream = node::connection::dial(addr).await.unwrap();
    let server_stream = accept.await.unwrap();

    let (client_send, _client_recv) = node::connection::split(client_stream);
    let (_server_send, server_recv) = node::connection::split(server_stream);

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    node::connection::spawn_neighbor_reader(3, server_recv, tx);

    drop(client_send);

    let event = rx.recv().await.unwrap();
    assert!(matches!(event, Event::NeighborDisconnected { neighbor_id: 3 }));
}

#[tokio::test]
async fn file_transfer_streams_payload_to_disk_and_reports_metadata() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let base_dir = dir.path().to_path_buf();

    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client_stream = node::connection::dial(addr).await.unwrap();
    let server_stream = accept.await.unwrap();

    let (mut client_send, _client_recv) = node::connection::split(client_stream);
    let (_server_send, server_recv) = node::connection::split(server_stream);

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    node::connection::spawn_adhoc_reader(1, server_recv, tx, base_dir.clone());

    let payload = b"hello from the other node";
    let notify = AdHocMessage::NotifyStartingTransfer {
        filename: "greeting.txt".to_string(),
        size: payload.len() as u32,
        origin: 2,
        version: 4,
        ttr: 30,
        last_valid: 0,
    };
    let mut cursor = std::io::Cursor::new(payload.to_vec());
    client_send.send_with_payload(&notify, &mut cursor).await.unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::TransferFinished { adhoc_id, filename, origin, version, ttr, outcome } => {
            assert_eq!(adhoc_id, 1);
            assert_eq!(filename, "greeting.txt");
            assert_eq!(origin, 2);
            assert_eq!(version, 4);
            assert_eq!(ttr, 30);
            assert_eq!(outcome.unwrap(), payload.len() as u64);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let written = std::fs::read(base_dir.join("greeting.txt")).unwrap();
    assert_eq!(written, payload);
}

#[tokio::test]
async fn promoted_connection_decodes_routed_frames_not_adhoc_ones() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client_stream = node::connection::dial(addr).await.unwrap();
    let server_stream = accept.await.unwrap();

    let (mut client_send, _client_recv) = node::connection::split(client_stream);
    let (_server_send, server_recv) = node::connection::split(server_stream);

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let adhoc_id = 0u64;
    node::connection::spawn_adhoc_reader(adhoc_id, server_recv, tx.clone(), dir.path().to_path_buf());

    client_send
        .send(&AdHocMessage::ConnectAsNeighbor { sender_id: 9 })
        .await
        .unwrap();

    let recv = match rx.recv().await.unwrap() {
        Event::PromoteToNeighbor { adhoc_id: got_id, sender_id, recv } => {
            assert_eq!(got_id, adhoc_id);
            assert_eq!(sender_id, 9);
            recv
        }
        other => panic!("unexpected event: {other:?}"),
    };

    // Same stream, re-keyed onto a neighbor reader: it must now decode
    // RoutedMessage frames instead of dropping them as malformed AdHocMessage
    // ones.
    node::connection::spawn_neighbor_reader(9, recv, tx);

    let routed = RoutedMessage {
        header: Header { dest_id: 0, source_id: 9, seq: 1, ttl: 5 },
        kind: RoutedKind::TestQuery,
    };
    client_send.send(&routed).await.unwrap();

    let event = rx.recv().await.unwrap();
    match event {
        Event::Routed { neighbor_id, msg } => {
            assert_eq!(neighbor_id, 9);
            assert_eq!(msg.kind, RoutedKind::TestQuery);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
