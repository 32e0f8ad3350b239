//! Turns a raw `TcpStream` into a framed send/receive pair, and spawns the
//! reader tasks that decode frames off the receive half into `Event`s.

use std::net::SocketAddr;
use std::path::PathBuf;

use common::wire::{AdHocMessage, BoxedRecvStream, BoxedSendStream, RoutedMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::event::Event;

/// Bytes read per chunk while streaming a file payload to disk.
const TRANSFER_BUFFER_SIZE: usize = 64 * 1024;

pub fn split(stream: TcpStream) -> (BoxedSendStream, BoxedRecvStream) {
    let (read_half, write_half) = stream.into_split();
    (
        BoxedSendStream::new(Box::new(write_half)),
        BoxedRecvStream::new(Box::new(read_half)),
    )
}

pub async fn dial(addr: SocketAddr) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// Decodes `RoutedMessage` frames off a neighbor connection until it closes.
/// A decode error drops just that frame (spec.md §7: "not-done returning" is
/// not fatal to the connection).
pub fn spawn_neighbor_reader(
    peer_id: u32,
    mut recv: BoxedRecvStream,
    tx: mpsc::Sender<Event>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match recv.recv::<RoutedMessage>().await {
                Ok(Some(msg)) => {
                    if tx.send(Event::Routed { neighbor_id: peer_id, msg }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(Event::NeighborDisconnected { neighbor_id: peer_id }).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(peer_id, error = %e, "dropping malformed routed frame");
                }
            }
        }
    })
}

/// Decodes `AdHocMessage` frames off an ad-hoc connection. When a
/// `NotifyStartingTransfer` arrives, streams the declared payload straight
/// to a file in `base_dir` before resuming the read loop (the event carries
/// `TransferFinished` either way so the core loop can retire the slot). When
/// a `ConnectAsNeighbor` arrives, this reader retires itself and hands its
/// receive half back via `PromoteToNeighbor` instead of forwarding the
/// message as an ordinary event and continuing to decode `AdHocMessage`
/// frames — the connection is about to start speaking `RoutedMessage`.
pub fn spawn_adhoc_reader(
    adhoc_id: u64,
    mut recv: BoxedRecvStream,
    tx: mpsc::Sender<Event>,
    base_dir: PathBuf,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match recv.recv::<AdHocMessage>().await {
                Ok(Some(AdHocMessage::ConnectAsNeighbor { sender_id })) => {
                    let _ = tx.send(Event::PromoteToNeighbor { adhoc_id, sender_id, recv }).await;
                    return;
                }
                Ok(Some(AdHocMessage::NotifyStartingTransfer { filename, size, origin, version, ttr, .. })) => {
                    let outcome = receive_file(&mut recv, &base_dir, &filename, size as u64).await;
                    let _ = tx
                        .send(Event::TransferFinished {
                            adhoc_id,
                            filename,
                            origin,
                            version,
                            ttr,
                            outcome: outcome.map_err(|e| e.to_string()),
                        })
                        .await;
                    return;
                }
                Ok(Some(msg)) => {
                    if tx.send(Event::AdHoc { adhoc_id, msg }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    let _ = tx.send(Event::AdHocDisconnected { adhoc_id }).await;
                    return;
                }
                Err(e) => {
                    tracing::warn!(adhoc_id, error = %e, "dropping malformed ad-hoc frame");
                }
            }
        }
    })
}

async fn receive_file(
    recv: &mut BoxedRecvStream,
    base_dir: &std::path::Path,
    filename: &str,
    size: u64,
) -> anyhow::Result<u64> {
    use anyhow::Context;
    let path = base_dir.join(filename);
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    recv.copy_exact_to(&mut file, size, TRANSFER_BUFFER_SIZE)
        .await
        .with_context(|| format!("receiving {filename}"))
}
