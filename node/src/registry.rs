//! Connection registry: the neighbor table and the ad-hoc connection list,
//! and the promotion operation that resolves simultaneous-open races.

use std::collections::HashMap;
use std::net::SocketAddr;

use common::wire::{BoxedRecvStream, BoxedSendStream};
use tokio::sync::mpsc;

use crate::connection;
use crate::event::Event;

/// A live connection slot. Owns the send half and the reader task decoding
/// frames off the receive half into the core loop's event channel; closing
/// a slot aborts that task (idempotent: abort on an already-finished task
/// is a no-op) and drops the send half.
pub struct Connection {
    pub remote_addr: SocketAddr,
    pub send: BoxedSendStream,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Connection {
    pub fn new(
        remote_addr: SocketAddr,
        send: BoxedSendStream,
        reader_task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            remote_addr,
            send,
            reader_task,
        }
    }

    pub async fn close(mut self) {
        self.reader_task.abort();
        let _ = self.send.close().await;
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    /// Fixed by configuration; a slot starts empty if the outbound connect
    /// failed or hasn't completed yet.
    neighbors: HashMap<u32, Connection>,
    adhoc: HashMap<u64, Connection>,
    next_adhoc_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn neighbor_ids(&self) -> Vec<u32> {
        self.neighbors.keys().copied().collect()
    }

    pub fn neighbor_mut(&mut self, id: u32) -> Option<&mut Connection> {
        self.neighbors.get_mut(&id)
    }

    pub fn has_neighbor(&self, id: u32) -> bool {
        self.neighbors.contains_key(&id)
    }

    /// Installs a freshly-connected outbound neighbor socket. Does not
    /// replace an existing occupant; call [`promote`] for that.
    pub fn insert_neighbor(&mut self, id: u32, conn: Connection) {
        self.neighbors.insert(id, conn);
    }

    /// Closes and removes the neighbor slot for `id`, if present
    /// (NOTIFY_PEER_DISCONNECT handling, spec.md §4.4/§9).
    pub async fn close_neighbor(&mut self, id: u32) {
        if let Some(conn) = self.neighbors.remove(&id) {
            conn.close().await;
        }
    }

    pub fn insert_adhoc(&mut self, conn: Connection) -> u64 {
        let id = self.reserve_adhoc_id();
        self.adhoc.insert(id, conn);
        id
    }

    /// Allocates an ad-hoc slot id before the connection exists, so its
    /// reader task (which needs the id to tag its events) can be spawned
    /// first and then handed to [`insert_adhoc_with_id`].
    pub fn reserve_adhoc_id(&mut self) -> u64 {
        let id = self.next_adhoc_id;
        self.next_adhoc_id += 1;
        id
    }

    pub fn insert_adhoc_with_id(&mut self, id: u64, conn: Connection) {
        self.adhoc.insert(id, conn);
    }

    pub fn adhoc_mut(&mut self, id: u64) -> Option<&mut Connection> {
        self.adhoc.get_mut(&id)
    }

    pub async fn remove_adhoc(&mut self, id: u64) {
        if let Some(conn) = self.adhoc.remove(&id) {
            conn.close().await;
        }
    }

    /// Promotes an ad-hoc connection to neighbor slot `id`: the prior
    /// occupant of that slot, if any, is closed and replaced (spec.md
    /// §4.2). The ad-hoc connection's send half and address carry over
    /// unchanged, but its reader task does not — that task was decoding
    /// `AdHocMessage` frames and has already retired itself, handing back
    /// `recv` (see [`crate::event::Event::PromoteToNeighbor`]). Promotion
    /// aborts the old reader task (a no-op, since it has already returned)
    /// and spawns a fresh one decoding `RoutedMessage` frames off the same
    /// stream.
    pub async fn promote(
        &mut self,
        adhoc_id: u64,
        neighbor_id: u32,
        recv: BoxedRecvStream,
        event_tx: mpsc::Sender<Event>,
    ) -> anyhow::Result<()> {
        let mut conn = self
            .adhoc
            .remove(&adhoc_id)
            .ok_or_else(|| anyhow::anyhow!("no such ad-hoc connection {adhoc_id} to promote"))?;
        conn.reader_task.abort();
        conn.reader_task = connection::spawn_neighbor_reader(neighbor_id, recv, event_tx);
        if let Some(previous) = self.neighbors.insert(neighbor_id, conn) {
            previous.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_connection(addr: &str) -> Connection {
        // A task we can abort immediately stands in for a real reader task
        // in these registry-only tests.
        let task = tokio::spawn(std::future::pending::<()>());
        let addr: SocketAddr = addr.parse().unwrap();
        // SendStream needs a real AsyncWrite; build one from a duplex pipe.
        let (a, _b) = tokio::io::duplex(64);
        let (_r, w) = tokio::io::split(a);
        Connection {
            remote_addr: addr,
            send: BoxedSendStream::new(Box::new(w)),
            reader_task: task,
        }
    }

    // A real AsyncRead for the recv half promotion hands to the new
    // neighbor reader; its other end is simply dropped, since these tests
    // only check the registry's bookkeeping, not frame decoding.
    fn stub_recv() -> BoxedRecvStream {
        let (a, _b) = tokio::io::duplex(64);
        let (r, _w) = tokio::io::split(a);
        BoxedRecvStream::new(Box::new(r))
    }

    #[tokio::test]
    async fn promote_replaces_and_closes_prior_occupant() {
        let mut registry = ConnectionRegistry::new();
        registry.insert_neighbor(1, stub_connection("127.0.0.1:9001"));
        let adhoc_id = registry.insert_adhoc(stub_connection("127.0.0.1:9002"));
        let (tx, _rx) = mpsc::channel(1);
        registry.promote(adhoc_id, 1, stub_recv(), tx).await.unwrap();
        assert!(registry.has_neighbor(1));
        assert_eq!(
            registry.neighbor_mut(1).unwrap().remote_addr,
            "127.0.0.1:9002".parse().unwrap()
        );
        assert!(registry.adhoc_mut(adhoc_id).is_none());
    }

    #[tokio::test]
    async fn promote_into_empty_slot_just_installs() {
        let mut registry = ConnectionRegistry::new();
        let adhoc_id = registry.insert_adhoc(stub_connection("127.0.0.1:9003"));
        let (tx, _rx) = mpsc::channel(1);
        registry.promote(adhoc_id, 7, stub_recv(), tx).await.unwrap();
        assert!(registry.has_neighbor(7));
    }

    #[tokio::test]
    async fn close_neighbor_removes_the_single_slot() {
        let mut registry = ConnectionRegistry::new();
        registry.insert_neighbor(1, stub_connection("127.0.0.1:9001"));
        registry.insert_neighbor(2, stub_connection("127.0.0.1:9002"));
        registry.close_neighbor(1).await;
        assert!(!registry.has_neighbor(1));
        assert!(registry.has_neighbor(2));
    }
}
