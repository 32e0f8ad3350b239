//! `NodeState`: every table spec.md §5 puts behind the single coarse lock,
//! owned exclusively by the core loop task (see SPEC_FULL.md §5.1), plus
//! the router, consistency engine and command-interface logic that
//! operate on it.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use common::config::{Config, NodeDescriptor};
use common::wire::{AdHocMessage, Header, RoutedKind, RoutedMessage};
use tokio::sync::mpsc;

use crate::commands::Command;
use crate::connection;
use crate::event::Event;
use crate::index::{ConsistencyMode, FileIndex};
use crate::log::QueryLog;
use crate::registry::{Connection, ConnectionRegistry};

pub struct NodeState {
    pub my_id: u32,
    pub mode: ConsistencyMode,
    directory: HashMap<u32, NodeDescriptor>,
    default_ttr: u32,
    base_dir: PathBuf,
    pub registry: ConnectionRegistry,
    log: QueryLog,
    index: FileIndex,
    pending_requests: HashSet<String>,
    pending_responses: u32,
    test_start: Option<Instant>,
    seq_counter: u32,
    pub time_to_exit: bool,
    event_tx: mpsc::Sender<Event>,
}

impl NodeState {
    pub fn new(
        my_id: u32,
        mode: ConsistencyMode,
        config: Config,
        base_dir: PathBuf,
        event_tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            my_id,
            mode,
            directory: config.directory,
            default_ttr: config.default_ttr,
            base_dir,
            registry: ConnectionRegistry::new(),
            log: QueryLog::new(),
            index: FileIndex::new(),
            pending_requests: HashSet::new(),
            pending_responses: 0,
            test_start: None,
            seq_counter: 0,
            time_to_exit: false,
            event_tx,
        }
    }

    fn next_seq(&mut self) -> u32 {
        let seq = self.seq_counter;
        self.seq_counter += 1;
        seq
    }

    fn descriptor(&self, id: u32) -> Option<NodeDescriptor> {
        self.directory.get(&id).copied()
    }

    // ---- outbound helpers -------------------------------------------------

    async fn send_routed(&mut self, neighbor_id: u32, msg: RoutedMessage) {
        if let Some(conn) = self.registry.neighbor_mut(neighbor_id) {
            if let Err(e) = conn.send.send(&msg).await {
                tracing::warn!(neighbor_id, error = %e, "send to neighbor failed");
            }
        }
    }

    async fn broadcast_routed(&mut self, kind: RoutedKind, dest_id: u32, ttl: u32, except: Option<u32>) {
        let header = Header {
            dest_id,
            source_id: self.my_id,
            seq: self.next_seq(),
            ttl,
        };
        let msg = RoutedMessage { header, kind };
        for neighbor_id in self.registry.neighbor_ids() {
            if Some(neighbor_id) == except {
                continue;
            }
            self.send_routed(neighbor_id, msg.clone()).await;
        }
    }

    /// Rebroadcasts an already-logged flood message to every neighbor
    /// except the one it arrived from, with `ttl` already decremented.
    async fn reflood(&mut self, msg: RoutedMessage, arrived_from: u32) {
        for neighbor_id in self.registry.neighbor_ids() {
            if neighbor_id == arrived_from {
                continue;
            }
            self.send_routed(neighbor_id, msg.clone()).await;
        }
    }

    async fn forward_reverse(&mut self, msg: RoutedMessage) {
        match self.log.upstream_for(msg.header.source_id, msg.header.seq) {
            Some(upstream) => self.send_routed(upstream, msg).await,
            None => tracing::debug!(?msg.header, "no log entry, dropping unroutable response"),
        }
    }

    async fn reply_directly(&mut self, to: u32, kind: RoutedKind, source_id: u32, seq: u32) {
        let header = Header {
            dest_id: source_id,
            source_id,
            seq,
            ttl: 0,
        };
        self.send_routed(to, RoutedMessage { header, kind }).await;
    }

    // ---- connection establishment -----------------------------------------

    /// Dials every configured neighbor, installing whichever ones succeed.
    /// Failures are logged and the slot is simply left empty (spec.md §7).
    pub async fn connect_to_neighbors(&mut self, neighbor_ids: &[u32]) {
        for &id in neighbor_ids {
            let Some(descriptor) = self.descriptor(id) else {
                tracing::warn!(id, "neighbor id not present in directory, skipping");
                continue;
            };
            match connection::dial(descriptor.addr()).await {
                Ok(stream) => {
                    let (mut send, recv) = connection::split(stream);
                    if let Err(e) = send
                        .send(&AdHocMessage::ConnectAsNeighbor { sender_id: self.my_id })
                        .await
                    {
                        tracing::warn!(id, error = %e, "failed to announce neighbor identity");
                        continue;
                    }
                    let reader = connection::spawn_neighbor_reader(id, recv, self.event_tx.clone());
                    self.registry
                        .insert_neighbor(id, Connection::new(descriptor.addr(), send, reader));
                    tracing::info!(id, addr = %descriptor.addr(), "connected to neighbor");
                }
                Err(e) => {
                    tracing::warn!(id, addr = %descriptor.addr(), error = %e, "outbound connect to neighbor failed");
                }
            }
        }
    }

    /// Accepts an inbound TCP connection as a fresh ad-hoc slot.
    pub fn accept_adhoc(&mut self, stream: tokio::net::TcpStream, addr: std::net::SocketAddr) {
        let (send, recv) = connection::split(stream);
        let adhoc_id = self.registry.reserve_adhoc_id();
        let reader = connection::spawn_adhoc_reader(
            adhoc_id,
            recv,
            self.event_tx.clone(),
            self.base_dir.clone(),
        );
        self.registry
            .insert_adhoc_with_id(adhoc_id, Connection::new(addr, send, reader));
        tracing::debug!(adhoc_id, %addr, "accepted ad-hoc connection");
    }

    // ---- router -------------------------------------------------------------

    pub async fn handle_routed(&mut self, from_neighbor_id: u32, msg: RoutedMessage) {
        let RoutedMessage { header, kind } = msg;
        // Matched by value on a clone so `kind` stays available, owned, for
        // reflood/forward_reverse without fighting the borrow checker over
        // the `filename` bindings above — acceptable since messages here
        // are small (spec.md §5).
        match kind.clone() {
            RoutedKind::NotifyPeerDisconnect => {
                tracing::info!(from_neighbor_id, "peer disconnect notice, closing slot");
                self.registry.close_neighbor(from_neighbor_id).await;
            }
            RoutedKind::QueryFileLocation { filename } => {
                if !self.log_query_flood(from_neighbor_id, header.source_id, header.seq) {
                    return;
                }
                if self.index.search_file(&filename, self.mode) {
                    self.reply_directly(
                        from_neighbor_id,
                        RoutedKind::GiveFileLocation { filename, holder_id: self.my_id },
                        header.source_id,
                        header.seq,
                    )
                    .await;
                } else if header.ttl > 0 {
                    let forwarded = RoutedMessage { header: header.decremented(), kind };
                    self.reflood(forwarded, from_neighbor_id).await;
                }
            }
            RoutedKind::GiveFileLocation { filename, holder_id } => {
                if header.dest_id == self.my_id {
                    if self.pending_requests.remove(&filename) {
                        self.start_fetch(filename, holder_id).await;
                    }
                } else {
                    self.forward_reverse(RoutedMessage { header, kind }).await;
                }
            }
            RoutedKind::Invalidate { filename, version } => {
                if !self.log_query_flood(from_neighbor_id, header.source_id, header.seq) {
                    return;
                }
                for copy in self.index.copies_mut() {
                    if copy.name == filename {
                        copy.master_version = version;
                    }
                }
                if header.ttl > 0 {
                    let forwarded = RoutedMessage { header: header.decremented(), kind };
                    self.reflood(forwarded, from_neighbor_id).await;
                }
            }
            RoutedKind::QueryValid { filename } => {
                if !self.log_query_flood(from_neighbor_id, header.source_id, header.seq) {
                    return;
                }
                if header.dest_id == self.my_id {
                    let master_version = self.index.master(&filename).map_or(0, |f| f.master_version);
                    self.reply_directly(
                        from_neighbor_id,
                        RoutedKind::ResponseValid { filename, master_version },
                        header.source_id,
                        header.seq,
                    )
                    .await;
                } else if header.ttl > 0 {
                    let forwarded = RoutedMessage { header: header.decremented(), kind };
                    self.reflood(forwarded, from_neighbor_id).await;
                }
            }
            RoutedKind::ResponseValid { filename, master_version } => {
                if header.dest_id == self.my_id {
                    if let Some(copy) = self.index.copy_mut(&filename) {
                        copy.master_version = master_version;
                        copy.did_query = false;
                        copy.is_valid = copy.version == copy.master_version;
                        if copy.is_valid {
                            copy.last_valid_time = crate::index::now_secs();
                        }
                    }
                } else {
                    self.forward_reverse(RoutedMessage { header, kind }).await;
                }
            }
            RoutedKind::TestQuery => {
                if !self.log_query_flood(from_neighbor_id, header.source_id, header.seq) {
                    return;
                }
                if header.dest_id == self.my_id {
                    self.reply_directly(
                        from_neighbor_id,
                        RoutedKind::TestResponse,
                        header.source_id,
                        header.seq,
                    )
                    .await;
                } else if header.ttl > 0 {
                    let forwarded = RoutedMessage { header: header.decremented(), kind };
                    self.reflood(forwarded, from_neighbor_id).await;
                }
            }
            RoutedKind::TestResponse => {
                if header.dest_id == self.my_id {
                    self.pending_responses = self.pending_responses.saturating_sub(1);
                    if self.pending_responses == 0 {
                        if let Some(start) = self.test_start.take() {
                            let elapsed = start.elapsed();
                            tracing::info!(?elapsed, "testresponse round trip complete");
                            println!("testresponse: all responses received in {elapsed:?}");
                        }
                    }
                } else {
                    self.forward_reverse(RoutedMessage { header, kind }).await;
                }
            }
        }
    }

    /// A query's own source never re-enters its own log (boundary case:
    /// a flood that cycles back to its originator is always a drop), so
    /// this short-circuits before touching `QueryLog` at all.
    fn log_query_flood(&mut self, upstream_peer: u32, source_id: u32, seq: u32) -> bool {
        if source_id == self.my_id {
            return false;
        }
        self.log.log_query(upstream_peer, source_id, seq)
    }

    async fn start_fetch(&mut self, filename: String, holder_id: u32) {
        let Some(descriptor) = self.descriptor(holder_id) else {
            tracing::warn!(holder_id, "file holder not present in directory");
            return;
        };
        match connection::dial(descriptor.addr()).await {
            Ok(stream) => {
                let (mut send, recv) = connection::split(stream);
                if let Err(e) = send
                    .send(&AdHocMessage::RequestFile { filename: filename.clone() })
                    .await
                {
                    tracing::warn!(%filename, error = %e, "failed to request file");
                    return;
                }
                let adhoc_id = self.registry.reserve_adhoc_id();
                let reader = connection::spawn_adhoc_reader(
                    adhoc_id,
                    recv,
                    self.event_tx.clone(),
                    self.base_dir.clone(),
                );
                self.registry.insert_adhoc_with_id(
                    adhoc_id,
                    Connection::new(descriptor.addr(), send, reader),
                );
            }
            Err(e) => {
                tracing::warn!(holder_id, error = %e, "failed to connect to file holder");
            }
        }
    }

    pub async fn handle_adhoc(&mut self, adhoc_id: u64, msg: AdHocMessage) {
        match msg {
            AdHocMessage::ConnectAsNeighbor { .. } => {
                // The reader task intercepts this variant itself and hands
                // back the receive half via `PromoteToNeighbor` instead of
                // forwarding it here; reaching this arm would mean the
                // connection is still decoding `AdHocMessage` after asking
                // to become a neighbor.
                tracing::warn!(adhoc_id, "unexpected ConnectAsNeighbor event");
            }
            AdHocMessage::RequestFile { filename } => {
                self.serve_file(adhoc_id, &filename).await;
            }
            AdHocMessage::FileNotFound { filename } => {
                tracing::info!(%filename, "remote reports file not found");
                self.registry.remove_adhoc(adhoc_id).await;
            }
            AdHocMessage::NotifyStartingTransfer { .. } => {
                // The reader task intercepts this variant itself and never
                // forwards it as an event; reaching here would mean two
                // transfers were announced on one connection.
                tracing::warn!(adhoc_id, "unexpected NotifyStartingTransfer event");
            }
        }
    }

    /// Re-keys a promoted ad-hoc connection's reader onto `RoutedMessage`
    /// decoding, installing it in the neighbor table under `sender_id`.
    pub async fn handle_promotion(&mut self, adhoc_id: u64, sender_id: u32, recv: common::wire::BoxedRecvStream) {
        match self.registry.promote(adhoc_id, sender_id, recv, self.event_tx.clone()).await {
            Ok(()) => tracing::info!(sender_id, "promoted ad-hoc connection to neighbor"),
            Err(e) => tracing::warn!(sender_id, error = %e, "neighbor promotion failed"),
        }
    }

    async fn serve_file(&mut self, adhoc_id: u64, filename: &str) {
        let path = self.base_dir.join(filename);
        let (origin, version, ttr) = match self.index.master(filename) {
            Some(info) => (info.origin_server, info.version, self.default_ttr),
            None => match self.index.copy(filename) {
                Some(info) => (info.origin_server, info.version, info.ttr),
                None => (0, 0, 0),
            },
        };
        let have_entry = self.index.master(filename).is_some() || self.index.copy(filename).is_some();
        let file = if have_entry {
            tokio::fs::File::open(&path).await.ok()
        } else {
            None
        };
        let Some(mut file) = file else {
            if let Some(conn) = self.registry.adhoc_mut(adhoc_id) {
                let _ = conn
                    .send
                    .send(&AdHocMessage::FileNotFound { filename: filename.to_string() })
                    .await;
            }
            self.registry.remove_adhoc(adhoc_id).await;
            return;
        };
        let size = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!(%filename, error = %e, "failed to stat file for transfer");
                self.registry.remove_adhoc(adhoc_id).await;
                return;
            }
        };
        let notify = AdHocMessage::NotifyStartingTransfer {
            filename: filename.to_string(),
            size: size as u32,
            origin,
            version,
            ttr,
            last_valid: crate::index::now_secs(),
        };
        if let Some(conn) = self.registry.adhoc_mut(adhoc_id) {
            if let Err(e) = conn.send.send_with_payload(&notify, &mut file).await {
                tracing::warn!(%filename, error = %e, "failed sending file payload");
            }
        }
        self.registry.remove_adhoc(adhoc_id).await;
    }

    pub async fn handle_transfer_finished(
        &mut self,
        adhoc_id: u64,
        filename: String,
        origin: u32,
        version: i32,
        ttr: u32,
        outcome: Result<u64, String>,
    ) {
        match outcome {
            Ok(bytes) => {
                tracing::info!(%filename, bytes, "file transfer complete");
                self.index.add_copy(filename, origin, version, ttr);
            }
            Err(e) => {
                tracing::warn!(%filename, error = %e, "file transfer failed");
            }
        }
        self.registry.remove_adhoc(adhoc_id).await;
    }

    // ---- consistency engine --------------------------------------------------

    /// Runs on every tick: evicts the query log, then in pull mode emits
    /// QUERY_VALID for every copy entry whose TTR has elapsed.
    pub async fn tick(&mut self) {
        self.log.evict_expired();
        if self.mode != ConsistencyMode::Pull {
            return;
        }
        let now = crate::index::now_secs();
        for (filename, origin_server) in self.index.due_for_ttr_check(now) {
            self.broadcast_routed(
                RoutedKind::QueryValid { filename },
                origin_server,
                20,
                None,
            )
            .await;
        }
    }

    // ---- command interface ----------------------------------------------------

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Exit => {
                self.broadcast_routed(RoutedKind::NotifyPeerDisconnect, 0, 1, None).await;
                self.time_to_exit = true;
            }
            Command::GetFile(filename) => {
                self.pending_requests.insert(filename.clone());
                self.broadcast_routed(RoutedKind::QueryFileLocation { filename }, 0, 10, None).await;
            }
            Command::AddFile(filename) => {
                self.index.add_master(filename, self.my_id);
            }
            Command::ModifyFile(filename) => {
                let Some(info) = self.index.master_mut(&filename) else {
                    tracing::warn!(%filename, "modifyfile: no such master entry");
                    return;
                };
                info.version += 1;
                info.master_version += 1;
                let version = info.version;
                if self.mode == ConsistencyMode::Push {
                    self.broadcast_routed(RoutedKind::Invalidate { filename, version }, 0, 20, None)
                        .await;
                }
            }
            Command::UpdateFile(filename) => {
                let stale = match self.index.copy(&filename) {
                    Some(info) => !info.is_serving(self.mode),
                    None => false,
                };
                if stale {
                    self.pending_requests.insert(filename.clone());
                    self.broadcast_routed(RoutedKind::QueryFileLocation { filename }, 0, 10, None)
                        .await;
                }
            }
            Command::TestResponse { dest, count } => {
                self.pending_responses = count;
                self.test_start = Some(Instant::now());
                for _ in 0..count {
                    self.broadcast_routed(RoutedKind::TestQuery, dest, 10, None).await;
                }
            }
            Command::PrintFiles => {
                println!("{}", self.render_files());
            }
        }
    }

    fn render_files(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        writeln!(out, "master files:").ok();
        for info in self.index.masters() {
            writeln!(out, "  {} v{}", info.name, info.version).ok();
        }
        writeln!(out, "copy files:").ok();
        for info in self.index.copies() {
            match self.mode {
                ConsistencyMode::Push => {
                    writeln!(
                        out,
                        "  {} v{} master_v{} origin={} {}",
                        info.name,
                        info.version,
                        info.master_version,
                        info.origin_server,
                        if info.is_serving(self.mode) { "valid" } else { "stale" }
                    )
                    .ok();
                }
                ConsistencyMode::Pull => {
                    writeln!(
                        out,
                        "  {} v{} origin={} {} ttr={}",
                        info.name,
                        info.version,
                        info.origin_server,
                        if info.is_valid { "valid" } else { "stale" },
                        info.ttr
                    )
                    .ok();
                }
            }
        }
        out
    }

    /// Closes every neighbor socket. Called after the disconnect broadcast
    /// has been handed to the sockets (spec.md §5's shared-resource policy:
    /// "the listener socket is owned by the network task and released on
    /// quit before broadcast" — neighbor sockets close after).
    pub async fn shutdown(mut self) {
        for id in self.registry.neighbor_ids() {
            self.registry.close_neighbor(id).await;
        }
    }
}
