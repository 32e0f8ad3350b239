//! Events fed into the core loop's `tokio::select!` by per-connection
//! reader tasks.

use common::wire::{AdHocMessage, BoxedRecvStream, RoutedMessage};

pub enum Event {
    Routed {
        neighbor_id: u32,
        msg: RoutedMessage,
    },
    AdHoc {
        adhoc_id: u64,
        msg: AdHocMessage,
    },
    /// Emitted by the ad-hoc reader once it has copied the declared number
    /// of bytes to disk (or failed partway through). Carries the metadata
    /// announced in `NotifyStartingTransfer` so the core loop can install a
    /// copy-index entry without having tracked the request itself.
    TransferFinished {
        adhoc_id: u64,
        filename: String,
        origin: u32,
        version: i32,
        ttr: u32,
        outcome: Result<u64, String>,
    },
    /// Emitted by the ad-hoc reader in place of forwarding `ConnectAsNeighbor`
    /// as an ordinary `AdHoc` event: the reader retires itself and hands its
    /// receive half back so the core loop can re-key it onto a neighbor
    /// reader decoding `RoutedMessage` frames instead of `AdHocMessage` ones.
    PromoteToNeighbor {
        adhoc_id: u64,
        sender_id: u32,
        recv: BoxedRecvStream,
    },
    NeighborDisconnected {
        neighbor_id: u32,
    },
    AdHocDisconnected {
        adhoc_id: u64,
    },
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Routed { neighbor_id, msg } => {
                f.debug_struct("Routed").field("neighbor_id", neighbor_id).field("msg", msg).finish()
            }
            Event::AdHoc { adhoc_id, msg } => {
                f.debug_struct("AdHoc").field("adhoc_id", adhoc_id).field("msg", msg).finish()
            }
            Event::TransferFinished { adhoc_id, filename, origin, version, ttr, outcome } => f
                .debug_struct("TransferFinished")
                .field("adhoc_id", adhoc_id)
                .field("filename", filename)
                .field("origin", origin)
                .field("version", version)
                .field("ttr", ttr)
                .field("outcome", outcome)
                .finish(),
            Event::PromoteToNeighbor { adhoc_id, sender_id, .. } => f
                .debug_struct("PromoteToNeighbor")
                .field("adhoc_id", adhoc_id)
                .field("sender_id", sender_id)
                .field("recv", &"..")
                .finish(),
            Event::NeighborDisconnected { neighbor_id } => {
                f.debug_struct("NeighborDisconnected").field("neighbor_id", neighbor_id).finish()
            }
            Event::AdHocDisconnected { adhoc_id } => {
                f.debug_struct("AdHocDisconnected").field("adhoc_id", adhoc_id).finish()
            }
        }
    }
}
