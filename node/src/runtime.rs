//! The core loop (spec.md §4.7): multiplexes the listener, the per-connection
//! event channel, the stdin command channel, and the eviction/TTR tick.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::commands;
use crate::event::Event;
use crate::state::NodeState;

/// Log eviction and pull-mode TTR checks run at least this often
/// (spec.md §4.3, §4.7).
const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Reads whitespace-delimited commands from standard input until EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        return;
                    }
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "error reading command input");
                    return;
                }
            }
        }
    });
    rx
}

pub async fn run(mut state: NodeState, listen_addr: SocketAddr, mut event_rx: mpsc::Receiver<Event>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("binding listener on {listen_addr}"))?;
    tracing::info!(%listen_addr, "node listening");

    let mut cmd_rx = spawn_stdin_reader();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => state.accept_adhoc(stream, addr),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => dispatch_event(&mut state, event).await,
                    None => unreachable!("NodeState retains a sender, so the event channel never closes"),
                }
            }
            line = cmd_rx.recv() => {
                match line {
                    Some(line) => {
                        if handle_command_line(&mut state, &line).await {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("standard input closed, shutting down");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                state.tick().await;
            }
        }
        if state.time_to_exit {
            break;
        }
    }
    state.shutdown().await;
    Ok(())
}

async fn dispatch_event(state: &mut NodeState, event: Event) {
    match event {
        Event::Routed { neighbor_id, msg } => state.handle_routed(neighbor_id, msg).await,
        Event::AdHoc { adhoc_id, msg } => state.handle_adhoc(adhoc_id, msg).await,
        Event::PromoteToNeighbor { adhoc_id, sender_id, recv } => {
            state.handle_promotion(adhoc_id, sender_id, recv).await;
        }
        Event::TransferFinished { adhoc_id, filename, origin, version, ttr, outcome } => {
            state
                .handle_transfer_finished(adhoc_id, filename, origin, version, ttr, outcome)
                .await;
        }
        Event::NeighborDisconnected { neighbor_id } => {
            tracing::info!(neighbor_id, "neighbor connection closed");
            state.registry.close_neighbor(neighbor_id).await;
        }
        Event::AdHocDisconnected { adhoc_id } => {
            state.registry.remove_adhoc(adhoc_id).await;
        }
    }
}

/// Returns `true` if the node should stop its core loop.
async fn handle_command_line(state: &mut NodeState, line: &str) -> bool {
    match commands::parse(line) {
        Ok(Some(command)) => {
            let is_exit = matches!(command, commands::Command::Exit);
            state.handle_command(command).await;
            is_exit
        }
        Ok(None) => false,
        Err(e) => {
            println!("error: {e}");
            false
        }
    }
}
