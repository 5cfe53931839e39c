//! The body of a daemon process (§6), factored out of `bin/daemon.rs` so
//! `launch_network` can run several of these as tasks within one process,
//! and so integration tests can drive the bootstrap/join/listen steps
//! individually and inspect the resulting state.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::net;
use crate::state::{self, DaemonState, SharedState};
use crate::wire::{write_message, Message};

/// Build a bootstrap peer's state: self-id 1, local folder scanned, no
/// outbound activity (§4.5 "Bootstrap").
pub async fn bootstrap(folder: PathBuf, own_addr: SocketAddr) -> Result<SharedState> {
    let shared = state::shared(DaemonState::new(&folder));
    let mut guard = shared.lock().await;
    guard.bootstrap(own_addr);
    guard.store.parse_folder(&HashSet::new())?;
    let size = guard.store.folder_size()?;
    let hashes = guard.store.hashes();
    for h in hashes {
        guard.catalog.add_hash(1, h);
    }
    guard.catalog.set_size(1, size);
    drop(guard);
    log::info!("bootstrap peer 1, folder {}", folder.display());
    Ok(shared)
}

/// Build a joining peer's state, bind and start serving on `own_addr`, then
/// send `join` to `introducer_addr` (§4.5 step 1). The introducer's `config`
/// reply is delivered by dialing `own_addr` back, so the listener must
/// already be accepting before `join` goes out — binding and spawning the
/// accept loop here, ahead of the dial, is what guarantees that.
pub async fn join(
    folder: PathBuf,
    own_addr: SocketAddr,
    introducer_addr: SocketAddr,
) -> Result<(SharedState, JoinHandle<Result<()>>)> {
    let shared = state::shared(DaemonState::new(&folder));
    let listener = TcpListener::bind(own_addr)
        .await
        .with_context(|| format!("binding listener on {own_addr}"))?;
    log::info!("listening on {own_addr}");
    let serve_state = shared.clone();
    let serve_handle = tokio::spawn(async move { net::serve(listener, serve_state).await });

    log::info!("joining network via {introducer_addr} as {own_addr}");
    let (_conn_id, writer) = net::dial(&shared, introducer_addr).await?;
    let mut w = writer.lock().await;
    write_message(&mut *w, &Message::Join { addr: own_addr }).await?;
    drop(w);
    Ok((shared, serve_handle))
}

/// Run one daemon to completion (it never returns under normal operation —
/// the listener loop runs forever). `peer_port` absent means bootstrap.
pub async fn run_daemon(folder: PathBuf, own_port: u16, peer_port: Option<u16>) -> Result<()> {
    let own_addr: SocketAddr = format!("127.0.0.1:{own_port}").parse()?;

    match peer_port {
        None => {
            let shared = bootstrap(folder, own_addr).await?;
            net::run_listener(own_addr, shared).await
        }
        Some(peer_port) => {
            let join_addr: SocketAddr = format!("127.0.0.1:{peer_port}").parse()?;
            let (_shared, serve_handle) = join(folder, own_addr, join_addr).await?;
            serve_handle.await?
        }
    }
}
