//! Listener and demultiplexer (§4.2) — the generic connection plumbing
//! shared by every socket this daemon owns, whether accepted by its
//! listener or dialed out by itself. A connection is never "a peer's
//! connection"; it is registered in the daemon's tables, and a peer id is
//! attached to it only once a message on the wire says who is on the other
//! end (§9 redesign: connections and peers are independently indexed).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::engine;
use crate::state::SharedState;
use crate::types::{PeerId, CLIENT_ID};
use crate::wire::{self, Message};

pub type ConnId = u64;
pub type Writer = Arc<Mutex<OwnedWriteHalf>>;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// The two connection tables described in §4.2/§5: every open connection's
/// write half, keyed by a connection id; which connection id a peer's
/// inbound traffic arrives on (for crash detection); and which connection
/// this daemon sends a peer's outbound traffic on (opened lazily).
#[derive(Default)]
pub struct ConnectionTables {
    conns: HashMap<ConnId, Writer>,
    outbound: HashMap<PeerId, Writer>,
    inbound: HashMap<PeerId, ConnId>,
    inbound_rev: HashMap<ConnId, PeerId>,
}

impl ConnectionTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_conn(&mut self, id: ConnId, writer: Writer) {
        self.conns.insert(id, writer);
    }

    pub fn writer_for_conn(&self, id: ConnId) -> Option<Writer> {
        self.conns.get(&id).cloned()
    }

    pub fn set_outbound(&mut self, peer: PeerId, writer: Writer) {
        self.outbound.insert(peer, writer);
    }

    pub fn get_outbound(&self, peer: PeerId) -> Option<Writer> {
        self.outbound.get(&peer).cloned()
    }

    pub fn set_inbound(&mut self, peer: PeerId, conn: ConnId) {
        self.inbound.insert(peer, conn);
        self.inbound_rev.insert(conn, peer);
    }

    pub fn peer_for_inbound_conn(&self, conn: ConnId) -> Option<PeerId> {
        self.inbound_rev.get(&conn).copied()
    }

    /// Drop bookkeeping for a connection that is no longer open. Does not
    /// touch the peer tables — a peer that crashes is forgotten via
    /// [`Self::remove_peer`] instead, since one peer can own two
    /// connections (its inbound and its outbound) only one of which just
    /// closed.
    pub fn drop_conn(&mut self, id: ConnId) {
        self.conns.remove(&id);
        if let Some(peer) = self.inbound_rev.remove(&id) {
            self.inbound.remove(&peer);
        }
    }

    /// Forget a crashed peer entirely: both directions, whichever
    /// connection ids backed them.
    pub fn remove_peer(&mut self, peer: PeerId) {
        self.outbound.remove(&peer);
        if let Some(conn) = self.inbound.remove(&peer) {
            self.inbound_rev.remove(&conn);
            self.conns.remove(&conn);
        }
    }
}

/// Bind and accept connections forever. Each accepted socket is handed to
/// [`spawn_connection`] exactly like a self-dialed one — the listener does
/// not learn who connected until the first message arrives.
pub async fn run_listener(addr: SocketAddr, state: SharedState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding listener on {addr}"))?;
    log::info!("listening on {addr}");
    serve(listener, state).await
}

/// Accept loop over an already-bound listener. Split out from
/// [`run_listener`] so callers that need the bind to have completed
/// before anything else happens (tests dialing a known port, a future
/// socket-activation entry point) can bind themselves and hand off here.
pub async fn serve(listener: TcpListener, state: SharedState) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        log::debug!("accepted connection from {peer_addr}");
        spawn_connection(stream, state.clone()).await;
    }
}

/// Split a stream, register its write half, and spawn a read loop over its
/// read half. Used for both accepted and self-dialed connections (§4.2).
pub fn spawn_connection(
    stream: TcpStream,
    state: SharedState,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (ConnId, Writer)> + Send>> {
    Box::pin(async move {
        let (reader, writer_half) = stream.into_split();
        let conn_id = next_conn_id();
        let writer: Writer = Arc::new(Mutex::new(writer_half));

        {
            let mut guard = state.lock().await;
            guard.connections.register_conn(conn_id, writer.clone());
        }

        let task_state = state.clone();
        tokio::spawn(async move {
            read_loop(conn_id, reader, task_state).await;
        });

        (conn_id, writer)
    })
}

async fn read_loop(conn_id: ConnId, mut reader: tokio::net::tcp::OwnedReadHalf, state: SharedState) {
    loop {
        match wire::read_message(&mut reader).await {
            Ok(Some(msg)) => {
                if let Some(from_id) = sender_id(&msg) {
                    if from_id != CLIENT_ID {
                        let mut guard = state.lock().await;
                        guard.connections.set_inbound(from_id, conn_id);
                    }
                }
                let dispatch_state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine::dispatch(dispatch_state, conn_id, msg).await {
                        log::warn!("handler error on connection {conn_id}: {e:#}");
                    }
                });
            }
            Ok(None) => {
                handle_disconnect(conn_id, &state).await;
                break;
            }
            Err(e) => {
                log::warn!("framing error on connection {conn_id}: {e}");
                handle_disconnect(conn_id, &state).await;
                break;
            }
        }
    }
}

/// The `from_id` a message carries for the purposes of inbound-table
/// auto-indexing, or `None` if it must never auto-index (`join`, which
/// carries no sender id, and `list`, which a daemon never receives).
fn sender_id(msg: &Message) -> Option<PeerId> {
    match msg {
        Message::Join { .. } => None,
        Message::Config { from_id, .. } => Some(*from_id),
        Message::Update { from_id, .. } => Some(*from_id),
        Message::RequestImage { from_id, .. } => Some(*from_id),
        Message::Image { from_id, .. } => Some(*from_id),
        Message::RequestList { from_id } => Some(*from_id),
        Message::List { .. } => None,
    }
}

async fn handle_disconnect(conn_id: ConnId, state: &SharedState) {
    let peer_id = {
        let guard = state.lock().await;
        guard.connections.peer_for_inbound_conn(conn_id)
    };

    match peer_id {
        Some(peer) => {
            log::warn!("peer {peer} disconnected (connection {conn_id})");
            crate::crash::handle_peer_crash(state, peer).await;
        }
        None => {
            let mut guard = state.lock().await;
            guard.client_request.retain(|cid, _| *cid != conn_id);
            guard.connections.drop_conn(conn_id);
            log::debug!("connection {conn_id} closed");
        }
    }
}

/// Reply on the same connection a message arrived on.
pub async fn send_on_conn(state: &SharedState, conn_id: ConnId, msg: &Message) -> Result<()> {
    let writer = {
        let guard = state.lock().await;
        guard.connections.writer_for_conn(conn_id)
    };
    let Some(writer) = writer else {
        bail!("connection {conn_id} is no longer open");
    };
    let mut w = writer.lock().await;
    wire::write_message(&mut *w, msg).await?;
    Ok(())
}

/// Send to a peer by id, opening a fresh outbound connection the first
/// time this daemon needs to talk to it (§5).
pub async fn send_to_peer(state: &SharedState, peer: PeerId, msg: &Message) -> Result<()> {
    let writer = get_or_open_outbound(state, peer).await?;
    let mut w = writer.lock().await;
    wire::write_message(&mut *w, msg).await?;
    Ok(())
}

async fn get_or_open_outbound(state: &SharedState, peer: PeerId) -> Result<Writer> {
    {
        let guard = state.lock().await;
        if let Some(w) = guard.connections.get_outbound(peer) {
            return Ok(w);
        }
    }

    let addr = {
        let guard = state.lock().await;
        guard
            .catalog
            .get_addr(peer)
            .with_context(|| format!("no known address for peer {peer}"))?
    };

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to peer {peer} at {addr}"))?;
    let (_conn_id, writer) = spawn_connection(stream, state.clone()).await;

    let mut guard = state.lock().await;
    // Another task may have raced us to the same peer; last writer wins,
    // the loser's connection is simply unused from here on.
    guard.connections.set_outbound(peer, writer.clone());
    Ok(writer)
}

/// Dial a join address and register the resulting connection, without
/// knowing the introducer's id yet — the `config` reply identifies it.
pub async fn dial(state: &SharedState, addr: SocketAddr) -> Result<(ConnId, Writer)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    Ok(spawn_connection(stream, state.clone()).await)
}
