//! Daemon state (§5) — everything the control plane touches, behind one
//! `tokio::sync::Mutex`.
//!
//! The catalog, the local store's in-memory index, this peer's own id, the
//! outstanding-request bookkeeping, and the connection tables are locked
//! together. Every critical section is a handful of map operations; holding
//! one coarse lock for all of them avoids the lock-ordering questions a
//! finer split would raise, at the cost of serializing unrelated peers'
//! traffic through a single mutex.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::catalog::NetworkCatalog;
use crate::net::{ConnId, ConnectionTables};
use crate::store::LocalImageStore;
use crate::types::{ImageHash, PeerId};

pub struct DaemonState {
    /// This peer's own id. `None` until the `config` reply to a `join` is
    /// processed (the bootstrap peer sets it to `1` immediately).
    pub self_id: Option<PeerId>,
    pub catalog: NetworkCatalog,
    pub store: LocalImageStore,
    pub connections: ConnectionTables,
    /// Hashes this peer has asked some other peer for and is still waiting
    /// on — set on send, cleared on the matching `image` (§4.5).
    pub outstanding_own_request: HashSet<ImageHash>,
    /// Hash a client connection is waiting to receive, keyed by the
    /// connection it asked on. Cleared as soon as the image is relayed to
    /// that connection, fixing the source's open defect of entries that
    /// were never removed (§9).
    pub client_request: HashMap<ConnId, ImageHash>,
}

impl DaemonState {
    pub fn new(folder: impl Into<std::path::PathBuf>) -> Self {
        Self {
            self_id: None,
            catalog: NetworkCatalog::new(),
            store: LocalImageStore::new(folder),
            connections: ConnectionTables::new(),
            outstanding_own_request: HashSet::new(),
            client_request: HashMap::new(),
        }
    }

    /// Bootstrap a one-peer network: this daemon is peer `1`, with no
    /// addresses or hashes known yet beyond its own (filled in by the
    /// caller once the folder scan completes).
    pub fn bootstrap(&mut self, addr: std::net::SocketAddr) {
        self.self_id = Some(1);
        self.catalog.set_addr(1, addr);
    }

    pub fn self_id(&self) -> PeerId {
        self.self_id.expect("self_id read before it was assigned")
    }
}

pub type SharedState = Arc<tokio::sync::Mutex<DaemonState>>;

pub fn shared(state: DaemonState) -> SharedState {
    Arc::new(tokio::sync::Mutex::new(state))
}
