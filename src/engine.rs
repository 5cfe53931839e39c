//! Control-plane protocol engine (§4.5) — the join / config / update /
//! request_image / image / request_list / list state machine. Each
//! decoded message is dispatched here on its own spawned task; handlers
//! take the single [`DaemonState`](crate::state::DaemonState) lock for
//! every critical section and release it before any network `.await`.

use std::collections::HashMap;

use anyhow::Result;

use crate::net::{self, ConnId};
use crate::state::SharedState;
use crate::types::{ImageHash, PeerDelta, PeerId, CLIENT_ID};
use crate::wire::Message;

pub async fn dispatch(state: SharedState, conn_id: ConnId, msg: Message) -> Result<()> {
    match msg {
        Message::Join { addr } => handle_join(state, conn_id, addr).await,
        Message::Config {
            from_id,
            new_id,
            net_info,
        } => handle_config(state, conn_id, from_id, new_id, net_info).await,
        Message::Update {
            from_id,
            add,
            remove,
        } => handle_update(state, from_id, add, remove).await,
        Message::RequestImage { from_id, hash } => {
            handle_request_image(state, conn_id, from_id, hash).await
        }
        Message::Image {
            from_id,
            hash,
            bytes,
            filename,
            store,
        } => handle_image(state, from_id, hash, bytes, filename, store).await,
        Message::RequestList { from_id } => handle_request_list(state, conn_id, from_id).await,
        Message::List { .. } => {
            log::warn!("daemon received a client-facing `list` reply, ignoring");
            Ok(())
        }
    }
}

/// Iₘ's half of the join handshake (§4.5 step 2).
async fn handle_join(state: SharedState, conn_id: ConnId, addr: std::net::SocketAddr) -> Result<()> {
    let (new_id, config_msg, other_ids, bootstrap_replicate, self_id) = {
        let mut guard = state.lock().await;
        let pre_count = guard.catalog.ids().len();
        let new_id = guard.catalog.ids().into_iter().max().unwrap_or(0) + 1;
        guard.catalog.set_addr(new_id, addr);
        guard.connections.set_inbound(new_id, conn_id);
        let self_id = guard.self_id();

        let config_msg = Message::Config {
            from_id: self_id,
            new_id,
            net_info: guard.catalog.snapshot(),
        };
        let other_ids: Vec<PeerId> = guard
            .catalog
            .ids()
            .into_iter()
            .filter(|&id| id != self_id && id != new_id)
            .collect();

        (new_id, config_msg, other_ids, pre_count == 1, self_id)
    };

    if let Err(e) = net::send_to_peer(&state, new_id, &config_msg).await {
        log::warn!("failed to send config to joining peer {new_id}: {e:#}");
        return Ok(());
    }

    for other in other_ids {
        let update = Message::Update {
            from_id: self_id,
            add: HashMap::from([(new_id, PeerDelta::with_addr(addr))]),
            remove: HashMap::new(),
        };
        if let Err(e) = net::send_to_peer(&state, other, &update).await {
            log::warn!("failed to announce new peer {new_id} to {other}: {e:#}");
        }
    }

    if bootstrap_replicate {
        let hashes: Vec<ImageHash> = {
            let guard = state.lock().await;
            guard.store.hashes().into_iter().collect()
        };
        for hash in hashes {
            send_local_image(&state, new_id, hash, true).await;
        }
    }

    Ok(())
}

/// Jₙ's half of the join handshake (§4.5 step 3).
async fn handle_config(
    state: SharedState,
    conn_id: ConnId,
    from_id: PeerId,
    new_id: PeerId,
    net_info: HashMap<PeerId, crate::types::PeerRecord>,
) -> Result<()> {
    let folder = {
        let mut guard = state.lock().await;
        guard.self_id = Some(new_id);
        guard.catalog.replace(net_info);
        if let Some(writer) = guard.connections.writer_for_conn(conn_id) {
            guard.connections.set_outbound(from_id, writer);
        }
        guard.store.folder().to_path_buf()
    };

    let network_hashes = {
        let guard = state.lock().await;
        guard.catalog.all_hashes()
    };
    let scanned = tokio::task::spawn_blocking(move || {
        crate::store::scan_folder(&folder, &network_hashes)
    })
    .await??;

    let (self_hashes, size, peer_ids) = {
        let mut guard = state.lock().await;
        guard.store.apply_scanned(scanned);
        let size = guard.store.folder_size()?;
        let hashes = guard.store.hashes();
        for h in &hashes {
            guard.catalog.add_hash(new_id, h.clone());
        }
        guard.catalog.set_size(new_id, size);
        let peer_ids: Vec<PeerId> = guard
            .catalog
            .ids()
            .into_iter()
            .filter(|&id| id != new_id)
            .collect();
        (hashes, size, peer_ids)
    };

    for peer in &peer_ids {
        let update = Message::Update {
            from_id: new_id,
            add: HashMap::from([(new_id, PeerDelta::with_hashes(self_hashes.clone(), size))]),
            remove: HashMap::new(),
        };
        if let Err(e) = net::send_to_peer(&state, *peer, &update).await {
            log::warn!("failed to announce join hashes to {peer}: {e:#}");
        }
    }

    if !peer_ids.is_empty() {
        let mut targets = peer_ids.into_iter().cycle();
        for hash in self_hashes {
            let target = targets.next().expect("cycle over a non-empty Vec always yields");
            send_local_image(&state, target, hash, true).await;
        }
    }

    Ok(())
}

async fn handle_update(
    state: SharedState,
    from_id: PeerId,
    add: HashMap<PeerId, PeerDelta>,
    remove: HashMap<PeerId, PeerDelta>,
) -> Result<()> {
    let (self_id, needs_keepalive) = {
        let mut guard = state.lock().await;
        for (id, delta) in add {
            apply_delta(&mut guard.catalog, id, delta, false);
        }
        for (id, delta) in remove {
            apply_delta(&mut guard.catalog, id, delta, true);
        }
        let self_id = guard.self_id();
        let needs_keepalive =
            from_id != self_id && guard.connections.get_outbound(from_id).is_none();
        (self_id, needs_keepalive)
    };

    if needs_keepalive {
        let keepalive = Message::Update {
            from_id: self_id,
            add: HashMap::new(),
            remove: HashMap::new(),
        };
        if let Err(e) = net::send_to_peer(&state, from_id, &keepalive).await {
            log::warn!("keep-alive update to {from_id} failed: {e:#}");
        }
    }

    Ok(())
}

fn apply_delta(
    catalog: &mut crate::catalog::NetworkCatalog,
    id: PeerId,
    delta: PeerDelta,
    is_remove: bool,
) {
    if is_remove {
        if delta.addr.is_some() {
            catalog.clear_addr(id);
        }
        if let Some(hashes) = delta.hashes {
            for h in hashes {
                catalog.remove_hash(id, &h);
            }
        }
        return;
    }
    if let Some(addr) = delta.addr {
        catalog.set_addr(id, addr);
    }
    if let Some(hashes) = delta.hashes {
        for h in hashes {
            catalog.add_hash(id, h);
        }
    }
    if let Some(size) = delta.size {
        catalog.set_size(id, size);
    }
}

async fn handle_request_image(
    state: SharedState,
    conn_id: ConnId,
    from_id: PeerId,
    hash: ImageHash,
) -> Result<()> {
    if from_id == CLIENT_ID {
        let local = {
            let guard = state.lock().await;
            guard.store.get(&hash)?
        };
        let self_id = { state.lock().await.self_id() };

        if let Some((bytes, filename)) = local {
            let msg = Message::Image {
                from_id: self_id,
                hash,
                bytes,
                filename,
                store: false,
            };
            net::send_on_conn(&state, conn_id, &msg).await?;
            return Ok(());
        }

        let owner = {
            let mut guard = state.lock().await;
            guard.client_request.insert(conn_id, hash.clone());
            guard.catalog.id_by_hash(&hash)
        };

        match owner {
            Some(owner) => {
                let req = Message::RequestImage {
                    from_id: self_id,
                    hash,
                };
                if let Err(e) = net::send_to_peer(&state, owner, &req).await {
                    log::warn!("failed to forward image request to {owner}: {e:#}");
                }
            }
            None => log::warn!("client requested an unknown hash"),
        }
        return Ok(());
    }

    send_local_image(&state, from_id, hash, false).await;
    Ok(())
}

/// Look up `hash` in the local store and send it (with `store_flag`) to
/// `target`, logging rather than failing the caller if it is missing —
/// used both for peer-to-peer replies and for the replication sends in
/// `handle_join`/`handle_config`.
async fn send_local_image(state: &SharedState, target: PeerId, hash: ImageHash, store_flag: bool) {
    let found = {
        let guard = state.lock().await;
        match guard.store.get(&hash) {
            Ok(found) => found,
            Err(e) => {
                log::warn!("failed to read local image for {target}: {e}");
                return;
            }
        }
    };
    let Some((bytes, filename)) = found else {
        log::warn!("local image for hash disappeared before it could be sent to {target}");
        return;
    };
    let self_id = { state.lock().await.self_id() };
    let msg = Message::Image {
        from_id: self_id,
        hash,
        bytes,
        filename,
        store: store_flag,
    };
    if let Err(e) = net::send_to_peer(state, target, &msg).await {
        log::warn!("failed to send image to {target}: {e:#}");
    }
}

async fn handle_image(
    state: SharedState,
    _from_id: PeerId,
    hash: ImageHash,
    bytes: Vec<u8>,
    filename: String,
    store_flag: bool,
) -> Result<()> {
    let (waiting_conns, should_admit, self_id) = {
        let mut guard = state.lock().await;
        let waiting: Vec<ConnId> = guard
            .client_request
            .iter()
            .filter(|(_, h)| **h == hash)
            .map(|(c, _)| *c)
            .collect();
        for c in &waiting {
            guard.client_request.remove(c);
        }
        let was_outstanding = guard.outstanding_own_request.remove(&hash);
        (waiting, was_outstanding || store_flag, guard.self_id())
    };

    for conn_id in waiting_conns {
        let msg = Message::Image {
            from_id: self_id,
            hash: hash.clone(),
            bytes: bytes.clone(),
            filename: filename.clone(),
            store: false,
        };
        if let Err(e) = net::send_on_conn(&state, conn_id, &msg).await {
            log::warn!("failed to relay image to waiting client: {e:#}");
        }
    }

    if should_admit {
        let (admitted_hash, size, peer_ids) = {
            let mut guard = state.lock().await;
            guard.store.store(hash.clone(), &bytes, &filename)?;
            guard.catalog.add_hash(self_id, hash.clone());
            let size = guard.store.folder_size()?;
            guard.catalog.set_size(self_id, size);
            let peer_ids: Vec<PeerId> = guard
                .catalog
                .ids()
                .into_iter()
                .filter(|&id| id != self_id)
                .collect();
            (hash, size, peer_ids)
        };

        for peer in peer_ids {
            let update = Message::Update {
                from_id: self_id,
                add: HashMap::from([(self_id, PeerDelta::with_hash(admitted_hash.clone(), size))]),
                remove: HashMap::new(),
            };
            if let Err(e) = net::send_to_peer(&state, peer, &update).await {
                log::warn!("failed to announce newly admitted image to {peer}: {e:#}");
            }
        }
    }

    Ok(())
}

async fn handle_request_list(state: SharedState, conn_id: ConnId, _from_id: PeerId) -> Result<()> {
    let hashes: Vec<ImageHash> = {
        let guard = state.lock().await;
        guard.catalog.all_hashes().into_iter().collect()
    };
    net::send_on_conn(&state, conn_id, &Message::List { hashes }).await?;
    Ok(())
}
