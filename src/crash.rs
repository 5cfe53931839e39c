//! Crash handler (§4.6) — designated-recoverer election and
//! re-replication after a peer's inbound connection closes.

use crate::net;
use crate::state::SharedState;
use crate::types::{ImageHash, PeerId};
use crate::wire::Message;

/// React to the loss of `crashed`'s inbound connection. A no-op on every
/// peer except the one deterministically elected to recover the lost
/// images, so it is safe to call from every daemon that observes the EOF.
pub async fn handle_peer_crash(state: &SharedState, crashed: PeerId) {
    let (lost_hashes, self_id, designated, backup) = {
        let mut guard = state.lock().await;
        let lost_hashes: Vec<ImageHash> = guard.catalog.hashes(crashed).into_iter().collect();
        guard.catalog.remove(crashed);
        guard.connections.remove_peer(crashed);

        let ids_sorted = guard.catalog.ids_by_size_then_id();
        let self_id = guard.self_id();
        if ids_sorted.len() <= 1 {
            (lost_hashes, self_id, None, None)
        } else {
            (lost_hashes, self_id, Some(ids_sorted[0]), Some(ids_sorted[1]))
        }
    };

    let Some(designated) = designated else {
        log::info!("peer {crashed} crashed; no recovery needed (sole survivor or empty network)");
        return;
    };
    if designated != self_id {
        return;
    }
    let backup = backup.expect("a designated recoverer implies a backup exists");

    log::warn!(
        "peer {crashed} crashed; this peer ({self_id}) is the designated recoverer, backup is {backup}"
    );

    for hash in lost_hashes {
        let owner = {
            let guard = state.lock().await;
            guard.catalog.id_by_hash(&hash)
        };

        match owner {
            Some(owner) if owner != self_id => {
                {
                    let mut guard = state.lock().await;
                    guard.outstanding_own_request.insert(hash.clone());
                }
                let req = Message::RequestImage {
                    from_id: self_id,
                    hash,
                };
                if let Err(e) = net::send_to_peer(state, owner, &req).await {
                    log::warn!("recovery request to {owner} failed: {e:#}");
                }
            }
            Some(_self_owner) => {
                let found = {
                    let guard = state.lock().await;
                    guard.store.get(&hash)
                };
                match found {
                    Ok(Some((bytes, filename))) => {
                        let msg = Message::Image {
                            from_id: self_id,
                            hash,
                            bytes,
                            filename,
                            store: true,
                        };
                        if let Err(e) = net::send_to_peer(state, backup, &msg).await {
                            log::warn!("replication to backup {backup} failed: {e:#}");
                        }
                    }
                    Ok(None) => log::warn!("self was owner but the image is no longer on disk"),
                    Err(e) => log::warn!("failed to read image for replication: {e}"),
                }
            }
            None => log::warn!("image lost: no remaining holder for a hash from peer {crashed}"),
        }
    }
}
