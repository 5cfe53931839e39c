//! Network catalog (§4.3) — the in-memory model of all known peers.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use crate::types::{ImageHash, PeerId, PeerRecord};

/// `{ id -> { addr, hashes, size } }`, plus the accessors the control
/// plane needs. Not internally synchronized — callers hold it behind the
/// single [`crate::state::DaemonState`] lock (§5).
#[derive(Debug, Default, Clone)]
pub struct NetworkCatalog {
    peers: HashMap<PeerId, PeerRecord>,
}

impl NetworkCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, id: PeerId) -> &mut PeerRecord {
        self.peers.entry(id).or_default()
    }

    pub fn set_addr(&mut self, id: PeerId, addr: SocketAddr) {
        self.entry(id).addr = Some(addr);
    }

    pub fn clear_addr(&mut self, id: PeerId) {
        if let Some(rec) = self.peers.get_mut(&id) {
            rec.addr = None;
        }
    }

    pub fn add_hash(&mut self, id: PeerId, hash: ImageHash) {
        self.entry(id).hashes.insert(hash);
    }

    pub fn remove_hash(&mut self, id: PeerId, hash: &ImageHash) {
        if let Some(rec) = self.peers.get_mut(&id) {
            rec.hashes.remove(hash);
        }
    }

    pub fn set_size(&mut self, id: PeerId, size: u64) {
        self.entry(id).size = size;
    }

    pub fn get_addr(&self, id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&id).and_then(|r| r.addr)
    }

    pub fn hashes(&self, id: PeerId) -> HashSet<ImageHash> {
        self.peers
            .get(&id)
            .map(|r| r.hashes.clone())
            .unwrap_or_default()
    }

    /// Union of every peer's hash-set — what a `list` reply reports.
    pub fn all_hashes(&self) -> HashSet<ImageHash> {
        self.peers
            .values()
            .flat_map(|r| r.hashes.iter().cloned())
            .collect()
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Full snapshot, sent as `config.net_info` to a joining peer.
    pub fn snapshot(&self) -> HashMap<PeerId, PeerRecord> {
        self.peers.clone()
    }

    /// Replace the whole catalog (the joiner adopting `config.net_info`).
    pub fn replace(&mut self, net_info: HashMap<PeerId, PeerRecord>) {
        self.peers = net_info;
    }

    pub fn remove(&mut self, id: PeerId) -> Option<PeerRecord> {
        self.peers.remove(&id)
    }

    /// Any one peer holding `hash`. Ties are broken by `HashMap` iteration
    /// order — deliberately non-deterministic (§4.3); callers must not
    /// depend on which holder is returned.
    pub fn id_by_hash(&self, hash: &ImageHash) -> Option<PeerId> {
        self.peers
            .iter()
            .find(|(_, rec)| rec.hashes.contains(hash))
            .map(|(id, _)| *id)
    }

    pub fn size(&self, id: PeerId) -> u64 {
        self.peers.get(&id).map(|r| r.size).unwrap_or_default()
    }

    /// Peer ids ordered `(size asc, id asc)` — the crash-recovery election
    /// order (§4.6).
    pub fn ids_by_size_then_id(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort_by_key(|id| (self.size(*id), *id));
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn self_entry_is_authoritative_and_independent_fields_update() {
        let mut cat = NetworkCatalog::new();
        cat.set_addr(1, addr(5000));
        cat.add_hash(1, b"h1".to_vec());
        cat.set_size(1, 100);

        assert_eq!(cat.get_addr(1), Some(addr(5000)));
        assert_eq!(cat.hashes(1), HashSet::from([b"h1".to_vec()]));
        assert_eq!(cat.size(1), 100);

        cat.remove_hash(1, &b"h1".to_vec());
        assert!(cat.hashes(1).is_empty());
        // addr/size untouched by the hash removal
        assert_eq!(cat.get_addr(1), Some(addr(5000)));
        assert_eq!(cat.size(1), 100);
    }

    #[test]
    fn all_hashes_is_the_union_across_peers() {
        let mut cat = NetworkCatalog::new();
        cat.add_hash(1, b"h1".to_vec());
        cat.add_hash(2, b"h2".to_vec());
        cat.add_hash(2, b"h1".to_vec());

        assert_eq!(
            cat.all_hashes(),
            HashSet::from([b"h1".to_vec(), b"h2".to_vec()])
        );
    }

    #[test]
    fn id_by_hash_finds_any_holder() {
        let mut cat = NetworkCatalog::new();
        cat.add_hash(3, b"h1".to_vec());
        assert_eq!(cat.id_by_hash(&b"h1".to_vec()), Some(3));
        assert_eq!(cat.id_by_hash(&b"missing".to_vec()), None);
    }

    #[test]
    fn recovery_order_is_size_then_id() {
        let mut cat = NetworkCatalog::new();
        cat.set_size(3, 50);
        cat.set_size(1, 50);
        cat.set_size(2, 10);
        assert_eq!(cat.ids_by_size_then_id(), vec![2, 1, 3]);
    }

    #[test]
    fn snapshot_round_trips_through_replace() {
        let mut cat = NetworkCatalog::new();
        cat.set_addr(1, addr(5000));
        cat.add_hash(1, b"h1".to_vec());

        let mut other = NetworkCatalog::new();
        other.replace(cat.snapshot());

        assert_eq!(other.get_addr(1), Some(addr(5000)));
        assert_eq!(other.hashes(1), HashSet::from([b"h1".to_vec()]));
    }
}
