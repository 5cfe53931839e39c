//! Shared wire/catalog value types (§3).

use std::collections::HashSet;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// A peer identifier. `0` is reserved for "sender is a client, not a peer".
pub type PeerId = u32;

/// Reserved identifier meaning "the sender is a user client".
pub const CLIENT_ID: PeerId = 0;

/// An opaque perceptual-hash key. Treated purely as an equality/hash key —
/// nothing in the control plane interprets its bytes.
pub type ImageHash = Vec<u8>;

/// A full catalog entry for one peer, as carried in `config.net_info` and
/// held internally by the [`crate::catalog::NetworkCatalog`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub addr: Option<SocketAddr>,
    #[serde(default)]
    pub hashes: HashSet<ImageHash>,
    #[serde(default)]
    pub size: u64,
}

/// A partial catalog update, as carried in `update.add` / `update.remove`.
/// Every field is independently optional — `update` only touches the
/// fields present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerDelta {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub addr: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hashes: Option<HashSet<ImageHash>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size: Option<u64>,
}

impl PeerDelta {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            addr: Some(addr),
            ..Default::default()
        }
    }

    pub fn with_hashes(hashes: HashSet<ImageHash>, size: u64) -> Self {
        Self {
            addr: None,
            hashes: Some(hashes),
            size: Some(size),
        }
    }

    pub fn with_hash(hash: ImageHash, size: u64) -> Self {
        let mut hashes = HashSet::new();
        hashes.insert(hash);
        Self::with_hashes(hashes, size)
    }
}
