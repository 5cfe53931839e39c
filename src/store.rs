//! Local image store (§4.4) — hash-indexed view of one on-disk folder.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::hash::{self, HashError};
use crate::types::ImageHash;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Hash(#[from] HashError),
}

/// Mapping from hash to on-disk path, plus the backing directory.
/// Invariant: every key here is also in the owning peer's catalog
/// self-entry hash-set — maintained by the protocol engine, not by this
/// type.
#[derive(Debug)]
pub struct LocalImageStore {
    folder: PathBuf,
    images: HashMap<ImageHash, PathBuf>,
}

impl LocalImageStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            images: HashMap::new(),
        }
    }

    /// Scan the folder and adopt the result. See [`scan_folder`] for the
    /// steps; split out as a free function so callers can run it on a
    /// blocking thread (§5) and apply the result under the state lock.
    pub fn parse_folder(
        &mut self,
        network_hashes: &HashSet<ImageHash>,
    ) -> Result<(), StoreError> {
        self.images = scan_folder(&self.folder, network_hashes)?;
        Ok(())
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Adopt a result produced by [`scan_folder`] run elsewhere (typically
    /// on a `spawn_blocking` thread).
    pub fn apply_scanned(&mut self, images: HashMap<ImageHash, PathBuf>) {
        self.images = images;
    }

    pub fn hashes(&self) -> HashSet<ImageHash> {
        self.images.keys().cloned().collect()
    }

    pub fn contains(&self, hash: &ImageHash) -> bool {
        self.images.contains_key(hash)
    }

    /// Sum of sizes of every file currently in the folder.
    pub fn folder_size(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for entry in fs::read_dir(&self.folder)? {
            let entry = entry?;
            if entry.path().is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    /// Read the bytes and origin filename for `hash`, if stored locally.
    pub fn get(&self, hash: &ImageHash) -> Result<Option<(Vec<u8>, String)>, StoreError> {
        let Some(path) = self.images.get(hash) else {
            return Ok(None);
        };
        let bytes = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Some((bytes, filename)))
    }

    /// Admit an image: write `bytes` to `folder/filename`, record the
    /// mapping. Filenames come from the sender; a collision overwrites.
    pub fn store(
        &mut self,
        hash: ImageHash,
        bytes: &[u8],
        filename: &str,
    ) -> Result<(), StoreError> {
        let path = self.folder.join(filename);
        fs::write(&path, bytes)?;
        self.images.insert(hash, path);
        Ok(())
    }

    /// Evict an image: delete the file, drop the mapping. Unused by the
    /// control plane today but defined symmetrically with `store` (§4.4).
    pub fn remove(&mut self, hash: &ImageHash) -> Result<(), StoreError> {
        if let Some(path) = self.images.remove(hash) {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// 1. delete files with a non-image extension;
/// 2. hash each remaining file;
/// 3. on a local hash collision, keep the preferred file and delete the
///    loser (bigger pixel count, then more colors, then first seen);
/// 4. if a hash is already known to the network, delete the local file
///    (it would be a redundant third copy).
///
/// `network_hashes` is the catalog's `all_hashes()` snapshot *before* this
/// peer's own entry is populated — on bootstrap it is empty, on join it
/// reflects the `config` the peer just received. Pure filesystem work, no
/// access to [`LocalImageStore`]'s in-memory state, so it can run on a
/// blocking thread independently of the daemon lock.
pub fn scan_folder(
    folder: &Path,
    network_hashes: &HashSet<ImageHash>,
) -> Result<HashMap<ImageHash, PathBuf>, StoreError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(folder)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    // Deterministic "first seen" order for the local tie-break.
    entries.sort();

    let mut by_hash: HashMap<ImageHash, PathBuf> = HashMap::new();

    for path in entries {
        if !has_image_extension(&path) {
            let _ = fs::remove_file(&path);
            log::debug!("removed non-image file {}", path.display());
            continue;
        }

        let bytes = fs::read(&path)?;
        let computed = match hash::average_hash(&bytes) {
            Ok(h) => h,
            Err(e) => {
                log::warn!("unreadable image {}: {e}, removing", path.display());
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        if let Some(existing_path) = by_hash.get(&computed).cloned() {
            let existing_bytes = fs::read(&existing_path)?;
            if prefer_existing(&existing_bytes, &bytes)? {
                let _ = fs::remove_file(&path);
                log::debug!("removed duplicate image {}", path.display());
            } else {
                let _ = fs::remove_file(&existing_path);
                log::debug!("removed duplicate image {}", existing_path.display());
                by_hash.insert(computed, path);
            }
        } else if network_hashes.contains(&computed) {
            let _ = fs::remove_file(&path);
            log::debug!("removed network-duplicate image {}", path.display());
        } else {
            by_hash.insert(computed, path);
        }
    }

    Ok(by_hash)
}

fn has_image_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref(),
        Some("jpeg") | Some("jpg") | Some("png")
    )
}

/// `true` if `existing` should be kept over `candidate` (§4.4 step 3):
/// bigger pixel count wins; on tie, more colors wins; on full tie, the
/// file seen first (`existing`) wins.
fn prefer_existing(existing: &[u8], candidate: &[u8]) -> Result<bool, StoreError> {
    let existing_pixels = hash::pixel_count(existing)?;
    let candidate_pixels = hash::pixel_count(candidate)?;
    if existing_pixels != candidate_pixels {
        return Ok(existing_pixels > candidate_pixels);
    }

    let existing_colors = hash::color_count(existing)?;
    let candidate_colors = hash::color_count(candidate)?;
    if existing_colors != candidate_colors {
        return Ok(existing_colors > candidate_colors);
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32, color: [u8; 3]) -> PathBuf {
        let mut img = image::RgbImage::new(w, h);
        for p in img.pixels_mut() {
            *p = image::Rgb(color);
        }
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        let path = dir.join(name);
        fs::write(&path, buf.into_inner()).unwrap();
        path
    }

    #[test]
    fn removes_invalid_extensions_on_parse() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        write_png(dir.path(), "a.png", 4, 4, [1, 2, 3]);

        let mut store = LocalImageStore::new(dir.path());
        store.parse_folder(&HashSet::new()).unwrap();

        assert!(!dir.path().join("notes.txt").exists());
        assert_eq!(store.hashes().len(), 1);
    }

    #[test]
    fn duplicate_hash_keeps_bigger_image() {
        let dir = tempfile::tempdir().unwrap();
        // Same filename prefix guarantees lexicographic "first seen" order.
        write_png(dir.path(), "a_small.png", 4, 4, [5, 5, 5]);
        write_png(dir.path(), "b_big.png", 40, 40, [5, 5, 5]);

        let mut store = LocalImageStore::new(dir.path());
        store.parse_folder(&HashSet::new()).unwrap();

        assert_eq!(store.hashes().len(), 1);
        assert!(dir.path().join("b_big.png").exists());
        assert!(!dir.path().join("a_small.png").exists());
    }

    #[test]
    fn duplicate_hash_on_full_tie_keeps_first_seen() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a_first.png", 8, 8, [9, 9, 9]);
        write_png(dir.path(), "b_second.png", 8, 8, [9, 9, 9]);

        let mut store = LocalImageStore::new(dir.path());
        store.parse_folder(&HashSet::new()).unwrap();

        assert!(dir.path().join("a_first.png").exists());
        assert!(!dir.path().join("b_second.png").exists());
    }

    #[test]
    fn dedups_against_network_hashes() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 4, 4, [7, 7, 7]);

        let mut store = LocalImageStore::new(dir.path());
        let bytes = fs::read(dir.path().join("a.png")).unwrap();
        let h = hash::average_hash(&bytes).unwrap();
        let network = HashSet::from([h]);

        store.parse_folder(&network).unwrap();

        assert!(store.hashes().is_empty());
        assert!(!dir.path().join("a.png").exists());
    }

    #[test]
    fn store_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalImageStore::new(dir.path());
        let bytes = b"fake-bytes".to_vec();
        let hash = b"h1".to_vec();

        store.store(hash.clone(), &bytes, "pic.jpg").unwrap();

        let (read_back, filename) = store.get(&hash).unwrap().unwrap();
        assert_eq!(read_back, bytes);
        assert_eq!(filename, "pic.jpg");
        assert!(store.contains(&hash));
    }

    #[test]
    fn remove_evicts_file_and_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = LocalImageStore::new(dir.path());
        let hash = b"h1".to_vec();
        store.store(hash.clone(), b"data", "pic.jpg").unwrap();

        store.remove(&hash).unwrap();

        assert!(!store.contains(&hash));
        assert!(!dir.path().join("pic.jpg").exists());
    }
}
