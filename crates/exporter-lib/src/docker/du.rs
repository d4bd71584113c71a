//! On-disk size of a directory tree
//!
//! The daemon does not report volume sizes for every driver, so the size is
//! computed by walking the mount point. Hard links are counted once and
//! symlinks are never followed.

use super::error::{DockerError, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use walkdir::WalkDir;

/// Sum the apparent size of all regular files below `root`
///
/// Unreadable entries below the root are skipped; an unreadable or missing
/// root is an error.
pub fn directory_size(root: &Path) -> Result<u64> {
    directory_size_until(root, &AtomicBool::new(false))
}

/// Like [`directory_size`], but gives up as soon as `cancel` is set
pub fn directory_size_until(root: &Path, cancel: &AtomicBool) -> Result<u64> {
    let root_str = root.display().to_string();
    let root_meta =
        std::fs::symlink_metadata(root).map_err(|e| DockerError::from_io(&root_str, e))?;
    if !root_meta.is_dir() {
        return Err(DockerError::Api(format!("{root_str} is not a directory")));
    }

    let mut total = 0u64;
    let mut seen_inodes = HashSet::new();

    for entry in WalkDir::new(root).follow_links(false) {
        if cancel.load(Ordering::Relaxed) {
            debug!(root = %root_str, "Volume walk cancelled");
            return Err(DockerError::Api(format!("walk of {root_str} cancelled")));
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(root = %root_str, error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "Skipping entry without metadata");
                continue;
            }
        };

        if !first_link(&meta, &mut seen_inodes) {
            continue;
        }

        total = total.saturating_add(meta.len());
    }

    Ok(total)
}

#[cfg(unix)]
fn first_link(meta: &std::fs::Metadata, seen: &mut HashSet<(u64, u64)>) -> bool {
    use std::os::unix::fs::MetadataExt;

    meta.nlink() <= 1 || seen.insert((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn first_link(_meta: &std::fs::Metadata, _seen: &mut HashSet<(u64, u64)>) -> bool {
    true
}

/// Volume walks on the blocking pool, at most one per volume
///
/// Dropping the future of a walk (target timeout, aborted cycle) cancels the
/// walk at its next directory entry. A volume whose previous walk has not
/// wound down yet is reported as busy instead of being walked twice.
#[derive(Debug, Clone, Default)]
pub struct VolumeWalks {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl VolumeWalks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size of the tree at `root`, belonging to `volume`
    pub async fn size(&self, volume: &str, root: PathBuf) -> Result<u64> {
        self.run(volume, move |cancel| directory_size_until(&root, cancel))
            .await
    }

    /// Number of walks still running on the blocking pool
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub(crate) async fn run<F>(&self, volume: &str, walk: F) -> Result<u64>
    where
        F: FnOnce(&AtomicBool) -> Result<u64> + Send + 'static,
    {
        let slot = self.claim(volume)?;
        let cancel = CancelOnDrop::default();
        let flag = Arc::clone(&cancel.0);

        tokio::task::spawn_blocking(move || {
            let _slot = slot;
            walk(flag.as_ref())
        })
        .await
        .map_err(|e| DockerError::Api(format!("volume walk task failed: {e}")))?
    }

    fn claim(&self, volume: &str) -> Result<WalkSlot> {
        if !lock(&self.in_flight).insert(volume.to_string()) {
            return Err(DockerError::Api(format!(
                "previous walk of volume {volume} is still running"
            )));
        }

        Ok(WalkSlot {
            volume: volume.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }
}

fn lock(in_flight: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a volume as walked until the blocking walk returns
struct WalkSlot {
    volume: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for WalkSlot {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.volume);
    }
}

#[derive(Default)]
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
