//! Atomic directory writer.
//!
//! ## Layout of a published target directory
//!
//! ```text
//! <target>/
//!   ..2026_10_18_10_59_12.123456789/   staging dir of the current payload
//!     app.conf
//!   ..data -> ..2026_10_18_10_59_12.123456789
//!   app.conf -> ..data/app.conf
//! ```
//!
//! ## Commit protocol of `publish`
//!
//! 1. Validate projection paths (flat keys, no reserved `..` prefix).
//! 2. Compare the payload fingerprint with the directory `..data` points at
//!    → skip if identical and every key link is in place.
//! 3. Create a fresh `..<timestamp>` staging dir.
//! 4. Write every file into it; on failure remove it and stop.
//! 5. Point `..data_tmp` at the staging dir and rename it over `..data`
//!    (atomic on POSIX; the single commit point).
//! 6. Ensure `<key> -> ..data/<key>` for every key, drop links of removed keys.
//! 7. Delete staging dirs other than the new one and the one just replaced.
//!
//! Readers resolving `<target>/<key>` always go through `..data`, so they see
//! either the old payload or the new one in full.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use confmount_core::FileProjection;

use crate::error::{io_err, WriteError};
use crate::fingerprint::{fingerprint, fingerprint_entries};

/// Name of the indirection link whose rename commits a publish.
pub const DATA_DIR_NAME: &str = "..data";
/// Temporary name of the indirection link before the rename.
pub const DATA_DIR_TMP_NAME: &str = "..data_tmp";
/// Prefix reserved for writer-managed entries; never a valid key.
pub const RESERVED_PREFIX: &str = "..";

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

/// Where staged file bytes go. [`DiskSink`] in production.
pub trait FileSink: Send + Sync {
    /// Create `path` (which must not exist), write `content`, apply `mode`.
    fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> std::io::Result<()>;
}

/// Writes and fsyncs real files.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskSink;

impl FileSink for DiskSink {
    fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(path)?;
        file.write_all(content)?;
        file.sync_all()?;
        // open(2) honours the umask; set the exact bits afterwards.
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }
}

// ---------------------------------------------------------------------------
// Publish outcome
// ---------------------------------------------------------------------------

/// Outcome of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishOutcome {
    /// A new staging dir was committed.
    Written,
    /// The directory already held exactly this payload; at most leftover
    /// links of removed keys were cleaned up.
    Unchanged,
}

// ---------------------------------------------------------------------------
// AtomicWriter
// ---------------------------------------------------------------------------

/// Publishes projection sets into one target directory.
///
/// The writer assumes it is the only writer of `target`; concurrent readers
/// are always safe.
#[derive(Clone)]
pub struct AtomicWriter {
    target: PathBuf,
    sink: Arc<dyn FileSink>,
}

impl std::fmt::Debug for AtomicWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWriter")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl AtomicWriter {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self::with_sink(target, Arc::new(DiskSink))
    }

    pub fn with_sink(target: impl Into<PathBuf>, sink: Arc<dyn FileSink>) -> Self {
        Self {
            target: target.into(),
            sink,
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target
    }

    /// Publish `projections` as the complete content of the target directory.
    pub fn publish(&self, projections: &[FileProjection]) -> Result<PublishOutcome, WriteError> {
        validate(projections)?;

        fs::create_dir_all(&self.target).map_err(|e| io_err(&self.target, e))?;

        let previous = self.current_staging()?;
        if let Some(prev) = previous.as_deref() {
            if self.holds_payload(prev, projections) {
                // A crash after the swap can leave links of removed keys behind.
                self.remove_stale_keys(projections);
                tracing::debug!("unchanged: {}", self.target.display());
                return Ok(PublishOutcome::Unchanged);
            }
        }

        let staging = self.create_staging_dir()?;
        let staging_path = self.target.join(&staging);

        if let Err(err) = self.write_payload(&staging_path, projections) {
            self.discard(&staging_path);
            return Err(err);
        }

        if let Err(err) = self.swap_data_link(&staging) {
            self.discard(&staging_path);
            return Err(err);
        }

        self.link_keys(projections)?;
        self.remove_stale_keys(projections);
        self.prune_staging(&staging, previous.as_deref());

        tracing::info!(
            "published {} file(s) to {} ({})",
            projections.len(),
            self.target.display(),
            staging
        );
        Ok(PublishOutcome::Written)
    }

    /// Name of the staging dir `..data` currently points at, if any.
    pub fn current_staging(&self) -> Result<Option<String>, WriteError> {
        let link = self.target.join(DATA_DIR_NAME);
        match fs::read_link(&link) {
            Ok(dest) => Ok(dest
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(link, err)),
        }
    }

    /// Key → bytes as a reader of the target directory sees them now.
    pub fn current_files(&self) -> Result<BTreeMap<String, Vec<u8>>, WriteError> {
        let mut files = BTreeMap::new();
        let entries = match fs::read_dir(&self.target) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(files),
            Err(err) => return Err(io_err(&self.target, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.target, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            let path = entry.path();
            match fs::read(&path) {
                Ok(bytes) => {
                    files.insert(name, bytes);
                }
                // Dangling link of a key mid-cleanup.
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(path, err)),
            }
        }
        Ok(files)
    }

    /// Remove staging dirs and temp links left behind by an interrupted
    /// publish. Returns how many entries were removed.
    pub fn prune_orphans(&self) -> Result<usize, WriteError> {
        let current = self.current_staging()?;
        let entries = match fs::read_dir(&self.target) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(io_err(&self.target, err)),
        };

        let mut removed = 0usize;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&self.target, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(RESERVED_PREFIX)
                || name == DATA_DIR_NAME
                || Some(&name) == current.as_ref()
            {
                continue;
            }
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(ty) if ty.is_dir() => fs::remove_dir_all(&path),
                Ok(_) => fs::remove_file(&path),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => {
                    tracing::info!("removed orphaned entry {}", path.display());
                    removed += 1;
                }
                Err(err) => tracing::warn!("failed to remove orphan {}: {}", path.display(), err),
            }
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn holds_payload(&self, staging: &str, projections: &[FileProjection]) -> bool {
        let dir = self.target.join(staging);
        let Ok(entries) = fs::read_dir(&dir) else {
            return false;
        };

        let mut on_disk = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { return false };
            let path = entry.path();
            let (Ok(meta), Ok(bytes)) = (fs::metadata(&path), fs::read(&path)) else {
                return false;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            on_disk.push((name, meta.permissions().mode() & 0o7777, bytes));
        }

        let disk_digest = fingerprint_entries(
            on_disk
                .iter()
                .map(|(name, mode, bytes)| (name.as_str(), *mode, bytes.as_slice())),
        );
        if disk_digest != fingerprint(projections) {
            return false;
        }

        projections.iter().all(|p| {
            fs::read_link(self.target.join(&p.path))
                .map(|dest| dest == key_link_target(&p.path))
                .unwrap_or(false)
        })
    }

    fn create_staging_dir(&self) -> Result<String, WriteError> {
        let stamp = Utc::now().format("%Y_%m_%d_%H_%M_%S%.9f").to_string();
        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                format!("{RESERVED_PREFIX}{stamp}")
            } else {
                format!("{RESERVED_PREFIX}{stamp}-{attempt}")
            };
            let path = self.target.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                        .map_err(|e| io_err(&path, e))?;
                    return Ok(name);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(io_err(path, err)),
            }
        }
    }

    fn write_payload(
        &self,
        staging_path: &Path,
        projections: &[FileProjection],
    ) -> Result<(), WriteError> {
        for p in projections {
            let path = staging_path.join(&p.path);
            self.sink
                .write_file(&path, &p.content, p.mode)
                .map_err(|e| io_err(&path, e))?;
        }
        sync_dir(staging_path)
    }

    fn swap_data_link(&self, staging: &str) -> Result<(), WriteError> {
        let tmp = self.target.join(DATA_DIR_TMP_NAME);
        remove_if_present(&tmp)?;
        std::os::unix::fs::symlink(staging, &tmp).map_err(|e| io_err(&tmp, e))?;

        let data = self.target.join(DATA_DIR_NAME);
        if let Err(e) = fs::rename(&tmp, &data) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(data, e));
        }
        // Best effort: persist the rename itself.
        let _ = sync_dir(&self.target);
        Ok(())
    }

    fn link_keys(&self, projections: &[FileProjection]) -> Result<(), WriteError> {
        for p in projections {
            let link = self.target.join(&p.path);
            let want = key_link_target(&p.path);
            if fs::read_link(&link).map(|dest| dest == want).unwrap_or(false) {
                continue;
            }

            let tmp = self.target.join(format!("{RESERVED_PREFIX}link_tmp.{}", p.path));
            remove_if_present(&tmp)?;
            std::os::unix::fs::symlink(&want, &tmp).map_err(|e| io_err(&tmp, e))?;
            if let Err(e) = fs::rename(&tmp, &link) {
                let _ = fs::remove_file(&tmp);
                return Err(io_err(link, e));
            }
        }
        Ok(())
    }

    fn remove_stale_keys(&self, projections: &[FileProjection]) {
        let keep: HashSet<&str> = projections.iter().map(|p| p.path.as_str()).collect();
        let entries = match fs::read_dir(&self.target) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("cannot list {} for cleanup: {}", self.target.display(), err);
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(RESERVED_PREFIX) || keep.contains(name.as_str()) {
                continue;
            }
            let path = entry.path();
            // Only links this writer created; foreign files are left alone.
            let managed = fs::read_link(&path)
                .map(|dest| dest.starts_with(DATA_DIR_NAME))
                .unwrap_or(false);
            if !managed {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("removed stale key {}", path.display()),
                Err(err) => tracing::warn!("failed to remove stale key {}: {}", path.display(), err),
            }
        }
    }

    fn prune_staging(&self, current: &str, previous: Option<&str>) {
        let entries = match fs::read_dir(&self.target) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!("cannot list {} for pruning: {}", self.target.display(), err);
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(RESERVED_PREFIX) || name == current || Some(name.as_str()) == previous
            {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => tracing::debug!("pruned staging dir {}", path.display()),
                Err(err) => tracing::warn!("failed to prune {}: {}", path.display(), err),
            }
        }
    }

    fn discard(&self, staging_path: &Path) {
        if let Err(err) = fs::remove_dir_all(staging_path) {
            tracing::warn!(
                "failed to remove staging dir {}: {}",
                staging_path.display(),
                err
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn key_link_target(key: &str) -> PathBuf {
    Path::new(DATA_DIR_NAME).join(key)
}

fn validate(projections: &[FileProjection]) -> Result<(), WriteError> {
    let mut seen = HashSet::new();
    for p in projections {
        let reason = if p.path.is_empty() {
            Some("path is empty")
        } else if p.path == "." || p.path == ".." {
            Some("path is a directory reference")
        } else if p.path.contains('/') {
            Some("path must not contain '/'")
        } else if p.path.contains('\0') {
            Some("path must not contain NUL")
        } else if p.path.starts_with(RESERVED_PREFIX) {
            Some("path must not start with '..'")
        } else if !seen.insert(p.path.as_str()) {
            Some("duplicate path")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(WriteError::InvalidPath {
                path: p.path.clone(),
                reason,
            });
        }
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), WriteError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

fn sync_dir(path: &Path) -> Result<(), WriteError> {
    fs::File::open(path)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| io_err(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
