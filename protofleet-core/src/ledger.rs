//! Content-addressed ledger of schema artifacts.
//!
//! Maps an artifact path to its digest and bytes. The in-memory set is
//! mirrored on disk in two places:
//! - every artifact's bytes at `<root>/<path>`
//! - a flat snapshot `<root>/.sums` with one `path:digest` line per entry,
//!   regenerated in full after every mutation
//!
//! Bytes of entries loaded from a snapshot are read lazily on first access.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::digest::digest;
use crate::error::LedgerError;
use crate::manifest::{self, Manifest, ManifestRecord, SEPARATOR};
use crate::walker::{discover, WalkOptions};
use crate::Result;

/// Snapshot file name, relative to the ledger root.
pub const SNAPSHOT_FILE: &str = ".sums";
const SNAPSHOT_TMP: &str = ".sums.tmp";

/// One ledger record with its bytes loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub digest: String,
    pub content: Bytes,
}

#[derive(Debug, Clone)]
struct Slot {
    digest: String,
    content: Option<Bytes>,
}

pub struct Ledger {
    root: PathBuf,
    extension: Option<String>,
    slots: RwLock<BTreeMap<String, Slot>>,
    /// Serializes every disk mutation (artifact writes and snapshot rewrites)
    writer: Mutex<()>,
}

impl Ledger {
    /// Ledger over every file below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: None,
            slots: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Ledger whose directory scan only picks up files ending in `.{extension}`.
    /// An empty extension disables the filter.
    pub fn with_extension(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let mut ledger = Self::new(root);
        ledger.extension = (!extension.is_empty()).then_some(extension);
        ledger
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    /// Load the ledger: from the snapshot when one exists, otherwise by
    /// scanning and hashing the root directory and writing a fresh snapshot.
    pub async fn bootstrap(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| LedgerError::io(&self.root, e))?;

        let snapshot = self.snapshot_path();
        match tokio::fs::read_to_string(&snapshot).await {
            Ok(text) => {
                let slots = parse_snapshot(&text);
                info!(
                    "Loaded {} ledger entries from {}",
                    slots.len(),
                    snapshot.display()
                );
                *self.slots.write().await = slots;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let count = self.reindex().await?;
                info!("Indexed {} artifacts under {}", count, self.root.display());
                Ok(())
            }
            Err(e) => Err(LedgerError::io(snapshot, e)),
        }
    }

    /// Discard the in-memory set, rescan the root and rewrite the snapshot.
    pub async fn reindex(&self) -> Result<usize> {
        let _writer = self.writer.lock().await;

        let root = self.root.clone();
        let options = self.walk_options();
        let scanned = tokio::task::spawn_blocking(move || scan(&root, &options))
            .await
            .map_err(|e| LedgerError::io(&self.root, std::io::Error::other(e)))??;

        let count = scanned.len();
        *self.slots.write().await = scanned;
        self.write_snapshot().await?;
        Ok(count)
    }

    /// Store `content` under `path` and return its digest.
    pub async fn store(&self, path: &str, content: impl Into<Bytes>) -> Result<String> {
        validate_path(path)?;
        let content = content.into();
        let digest = digest(&content);

        let _writer = self.writer.lock().await;

        self.slots.write().await.insert(
            path.to_string(),
            Slot {
                digest: digest.clone(),
                content: Some(content.clone()),
            },
        );

        let full_path = self.root.join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::io(parent, e))?;
        }
        tokio::fs::write(&full_path, &content)
            .await
            .map_err(|e| LedgerError::io(&full_path, e))?;

        self.write_snapshot().await?;

        debug!(path = %path, digest = %digest, size = content.len(), "Stored artifact");
        Ok(digest)
    }

    /// Fetch an entry, reading its bytes from disk if not loaded yet.
    pub async fn get(&self, path: &str) -> Result<Entry> {
        let slot = self
            .slots
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(path.to_string()))?;

        if let Some(content) = slot.content {
            return Ok(Entry {
                path: path.to_string(),
                digest: slot.digest,
                content,
            });
        }

        let full_path = self.root.join(path);
        let content = Bytes::from(
            tokio::fs::read(&full_path)
                .await
                .map_err(|e| LedgerError::io(&full_path, e))?,
        );
        let actual = digest(&content);

        let mut slots = self.slots.write().await;
        let digest = match slots.get_mut(path) {
            Some(current) if current.digest == slot.digest => {
                if !current.digest.is_empty() && current.digest != actual {
                    warn!(
                        path = %path,
                        expected = %current.digest,
                        actual = %actual,
                        "Artifact on disk does not match snapshot digest"
                    );
                }
                current.digest = actual;
                current.content = Some(content.clone());
                current.digest.clone()
            }
            _ => slot.digest,
        };

        Ok(Entry {
            path: path.to_string(),
            digest,
            content,
        })
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.slots.read().await.contains_key(path)
    }

    pub async fn digest_of(&self, path: &str) -> Result<String> {
        self.slots
            .read()
            .await
            .get(path)
            .map(|slot| slot.digest.clone())
            .ok_or_else(|| LedgerError::NotFound(path.to_string()))
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    pub async fn paths(&self) -> Vec<String> {
        self.slots.read().await.keys().cloned().collect()
    }

    /// Every entry as a `path:digest` manifest record, sorted by path.
    pub async fn manifest(&self) -> Manifest {
        self.slots
            .read()
            .await
            .iter()
            .map(|(path, slot)| ManifestRecord::new(path.clone(), slot.digest.clone()))
            .collect()
    }

    /// The snapshot file contents for the current in-memory set.
    pub async fn snapshot_text(&self) -> String {
        self.slots
            .read()
            .await
            .iter()
            .map(|(path, slot)| format!("{}{}{}", path, SEPARATOR, slot.digest))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rewrite the snapshot, empty when the set is. Callers hold the writer lock.
    async fn write_snapshot(&self) -> Result<()> {
        let text = self.snapshot_text().await;
        let tmp_path = self.root.join(SNAPSHOT_TMP);
        let snapshot = self.snapshot_path();
        tokio::fs::write(&tmp_path, text.as_bytes())
            .await
            .map_err(|e| LedgerError::io(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &snapshot)
            .await
            .map_err(|e| LedgerError::io(&snapshot, e))?;
        Ok(())
    }

    fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            extension: self.extension.clone(),
            skip_names: vec![SNAPSHOT_FILE.to_string(), SNAPSHOT_TMP.to_string()],
        }
    }
}

/// Check that `path` is a usable ledger key.
pub fn validate_path(path: &str) -> Result<()> {
    let invalid = |reason| {
        Err(LedgerError::Validation {
            path: path.to_string(),
            reason,
        })
    };

    if path.is_empty() {
        return invalid("empty path");
    }
    if path.starts_with('/') || path.contains('\\') {
        return invalid("must be a relative '/'-separated path");
    }
    if path.contains('\n') || path.contains('\r') {
        return invalid("contains a line break");
    }
    if path
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return invalid("contains an empty, '.' or '..' component");
    }
    if path == SNAPSHOT_FILE || path == SNAPSHOT_TMP {
        return invalid("reserved name");
    }
    Ok(())
}

fn parse_snapshot(text: &str) -> BTreeMap<String, Slot> {
    text.lines()
        .filter_map(manifest::parse_line)
        .map(|record| {
            (
                record.path,
                Slot {
                    digest: record.tag,
                    content: None,
                },
            )
        })
        .collect()
}

fn scan(root: &Path, options: &WalkOptions) -> Result<BTreeMap<String, Slot>> {
    let files = discover(root, options).map_err(|e| LedgerError::io(root, e))?;

    let mut slots = BTreeMap::new();
    for file in files {
        let content =
            Bytes::from(std::fs::read(&file.path).map_err(|e| LedgerError::io(&file.path, e))?);
        slots.insert(
            file.key,
            Slot {
                digest: digest(&content),
                content: Some(content),
            },
        );
    }
    Ok(slots)
}
