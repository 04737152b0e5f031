//! Tagged build caches.
//!
//! A cache entry is a directory identified by a human-readable tag (e.g.
//! `"npm modules"`) and guarded by an invalidation key. Acquiring a tag with
//! the same key returns the existing directory; any other key discards the
//! old contents first. There is at most one live entry per tag.
//!
//! On disk:
//!
//! ```text
//! <root>/<slug>-<hash>/
//!     entry.toml     # tag, key and whether the fill finished
//!     data/          # contents owned by the plugin
//! ```
//!
//! A missed entry is recorded as incomplete until [`CacheManager::populate`]
//! succeeds, so a build that dies mid-fill leaves nothing that can hit.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::core::error::{BuildError, Classify};
use crate::util::fs::{dir_size, ensure_dir, remove_dir_all_if_exists};
use crate::util::hash::sha256_str;

const METADATA_FILE: &str = "entry.toml";
const DATA_DIR: &str = "data";

/// A directory handed out by [`CacheManager::acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Tag the entry was acquired under
    pub tag: String,
    /// Invalidation key
    pub key: String,
    /// Directory the plugin owns
    pub dir: PathBuf,
    /// Whether the previous contents were kept
    pub hit: bool,
}

impl CacheEntry {
    /// The data directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }
}

/// A live entry as found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub tag: String,
    pub key: String,
    pub dir: PathBuf,
    /// Size of the data directory in bytes
    pub size: u64,
    /// Whether the entry was filled successfully
    pub complete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    tag: String,
    key: String,
    #[serde(default)]
    complete: bool,
}

/// Owns the cache root and hands out tagged entries.
///
/// Acquisitions on the same tag are serialized; distinct tags never contend.
#[derive(Debug)]
pub struct CacheManager {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheManager {
    /// Create a manager rooted at `root`. Nothing is created until first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheManager {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the entry for `tag`, keeping its contents only when the stored
    /// key equals `key`.
    pub fn acquire(&self, tag: &str, key: &str) -> Result<CacheEntry, BuildError> {
        let lock = self.tag_lock(tag)?;
        let _guard = lock
            .lock()
            .map_err(|_| BuildError::internal(format!("cache lock for {:?} poisoned", tag)))?;

        let entry_dir = self.entry_dir(tag);
        let data_dir = entry_dir.join(DATA_DIR);

        if let Some(meta) = read_metadata(&entry_dir) {
            if meta.tag == tag && meta.key == key && meta.complete && data_dir.is_dir() {
                tracing::debug!(tag, "cache hit");
                return Ok(CacheEntry {
                    tag: tag.to_string(),
                    key: key.to_string(),
                    dir: data_dir,
                    hit: true,
                });
            }
            tracing::debug!(
                tag,
                old_key = %meta.key,
                new_key = %key,
                complete = meta.complete,
                "cache entry not reusable"
            );
        }

        remove_dir_all_if_exists(&entry_dir)
            .internal_err(format!("clearing cache entry {:?}", tag))?;
        ensure_dir(&data_dir).internal_err(format!("creating cache entry {:?}", tag))?;
        write_metadata(
            &entry_dir,
            &EntryMetadata {
                tag: tag.to_string(),
                key: key.to_string(),
                complete: false,
            },
        )?;

        tracing::debug!(tag, "cache miss");
        Ok(CacheEntry {
            tag: tag.to_string(),
            key: key.to_string(),
            dir: data_dir,
            hit: false,
        })
    }

    /// Fill an entry and mark it complete. If `fill` fails the entry is
    /// invalidated before the error is returned.
    pub fn populate<T, F>(&self, entry: &CacheEntry, fill: F) -> Result<T, BuildError>
    where
        F: FnOnce(&Path) -> Result<T, BuildError>,
    {
        match fill(&entry.dir) {
            Ok(value) => {
                self.mark_complete(entry)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(cleanup) = self.invalidate(&entry.tag) {
                    tracing::warn!("failed to invalidate cache entry {:?}: {}", entry.tag, cleanup);
                }
                Err(err)
            }
        }
    }

    /// Discard the entry for `tag`, if any.
    pub fn invalidate(&self, tag: &str) -> Result<(), BuildError> {
        let lock = self.tag_lock(tag)?;
        let _guard = lock
            .lock()
            .map_err(|_| BuildError::internal(format!("cache lock for {:?} poisoned", tag)))?;

        remove_dir_all_if_exists(&self.entry_dir(tag))
            .internal_err(format!("invalidating cache entry {:?}", tag))
    }

    /// List live entries, sorted by tag.
    pub fn entries(&self) -> Result<Vec<StoredEntry>, BuildError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let read = fs::read_dir(&self.root)
            .internal_err(format!("reading cache root {}", self.root.display()))?;
        for dirent in read {
            let dirent = dirent.internal_err("reading cache root")?;
            let path = dirent.path();
            let Some(meta) = read_metadata(&path) else {
                continue;
            };
            let data = path.join(DATA_DIR);
            entries.push(StoredEntry {
                size: dir_size(&data),
                tag: meta.tag,
                key: meta.key,
                dir: data,
                complete: meta.complete,
            });
        }

        entries.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(entries)
    }

    /// Remove every entry.
    pub fn clear(&self) -> Result<(), BuildError> {
        remove_dir_all_if_exists(&self.root)
            .internal_err(format!("removing cache root {}", self.root.display()))
    }

    fn mark_complete(&self, entry: &CacheEntry) -> Result<(), BuildError> {
        let lock = self.tag_lock(&entry.tag)?;
        let _guard = lock
            .lock()
            .map_err(|_| BuildError::internal(format!("cache lock for {:?} poisoned", entry.tag)))?;

        let entry_dir = self.entry_dir(&entry.tag);
        match read_metadata(&entry_dir) {
            Some(meta) if meta.tag == entry.tag && meta.key == entry.key => write_metadata(
                &entry_dir,
                &EntryMetadata {
                    complete: true,
                    ..meta
                },
            ),
            _ => {
                tracing::debug!(tag = %entry.tag, "cache entry replaced while filling");
                Ok(())
            }
        }
    }

    fn tag_lock(&self, tag: &str) -> Result<Arc<Mutex<()>>, BuildError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| BuildError::internal("cache lock table poisoned"))?;
        Ok(locks.entry(tag.to_string()).or_default().clone())
    }

    fn entry_dir(&self, tag: &str) -> PathBuf {
        self.root.join(entry_dir_name(tag))
    }
}

/// Directory name for a tag: a readable slug plus a hash of the exact tag.
fn entry_dir_name(tag: &str) -> String {
    let mut slug = String::with_capacity(tag.len());
    for c in tag.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let hash = sha256_str(tag);
    if slug.is_empty() {
        hash[..12].to_string()
    } else {
        format!("{}-{}", slug, &hash[..12])
    }
}

fn read_metadata(entry_dir: &Path) -> Option<EntryMetadata> {
    let contents = fs::read_to_string(entry_dir.join(METADATA_FILE)).ok()?;
    match toml::from_str(&contents) {
        Ok(meta) => Some(meta),
        Err(e) => {
            tracing::debug!("ignoring unreadable cache metadata in {}: {}", entry_dir.display(), e);
            None
        }
    }
}

fn write_metadata(entry_dir: &Path, meta: &EntryMetadata) -> Result<(), BuildError> {
    let contents = toml::to_string(meta).internal_err("serializing cache metadata")?;

    // Written beside the target and renamed so readers never see a torn file.
    let mut tmp = tempfile::NamedTempFile::new_in(entry_dir)
        .internal_err("creating cache metadata")?;
    tmp.write_all(contents.as_bytes())
        .internal_err("writing cache metadata")?;
    tmp.persist(entry_dir.join(METADATA_FILE))
        .map_err(|e| e.error)
        .internal_err("writing cache metadata")?;
    Ok(())
}
