//! Persistent tag cache using redb.
//!
//! Strategy: cache parsed tags per file, keyed by relative path, validated by
//! the file's on-disk mtime. A hit with matching mtime skips parsing entirely.
//!
//! Cache structure:
//! - Database: `.repomap.tags.cache.v4/tags.redb` at the repository root
//! - `tags` table: relative path -> bincode-serialized [`CacheEntry`]
//! - `meta` table: schema version; a mismatch wipes the tags table on open
//!
//! The backing store sits behind [`TagStore`]. [`TagCache`] starts on a
//! [`DurableStore`] and swaps to a [`MemoryStore`] when the durable one cannot
//! be opened or recreated. Either way the caller gets correct tags.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use anyhow::{Context, Result};
use dashmap::DashMap;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::config::CACHE_VERSION;
use crate::diagnostics::{Diagnostics, Warning};
use crate::extraction::TagParser;
use crate::types::Tag;

/// Table definition for tag cache.
/// Key = file path (relative), Value = serialized CacheEntry
const TAGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tags");

/// Schema metadata. Holds a single `version` row.
const META_TABLE: TableDefinition<&str, u32> = TableDefinition::new("meta");
const VERSION_KEY: &str = "version";

/// Directory name of the tag cache, namespaced by schema version.
pub fn cache_dir_name() -> String {
    format!(".repomap.tags.cache.v{}", CACHE_VERSION)
}

/// Cache entry containing mtime validation data + parsed tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Modification time seconds since UNIX_EPOCH
    pub mtime_secs: u64,
    /// Modification time nanoseconds component
    pub mtime_nanos: u32,
    pub tags: Vec<Tag>,
}

impl CacheEntry {
    /// Create entry from SystemTime and tags
    pub fn new(mtime: SystemTime, tags: Vec<Tag>) -> Result<Self> {
        let duration = mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .context("File mtime is before UNIX_EPOCH")?;

        Ok(Self {
            mtime_secs: duration.as_secs(),
            mtime_nanos: duration.subsec_nanos(),
            tags,
        })
    }

    /// Check if this entry's mtime matches the given mtime
    pub fn is_valid(&self, mtime: SystemTime) -> bool {
        let Ok(duration) = mtime.duration_since(SystemTime::UNIX_EPOCH) else {
            return false;
        };

        self.mtime_secs == duration.as_secs() && self.mtime_nanos == duration.subsec_nanos()
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("Failed to serialize cache entry")
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("Failed to deserialize cache entry")
    }
}

/// Key-value backing store for tag cache entries.
pub trait TagStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    fn set(&self, key: &str, entry: &CacheEntry) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
    /// (entries, approximate bytes)
    fn usage(&self) -> Result<(usize, u64)>;
    /// Short backend name for stats output
    fn backend(&self) -> &'static str;
}

/// redb-backed store living in the cache directory.
pub struct DurableStore {
    /// redb database handle (thread-safe)
    db: Database,
}

impl DurableStore {
    /// Open or create `<cache_dir>/tags.redb` and check the schema version.
    pub fn open(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;

        let db_path = cache_dir.join("tags.redb");
        let db = Database::create(&db_path)
            .with_context(|| format!("Failed to open cache database: {}", db_path.display()))?;

        let store = Self { db };
        store.check_version()?;
        Ok(store)
    }

    /// Wipe the tags table when the stored schema version differs.
    fn check_version(&self) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write transaction")?;
        {
            let mut meta = write_txn.open_table(META_TABLE).context("Failed to open meta table")?;
            let stored = meta.get(VERSION_KEY)?.map(|v| v.value());

            if stored != Some(CACHE_VERSION) {
                if stored.is_some() {
                    tracing::debug!("tag cache schema changed ({:?} -> {}), clearing", stored, CACHE_VERSION);
                    write_txn.delete_table(TAGS_TABLE).context("Failed to drop stale tags table")?;
                }
                meta.insert(VERSION_KEY, CACHE_VERSION)?;
            }
        }
        // Make sure the tags table exists so read transactions can open it
        write_txn.open_table(TAGS_TABLE).context("Failed to open tags table")?;
        write_txn.commit().context("Failed to commit schema version")?;
        Ok(())
    }

    #[cfg(test)]
    fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TAGS_TABLE)?;
            table.insert(key, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl TagStore for DurableStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let read_txn = self.db.begin_read().context("Failed to begin read transaction")?;
        let table = read_txn.open_table(TAGS_TABLE).context("Failed to open tags table")?;

        match table.get(key)? {
            Some(guard) => Ok(Some(CacheEntry::from_bytes(guard.value())?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let bytes = entry.to_bytes()?;

        let write_txn = self.db.begin_write().context("Failed to begin write transaction")?;
        {
            let mut table = write_txn.open_table(TAGS_TABLE).context("Failed to open tags table")?;
            table
                .insert(key, bytes.as_slice())
                .with_context(|| format!("Failed to insert cache entry for {}", key))?;
        }
        write_txn.commit().context("Failed to commit cache write")?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write transaction")?;
        {
            let mut table = write_txn.open_table(TAGS_TABLE).context("Failed to open tags table")?;
            table.remove(key).with_context(|| format!("Failed to remove cache entry for {}", key))?;
        }
        write_txn.commit().context("Failed to commit cache removal")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction for clear")?;
        write_txn.delete_table(TAGS_TABLE).context("Failed to drop tags table")?;
        write_txn.open_table(TAGS_TABLE).context("Failed to recreate tags table")?;
        write_txn.commit().context("Failed to commit cache clear")?;
        Ok(())
    }

    fn usage(&self) -> Result<(usize, u64)> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TAGS_TABLE)?;

        let entries = table.len()? as usize;
        let mut size_bytes = 0u64;
        for row in table.iter()? {
            let (k, v) = row?;
            size_bytes += (k.value().len() + v.value().len()) as u64;
        }
        Ok((entries, size_bytes))
    }

    fn backend(&self) -> &'static str {
        "redb"
    }
}

/// Volatile store used when the durable one is unavailable.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().unwrap_or_else(|p| p.into_inner()).clear();
        Ok(())
    }

    fn usage(&self) -> Result<(usize, u64)> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let size = entries
            .iter()
            .map(|(k, v)| k.len() as u64 + bincode::serialized_size(v).unwrap_or(0))
            .sum();
        Ok((entries.len(), size))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// mtime-validated tag cache with self-healing storage.
pub struct TagCache {
    /// Path to cache directory (`.repomap.tags.cache.v4/`)
    cache_dir: PathBuf,
    store: RwLock<Arc<dyn TagStore>>,
    /// Set once the single recreate attempt has been spent
    recreated: AtomicBool,
    /// Set once the cache warning has been emitted
    warned: AtomicBool,
    /// Per-file locks serializing read-parse-write for one key
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    diagnostics: Diagnostics,
}

impl TagCache {
    /// Open the tag cache under `root`, recovering from a broken store.
    ///
    /// Never fails: if the durable store can't be opened or recreated, the
    /// cache runs in memory for the rest of the process.
    pub fn open(root: &Path, diagnostics: Diagnostics) -> Self {
        let cache_dir = root.join(cache_dir_name());
        let cache = Self::with_store(&cache_dir, Arc::new(MemoryStore::new()), diagnostics);

        match DurableStore::open(&cache_dir) {
            Ok(store) => cache.install(Arc::new(store)),
            Err(err) => cache.recover(&err),
        }
        cache
    }

    /// Build a cache over an explicit backing store.
    pub fn with_store(cache_dir: &Path, store: Arc<dyn TagStore>, diagnostics: Diagnostics) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            store: RwLock::new(store),
            recreated: AtomicBool::new(false),
            warned: AtomicBool::new(false),
            key_locks: DashMap::new(),
            diagnostics,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Name of the store currently in use ("redb" or "memory").
    pub fn backend(&self) -> &'static str {
        self.current().backend()
    }

    fn current(&self) -> Arc<dyn TagStore> {
        self.store.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn install(&self, store: Arc<dyn TagStore>) {
        *self.store.write().unwrap_or_else(|p| p.into_inner()) = store;
    }

    fn warn_once(&self, reason: String) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            self.diagnostics.warn(Warning::Cache { reason });
        }
    }

    /// Delete and recreate the durable store once; afterwards go in-memory.
    fn recover(&self, err: &anyhow::Error) {
        tracing::debug!("tag cache failure: {:#}", err);

        if !self.recreated.swap(true, Ordering::SeqCst) {
            if self.cache_dir.exists() {
                let _ = fs::remove_dir_all(&self.cache_dir);
            }
            match DurableStore::open(&self.cache_dir) {
                Ok(store) => {
                    self.install(Arc::new(store));
                    self.warn_once(format!("{:#}; store recreated", err));
                    return;
                }
                Err(retry_err) => {
                    tracing::debug!("tag cache recreate failed: {:#}", retry_err);
                }
            }
        }

        self.install(Arc::new(MemoryStore::new()));
        self.warn_once(format!("{:#}; using in-memory cache", err));
    }

    /// Run a store operation, recovering and retrying on failure.
    ///
    /// Returns `None` only if even the in-memory store failed.
    fn with_store_op<T>(&self, op: impl Fn(&dyn TagStore) -> Result<T>) -> Option<T> {
        let store = self.current();
        let err = match op(store.as_ref()) {
            Ok(value) => return Some(value),
            Err(err) => err,
        };

        self.recover(&err);
        let store = self.current();
        match op(store.as_ref()) {
            Ok(value) => Some(value),
            Err(err) => {
                // Recreated store failed right away; stop trusting disk
                let memory: Arc<dyn TagStore> = Arc::new(MemoryStore::new());
                self.install(memory.clone());
                self.warn_once(format!("{:#}; using in-memory cache", err));
                op(memory.as_ref()).ok()
            }
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.key_locks.entry(key.to_string()).or_default().clone()
    }

    /// Get tags for a file, parsing only when the cached entry is stale.
    ///
    /// The mtime is always read from the filesystem. A vanished or
    /// unreadable file is reported once and yields no tags.
    pub fn get(&self, path: &Path, rel_fname: &str, parser: &dyn TagParser) -> Vec<Tag> {
        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(err) => {
                self.diagnostics.warn(Warning::FileAccess {
                    path: rel_fname.to_string(),
                    reason: err.to_string(),
                });
                return Vec::new();
            }
        };

        let lock = self.key_lock(rel_fname);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(Some(entry)) = self.with_store_op(|s| s.get(rel_fname)) {
            if entry.is_valid(mtime) {
                return entry.tags;
            }
        }

        let tags = match parser.parse(path, rel_fname) {
            Ok(tags) => tags,
            Err(err) if is_io_error(&err) => {
                self.diagnostics.warn(Warning::FileAccess {
                    path: rel_fname.to_string(),
                    reason: format!("{:#}", err),
                });
                return Vec::new();
            }
            Err(err) => {
                // Unparseable: cached as tagless so it isn't retried until it changes
                tracing::debug!("no tags for {}: {:#}", rel_fname, err);
                Vec::new()
            }
        };

        match CacheEntry::new(mtime, tags.clone()) {
            Ok(entry) => {
                self.with_store_op(|s| s.set(rel_fname, &entry));
            }
            Err(err) => tracing::debug!("not caching {}: {:#}", rel_fname, err),
        }
        tags
    }

    /// Drop the stored entry for a file.
    pub fn invalidate(&self, rel_fname: &str) {
        let lock = self.key_lock(rel_fname);
        let _guard = lock.lock().unwrap_or_else(|p| p.into_inner());
        self.with_store_op(|s| s.remove(rel_fname));
    }

    /// True when a stored entry exists and matches the file's current mtime.
    pub fn is_fresh(&self, path: &Path, rel_fname: &str) -> bool {
        let Ok(mtime) = fs::metadata(path).and_then(|m| m.modified()) else {
            return false;
        };
        matches!(
            self.with_store_op(|s| s.get(rel_fname)),
            Some(Some(entry)) if entry.is_valid(mtime)
        )
    }

    /// Clear all cached data.
    pub fn clear(&self) -> Result<()> {
        self.current().clear()
    }

    /// Get cache statistics for monitoring and debugging.
    pub fn stats(&self) -> CacheStats {
        let store = self.current();
        let (entries, size_bytes) = store.usage().unwrap_or_default();
        CacheStats { entries, size_bytes, backend: store.backend() }
    }
}

/// True when a parse failure came from reading the file.
fn is_io_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of files in cache
    pub entries: usize,
    /// Approximate total size in bytes (keys + values)
    pub size_bytes: u64,
    pub backend: &'static str,
}

impl CacheStats {
    /// Format size in human-readable form (KB, MB, GB)
    pub fn size_human(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;

        if self.size_bytes >= GB {
            format!("{:.2} GB", self.size_bytes as f64 / GB as f64)
        } else if self.size_bytes >= MB {
            format!("{:.2} MB", self.size_bytes as f64 / MB as f64)
        } else if self.size_bytes >= KB {
            format!("{:.2} KB", self.size_bytes as f64 / KB as f64)
        } else {
            format!("{} B", self.size_bytes)
        }
    }
}
