use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DriveError;

/// Manifest format version. A mismatch on load discards the cache.
const MANIFEST_VERSION: u32 = 1;

/// File name of the persisted manifest inside the cache directory.
const MANIFEST_FILE: &str = "manifest.json";

/// Metadata for one cached document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Document id this entry belongs to.
    pub document_id: String,
    /// Size of the backing file in bytes.
    pub size: u64,
    /// blake3 hex digest of the content. Stale while `dirty` is set.
    pub content_hash: String,
    /// Last time the entry was read or written.
    pub last_accessed: DateTime<Utc>,
    /// Local edits not yet uploaded. Dirty entries are never evicted.
    pub dirty: bool,
}

/// Configuration for the file cache.
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// Directory holding shard subdirectories and the manifest.
    pub root: PathBuf,
    /// Maximum total size of cached content in bytes.
    pub max_size: u64,
    /// Delay after the last mutation before the manifest is persisted.
    pub persist_debounce: Duration,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        FileCacheConfig {
            root: PathBuf::from(".matterfs-cache"),
            max_size: 1024 * 1024 * 1024,
            persist_debounce: Duration::from_secs(5),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub entries: usize,
    /// Total size of cached content in bytes.
    pub total_size: u64,
    /// Configured size limit in bytes.
    pub max_size: u64,
    /// Number of entries with unsynced local edits.
    pub dirty: usize,
}

/// Result of a `verify()` pass.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Entries whose content matched their recorded hash (or were dirty).
    pub valid: usize,
    /// Entries dropped because the content hash no longer matched.
    pub invalid: usize,
    /// Entries dropped because the backing file was missing.
    pub missing: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    entries: Vec<CacheEntry>,
    total_size: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
}

/// Durable, size-bounded local store for document content.
///
/// Backing bytes live under `<root>/<hh>/<hash>` where `hash` is the blake3
/// digest of the document id and `hh` its first two hex characters, bounding
/// per-directory fan-out. Visible files are only ever produced by an atomic
/// temp-write-then-rename, so a crash can truncate a temp file but never a
/// cached document.
pub struct FileCache {
    config: FileCacheConfig,
    state: Arc<RwLock<CacheState>>,
    /// Set on every metadata mutation; drained by the persist task.
    mutated_at: Arc<std::sync::Mutex<Option<Instant>>>,
    persist_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<RwLock<bool>>,
}

impl FileCache {
    /// Open a cache rooted at `config.root`, loading the persisted manifest.
    /// A manifest with a different version discards the cache contents.
    pub async fn open(config: FileCacheConfig) -> Result<Self, DriveError> {
        tokio::fs::create_dir_all(&config.root).await?;

        let manifest_path = config.root.join(MANIFEST_FILE);
        let mut state = CacheState::default();

        match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => match serde_json::from_slice::<Manifest>(&bytes) {
                Ok(manifest) if manifest.version == MANIFEST_VERSION => {
                    state.total_size = manifest.total_size;
                    state.entries = manifest
                        .entries
                        .into_iter()
                        .map(|e| (e.document_id.clone(), e))
                        .collect();
                    info!(entries = state.entries.len(), "loaded cache manifest");
                }
                Ok(manifest) => {
                    warn!(
                        found = manifest.version,
                        expected = MANIFEST_VERSION,
                        "cache manifest version mismatch, discarding cache"
                    );
                    clear_cache_dir(&config.root).await;
                }
                Err(e) => {
                    warn!("cache manifest unreadable ({}), discarding cache", e);
                    clear_cache_dir(&config.root).await;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(FileCache {
            config,
            state: Arc::new(RwLock::new(state)),
            mutated_at: Arc::new(std::sync::Mutex::new(None)),
            persist_handle: Mutex::new(None),
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Check whether a document has a cache entry.
    pub async fn is_cached(&self, document_id: &str) -> bool {
        self.state.read().await.entries.contains_key(document_id)
    }

    /// Get a snapshot of a single entry.
    pub async fn entry(&self, document_id: &str) -> Option<CacheEntry> {
        self.state.read().await.entries.get(document_id).cloned()
    }

    /// Store the full content of a document, evicting clean entries as
    /// needed. Fails with `CacheFull` when the remaining resident set is
    /// entirely dirty and the content still does not fit.
    pub async fn store(&self, document_id: &str, bytes: &[u8]) -> Result<(), DriveError> {
        self.store_inner(document_id, bytes, false).await
    }

    /// Store content that originated from a local edit observed outside the
    /// bridge (the shallow-mount watcher path): the entry starts dirty so it
    /// survives eviction until uploaded.
    pub async fn store_dirty(&self, document_id: &str, bytes: &[u8]) -> Result<(), DriveError> {
        self.store_inner(document_id, bytes, true).await
    }

    async fn store_inner(
        &self,
        document_id: &str,
        bytes: &[u8],
        dirty: bool,
    ) -> Result<(), DriveError> {
        let incoming = bytes.len() as u64;
        let content_hash = blake3::hash(bytes).to_hex().to_string();

        let mut state = self.state.write().await;

        // Drop any previous version of this document before making room.
        if let Some(old) = state.entries.remove(document_id) {
            state.total_size -= old.size;
        }

        self.evict_for(&mut state, incoming).await?;

        let path = self.blob_path(document_id);
        write_atomic(&path, bytes).await?;

        state.entries.insert(
            document_id.to_string(),
            CacheEntry {
                document_id: document_id.to_string(),
                size: incoming,
                content_hash,
                last_accessed: Utc::now(),
                dirty,
            },
        );
        state.total_size += incoming;
        drop(state);

        debug!(document_id, size = incoming, "stored document in cache");
        self.mark_mutated();
        Ok(())
    }

    /// Create an empty cache entry for a freshly created document.
    pub async fn create_empty(&self, document_id: &str) -> Result<(), DriveError> {
        self.store(document_id, &[]).await
    }

    /// Read up to `length` bytes starting at `offset`, truncated to the
    /// remaining length. Refreshes the entry's access time.
    pub async fn read(
        &self,
        document_id: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, DriveError> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(document_id)
            .ok_or_else(|| DriveError::NotCached(document_id.to_string()))?;
        entry.last_accessed = Utc::now();
        let size = entry.size;
        drop(state);

        if offset >= size {
            self.mark_mutated();
            return Ok(Vec::new());
        }
        let to_read = length.min(size - offset);

        let mut file = tokio::fs::File::open(self.blob_path(document_id)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; to_read as usize];
        file.read_exact(&mut buf).await?;

        self.mark_mutated();
        Ok(buf)
    }

    /// Read the entire content of a document.
    pub async fn read_full(&self, document_id: &str) -> Result<Vec<u8>, DriveError> {
        let size = {
            let state = self.state.read().await;
            state
                .entries
                .get(document_id)
                .ok_or_else(|| DriveError::NotCached(document_id.to_string()))?
                .size
        };
        self.read(document_id, 0, size).await
    }

    /// Write bytes at an offset into an existing entry, extending it if the
    /// write reaches past the current end. Marks the entry dirty; upload is
    /// the sync engine's job once notified.
    pub async fn write(
        &self,
        document_id: &str,
        bytes: &[u8],
        offset: u64,
    ) -> Result<u64, DriveError> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(document_id)
            .ok_or_else(|| DriveError::NotCached(document_id.to_string()))?;

        let old_size = entry.size;
        let new_size = old_size.max(offset + bytes.len() as u64);
        // Mark dirty before making room so the entry cannot evict itself.
        entry.dirty = true;
        if new_size > old_size {
            let growth = new_size - old_size;
            self.evict_for(&mut state, growth).await?;
        }

        let path = self.blob_path(document_id);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        let entry = state
            .entries
            .get_mut(document_id)
            .ok_or_else(|| DriveError::NotCached(document_id.to_string()))?;
        let size_delta = new_size - entry.size;
        entry.size = new_size;
        entry.last_accessed = Utc::now();
        entry.dirty = true;
        state.total_size += size_delta;
        drop(state);

        self.mark_mutated();
        Ok(bytes.len() as u64)
    }

    /// Clear the dirty flag after a confirmed upload, recomputing the
    /// content hash from the backing file.
    pub async fn mark_clean(&self, document_id: &str) -> Result<(), DriveError> {
        let bytes = self.read_full(document_id).await?;
        let hash = blake3::hash(&bytes).to_hex().to_string();

        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.get_mut(document_id) {
            entry.dirty = false;
            entry.content_hash = hash;
        }
        drop(state);
        self.mark_mutated();
        Ok(())
    }

    /// Remove a document from the cache. Never fails if already absent.
    pub async fn delete(&self, document_id: &str) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.entries.remove(document_id) {
            state.total_size -= entry.size;
            drop(state);
            let _ = tokio::fs::remove_file(self.blob_path(document_id)).await;
            self.mark_mutated();
        }
    }

    /// Recompute hashes for all clean entries, dropping any whose backing
    /// file is missing or fails verification. Dirty entries carry unsynced
    /// local edits and are left untouched.
    pub async fn verify(&self) -> VerifyReport {
        let snapshot: Vec<CacheEntry> = {
            let state = self.state.read().await;
            state.entries.values().cloned().collect()
        };

        let mut report = VerifyReport::default();
        let mut drop_ids = Vec::new();

        for entry in snapshot {
            if entry.dirty {
                report.valid += 1;
                continue;
            }
            let path = self.blob_path(&entry.document_id);
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let hash = blake3::hash(&bytes).to_hex().to_string();
                    if hash == entry.content_hash {
                        report.valid += 1;
                    } else {
                        warn!(
                            document_id = %entry.document_id,
                            "cache integrity mismatch, dropping entry"
                        );
                        report.invalid += 1;
                        let _ = tokio::fs::remove_file(&path).await;
                        drop_ids.push(entry.document_id);
                    }
                }
                Err(_) => {
                    warn!(
                        document_id = %entry.document_id,
                        "cache backing file missing, dropping entry"
                    );
                    report.missing += 1;
                    drop_ids.push(entry.document_id);
                }
            }
        }

        if !drop_ids.is_empty() {
            let mut state = self.state.write().await;
            for id in drop_ids {
                if let Some(entry) = state.entries.remove(&id) {
                    state.total_size -= entry.size;
                }
            }
            drop(state);
            self.mark_mutated();
        }

        report
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            entries: state.entries.len(),
            total_size: state.total_size,
            max_size: self.config.max_size,
            dirty: state.entries.values().filter(|e| e.dirty).count(),
        }
    }

    /// Persist the manifest now, with the same atomic discipline as content.
    pub async fn persist(&self) -> Result<(), DriveError> {
        let manifest = {
            let state = self.state.read().await;
            Manifest {
                version: MANIFEST_VERSION,
                entries: state.entries.values().cloned().collect(),
                total_size: state.total_size,
            }
        };
        let bytes = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| DriveError::Config(format!("manifest serialization failed: {}", e)))?;
        write_atomic(&self.config.root.join(MANIFEST_FILE), &bytes).await?;
        Ok(())
    }

    /// Start the debounced persistence task: the manifest is written once
    /// the configured quiet period has passed since the last mutation.
    pub async fn start_persist(self: &Arc<Self>) {
        let mut handle_guard = self.persist_handle.lock().await;
        if handle_guard.is_some() {
            return;
        }
        *self.shutdown.write().await = false;

        let cache = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(500));
            loop {
                interval.tick().await;
                if *shutdown.read().await {
                    break;
                }

                let due = {
                    let guard = cache
                        .mutated_at
                        .lock()
                        .unwrap_or_else(|e| e.into_inner());
                    matches!(*guard, Some(t) if t.elapsed() >= cache.config.persist_debounce)
                };
                if due {
                    if let Err(e) = cache.persist().await {
                        warn!("cache manifest persist failed: {}", e);
                    } else {
                        let mut guard = cache
                            .mutated_at
                            .lock()
                            .unwrap_or_else(|e| e.into_inner());
                        *guard = None;
                    }
                }
            }
        });
        *handle_guard = Some(handle);
    }

    /// Stop the persistence task and write the manifest one final time.
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
        if let Some(handle) = self.persist_handle.lock().await.take() {
            handle.abort();
        }
        if let Err(e) = self.persist().await {
            warn!("final cache manifest persist failed: {}", e);
        }
    }

    fn mark_mutated(&self) {
        let mut guard = self.mutated_at.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Instant::now());
    }

    /// Evict clean entries, oldest access first, until `incoming` more bytes
    /// fit under the limit. Stops (with `CacheFull`) once only dirty entries
    /// remain.
    async fn evict_for(&self, state: &mut CacheState, incoming: u64) -> Result<(), DriveError> {
        while state.total_size + incoming > self.config.max_size {
            let victim = state
                .entries
                .values()
                .filter(|e| !e.dirty)
                .min_by(|a, b| {
                    a.last_accessed
                        .cmp(&b.last_accessed)
                        .then_with(|| a.document_id.cmp(&b.document_id))
                })
                .map(|e| e.document_id.clone());

            let Some(victim) = victim else {
                return Err(DriveError::CacheFull {
                    needed: incoming,
                    max: self.config.max_size,
                });
            };

            if let Some(entry) = state.entries.remove(&victim) {
                state.total_size -= entry.size;
                debug!(document_id = %victim, size = entry.size, "evicted cache entry");
            }
            let _ = tokio::fs::remove_file(self.blob_path(&victim)).await;
        }
        Ok(())
    }

    fn blob_path(&self, document_id: &str) -> PathBuf {
        let hash = blake3::hash(document_id.as_bytes()).to_hex().to_string();
        self.config.root.join(&hash[0..2]).join(&hash)
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.persist_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Write bytes to a temp file in the target directory, then rename over the
/// final path. The visible file is never partially written.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DriveError> {
    let parent = path
        .parent()
        .ok_or_else(|| DriveError::Config(format!("no parent for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn clear_cache_dir(root: &Path) {
    let Ok(mut dir) = tokio::fs::read_dir(root).await else {
        return;
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        let path = entry.path();
        let result = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(e) = result {
            warn!("failed to clear cache path {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_cache(dir: &TempDir, max_size: u64) -> FileCache {
        FileCache::open(FileCacheConfig {
            root: dir.path().to_path_buf(),
            max_size,
            persist_debounce: Duration::from_millis(50),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_store_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"hello world").await.unwrap();
        assert!(cache.is_cached("doc-1").await);
        assert_eq!(cache.read_full("doc-1").await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_roundtrip_empty_buffer() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-empty", b"").await.unwrap();
        assert_eq!(cache.read_full("doc-empty").await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_read_truncates_to_remaining_length() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", &[7u8; 100]).await.unwrap();
        let bytes = cache.read("doc-1", 50, 100).await.unwrap();
        assert_eq!(bytes.len(), 50);

        let bytes = cache.read("doc-1", 100, 10).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_read_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        let result = cache.read("doc-ghost", 0, 10).await;
        assert!(matches!(result, Err(DriveError::NotCached(_))));
    }

    #[tokio::test]
    async fn test_write_extends_and_marks_dirty() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"12345").await.unwrap();
        let written = cache.write("doc-1", b"abc", 4).await.unwrap();
        assert_eq!(written, 3);

        let entry = cache.entry("doc-1").await.unwrap();
        assert_eq!(entry.size, 7);
        assert!(entry.dirty);
        assert_eq!(cache.read_full("doc-1").await.unwrap(), b"1234abc");
    }

    #[tokio::test]
    async fn test_write_requires_existing_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        let result = cache.write("doc-new", b"abc", 0).await;
        assert!(matches!(result, Err(DriveError::NotCached(_))));
    }

    #[tokio::test]
    async fn test_eviction_lru_order() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 300).await;

        cache.store("doc-a", &[1u8; 100]).await.unwrap();
        cache.store("doc-b", &[2u8; 100]).await.unwrap();
        cache.store("doc-c", &[3u8; 100]).await.unwrap();

        // Refresh doc-a so doc-b becomes the oldest access.
        cache.read("doc-a", 0, 1).await.unwrap();

        cache.store("doc-d", &[4u8; 100]).await.unwrap();

        assert!(cache.is_cached("doc-a").await);
        assert!(!cache.is_cached("doc-b").await);
        assert!(cache.is_cached("doc-c").await);
        assert!(cache.is_cached("doc-d").await);

        let stats = cache.stats().await;
        assert!(stats.total_size <= 300);
    }

    #[tokio::test]
    async fn test_eviction_skips_dirty_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 250).await;

        cache.store("doc-a", &[1u8; 100]).await.unwrap();
        cache.store("doc-b", &[2u8; 100]).await.unwrap();
        cache.write("doc-a", &[9u8; 1], 0).await.unwrap();

        // doc-a is oldest but dirty; doc-b must be the victim.
        cache.store("doc-c", &[3u8; 100]).await.unwrap();

        assert!(cache.is_cached("doc-a").await);
        assert!(!cache.is_cached("doc-b").await);
        assert!(cache.is_cached("doc-c").await);
    }

    #[tokio::test]
    async fn test_cache_full_when_all_dirty() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 250).await;

        cache.store("doc-a", &[1u8; 100]).await.unwrap();
        cache.store("doc-b", &[2u8; 100]).await.unwrap();
        cache.write("doc-a", &[0u8], 0).await.unwrap();
        cache.write("doc-b", &[0u8], 0).await.unwrap();

        let result = cache.store("doc-c", &[3u8; 100]).await;
        assert!(matches!(result, Err(DriveError::CacheFull { .. })));
    }

    #[tokio::test]
    async fn test_total_size_never_exceeds_max() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 500).await;

        for i in 0..20 {
            cache
                .store(&format!("doc-{}", i), &[i as u8; 90])
                .await
                .unwrap();
            assert!(cache.stats().await.total_size <= 500);
        }
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"bytes").await.unwrap();
        cache.delete("doc-1").await;
        assert!(!cache.is_cached("doc-1").await);
        // Second delete is a no-op.
        cache.delete("doc-1").await;
    }

    #[tokio::test]
    async fn test_no_temp_files_after_store() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"content").await.unwrap();
        cache.persist().await.unwrap();

        let mut stack = vec![dir.path().to_path_buf()];
        while let Some(p) = stack.pop() {
            for entry in std::fs::read_dir(&p).unwrap() {
                let entry = entry.unwrap();
                if entry.path().is_dir() {
                    stack.push(entry.path());
                } else {
                    let name = entry.file_name().to_string_lossy().to_string();
                    assert!(!name.ends_with(".tmp"), "leftover temp file: {}", name);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_manifest_reload() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_cache(&dir, 1024).await;
            cache.store("doc-1", b"persisted").await.unwrap();
            cache.persist().await.unwrap();
        }

        let cache = open_cache(&dir, 1024).await;
        assert!(cache.is_cached("doc-1").await);
        assert_eq!(cache.read_full("doc-1").await.unwrap(), b"persisted");
    }

    #[tokio::test]
    async fn test_manifest_version_mismatch_discards() {
        let dir = TempDir::new().unwrap();
        {
            let cache = open_cache(&dir, 1024).await;
            cache.store("doc-1", b"old world").await.unwrap();
            cache.persist().await.unwrap();
        }

        // Rewrite the manifest with a bumped version.
        let manifest_path = dir.path().join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&manifest_path).unwrap();
        let bumped = raw.replacen("\"version\": 1", "\"version\": 99", 1);
        std::fs::write(&manifest_path, bumped).unwrap();

        let cache = open_cache(&dir, 1024).await;
        assert!(!cache.is_cached("doc-1").await);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_verify_drops_corrupted_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-good", b"fine").await.unwrap();
        cache.store("doc-bad", b"will corrupt").await.unwrap();

        // Corrupt doc-bad's backing file directly.
        let hash = blake3::hash(b"doc-bad").to_hex().to_string();
        let path = dir.path().join(&hash[0..2]).join(&hash);
        std::fs::write(&path, b"tampered").unwrap();

        let report = cache.verify().await;
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);
        assert!(!cache.is_cached("doc-bad").await);
        assert!(cache.is_cached("doc-good").await);
    }

    #[tokio::test]
    async fn test_verify_drops_missing_backing_file() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"bytes").await.unwrap();
        let hash = blake3::hash(b"doc-1").to_hex().to_string();
        std::fs::remove_file(dir.path().join(&hash[0..2]).join(&hash)).unwrap();

        let report = cache.verify().await;
        assert_eq!(report.missing, 1);
        assert!(!cache.is_cached("doc-1").await);
    }

    #[tokio::test]
    async fn test_verify_leaves_dirty_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"original").await.unwrap();
        cache.write("doc-1", b"edit", 0).await.unwrap();

        let report = cache.verify().await;
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 0);
        assert!(cache.is_cached("doc-1").await);
    }

    #[tokio::test]
    async fn test_mark_clean_refreshes_hash() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir, 1024).await;

        cache.store("doc-1", b"v1").await.unwrap();
        cache.write("doc-1", b"v2", 0).await.unwrap();
        cache.mark_clean("doc-1").await.unwrap();

        let entry = cache.entry("doc-1").await.unwrap();
        assert!(!entry.dirty);

        // The refreshed hash must survive verification.
        let report = cache.verify().await;
        assert_eq!(report.invalid, 0);
    }

    #[tokio::test]
    async fn test_debounced_persist_task() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(open_cache(&dir, 1024).await);
        cache.start_persist().await;

        cache.store("doc-1", b"debounced").await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(dir.path().join(MANIFEST_FILE).exists());
        cache.shutdown().await;
    }
}
