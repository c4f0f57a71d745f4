use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use matterfs_config::ConflictStrategy;
use matterfs_core::{
    ChangeEvent, ChangeKind, DriveError, FileCache, RemoteStore, SyncLog, SyncLogKind,
};

use crate::tree::TreeOp;

/// A locally modified document awaiting upload.
#[derive(Debug, Clone)]
pub struct DirtyFile {
    pub document_id: String,
    pub matter_id: String,
    /// Matter-relative path on the remote store.
    pub remote_path: String,
    /// Last local write; uploads wait for the settle window to pass.
    pub modified_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Upload attempts before a document is surfaced for manual attention.
    pub retry_limit: u32,
    /// Write-quiescence window before a dirty file is uploaded.
    pub write_settle: std::time::Duration,
    /// Conflict resolution strategy.
    pub conflict: ConflictStrategy,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        SyncEngineConfig {
            retry_limit: 3,
            write_settle: std::time::Duration::from_secs(2),
            conflict: ConflictStrategy::Both,
        }
    }
}

/// Current engine state. A cycle is never re-entered while one is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Engine status snapshot.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Start instant of the last fully successful cycle.
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub cycles: u64,
}

/// Emitted when strategy `ask` parks a conflict for an explicit decision.
#[derive(Debug, Clone)]
pub struct ConflictEvent {
    pub document_id: String,
    pub matter_id: String,
    pub path: String,
    pub detected_at: DateTime<Utc>,
}

/// Decision supplied to `resolve_conflict` for a parked conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    Local,
    Server,
    Both,
}

/// Outcome of one sync cycle.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub uploaded: Vec<String>,
    pub downloaded: Vec<String>,
    pub conflicts: Vec<String>,
    /// (document_id, error) pairs for failed uploads or downloads.
    pub failed: Vec<(String, String)>,
    /// Tree mutations for the mount manager to apply.
    pub tree_ops: Vec<TreeOp>,
    /// True when the call was a no-op because a cycle was already running.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        SyncReport {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Reconciles locally dirty documents with the remote store.
///
/// Owns the dirty set exclusively. Tree mutations are returned as `TreeOp`s
/// rather than applied, keeping the drive tree single-writer.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<FileCache>,
    log: Arc<SyncLog>,
    config: SyncEngineConfig,
    dirty: RwLock<HashMap<String, DirtyFile>>,
    /// Conflicts parked by strategy `ask`, keyed by document id.
    pending_conflicts: RwLock<HashMap<String, ChangeEvent>>,
    conflict_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<ConflictEvent>>>,
    in_flight: AtomicBool,
    status: RwLock<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cache: Arc<FileCache>,
        log: Arc<SyncLog>,
        config: SyncEngineConfig,
    ) -> Self {
        SyncEngine {
            remote,
            cache,
            log,
            config,
            dirty: RwLock::new(HashMap::new()),
            pending_conflicts: RwLock::new(HashMap::new()),
            conflict_tx: std::sync::Mutex::new(None),
            in_flight: AtomicBool::new(false),
            status: RwLock::new(SyncStatus {
                state: SyncState::Idle,
                last_sync: None,
                last_error: None,
                cycles: 0,
            }),
        }
    }

    /// Record a local write. Upserts the dirty entry and refreshes its
    /// settle clock; a fresh edit also resets the retry budget.
    pub async fn mark_dirty(&self, document_id: &str, matter_id: &str, remote_path: &str) {
        let mut dirty = self.dirty.write().await;
        let entry = dirty
            .entry(document_id.to_string())
            .or_insert_with(|| DirtyFile {
                document_id: document_id.to_string(),
                matter_id: matter_id.to_string(),
                remote_path: remote_path.to_string(),
                modified_at: Utc::now(),
                retry_count: 0,
                last_error: None,
            });
        entry.modified_at = Utc::now();
        entry.remote_path = remote_path.to_string();
        entry.retry_count = 0;
        entry.last_error = None;
    }

    pub async fn is_dirty(&self, document_id: &str) -> bool {
        self.dirty.read().await.contains_key(document_id)
    }

    /// Snapshot of all dirty entries.
    pub async fn dirty_files(&self) -> Vec<DirtyFile> {
        self.dirty.read().await.values().cloned().collect()
    }

    /// Dirty entries that exhausted their retry budget and need manual
    /// attention.
    pub async fn failed_files(&self) -> Vec<DirtyFile> {
        self.dirty
            .read()
            .await
            .values()
            .filter(|d| d.retry_count >= self.config.retry_limit)
            .cloned()
            .collect()
    }

    /// Forget a dirty entry (document deleted or discarded).
    pub async fn drop_dirty(&self, document_id: &str) {
        self.dirty.write().await.remove(document_id);
    }

    /// Subscribe to conflict prompts for strategy `ask`. Only the latest
    /// subscriber receives events.
    pub fn subscribe_conflicts(&self) -> mpsc::UnboundedReceiver<ConflictEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.conflict_tx.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(tx);
        rx
    }

    /// Document ids with a parked conflict.
    pub async fn pending_conflicts(&self) -> Vec<String> {
        self.pending_conflicts.read().await.keys().cloned().collect()
    }

    pub async fn has_pending_conflict(&self, document_id: &str) -> bool {
        self.pending_conflicts
            .read()
            .await
            .contains_key(document_id)
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Run one sync cycle: upload settled dirty documents, then pull and
    /// apply the remote change feed. Single-flight: a call while a cycle is
    /// running is a no-op.
    pub async fn sync_now(&self) -> Result<SyncReport, DriveError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("sync cycle already in flight, skipping");
            return Ok(SyncReport::skipped());
        }

        {
            let mut status = self.status.write().await;
            status.state = SyncState::Syncing;
        }

        let started = Utc::now();
        let result = self.run_cycle().await;

        {
            let mut status = self.status.write().await;
            status.state = SyncState::Idle;
            status.cycles += 1;
            match &result {
                Ok(_) => {
                    status.last_sync = Some(started);
                    status.last_error = None;
                }
                Err(e) => {
                    status.last_error = Some(e.to_string());
                }
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Upload one document immediately (flush-on-close path). Ignores the
    /// settle window; fails with `ConflictPending` for parked documents.
    pub async fn sync_file(&self, document_id: &str) -> Result<(), DriveError> {
        if self.has_pending_conflict(document_id).await {
            return Err(DriveError::ConflictPending(document_id.to_string()));
        }
        let Some(entry) = self.dirty.read().await.get(document_id).cloned() else {
            return Ok(());
        };

        let bytes = self.cache.read_full(document_id).await?;
        match self.remote.upload_file(document_id, &bytes).await {
            Ok(()) => {
                self.dirty.write().await.remove(document_id);
                self.cache.mark_clean(document_id).await?;
                self.log.append(
                    SyncLogKind::Upload,
                    format!("uploaded {}", entry.remote_path),
                    Some(document_id),
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let mut dirty = self.dirty.write().await;
                if let Some(d) = dirty.get_mut(document_id) {
                    d.retry_count += 1;
                    d.last_error = Some(message.clone());
                }
                self.log.append(
                    SyncLogKind::Error,
                    format!("upload failed for {}: {}", entry.remote_path, message),
                    Some(document_id),
                );
                Err(e.into())
            }
        }
    }

    /// Apply a decision to a parked conflict. Returns tree ops for the
    /// mount manager to apply.
    pub async fn resolve_conflict(
        &self,
        document_id: &str,
        choice: ConflictChoice,
    ) -> Result<Vec<TreeOp>, DriveError> {
        let change = self
            .pending_conflicts
            .write()
            .await
            .remove(document_id)
            .ok_or_else(|| DriveError::NotFound(document_id.to_string()))?;

        let mut report = SyncReport::default();
        match choice {
            ConflictChoice::Local => self.resolve_local(&change).await,
            ConflictChoice::Server => self.resolve_server(&change, &mut report).await?,
            ConflictChoice::Both => self.resolve_both(&change, &mut report).await?,
        }
        Ok(report.tree_ops)
    }

    async fn run_cycle(&self) -> Result<SyncReport, DriveError> {
        let mut report = SyncReport::default();

        // Phase 1: push settled dirty documents.
        let candidates = self.dirty_files().await;
        for entry in candidates {
            if self.has_pending_conflict(&entry.document_id).await {
                continue;
            }
            if entry.retry_count >= self.config.retry_limit {
                continue;
            }
            if !self.is_settled(&entry) {
                debug!(document_id = %entry.document_id, "write not settled, deferring upload");
                continue;
            }
            self.upload_one(&entry, &mut report).await;
        }

        // Phase 2: pull and apply the remote change feed.
        let since = self
            .status
            .read()
            .await
            .last_sync
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let changes = self.remote.get_changes(since).await.map_err(|e| {
            self.log.append(
                SyncLogKind::Error,
                format!("change feed unavailable: {}", e),
                None,
            );
            DriveError::from(e)
        })?;

        debug!(count = changes.len(), since = %since, "applying remote changes");
        for change in changes {
            if let Err(e) = self.apply_change(&change, &mut report).await {
                // One bad document never halts the cycle.
                error!(document_id = %change.document_id, "failed to apply change: {}", e);
                self.log.append(
                    SyncLogKind::Error,
                    format!("failed to apply change for {}: {}", change.path, e),
                    Some(&change.document_id),
                );
                report.failed.push((change.document_id.clone(), e.to_string()));
            }
        }

        info!(
            uploaded = report.uploaded.len(),
            downloaded = report.downloaded.len(),
            conflicts = report.conflicts.len(),
            failed = report.failed.len(),
            "sync cycle finished"
        );
        Ok(report)
    }

    fn is_settled(&self, entry: &DirtyFile) -> bool {
        let elapsed = (Utc::now() - entry.modified_at)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        elapsed >= self.config.write_settle
    }

    async fn upload_one(&self, entry: &DirtyFile, report: &mut SyncReport) {
        let bytes = match self.cache.read_full(&entry.document_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                // Dirty but not cached: nothing to push, drop the entry.
                warn!(document_id = %entry.document_id, "dirty entry without cached content: {}", e);
                self.dirty.write().await.remove(&entry.document_id);
                return;
            }
        };

        match self.remote.upload_file(&entry.document_id, &bytes).await {
            Ok(()) => {
                self.dirty.write().await.remove(&entry.document_id);
                if let Err(e) = self.cache.mark_clean(&entry.document_id).await {
                    warn!(document_id = %entry.document_id, "mark_clean failed: {}", e);
                }
                self.log.append(
                    SyncLogKind::Upload,
                    format!("uploaded {}", entry.remote_path),
                    Some(&entry.document_id),
                );
                report.uploaded.push(entry.document_id.clone());
            }
            Err(e) => {
                let message = e.to_string();
                let mut dirty = self.dirty.write().await;
                if let Some(d) = dirty.get_mut(&entry.document_id) {
                    d.retry_count += 1;
                    d.last_error = Some(message.clone());
                    if d.retry_count >= self.config.retry_limit {
                        warn!(
                            document_id = %entry.document_id,
                            "upload retries exhausted, needs manual resync"
                        );
                    }
                }
                drop(dirty);
                self.log.append(
                    SyncLogKind::Error,
                    format!("upload failed for {}: {}", entry.remote_path, message),
                    Some(&entry.document_id),
                );
                report.failed.push((entry.document_id.clone(), message));
            }
        }
    }

    async fn apply_change(
        &self,
        change: &ChangeEvent,
        report: &mut SyncReport,
    ) -> Result<(), DriveError> {
        match change.kind {
            ChangeKind::Created | ChangeKind::Updated => {
                if self.has_pending_conflict(&change.document_id).await {
                    // Keep the freshest remote state for the eventual decision.
                    self.pending_conflicts
                        .write()
                        .await
                        .insert(change.document_id.clone(), change.clone());
                    return Ok(());
                }
                if self.is_dirty(&change.document_id).await {
                    self.handle_conflict(change, report).await
                } else {
                    self.download_into_cache(change, report).await
                }
            }
            ChangeKind::Deleted => {
                // Remote deletion wins, dirty or not.
                self.cache.delete(&change.document_id).await;
                self.dirty.write().await.remove(&change.document_id);
                self.pending_conflicts
                    .write()
                    .await
                    .remove(&change.document_id);
                self.log.append(
                    SyncLogKind::Delete,
                    format!("remote deleted {}", change.path),
                    Some(&change.document_id),
                );
                report.tree_ops.push(TreeOp::RemoveDocument {
                    document_id: change.document_id.clone(),
                });
                Ok(())
            }
            ChangeKind::Renamed | ChangeKind::Moved => {
                // Bookkeeping only; content is unaffected.
                if let Some(d) = self.dirty.write().await.get_mut(&change.document_id) {
                    d.remote_path = change.path.clone();
                }
                report.tree_ops.push(TreeOp::Relocate {
                    matter_id: change.matter_id.clone(),
                    document_id: change.document_id.clone(),
                    old_path: change.old_path.clone(),
                    new_path: change.path.clone(),
                });
                Ok(())
            }
        }
    }

    async fn download_into_cache(
        &self,
        change: &ChangeEvent,
        report: &mut SyncReport,
    ) -> Result<(), DriveError> {
        let bytes = self.remote.download_file(&change.document_id).await?;
        let size = bytes.len() as u64;
        self.cache.store(&change.document_id, &bytes).await?;
        self.log.append(
            SyncLogKind::Download,
            format!("downloaded {}", change.path),
            Some(&change.document_id),
        );
        report.downloaded.push(change.document_id.clone());
        report.tree_ops.push(TreeOp::UpsertFile {
            matter_id: change.matter_id.clone(),
            path: change.path.clone(),
            document_id: change.document_id.clone(),
            size,
            modified: change.timestamp,
        });
        Ok(())
    }

    async fn handle_conflict(
        &self,
        change: &ChangeEvent,
        report: &mut SyncReport,
    ) -> Result<(), DriveError> {
        report.conflicts.push(change.document_id.clone());
        self.log.append(
            SyncLogKind::Conflict,
            format!(
                "remote change collided with local edits on {}",
                change.path
            ),
            Some(&change.document_id),
        );

        match self.config.conflict {
            ConflictStrategy::Local => {
                self.resolve_local(change).await;
                Ok(())
            }
            ConflictStrategy::Server => self.resolve_server(change, report).await,
            ConflictStrategy::Both => self.resolve_both(change, report).await,
            ConflictStrategy::Ask => {
                let has_listener = {
                    let guard = self.conflict_tx.lock().unwrap_or_else(|e| e.into_inner());
                    guard.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
                };
                if !has_listener {
                    // A prompt nobody can answer would block the document
                    // forever; fall back to the keep-both safety net.
                    warn!(
                        document_id = %change.document_id,
                        "no conflict listener attached, keeping both versions"
                    );
                    return self.resolve_both(change, report).await;
                }

                self.pending_conflicts
                    .write()
                    .await
                    .insert(change.document_id.clone(), change.clone());
                let event = ConflictEvent {
                    document_id: change.document_id.clone(),
                    matter_id: change.matter_id.clone(),
                    path: change.path.clone(),
                    detected_at: Utc::now(),
                };
                let guard = self.conflict_tx.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(tx) = guard.as_ref() {
                    let _ = tx.send(event);
                }
                Ok(())
            }
        }
    }

    /// Keep the local version: the dirty entry stays, and the next upload
    /// overwrites the remote change.
    async fn resolve_local(&self, change: &ChangeEvent) {
        self.log.append(
            SyncLogKind::Conflict,
            format!("kept local version of {}", change.path),
            Some(&change.document_id),
        );
    }

    /// Discard local edits and take the remote version.
    async fn resolve_server(
        &self,
        change: &ChangeEvent,
        report: &mut SyncReport,
    ) -> Result<(), DriveError> {
        self.dirty.write().await.remove(&change.document_id);
        self.download_into_cache(change, report).await?;
        self.log.append(
            SyncLogKind::Conflict,
            format!("took remote version of {}", change.path),
            Some(&change.document_id),
        );
        Ok(())
    }

    /// Keep both: local bytes become a timestamped conflict-copy sibling,
    /// then the remote version lands in the original path.
    async fn resolve_both(
        &self,
        change: &ChangeEvent,
        report: &mut SyncReport,
    ) -> Result<(), DriveError> {
        let local_bytes = match self.cache.read_full(&change.document_id).await {
            Ok(bytes) => bytes,
            // Nothing local to preserve; behave like `server`.
            Err(DriveError::NotCached(_)) => {
                return self.resolve_server(change, report).await;
            }
            Err(e) => return Err(e),
        };

        let copy_name = conflict_copy_name(&change.path, Utc::now());
        let parent = parent_of(&change.path);

        // Create the copy remotely first so it survives a local crash.
        let new_doc = self
            .remote
            .create_file(&change.matter_id, &copy_name, &parent)
            .await?;
        self.remote
            .upload_file(&new_doc.document_id, &local_bytes)
            .await?;
        self.cache
            .store(&new_doc.document_id, &local_bytes)
            .await?;

        self.log.append(
            SyncLogKind::Conflict,
            format!("preserved local edits as {}", new_doc.remote_path),
            Some(&change.document_id),
        );
        report.tree_ops.push(TreeOp::UpsertFile {
            matter_id: change.matter_id.clone(),
            path: new_doc.remote_path.clone(),
            document_id: new_doc.document_id.clone(),
            size: local_bytes.len() as u64,
            modified: Utc::now(),
        });

        self.dirty.write().await.remove(&change.document_id);
        self.download_into_cache(change, report).await?;
        Ok(())
    }
}

/// `"brief.docx"` -> `"brief (conflict 2026-08-06T12:00:00Z).docx"`.
fn conflict_copy_name(path: &str, at: DateTime<Utc>) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    let stamp = at.format("%Y-%m-%dT%H:%M:%SZ");
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            format!("{} (conflict {}){}", &name[..idx], stamp, &name[idx..])
        }
        _ => format!("{} (conflict {})", name, stamp),
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;
    use matterfs_core::{FileCacheConfig, RemoteError};
    use tempfile::TempDir;

    struct Fixture {
        remote: Arc<InMemoryRemote>,
        cache: Arc<FileCache>,
        log: Arc<SyncLog>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = FileCache::open(FileCacheConfig {
            root: dir.path().to_path_buf(),
            max_size: 10 * 1024 * 1024,
            persist_debounce: std::time::Duration::from_secs(5),
        })
        .await
        .unwrap();
        Fixture {
            remote: Arc::new(InMemoryRemote::new()),
            cache: Arc::new(cache),
            log: Arc::new(SyncLog::new()),
            _dir: dir,
        }
    }

    fn engine_with(f: &Fixture, conflict: ConflictStrategy) -> SyncEngine {
        SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                retry_limit: 3,
                write_settle: std::time::Duration::ZERO,
                conflict,
            },
        )
    }

    #[tokio::test]
    async fn test_dirty_clears_on_successful_sync() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"v1");
        f.cache.store(&id, b"local edit").await.unwrap();

        let engine = engine_with(&f, ConflictStrategy::Both);
        engine.mark_dirty(&id, "m-1", "/a.txt").await;
        assert!(engine.is_dirty(&id).await);

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.uploaded, vec![id.clone()]);
        assert!(!engine.is_dirty(&id).await);
        assert_eq!(f.remote.document_bytes(&id).unwrap(), b"local edit");
        assert!(!f.cache.entry(&id).await.unwrap().dirty);
    }

    #[tokio::test]
    async fn test_upload_retry_cap() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"v1");
        f.cache.store(&id, b"local").await.unwrap();
        f.remote.fail_uploads(10);

        let engine = engine_with(&f, ConflictStrategy::Both);
        engine.mark_dirty(&id, "m-1", "/a.txt").await;

        for _ in 0..3 {
            let report = engine.sync_now().await.unwrap();
            assert_eq!(report.failed.len(), 1);
        }

        // Retry budget exhausted: surfaced, no further attempts.
        let failed = engine.failed_files().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 3);
        assert!(failed[0].last_error.is_some());

        let report = engine.sync_now().await.unwrap();
        assert!(report.failed.is_empty());
        assert!(engine.is_dirty(&id).await);
    }

    #[tokio::test]
    async fn test_one_bad_document_does_not_halt_cycle() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let bad = f.remote.seed_document("m-1", "/bad.txt", b"v1");
        let good = f.remote.seed_document("m-1", "/good.txt", b"v1");
        f.cache.store(&bad, b"bad local").await.unwrap();
        f.cache.store(&good, b"good local").await.unwrap();

        // Only the first upload of the cycle fails.
        f.remote.fail_uploads(1);

        let engine = engine_with(&f, ConflictStrategy::Both);
        engine.mark_dirty(&bad, "m-1", "/bad.txt").await;
        engine.mark_dirty(&good, "m-1", "/good.txt").await;

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.uploaded.len() + report.failed.len(), 2);
        assert_eq!(report.uploaded.len(), 1);
    }

    #[tokio::test]
    async fn test_write_settle_defers_upload() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"v1");
        f.cache.store(&id, b"local").await.unwrap();

        let engine = SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                write_settle: std::time::Duration::from_millis(200),
                ..Default::default()
            },
        );
        engine.mark_dirty(&id, "m-1", "/a.txt").await;

        let report = engine.sync_now().await.unwrap();
        assert!(report.uploaded.is_empty());
        assert!(engine.is_dirty(&id).await);

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.uploaded, vec![id]);
    }

    #[tokio::test]
    async fn test_remote_delete_wins_over_dirty() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/doc2.txt", b"v1");
        f.cache.store(&id, b"local edit").await.unwrap();

        let engine = engine_with(&f, ConflictStrategy::Both);
        engine.mark_dirty(&id, "m-1", "/doc2.txt").await;
        f.remote.remote_delete(&id);

        let report = engine.sync_now().await.unwrap();
        assert!(!f.cache.is_cached(&id).await);
        assert!(!engine.is_dirty(&id).await);
        assert!(report
            .tree_ops
            .iter()
            .any(|op| matches!(op, TreeOp::RemoveDocument { document_id } if *document_id == id)));
    }

    #[tokio::test]
    async fn test_conflict_both_preserves_both_versions() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/brief.docx", b"base");
        f.cache.store(&id, b"local edits").await.unwrap();

        let engine = SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                // Keep the local edit out of phase 1 so the collision is
                // still live when the change feed is applied.
                write_settle: std::time::Duration::from_secs(60),
                conflict: ConflictStrategy::Both,
                ..Default::default()
            },
        );
        engine.mark_dirty(&id, "m-1", "/brief.docx").await;
        f.remote.remote_update(&id, b"remote edits");

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.conflicts, vec![id.clone()]);

        // The original path now holds the remote version.
        assert_eq!(f.cache.read_full(&id).await.unwrap(), b"remote edits");
        assert!(!engine.is_dirty(&id).await);

        // The local bytes live on in a conflict-copy sibling.
        let copy_id = f
            .remote
            .uploads()
            .iter()
            .map(|(id, _)| id.clone())
            .find(|uploaded| *uploaded != id)
            .expect("conflict copy uploaded");
        assert_eq!(f.remote.document_bytes(&copy_id).unwrap(), b"local edits");
        assert_eq!(f.cache.read_full(&copy_id).await.unwrap(), b"local edits");
        let copy_path = f.remote.document_path(&copy_id).unwrap();
        assert!(copy_path.contains("(conflict "), "got {}", copy_path);
    }

    #[tokio::test]
    async fn test_conflict_local_keeps_dirty_and_overwrites() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"base");
        f.cache.store(&id, b"local wins").await.unwrap();

        let engine = SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                write_settle: std::time::Duration::from_secs(60),
                conflict: ConflictStrategy::Local,
                ..Default::default()
            },
        );
        engine.mark_dirty(&id, "m-1", "/a.txt").await;
        f.remote.remote_update(&id, b"remote edit");

        let report = engine.sync_now().await.unwrap();
        assert_eq!(report.conflicts, vec![id.clone()]);
        // The dirty entry survives, and the flush overwrites the remote.
        assert!(engine.is_dirty(&id).await);
        engine.sync_file(&id).await.unwrap();
        assert_eq!(f.remote.document_bytes(&id).unwrap(), b"local wins");
    }

    #[tokio::test]
    async fn test_conflict_server_discards_local() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"base");
        f.cache.store(&id, b"doomed local").await.unwrap();

        let engine = SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                // Keep the local edit out of phase 1 so the conflict is
                // still present when the change feed is applied.
                write_settle: std::time::Duration::from_secs(60),
                conflict: ConflictStrategy::Server,
                ..Default::default()
            },
        );
        engine.mark_dirty(&id, "m-1", "/a.txt").await;
        f.remote.remote_update(&id, b"remote wins");

        engine.sync_now().await.unwrap();
        assert!(!engine.is_dirty(&id).await);
        assert_eq!(f.cache.read_full(&id).await.unwrap(), b"remote wins");
        assert_eq!(f.remote.document_bytes(&id).unwrap(), b"remote wins");
    }

    #[tokio::test]
    async fn test_conflict_ask_parks_until_resolved() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"base");
        let other = f.remote.seed_document("m-1", "/b.txt", b"base");
        f.cache.store(&id, b"local").await.unwrap();
        f.cache.store(&other, b"other local").await.unwrap();

        let engine = SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                write_settle: std::time::Duration::from_secs(60),
                conflict: ConflictStrategy::Ask,
                ..Default::default()
            },
        );
        let mut conflicts = engine.subscribe_conflicts();

        engine.mark_dirty(&id, "m-1", "/a.txt").await;
        f.remote.remote_update(&id, b"remote");

        engine.sync_now().await.unwrap();
        let event = conflicts.try_recv().expect("conflict event emitted");
        assert_eq!(event.document_id, id);
        assert!(engine.has_pending_conflict(&id).await);

        // The parked document refuses explicit flushes.
        let err = engine.sync_file(&id).await.unwrap_err();
        assert!(matches!(err, DriveError::ConflictPending(_)));

        // Other documents keep syncing normally.
        engine.mark_dirty(&other, "m-1", "/b.txt").await;
        engine.sync_file(&other).await.unwrap();
        assert!(!engine.is_dirty(&other).await);

        let ops = engine
            .resolve_conflict(&id, ConflictChoice::Server)
            .await
            .unwrap();
        assert!(!ops.is_empty());
        assert!(!engine.has_pending_conflict(&id).await);
        assert_eq!(f.cache.read_full(&id).await.unwrap(), b"remote");
    }

    #[tokio::test]
    async fn test_conflict_ask_without_listener_falls_back_to_both() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/a.txt", b"base");
        f.cache.store(&id, b"local").await.unwrap();

        let engine = SyncEngine::new(
            f.remote.clone(),
            f.cache.clone(),
            f.log.clone(),
            SyncEngineConfig {
                write_settle: std::time::Duration::from_secs(60),
                conflict: ConflictStrategy::Ask,
                ..Default::default()
            },
        );
        engine.mark_dirty(&id, "m-1", "/a.txt").await;
        f.remote.remote_update(&id, b"remote");

        engine.sync_now().await.unwrap();
        // Not parked: resolved as keep-both.
        assert!(!engine.has_pending_conflict(&id).await);
        assert_eq!(f.cache.read_full(&id).await.unwrap(), b"remote");
        assert!(f.remote.uploads().iter().any(|(_, b)| b == b"local"));
    }

    #[tokio::test]
    async fn test_rename_change_is_bookkeeping_only() {
        let f = fixture().await;
        f.remote.add_matter("m-1", "Acme", "001", "General");
        let id = f.remote.seed_document("m-1", "/old.txt", b"content");

        let engine = engine_with(&f, ConflictStrategy::Both);
        f.remote.remote_rename(&id, "new.txt");

        let report = engine.sync_now().await.unwrap();
        assert!(report.downloaded.is_empty());
        assert!(report.tree_ops.iter().any(|op| matches!(
            op,
            TreeOp::Relocate { new_path, .. } if new_path == "/new.txt"
        )));
    }

    #[tokio::test]
    async fn test_conflict_copy_name_format() {
        let at = DateTime::parse_from_rfc3339("2026-08-06T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            conflict_copy_name("/briefs/opening.docx", at),
            "opening (conflict 2026-08-06T12:00:00Z).docx"
        );
        assert_eq!(
            conflict_copy_name("/notes", at),
            "notes (conflict 2026-08-06T12:00:00Z)"
        );
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let f = fixture().await;
        let engine = engine_with(&f, ConflictStrategy::Both);

        let status = engine.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_sync.is_none());

        engine.sync_now().await.unwrap();
        let status = engine.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_sync.is_some());
        assert_eq!(status.cycles, 1);
    }
}
