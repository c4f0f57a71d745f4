use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use notify::{RecursiveMode, Watcher};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use matterfs_config::{DriveConfig, MountStrategy};
use matterfs_core::{DriveError, FileCache, RemoteStore, SyncLog, SyncLogKind};

use crate::bridge::{
    AttrDto, BridgeError, BridgeOp, BridgeReply, BridgeRequest, BridgeResponse, DirEntryDto,
};
use crate::sync::{ConflictChoice, SyncEngine, SyncEngineConfig, SyncReport};
use crate::tree::{sanitize_name, DriveTree, FileNode, Node, TreeOp};

/// An open file handle, scoped to the mount session.
#[derive(Debug, Clone)]
pub struct OpenHandle {
    pub id: u64,
    pub path: String,
    pub document_id: String,
    pub write: bool,
    /// Byte position after the most recent read or write.
    pub position: u64,
}

#[derive(Debug, Default)]
struct HandleTable {
    next: u64,
    handles: HashMap<u64, OpenHandle>,
}

impl HandleTable {
    fn allocate(&mut self, path: String, document_id: String, write: bool) -> u64 {
        self.next += 1;
        let id = self.next;
        self.handles.insert(
            id,
            OpenHandle {
                id,
                path,
                document_id,
                write,
                position: 0,
            },
        );
        id
    }

    fn get(&self, id: u64) -> Result<&OpenHandle, DriveError> {
        self.handles.get(&id).ok_or(DriveError::BadHandle(id))
    }

    fn advance(&mut self, id: u64, position: u64) {
        if let Some(handle) = self.handles.get_mut(&id) {
            handle.position = position;
        }
    }

    fn release(&mut self, id: u64) -> Result<OpenHandle, DriveError> {
        self.handles.remove(&id).ok_or(DriveError::BadHandle(id))
    }
}

/// Mount status snapshot.
#[derive(Debug, Clone)]
pub struct MountStatus {
    pub mounted: bool,
    pub strategy: MountStrategy,
    pub matters: usize,
    pub files: usize,
    pub open_handles: usize,
}

/// Owns the mount lifecycle and the authoritative drive tree.
///
/// The tree has exactly two logical writers: bridge requests and
/// sync-applied remote changes, both funneled through this struct. An
/// explicit handle rather than a process-wide singleton, so tests can run
/// several mounts side by side.
pub struct MountManager {
    config: DriveConfig,
    remote: Arc<dyn RemoteStore>,
    cache: Arc<FileCache>,
    engine: Arc<SyncEngine>,
    log: Arc<SyncLog>,
    tree: RwLock<DriveTree>,
    /// matter_id -> projected folder name.
    matter_folders: RwLock<HashMap<String, String>>,
    /// lowercased folder name -> matter_id.
    folder_index: RwLock<HashMap<String, String>>,
    handles: Mutex<HandleTable>,
    mounted: AtomicBool,
    sync_task: Mutex<Option<JoinHandle<()>>>,
    watcher: std::sync::Mutex<Option<notify::RecommendedWatcher>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl MountManager {
    pub fn new(
        config: DriveConfig,
        remote: Arc<dyn RemoteStore>,
        cache: Arc<FileCache>,
        log: Arc<SyncLog>,
    ) -> Arc<Self> {
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&remote),
            Arc::clone(&cache),
            Arc::clone(&log),
            SyncEngineConfig {
                retry_limit: config.sync.retry_limit,
                write_settle: config.sync.write_settle.as_duration(),
                conflict: config.sync.conflict,
            },
        ));

        Arc::new(MountManager {
            config,
            remote,
            cache,
            engine,
            log,
            tree: RwLock::new(DriveTree::new()),
            matter_folders: RwLock::new(HashMap::new()),
            folder_index: RwLock::new(HashMap::new()),
            handles: Mutex::new(HandleTable::default()),
            mounted: AtomicBool::new(false),
            sync_task: Mutex::new(None),
            watcher: std::sync::Mutex::new(None),
            watch_task: Mutex::new(None),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    pub fn sync_log(&self) -> &Arc<SyncLog> {
        &self.log
    }

    /// Mount: fetch the matter list, build the tree, start the periodic
    /// sync task, and (for the shallow strategy) materialize the sync
    /// folder and watch it. Idempotent if already mounted.
    pub async fn mount(self: &Arc<Self>) -> Result<(), DriveError> {
        if self.mounted.swap(true, Ordering::SeqCst) {
            debug!("already mounted");
            return Ok(());
        }

        if let Err(e) = self.build_tree().await {
            self.mounted.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.cache.start_persist().await;
        self.start_sync_task().await;

        if self.config.mount.strategy == MountStrategy::Shallow {
            if let Err(e) = self.materialize_and_watch().await {
                self.unmount().await;
                return Err(e);
            }
        }

        let status = self.status().await;
        info!(
            matters = status.matters,
            files = status.files,
            strategy = ?status.strategy,
            "mounted drive at {}",
            self.config.mount.point
        );
        self.log.append(
            SyncLogKind::Info,
            format!("mounted at {}", self.config.mount.point),
            None,
        );
        Ok(())
    }

    /// Unmount: stop timers and watchers. Safe to call when not mounted and
    /// mid-sync; in-flight uploads finish or fail silently.
    pub async fn unmount(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.sync_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.lock().await.take() {
            task.abort();
        }
        {
            let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            *watcher = None;
        }
        self.cache.shutdown().await;
        info!("unmounted drive at {}", self.config.mount.point);
        self.log.append(SyncLogKind::Info, "unmounted", None);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> MountStatus {
        MountStatus {
            mounted: self.is_mounted(),
            strategy: self.config.mount.strategy,
            matters: self.matter_folders.read().await.len(),
            files: self.tree.read().await.file_count(),
            open_handles: self.handles.lock().await.handles.len(),
        }
    }

    /// Rebuild the whole tree from the remote, pruning matters no longer
    /// visible (permission revocation removes the subtree even if cached).
    pub async fn refresh(&self) -> Result<(), DriveError> {
        self.build_tree().await
    }

    /// Re-fetch a single matter's subtree.
    pub async fn refresh_matter(&self, matter_id: &str) -> Result<(), DriveError> {
        let folder = self
            .matter_folders
            .read()
            .await
            .get(matter_id)
            .cloned()
            .ok_or_else(|| DriveError::NotFound(matter_id.to_string()))?;

        {
            let mut tree = self.tree.write().await;
            tree.prune_matter(&folder);
            tree.mkdir_p(&format!("/{}", folder))?;
        }
        self.insert_matter_files(matter_id, &folder).await
    }

    /// Run one sync cycle and fold the resulting tree ops into the tree.
    pub async fn run_sync_cycle(&self) -> Result<SyncReport, DriveError> {
        let report = self.engine.sync_now().await?;
        self.apply_tree_ops(&report.tree_ops).await;
        Ok(report)
    }

    /// Apply an explicit decision to a parked conflict.
    pub async fn resolve_conflict(
        &self,
        document_id: &str,
        choice: ConflictChoice,
    ) -> Result<(), DriveError> {
        let ops = self.engine.resolve_conflict(document_id, choice).await?;
        self.apply_tree_ops(&ops).await;
        Ok(())
    }

    /// Dispatch one bridge request against the tree, cache, and engine.
    pub async fn handle_request(&self, request: BridgeRequest) -> BridgeResponse {
        let id = request.id;
        let result = match request.op {
            BridgeOp::Getattr { path } => self.op_getattr(&path).await,
            BridgeOp::Readdir { path } => self.op_readdir(&path).await,
            BridgeOp::Open { path, write } => self.op_open(&path, write).await,
            BridgeOp::Read {
                handle,
                offset,
                len,
            } => self.op_read(handle, offset, len).await,
            BridgeOp::Write {
                handle,
                offset,
                data,
            } => self.op_write(handle, offset, &data).await,
            BridgeOp::Create { path } => self.op_create(&path).await,
            BridgeOp::Unlink { path } => self.op_unlink(&path).await,
            BridgeOp::Mkdir { path } => self.op_mkdir(&path).await,
            BridgeOp::Rmdir { path } => self.op_rmdir(&path).await,
            BridgeOp::Rename { from, to } => self.op_rename(&from, &to).await,
            BridgeOp::Release { handle } => self.op_release(handle).await,
        };

        match result {
            Ok(reply) => BridgeResponse::ok(id, reply),
            Err(e) => {
                debug!(id, "bridge request failed: {}", e);
                BridgeResponse::err(id, BridgeError::from(e))
            }
        }
    }

    async fn build_tree(&self) -> Result<(), DriveError> {
        let matters = self.remote.list_matters().await?;

        let mut tree = DriveTree::new();
        let mut folders = HashMap::new();
        let mut index = HashMap::new();
        for matter in &matters {
            let mut folder = sanitize_name(&matter.folder_name());
            // Distinct matters must project to distinct folders.
            let mut suffix = 2;
            while index.contains_key(&folder.to_lowercase()) {
                folder = sanitize_name(&format!("{} ({})", matter.folder_name(), suffix));
                suffix += 1;
            }
            tree.mkdir_p(&format!("/{}", folder))?;
            index.insert(folder.to_lowercase(), matter.id.clone());
            folders.insert(matter.id.clone(), folder);
        }

        *self.tree.write().await = tree;
        *self.matter_folders.write().await = folders.clone();
        *self.folder_index.write().await = index;

        for (matter_id, folder) in &folders {
            self.insert_matter_files(matter_id, folder).await?;
        }
        Ok(())
    }

    /// Recursively list one matter and insert its files and folders.
    async fn insert_matter_files(&self, matter_id: &str, folder: &str) -> Result<(), DriveError> {
        let mut pending: Vec<Option<String>> = vec![None];
        while let Some(dir) = pending.pop() {
            let entries = self.remote.list_files(matter_id, dir.as_deref()).await?;
            for entry in entries {
                if entry.is_dir {
                    let mut tree = self.tree.write().await;
                    let mut dir_path = format!("/{}", folder);
                    for comp in entry.path.split('/').filter(|c| !c.is_empty()) {
                        dir_path = format!("{}/{}", dir_path, sanitize_name(comp));
                    }
                    tree.mkdir_p(&dir_path)?;
                    drop(tree);
                    pending.push(Some(entry.path));
                } else if let Some(document_id) = &entry.document_id {
                    let cached = self.cache.is_cached(document_id).await;
                    let mut tree = self.tree.write().await;
                    tree.upsert_file(
                        folder,
                        &entry.path,
                        document_id,
                        entry.size,
                        entry.modified.unwrap_or_else(Utc::now),
                        cached,
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn start_sync_task(self: &Arc<Self>) {
        let mut guard = self.sync_task.lock().await;
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        let interval = self.config.sync.interval.as_duration();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                match manager.run_sync_cycle().await {
                    Ok(report) if !report.skipped => {
                        debug!(
                            uploaded = report.uploaded.len(),
                            downloaded = report.downloaded.len(),
                            "periodic sync cycle done"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!("periodic sync cycle failed: {}", e),
                }
            }
        }));
    }

    async fn apply_tree_ops(&self, ops: &[TreeOp]) {
        if ops.is_empty() {
            return;
        }
        let folders = self.matter_folders.read().await.clone();
        let mut tree = self.tree.write().await;
        for op in ops {
            match op {
                TreeOp::UpsertFile {
                    matter_id,
                    path,
                    document_id,
                    size,
                    modified,
                } => {
                    let Some(folder) = folders.get(matter_id) else {
                        warn!(matter_id, "change for unknown matter, skipping");
                        continue;
                    };
                    if let Err(e) =
                        tree.upsert_file(folder, path, document_id, *size, *modified, true)
                    {
                        warn!(document_id, "failed to upsert node: {}", e);
                    }
                }
                TreeOp::RemoveDocument { document_id } => {
                    tree.remove_document(document_id);
                }
                TreeOp::Relocate {
                    matter_id,
                    document_id,
                    new_path,
                    ..
                } => {
                    let Some(folder) = folders.get(matter_id) else {
                        warn!(matter_id, "relocate for unknown matter, skipping");
                        continue;
                    };
                    let existing = tree
                        .document_path(document_id)
                        .and_then(|p| match tree.lookup(&p) {
                            Some(Node::File(f)) => Some((f.size, f.modified, f.cached)),
                            _ => None,
                        });
                    let Some((size, modified, cached)) = existing else {
                        debug!(document_id, "relocate for unknown document, skipping");
                        continue;
                    };
                    if let Err(e) =
                        tree.upsert_file(folder, new_path, document_id, size, modified, cached)
                    {
                        warn!(document_id, "failed to relocate node: {}", e);
                    }
                }
            }
        }
    }

    // --- bridge operation contracts -------------------------------------

    async fn op_getattr(&self, path: &str) -> Result<BridgeReply, DriveError> {
        let tree = self.tree.read().await;
        let attr = tree.attr(path)?;
        Ok(BridgeReply::Attr {
            attr: AttrDto {
                size: attr.size,
                is_dir: attr.is_dir,
                created: attr.created,
                modified: attr.modified,
                accessed: attr.accessed,
            },
        })
    }

    async fn op_readdir(&self, path: &str) -> Result<BridgeReply, DriveError> {
        let tree = self.tree.read().await;
        let children = tree.children(path)?;
        let entries = children
            .into_iter()
            .map(|node| DirEntryDto {
                name: node.name().to_string(),
                is_dir: node.is_dir(),
                size: match node {
                    Node::File(f) => f.size,
                    Node::Directory { .. } => 0,
                },
            })
            .collect();
        Ok(BridgeReply::Entries { entries })
    }

    /// Open a file, lazily downloading content on first access.
    async fn op_open(&self, path: &str, write: bool) -> Result<BridgeReply, DriveError> {
        let file = self.lookup_file(path).await?;

        if !self.cache.is_cached(&file.document_id).await {
            debug!(document_id = %file.document_id, "cache miss on open, downloading");
            let bytes = self.remote.download_file(&file.document_id).await?;
            self.cache.store(&file.document_id, &bytes).await?;
            self.log.append(
                SyncLogKind::Download,
                format!("downloaded {} on open", file.remote_path),
                Some(&file.document_id),
            );
            let mut tree = self.tree.write().await;
            tree.set_cached(&file.document_id, true);
            tree.touch_document(&file.document_id, bytes.len() as u64, file.modified);
        }

        let handle = self
            .handles
            .lock()
            .await
            .allocate(path.to_string(), file.document_id, write);
        Ok(BridgeReply::Handle { handle })
    }

    async fn op_read(&self, handle: u64, offset: u64, len: u64) -> Result<BridgeReply, DriveError> {
        let document_id = {
            let handles = self.handles.lock().await;
            handles.get(handle)?.document_id.clone()
        };
        let data = self.cache.read(&document_id, offset, len).await?;
        self.handles
            .lock()
            .await
            .advance(handle, offset + data.len() as u64);
        Ok(BridgeReply::Data { data })
    }

    async fn op_write(
        &self,
        handle: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<BridgeReply, DriveError> {
        let open = {
            let handles = self.handles.lock().await;
            handles.get(handle)?.clone()
        };
        if !open.write {
            return Err(DriveError::AccessDenied(open.path));
        }

        let written = self.cache.write(&open.document_id, data, offset).await?;

        let (matter_id, _) = self.split_matter(&open.path).await?;
        let remote_path = {
            let tree = self.tree.read().await;
            match tree.lookup(&open.path) {
                Some(Node::File(f)) => f.remote_path.clone(),
                _ => return Err(DriveError::NotFound(open.path.clone())),
            }
        };
        self.engine
            .mark_dirty(&open.document_id, &matter_id, &remote_path)
            .await;

        let size = self
            .cache
            .entry(&open.document_id)
            .await
            .map(|e| e.size)
            .unwrap_or(0);
        self.tree
            .write()
            .await
            .touch_document(&open.document_id, size, Utc::now());
        self.handles.lock().await.advance(handle, offset + written);

        Ok(BridgeReply::Written { written })
    }

    /// Create a document. Denied at the synthetic root: files exist only
    /// inside a matter.
    async fn op_create(&self, path: &str) -> Result<BridgeReply, DriveError> {
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if comps.len() < 2 {
            return Err(DriveError::AccessDenied(
                "files cannot be created outside a matter".to_string(),
            ));
        }
        if self.tree.read().await.lookup(path).is_some() {
            return Err(DriveError::Exists(path.to_string()));
        }

        let (matter_id, rel_path) = self.split_matter(path).await?;
        let name = comps[comps.len() - 1];
        let rel_parent = parent_of(&rel_path);

        let new_doc = self
            .remote
            .create_file(&matter_id, name, &rel_parent)
            .await?;
        self.cache.create_empty(&new_doc.document_id).await?;

        let folder = comps[0].to_string();
        {
            let mut tree = self.tree.write().await;
            tree.upsert_file(
                &folder,
                &new_doc.remote_path,
                &new_doc.document_id,
                0,
                Utc::now(),
                true,
            )?;
        }

        let handle =
            self.handles
                .lock()
                .await
                .allocate(path.to_string(), new_doc.document_id, true);
        Ok(BridgeReply::Handle { handle })
    }

    async fn op_unlink(&self, path: &str) -> Result<BridgeReply, DriveError> {
        let file = self.lookup_file(path).await?;

        self.remote.delete_file(&file.document_id).await?;
        self.cache.delete(&file.document_id).await;
        self.engine.drop_dirty(&file.document_id).await;
        self.tree.write().await.remove(path)?;

        self.log.append(
            SyncLogKind::Delete,
            format!("deleted {}", file.remote_path),
            Some(&file.document_id),
        );
        Ok(BridgeReply::Unit)
    }

    async fn op_mkdir(&self, path: &str) -> Result<BridgeReply, DriveError> {
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if comps.len() < 2 {
            return Err(DriveError::AccessDenied(
                "folders cannot be created outside a matter".to_string(),
            ));
        }
        if self.tree.read().await.lookup(path).is_some() {
            return Err(DriveError::Exists(path.to_string()));
        }

        let (matter_id, rel_path) = self.split_matter(path).await?;
        let name = comps[comps.len() - 1];
        let rel_parent = parent_of(&rel_path);

        self.remote
            .create_folder(&matter_id, name, &rel_parent)
            .await?;
        self.tree.write().await.mkdir_p(path)?;
        Ok(BridgeReply::Unit)
    }

    async fn op_rmdir(&self, path: &str) -> Result<BridgeReply, DriveError> {
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if comps.len() < 2 {
            // Matter folders are business entities, not directories to rm.
            return Err(DriveError::AccessDenied(path.to_string()));
        }

        {
            let tree = self.tree.read().await;
            if !tree.is_empty_dir(path)? {
                return Err(DriveError::NotEmpty(path.to_string()));
            }
        }

        let (matter_id, rel_path) = self.split_matter(path).await?;
        self.remote.delete_folder(&matter_id, &rel_path).await?;
        self.tree.write().await.remove(path)?;
        Ok(BridgeReply::Unit)
    }

    async fn op_rename(&self, from: &str, to: &str) -> Result<BridgeReply, DriveError> {
        let (from_matter, from_rel) = self.split_matter(from).await?;
        let (to_matter, to_rel) = self.split_matter(to).await?;
        if from_matter != to_matter {
            return Err(DriveError::AccessDenied(
                "cannot move documents between matters".to_string(),
            ));
        }
        if from_rel == "/" || to_rel == "/" {
            // Matter folders are business entities, not renameable dirs.
            return Err(DriveError::AccessDenied(from.to_string()));
        }

        let node_kind = {
            let tree = self.tree.read().await;
            match tree.lookup(from) {
                Some(Node::File(f)) => Some(f.clone()),
                Some(Node::Directory { .. }) => None,
                _ => return Err(DriveError::NotFound(from.to_string())),
            }
        };

        match node_kind {
            Some(file) => {
                let old_parent = parent_of(&from_rel);
                let new_parent = parent_of(&to_rel);
                let new_name = name_of(&to_rel);
                if old_parent != new_parent {
                    self.remote
                        .move_file(&file.document_id, &new_parent)
                        .await?;
                }
                if name_of(&from_rel) != new_name {
                    self.remote.rename_file(&file.document_id, new_name).await?;
                }
                // Keep the dirty bookkeeping pointed at the new path.
                if self.engine.is_dirty(&file.document_id).await {
                    self.engine
                        .mark_dirty(&file.document_id, &from_matter, &to_rel)
                        .await;
                }
                let mut tree = self.tree.write().await;
                tree.rename(from, to)?;
                if let Some(f) = tree.file_mut(to) {
                    f.remote_path = to_rel.clone();
                }
            }
            None => {
                self.remote
                    .rename_folder(&from_matter, &from_rel, &to_rel)
                    .await?;
                self.tree.write().await.rename(from, to)?;
            }
        }
        Ok(BridgeReply::Unit)
    }

    /// Release a handle. A dirty document gets a best-effort immediate
    /// flush for snappier perceived save latency; failures are logged, not
    /// raised — the periodic cycle retries.
    async fn op_release(&self, handle: u64) -> Result<BridgeReply, DriveError> {
        let open = self.handles.lock().await.release(handle)?;

        if self.engine.is_dirty(&open.document_id).await {
            if let Err(e) = self.engine.sync_file(&open.document_id).await {
                warn!(
                    document_id = %open.document_id,
                    "flush-on-close failed, will retry in next cycle: {}",
                    e
                );
            }
        }
        Ok(BridgeReply::Unit)
    }

    // --- helpers --------------------------------------------------------

    async fn lookup_file(&self, path: &str) -> Result<FileNode, DriveError> {
        let tree = self.tree.read().await;
        match tree.lookup(path) {
            Some(Node::File(f)) => Ok(f.clone()),
            Some(Node::Directory { .. }) => Err(DriveError::IsADirectory(path.to_string())),
            None => Err(DriveError::NotFound(path.to_string())),
        }
    }

    /// Split a tree path into (matter_id, matter-relative path).
    async fn split_matter(&self, path: &str) -> Result<(String, String), DriveError> {
        let comps: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let Some((first, rest)) = comps.split_first() else {
            return Err(DriveError::AccessDenied("/".to_string()));
        };
        let matter_id = self
            .folder_index
            .read()
            .await
            .get(&first.to_lowercase())
            .cloned()
            .ok_or_else(|| DriveError::NotFound(path.to_string()))?;
        let rel = if rest.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", rest.join("/"))
        };
        Ok((matter_id, rel))
    }

    // --- shallow strategy -----------------------------------------------

    /// Download every file into the local sync folder and watch it for
    /// changes; edits are mapped back to documents and marked dirty.
    async fn materialize_and_watch(self: &Arc<Self>) -> Result<(), DriveError> {
        let root = PathBuf::from(&self.config.mount.point);
        tokio::fs::create_dir_all(&root).await?;

        let paths: Vec<(String, String)> = {
            let tree = self.tree.read().await;
            let mut out = Vec::new();
            collect_files(&tree, &mut out);
            out
        };

        for (tree_path, document_id) in &paths {
            let bytes = if self.cache.is_cached(document_id).await {
                self.cache.read_full(document_id).await?
            } else {
                let bytes = self.remote.download_file(document_id).await?;
                self.cache.store(document_id, &bytes).await?;
                bytes
            };
            let local = local_path(&root, tree_path);
            if let Some(parent) = local.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&local, &bytes).await?;
        }
        info!(files = paths.len(), "materialized sync folder");

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(tx)
            .map_err(|e| DriveError::Config(format!("watcher setup failed: {}", e)))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| DriveError::Config(format!("watcher setup failed: {}", e)))?;
        {
            let mut guard = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(watcher);
        }

        let manager = Arc::clone(self);
        let runtime = tokio::runtime::Handle::current();
        let task = tokio::task::spawn_blocking(move || {
            while let Ok(Ok(event)) = rx.recv() {
                if !matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    continue;
                }
                for path in event.paths {
                    if path.is_dir() {
                        continue;
                    }
                    let manager = Arc::clone(&manager);
                    if let Err(e) =
                        runtime.block_on(async { manager.ingest_local_file(&path).await })
                    {
                        warn!("failed to ingest local change {}: {}", path.display(), e);
                    }
                }
            }
        });
        *self.watch_task.lock().await = Some(task);
        Ok(())
    }

    /// Fold one watched file change back into the cache and dirty set.
    async fn ingest_local_file(&self, local: &Path) -> Result<(), DriveError> {
        let root = PathBuf::from(&self.config.mount.point);
        let Ok(relative) = local.strip_prefix(&root) else {
            return Ok(());
        };
        let tree_path = format!("/{}", relative.to_string_lossy().replace('\\', "/"));

        let file = {
            let tree = self.tree.read().await;
            match tree.lookup(&tree_path) {
                Some(Node::File(f)) => f.clone(),
                // Untracked files (editor temp files etc.) are ignored.
                _ => return Ok(()),
            }
        };

        let bytes = tokio::fs::read(local).await?;
        let size = bytes.len() as u64;
        self.cache.store_dirty(&file.document_id, &bytes).await?;

        let (matter_id, _) = self.split_matter(&tree_path).await?;
        self.engine
            .mark_dirty(&file.document_id, &matter_id, &file.remote_path)
            .await;
        self.tree
            .write()
            .await
            .touch_document(&file.document_id, size, Utc::now());
        debug!(document_id = %file.document_id, "local edit observed, marked dirty");
        Ok(())
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn local_path(root: &Path, tree_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for comp in tree_path.split('/').filter(|c| !c.is_empty()) {
        out.push(comp);
    }
    out
}

fn collect_files(tree: &DriveTree, out: &mut Vec<(String, String)>) {
    fn walk(node: &Node, path: &str, out: &mut Vec<(String, String)>) {
        match node {
            Node::File(f) => out.push((path.to_string(), f.document_id.clone())),
            Node::Directory { children, .. } => {
                for child in children.values() {
                    let child_path = format!(
                        "{}/{}",
                        if path == "/" { "" } else { path },
                        child.name()
                    );
                    walk(child, &child_path, out);
                }
            }
        }
    }
    if let Ok(children) = tree.children("/") {
        for child in children {
            let path = format!("/{}", child.name());
            walk(child, &path, out);
        }
    }
}
