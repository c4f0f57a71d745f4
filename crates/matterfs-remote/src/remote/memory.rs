use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use matterfs_core::{
    ChangeEvent, ChangeKind, Matter, NewDocument, RemoteEntry, RemoteError, RemoteStore,
};

#[derive(Debug, Clone)]
struct DocRecord {
    matter_id: String,
    /// Matter-relative path, always starting with '/'.
    path: String,
    bytes: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    matters: Vec<Matter>,
    docs: HashMap<String, DocRecord>,
    folders: HashSet<(String, String)>,
    changes: Vec<ChangeEvent>,
    uploads: Vec<(String, Vec<u8>)>,
    fail_uploads: u32,
    next_doc: u64,
}

/// In-memory remote store for tests and offline development.
///
/// Local-originated mutations (upload, create, delete, rename) do not feed
/// the change journal — the production change feed excludes the caller's own
/// device. Remote-side edits are injected with the `remote_*` helpers, which
/// both mutate state and journal a change event.
pub struct InMemoryRemote {
    inner: RwLock<Inner>,
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
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

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        InMemoryRemote {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn add_matter(&self, id: &str, client_name: &str, number: &str, name: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.matters.push(Matter {
            id: id.to_string(),
            client_name: client_name.to_string(),
            number: number.to_string(),
            name: name.to_string(),
        });
    }

    pub fn remove_matter(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.matters.retain(|m| m.id != id);
        inner.docs.retain(|_, d| d.matter_id != id);
        inner.folders.retain(|(m, _)| m != id);
    }

    /// Seed a document without journaling a change.
    pub fn seed_document(&self, matter_id: &str, path: &str, bytes: &[u8]) -> String {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.next_doc += 1;
        let id = format!("doc-{}", inner.next_doc);
        inner.docs.insert(
            id.clone(),
            DocRecord {
                matter_id: matter_id.to_string(),
                path: normalize(path),
                bytes: bytes.to_vec(),
                modified: Utc::now(),
            },
        );
        id
    }

    /// Seed a folder without journaling a change.
    pub fn seed_folder(&self, matter_id: &str, path: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .folders
            .insert((matter_id.to_string(), normalize(path)));
    }

    /// Simulate another device updating a document.
    pub fn remote_update(&self, document_id: &str, bytes: &[u8]) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(doc) = inner.docs.get_mut(document_id) else {
            return;
        };
        doc.bytes = bytes.to_vec();
        doc.modified = Utc::now();
        let (matter_id, path) = (doc.matter_id.clone(), doc.path.clone());
        inner.changes.push(ChangeEvent {
            kind: ChangeKind::Updated,
            document_id: document_id.to_string(),
            matter_id,
            path,
            old_path: None,
            timestamp: Utc::now(),
        });
    }

    /// Simulate another device creating a document.
    pub fn remote_create(&self, matter_id: &str, path: &str, bytes: &[u8]) -> String {
        let id = self.seed_document(matter_id, path, bytes);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.changes.push(ChangeEvent {
            kind: ChangeKind::Created,
            document_id: id.clone(),
            matter_id: matter_id.to_string(),
            path: normalize(path),
            old_path: None,
            timestamp: Utc::now(),
        });
        id
    }

    /// Simulate another device deleting a document.
    pub fn remote_delete(&self, document_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(doc) = inner.docs.remove(document_id) else {
            return;
        };
        inner.changes.push(ChangeEvent {
            kind: ChangeKind::Deleted,
            document_id: document_id.to_string(),
            matter_id: doc.matter_id,
            path: doc.path,
            old_path: None,
            timestamp: Utc::now(),
        });
    }

    /// Simulate another device renaming a document in place.
    pub fn remote_rename(&self, document_id: &str, new_name: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(doc) = inner.docs.get_mut(document_id) else {
            return;
        };
        let old_path = doc.path.clone();
        doc.path = join(&parent_of(&old_path), new_name);
        let (matter_id, path) = (doc.matter_id.clone(), doc.path.clone());
        inner.changes.push(ChangeEvent {
            kind: ChangeKind::Renamed,
            document_id: document_id.to_string(),
            matter_id,
            path,
            old_path: Some(old_path),
            timestamp: Utc::now(),
        });
    }

    /// Make the next `n` uploads fail with a transient 503.
    pub fn fail_uploads(&self, n: u32) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.fail_uploads = n;
    }

    /// All successful uploads observed so far, in order.
    pub fn uploads(&self) -> Vec<(String, Vec<u8>)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.uploads.clone()
    }

    /// Current bytes of a document.
    pub fn document_bytes(&self, document_id: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.docs.get(document_id).map(|d| d.bytes.clone())
    }

    /// Current path of a document.
    pub fn document_path(&self, document_id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.docs.get(document_id).map(|d| d.path.clone())
    }

    /// Find a document id by matter and path.
    pub fn document_at(&self, matter_id: &str, path: &str) -> Option<String> {
        let needle = normalize(path);
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .docs
            .iter()
            .find(|(_, d)| d.matter_id == matter_id && d.path == needle)
            .map(|(id, _)| id.clone())
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn list_matters(&self) -> Result<Vec<Matter>, RemoteError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.matters.clone())
    }

    async fn list_files(
        &self,
        matter_id: &str,
        path: Option<&str>,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let parent = normalize(path.unwrap_or("/"));
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());

        let mut entries: HashMap<String, RemoteEntry> = HashMap::new();
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{}/", parent)
        };

        for (id, doc) in inner.docs.iter().filter(|(_, d)| d.matter_id == matter_id) {
            let Some(rest) = doc.path.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                // Direct child file.
                None => {
                    entries.insert(
                        rest.to_string(),
                        RemoteEntry::file(
                            id.clone(),
                            rest.to_string(),
                            doc.path.clone(),
                            doc.bytes.len() as u64,
                            Some(doc.modified),
                        ),
                    );
                }
                // Implied subfolder.
                Some((first, _)) => {
                    entries.entry(first.to_string()).or_insert_with(|| {
                        RemoteEntry::dir(first.to_string(), join(&parent, first), None)
                    });
                }
            }
        }

        for (_, folder_path) in inner
            .folders
            .iter()
            .filter(|(m, _)| m == matter_id)
        {
            if let Some(rest) = folder_path.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries
                        .entry(rest.to_string())
                        .or_insert_with(|| RemoteEntry::dir(rest.to_string(), folder_path.clone(), None));
                }
            }
        }

        let mut result: Vec<_> = entries.into_values().collect();
        result.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(result)
    }

    async fn download_file(&self, document_id: &str) -> Result<Vec<u8>, RemoteError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .docs
            .get(document_id)
            .map(|d| d.bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))
    }

    async fn upload_file(&self, document_id: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.fail_uploads > 0 {
            inner.fail_uploads -= 1;
            return Err(RemoteError::Status {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }
        let doc = inner
            .docs
            .get_mut(document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
        doc.bytes = bytes.to_vec();
        doc.modified = Utc::now();
        inner
            .uploads
            .push((document_id.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn create_file(
        &self,
        matter_id: &str,
        name: &str,
        path: &str,
    ) -> Result<NewDocument, RemoteError> {
        let full_path = join(&normalize(path), name);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner
            .docs
            .values()
            .any(|d| d.matter_id == matter_id && d.path == full_path)
        {
            return Err(RemoteError::Other(format!("already exists: {}", full_path)));
        }
        inner.next_doc += 1;
        let id = format!("doc-{}", inner.next_doc);
        inner.docs.insert(
            id.clone(),
            DocRecord {
                matter_id: matter_id.to_string(),
                path: full_path.clone(),
                bytes: Vec::new(),
                modified: Utc::now(),
            },
        );
        Ok(NewDocument {
            document_id: id,
            remote_path: full_path,
        })
    }

    async fn delete_file(&self, document_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .docs
            .remove(document_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))
    }

    async fn rename_file(&self, document_id: &str, new_name: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let doc = inner
            .docs
            .get_mut(document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
        doc.path = join(&parent_of(&doc.path), new_name);
        doc.modified = Utc::now();
        Ok(())
    }

    async fn move_file(&self, document_id: &str, new_path: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let doc = inner
            .docs
            .get_mut(document_id)
            .ok_or_else(|| RemoteError::NotFound(document_id.to_string()))?;
        let name = name_of(&doc.path).to_string();
        doc.path = join(&normalize(new_path), &name);
        doc.modified = Utc::now();
        Ok(())
    }

    async fn create_folder(
        &self,
        matter_id: &str,
        name: &str,
        parent_path: &str,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .folders
            .insert((matter_id.to_string(), join(&normalize(parent_path), name)));
        Ok(())
    }

    async fn delete_folder(&self, matter_id: &str, path: &str) -> Result<(), RemoteError> {
        let path = normalize(path);
        let prefix = format!("{}/", path);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .folders
            .retain(|(m, p)| !(m == matter_id && (p == &path || p.starts_with(&prefix))));
        inner
            .docs
            .retain(|_, d| !(d.matter_id == matter_id && d.path.starts_with(&prefix)));
        Ok(())
    }

    async fn rename_folder(
        &self,
        matter_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), RemoteError> {
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        let old_prefix = format!("{}/", old_path);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let folders: Vec<_> = inner.folders.drain().collect();
        inner.folders = folders
            .into_iter()
            .map(|(m, p)| {
                if m == matter_id && p == old_path {
                    (m, new_path.clone())
                } else if m == matter_id && p.starts_with(&old_prefix) {
                    let rest = p[old_prefix.len()..].to_string();
                    (m, format!("{}/{}", new_path, rest))
                } else {
                    (m, p)
                }
            })
            .collect();

        for doc in inner.docs.values_mut() {
            if doc.matter_id == matter_id && doc.path.starts_with(&old_prefix) {
                let rest = doc.path[old_prefix.len()..].to_string();
                doc.path = format!("{}/{}", new_path, rest);
            }
        }
        Ok(())
    }

    async fn get_changes(&self, since: DateTime<Utc>) -> Result<Vec<ChangeEvent>, RemoteError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .changes
            .iter()
            .filter(|c| c.timestamp > since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_files_synthesizes_folders() {
        let remote = InMemoryRemote::new();
        remote.add_matter("m-1", "Acme", "2024-001", "General");
        remote.seed_document("m-1", "/briefs/opening.docx", b"draft");
        remote.seed_document("m-1", "/notes.txt", b"notes");

        let entries = remote.list_files("m-1", None).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[0].name, "briefs");
        assert_eq!(entries[1].name, "notes.txt");

        let nested = remote.list_files("m-1", Some("/briefs")).await.unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name, "opening.docx");
        assert_eq!(nested[0].size, 5);
    }

    #[tokio::test]
    async fn test_upload_failure_injection() {
        let remote = InMemoryRemote::new();
        remote.add_matter("m-1", "Acme", "2024-001", "General");
        let id = remote.seed_document("m-1", "/a.txt", b"v1");

        remote.fail_uploads(1);
        let err = remote.upload_file(&id, b"v2").await.unwrap_err();
        assert!(err.is_transient());

        remote.upload_file(&id, b"v2").await.unwrap();
        assert_eq!(remote.document_bytes(&id).unwrap(), b"v2");
        assert_eq!(remote.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_change_journal() {
        let remote = InMemoryRemote::new();
        remote.add_matter("m-1", "Acme", "2024-001", "General");
        let id = remote.seed_document("m-1", "/a.txt", b"v1");

        let t0 = Utc::now();
        remote.remote_update(&id, b"v2");

        let changes = remote.get_changes(t0).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Updated);

        // Everything before t0 is filtered.
        let later = remote.get_changes(Utc::now()).await.unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_rename_folder_rewrites_doc_paths() {
        let remote = InMemoryRemote::new();
        remote.add_matter("m-1", "Acme", "2024-001", "General");
        let id = remote.seed_document("m-1", "/old/deep/file.txt", b"x");
        remote.seed_folder("m-1", "/old");

        remote.rename_folder("m-1", "/old", "/new").await.unwrap();
        assert_eq!(remote.document_path(&id).unwrap(), "/new/deep/file.txt");
    }
}
