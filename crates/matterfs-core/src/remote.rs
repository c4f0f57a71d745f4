use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;

/// A client matter: the top-level grouping of documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matter {
    /// Stable matter id.
    pub id: String,
    /// Client display name.
    pub client_name: String,
    /// Matter number assigned by the firm.
    pub number: String,
    /// Matter display name.
    pub name: String,
}

impl Matter {
    /// Folder name projected under the drive root. Sanitization for the host
    /// filesystem is applied by the tree, not here.
    pub fn folder_name(&self) -> String {
        format!("{} - {} {}", self.client_name, self.number, self.name)
    }
}

/// Metadata about a remote file or folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Document id; None for folders.
    pub document_id: Option<String>,
    /// Entry name (file or folder name).
    pub name: String,
    /// Matter-relative path of the entry.
    pub path: String,
    /// Whether this entry is a folder.
    pub is_dir: bool,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Create a new file entry.
    pub fn file(
        document_id: String,
        name: String,
        path: String,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        RemoteEntry {
            document_id: Some(document_id),
            name,
            path,
            is_dir: false,
            size,
            modified,
        }
    }

    /// Create a new folder entry.
    pub fn dir(name: String, path: String, modified: Option<DateTime<Utc>>) -> Self {
        RemoteEntry {
            document_id: None,
            name,
            path,
            is_dir: true,
            size: 0,
            modified,
        }
    }
}

/// Handle returned when a document is created remotely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub document_id: String,
    pub remote_path: String,
}

/// Kind of remote change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Renamed,
    Moved,
}

/// A single entry from the remote change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub document_id: String,
    pub matter_id: String,
    /// Matter-relative path after the change.
    pub path: String,
    /// Previous path for rename/move events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The remote document store consumed by the drive subsystem.
///
/// Implemented over the firm's REST API in production and by an in-memory
/// store in tests.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// List all matters visible to the current user.
    async fn list_matters(&self) -> Result<Vec<Matter>, RemoteError>;

    /// List files and folders of a matter, optionally under a subpath.
    async fn list_files(
        &self,
        matter_id: &str,
        path: Option<&str>,
    ) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Download the full content of a document.
    async fn download_file(&self, document_id: &str) -> Result<Vec<u8>, RemoteError>;

    /// Upload the full content of a document.
    async fn upload_file(&self, document_id: &str, bytes: &[u8]) -> Result<(), RemoteError>;

    /// Create a new (empty) document in a matter folder.
    async fn create_file(
        &self,
        matter_id: &str,
        name: &str,
        path: &str,
    ) -> Result<NewDocument, RemoteError>;

    /// Delete a document.
    async fn delete_file(&self, document_id: &str) -> Result<(), RemoteError>;

    /// Rename a document in place.
    async fn rename_file(&self, document_id: &str, new_name: &str) -> Result<(), RemoteError>;

    /// Move a document to a different folder within its matter.
    async fn move_file(&self, document_id: &str, new_path: &str) -> Result<(), RemoteError>;

    /// Create a folder.
    async fn create_folder(
        &self,
        matter_id: &str,
        name: &str,
        parent_path: &str,
    ) -> Result<(), RemoteError>;

    /// Delete a folder.
    async fn delete_folder(&self, matter_id: &str, path: &str) -> Result<(), RemoteError>;

    /// Rename or move a folder.
    async fn rename_folder(
        &self,
        matter_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), RemoteError>;

    /// Fetch change events recorded after the given timestamp.
    async fn get_changes(&self, since: DateTime<Utc>) -> Result<Vec<ChangeEvent>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matter_folder_name() {
        let matter = Matter {
            id: "m-1".to_string(),
            client_name: "Acme Corp".to_string(),
            number: "2024-017".to_string(),
            name: "Patent Dispute".to_string(),
        };
        assert_eq!(matter.folder_name(), "Acme Corp - 2024-017 Patent Dispute");
    }

    #[test]
    fn test_change_event_serde() {
        let event = ChangeEvent {
            kind: ChangeKind::Renamed,
            document_id: "doc-1".to_string(),
            matter_id: "m-1".to_string(),
            path: "/briefs/new.docx".to_string(),
            old_path: Some("/briefs/old.docx".to_string()),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ChangeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, ChangeKind::Renamed);
        assert_eq!(back.old_path.as_deref(), Some("/briefs/old.docx"));
    }
}
