/// Errors from the remote document API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RemoteError {
    /// Document, matter, or path does not exist remotely.
    #[error("Remote object not found: {0}")]
    NotFound(String),

    /// The caller is not permitted to touch this object.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Request exceeded its deadline.
    #[error("Operation '{operation}' timed out for: {target}")]
    Timeout { operation: String, target: String },

    /// Connection to the remote API failed.
    #[error("Connection to remote failed")]
    ConnectionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Remote returned an unexpected HTTP status.
    #[error("Remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other remote-specific error.
    #[error("Remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Returns true if this error is transient and the operation may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::ConnectionFailed { .. } => true,
            RemoteError::Timeout { .. } => true,
            RemoteError::Status { status, .. } => *status >= 500,
            RemoteError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Errors that can occur across the virtual drive subsystem.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DriveError {
    /// Document has no entry in the local cache.
    #[error("Document not cached: {0}")]
    NotCached(String),

    /// Cache cannot make room: every resident entry is dirty.
    #[error("Cache full: need {needed} bytes, limit is {max}")]
    CacheFull { needed: u64, max: u64 },

    /// Cached bytes no longer match the recorded content hash.
    #[error("Integrity mismatch for cached document: {0}")]
    IntegrityMismatch(String),

    /// Path does not exist.
    #[error("Path not found: {0}")]
    NotFound(String),

    /// Operation not permitted at this location.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Target already exists.
    #[error("Already exists: {0}")]
    Exists(String),

    /// Path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Path is a directory.
    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// Directory still has children.
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// Unknown or already-released file handle.
    #[error("Bad handle: {0}")]
    BadHandle(u64),

    /// Document has an unresolved conflict awaiting a decision.
    #[error("Conflict pending for document: {0}")]
    ConflictPending(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Remote API error.
    #[error(transparent)]
    Remote(RemoteError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),
}

impl From<RemoteError> for DriveError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::NotFound(target) => DriveError::NotFound(target),
            RemoteError::AccessDenied(target) => DriveError::AccessDenied(target),
            other => DriveError::Remote(other),
        }
    }
}

impl From<matterfs_config::ConfigError> for DriveError {
    fn from(e: matterfs_config::ConfigError) -> Self {
        DriveError::Config(e.to_string())
    }
}
