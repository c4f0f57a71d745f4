pub mod cache;
pub mod error;
pub mod remote;
pub mod synclog;

pub use cache::{CacheEntry, CacheStats, FileCache, FileCacheConfig, VerifyReport};
pub use error::{DriveError, RemoteError};
pub use remote::{ChangeEvent, ChangeKind, Matter, NewDocument, RemoteEntry, RemoteStore};
pub use synclog::{SyncLog, SyncLogEntry, SyncLogKind};
