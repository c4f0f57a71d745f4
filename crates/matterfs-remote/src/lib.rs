pub mod bridge;
pub mod mount;
pub mod remote;
pub mod sync;
pub mod tree;

pub use bridge::{BridgeError, BridgeOp, BridgeReply, BridgeRequest, BridgeResponse, ErrorCode};
pub use mount::{MountManager, MountStatus};
pub use remote::{HttpRemoteClient, InMemoryRemote};
pub use sync::{ConflictChoice, ConflictEvent, DirtyFile, SyncEngine, SyncReport, SyncStatus};
pub use tree::{DriveTree, FileAttr, Node, TreeOp};
