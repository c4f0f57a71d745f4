pub mod client;
pub mod inode;
pub mod runtime;

#[cfg(all(unix, feature = "fuse"))]
pub mod fs;

pub use client::BridgeClient;
pub use inode::{InodeTable, ROOT_INO};
