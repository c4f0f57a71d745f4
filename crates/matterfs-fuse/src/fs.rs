//! Unix FUSE adapter: translates `fuser` callbacks into bridge calls.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use tracing::debug;

use matterfs_remote::bridge::{AttrDto, BridgeError, BridgeOp, BridgeReply, ErrorCode};

use crate::client::BridgeClient;
use crate::inode::{InodeTable, ROOT_INO};
use crate::runtime::{block_on, init_runtime};

const TTL: Duration = Duration::from_secs(1);

/// FUSE filesystem backed by a bridge client.
pub struct MatterFuse {
    client: Arc<BridgeClient>,
    inodes: InodeTable,
}

impl MatterFuse {
    pub fn new(client: Arc<BridgeClient>) -> std::io::Result<Self> {
        init_runtime()?;
        Ok(MatterFuse {
            client,
            inodes: InodeTable::new(),
        })
    }

    /// Mount at `mountpoint` and serve callbacks until unmounted.
    pub fn run(self, mountpoint: &str) -> std::io::Result<()> {
        let options = [
            MountOption::FSName("matterfs".to_string()),
            MountOption::DefaultPermissions,
            MountOption::NoExec,
        ];
        fuser::mount2(self, mountpoint, &options)
    }

    fn errno(e: &BridgeError) -> i32 {
        match e.code {
            ErrorCode::NotFound => libc::ENOENT,
            ErrorCode::AccessDenied => libc::EACCES,
            ErrorCode::Exists => libc::EEXIST,
            ErrorCode::NotADirectory => libc::ENOTDIR,
            ErrorCode::IsADirectory => libc::EISDIR,
            ErrorCode::NoSpace => libc::ENOSPC,
            ErrorCode::NotEmpty => libc::ENOTEMPTY,
            ErrorCode::BadHandle => libc::EBADF,
            ErrorCode::IoError => libc::EIO,
        }
    }

    fn to_file_attr(&self, ino: u64, attr: &AttrDto) -> FileAttr {
        let kind = if attr.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: to_system_time(attr.accessed),
            mtime: to_system_time(attr.modified),
            ctime: to_system_time(attr.modified),
            crtime: to_system_time(attr.created),
            kind,
            perm: if attr.is_dir { 0o755 } else { 0o644 },
            nlink: if attr.is_dir { 2 } else { 1 },
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn getattr_for_path(&self, path: &str) -> Result<AttrDto, BridgeError> {
        let client = Arc::clone(&self.client);
        let path = path.to_string();
        let reply = block_on(async move { client.call(BridgeOp::Getattr { path }).await })?;
        match reply {
            BridgeReply::Attr { attr } => Ok(attr),
            _ => Err(BridgeError {
                code: ErrorCode::IoError,
                message: "unexpected reply".to_string(),
            }),
        }
    }

    fn child_path(parent: &str, name: &str) -> String {
        if parent == "/" {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        }
    }

    fn resolve(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let parent_path = self.inodes.get_path(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(Self::child_path(&parent_path, name))
    }
}

fn to_system_time(at: DateTime<Utc>) -> SystemTime {
    SystemTime::from(at)
}

impl Filesystem for MatterFuse {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.resolve(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.getattr_for_path(&path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_create(&path);
                reply.entry(&TTL, &self.to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.get_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.getattr_for_path(&path) {
            Ok(attr) => reply.attr(&TTL, &self.to_file_attr(ino, &attr)),
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.get_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        let client = Arc::clone(&self.client);
        let call_path = path.clone();
        let result =
            block_on(async move { client.call(BridgeOp::Readdir { path: call_path }).await });

        let entries = match result {
            Ok(BridgeReply::Entries { entries }) => entries,
            Ok(_) => return reply.error(libc::EIO),
            Err(e) => return reply.error(Self::errno(&e)),
        };

        let mut position = offset;
        let parent_ino = if ino == ROOT_INO { ROOT_INO } else { ino };
        let mut all = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for entry in entries {
            let child = Self::child_path(&path, &entry.name);
            let child_ino = self.inodes.get_or_create(&child);
            let kind = if entry.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            all.push((child_ino, kind, entry.name));
        }

        for (child_ino, kind, name) in all.into_iter().skip(offset as usize) {
            position += 1;
            if reply.add(child_ino, position, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.get_path(ino) else {
            return reply.error(libc::ENOENT);
        };
        let write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        let client = Arc::clone(&self.client);
        let result = block_on(async move { client.call(BridgeOp::Open { path, write }).await });
        match result {
            Ok(BridgeReply::Handle { handle }) => reply.opened(handle, 0),
            Ok(_) => reply.error(libc::EIO),
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.resolve(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let client = Arc::clone(&self.client);
        let call_path = path.clone();
        let result =
            block_on(async move { client.call(BridgeOp::Create { path: call_path }).await });
        let handle = match result {
            Ok(BridgeReply::Handle { handle }) => handle,
            Ok(_) => return reply.error(libc::EIO),
            Err(e) => return reply.error(Self::errno(&e)),
        };
        match self.getattr_for_path(&path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_create(&path);
                reply.created(&TTL, &self.to_file_attr(ino, &attr), 0, handle, 0);
            }
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let client = Arc::clone(&self.client);
        let result = block_on(async move {
            client
                .call(BridgeOp::Read {
                    handle: fh,
                    offset: offset.max(0) as u64,
                    len: size as u64,
                })
                .await
        });
        match result {
            Ok(BridgeReply::Data { data }) => reply.data(&data),
            Ok(_) => reply.error(libc::EIO),
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let client = Arc::clone(&self.client);
        let payload = data.to_vec();
        let result = block_on(async move {
            client
                .call(BridgeOp::Write {
                    handle: fh,
                    offset: offset.max(0) as u64,
                    data: payload,
                })
                .await
        });
        match result {
            Ok(BridgeReply::Written { written }) => reply.written(written as u32),
            Ok(_) => reply.error(libc::EIO),
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.resolve(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let client = Arc::clone(&self.client);
        let call_path = path.clone();
        let result =
            block_on(async move { client.call(BridgeOp::Unlink { path: call_path }).await });
        match result {
            Ok(_) => {
                self.inodes.remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.resolve(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let client = Arc::clone(&self.client);
        let call_path = path.clone();
        let result =
            block_on(async move { client.call(BridgeOp::Mkdir { path: call_path }).await });
        if let Err(e) = result {
            return reply.error(Self::errno(&e));
        }
        match self.getattr_for_path(&path) {
            Ok(attr) => {
                let ino = self.inodes.get_or_create(&path);
                reply.entry(&TTL, &self.to_file_attr(ino, &attr), 0);
            }
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.resolve(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let client = Arc::clone(&self.client);
        let call_path = path.clone();
        let result =
            block_on(async move { client.call(BridgeOp::Rmdir { path: call_path }).await });
        match result {
            Ok(_) => {
                self.inodes.remove_path(&path);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = match self.resolve(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let to = match self.resolve(newparent, newname) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let client = Arc::clone(&self.client);
        let (call_from, call_to) = (from.clone(), to.clone());
        let result = block_on(async move {
            client
                .call(BridgeOp::Rename {
                    from: call_from,
                    to: call_to,
                })
                .await
        });
        match result {
            Ok(_) => {
                self.inodes.rename_path(&from, &to);
                reply.ok();
            }
            Err(e) => reply.error(Self::errno(&e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let client = Arc::clone(&self.client);
        let result =
            block_on(async move { client.call(BridgeOp::Release { handle: fh }).await });
        match result {
            Ok(_) => reply.ok(),
            Err(e) => {
                debug!("release failed: {}", e);
                reply.error(Self::errno(&e));
            }
        }
    }

    fn flush(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}
