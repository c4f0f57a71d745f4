//! Inode bookkeeping for the FUSE adapter.
//!
//! FUSE speaks in inode numbers; the bridge protocol speaks in paths. This
//! table provides the stable bidirectional mapping for one mount session.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Reserved inode for the root directory.
pub const ROOT_INO: u64 = 1;

/// Bidirectional path <-> inode mapping.
pub struct InodeTable {
    path_to_ino: RwLock<HashMap<String, u64>>,
    ino_to_path: RwLock<HashMap<u64, String>>,
    next_ino: RwLock<u64>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = InodeTable {
            path_to_ino: RwLock::new(HashMap::new()),
            ino_to_path: RwLock::new(HashMap::new()),
            next_ino: RwLock::new(ROOT_INO + 1),
        };
        table.path_to_ino.write().insert("/".to_string(), ROOT_INO);
        table.ino_to_path.write().insert(ROOT_INO, "/".to_string());
        table
    }

    /// Get or allocate an inode for a path.
    pub fn get_or_create(&self, path: &str) -> u64 {
        let normalized = normalize_path(path);
        if let Some(&ino) = self.path_to_ino.read().get(&normalized) {
            return ino;
        }

        let ino = {
            let mut next = self.next_ino.write();
            let ino = *next;
            *next += 1;
            ino
        };
        self.path_to_ino.write().insert(normalized.clone(), ino);
        self.ino_to_path.write().insert(ino, normalized);
        ino
    }

    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.ino_to_path.read().get(&ino).cloned()
    }

    pub fn get_ino(&self, path: &str) -> Option<u64> {
        self.path_to_ino.read().get(&normalize_path(path)).copied()
    }

    /// Drop a mapping by path (unlink, rmdir).
    pub fn remove_path(&self, path: &str) {
        let normalized = normalize_path(path);
        if let Some(ino) = self.path_to_ino.write().remove(&normalized) {
            self.ino_to_path.write().remove(&ino);
        }
    }

    /// Re-point an inode at a new path (rename). The inode stays stable so
    /// open handles survive the move.
    pub fn rename_path(&self, from: &str, to: &str) {
        let from = normalize_path(from);
        let to = normalize_path(to);
        let mut path_to_ino = self.path_to_ino.write();
        let mut ino_to_path = self.ino_to_path.write();
        if let Some(ino) = path_to_ino.remove(&from) {
            path_to_ino.insert(to.clone(), ino);
            ino_to_path.insert(ino, to);
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    let mut out = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}
