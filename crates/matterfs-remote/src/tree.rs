use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use matterfs_core::DriveError;

/// Maximum length of a projected file or folder name.
pub const MAX_NAME_LEN: usize = 160;

/// A node in the drive tree. Children are keyed by the lowercased sanitized
/// name, so lookups are case-insensitive while display names are preserved.
#[derive(Debug, Clone)]
pub enum Node {
    Directory {
        name: String,
        children: BTreeMap<String, Node>,
    },
    File(FileNode),
}

/// A file node mirroring one remote document.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub name: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub document_id: String,
    /// Matter-relative path on the remote store.
    pub remote_path: String,
    /// Whether content is resident in the local cache.
    pub cached: bool,
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Directory { name, .. } => name,
            Node::File(f) => &f.name,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory { .. })
    }
}

/// Attribute snapshot for getattr-style queries.
#[derive(Debug, Clone)]
pub struct FileAttr {
    pub size: u64,
    pub is_dir: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
}

/// Tree mutation produced by the sync engine when applying remote changes.
/// The mount manager is the only writer of the tree, so ops travel as data.
#[derive(Debug, Clone)]
pub enum TreeOp {
    UpsertFile {
        matter_id: String,
        path: String,
        document_id: String,
        size: u64,
        modified: DateTime<Utc>,
    },
    RemoveDocument {
        document_id: String,
    },
    Relocate {
        matter_id: String,
        document_id: String,
        old_path: Option<String>,
        new_path: String,
    },
}

/// Substitute characters illegal on the host filesystem and bound length.
/// Applied consistently so lookups by sanitized name are stable.
pub fn sanitize_name(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
                '_'
            } else {
                c
            }
        })
        .collect();

    while cleaned.ends_with('.') || cleaned.ends_with(' ') {
        cleaned.pop();
    }
    if cleaned.is_empty() {
        return "_".to_string();
    }

    if cleaned.chars().count() > MAX_NAME_LEN {
        // Keep the extension when truncating.
        let (stem, ext) = match cleaned.rfind('.') {
            Some(idx) if idx > 0 && cleaned.len() - idx <= 16 => {
                (cleaned[..idx].to_string(), cleaned[idx..].to_string())
            }
            _ => (cleaned.clone(), String::new()),
        };
        let keep = MAX_NAME_LEN.saturating_sub(ext.chars().count());
        cleaned = stem.chars().take(keep).collect::<String>() + &ext;
    }

    cleaned
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// The authoritative in-memory mirror of the remote hierarchy.
///
/// A pure ownership tree: directories own their children, files carry no
/// back-pointers, and a separate document-id index resolves paths for
/// change application.
pub struct DriveTree {
    root: BTreeMap<String, Node>,
    /// document_id -> full tree path ("/Matter Folder/sub/file.txt").
    doc_index: HashMap<String, String>,
}

impl DriveTree {
    pub fn new() -> Self {
        DriveTree {
            root: BTreeMap::new(),
            doc_index: HashMap::new(),
        }
    }

    /// Look up a node by path. The synthetic root is not a node; "/"
    /// returns None.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let comps = components(path);
        let (first, rest) = comps.split_first()?;
        let mut node = self.root.get(&first.to_lowercase())?;
        for comp in rest {
            match node {
                Node::Directory { children, .. } => {
                    node = children.get(&comp.to_lowercase())?;
                }
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    /// Attribute snapshot for a path; directories report size 0.
    pub fn attr(&self, path: &str) -> Result<FileAttr, DriveError> {
        if components(path).is_empty() {
            let now = Utc::now();
            return Ok(FileAttr {
                size: 0,
                is_dir: true,
                created: now,
                modified: now,
                accessed: now,
            });
        }
        match self.lookup(path) {
            Some(Node::Directory { .. }) => {
                let now = Utc::now();
                Ok(FileAttr {
                    size: 0,
                    is_dir: true,
                    created: now,
                    modified: now,
                    accessed: now,
                })
            }
            Some(Node::File(f)) => Ok(FileAttr {
                size: f.size,
                is_dir: false,
                created: f.created,
                modified: f.modified,
                accessed: f.accessed,
            }),
            None => Err(DriveError::NotFound(path.to_string())),
        }
    }

    /// Child nodes of a directory, in name order.
    pub fn children(&self, path: &str) -> Result<Vec<&Node>, DriveError> {
        if components(path).is_empty() {
            return Ok(self.root.values().collect());
        }
        match self.lookup(path) {
            Some(Node::Directory { children, .. }) => Ok(children.values().collect()),
            Some(Node::File(_)) => Err(DriveError::NotADirectory(path.to_string())),
            None => Err(DriveError::NotFound(path.to_string())),
        }
    }

    /// Ensure a directory path exists, creating (sanitized) intermediate
    /// directories, and return the full sanitized path.
    pub fn mkdir_p(&mut self, path: &str) -> Result<String, DriveError> {
        let mut current = &mut self.root;
        let mut built = String::new();
        for comp in components(path) {
            let display = sanitize_name(comp);
            let key = display.to_lowercase();
            built.push('/');
            built.push_str(&display);
            let node = current.entry(key).or_insert_with(|| Node::Directory {
                name: display,
                children: BTreeMap::new(),
            });
            match node {
                Node::Directory { children, .. } => current = children,
                Node::File(_) => return Err(DriveError::NotADirectory(built)),
            }
        }
        Ok(built)
    }

    /// Insert a file under an existing directory path. The file name is
    /// sanitized; the resulting tree path is returned and indexed.
    pub fn insert_file(&mut self, dir_path: &str, mut file: FileNode) -> Result<String, DriveError> {
        file.name = sanitize_name(&file.name);
        let dir = self.dir_children_mut(dir_path)?;
        let key = file.name.to_lowercase();
        let full_path = join_path(dir_path, &file.name);
        let document_id = file.document_id.clone();
        dir.insert(key, Node::File(file));
        self.doc_index.insert(document_id, full_path.clone());
        Ok(full_path)
    }

    /// Insert (or re-insert) a file, creating intermediate directories.
    /// Used when building the tree and when applying remote changes.
    pub fn upsert_file(
        &mut self,
        matter_folder: &str,
        rel_path: &str,
        document_id: &str,
        size: u64,
        modified: DateTime<Utc>,
        cached: bool,
    ) -> Result<String, DriveError> {
        // Drop any stale node if the document already lives elsewhere.
        let existing = self.doc_index.get(document_id).cloned();
        if let Some(old_path) = &existing {
            let _ = self.remove(old_path);
        }

        let comps = components(rel_path);
        let (name, parents) = match comps.split_last() {
            Some((name, parents)) => (*name, parents),
            None => return Err(DriveError::NotFound(rel_path.to_string())),
        };

        let mut dir_path = format!("/{}", sanitize_name(matter_folder));
        self.mkdir_p(&dir_path)?;
        for parent in parents {
            dir_path = join_path(&dir_path, &sanitize_name(parent));
        }
        self.mkdir_p(&dir_path)?;

        let now = Utc::now();
        let path = self.insert_file(
            &dir_path,
            FileNode {
                name: name.to_string(),
                size,
                created: now,
                modified,
                accessed: now,
                document_id: document_id.to_string(),
                remote_path: rel_path.to_string(),
                cached,
            },
        )?;
        debug!(document_id, %path, relocated = existing.is_some(), "upserted file node");
        Ok(path)
    }

    /// Remove a node (file or directory). Removed documents are dropped
    /// from the index.
    pub fn remove(&mut self, path: &str) -> Result<Node, DriveError> {
        let comps = components(path);
        let (name, parents) = comps
            .split_last()
            .ok_or_else(|| DriveError::AccessDenied("/".to_string()))?;

        let parent = self.dir_children_mut_by_comps(parents, path)?;
        let node = parent
            .remove(&name.to_lowercase())
            .ok_or_else(|| DriveError::NotFound(path.to_string()))?;

        let mut removed_docs = Vec::new();
        collect_document_ids(&node, &mut removed_docs);
        for id in removed_docs {
            self.doc_index.remove(&id);
        }
        Ok(node)
    }

    /// Whether a directory has no children.
    pub fn is_empty_dir(&self, path: &str) -> Result<bool, DriveError> {
        match self.lookup(path) {
            Some(Node::Directory { children, .. }) => Ok(children.is_empty()),
            Some(Node::File(_)) => Err(DriveError::NotADirectory(path.to_string())),
            None => Err(DriveError::NotFound(path.to_string())),
        }
    }

    /// Relocate a node: delete from the old parent, insert into the new one,
    /// then repair the document index for the moved subtree.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), DriveError> {
        if self.lookup(to).is_some() {
            return Err(DriveError::Exists(to.to_string()));
        }
        let to_comps = components(to);
        let (new_name, to_parents) = to_comps
            .split_last()
            .ok_or_else(|| DriveError::AccessDenied("/".to_string()))?;
        let new_name = sanitize_name(new_name);

        // The destination parent must already exist.
        self.dir_children_mut_by_comps(to_parents, to)?;

        let mut node = self.remove(from)?;
        match &mut node {
            Node::Directory { name, .. } => *name = new_name.clone(),
            Node::File(f) => f.name = new_name.clone(),
        }

        let parent = self.dir_children_mut_by_comps(to_parents, to)?;
        parent.insert(new_name.to_lowercase(), node);

        let new_path = {
            let mut p = String::new();
            for comp in to_parents {
                p = join_path(&p, comp);
            }
            join_path(&p, &new_name)
        };
        self.reindex_subtree(&new_path);
        Ok(())
    }

    /// Full tree path of a document, if present.
    pub fn document_path(&self, document_id: &str) -> Option<String> {
        self.doc_index.get(document_id).cloned()
    }

    /// Remove a document node via the index. No-op if absent.
    pub fn remove_document(&mut self, document_id: &str) {
        if let Some(path) = self.doc_index.get(document_id).cloned() {
            let _ = self.remove(&path);
        }
    }

    /// Update cached flag for a document.
    pub fn set_cached(&mut self, document_id: &str, cached: bool) {
        if let Some(path) = self.doc_index.get(document_id).cloned() {
            if let Some(file) = self.file_mut(&path) {
                file.cached = cached;
            }
        }
    }

    /// Update size and modification time for a document.
    pub fn touch_document(&mut self, document_id: &str, size: u64, modified: DateTime<Utc>) {
        if let Some(path) = self.doc_index.get(document_id).cloned() {
            if let Some(file) = self.file_mut(&path) {
                file.size = size;
                file.modified = modified;
                file.accessed = modified;
            }
        }
    }

    /// Mutable access to a file node by path.
    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileNode> {
        let comps = components(path);
        let (name, parents) = comps.split_last()?;
        let parent = self.dir_children_mut_by_comps(parents, path).ok()?;
        match parent.get_mut(&name.to_lowercase()) {
            Some(Node::File(f)) => Some(f),
            _ => None,
        }
    }

    /// Names of the matter folders under the root.
    pub fn matter_folders(&self) -> Vec<String> {
        self.root.values().map(|n| n.name().to_string()).collect()
    }

    /// Remove a matter folder and everything under it.
    pub fn prune_matter(&mut self, folder_name: &str) {
        let path = format!("/{}", folder_name);
        let _ = self.remove(&path);
    }

    /// Total number of file nodes.
    pub fn file_count(&self) -> usize {
        self.doc_index.len()
    }

    fn dir_children_mut(&mut self, path: &str) -> Result<&mut BTreeMap<String, Node>, DriveError> {
        let comps = components(path);
        self.dir_children_mut_by_comps(&comps, path)
    }

    fn dir_children_mut_by_comps(
        &mut self,
        comps: &[&str],
        display_path: &str,
    ) -> Result<&mut BTreeMap<String, Node>, DriveError> {
        let mut current = &mut self.root;
        for comp in comps {
            let node = current
                .get_mut(&comp.to_lowercase())
                .ok_or_else(|| DriveError::NotFound(display_path.to_string()))?;
            match node {
                Node::Directory { children, .. } => current = children,
                Node::File(_) => return Err(DriveError::NotADirectory(display_path.to_string())),
            }
        }
        Ok(current)
    }

    /// Rebuild index entries for every document under `path`.
    fn reindex_subtree(&mut self, path: &str) {
        let Some(node) = self.lookup(path) else {
            return;
        };
        let mut updates = Vec::new();
        index_subtree(node, path, &mut updates);
        for (id, p) in updates {
            self.doc_index.insert(id, p);
        }
    }
}

impl Default for DriveTree {
    fn default() -> Self {
        Self::new()
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

fn collect_document_ids(node: &Node, out: &mut Vec<String>) {
    match node {
        Node::File(f) => out.push(f.document_id.clone()),
        Node::Directory { children, .. } => {
            for child in children.values() {
                collect_document_ids(child, out);
            }
        }
    }
}

fn index_subtree(node: &Node, path: &str, out: &mut Vec<(String, String)>) {
    match node {
        Node::File(f) => out.push((f.document_id.clone(), path.to_string())),
        Node::Directory { children, .. } => {
            for child in children.values() {
                index_subtree(child, &join_path(path, child.name()), out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, id: &str) -> FileNode {
        let now = Utc::now();
        FileNode {
            name: name.to_string(),
            size: 10,
            created: now,
            modified: now,
            accessed: now,
            document_id: id.to_string(),
            remote_path: format!("/{}", name),
            cached: false,
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("brief: v2?.docx"), "brief_ v2_.docx");
        assert_eq!(sanitize_name("trailing. . "), "trailing");
        assert_eq!(sanitize_name("***"), "___");
        assert_eq!(sanitize_name(". "), "_");

        let long = format!("{}.docx", "a".repeat(200));
        let sanitized = sanitize_name(&long);
        assert!(sanitized.chars().count() <= MAX_NAME_LEN);
        assert!(sanitized.ends_with(".docx"));
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut tree = DriveTree::new();
        tree.mkdir_p("/Acme - 001 General/Briefs").unwrap();
        tree.insert_file("/Acme - 001 General/Briefs", file("Opening.docx", "doc-1"))
            .unwrap();

        assert!(tree.lookup("/acme - 001 general/briefs/opening.DOCX").is_some());
        assert!(tree.lookup("/ACME - 001 GENERAL").is_some());
        assert!(tree.lookup("/acme - 001 general/missing").is_none());
    }

    #[test]
    fn test_upsert_builds_directories() {
        let mut tree = DriveTree::new();
        let path = tree
            .upsert_file("Acme - 001 General", "/briefs/deep/opening.docx", "doc-1", 42, Utc::now(), false)
            .unwrap();
        assert_eq!(path, "/Acme - 001 General/briefs/deep/opening.docx");
        assert_eq!(tree.document_path("doc-1").unwrap(), path);

        let attr = tree.attr(&path).unwrap();
        assert_eq!(attr.size, 42);
        assert!(!attr.is_dir);
    }

    #[test]
    fn test_upsert_relocates_existing_document() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/a.txt", "doc-1", 5, Utc::now(), false)
            .unwrap();
        tree.upsert_file("Acme", "/sub/b.txt", "doc-1", 7, Utc::now(), false)
            .unwrap();

        assert!(tree.lookup("/Acme/a.txt").is_none());
        assert_eq!(tree.document_path("doc-1").unwrap(), "/Acme/sub/b.txt");
        assert_eq!(tree.file_count(), 1);
    }

    #[test]
    fn test_children_not_a_directory() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/a.txt", "doc-1", 5, Utc::now(), false)
            .unwrap();
        let result = tree.children("/Acme/a.txt");
        assert!(matches!(result, Err(DriveError::NotADirectory(_))));
    }

    #[test]
    fn test_remove_directory_drops_indexed_documents() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/sub/a.txt", "doc-1", 1, Utc::now(), false)
            .unwrap();
        tree.upsert_file("Acme", "/sub/b.txt", "doc-2", 1, Utc::now(), false)
            .unwrap();

        tree.remove("/Acme/sub").unwrap();
        assert!(tree.document_path("doc-1").is_none());
        assert!(tree.document_path("doc-2").is_none());
    }

    #[test]
    fn test_rename_file_reindexes() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/a.txt", "doc-1", 5, Utc::now(), false)
            .unwrap();

        tree.rename("/Acme/a.txt", "/Acme/b.txt").unwrap();
        assert!(tree.lookup("/Acme/a.txt").is_none());
        assert_eq!(tree.document_path("doc-1").unwrap(), "/Acme/b.txt");
    }

    #[test]
    fn test_rename_directory_reindexes_subtree() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/old/deep/a.txt", "doc-1", 5, Utc::now(), false)
            .unwrap();

        tree.rename("/Acme/old", "/Acme/new").unwrap();
        assert_eq!(
            tree.document_path("doc-1").unwrap(),
            "/Acme/new/deep/a.txt"
        );
        assert!(tree.lookup("/Acme/new/deep/a.txt").is_some());
    }

    #[test]
    fn test_rename_to_existing_fails() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/a.txt", "doc-1", 5, Utc::now(), false)
            .unwrap();
        tree.upsert_file("Acme", "/b.txt", "doc-2", 5, Utc::now(), false)
            .unwrap();

        let result = tree.rename("/Acme/a.txt", "/Acme/b.txt");
        assert!(matches!(result, Err(DriveError::Exists(_))));
    }

    #[test]
    fn test_prune_matter() {
        let mut tree = DriveTree::new();
        tree.upsert_file("Acme", "/a.txt", "doc-1", 5, Utc::now(), false)
            .unwrap();
        tree.upsert_file("Beta", "/b.txt", "doc-2", 5, Utc::now(), false)
            .unwrap();

        tree.prune_matter("Acme");
        assert!(tree.document_path("doc-1").is_none());
        assert!(tree.document_path("doc-2").is_some());
        assert_eq!(tree.matter_folders(), vec!["Beta".to_string()]);
    }

    #[test]
    fn test_root_attr_and_children() {
        let mut tree = DriveTree::new();
        tree.mkdir_p("/Acme").unwrap();

        let attr = tree.attr("/").unwrap();
        assert!(attr.is_dir);
        assert_eq!(tree.children("/").unwrap().len(), 1);
    }
}
