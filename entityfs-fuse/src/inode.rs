//! Maps FUSE's inode numbers onto composer paths. The composer itself is
//! stateless per call (`entityfs_vfs::Composer`); inodes only need to be
//! stable for as long as the kernel holds a reference to them.

use std::collections::HashMap;

pub const ROOT_INODE: u64 = 1;

pub struct InodeTable {
    paths: HashMap<u64, Vec<String>>,
    ids: HashMap<Vec<String>, u64>,
    next: u64,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut paths = HashMap::new();
        let mut ids = HashMap::new();
        paths.insert(ROOT_INODE, Vec::new());
        ids.insert(Vec::new(), ROOT_INODE);
        Self {
            paths,
            ids,
            next: ROOT_INODE + 1,
        }
    }

    pub fn path_of(&self, ino: u64) -> Option<Vec<String>> {
        self.paths.get(&ino).cloned()
    }

    /// Returns the existing inode for `path`, minting a new one if this is
    /// the first time it has been seen.
    pub fn intern(&mut self, path: Vec<String>) -> u64 {
        if let Some(&ino) = self.ids.get(&path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.ids.insert(path.clone(), ino);
        self.paths.insert(ino, path);
        ino
    }

    pub fn child_path(&self, parent: u64, name: &str) -> Option<Vec<String>> {
        let mut path = self.path_of(parent)?;
        path.push(name.to_string());
        Some(path)
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_resolves_to_empty_path() {
        let table = InodeTable::new();
        assert_eq!(table.path_of(ROOT_INODE), Some(Vec::new()));
    }

    #[test]
    fn interning_the_same_path_twice_returns_the_same_inode() {
        let mut table = InodeTable::new();
        let a = table.intern(vec!["entities".to_string()]);
        let b = table.intern(vec!["entities".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, ROOT_INODE);
    }

    #[test]
    fn child_path_extends_the_parent() {
        let mut table = InodeTable::new();
        let entities = table.intern(vec!["entities".to_string()]);
        assert_eq!(
            table.child_path(entities, "all"),
            Some(vec!["entities".to_string(), "all".to_string()])
        );
    }
}
