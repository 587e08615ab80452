//! The node-capability interface consumed by the FUSE adapter
//! (`spec.md` §4.7, §9). Nodes are tagged variants rather than a trait
//! object hierarchy, matching the "avoid deep inheritance" design note.

/// Fixed mode bits per `spec.md` §4.7: static/link reads are `0444`,
/// attribute files `0660`, directories `0755`, symlinks `0444` with the
/// symlink bit folded in by the FUSE adapter.
#[derive(Debug, Clone, Copy)]
pub struct Attr {
    pub size: u64,
    pub kind: NodeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    File,
    StaticFile,
    Symlink,
}

impl NodeType {
    pub fn mode(self) -> u32 {
        match self {
            NodeType::Directory => 0o755,
            NodeType::File => 0o660,
            NodeType::StaticFile => 0o444,
            NodeType::Symlink => 0o444,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEntryType {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: DirEntryType,
}

pub use crate::atomic_file::OpenFlags;
