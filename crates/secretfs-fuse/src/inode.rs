//! Inode numbering and the node table.
//!
//! Every live filesystem object is a [`Node`]: the root directory, a
//! secret file, or one of the ephemeral scratch inodes. The kernel refers
//! to nodes by inode number; [`InodeTable`] owns that mapping and the
//! number allocator. Nodes are `Arc`-backed so a table lookup yields a
//! cheap handle that stays valid while an operation runs.

use crate::ephemeral::{EphemeralDir, EphemeralFile};
use crate::filesystem::RootDir;
use crate::secret::SecretFile;
use dashmap::DashMap;
use fuser::FileType;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// A filesystem object, dispatched on by the kernel adapter.
#[derive(Clone, Debug)]
pub enum Node {
    Root(Arc<RootDir>),
    Secret(Arc<SecretFile>),
    Dir(Arc<EphemeralDir>),
    File(Arc<EphemeralFile>),
}

impl Node {
    pub fn file_type(&self) -> FileType {
        match self {
            Node::Root(_) | Node::Dir(_) => FileType::Directory,
            Node::Secret(_) | Node::File(_) => FileType::RegularFile,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Root(_) | Node::Dir(_))
    }
}

/// Name-to-inode mapping owned by a directory node.
///
/// Ordered so directory listings are stable across calls.
#[derive(Debug, Default)]
pub struct ChildMap {
    inner: RwLock<BTreeMap<String, u64>>,
}

impl ChildMap {
    pub fn get(&self, name: &str) -> Option<u64> {
        self.inner.read().get(name).copied()
    }

    pub fn insert(&self, name: impl Into<String>, ino: u64) {
        self.inner.write().insert(name.into(), ino);
    }

    pub fn remove(&self, name: &str) -> Option<u64> {
        self.inner.write().remove(name)
    }

    pub fn entries(&self) -> Vec<(String, u64)> {
        self.inner
            .read()
            .iter()
            .map(|(name, ino)| (name.clone(), *ino))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Thread-safe table mapping inode numbers to nodes.
pub struct InodeTable {
    entries: DashMap<u64, Node>,
    next: AtomicU64,
}

impl InodeTable {
    /// Create a table with the root pre-registered at [`ROOT_INODE`].
    pub fn new(root: Node) -> Self {
        let entries = DashMap::new();
        entries.insert(ROOT_INODE, root);
        Self {
            entries,
            next: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Register a node under a freshly allocated inode number.
    pub fn insert(&self, node: Node) -> u64 {
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(ino, node);
        ino
    }

    pub fn get(&self, ino: u64) -> Option<Node> {
        self.entries.get(&ino).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, ino: u64) {
        if ino != ROOT_INODE {
            self.entries.remove(&ino);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
