//! In-memory scratch inodes used as rename sources.
//!
//! Clients that want an atomic secret update write to a file inside a
//! scratch directory and rename it onto the secret. The scratch nodes have
//! no backing store: a directory is just a child map, a file is just a
//! byte buffer, and every flush/fsync on them is a no-op.

use crate::inode::ChildMap;
use parking_lot::Mutex;

/// A scratch directory created by `mkdir` under the mount.
#[derive(Debug)]
pub struct EphemeralDir {
    /// Inode of the containing directory, for the `..` listing entry.
    parent: u64,
    children: ChildMap,
}

impl EphemeralDir {
    pub fn new(parent: u64) -> Self {
        Self {
            parent,
            children: ChildMap::default(),
        }
    }

    pub fn parent(&self) -> u64 {
        self.parent
    }

    pub fn children(&self) -> &ChildMap {
        &self.children
    }
}

/// A scratch file created by `create` inside an ephemeral directory.
///
/// Lives until it is renamed onto a secret (its bytes transfer) or
/// unlinked.
#[derive(Debug, Default)]
pub struct EphemeralFile {
    content: Mutex<Vec<u8>>,
}

impl EphemeralFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u64 {
        self.content.lock().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.lock().is_empty()
    }

    pub fn read(&self, offset: u64, size: u32) -> Vec<u8> {
        let content = self.content.lock();
        let offset = offset as usize;
        if offset >= content.len() {
            return Vec::new();
        }
        let end = (offset + size as usize).min(content.len());
        content[offset..end].to_vec()
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> u32 {
        let mut content = self.content.lock();
        let offset = offset as usize;
        let end = offset + data.len();
        if end > content.len() {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(data);
        data.len() as u32
    }

    pub fn set_size(&self, size: u64) {
        self.content.lock().resize(size as usize, 0);
    }

    /// Snapshot of the buffered bytes (the rename path copies first and
    /// only destroys the source once the write-back succeeded).
    pub fn contents(&self) -> Vec<u8> {
        self.content.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_extends_buffer() {
        let f = EphemeralFile::new();
        assert_eq!(f.write(0, b"hello"), 5);
        assert_eq!(f.write(5, b" world"), 6);
        assert_eq!(f.contents(), b"hello world");
    }

    #[test]
    fn sparse_write_zero_fills() {
        let f = EphemeralFile::new();
        f.write(3, b"x");
        assert_eq!(f.contents(), b"\0\0\0x");
    }

    #[test]
    fn overwrite_keeps_tail() {
        let f = EphemeralFile::new();
        f.write(0, b"abcdef");
        f.write(0, b"XY");
        assert_eq!(f.contents(), b"XYcdef");
    }

    #[test]
    fn read_past_end_is_empty() {
        let f = EphemeralFile::new();
        f.write(0, b"abc");
        assert!(f.read(3, 10).is_empty());
        assert_eq!(f.read(1, 10), b"bc");
        assert_eq!(f.read(0, 2), b"ab");
    }

    #[test]
    fn set_size_truncates_and_extends() {
        let f = EphemeralFile::new();
        f.write(0, b"abcdef");
        f.set_size(3);
        assert_eq!(f.contents(), b"abc");
        f.set_size(5);
        assert_eq!(f.contents(), b"abc\0\0");
        f.set_size(0);
        assert!(f.is_empty());
    }

    #[test]
    fn dir_children_round_trip() {
        let d = EphemeralDir::new(1);
        assert_eq!(d.parent(), 1);
        d.children().insert("staged", 7);
        assert_eq!(d.children().get("staged"), Some(7));
        assert_eq!(d.children().remove("staged"), Some(7));
        assert!(d.children().is_empty());
    }
}
