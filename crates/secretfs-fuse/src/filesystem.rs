//! The filesystem: inode tree operations and the fuser adapter.
//!
//! [`SecretsFs`] owns the inode table and exposes the tree operations
//! (lookup, mkdir, create, unlink, rename, ...) as plain methods returning
//! [`FsResult`]; the `fuser::Filesystem` impl at the bottom is a thin layer
//! that decodes requests, dispatches to those methods, and encodes replies.
//! Tests drive the operation layer directly, without a kernel.
//!
//! Caching is deliberately disabled: every reply uses a zero TTL and file
//! opens request direct I/O, so the kernel re-asks for attributes and data
//! instead of serving stale sizes or values after a write-back.

use crate::access::Caller;
use crate::config::SecretSpec;
use crate::ephemeral::{EphemeralDir, EphemeralFile};
use crate::error::{FsError, FsResult};
use crate::inode::{ChildMap, InodeTable, Node, ROOT_INODE};
use crate::secret::{OpenFlags, SecretFile};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use secretfs_provider::SecretStore;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, trace};

/// Zero TTL on every entry and attribute reply.
const TTL: Duration = Duration::ZERO;

/// The mount root: configured descriptors plus the live child set.
#[derive(Debug)]
pub struct RootDir {
    specs: Vec<SecretSpec>,
    default_max_reads: u32,
    children: ChildMap,
}

impl RootDir {
    pub fn children(&self) -> &ChildMap {
        &self.children
    }

    fn spec_for(&self, name: &str) -> Option<&SecretSpec> {
        self.specs.iter().find(|s| s.mount_filename() == name)
    }
}

/// FUSE filesystem exposing password-manager secrets as files.
pub struct SecretsFs {
    store: Arc<dyn SecretStore>,
    inodes: InodeTable,
    root: Arc<RootDir>,
    uid: u32,
    gid: u32,
}

impl SecretsFs {
    /// Build the filesystem and materialize one secret file per
    /// descriptor. A per-secret `max_reads` of zero falls back to
    /// `default_max_reads`.
    pub fn new(
        store: Arc<dyn SecretStore>,
        specs: Vec<SecretSpec>,
        default_max_reads: u32,
    ) -> Self {
        let root = Arc::new(RootDir {
            specs,
            default_max_reads,
            children: ChildMap::default(),
        });
        let inodes = InodeTable::new(Node::Root(Arc::clone(&root)));
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };

        let fs = Self {
            store,
            inodes,
            root,
            uid,
            gid,
        };
        for spec in &fs.root.specs {
            let name = spec.mount_filename();
            let ino = fs.materialize_secret(spec);
            fs.root.children().insert(name, ino);
        }
        fs
    }

    fn materialize_secret(&self, spec: &SecretSpec) -> u64 {
        let max_reads = if spec.max_reads == 0 {
            self.root.default_max_reads
        } else {
            spec.max_reads
        };
        let file = SecretFile::new(
            Arc::clone(&self.store),
            spec.reference.clone(),
            max_reads,
            &spec.allowed_cmds,
            spec.writable,
        );
        self.inodes.insert(Node::Secret(Arc::new(file)))
    }

    /// Node for an inode number.
    pub fn node(&self, ino: u64) -> FsResult<Node> {
        self.inodes.get(ino).ok_or(FsError::NotFound)
    }

    /// Resolve a name within a directory.
    ///
    /// A configured secret whose child entry was removed (after a
    /// rename-based write) is rematerialized so the name stays resolvable.
    pub fn lookup_name(&self, parent: u64, name: &str) -> FsResult<(u64, Node)> {
        match self.node(parent)? {
            Node::Root(root) => {
                if let Some(ino) = root.children().get(name) {
                    if let Some(node) = self.inodes.get(ino) {
                        return Ok((ino, node));
                    }
                }
                let spec = root.spec_for(name).cloned().ok_or(FsError::NotFound)?;
                let ino = self.materialize_secret(&spec);
                root.children().insert(name.to_string(), ino);
                let node = self.node(ino)?;
                Ok((ino, node))
            }
            Node::Dir(dir) => {
                let ino = dir.children().get(name).ok_or(FsError::NotFound)?;
                let node = self.node(ino)?;
                Ok((ino, node))
            }
            _ => Err(FsError::NotFound),
        }
    }

    /// Create an ephemeral scratch directory under the root or another
    /// ephemeral directory.
    pub fn make_dir(&self, parent: u64, name: &str) -> FsResult<(u64, Node)> {
        let parent_node = self.node(parent)?;
        let children = match &parent_node {
            Node::Root(root) => root.children(),
            Node::Dir(dir) => dir.children(),
            _ => return Err(FsError::NotSupported),
        };
        let node = Node::Dir(Arc::new(EphemeralDir::new(parent)));
        let ino = self.inodes.insert(node.clone());
        children.insert(name.to_string(), ino);
        Ok((ino, node))
    }

    /// Create an ephemeral file. Only valid inside an ephemeral directory;
    /// the root's files are defined by configuration.
    pub fn create_file(&self, parent: u64, name: &str) -> FsResult<(u64, Node)> {
        match self.node(parent)? {
            Node::Dir(dir) => {
                let node = Node::File(Arc::new(EphemeralFile::new()));
                let ino = self.inodes.insert(node.clone());
                dir.children().insert(name.to_string(), ino);
                Ok((ino, node))
            }
            Node::Root(_) => Err(FsError::NotPermitted),
            _ => Err(FsError::NotSupported),
        }
    }

    /// Unlink a file. Inside ephemeral directories this always succeeds
    /// (no-op on absence); secrets in the root cannot be unlinked.
    pub fn remove_file(&self, parent: u64, name: &str) -> FsResult<()> {
        match self.node(parent)? {
            Node::Dir(dir) => {
                if let Some(ino) = dir.children().remove(name) {
                    self.drop_subtree(ino);
                }
                Ok(())
            }
            Node::Root(root) => match root.children().get(name) {
                Some(ino) => match self.inodes.get(ino) {
                    Some(Node::Secret(_)) => Err(FsError::NotPermitted),
                    _ => {
                        root.children().remove(name);
                        self.drop_subtree(ino);
                        Ok(())
                    }
                },
                None => Err(FsError::NotFound),
            },
            _ => Err(FsError::NotSupported),
        }
    }

    /// Remove an ephemeral directory. Always succeeds, no-op on absence;
    /// any orphaned children are dropped with it.
    pub fn remove_dir(&self, parent: u64, name: &str) -> FsResult<()> {
        match self.node(parent)? {
            Node::Root(root) => {
                if let Some(ino) = root.children().get(name) {
                    match self.inodes.get(ino) {
                        Some(Node::Secret(_)) => return Err(FsError::NotPermitted),
                        _ => {
                            root.children().remove(name);
                            self.drop_subtree(ino);
                        }
                    }
                }
                Ok(())
            }
            Node::Dir(dir) => {
                if let Some(ino) = dir.children().remove(name) {
                    self.drop_subtree(ino);
                }
                Ok(())
            }
            _ => Err(FsError::NotSupported),
        }
    }

    fn drop_subtree(&self, ino: u64) {
        if let Some(Node::Dir(dir)) = self.inodes.get(ino) {
            for (_, child) in dir.children().entries() {
                self.drop_subtree(child);
            }
        }
        self.inodes.remove(ino);
    }

    /// The atomic-staging hinge: rename an ephemeral file onto a secret.
    ///
    /// The staged bytes transfer into the destination buffer and are
    /// flushed in one step; only after a successful write-back is the
    /// source removed. Any other source/destination combination is
    /// unsupported.
    pub fn rename_entry(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
        caller: Caller,
    ) -> FsResult<()> {
        let src_parent = self.node(parent)?;
        let src_children = match &src_parent {
            Node::Root(root) => root.children(),
            Node::Dir(dir) => dir.children(),
            _ => return Err(FsError::NotSupported),
        };

        let src_ino = src_children.get(name).ok_or(FsError::NotFound)?;
        let src_node = self.node(src_ino)?;
        let Node::File(staged) = src_node else {
            return Err(FsError::NotSupported);
        };

        if !matches!(self.node(new_parent)?, Node::Root(_)) {
            return Err(FsError::NotSupported);
        }
        let (_, dest) = self
            .lookup_name(new_parent, new_name)
            .map_err(|_| FsError::NotSupported)?;
        let Node::Secret(secret) = dest else {
            return Err(FsError::NotSupported);
        };

        secret.stage(staged.contents());
        secret.flush(caller)?;

        src_children.remove(name);
        self.inodes.remove(src_ino);
        trace!(
            from = name,
            to = new_name,
            reference = secret.reference(),
            "staged rename flushed"
        );
        Ok(())
    }

    /// Directory listing (without the `.`/`..` entries).
    pub fn list_dir(&self, ino: u64) -> FsResult<Vec<(u64, FileType, String)>> {
        let node = self.node(ino)?;
        let children = match &node {
            Node::Root(root) => root.children().entries(),
            Node::Dir(dir) => dir.children().entries(),
            _ => return Err(FsError::NotSupported),
        };

        let mut out = Vec::with_capacity(children.len());
        for (name, child_ino) in children {
            let Some(child) = self.inodes.get(child_ino) else {
                continue;
            };
            out.push((child_ino, child.file_type(), name));
        }
        Ok(out)
    }

    /// Attributes for a node. Directories are world-traversable; file
    /// modes come from the descriptor. mtime is always "now" since the
    /// provider owns the authoritative timeline.
    pub fn attr_for(&self, ino: u64, node: &Node) -> FileAttr {
        let now = SystemTime::now();
        let (kind, perm, size, nlink) = match node {
            Node::Root(_) | Node::Dir(_) => (FileType::Directory, 0o755, 0, 2),
            Node::Secret(secret) => (FileType::RegularFile, secret.perm(), secret.size(), 1),
            Node::File(file) => (FileType::RegularFile, 0o600, file.len(), 1),
        };
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: now,
            mtime: now,
            ctime: now,
            crtime: now,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    /// Number of live inodes (diagnostics and tests).
    pub fn inode_count(&self) -> usize {
        self.inodes.len()
    }
}

fn caller_of(req: &Request<'_>) -> Caller {
    Caller {
        uid: req.uid(),
        gid: req.gid(),
        pid: req.pid(),
    }
}

impl Filesystem for SecretsFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        info!(secrets = self.root.specs.len(), "secrets filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("secrets filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "lookup");

        match self.lookup_name(parent, name) {
            Ok((ino, node)) => reply.entry(&TTL, &self.attr_for(ino, &node), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        trace!(inode = ino, "getattr");
        match self.node(ino) {
            Ok(node) => reply.attr(&TTL, &self.attr_for(ino, &node)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        trace!(inode = ino, size = ?size, "setattr");
        let node = match self.node(ino) {
            Ok(node) => node,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        if let Some(size) = size {
            match &node {
                Node::Secret(secret) => {
                    if let Err(e) = secret.set_size(size) {
                        reply.error(e.to_errno());
                        return;
                    }
                }
                Node::File(file) => file.set_size(size),
                Node::Root(_) | Node::Dir(_) => {
                    reply.error(libc::EISDIR);
                    return;
                }
            }
        }

        reply.attr(&TTL, &self.attr_for(ino, &node));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "mkdir");

        match self.make_dir(parent, name) {
            Ok((ino, node)) => reply.entry(&TTL, &self.attr_for(ino, &node), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "unlink");

        match self.remove_file(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "rmdir");

        match self.remove_dir(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, newparent, newname, "rename");

        match self.rename_entry(parent, name, newparent, newname, caller_of(req)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        trace!(inode = ino, flags, "open");
        match self.node(ino) {
            Ok(Node::Secret(secret)) => {
                match secret.open(caller_of(req), OpenFlags::from_raw(flags)) {
                    Ok(()) => reply.opened(0, fuser::consts::FOPEN_DIRECT_IO),
                    Err(e) => reply.error(e.to_errno()),
                }
            }
            Ok(Node::File(_)) => reply.opened(0, fuser::consts::FOPEN_DIRECT_IO),
            Ok(Node::Root(_) | Node::Dir(_)) => reply.error(libc::EISDIR),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        trace!(inode = ino, offset, size, "read");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.node(ino) {
            Ok(Node::Secret(secret)) => match secret.read(offset as u64, size) {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.to_errno()),
            },
            Ok(Node::File(file)) => reply.data(&file.read(offset as u64, size)),
            Ok(Node::Root(_) | Node::Dir(_)) => reply.error(libc::EISDIR),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        trace!(inode = ino, offset, size = data.len(), "write");
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match self.node(ino) {
            Ok(Node::Secret(secret)) => {
                match secret.write(caller_of(req), offset as u64, data) {
                    Ok(written) => reply.written(written),
                    Err(e) => reply.error(e.to_errno()),
                }
            }
            Ok(Node::File(file)) => reply.written(file.write(offset as u64, data)),
            Ok(Node::Root(_) | Node::Dir(_)) => reply.error(libc::EISDIR),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, req: &Request<'_>, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        trace!(inode = ino, "flush");
        match self.node(ino) {
            Ok(Node::Secret(secret)) => match secret.flush(caller_of(req)) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.to_errno()),
            },
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, req: &Request<'_>, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        trace!(inode = ino, "fsync");
        match self.node(ino) {
            Ok(Node::Secret(secret)) => match secret.fsync(caller_of(req)) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.to_errno()),
            },
            Ok(_) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        trace!(inode = ino, offset, "readdir");
        let parent_ino = match self.node(ino) {
            // the root is its own parent (FUSE convention)
            Ok(Node::Root(_)) => ROOT_INODE,
            Ok(Node::Dir(dir)) => dir.parent(),
            Ok(_) => {
                reply.error(libc::ENOTDIR);
                return;
            }
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let entries = match self.list_dir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let mut all = Vec::with_capacity(entries.len() + 2);
        all.push((ino, FileType::Directory, ".".to_string()));
        all.push((parent_ino, FileType::Directory, "..".to_string()));
        all.extend(entries);

        for (i, (child_ino, kind, name)) in all.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        trace!(parent, name, "create");

        match self.create_file(parent, name) {
            Ok((ino, node)) => reply.created(
                &TTL,
                &self.attr_for(ino, &node),
                0,
                0,
                fuser::consts::FOPEN_DIRECT_IO,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn access(&mut self, _req: &Request<'_>, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        // access control happens at open/write time with full caller context
        reply.ok();
    }
}
