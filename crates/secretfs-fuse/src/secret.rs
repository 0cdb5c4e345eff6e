//! The per-secret file state machine.
//!
//! A secret file moves between three states:
//!
//! - **Cold**: `content` is `None`; nothing cached.
//! - **Loaded**: `content` holds the bytes last observed from the provider.
//! - **Modified**: `content` holds locally staged bytes, `dirty` is set.
//!
//! `open` fetches into the buffer (Cold -> Loaded, or straight to Modified
//! under `O_TRUNC`), writes and truncating setattrs mark it Modified, and a
//! successful `flush` writes back and returns to Cold so the next read
//! observes what the provider now holds. A failed flush keeps `dirty` so a
//! later flush can retry.
//!
//! All state sits behind one mutex that is held across provider calls;
//! interleaved readers never observe a half-updated buffer.

use crate::access::{self, Allowlist, Caller, CallerInfo};
use crate::error::{FsError, FsResult};
use parking_lot::Mutex;
use secretfs_provider::SecretStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Open intent, decoded from the kernel's open flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub write: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub fn from_raw(flags: i32) -> Self {
        Self {
            write: (flags & libc::O_ACCMODE) != libc::O_RDONLY,
            truncate: (flags & libc::O_TRUNC) != 0,
        }
    }

    pub fn read() -> Self {
        Self::default()
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            truncate: false,
        }
    }

    pub fn write_truncate() -> Self {
        Self {
            write: true,
            truncate: true,
        }
    }
}

#[derive(Default)]
struct BufferState {
    /// `None` means not cached; the next read re-fetches.
    content: Option<Zeroizing<Vec<u8>>>,
    /// Buffered bytes not yet written back.
    dirty: bool,
    /// Size hint recorded by a truncating setattr, valid until flush.
    write_size: u64,
}

impl BufferState {
    fn bytes(&self) -> &[u8] {
        self.content.as_ref().map_or(&[], |c| c.as_slice())
    }
}

/// One secret exposed as a file. Exists for the mount lifetime.
pub struct SecretFile {
    store: Arc<dyn SecretStore>,
    reference: String,
    max_reads: u32,
    allowed: Allowlist,
    writable: bool,
    read_count: AtomicU32,
    state: Mutex<BufferState>,
}

impl std::fmt::Debug for SecretFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretFile")
            .field("reference", &self.reference)
            .field("max_reads", &self.max_reads)
            .field("writable", &self.writable)
            .field("read_count", &self.read_count)
            .finish_non_exhaustive()
    }
}

impl SecretFile {
    pub fn new(
        store: Arc<dyn SecretStore>,
        reference: String,
        max_reads: u32,
        allowed_cmds: &[String],
        writable: bool,
    ) -> Self {
        Self {
            store,
            reference,
            max_reads,
            allowed: Allowlist::compile(allowed_cmds),
            writable,
            read_count: AtomicU32::new(0),
            state: Mutex::new(BufferState::default()),
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// File mode bits: read-only unless the descriptor is writable.
    pub fn perm(&self) -> u16 {
        if self.writable {
            0o600
        } else {
            0o400
        }
    }

    /// Apparent size: the larger of the truncation hint and the buffer.
    pub fn size(&self) -> u64 {
        let state = self.state.lock();
        state.write_size.max(state.bytes().len() as u64)
    }

    /// Number of successful opens-for-read so far.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Whether staged bytes are awaiting write-back.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Whether a value is currently cached.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().content.is_some()
    }

    /// Identity and command-line checks shared by open and write.
    ///
    /// An unknown caller (no pid) passes; a known caller must have a
    /// command line that reconciles with its executable and, when an
    /// allowlist is configured, matches one of its patterns.
    fn check_access(&self, caller: Caller, op: &str) -> FsResult<CallerInfo> {
        let caller_info = CallerInfo::resolve(caller);
        if caller.is_unknown() {
            return Ok(caller_info);
        }

        if !access::validate_cmdline_exe(caller.pid) {
            warn!(
                reference = %self.reference,
                op,
                caller = %caller_info,
                "denied: cmdline/exe mismatch (possible spoofing)"
            );
            return Err(FsError::Denied);
        }

        if !self.allowed.allows(&caller_info.cmdline) {
            warn!(
                reference = %self.reference,
                op,
                caller = %caller_info,
                "denied: not in allowlist"
            );
            return Err(FsError::Denied);
        }

        Ok(caller_info)
    }

    /// Open the secret: run the access pipeline, fetch the current value,
    /// and count the read.
    pub fn open(&self, caller: Caller, flags: OpenFlags) -> FsResult<()> {
        let mut state = self.state.lock();

        let op = if flags.write { "write" } else { "read" };
        let caller_info = self.check_access(caller, op)?;

        if flags.write && !self.writable {
            warn!(
                reference = %self.reference,
                caller = %caller_info,
                "write denied: secret is not writable"
            );
            return Err(FsError::Denied);
        }

        if !flags.write
            && self.max_reads > 0
            && self.read_count.load(Ordering::SeqCst) >= self.max_reads
        {
            warn!(
                reference = %self.reference,
                max_reads = self.max_reads,
                caller = %caller_info,
                "read limit exhausted"
            );
            return Err(FsError::Denied);
        }

        let value = match self.store.resolve(&self.reference) {
            Ok(value) => value,
            Err(e) => {
                error!(
                    reference = %self.reference,
                    caller = %caller_info,
                    error = %e,
                    "failed to resolve secret"
                );
                return Err(FsError::Unavailable(e));
            }
        };

        if flags.truncate {
            state.content = Some(Zeroizing::new(Vec::new()));
            state.dirty = true;
        } else {
            state.content = Some(value);
        }

        if flags.write {
            info!(reference = %self.reference, caller = %caller_info, "opened for writing");
        } else {
            let seen = self.read_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.max_reads > 0 {
                info!(
                    reference = %self.reference,
                    read = seen,
                    max_reads = self.max_reads,
                    caller = %caller_info,
                    "access granted"
                );
            } else {
                info!(reference = %self.reference, caller = %caller_info, "access granted");
            }
        }

        Ok(())
    }

    /// Read a slice of the buffer, re-fetching from the provider if the
    /// buffer was dropped by a flush. Guarantees that a read following a
    /// flushed write returns the bytes the provider now holds.
    pub fn read(&self, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let mut state = self.state.lock();

        if state.content.is_none() {
            let value = match self.store.resolve(&self.reference) {
                Ok(value) => value,
                Err(e) => {
                    error!(reference = %self.reference, error = %e, "failed to re-read secret");
                    return Err(FsError::Store(e));
                }
            };
            debug!(reference = %self.reference, bytes = value.len(), "re-fetched after flush");
            state.content = Some(value);
        }

        let content = state.bytes();
        let offset = offset as usize;
        if offset >= content.len() {
            return Ok(Vec::new());
        }
        let end = (offset + size as usize).min(content.len());
        Ok(content[offset..end].to_vec())
    }

    /// Buffer bytes at an offset, extending the buffer as needed.
    pub fn write(&self, caller: Caller, offset: u64, data: &[u8]) -> FsResult<u32> {
        let mut state = self.state.lock();

        let caller_info = self.check_access(caller, "write")?;
        if !self.writable {
            warn!(
                reference = %self.reference,
                caller = %caller_info,
                "write denied: secret is not writable"
            );
            return Err(FsError::Denied);
        }

        let offset = offset as usize;
        let end = offset + data.len();
        let content = state
            .content
            .get_or_insert_with(|| Zeroizing::new(Vec::new()));
        if end > content.len() {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(data);
        state.dirty = true;

        debug!(
            reference = %self.reference,
            bytes = data.len(),
            offset,
            caller = %caller_info,
            "buffered write"
        );
        Ok(data.len() as u32)
    }

    /// Truncate or extend the buffer to `size`, recording the hint that
    /// getattr reports until the next flush. Denied on read-only secrets.
    pub fn set_size(&self, size: u64) -> FsResult<()> {
        if !self.writable {
            warn!(reference = %self.reference, "truncate denied: secret is not writable");
            return Err(FsError::Denied);
        }

        let mut state = self.state.lock();
        state.write_size = size;
        let content = state
            .content
            .get_or_insert_with(|| Zeroizing::new(Vec::new()));
        content.resize(size as usize, 0);
        state.dirty = true;
        Ok(())
    }

    /// Replace the buffer with externally staged bytes (the rename path).
    pub fn stage(&self, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        state.content = Some(Zeroizing::new(bytes));
        state.dirty = true;
    }

    /// Write staged bytes back to the provider. No-op when clean. On
    /// success the buffer is dropped so the next read re-fetches; on
    /// failure the dirty state is kept for a retry.
    pub fn flush(&self, caller: Caller) -> FsResult<()> {
        let mut state = self.state.lock();
        if !state.dirty {
            return Ok(());
        }

        let caller_info = CallerInfo::resolve(caller);
        let flushed = state.bytes().len();
        if let Err(e) = self.store.write(&self.reference, state.bytes()) {
            error!(
                reference = %self.reference,
                caller = %caller_info,
                error = %e,
                "failed to write back"
            );
            return Err(FsError::Store(e));
        }

        state.dirty = false;
        state.content = None;
        state.write_size = 0;

        info!(
            reference = %self.reference,
            bytes = flushed,
            caller = %caller_info,
            "flushed to password manager"
        );
        Ok(())
    }

    /// `fsync` is a synonym for flush.
    pub fn fsync(&self, caller: Caller) -> FsResult<()> {
        self.flush(caller)
    }
}
