//! Error type for filesystem operations and its errno mapping.

use secretfs_provider::StoreError;
use thiserror::Error;

/// Failures surfaced by filesystem operations.
///
/// Every variant maps to exactly one POSIX errno via [`FsError::to_errno`];
/// the kernel adapter is the only place that performs the conversion.
#[derive(Debug, Error)]
pub enum FsError {
    /// Caller failed an access-control check (allowlist, spoofing, read
    /// cap, or a write to a read-only secret).
    #[error("access denied")]
    Denied,

    /// Name or inode does not resolve to a live entry.
    #[error("no such entry")]
    NotFound,

    /// The operation does not apply to this combination of nodes.
    #[error("operation not supported")]
    NotSupported,

    /// Mutation of the root directory outside the staging protocol.
    #[error("operation not permitted")]
    NotPermitted,

    /// The provider could not produce the secret at open time.
    #[error("secret unavailable: {0}")]
    Unavailable(#[source] StoreError),

    /// Provider failure once the file is in use (re-read or write-back).
    #[error("provider I/O failure: {0}")]
    Store(#[source] StoreError),

    /// Request parameter outside the representable range.
    #[error("invalid argument")]
    InvalidArgument,
}

impl FsError {
    /// Convert to a libc errno for the kernel reply.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::Denied => libc::EACCES,
            FsError::NotFound => libc::ENOENT,
            FsError::NotSupported => libc::ENOTSUP,
            FsError::NotPermitted => libc::EPERM,
            FsError::Unavailable(_) => libc::ENOENT,
            FsError::Store(_) => libc::EIO,
            FsError::InvalidArgument => libc::EINVAL,
        }
    }
}

/// Result type for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;
