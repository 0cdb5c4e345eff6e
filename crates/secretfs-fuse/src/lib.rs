//! FUSE filesystem exposing password-manager secrets as files.
//!
//! Each configured secret appears as a regular file in the mount root. An
//! application reads a secret by opening its path; the filesystem fetches
//! the live value from the provider on demand, enforces per-secret access
//! policy (caller command-line allowlist, spoofing reconciliation, read
//! caps), and — for writable secrets — buffers modifications and flushes
//! them back on close.
//!
//! Atomic updates use the rename staging protocol: `mkdir` a scratch
//! directory anywhere in the mount, write the new value to a file inside
//! it, and rename that file onto the secret. The staged bytes reach the
//! provider in a single write.
//!
//! # Usage
//!
//! ```ignore
//! use secretfs_fuse::{mount, SecretsFs, SecretSpec};
//!
//! let fs = SecretsFs::new(store, specs, 0);
//! let handle = mount(fs, mountpoint)?;
//! ```

pub mod access;
pub mod backend;
pub mod config;
pub mod ephemeral;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod proc;
pub mod secret;

pub use access::{Allowlist, Caller, CallerInfo};
pub use backend::{mount, processes_using_mount, MountError, MountHandle, UnmountOutcome};
pub use config::SecretSpec;
pub use error::{FsError, FsResult};
pub use filesystem::{RootDir, SecretsFs};
pub use inode::{InodeTable, Node, ROOT_INODE};
pub use secret::{OpenFlags, SecretFile};
