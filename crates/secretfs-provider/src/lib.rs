//! Password-manager client adapters for the secrets filesystem.
//!
//! The filesystem core talks to the external password manager through the
//! narrow [`SecretStore`] trait: resolve a reference to its current bytes,
//! write bytes back (keeping the previous value recoverable), and enumerate
//! the configured references. [`OnePasswordCli`] is the production adapter,
//! built on the official `op` command-line tool; [`MemoryStore`] backs
//! tests.
//!
//! Secret references are opaque to the filesystem. The conventional form is
//! `op://<vault>/<item>/<field>`; see [`reference`] for parsing and the
//! deterministic reference-to-filename derivation.

pub mod error;
pub mod memory;
pub mod onepassword;
pub mod reference;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use onepassword::OnePasswordCli;
pub use reference::{parse_reference, reference_to_filename, SecretReference};
pub use zeroize::Zeroizing;

/// Client interface to a password manager.
///
/// Implementations must be thread-safe: a single store instance is shared
/// by every secret file for the lifetime of the mount.
pub trait SecretStore: Send + Sync {
    /// Fetch the current value for a secret reference.
    fn resolve(&self, reference: &str) -> Result<Zeroizing<Vec<u8>>, StoreError>;

    /// Persist a new value for a secret reference.
    ///
    /// The previous value is preserved in a recoverable form (the concrete
    /// backup scheme is up to the implementation). The write is durable
    /// once this returns `Ok`.
    fn write(&self, reference: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Enumerate the configured secret references.
    fn list(&self) -> Vec<String>;

    /// Provider name for diagnostics (e.g. "1password").
    fn name(&self) -> &'static str;
}
