//! Secret descriptors as loaded from configuration.

use secretfs_provider::reference_to_filename;

/// Policy and naming for one configured secret. Immutable after load.
#[derive(Debug, Clone, Default)]
pub struct SecretSpec {
    /// Opaque reference handed to the password manager.
    pub reference: String,
    /// Leaf name in the mount; derived from the reference when empty.
    pub filename: String,
    /// Per-secret read cap. Zero defers to the mount-wide default.
    pub max_reads: u32,
    /// Shell-glob allowlist for caller command lines. Empty allows all.
    pub allowed_cmds: Vec<String>,
    /// Whether writes are accepted and flushed back to the provider.
    pub writable: bool,
}

impl SecretSpec {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            ..Self::default()
        }
    }

    /// The name this secret appears under in the mount root.
    pub fn mount_filename(&self) -> String {
        if self.filename.is_empty() {
            reference_to_filename(&self.reference)
        } else {
            self.filename.clone()
        }
    }
}
