//! Shared fixtures for filesystem integration tests.
#![allow(dead_code)] // each test binary uses a different subset

use secretfs_fuse::{Caller, Node, SecretFile, SecretSpec, SecretsFs, ROOT_INODE};
use secretfs_provider::{MemoryStore, SecretStore};
use std::sync::Arc;

pub const REF: &str = "op://test/item/field";
pub const FILENAME: &str = "secret.txt";

/// A filesystem over a memory store with one writable secret.
pub fn writable_fixture(initial: &str) -> (Arc<MemoryStore>, SecretsFs) {
    let store = Arc::new(MemoryStore::new().with_secret(REF, initial));
    let spec = SecretSpec {
        filename: FILENAME.to_string(),
        writable: true,
        ..SecretSpec::new(REF)
    };
    let fs = SecretsFs::new(Arc::clone(&store) as Arc<dyn SecretStore>, vec![spec], 0);
    (store, fs)
}

/// Build a filesystem from explicit specs.
pub fn fs_with_specs(
    store: &Arc<MemoryStore>,
    specs: Vec<SecretSpec>,
    default_max_reads: u32,
) -> SecretsFs {
    SecretsFs::new(
        Arc::clone(store) as Arc<dyn SecretStore>,
        specs,
        default_max_reads,
    )
}

/// Resolve the secret file node registered under `name`.
pub fn secret_node(fs: &SecretsFs, name: &str) -> Arc<SecretFile> {
    let (_, node) = fs
        .lookup_name(ROOT_INODE, name)
        .expect("secret should resolve");
    match node {
        Node::Secret(secret) => secret,
        _ => panic!("{name} is not a secret node"),
    }
}

/// A caller with no userspace identity; passes the identity checks so
/// tests exercise the state machine in isolation.
pub fn anon() -> Caller {
    Caller::unknown()
}
