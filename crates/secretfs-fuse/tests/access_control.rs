//! Access-control pipeline driven through the filesystem.

mod common;

use common::{anon, fs_with_specs, secret_node, REF};
use secretfs_fuse::{Caller, OpenFlags, SecretSpec};
use secretfs_provider::MemoryStore;
use std::sync::Arc;

fn spec(name: &str) -> SecretSpec {
    SecretSpec {
        filename: name.to_string(),
        ..SecretSpec::new(REF)
    }
}

#[test]
fn read_cap_allows_exactly_k_opens() {
    let store = Arc::new(MemoryStore::new().with_secret(REF, "capped"));
    let fs = fs_with_specs(
        &store,
        vec![SecretSpec {
            max_reads: 2,
            ..spec("capped.txt")
        }],
        0,
    );
    let secret = secret_node(&fs, "capped.txt");

    secret.open(anon(), OpenFlags::read()).unwrap();
    assert_eq!(secret.read(0, 64).unwrap(), b"capped");
    secret.open(anon(), OpenFlags::read()).unwrap();
    assert_eq!(secret.read(0, 64).unwrap(), b"capped");

    let err = secret.open(anon(), OpenFlags::read()).unwrap_err();
    assert_eq!(err.to_errno(), libc::EACCES);
}

#[test]
fn write_to_read_only_secret_is_eacces() {
    let store = Arc::new(MemoryStore::new().with_secret(REF, "ro"));
    let fs = fs_with_specs(&store, vec![spec("ro.txt")], 0);
    let secret = secret_node(&fs, "ro.txt");

    assert_eq!(
        secret
            .open(anon(), OpenFlags::write_only())
            .unwrap_err()
            .to_errno(),
        libc::EACCES
    );
    assert_eq!(
        secret.write(anon(), 0, b"x").unwrap_err().to_errno(),
        libc::EACCES
    );
    assert_eq!(secret.set_size(0).unwrap_err().to_errno(), libc::EACCES);
}

#[test]
fn unintrospectable_caller_is_denied() {
    // argv[0]/exe reconciliation fails closed for a pid that cannot be
    // inspected — the spoofing outcome without needing an actual spoof
    let store = Arc::new(MemoryStore::new().with_secret(REF, "v"));
    let fs = fs_with_specs(&store, vec![spec("s.txt")], 0);
    let secret = secret_node(&fs, "s.txt");

    let ghost = Caller {
        uid: 1000,
        gid: 1000,
        pid: u32::MAX - 1,
    };
    assert_eq!(
        secret.open(ghost, OpenFlags::read()).unwrap_err().to_errno(),
        libc::EACCES
    );
}

#[cfg(target_os = "linux")]
mod with_real_caller {
    use super::*;

    fn own_caller() -> Caller {
        Caller {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            pid: std::process::id(),
        }
    }

    #[test]
    fn allowlist_denies_non_matching_cmdline() {
        let store = Arc::new(MemoryStore::new().with_secret(REF, "v"));
        let fs = fs_with_specs(
            &store,
            vec![SecretSpec {
                allowed_cmds: vec!["/usr/bin/curl*".to_string()],
                ..spec("curl-only.txt")
            }],
            0,
        );
        let secret = secret_node(&fs, "curl-only.txt");

        // this test binary is not curl
        assert_eq!(
            secret
                .open(own_caller(), OpenFlags::read())
                .unwrap_err()
                .to_errno(),
            libc::EACCES
        );
    }

    #[test]
    fn allowlist_admits_matching_cmdline() {
        let store = Arc::new(MemoryStore::new().with_secret(REF, "v"));
        let fs = fs_with_specs(
            &store,
            vec![SecretSpec {
                allowed_cmds: vec!["/definitely/not/this*".to_string(), "*".to_string()],
                ..spec("open.txt")
            }],
            0,
        );
        let secret = secret_node(&fs, "open.txt");

        secret.open(own_caller(), OpenFlags::read()).unwrap();
        assert_eq!(secret.read(0, 8).unwrap(), b"v");
    }

    #[test]
    fn genuine_caller_passes_reconciliation() {
        let store = Arc::new(MemoryStore::new().with_secret(REF, "v"));
        let fs = fs_with_specs(&store, vec![spec("s.txt")], 0);
        let secret = secret_node(&fs, "s.txt");

        secret.open(own_caller(), OpenFlags::read()).unwrap();
    }
}

#[test]
fn per_secret_cap_overrides_default() {
    let store = Arc::new(MemoryStore::new().with_secret(REF, "v"));
    let fs = fs_with_specs(
        &store,
        vec![SecretSpec {
            max_reads: 5,
            ..spec("five.txt")
        }],
        1,
    );
    let secret = secret_node(&fs, "five.txt");

    for _ in 0..5 {
        secret.open(anon(), OpenFlags::read()).unwrap();
    }
    assert!(secret.open(anon(), OpenFlags::read()).is_err());
}
