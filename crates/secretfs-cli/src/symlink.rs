//! Symlinks from well-known paths into the mount.
//!
//! A `symlink_to` entry makes a secret reachable at a conventional
//! location (say `~/.config/gh/token`) without the application knowing
//! about the mount. Links are created at startup and removed on shutdown;
//! an existing path is only replaced when it is itself a symlink.

use crate::config::SecretEntry;
use anyhow::{bail, Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Create the symlink for an entry, if it requests one. Returns the link
/// path so the caller can remove it on shutdown.
pub fn create(entry: &SecretEntry, mountpoint: &Path) -> Result<Option<PathBuf>> {
    let Some(raw) = &entry.symlink_to else {
        return Ok(None);
    };

    let link = expand_tilde(raw);
    let target = mountpoint.join(entry.to_spec().mount_filename());

    match std::fs::symlink_metadata(&link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::remove_file(&link)
                .with_context(|| format!("removing stale symlink {}", link.display()))?;
        }
        Ok(_) => bail!("path {} exists and is not a symlink", link.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("inspecting {}", link.display()));
        }
    }

    std::os::unix::fs::symlink(&target, &link).with_context(|| {
        format!(
            "creating symlink {} -> {}",
            link.display(),
            target.display()
        )
    })?;
    Ok(Some(link))
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(symlink_to: &Path) -> SecretEntry {
        SecretEntry {
            reference: "op://v/i/f".to_string(),
            filename: String::new(),
            max_reads: 0,
            allowed_cmds: Vec::new(),
            symlink_to: Some(symlink_to.to_path_buf()),
            writable: false,
        }
    }

    #[test]
    fn expand_tilde_uses_home() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_tilde(Path::new("~/secrets/token")),
            PathBuf::from("/home/tester/secrets/token")
        );
        assert_eq!(
            expand_tilde(Path::new("/abs/path")),
            PathBuf::from("/abs/path")
        );
    }

    #[test]
    fn create_and_replace_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link_path = dir.path().join("token");
        let mount = Path::new("/tmp/secrets-mount");

        let link = create(&entry(&link_path), mount).unwrap().unwrap();
        assert_eq!(link, link_path);
        assert_eq!(
            std::fs::read_link(&link).unwrap(),
            mount.join("v_i_f")
        );

        // a stale symlink is replaced
        let link = create(&entry(&link_path), mount).unwrap().unwrap();
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    }

    #[test]
    fn refuses_to_replace_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("precious");
        std::fs::write(&path, b"data").unwrap();

        assert!(create(&entry(&path), Path::new("/mnt")).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn entry_without_symlink_is_noop() {
        let mut e = entry(Path::new("/tmp/x"));
        e.symlink_to = None;
        assert!(create(&e, Path::new("/mnt")).unwrap().is_none());
    }
}
