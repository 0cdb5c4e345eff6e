//! YAML configuration for the secrets mount.

use anyhow::{Context, Result};
use secretfs_fuse::SecretSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration file shape.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub secrets: Vec<SecretEntry>,
}

/// One configured secret.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretEntry {
    /// Reference handed to the password manager (required).
    pub reference: String,
    /// Leaf name in the mount; derived from the reference when absent.
    #[serde(default)]
    pub filename: String,
    /// Per-secret read cap; 0 uses the global default.
    #[serde(default)]
    pub max_reads: u32,
    /// Shell-glob allowlist for caller command lines.
    #[serde(default)]
    pub allowed_cmds: Vec<String>,
    /// Optional symlink created outside the mount (`~` expands to $HOME).
    #[serde(default)]
    pub symlink_to: Option<PathBuf>,
    /// Whether writes are flushed back to the password manager.
    #[serde(default)]
    pub writable: bool,
}

impl SecretEntry {
    pub fn to_spec(&self) -> SecretSpec {
        SecretSpec {
            reference: self.reference.clone(),
            filename: self.filename.clone(),
            max_reads: self.max_reads,
            allowed_cmds: self.allowed_cmds.clone(),
            writable: self.writable,
        }
    }
}

/// Resolve the configuration path: an explicit flag wins, then
/// `~/.config/secret-fuse.conf` if present, else `./config.yaml`.
pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Some(home) = std::env::var_os("HOME") {
        let candidate = Path::new(&home).join(".config/secret-fuse.conf");
        if candidate.exists() {
            return candidate;
        }
    }
    PathBuf::from("config.yaml")
}

pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: Config =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_full_entry() {
        let yaml = r#"
secrets:
  - reference: op://Private/GitHub/token
    filename: gh-token
    max_reads: 3
    allowed_cmds: ["/usr/bin/git*", "/usr/bin/gh"]
    symlink_to: ~/.config/gh/token
    writable: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.secrets.len(), 1);

        let entry = &config.secrets[0];
        assert_eq!(entry.reference, "op://Private/GitHub/token");
        assert_eq!(entry.filename, "gh-token");
        assert_eq!(entry.max_reads, 3);
        assert_eq!(entry.allowed_cmds.len(), 2);
        assert!(entry.writable);

        let spec = entry.to_spec();
        assert_eq!(spec.mount_filename(), "gh-token");
    }

    #[test]
    fn parse_minimal_entry_uses_defaults() {
        let yaml = "secrets:\n  - reference: op://v/i/f\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let entry = &config.secrets[0];
        assert_eq!(entry.max_reads, 0);
        assert!(entry.allowed_cmds.is_empty());
        assert!(entry.symlink_to.is_none());
        assert!(!entry.writable);
        assert_eq!(entry.to_spec().mount_filename(), "v_i_f");
    }

    #[test]
    fn empty_document_is_allowed() {
        let config: Config = serde_yaml::from_str("secrets: []").unwrap();
        assert!(config.secrets.is_empty());
    }

    #[test]
    fn missing_reference_is_rejected() {
        let yaml = "secrets:\n  - filename: orphan\n";
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "secrets:\n  - reference: op://a/b/c").unwrap();
        let config = load(file.path()).unwrap();
        assert_eq!(config.secrets[0].reference, "op://a/b/c");
    }

    #[test]
    fn load_missing_file_errors() {
        assert!(load(Path::new("/nonexistent/config.yaml")).is_err());
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_path(Some(PathBuf::from("/etc/custom.yaml")));
        assert_eq!(path, PathBuf::from("/etc/custom.yaml"));
    }
}
