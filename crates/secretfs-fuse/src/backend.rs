//! Mount lifecycle: spawning the FUSE session and unmounting it.
//!
//! Unmount is cooperative: we ask the OS to detach (`fusermount -u` /
//! `umount`) under a deadline. When the mount is busy the request fails,
//! the session keeps serving, and the operator is told which processes
//! hold files open so they can close them and retry.

use crate::filesystem::SecretsFs;
use fuser::{BackgroundSession, MountOption};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Mount failure.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("FUSE is not available: {0}")]
    Unavailable(String),

    #[error("failed to prepare mount point {path}: {source}")]
    MountPoint { path: PathBuf, source: io::Error },

    #[error("mount failed: {0}")]
    Mount(#[from] io::Error),
}

/// Outcome of an unmount attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// The filesystem detached and the session wound down.
    Clean,
    /// The mount is held open; it was left in place.
    Busy,
}

/// Handle to a mounted secrets filesystem.
///
/// Dropping the handle tears the session down unconditionally; use
/// [`MountHandle::unmount`] for the graceful path.
pub struct MountHandle {
    session: Option<BackgroundSession>,
    mountpoint: PathBuf,
}

impl MountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Attempt a graceful unmount within `timeout`.
    ///
    /// On [`UnmountOutcome::Busy`] the session stays alive and keeps
    /// serving the mount.
    pub fn unmount(&mut self, timeout: Duration) -> UnmountOutcome {
        match detach_with_timeout(&self.mountpoint, timeout) {
            Ok(()) => {
                if let Some(session) = self.session.take() {
                    session.join();
                }
                info!(mountpoint = %self.mountpoint.display(), "unmounted");
                UnmountOutcome::Clean
            }
            Err(e) => {
                warn!(
                    mountpoint = %self.mountpoint.display(),
                    error = %e,
                    "unmount failed; leaving mount in place"
                );
                UnmountOutcome::Busy
            }
        }
    }

    /// Block until the session ends (external unmount or process signal).
    pub fn wait(mut self) {
        if let Some(session) = self.session.take() {
            session.join();
        }
    }
}

/// Whether a FUSE implementation is present on this host.
pub fn is_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

fn unavailable_reason() -> String {
    #[cfg(target_os = "linux")]
    {
        "FUSE is not available; ensure the fuse kernel module is loaded".to_string()
    }
    #[cfg(target_os = "macos")]
    {
        "macFUSE is not installed; download it from https://macfuse.github.io/".to_string()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        "FUSE is not supported on this platform".to_string()
    }
}

/// Mount the filesystem at `mountpoint`, creating the directory if needed.
pub fn mount(fs: SecretsFs, mountpoint: &Path) -> Result<MountHandle, MountError> {
    if !is_available() {
        return Err(MountError::Unavailable(unavailable_reason()));
    }

    std::fs::create_dir_all(mountpoint).map_err(|source| MountError::MountPoint {
        path: mountpoint.to_path_buf(),
        source,
    })?;

    let options = [
        MountOption::FSName("secrets-fuse".to_string()),
        MountOption::Subtype("secretfs".to_string()),
        MountOption::AutoUnmount,
    ];
    let session = fuser::spawn_mount2(fs, mountpoint, &options)?;

    info!(mountpoint = %mountpoint.display(), "secrets filesystem mounted");
    Ok(MountHandle {
        session: Some(session),
        mountpoint: mountpoint.to_path_buf(),
    })
}

/// Ask the OS to detach the mount, bounded by `timeout`.
fn detach_with_timeout(mountpoint: &Path, timeout: Duration) -> io::Result<()> {
    let mountpoint = mountpoint.to_path_buf();
    let (tx, rx) = mpsc::channel();

    std::thread::spawn(move || {
        let _ = tx.send(detach(&mountpoint));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "unmount did not complete within the deadline",
        )),
    }
}

fn detach(mountpoint: &Path) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    let output = Command::new("fusermount").arg("-u").arg(mountpoint).output()?;
    #[cfg(target_os = "macos")]
    let output = Command::new("umount").arg(mountpoint).output()?;
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    return Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no unmount tool for this platform",
    ));

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        if output.status.success() {
            Ok(())
        } else {
            Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// A process holding files open under the mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
}

/// Find processes using files under a mountpoint, via `lsof`.
///
/// Returns an empty list when detection is unavailable or fails; this is
/// diagnostics, never policy.
pub fn processes_using_mount(mountpoint: &Path) -> Vec<ProcessInfo> {
    let output = match Command::new("lsof").arg("+D").arg(mountpoint).output() {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "failed to run lsof");
            return Vec::new();
        }
    };

    // lsof exits non-zero when nothing is found
    parse_lsof(&String::from_utf8_lossy(&output.stdout))
}

fn parse_lsof(stdout: &str) -> Vec<ProcessInfo> {
    let mut processes: HashMap<u32, ProcessInfo> = HashMap::new();

    // COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME
    for line in stdout.lines().skip(1) {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else { continue };
        let Some(pid) = parts.next().and_then(|p| p.parse().ok()) else {
            continue;
        };
        processes.entry(pid).or_insert(ProcessInfo {
            pid,
            name: name.to_string(),
        });
    }

    processes.into_values().collect()
}
