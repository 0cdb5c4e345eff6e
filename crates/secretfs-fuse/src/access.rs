//! Caller identification and the command-line checks of the access
//! pipeline.
//!
//! The kernel hands us a `(uid, gid, pid)` triple with each request. From
//! the pid we reconstruct the caller's command line and executable path,
//! reject callers whose argv[0] does not reconcile with their real
//! executable (argv spoofing), and match the command line against a
//! per-secret glob allowlist.

use crate::proc;
use glob::Pattern;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// Caller identity as supplied by the kernel.
///
/// A pid of zero means the request originated from a context without a
/// userspace caller; such callers are treated as unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl Caller {
    /// A caller without a userspace identity.
    pub fn unknown() -> Self {
        Self {
            uid: 0,
            gid: 0,
            pid: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.pid == 0
    }
}

/// Caller identity resolved for logging: the kernel triple plus the
/// space-joined command line (empty when introspection failed).
#[derive(Debug, Clone)]
pub struct CallerInfo {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
    pub cmdline: String,
}

impl CallerInfo {
    pub fn unknown() -> Self {
        Self {
            uid: 0,
            gid: 0,
            pid: 0,
            cmdline: String::new(),
        }
    }

    /// Resolve the command line for a kernel-supplied caller.
    pub fn resolve(caller: Caller) -> Self {
        if caller.is_unknown() {
            return Self::unknown();
        }
        Self {
            uid: caller.uid,
            gid: caller.gid,
            pid: caller.pid,
            cmdline: cmdline(caller.pid).unwrap_or_default(),
        }
    }
}

impl fmt::Display for CallerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pid == 0 {
            return write!(f, "unknown");
        }
        write!(
            f,
            "uid={} gid={} pid={} cmd={:?}",
            self.uid, self.gid, self.pid, self.cmdline
        )
    }
}

/// Space-joined argv of a process, or `None` when it cannot be read.
pub fn cmdline(pid: u32) -> Option<String> {
    let args = proc::cmdline_args(pid)?;
    if args.is_empty() {
        return None;
    }
    Some(args.join(" "))
}

/// The first space-delimited token of a command line (argv[0]).
pub fn first_arg(cmdline: &str) -> &str {
    match cmdline.find(' ') {
        Some(idx) => &cmdline[..idx],
        None => cmdline,
    }
}

/// Check that a process's argv[0] reconciles with its real executable:
/// either the strings are equal, or both paths refer to the same inode
/// (device + inode identity, so symlinked invocations still pass).
///
/// Any introspection failure fails closed.
pub fn validate_cmdline_exe(pid: u32) -> bool {
    let Some(args) = proc::cmdline_args(pid) else {
        return false;
    };
    let Some(arg0) = args.first().filter(|a| !a.is_empty()) else {
        return false;
    };
    let Some(exe) = proc::exe_path(pid) else {
        return false;
    };

    if exe == Path::new(arg0) {
        return true;
    }
    same_file(&exe, Path::new(arg0))
}

fn same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        match (std::fs::metadata(a), std::fs::metadata(b)) {
            (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (a, b);
        false
    }
}

/// A compiled command-line allowlist.
///
/// Only an empty *configured* list permits everything. A malformed
/// pattern is dropped with a warning but still counts as configured, so a
/// list whose patterns are all malformed denies every caller rather than
/// degrading into no allowlist at all.
#[derive(Debug, Default)]
pub struct Allowlist {
    patterns: Vec<Pattern>,
    restricted: bool,
}

impl Allowlist {
    /// Compile the configured globs, dropping malformed patterns.
    pub fn compile(raw: &[String]) -> Self {
        let patterns = raw
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(error) => {
                    warn!(pattern = %raw, %error, "ignoring malformed allowlist pattern");
                    None
                }
            })
            .collect();
        Self {
            patterns,
            restricted: !raw.is_empty(),
        }
    }

    /// Match a command line: the full cmdline and the argv[0] prefix are
    /// each tried against every pattern. Any match permits.
    pub fn allows(&self, cmdline: &str) -> bool {
        if !self.restricted {
            return true;
        }
        self.patterns
            .iter()
            .any(|p| p.matches(cmdline) || p.matches(first_arg(cmdline)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowlist(raw: &[&str]) -> Allowlist {
        Allowlist::compile(&raw.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn first_arg_splits_on_first_space() {
        assert_eq!(first_arg("/usr/bin/curl -sS https://x"), "/usr/bin/curl");
        assert_eq!(first_arg("/usr/bin/curl"), "/usr/bin/curl");
        assert_eq!(first_arg(""), "");
    }

    #[test]
    fn empty_allowlist_permits_everything() {
        let list = allowlist(&[]);
        assert!(list.allows("/usr/bin/wget https://x"));
        assert!(list.allows(""));
    }

    #[test]
    fn allowlist_matches_argv0_prefix() {
        let list = allowlist(&["/usr/bin/curl*"]);
        assert!(list.allows("/usr/bin/curl -sS https://x"));
        assert!(list.allows("/usr/bin/curl"));
        assert!(!list.allows("/usr/bin/wget https://x"));
    }

    #[test]
    fn allowlist_glob_classes() {
        let list = allowlist(&["/opt/tool-v[0-9]"]);
        assert!(list.allows("/opt/tool-v3"));
        assert!(!list.allows("/opt/tool-vX"));

        let list = allowlist(&["python?"]);
        assert!(list.allows("python3"));
        assert!(!list.allows("python"));
    }

    #[test]
    fn any_pattern_match_permits() {
        let list = allowlist(&["/usr/bin/ssh*", "/usr/bin/git*"]);
        assert!(list.allows("/usr/bin/git credential fill"));
    }

    #[test]
    fn malformed_patterns_only_narrow() {
        let list = allowlist(&["[unclosed", "/usr/bin/curl*"]);
        assert!(list.allows("/usr/bin/curl"));
        assert!(!list.allows("/usr/bin/wget"));
    }

    #[test]
    fn all_malformed_patterns_fail_closed() {
        // a configured allowlist never degrades into "allow everyone"
        let list = allowlist(&["[unclosed", "[also-bad"]);
        assert!(!list.allows("/usr/bin/curl"));
        assert!(!list.allows("/usr/bin/curl -sS https://x"));
        assert!(!list.allows(""));
    }

    #[test]
    fn nonexistent_pid_fails_closed() {
        assert!(!validate_cmdline_exe(u32::MAX - 1));
        assert!(cmdline(u32::MAX - 1).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_validates() {
        assert!(validate_cmdline_exe(std::process::id()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_process_cmdline_has_no_nuls() {
        let cmd = cmdline(std::process::id()).unwrap();
        assert!(!cmd.is_empty());
        assert!(!cmd.contains('\0'));
    }

    #[test]
    fn caller_info_display() {
        let info = CallerInfo {
            uid: 1000,
            gid: 1000,
            pid: 4242,
            cmdline: "/usr/bin/curl -sS".to_string(),
        };
        assert_eq!(
            info.to_string(),
            "uid=1000 gid=1000 pid=4242 cmd=\"/usr/bin/curl -sS\""
        );
        assert_eq!(CallerInfo::unknown().to_string(), "unknown");
    }
}
