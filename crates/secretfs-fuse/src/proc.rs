//! OS-specific process introspection: command line and executable path.
//!
//! Both lookups fail soft: any error yields `None` and the caller treats
//! the process as unknown. The access-control layer decides what unknown
//! means for a given check.

use std::path::PathBuf;

/// The argv of a process, or `None` when it cannot be determined.
#[cfg(target_os = "linux")]
pub fn cmdline_args(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;

    // argv entries are NUL-delimited with an optional trailing NUL
    let mut end = raw.len();
    while end > 0 && raw[end - 1] == 0 {
        end -= 1;
    }
    if end == 0 {
        return None;
    }

    Some(
        raw[..end]
            .split(|b| *b == 0)
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect(),
    )
}

/// The canonical executable path of a process.
#[cfg(target_os = "linux")]
pub fn exe_path(pid: u32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/exe")).ok()
}

#[cfg(target_os = "macos")]
pub fn cmdline_args(pid: u32) -> Option<Vec<String>> {
    let buf = kern_procargs2(pid)?;
    let (_exe, argv) = parse_procargs2(&buf)?;
    if argv.is_empty() {
        return None;
    }
    Some(argv)
}

#[cfg(target_os = "macos")]
pub fn exe_path(pid: u32) -> Option<PathBuf> {
    let mut buf = vec![0u8; libc::PROC_PIDPATHINFO_MAXSIZE as usize];
    // SAFETY: buf outlives the call and its length is passed alongside.
    let len = unsafe {
        libc::proc_pidpath(
            pid as libc::c_int,
            buf.as_mut_ptr().cast(),
            buf.len() as u32,
        )
    };
    if len <= 0 {
        return None;
    }
    buf.truncate(len as usize);
    Some(PathBuf::from(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(target_os = "macos")]
fn kern_procargs2(pid: u32) -> Option<Vec<u8>> {
    let mut mib = [libc::CTL_KERN, libc::KERN_PROCARGS2, pid as libc::c_int];
    let mut size: libc::size_t = 0;

    // SAFETY: standard two-call sysctl pattern; the second call writes at
    // most `size` bytes into a buffer of exactly that length.
    unsafe {
        if libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            std::ptr::null_mut(),
            &mut size,
            std::ptr::null_mut(),
            0,
        ) != 0
        {
            return None;
        }
        let mut buf = vec![0u8; size];
        if libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            buf.as_mut_ptr().cast(),
            &mut size,
            std::ptr::null_mut(),
            0,
        ) != 0
        {
            return None;
        }
        buf.truncate(size);
        Some(buf)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn cmdline_args(_pid: u32) -> Option<Vec<String>> {
    None
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn exe_path(_pid: u32) -> Option<PathBuf> {
    None
}

/// Parse a `KERN_PROCARGS2` buffer.
///
/// Layout: a little-endian `u32` argc, the NUL-terminated executable path,
/// any number of NUL padding bytes, then `argc` NUL-terminated argv
/// strings. A buffer shorter than four bytes or a missing terminator is a
/// parse failure.
pub fn parse_procargs2(buf: &[u8]) -> Option<(String, Vec<String>)> {
    let argc_bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let argc = u32::from_le_bytes(argc_bytes) as usize;
    let rest = &buf[4..];

    let exe_end = rest.iter().position(|b| *b == 0)?;
    let exe = String::from_utf8_lossy(&rest[..exe_end]).into_owned();

    let mut offset = exe_end;
    while offset < rest.len() && rest[offset] == 0 {
        offset += 1;
    }

    let mut argv = Vec::with_capacity(argc);
    for _ in 0..argc {
        let tail = rest.get(offset..)?;
        let end = tail.iter().position(|b| *b == 0)?;
        argv.push(String::from_utf8_lossy(&tail[..end]).into_owned());
        offset += end + 1;
    }
    Some((exe, argv))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn procargs2_buf(argc: u32, exe: &str, padding: usize, argv: &[&str]) -> Vec<u8> {
        let mut buf = argc.to_le_bytes().to_vec();
        buf.extend_from_slice(exe.as_bytes());
        buf.push(0);
        buf.extend(std::iter::repeat(0).take(padding));
        for arg in argv {
            buf.extend_from_slice(arg.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn parse_procargs2_layout() {
        let buf = procargs2_buf(2, "/usr/bin/curl", 3, &["/usr/bin/curl", "-sS"]);
        let (exe, argv) = parse_procargs2(&buf).unwrap();
        assert_eq!(exe, "/usr/bin/curl");
        assert_eq!(argv, vec!["/usr/bin/curl", "-sS"]);
    }

    #[test]
    fn parse_procargs2_without_padding() {
        let buf = procargs2_buf(1, "/bin/sh", 0, &["sh"]);
        let (exe, argv) = parse_procargs2(&buf).unwrap();
        assert_eq!(exe, "/bin/sh");
        assert_eq!(argv, vec!["sh"]);
    }

    #[test]
    fn parse_procargs2_zero_argc() {
        let buf = procargs2_buf(0, "/bin/true", 2, &[]);
        let (exe, argv) = parse_procargs2(&buf).unwrap();
        assert_eq!(exe, "/bin/true");
        assert!(argv.is_empty());
    }

    #[test]
    fn parse_procargs2_short_buffer_fails() {
        assert!(parse_procargs2(&[]).is_none());
        assert!(parse_procargs2(&[1, 0, 0]).is_none());
    }

    #[test]
    fn parse_procargs2_missing_terminator_fails() {
        // argc says two strings but only one is terminated
        let mut buf = 2u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"/bin/sh\0sh\0-c");
        assert!(parse_procargs2(&buf).is_none());

        // executable path never terminated
        let mut buf = 1u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"/bin/sh");
        assert!(parse_procargs2(&buf).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cmdline_args_for_current_process() {
        let args = cmdline_args(std::process::id()).unwrap();
        assert!(!args.is_empty());
        assert!(!args[0].is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn cmdline_args_for_missing_process() {
        assert!(cmdline_args(u32::MAX - 1).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn exe_path_for_current_process_exists() {
        let exe = exe_path(std::process::id()).unwrap();
        assert!(exe.exists());
    }
}
