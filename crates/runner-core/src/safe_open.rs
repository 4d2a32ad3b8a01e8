//! Symlink-refusing `open` of an absolute path (component A).
//!
//! On Linux this is `openat2(AT_FDCWD, path, {flags=O_RDONLY|O_CLOEXEC,
//! resolve=RESOLVE_NO_SYMLINKS})` when the kernel supports it, falling back
//! to a component-by-component `lstat` walk plus a final `O_NOFOLLOW` open
//! when it doesn't (old kernels, or non-Linux Unix). Both paths return the
//! same error taxonomy so callers never need to know which one ran.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::{Component, Path, PathBuf};

use crate::error::{RunnerError, Result};

/// A handle obtained from [`safe_open_readonly`]. Supports sequential reads
/// and positioned reads so ELF parsing never needs to reopen the file.
pub struct SafeFile {
    file: File,
}

impl SafeFile {
    /// Positioned read, equivalent to `pread`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    pub fn len(&self) -> std::io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Take a fresh sequential reader positioned at the start of the file.
    pub fn reader(&self) -> std::io::Result<impl Read + '_> {
        let mut f = self.file.try_clone()?;
        f.seek(SeekFrom::Start(0))?;
        Ok(f)
    }
}

/// Open `path` read-only, refusing any symlink at any path component.
///
/// `path` must be absolute; relative or empty paths fail with
/// [`RunnerError::NotAbsolute`]/[`RunnerError::InvalidPath`].
pub fn safe_open_readonly(path: &Path) -> Result<SafeFile> {
    if path.as_os_str().is_empty() {
        return Err(RunnerError::InvalidPath {
            path: String::new(),
        });
    }
    if !path.is_absolute() {
        return Err(RunnerError::NotAbsolute {
            path: path.to_path_buf(),
        });
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    {
        match openat2_strict(path) {
            Ok(fd) => {
                let file = unsafe { File::from_raw_fd(fd) };
                return Ok(SafeFile { file });
            }
            Err(Openat2Error::Unsupported) => {
                tracing::debug!(target: "runner_core::safe_open", ?path, "openat2 unsupported, using fallback");
            }
            Err(Openat2Error::Symlink(component)) => {
                return Err(RunnerError::SymlinkRejected {
                    path: path.to_path_buf(),
                    component,
                });
            }
            Err(Openat2Error::PermissionDenied) => {
                return Err(RunnerError::PermissionDenied {
                    path: path.to_path_buf(),
                });
            }
            Err(Openat2Error::Other(e)) => {
                return Err(RunnerError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }
    }

    open_no_symlinks_fallback(path)
}

// ---------------------------------------------------------------------------
// openat2 fast path (Linux x86_64 / aarch64)
// ---------------------------------------------------------------------------

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
enum Openat2Error {
    Unsupported,
    Symlink(PathBuf),
    PermissionDenied,
    Other(std::io::Error),
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[repr(C)]
struct OpenHow {
    flags: u64,
    mode: u64,
    resolve: u64,
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
const RESOLVE_NO_SYMLINKS: u64 = 0x04;

#[cfg(target_arch = "x86_64")]
const SYS_OPENAT2: i64 = 437;
#[cfg(target_arch = "aarch64")]
const SYS_OPENAT2: i64 = 437;

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn openat2_strict(path: &Path) -> std::result::Result<RawFd, Openat2Error> {
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Openat2Error::Other(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;

    let how = OpenHow {
        flags: (libc::O_RDONLY | libc::O_CLOEXEC) as u64,
        mode: 0,
        resolve: RESOLVE_NO_SYMLINKS,
    };

    let ret = unsafe {
        libc::syscall(
            SYS_OPENAT2,
            libc::AT_FDCWD,
            cpath.as_ptr(),
            &how as *const OpenHow,
            std::mem::size_of::<OpenHow>(),
        )
    };

    if ret >= 0 {
        return Ok(ret as RawFd);
    }

    let errno = std::io::Error::last_os_error();
    match errno.raw_os_error() {
        Some(libc::ENOSYS) | Some(libc::EOPNOTSUPP) => Err(Openat2Error::Unsupported),
        Some(libc::ELOOP) | Some(libc::EXDEV) => {
            Err(Openat2Error::Symlink(path.to_path_buf()))
        }
        Some(libc::EACCES) | Some(libc::EPERM) => Err(Openat2Error::PermissionDenied),
        _ => Err(Openat2Error::Other(errno)),
    }
}

// ---------------------------------------------------------------------------
// Portable fallback: walk components, lstat each, O_NOFOLLOW the last one.
// ---------------------------------------------------------------------------

fn open_no_symlinks_fallback(path: &Path) -> Result<SafeFile> {
    let mut walked = PathBuf::new();
    let mut components: Vec<Component<'_>> = path.components().collect();
    let last = components.pop();

    for component in components {
        walked.push(component);
        if matches!(component, Component::RootDir | Component::Prefix(_)) {
            continue;
        }
        match std::fs::symlink_metadata(&walked) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(RunnerError::SymlinkRejected {
                    path: path.to_path_buf(),
                    component: walked.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                return Err(RunnerError::Io {
                    path: walked.clone(),
                    source: e,
                })
            }
        }
    }

    let Some(last) = last else {
        return Err(RunnerError::InvalidPath {
            path: path.display().to_string(),
        });
    };
    walked.push(last);

    let cpath = std::ffi::CString::new(walked.as_os_str().as_bytes()).map_err(|_| {
        RunnerError::InvalidPath {
            path: walked.display().to_string(),
        }
    })?;

    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NOFOLLOW,
        )
    };

    if fd < 0 {
        let errno = std::io::Error::last_os_error();
        return match errno.raw_os_error() {
            Some(libc::ELOOP) => Err(RunnerError::SymlinkRejected {
                path: path.to_path_buf(),
                component: walked,
            }),
            Some(libc::EACCES) | Some(libc::EPERM) => {
                Err(RunnerError::PermissionDenied { path: walked })
            }
            _ => Err(RunnerError::Io {
                path: walked,
                source: errno,
            }),
        };
    }

    let file = unsafe { File::from_raw_fd(fd) };
    Ok(SafeFile { file })
}

impl AsRawFd for SafeFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn opens_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"hello").unwrap();

        let handle = safe_open_readonly(&path).expect("should open");
        let mut buf = [0u8; 5];
        handle.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn rejects_relative_path() {
        let err = safe_open_readonly(Path::new("relative/path")).unwrap_err();
        assert!(matches!(err, RunnerError::NotAbsolute { .. }));
    }

    #[test]
    fn rejects_empty_path() {
        let err = safe_open_readonly(Path::new("")).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidPath { .. }));
    }

    #[test]
    fn rejects_symlink_last_component() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        std::fs::write(&target, b"secret").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = safe_open_readonly(&link).unwrap_err();
        assert!(matches!(err, RunnerError::SymlinkRejected { .. }));
    }

    #[test]
    fn rejects_symlink_intermediate_component() {
        let dir = tempfile::tempdir().unwrap();
        let real_dir = dir.path().join("real");
        std::fs::create_dir(&real_dir).unwrap();
        let file_path = real_dir.join("f.txt");
        std::fs::write(&file_path, b"x").unwrap();

        let link_dir = dir.path().join("linked");
        std::os::unix::fs::symlink(&real_dir, &link_dir).unwrap();
        let via_link = link_dir.join("f.txt");

        let err = safe_open_readonly(&via_link).unwrap_err();
        assert!(matches!(err, RunnerError::SymlinkRejected { .. }));
    }

    #[test]
    fn rejects_unreadable_file_as_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        std::fs::write(&path, b"secret").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Root (e.g. inside a container build) ignores file permission bits,
        // so this assertion only holds when running as an unprivileged user.
        if unsafe { libc::geteuid() } != 0 {
            let err = safe_open_readonly(&path).unwrap_err();
            assert!(matches!(err, RunnerError::PermissionDenied { .. }));
        }
    }

    #[test]
    fn surfaces_not_found_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        let err = safe_open_readonly(&missing).unwrap_err();
        assert!(matches!(err, RunnerError::Io { .. }));
    }

    #[test]
    fn reader_starts_at_beginning_after_read_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        let handle = safe_open_readonly(&path).unwrap();
        let mut mid = [0u8; 4];
        handle.read_at(&mut mid, 3).unwrap();
        assert_eq!(&mid, b"3456");

        let mut full = Vec::new();
        handle.reader().unwrap().read_to_end(&mut full).unwrap();
        assert_eq!(full, b"0123456789");
    }
}
