//! File identity resolution.
//!
//! A file identity is kernel-private: it names an object without carrying a
//! path. Resolution opens the object by its handle, then reads the path the
//! kernel reports for that open descriptor under `/proc/self/fd`.

use crate::error::{DriverError, DriverResult};
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use log::warn;
#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
#[cfg(target_os = "linux")]
use std::ffi::CString;
#[cfg(target_os = "linux")]
use std::os::unix::ffi::OsStrExt;
#[cfg(target_os = "linux")]
use std::path::Path;

/// Offset of the opaque handle bytes inside a file identity block:
/// info header (4) + fsid (8) + handle_bytes (4) + handle_type (4).
pub const HANDLE_OFFSET: usize = 20;

/// `MAX_HANDLE_SZ` from `<linux/fcntl.h>`.
pub const MAX_HANDLE_SZ: usize = 128;

/// Suffix the kernel appends to descriptor links of unlinked objects.
const DELETED_SUFFIX: &str = " (deleted)";

/// Identity of one filesystem object as reported by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub fsid: [i32; 2],
    pub handle_type: i32,
    pub handle: Vec<u8>,
}

impl FileIdentity {
    /// Split a file identity block into its fields.
    ///
    /// The handle bytes are copied as-is; only the declared handle length is
    /// checked against the block.
    pub fn parse(block: &[u8]) -> DriverResult<Self> {
        if block.len() < HANDLE_OFFSET {
            return Err(DriverError::HandleBounds {
                end: HANDLE_OFFSET,
                available: block.len(),
            });
        }

        let fsid = [
            i32::from_ne_bytes([block[4], block[5], block[6], block[7]]),
            i32::from_ne_bytes([block[8], block[9], block[10], block[11]]),
        ];
        let handle_bytes = u32::from_ne_bytes([block[12], block[13], block[14], block[15]]) as usize;
        let handle_type = i32::from_ne_bytes([block[16], block[17], block[18], block[19]]);

        let end = HANDLE_OFFSET
            .checked_add(handle_bytes)
            .filter(|end| *end <= block.len())
            .ok_or(DriverError::HandleBounds {
                end: HANDLE_OFFSET.saturating_add(handle_bytes),
                available: block.len(),
            })?;

        Ok(FileIdentity {
            fsid,
            handle_type,
            handle: block[HANDLE_OFFSET..end].to_vec(),
        })
    }

    /// `struct file_handle` as the kernel expects it: handle length, type,
    /// then the handle bytes, in 4-byte aligned storage.
    pub fn to_file_handle(&self) -> Vec<u32> {
        let len = 8 + self.handle.len();
        let mut bytes = Vec::with_capacity(len + 3);
        bytes.extend_from_slice(&(self.handle.len() as u32).to_ne_bytes());
        bytes.extend_from_slice(&self.handle_type.to_ne_bytes());
        bytes.extend_from_slice(&self.handle);
        bytes.resize((len + 3) / 4 * 4, 0);

        bytes
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

/// Turns a file identity into the current path of the object.
pub trait HandleResolver {
    fn resolve(&self, identity: &FileIdentity) -> DriverResult<PathBuf>;
}

impl<T: HandleResolver + ?Sized> HandleResolver for &T {
    fn resolve(&self, identity: &FileIdentity) -> DriverResult<PathBuf> {
        (**self).resolve(identity)
    }
}

/// Strip the kernel's unlinked marker from a descriptor link target.
///
/// `unlinked` must come from the object itself (a zero link count): a live
/// file may carry the marker text as part of its real name.
pub fn clean_link_target(target: PathBuf, unlinked: bool) -> PathBuf {
    if !unlinked {
        return target;
    }
    match target.to_str().and_then(|s| s.strip_suffix(DELETED_SUFFIX)) {
        Some(stripped) => PathBuf::from(stripped),
        None => target,
    }
}

// ============================================================================
// /proc Descriptor Resolver (Linux)
// ============================================================================

#[cfg(target_os = "linux")]
pub(crate) fn path_to_cstring(path: &Path) -> std::io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path contains an interior NUL byte",
        )
    })
}

#[cfg(target_os = "linux")]
impl FileIdentity {
    /// Ask the kernel for the identity of `path` with `name_to_handle_at`.
    ///
    /// The filesystem id is left zeroed; resolution never reads it.
    pub fn for_path(path: &Path) -> DriverResult<Self> {
        let to_error = |source: std::io::Error| DriverError::Resolve {
            operation: "name_to_handle_at",
            source,
        };
        let c_path = path_to_cstring(path).map_err(to_error)?;

        let mut words = vec![0u32; (8 + MAX_HANDLE_SZ) / 4];
        words[0] = MAX_HANDLE_SZ as u32;
        let mut mount_id: libc::c_int = 0;

        let ret = unsafe {
            libc::syscall(
                libc::SYS_name_to_handle_at,
                libc::AT_FDCWD,
                c_path.as_ptr(),
                words.as_mut_ptr(),
                &mut mount_id as *mut libc::c_int,
                0,
            )
        };
        if ret < 0 {
            return Err(to_error(std::io::Error::last_os_error()));
        }

        let handle_bytes = (words[0] as usize).min(MAX_HANDLE_SZ);
        Ok(FileIdentity {
            fsid: [0, 0],
            handle_type: words[1] as i32,
            handle: words[2..]
                .iter()
                .flat_map(|w| w.to_ne_bytes())
                .take(handle_bytes)
                .collect(),
        })
    }
}

/// Resolves identities with `open_by_handle_at` and `/proc/self/fd`.
///
/// Holds a descriptor on the watched root as the mount reference; the
/// subscription covers that root's whole filesystem, so every identity it
/// reports can be opened relative to it.
#[cfg(target_os = "linux")]
pub struct ProcFdResolver {
    mount: OwnedFd,
}

#[cfg(target_os = "linux")]
impl ProcFdResolver {
    /// Open the mount reference and resolve the root's own identity once,
    /// so a missing privilege surfaces here rather than on every event.
    pub fn new(root: &Path) -> DriverResult<Self> {
        let c_root = path_to_cstring(root).map_err(|source| DriverError::Setup {
            operation: "open mount reference",
            source,
        })?;

        // open_by_handle_at rejects O_PATH descriptors as the mount reference
        let fd = unsafe {
            libc::open(
                c_root.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(DriverError::Setup {
                operation: "open mount reference",
                source: std::io::Error::last_os_error(),
            });
        }

        let resolver = ProcFdResolver {
            // SAFETY: `fd` was just returned by open(2) and is owned by nobody else.
            mount: unsafe { OwnedFd::from_raw_fd(fd) },
        };

        FileIdentity::for_path(root)
            .and_then(|identity| resolver.resolve(&identity))
            .map_err(|e| match e {
                DriverError::Resolve { operation, source } => DriverError::Setup { operation, source },
                other => other,
            })?;

        Ok(resolver)
    }

    fn open_by_handle(&self, identity: &FileIdentity) -> DriverResult<TransientFd> {
        let mut handle = identity.to_file_handle();
        let ret = unsafe {
            libc::syscall(
                libc::SYS_open_by_handle_at,
                self.mount.as_raw_fd(),
                handle.as_mut_ptr(),
                libc::O_PATH | libc::O_CLOEXEC,
            )
        };
        if ret < 0 {
            return Err(DriverError::Resolve {
                operation: "open_by_handle_at",
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(TransientFd(ret as RawFd))
    }
}

#[cfg(target_os = "linux")]
impl HandleResolver for ProcFdResolver {
    fn resolve(&self, identity: &FileIdentity) -> DriverResult<PathBuf> {
        let fd = self.open_by_handle(identity)?;
        let link = format!("/proc/self/fd/{}", fd.0);

        let target = std::fs::read_link(&link).map_err(|source| DriverError::Resolve {
            operation: "readlink",
            source,
        })?;

        Ok(clean_link_target(target, fd.is_unlinked()))
    }
}

/// Descriptor opened for a single resolution; closed on every exit path.
#[cfg(target_os = "linux")]
struct TransientFd(RawFd);

#[cfg(target_os = "linux")]
impl TransientFd {
    /// True when the object has no remaining links. A failed fstat counts
    /// as linked, so the link target is reported untouched.
    fn is_unlinked(&self) -> bool {
        let mut st = unsafe { std::mem::zeroed::<libc::stat>() };
        if unsafe { libc::fstat(self.0, &mut st) } != 0 {
            return false;
        }
        st.st_nlink == 0
    }
}

#[cfg(target_os = "linux")]
impl Drop for TransientFd {
    fn drop(&mut self) {
        if unsafe { libc::close(self.0) } != 0 {
            warn!(
                "Couldn't close file descriptor {}: {}",
                self.0,
                std::io::Error::last_os_error()
            );
        }
    }
}
