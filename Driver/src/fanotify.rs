//! Subscription to the kernel's fanotify event source.

use crate::error::{DriverError, DriverResult};
use crate::listener::ShutdownHandle;
use crate::mask::FanMask;
use crate::resolve::path_to_cstring;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};

const FAN_CLASS_NOTIF: libc::c_uint = 0x0000_0000;
const FAN_CLOEXEC: libc::c_uint = 0x0000_0001;
const FAN_REPORT_FID: libc::c_uint = 0x0000_0200;

const FAN_MARK_ADD: libc::c_uint = 0x0000_0001;
const FAN_MARK_FILESYSTEM: libc::c_uint = 0x0000_0100;

/// An fanotify group reporting file identities, marked on the whole
/// filesystem that contains `root`. The descriptor closes on drop.
pub struct Subscription {
    fd: OwnedFd,
    root: PathBuf,
}

impl Subscription {
    pub fn open(root: &Path, mask: FanMask) -> DriverResult<Self> {
        let c_root = path_to_cstring(root).map_err(|source| DriverError::Setup {
            operation: "fanotify_mark",
            source,
        })?;

        let raw = unsafe {
            libc::fanotify_init(
                FAN_CLASS_NOTIF | FAN_CLOEXEC | FAN_REPORT_FID,
                (libc::O_RDONLY | libc::O_CLOEXEC) as libc::c_uint,
            )
        };
        if raw < 0 {
            return Err(DriverError::Setup {
                operation: "fanotify_init",
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: `raw` is a fresh descriptor returned by fanotify_init(2).
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let ret = unsafe {
            libc::fanotify_mark(
                fd.as_raw_fd(),
                FAN_MARK_ADD | FAN_MARK_FILESYSTEM,
                mask.bits(),
                libc::AT_FDCWD,
                c_root.as_ptr(),
            )
        };
        if ret < 0 {
            return Err(DriverError::Setup {
                operation: "fanotify_mark",
                source: io::Error::last_os_error(),
            });
        }

        Ok(Subscription {
            fd,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn the subscription into a readable byte stream that ends when
    /// `shutdown` fires.
    pub fn into_source(self, shutdown: ShutdownHandle) -> EventSource {
        EventSource {
            file: File::from(self.fd),
            shutdown,
        }
    }
}

/// Byte stream over the subscription descriptor.
///
/// Every read first polls the subscription together with the shutdown
/// wake descriptor; a wake reads as end of stream. The kernel hands out
/// whole records per read, so a wake is only observed between records.
pub struct EventSource {
    file: File,
    shutdown: ShutdownHandle,
}

/// Poll timeout used when no wake descriptor could be created.
const FALLBACK_POLL_MS: libc::c_int = 500;

impl Read for EventSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let wake_fd = self.shutdown.wake_fd();
        let timeout = if wake_fd.is_some() { -1 } else { FALLBACK_POLL_MS };

        loop {
            if self.shutdown.is_stopped() {
                return Ok(0);
            }

            let mut fds = [
                libc::pollfd {
                    fd: self.file.as_raw_fd(),
                    events: libc::POLLIN,
                    revents: 0,
                },
                libc::pollfd {
                    // poll(2) ignores negative descriptors
                    fd: wake_fd.unwrap_or(-1),
                    events: libc::POLLIN,
                    revents: 0,
                },
            ];

            let ready = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            if fds[1].revents & libc::POLLIN != 0 {
                return Ok(0);
            }
            if fds[0].revents & libc::POLLNVAL != 0 {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            if fds[0].revents & libc::POLLIN != 0 {
                return self.file.read(buf);
            }
            if fds[0].revents & (libc::POLLERR | libc::POLLHUP) != 0 {
                return Ok(0);
            }
        }
    }
}
