//! Thin wrappers around the kernel primitives the monitors rely on.
//!
//! This module provides:
//! - process-wide constants (`PAGE_SIZE`, `CLK_TCK`) queried once via `sysconf`
//! - `EventFd`: an owned eventfd counter used for cgroup pressure notifications
//! - `Epoll`: an owned epoll set used to wait for PSI trigger readiness
//!
//! All descriptors are `OwnedFd`-backed and closed on drop.

use once_cell::sync::Lazy;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Get system page size in bytes (usually 4096).
fn get_page_size() -> usize {
    // SAFETY: sysconf is safe to call with _SC_PAGESIZE
    // Returns -1 on error, handled by the > 0 check
    unsafe {
        let size = libc::sysconf(libc::_SC_PAGESIZE);
        if size > 0 {
            return size as usize;
        }
    }
    4096
}

/// Get system clock ticks per second (usually 100, but can vary).
fn get_clk_tck() -> u64 {
    // SAFETY: sysconf is safe to call with _SC_CLK_TCK
    // Returns -1 on error, 0 if undefined - both are handled by the > 0 check
    unsafe {
        let tck = libc::sysconf(libc::_SC_CLK_TCK);
        if tck > 0 {
            return tck as u64;
        }
    }
    100
}

/// System page size in bytes.
pub static PAGE_SIZE: Lazy<usize> = Lazy::new(get_page_size);

/// System clock ticks per second (for CPU time calculation).
pub static CLK_TCK: Lazy<u64> = Lazy::new(get_clk_tck);

/// Kernel event counter created with `eventfd(2)`.
///
/// Reads block until the counter is non-zero and then return (and reset) it.
pub struct EventFd {
    file: File,
}

impl EventFd {
    pub fn new() -> io::Result<Self> {
        // SAFETY: eventfd has no pointer arguments; a negative return is an error
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by eventfd and is owned by nobody else
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            file: File::from(owned),
        })
    }

    /// Blocks until the counter is signalled and returns its value.
    pub fn read_counter(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        (&self.file).read_exact(&mut buf)?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Adds `value` to the counter, waking a blocked reader.
    pub fn signal(&self, value: u64) -> io::Result<()> {
        (&self.file).write_all(&value.to_ne_bytes())
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Owned `epoll(7)` interest set.
pub struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        // SAFETY: epoll_create1 has no pointer arguments; a negative return is an error
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd was just returned by epoll_create1 and is owned by nobody else
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Registers `fd` for priority (`EPOLLPRI`) readiness, tagged with `token`.
    pub fn add_priority(&self, fd: RawFd, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLPRI as u32,
            u64: token,
        };
        // SAFETY: event points to a valid epoll_event for the duration of the call
        let rc = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits up to `timeout`, filling `events` with the ready descriptors,
    /// and returns how many were filled.
    ///
    /// An interrupted wait (`EINTR`) is reported as zero ready descriptors.
    pub fn wait(&self, timeout: Duration, events: &mut [libc::epoll_event]) -> io::Result<usize> {
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        let capacity = events.len().min(i32::MAX as usize) as i32;
        // SAFETY: events has room for `capacity` entries
        let n = unsafe { libc::epoll_wait(self.fd.as_raw_fd(), events.as_mut_ptr(), capacity, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }
}

/// Zeroed event, for sizing `Epoll::wait` buffers.
pub const EMPTY_EPOLL_EVENT: libc::epoll_event = libc::epoll_event { events: 0, u64: 0 };
