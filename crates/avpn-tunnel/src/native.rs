//! Native engine bindings
//!
//! The protocol engines run in native libraries. [`WireGuardAbi`] mirrors the
//! libwg-go surface, [`OpenVpnClient`] wraps a blocking OpenVPN client loop.
//! Both are traits so the controller can be driven without the libraries.

use crate::host::TunDescriptor;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::os::fd::RawFd;
use std::time::Duration;

/// The libwg-go C ABI
///
/// `turn_on` borrows the descriptor; an implementation that keeps the
/// interface open must duplicate it. Negative handles signal failure.
pub trait WireGuardAbi: Send + Sync {
    fn turn_on(&self, ifname: &str, tun_fd: RawFd, settings: &str) -> i32;
    fn turn_off(&self, handle: i32);
    /// Runtime configuration dump, `key=value` per line
    fn runtime_config(&self, handle: i32) -> Option<String>;
    fn socket_v4(&self, handle: i32) -> i32;
    fn socket_v6(&self, handle: i32) -> i32;
    fn version(&self) -> String;
}

/// Stop request for a blocking engine loop.
///
/// Raised when the paired sender is dropped.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new(rx: Receiver<()>) -> Self {
        Self { rx }
    }

    pub fn is_raised(&self) -> bool {
        matches!(self.rx.try_recv(), Ok(()) | Err(TryRecvError::Disconnected))
    }

    /// Block until stop is requested
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    /// Block up to `timeout`; true if stop was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

/// Blocking OpenVPN client
pub trait OpenVpnClient: Send + Sync {
    fn version(&self) -> String {
        "unknown".to_string()
    }

    /// Run the session over `tun` until `stop` is raised or the session
    /// ends. Called on a dedicated worker thread.
    fn connect(&self, profile: &str, tun: &TunDescriptor, stop: &StopSignal) -> Result<(), String>;
}

#[cfg(feature = "native")]
pub use libwg::LibWg;

/// Duplicate `fd` for a library that takes ownership of what it is given.
#[cfg(any(feature = "native", test))]
fn handoff_fd(fd: RawFd) -> Option<RawFd> {
    let dup = unsafe { libc::dup(fd) };
    (dup >= 0).then_some(dup)
}

/// Close a duplicate the library refused
#[cfg(any(feature = "native", test))]
fn close_handoff(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[cfg(feature = "native")]
mod libwg {
    use super::{WireGuardAbi, close_handoff, handoff_fd};
    use std::ffi::{CStr, CString, c_char, c_int};
    use std::os::fd::RawFd;
    use tracing::error;

    #[link(name = "wg-go")]
    unsafe extern "C" {
        fn wgTurnOn(ifname: *const c_char, tun_fd: c_int, settings: *const c_char) -> c_int;
        fn wgTurnOff(handle: c_int);
        fn wgGetConfig(handle: c_int) -> *mut c_char;
        fn wgGetSocketV4(handle: c_int) -> c_int;
        fn wgGetSocketV6(handle: c_int) -> c_int;
        fn wgVersion() -> *mut c_char;
    }

    /// Take ownership of a C string allocated by libwg-go
    fn take_string(ptr: *mut c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: non-null pointers from libwg-go are NUL-terminated malloc'd strings
        let s = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { libc::free(ptr.cast()) };
        Some(s)
    }

    /// libwg-go, linked at build time
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LibWg;

    impl WireGuardAbi for LibWg {
        fn turn_on(&self, ifname: &str, tun_fd: RawFd, settings: &str) -> i32 {
            let (Ok(ifname), Ok(settings)) = (CString::new(ifname), CString::new(settings)) else {
                error!("Interface name or settings contain NUL");
                return -1;
            };
            let Some(fd) = handoff_fd(tun_fd) else {
                return -1;
            };
            let handle = unsafe { wgTurnOn(ifname.as_ptr(), fd, settings.as_ptr()) };
            if handle < 0 {
                close_handoff(fd);
            }
            handle
        }

        fn turn_off(&self, handle: i32) {
            unsafe { wgTurnOff(handle) }
        }

        fn runtime_config(&self, handle: i32) -> Option<String> {
            take_string(unsafe { wgGetConfig(handle) })
        }

        fn socket_v4(&self, handle: i32) -> i32 {
            unsafe { wgGetSocketV4(handle) }
        }

        fn socket_v6(&self, handle: i32) -> i32 {
            unsafe { wgGetSocketV6(handle) }
        }

        fn version(&self) -> String {
            take_string(unsafe { wgVersion() }).unwrap_or_else(|| "unknown".to_string())
        }
    }
}
