//! Host platform boundary
//!
//! Everything the controller needs from the operating system's VPN service:
//! the permission query, interface establishment and socket protection.
//!
//! # Socket protection
//!
//! Once the tunnel is up every outbound socket is routed through it,
//! including the engine's own UDP socket to the server. Those sockets must be
//! exempted with [`VpnHost::protect`] or the engine's traffic loops back into
//! the tunnel.

use crate::builder::InterfaceRequest;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Descriptor of an established virtual interface.
///
/// Closed when dropped. An optional close hook runs right after the
/// descriptor is released, so hosts can track the interface's lifetime.
pub struct TunDescriptor {
    fd: Option<OwnedFd>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl TunDescriptor {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd), on_close: None }
    }

    /// Run `hook` once the descriptor has been closed
    pub fn with_close_hook(fd: OwnedFd, hook: impl FnOnce() + Send + 'static) -> Self {
        Self {
            fd: Some(fd),
            on_close: Some(Box::new(hook)),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}

impl Drop for TunDescriptor {
    fn drop(&mut self) {
        drop(self.fd.take());
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl fmt::Debug for TunDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TunDescriptor").field(&self.raw_fd()).finish()
    }
}

/// Host VPN service
pub trait VpnHost: Send + Sync {
    /// Is VPN permission currently granted?
    fn has_permission(&self) -> bool;

    /// Ask the host to prompt the user. Must not block.
    fn request_permission(&self);

    /// Materialise the interface; `None` if the host refuses.
    fn establish(&self, request: &InterfaceRequest) -> Option<TunDescriptor>;

    /// Exempt a socket from routing through the interface.
    fn protect(&self, fd: RawFd) -> io::Result<()>;

    /// Device brand, matched against the DNS route quirk table
    fn device_brand(&self) -> String;

    /// The tunnel came up; hosts typically show a persistent notification
    fn enter_foreground(&self) {}

    /// The tunnel went down
    fn leave_foreground(&self) {}
}
