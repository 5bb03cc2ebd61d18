//! Protocol engines
//!
//! A [`ProtocolEngine`] takes a resolved configuration plus the interface
//! descriptor and runs the tunnel until stopped. Engines are addressed through
//! an opaque [`TunnelHandle`]; `-1` means no tunnel.

mod openvpn;
mod wireguard;

pub use openvpn::{OpenVpnEngine, WorkerExit};
pub use wireguard::WireGuardEngine;

use crate::config::{Protocol, TunnelConfig};
use crate::host::TunDescriptor;
use std::fmt;
use std::os::fd::RawFd;

/// Opaque engine tunnel handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelHandle(i32);

impl TunnelHandle {
    /// No tunnel
    pub const NONE: TunnelHandle = TunnelHandle(-1);

    pub fn new(raw: i32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    /// Non-negative handles refer to a running tunnel
    pub fn is_active(&self) -> bool {
        self.0 >= 0
    }
}

impl Default for TunnelHandle {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Engine rejected the configuration (code {0})")]
    Rejected(i32),

    #[error("Failed to spawn engine worker: {0}")]
    Spawn(String),

    #[error("Engine cannot run a {0} configuration")]
    UnsupportedConfig(Protocol),

    #[error("Engine worker panicked: {0}")]
    WorkerPanicked(String),
}

/// A VPN protocol implementation
pub trait ProtocolEngine: Send {
    fn protocol(&self) -> Protocol;

    fn version(&self) -> String;

    /// Start a tunnel over `tun`.
    ///
    /// The engine consumes the descriptor; it is released once the engine is
    /// done with it, also on failure.
    fn start(&mut self, config: &TunnelConfig, tun: TunDescriptor)
        -> Result<TunnelHandle, EngineError>;

    /// Stop a tunnel. Stopping [`TunnelHandle::NONE`] is a no-op.
    fn stop(&mut self, handle: TunnelHandle) -> Result<(), EngineError>;

    /// Read a runtime statistic such as `rx_bytes`
    fn query_stat(&self, _handle: TunnelHandle, _key: &str) -> Option<String> {
        None
    }

    /// Engine sockets that must bypass the interface
    fn protected_sockets(&self, _handle: TunnelHandle) -> Vec<RawFd> {
        Vec::new()
    }

    /// Is the tunnel still running?
    fn is_alive(&self, handle: TunnelHandle) -> bool {
        handle.is_active()
    }
}
