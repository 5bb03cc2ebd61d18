//! avpn tunnel - VPN tunnel lifecycle controller
//!
//! Brings a single system VPN tunnel up and down on behalf of a host VPN
//! service. The tunnel is run by one of two protocol engines, WireGuard
//! (libwg-go) or OpenVPN.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      TunnelController                      │
//! │                                                            │
//! │  TunnelRequest ──▶ codec ──▶ TunnelConfig                  │
//! │                                   │                        │
//! │                                   ▼                        │
//! │  VpnHost ◀── InterfaceBuilder ◀───┤                        │
//! │     │                             ▼                        │
//! │     └── TunDescriptor ───▶ ProtocolEngine ──▶ TunnelHandle │
//! │                            (WireGuard | OpenVPN)           │
//! │                                                            │
//! │  ConfigStore ◀── last good TunnelRequest                   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **WireGuard INI codec**: parse, validate and re-serialize `[Interface]`
//!   / `[Peer]` configuration text
//! - **Protocol switching**: the running tunnel is stopped before the next
//!   one starts, whichever protocol either uses
//! - **Revocation safety**: permission revoked mid-setup never leaves a
//!   half-built tunnel behind
//! - **Restore**: the last good request is persisted and brought back when
//!   the host relaunches the service
//!
//! # Native binding
//!
//! The `native` feature links libwg-go and exposes [`LibWg`].

mod async_controller;
mod builder;
mod codec;
mod config;
mod controller;
mod engine;
mod host;
mod keys;
mod native;
mod request;
mod settings;
mod store;

#[cfg(test)]
mod testutil;

pub use async_controller::AsyncTunnelController;
pub use builder::{
    AddressFamily, DNS_HOST_ROUTE_BRANDS, DnsRouteQuirks, InterfaceBuilder, InterfaceRequest,
};
pub use codec::{ParseError, Section, Sections, build_config, decode, lookup, parse, serialize};
pub use config::{
    BackendConfig, DEFAULT_MTU, DEFAULT_SESSION_NAME, Endpoint, HttpProxy, InterfaceSettings,
    Peer, Protocol, TunnelConfig, default_route,
};
pub use controller::{
    EngineSet, LaunchReason, RestoreOutcome, TunnelController, TunnelError, TunnelState,
    TunnelStatus,
};
pub use engine::{
    EngineError, OpenVpnEngine, ProtocolEngine, TunnelHandle, WireGuardEngine, WorkerExit,
};
pub use host::{TunDescriptor, VpnHost};
pub use keys::{KeyError, PresharedKey, PrivateKey, PublicKey};
#[cfg(feature = "native")]
pub use native::LibWg;
pub use native::{OpenVpnClient, StopSignal, WireGuardAbi};
pub use request::{OpenVpnData, TunnelRequest, WireGuardData};
pub use settings::{Settings, SettingsError};
pub use store::{ConfigStore, FileStore, LAST_CONFIG_KEY, MemoryStore, PreferenceStore, StoreError};
