//! Tunnel Configuration
//!
//! Structured form of a tunnel request once it has been resolved: the
//! interface settings shared by both protocols plus the backend-specific part.

use crate::keys::{PresharedKey, PrivateKey, PublicKey};
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

/// Interface MTU used when the configuration does not name one
pub const DEFAULT_MTU: u16 = 1280;

/// Session name shown by the host for the virtual interface
pub const DEFAULT_SESSION_NAME: &str = "avpn0";

/// The full-tunnel route, `0.0.0.0/0`
pub fn default_route() -> IpNetwork {
    IpNetwork::V4(Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).expect("/0 is a valid prefix"))
}

/// VPN protocol backing a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    WireGuard,
    OpenVpn,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::WireGuard => "wireguard",
            Protocol::OpenVpn => "openvpn",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Peer endpoint (host + port)
///
/// Hostnames are kept unresolved; the engine resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// IP literal or hostname, without IPv6 brackets
    pub host: String,
    /// UDP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Parse `host:port` or `[v6addr]:port`
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, port) = rest.split_once("]:")?;
            host.parse::<IpAddr>().ok()?;
            (host, port)
        } else {
            s.rsplit_once(':')?
        };

        if host.is_empty() || (host.contains(':') && !s.starts_with('[')) {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Self::new(host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// WireGuard peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Peer's public key
    pub public_key: PublicKey,
    /// Preshared key (optional)
    pub preshared_key: Option<PresharedKey>,
    /// Networks routed through this peer, never empty
    pub allowed_ips: Vec<IpNetwork>,
    /// Peer's endpoint
    pub endpoint: Endpoint,
    /// Persistent keepalive interval (seconds)
    pub persistent_keepalive: Option<u16>,
}

impl Peer {
    /// Create a full-tunnel peer
    pub fn new(public_key: PublicKey, endpoint: Endpoint) -> Self {
        Self {
            public_key,
            preshared_key: None,
            allowed_ips: vec![default_route()],
            endpoint,
            persistent_keepalive: None,
        }
    }
}

/// Host HTTP proxy advertised on the interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxy {
    pub host: String,
    pub port: u16,
}

/// Interface-level settings shared by both protocols
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSettings {
    /// Addresses assigned to the virtual interface
    pub addresses: Vec<IpNetwork>,
    /// DNS servers used inside the tunnel
    pub dns_servers: Vec<IpAddr>,
    /// Search domains pushed to the host resolver
    pub search_domains: Vec<String>,
    pub mtu: u16,
    /// Applications whose traffic bypasses the tunnel
    pub excluded_applications: BTreeSet<String>,
    pub http_proxy: Option<HttpProxy>,
    pub session_name: String,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            dns_servers: Vec::new(),
            search_domains: Vec::new(),
            mtu: DEFAULT_MTU,
            excluded_applications: BTreeSet::new(),
            http_proxy: None,
            session_name: DEFAULT_SESSION_NAME.to_string(),
        }
    }
}

/// Protocol-specific part of a tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    WireGuard {
        private_key: PrivateKey,
        /// Exactly one peer when built from configuration text
        peers: Vec<Peer>,
    },
    OpenVpn {
        /// Opaque OpenVPN profile handed to the engine untouched
        profile: String,
        /// Networks routed into the tunnel
        routes: Vec<IpNetwork>,
    },
}

/// Complete, resolved tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub interface: InterfaceSettings,
    pub backend: BackendConfig,
}

impl TunnelConfig {
    /// Protocol selected by the backend part
    pub fn protocol(&self) -> Protocol {
        match self.backend {
            BackendConfig::WireGuard { .. } => Protocol::WireGuard,
            BackendConfig::OpenVpn { .. } => Protocol::OpenVpn,
        }
    }

    /// WireGuard peers (empty for OpenVPN)
    pub fn peers(&self) -> &[Peer] {
        match &self.backend {
            BackendConfig::WireGuard { peers, .. } => peers,
            BackendConfig::OpenVpn { .. } => &[],
        }
    }

    /// Every network that must be routed into the interface
    pub fn routes(&self) -> Vec<IpNetwork> {
        match &self.backend {
            BackendConfig::WireGuard { peers, .. } => peers
                .iter()
                .flat_map(|peer| peer.allowed_ips.iter().copied())
                .collect(),
            BackendConfig::OpenVpn { routes, .. } => routes.clone(),
        }
    }
}
