//! Tunnel request payload
//!
//! The JSON object a caller hands to the controller, tagged by protocol:
//!
//! ```json
//! {
//!   "protocol": "wireguard",
//!   "wireguard_config_data": { "config": "[Interface]\n..." },
//!   "excluded_apps": ["com.example.bank"]
//! }
//! ```
//!
//! The same payload is what gets persisted as the last good configuration.

use crate::codec::{self, ParseError};
use crate::config::{
    BackendConfig, HttpProxy, InterfaceSettings, Protocol, TunnelConfig, default_route,
};
use crate::settings::Settings;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// WireGuard parameters: the configuration text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardData {
    pub config: String,
}

/// OpenVPN parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVpnData {
    /// OpenVPN profile, passed through to the engine
    pub config: String,
    #[serde(default)]
    pub addresses: Vec<IpNetwork>,
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    /// Routed networks; empty means full tunnel
    #[serde(default)]
    pub routes: Vec<IpNetwork>,
    #[serde(default)]
    pub search_domains: Vec<String>,
}

impl OpenVpnData {
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            addresses: Vec::new(),
            dns: Vec::new(),
            routes: Vec::new(),
            search_domains: Vec::new(),
        }
    }
}

/// Inbound tunnel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wireguard_config_data: Option<WireGuardData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openvpn_config_data: Option<OpenVpnData>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_apps: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<HttpProxy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    /// Overrides the MTU from the configuration text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u16>,
}

impl TunnelRequest {
    /// WireGuard request from configuration text
    pub fn wireguard(config: impl Into<String>) -> Self {
        Self {
            wireguard_config_data: Some(WireGuardData {
                config: config.into(),
            }),
            ..Self::empty(Protocol::WireGuard)
        }
    }

    /// OpenVPN request
    pub fn openvpn(data: OpenVpnData) -> Self {
        Self {
            openvpn_config_data: Some(data),
            ..Self::empty(Protocol::OpenVpn)
        }
    }

    fn empty(protocol: Protocol) -> Self {
        Self {
            protocol,
            wireguard_config_data: None,
            openvpn_config_data: None,
            excluded_apps: BTreeSet::new(),
            http_proxy: None,
            session_name: None,
            mtu: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        serde_json::from_str(json).map_err(|e| ParseError::Payload(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Resolve into a structured configuration.
    ///
    /// WireGuard text is decoded here, so a malformed request fails before
    /// anything is applied.
    pub fn resolve(&self, settings: &Settings) -> Result<TunnelConfig, ParseError> {
        let mut config = match self.protocol {
            Protocol::WireGuard => {
                let data = self.wireguard_config_data.as_ref().ok_or_else(|| {
                    ParseError::Payload("missing wireguard_config_data".to_string())
                })?;
                codec::decode(&data.config)?
            }
            Protocol::OpenVpn => {
                let data = self.openvpn_config_data.as_ref().ok_or_else(|| {
                    ParseError::Payload("missing openvpn_config_data".to_string())
                })?;
                let routes = if data.routes.is_empty() {
                    vec![default_route()]
                } else {
                    data.routes.clone()
                };
                TunnelConfig {
                    interface: InterfaceSettings {
                        addresses: data.addresses.clone(),
                        dns_servers: data.dns.clone(),
                        search_domains: data.search_domains.clone(),
                        ..InterfaceSettings::default()
                    },
                    backend: BackendConfig::OpenVpn {
                        profile: data.config.clone(),
                        routes,
                    },
                }
            }
        };

        let iface = &mut config.interface;
        if let Some(mtu) = self.mtu {
            iface.mtu = mtu;
        }
        iface.excluded_applications = self.excluded_apps.clone();
        iface.http_proxy = self.http_proxy.clone();
        iface.session_name = self
            .session_name
            .clone()
            .unwrap_or_else(|| settings.session_name.clone());

        Ok(config)
    }
}
