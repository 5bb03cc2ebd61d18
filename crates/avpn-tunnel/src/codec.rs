//! WireGuard configuration text
//!
//! Reads and writes the `[Interface]` / `[Peer]` section format:
//!
//! ```text
//! [Interface]
//! PrivateKey = <base64>
//! Address = 10.8.0.2/32
//! DNS = 1.1.1.1, 1.0.0.1
//!
//! [Peer]
//! PublicKey = <base64>
//! AllowedIPs = 0.0.0.0/0
//! Endpoint = vpn.example.org:51820
//! ```
//!
//! # Single peer
//!
//! Only one section of each name is kept. A repeated key overwrites the
//! earlier value and a repeated section replaces the earlier section as a
//! whole; the two are never merged. Configurations with several `[Peer]`
//! sections therefore end up with the last peer only.

use crate::config::{
    BackendConfig, DEFAULT_MTU, Endpoint, InterfaceSettings, Peer, TunnelConfig, default_route,
};
use crate::keys::{KeyError, PresharedKey, PrivateKey, PublicKey};
use ini::{Ini, ParseOption};
use ipnetwork::IpNetwork;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::warn;

/// Key/value pairs of one section
pub type Section = BTreeMap<String, String>;

/// Sections of a parsed configuration, by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    sections: BTreeMap<String, Section>,
}

impl Sections {
    /// Get a section by name
    pub fn get(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Section names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    fn insert(&mut self, name: &str, entries: Section) {
        if self.sections.insert(name.to_string(), entries).is_some() {
            warn!(
                "Repeated [{}] section replaces the previous one (only one is supported)",
                name
            );
        }
    }
}

/// Configuration text errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{0} set before any section header")]
    KeyOutsideSection(String),

    #[error("malformed line near {0:?}")]
    MalformedLine(String),

    #[error("missing [{0}] section")]
    MissingSection(&'static str),

    #[error("missing {key} in [{section}]")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    #[error("invalid {field}: {source}")]
    InvalidKey {
        field: &'static str,
        source: KeyError,
    },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("invalid tunnel request: {0}")]
    Payload(String),
}

/// Split configuration text into named sections.
///
/// `#` and `;` start comment lines. Values are taken verbatim: no quote or
/// escape processing, so base64 padding and hostnames pass through.
pub fn parse(text: &str) -> Result<Sections, ParseError> {
    let option = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(text, option).map_err(|e| ParseError::Syntax {
        line: e.line,
        message: e.msg.to_string(),
    })?;

    let mut sections = Sections::default();
    for (name, props) in ini.iter() {
        let Some(name) = name else {
            if let Some((key, _)) = props.iter().next() {
                return Err(ParseError::KeyOutsideSection(key.to_string()));
            }
            continue;
        };
        if name.contains('\n') {
            return Err(ParseError::MalformedLine(name.to_string()));
        }

        let mut entries = Section::new();
        for (key, value) in props.iter() {
            // a line without `=` runs into the next key
            if key.contains('\n') {
                return Err(ParseError::MalformedLine(key.to_string()));
            }
            entries.insert(key.to_string(), value.trim().to_string());
        }
        sections.insert(name, entries);
    }
    Ok(sections)
}

/// Build a WireGuard tunnel configuration from parsed sections.
///
/// Requires `[Interface]` with `PrivateKey`, `Address`, `DNS` and `[Peer]`
/// with `PublicKey`, `Endpoint`. Missing or empty `AllowedIPs` means full
/// tunnel.
pub fn build_config(sections: &Sections) -> Result<TunnelConfig, ParseError> {
    let iface = sections
        .get("Interface")
        .ok_or(ParseError::MissingSection("Interface"))?;
    let peer = sections
        .get("Peer")
        .ok_or(ParseError::MissingSection("Peer"))?;

    let private_key = PrivateKey::from_base64(required(iface, "Interface", "PrivateKey")?)
        .map_err(|source| ParseError::InvalidKey {
            field: "PrivateKey",
            source,
        })?;
    let addresses = required_list(iface, "Interface", "Address", parse_network)?;
    let dns_servers = required_list(iface, "Interface", "DNS", |s| {
        parse_network(s).map(|net| net.ip())
    })?;
    let mtu = iface
        .get("MTU")
        .map(|s| parse_number("MTU", s))
        .transpose()?
        .unwrap_or(DEFAULT_MTU);

    let interface = InterfaceSettings {
        addresses,
        dns_servers,
        mtu,
        ..InterfaceSettings::default()
    };

    Ok(TunnelConfig {
        interface,
        backend: BackendConfig::WireGuard {
            private_key,
            peers: vec![build_peer(peer)?],
        },
    })
}

/// Parse and build in one step.
pub fn decode(text: &str) -> Result<TunnelConfig, ParseError> {
    build_config(&parse(text)?)
}

fn build_peer(section: &Section) -> Result<Peer, ParseError> {
    let public_key = PublicKey::from_base64(required(section, "Peer", "PublicKey")?)
        .map_err(|source| ParseError::InvalidKey {
            field: "PublicKey",
            source,
        })?;

    let preshared_key = section
        .get("PresharedKey")
        .map(|s| PresharedKey::from_base64(s))
        .transpose()
        .map_err(|source| ParseError::InvalidKey {
            field: "PresharedKey",
            source,
        })?;

    let mut allowed_ips = section
        .get("AllowedIPs")
        .map(|s| parse_list(s, parse_network))
        .transpose()?
        .unwrap_or_default();
    if allowed_ips.is_empty() {
        allowed_ips.push(default_route());
    }

    let endpoint = required(section, "Peer", "Endpoint")?;
    let endpoint =
        Endpoint::parse(endpoint).ok_or_else(|| ParseError::InvalidEndpoint(endpoint.to_string()))?;

    let persistent_keepalive = section
        .get("PersistentKeepalive")
        .map(|s| parse_number("PersistentKeepalive", s))
        .transpose()?;

    Ok(Peer {
        public_key,
        preshared_key,
        allowed_ips,
        endpoint,
        persistent_keepalive,
    })
}

fn required<'a>(
    section: &'a Section,
    name: &'static str,
    key: &'static str,
) -> Result<&'a str, ParseError> {
    section
        .get(key)
        .map(String::as_str)
        .ok_or(ParseError::MissingKey { section: name, key })
}

/// Required list key; present but with no items counts as missing
fn required_list<T>(
    section: &Section,
    name: &'static str,
    key: &'static str,
    item: impl Fn(&str) -> Result<T, ParseError>,
) -> Result<Vec<T>, ParseError> {
    let items = parse_list(required(section, name, key)?, item)?;
    if items.is_empty() {
        return Err(ParseError::MissingKey { section: name, key });
    }
    Ok(items)
}

/// Comma-separated list; blank items are skipped
fn parse_list<T>(
    s: &str,
    item: impl Fn(&str) -> Result<T, ParseError>,
) -> Result<Vec<T>, ParseError> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(item)
        .collect()
}

/// CIDR, or a bare address taken as a host network
fn parse_network(s: &str) -> Result<IpNetwork, ParseError> {
    s.parse::<IpNetwork>()
        .map_err(|_| ParseError::InvalidAddress(s.to_string()))
}

fn parse_number(field: &'static str, s: &str) -> Result<u16, ParseError> {
    s.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: s.to_string(),
    })
}

fn join<T: ToString>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a WireGuard configuration as section text for the engine.
///
/// Returns `None` for OpenVPN configurations.
pub fn serialize(config: &TunnelConfig) -> Option<String> {
    let BackendConfig::WireGuard { private_key, peers } = &config.backend else {
        return None;
    };
    let iface = &config.interface;

    let mut lines = vec![
        "[Interface]".to_string(),
        format!("PrivateKey = {}", private_key.to_base64()),
        format!("Address = {}", join(&iface.addresses)),
        format!("DNS = {}", join(&iface.dns_servers)),
        format!("MTU = {}", iface.mtu),
    ];

    for peer in peers {
        lines.push(String::new());
        lines.push("[Peer]".to_string());
        lines.push(format!("PublicKey = {}", peer.public_key.to_base64()));
        if let Some(psk) = &peer.preshared_key {
            lines.push(format!("PresharedKey = {}", psk.to_base64()));
        }
        lines.push(format!("AllowedIPs = {}", join(&peer.allowed_ips)));
        lines.push(format!("Endpoint = {}", peer.endpoint));
        if let Some(keepalive) = peer.persistent_keepalive {
            lines.push(format!("PersistentKeepalive = {}", keepalive));
        }
    }

    lines.push(String::new());
    Some(lines.join("\n"))
}

/// Find `key` in an engine runtime dump, across all sections.
///
/// The first matching line wins. Dumps without section headers
/// (`rx_bytes=1234`) are accepted.
pub fn lookup(text: &str, key: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('['))
        .filter_map(|line| line.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIVATE: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
    const PUBLIC: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const PSK: &str = "FpCyhws9cxwWoV4xELtfJvjJN+zQVRPISllRWgeopVE=";

    fn sample() -> String {
        format!(
            "[Interface]\n\
             PrivateKey = {PRIVATE}\n\
             Address = 10.8.0.2/32\n\
             DNS = 1.1.1.1, 1.0.0.1\n\
             \n\
             [Peer]\n\
             PublicKey = {PUBLIC}\n\
             PresharedKey = {PSK}\n\
             AllowedIPs = 0.0.0.0/0, ::/0\n\
             Endpoint = 203.0.113.7:51820\n\
             PersistentKeepalive = 25\n"
        )
    }

    #[test]
    fn test_parse_sections() {
        let sections = parse(&sample()).unwrap();

        assert_eq!(sections.len(), 2);
        let peer = sections.get("Peer").unwrap();
        assert_eq!(peer.get("Endpoint").unwrap(), "203.0.113.7:51820");
        assert_eq!(peer.get("AllowedIPs").unwrap(), "0.0.0.0/0, ::/0");
    }

    #[test]
    fn test_value_split_on_first_equals() {
        let sections = parse(&format!("[Interface]\nPrivateKey = {PRIVATE}\n")).unwrap();
        // base64 padding survives
        assert_eq!(
            sections.get("Interface").unwrap().get("PrivateKey").unwrap(),
            PRIVATE
        );
    }

    #[test]
    fn test_key_before_section() {
        let err = parse("PrivateKey = abc\n[Interface]\n").unwrap_err();
        assert_eq!(err, ParseError::KeyOutsideSection("PrivateKey".to_string()));
    }

    #[test]
    fn test_line_without_equals() {
        let err = parse("[Interface]\nPrivateKey\nAddress = 10.0.0.2/32\n").unwrap_err();
        assert!(matches!(
            err,
            ParseError::MalformedLine(_) | ParseError::Syntax { .. }
        ));
    }

    #[test]
    fn test_line_without_equals_at_end() {
        let err = parse("[Interface]\nPrivateKey\n").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { .. }));
    }

    #[test]
    fn test_value_keeps_quotes() {
        let sections = parse("[Peer]\nEndpoint = \"vpn\":1\n").unwrap();
        assert_eq!(
            sections.get("Peer").unwrap().get("Endpoint").unwrap(),
            "\"vpn\":1"
        );
    }

    #[test]
    fn test_comments_skipped() {
        let sections = parse("# generated\n[Peer]\n# note\nEndpoint = a:1\n").unwrap();
        assert_eq!(sections.get("Peer").unwrap().len(), 1);
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let sections = parse("[Peer]\nEndpoint = a:1\nEndpoint = b:2\n").unwrap();
        assert_eq!(sections.get("Peer").unwrap().get("Endpoint").unwrap(), "b:2");
    }

    #[test]
    fn test_repeated_section_replaces() {
        let sections =
            parse("[Peer]\nEndpoint = a:1\nPublicKey = x\n[Peer]\nEndpoint = b:2\n").unwrap();

        let peer = sections.get("Peer").unwrap();
        assert_eq!(peer.get("Endpoint").unwrap(), "b:2");
        assert!(peer.get("PublicKey").is_none());
    }

    #[test]
    fn test_build_config() {
        let config = decode(&sample()).unwrap();

        assert_eq!(config.interface.addresses[0].to_string(), "10.8.0.2/32");
        assert_eq!(config.interface.dns_servers.len(), 2);
        assert_eq!(config.interface.mtu, DEFAULT_MTU);

        let peer = &config.peers()[0];
        assert_eq!(peer.public_key.to_base64(), PUBLIC);
        assert_eq!(peer.preshared_key.as_ref().unwrap().to_base64(), PSK);
        assert_eq!(peer.allowed_ips.len(), 2);
        assert_eq!(peer.endpoint, Endpoint::new("203.0.113.7", 51820));
        assert_eq!(peer.persistent_keepalive, Some(25));
    }

    #[test]
    fn test_allowed_ips_default_when_absent() {
        let text = sample().replace("AllowedIPs = 0.0.0.0/0, ::/0\n", "");
        let config = decode(&text).unwrap();

        assert_eq!(config.peers()[0].allowed_ips, vec![default_route()]);
    }

    #[test]
    fn test_allowed_ips_default_when_empty() {
        let text = sample().replace("AllowedIPs = 0.0.0.0/0, ::/0", "AllowedIPs =");
        let config = decode(&text).unwrap();

        assert_eq!(config.peers()[0].allowed_ips, vec![default_route()]);
    }

    #[test]
    fn test_missing_public_key() {
        let text = sample().replace(&format!("PublicKey = {PUBLIC}\n"), "");
        assert_eq!(
            decode(&text).unwrap_err(),
            ParseError::MissingKey {
                section: "Peer",
                key: "PublicKey"
            }
        );
    }

    #[test]
    fn test_missing_dns() {
        let text = sample().replace("DNS = 1.1.1.1, 1.0.0.1\n", "");
        assert!(matches!(
            decode(&text),
            Err(ParseError::MissingKey { key: "DNS", .. })
        ));
    }

    #[test]
    fn test_empty_address_rejected() {
        let text = sample().replace("Address = 10.8.0.2/32", "Address =");
        assert_eq!(
            decode(&text).unwrap_err(),
            ParseError::MissingKey {
                section: "Interface",
                key: "Address"
            }
        );
    }

    #[test]
    fn test_blank_dns_list_rejected() {
        let text = sample().replace("DNS = 1.1.1.1, 1.0.0.1", "DNS = ,");
        assert_eq!(
            decode(&text).unwrap_err(),
            ParseError::MissingKey {
                section: "Interface",
                key: "DNS"
            }
        );
    }

    #[test]
    fn test_missing_peer_section() {
        let text =
            format!("[Interface]\nPrivateKey = {PRIVATE}\nAddress = 10.0.0.2/32\nDNS = 1.1.1.1\n");
        assert_eq!(decode(&text).unwrap_err(), ParseError::MissingSection("Peer"));
    }

    #[test]
    fn test_bad_private_key() {
        let text = sample().replace(PRIVATE, "c2hvcnQ=");
        assert_eq!(
            decode(&text).unwrap_err(),
            ParseError::InvalidKey {
                field: "PrivateKey",
                source: KeyError::InvalidLength(5)
            }
        );
    }

    #[test]
    fn test_roundtrip() {
        let config = decode(&sample()).unwrap();
        let text = serialize(&config).unwrap();

        assert_eq!(decode(&text).unwrap(), config);
    }

    #[test]
    fn test_roundtrip_with_mtu_and_hostname() {
        let text = sample()
            .replace("DNS = 1.1.1.1, 1.0.0.1\n", "DNS = 10.0.0.1\nMTU = 1420\n")
            .replace("203.0.113.7:51820", "vpn.example.org:51820");
        let config = decode(&text).unwrap();
        assert_eq!(config.interface.mtu, 1420);

        let again = decode(&serialize(&config).unwrap()).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_lookup_runtime_dump() {
        let dump =
            "private_key=abcd\nlisten_port=0\npublic_key=ef01\nrx_bytes=2048\ntx_bytes=1024\n";

        assert_eq!(lookup(dump, "rx_bytes").as_deref(), Some("2048"));
        assert_eq!(lookup(dump, "tx_bytes").as_deref(), Some("1024"));
        assert!(lookup(dump, "endpoint").is_none());
    }

    #[test]
    fn test_lookup_across_sections() {
        let dump = "[Interface]\nListenPort = 1\n[Peer]\nEndpoint = 1.2.3.4:5\n";
        assert_eq!(lookup(dump, "Endpoint").as_deref(), Some("1.2.3.4:5"));
    }
}
