//! Virtual interface request
//!
//! [`InterfaceBuilder`] collects addresses, routes, DNS and the other
//! interface properties, then asks the host to establish the interface.

use crate::config::{HttpProxy, TunnelConfig};
use crate::host::{TunDescriptor, VpnHost};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::{debug, warn};

/// Brands whose routing ignores DNS-only configuration. Each DNS server
/// also gets a host route so DNS traffic enters the tunnel.
pub const DNS_HOST_ROUTE_BRANDS: &[&str] = &["samsung"];

/// IP family the interface accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// Pending interface request, handed to [`VpnHost::establish`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceRequest {
    pub mtu: Option<u16>,
    pub addresses: Vec<(IpAddr, u8)>,
    pub routes: Vec<(IpAddr, u8)>,
    pub dns_servers: Vec<IpAddr>,
    pub search_domains: Vec<String>,
    pub disallowed_applications: BTreeSet<String>,
    pub http_proxy: Option<HttpProxy>,
    pub session_name: Option<String>,
    pub families: BTreeSet<AddressFamily>,
    pub metered: Option<bool>,
    pub blocking: bool,
}

impl InterfaceRequest {
    /// Is `ip/prefix` among the requested routes?
    pub fn has_route(&self, ip: IpAddr, prefix: u8) -> bool {
        self.routes.contains(&(ip, prefix))
    }
}

/// Table of device brands needing DNS host routes
#[derive(Debug, Clone)]
pub struct DnsRouteQuirks {
    brands: Vec<String>,
}

impl DnsRouteQuirks {
    /// Table from brand names; matching ignores case
    pub fn new<I, S>(brands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            brands: brands
                .into_iter()
                .map(|b| b.as_ref().trim().to_lowercase())
                .collect(),
        }
    }

    /// Does `brand` need DNS host routes?
    pub fn applies_to(&self, brand: &str) -> bool {
        let brand = brand.trim().to_lowercase();
        self.brands.iter().any(|b| *b == brand)
    }
}

impl Default for DnsRouteQuirks {
    fn default() -> Self {
        Self::new(DNS_HOST_ROUTE_BRANDS)
    }
}

/// Builder for an [`InterfaceRequest`]
#[derive(Debug, Clone, Default)]
pub struct InterfaceBuilder {
    request: InterfaceRequest,
    dns_host_routes: bool,
}

impl InterfaceBuilder {
    /// Builder for a device of `brand`
    pub fn new(quirks: &DnsRouteQuirks, brand: &str) -> Self {
        Self {
            request: InterfaceRequest::default(),
            dns_host_routes: quirks.applies_to(brand),
        }
    }

    /// Fill a request from a resolved configuration.
    ///
    /// Routes come from every peer's allowed IPs (WireGuard) or the
    /// configured routes (OpenVPN). Both families are allowed, the interface
    /// is unmetered and blocking.
    pub fn from_config(config: &TunnelConfig, quirks: &DnsRouteQuirks, brand: &str) -> Self {
        let iface = &config.interface;
        let mut builder = Self::new(quirks, brand);

        for app in &iface.excluded_applications {
            builder.add_disallowed_application(app);
        }
        for addr in &iface.addresses {
            builder.add_address(addr.ip(), addr.prefix());
        }
        for dns in &iface.dns_servers {
            builder.add_dns_server(*dns);
        }
        for domain in &iface.search_domains {
            builder.add_search_domain(domain);
        }
        for route in config.routes() {
            builder.add_route(route.ip(), route.prefix());
        }
        if let Some(proxy) = &iface.http_proxy {
            builder.set_http_proxy(&proxy.host, proxy.port);
        }

        builder
            .allow_family(AddressFamily::V4)
            .allow_family(AddressFamily::V6)
            .set_mtu(iface.mtu)
            .set_metered(false)
            .set_blocking(true)
            .set_session_name(&iface.session_name);
        builder
    }

    /// Interface MTU
    pub fn set_mtu(&mut self, mtu: u16) -> &mut Self {
        self.request.mtu = Some(mtu);
        self
    }

    /// Assign `ip/prefix` to the interface
    pub fn add_address(&mut self, ip: IpAddr, prefix: u8) -> &mut Self {
        debug!("addAddress({}, {})", ip, prefix);
        self.request.addresses.push((ip, prefix));
        self
    }

    /// Route `ip/prefix` into the interface. Duplicates are dropped.
    pub fn add_route(&mut self, ip: IpAddr, prefix: u8) -> &mut Self {
        debug!("addRoute({}, {})", ip, prefix);
        if !self.request.has_route(ip, prefix) {
            self.request.routes.push((ip, prefix));
        }
        self
    }

    /// Add a DNS server, plus a host route on quirky devices
    pub fn add_dns_server(&mut self, ip: IpAddr) -> &mut Self {
        debug!("addDnsServer({})", ip);
        self.request.dns_servers.push(ip);
        if self.dns_host_routes {
            let host_prefix = if ip.is_ipv4() { 32 } else { 128 };
            self.add_route(ip, host_prefix);
        }
        self
    }

    /// DNS search domain
    pub fn add_search_domain(&mut self, domain: &str) -> &mut Self {
        self.request.search_domains.push(domain.to_string());
        self
    }

    /// Exclude an application from the tunnel
    pub fn add_disallowed_application(&mut self, app: &str) -> &mut Self {
        self.request.disallowed_applications.insert(app.to_string());
        self
    }

    /// HTTP proxy advertised to applications
    pub fn set_http_proxy(&mut self, host: &str, port: u16) -> &mut Self {
        self.request.http_proxy = Some(HttpProxy {
            host: host.to_string(),
            port,
        });
        self
    }

    /// Name the host shows for the session
    pub fn set_session_name(&mut self, name: &str) -> &mut Self {
        self.request.session_name = Some(name.to_string());
        self
    }

    /// Accept traffic of `family` even without a matching address
    pub fn allow_family(&mut self, family: AddressFamily) -> &mut Self {
        self.request.families.insert(family);
        self
    }

    /// Whether the interface counts as metered
    pub fn set_metered(&mut self, metered: bool) -> &mut Self {
        self.request.metered = Some(metered);
        self
    }

    /// Blocking or non-blocking descriptor
    pub fn set_blocking(&mut self, blocking: bool) -> &mut Self {
        self.request.blocking = blocking;
        self
    }

    /// Request as built so far
    pub fn request(&self) -> &InterfaceRequest {
        &self.request
    }

    /// Ask the host to create the interface.
    ///
    /// `None` means the host refused, e.g. permission was revoked while the
    /// request was being built.
    pub fn establish(self, host: &dyn VpnHost) -> Option<TunDescriptor> {
        let tun = host.establish(&self.request);
        if tun.is_none() {
            warn!("Host refused to establish the interface");
        }
        tun
    }
}
