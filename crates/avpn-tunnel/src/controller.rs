//! Tunnel Controller
//!
//! Owns the lifecycle of the single active tunnel: permission check, interface
//! establishment, engine start/stop, socket protection and persistence of the
//! last good configuration.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = TunnelController::with_backends(
//!     Settings::default(),
//!     host,
//!     ConfigStore::new(FileStore::new("/data/avpn")),
//!     Arc::new(LibWg),
//!     openvpn_client,
//! );
//!
//! controller.turn_on(TunnelRequest::from_json(&payload)?)?;
//! println!("{:?}", controller.status());
//! controller.turn_off()?;
//! ```
//!
//! # Revocation
//!
//! The host may revoke VPN permission at any moment, including while
//! [`TunnelController::turn_on`] is waiting on the host. Revocations bump a
//! generation counter without taking the state lock; `turn_on` checks it after
//! each blocking step and backs out if it moved.

use crate::builder::{DnsRouteQuirks, InterfaceBuilder};
use crate::codec::ParseError;
use crate::config::{Protocol, TunnelConfig};
use crate::engine::{EngineError, OpenVpnEngine, ProtocolEngine, TunnelHandle, WireGuardEngine};
use crate::host::VpnHost;
use crate::native::{OpenVpnClient, WireGuardAbi};
use crate::request::TunnelRequest;
use crate::settings::Settings;
use crate::store::ConfigStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Tunnel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelState {
    Down,
    Up,
}

/// Snapshot of the tunnel for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub protocol: Option<Protocol>,
    pub connected_since: Option<SystemTime>,
    pub duration: Option<Duration>,
    pub rx_bytes: Option<u64>,
    pub tx_bytes: Option<u64>,
    pub endpoint: Option<String>,
    pub device_address: Option<String>,
}

impl TunnelStatus {
    fn down() -> Self {
        Self {
            state: TunnelState::Down,
            protocol: None,
            connected_since: None,
            duration: None,
            rx_bytes: None,
            tx_bytes: None,
            endpoint: None,
            device_address: None,
        }
    }
}

/// Why the host launched the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchReason {
    /// Started only to be bound; a request will follow
    StartOnly,
    /// Relaunched by the system, e.g. always-on VPN or a restart
    AlwaysOn,
}

/// Result of [`TunnelController::restore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    NothingToRestore,
    AlreadyUp,
    Restored(TunnelHandle),
}

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("VPN permission not granted")]
    PermissionDenied,

    #[error("Invalid configuration: {0}")]
    Parse(#[from] ParseError),

    #[error("Host refused to establish the interface")]
    InterfaceEstablish,

    #[error("Engine failed to start: {0}")]
    EngineStart(EngineError),

    #[error("Engine failed to stop: {0}")]
    EngineStop(EngineError),
}

/// One engine per protocol
pub struct EngineSet {
    wireguard: Box<dyn ProtocolEngine>,
    openvpn: Box<dyn ProtocolEngine>,
}

impl EngineSet {
    pub fn new(
        wireguard: impl ProtocolEngine + 'static,
        openvpn: impl ProtocolEngine + 'static,
    ) -> Self {
        Self {
            wireguard: Box::new(wireguard),
            openvpn: Box::new(openvpn),
        }
    }

    fn get(&self, protocol: Protocol) -> &dyn ProtocolEngine {
        match protocol {
            Protocol::WireGuard => self.wireguard.as_ref(),
            Protocol::OpenVpn => self.openvpn.as_ref(),
        }
    }

    fn get_mut(&mut self, protocol: Protocol) -> &mut dyn ProtocolEngine {
        match protocol {
            Protocol::WireGuard => self.wireguard.as_mut(),
            Protocol::OpenVpn => self.openvpn.as_mut(),
        }
    }
}

struct Inner {
    state: TunnelState,
    handle: TunnelHandle,
    active: Option<Protocol>,
    connected_since: Option<SystemTime>,
    request: Option<TunnelRequest>,
    config: Option<TunnelConfig>,
    engines: EngineSet,
}

/// Tunnel lifecycle controller
pub struct TunnelController {
    host: Arc<dyn VpnHost>,
    store: ConfigStore,
    settings: Settings,
    quirks: DnsRouteQuirks,
    inner: Mutex<Inner>,
    revocations: AtomicU64,
}

impl TunnelController {
    /// Controller over prebuilt engines; starts down
    pub fn new(
        settings: Settings,
        host: Arc<dyn VpnHost>,
        store: ConfigStore,
        engines: EngineSet,
    ) -> Self {
        let quirks = DnsRouteQuirks::new(&settings.dns_route_brands);
        Self {
            host,
            store,
            settings,
            quirks,
            inner: Mutex::new(Inner {
                state: TunnelState::Down,
                handle: TunnelHandle::NONE,
                active: None,
                connected_since: None,
                request: None,
                config: None,
                engines,
            }),
            revocations: AtomicU64::new(0),
        }
    }

    /// Controller over the native WireGuard ABI and an OpenVPN client
    pub fn with_backends(
        settings: Settings,
        host: Arc<dyn VpnHost>,
        store: ConfigStore,
        wireguard: Arc<dyn WireGuardAbi>,
        openvpn: Arc<dyn OpenVpnClient>,
    ) -> Self {
        let wireguard = WireGuardEngine::new(wireguard);
        let openvpn = OpenVpnEngine::new(openvpn);
        info!(
            "Engines: wireguard {}, openvpn {}",
            wireguard.version(),
            openvpn.version()
        );
        Self::new(settings, host, store, EngineSet::new(wireguard, openvpn))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn revoked_since(&self, generation: u64) -> bool {
        self.revocations.load(Ordering::SeqCst) != generation
    }

    /// Settings the controller was built with
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Store holding the last good configuration
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Current state; a tunnel whose engine has died reads as down
    pub fn state(&self) -> TunnelState {
        let mut inner = self.lock();
        self.reap(&mut inner);
        inner.state
    }

    /// Handle of the running tunnel, [`TunnelHandle::NONE`] when down
    pub fn handle(&self) -> TunnelHandle {
        let mut inner = self.lock();
        self.reap(&mut inner);
        inner.handle
    }

    /// Last request that brought a tunnel up in this process
    pub fn current_request(&self) -> Option<TunnelRequest> {
        self.lock().request.clone()
    }

    /// Bring up a tunnel for `request`, replacing any running one.
    ///
    /// A running tunnel is fully stopped before the new one is resolved, so
    /// every failure leaves the controller down. On success the request is
    /// persisted as the last good configuration.
    pub fn turn_on(&self, request: TunnelRequest) -> Result<TunnelHandle, TunnelError> {
        // taken before the permission check so a revocation racing it is seen
        let generation = self.revocations.load(Ordering::SeqCst);
        if !self.host.has_permission() {
            warn!("VPN permission not granted, asking the host");
            self.host.request_permission();
            return Err(TunnelError::PermissionDenied);
        }

        let mut inner = self.lock();

        if inner.state == TunnelState::Up {
            info!("Replacing running tunnel with {}", request.protocol);
            if let Err(e) = self.shutdown(&mut inner) {
                warn!("Stopping previous tunnel: {}", e);
            }
        }

        let config = request.resolve(&self.settings)?;
        let protocol = config.protocol();

        let brand = self.host.device_brand();
        let builder = InterfaceBuilder::from_config(&config, &self.quirks, &brand);
        let Some(tun) = builder.establish(self.host.as_ref()) else {
            if self.revoked_since(generation) || !self.host.has_permission() {
                return Err(TunnelError::PermissionDenied);
            }
            return Err(TunnelError::InterfaceEstablish);
        };

        if self.revoked_since(generation) {
            warn!("Permission revoked while establishing the interface");
            return Err(TunnelError::PermissionDenied);
        }

        let handle = inner
            .engines
            .get_mut(protocol)
            .start(&config, tun)
            .map_err(|e| {
                error!("Failed to start {} engine: {}", protocol, e);
                TunnelError::EngineStart(e)
            })?;

        if self.revoked_since(generation) {
            warn!("Permission revoked while starting the engine");
            if let Err(e) = inner.engines.get_mut(protocol).stop(handle) {
                warn!("Stopping revoked tunnel: {}", e);
            }
            return Err(TunnelError::PermissionDenied);
        }

        for fd in inner.engines.get(protocol).protected_sockets(handle) {
            if let Err(e) = self.host.protect(fd) {
                warn!("Failed to protect socket {}: {}", fd, e);
            }
        }

        inner.state = TunnelState::Up;
        inner.handle = handle;
        inner.active = Some(protocol);
        inner.connected_since = Some(SystemTime::now());
        inner.config = Some(config);
        inner.request = Some(request);
        self.host.enter_foreground();

        if let Some(request) = &inner.request {
            if let Err(e) = self.store.save(request) {
                warn!("Failed to persist configuration: {}", e);
            }
        }

        info!("{} tunnel up (handle {})", protocol, handle);
        Ok(handle)
    }

    /// Stop the running tunnel. Always ends in [`TunnelState::Down`]; calling
    /// it with nothing running is a no-op.
    pub fn turn_off(&self) -> Result<(), TunnelError> {
        let mut inner = self.lock();
        if inner.state == TunnelState::Down {
            debug!("Tunnel already down");
            return Ok(());
        }

        let result = self.shutdown(&mut inner);
        info!("Tunnel down");
        result.map_err(TunnelError::EngineStop)
    }

    /// Record a permission revocation without waiting for the state lock
    pub fn note_revocation(&self) {
        self.revocations.fetch_add(1, Ordering::SeqCst);
    }

    /// Host revoked VPN permission
    pub fn on_revoke(&self) {
        warn!("VPN permission revoked");
        self.note_revocation();
        if let Err(e) = self.turn_off() {
            warn!("Tearing down after revocation: {}", e);
        }
    }

    /// Current status. A tunnel whose engine has died is torn down first.
    pub fn status(&self) -> TunnelStatus {
        let mut inner = self.lock();
        self.reap(&mut inner);

        let (Some(protocol), Some(config)) = (inner.active, inner.config.as_ref()) else {
            return TunnelStatus::down();
        };
        let engine = inner.engines.get(protocol);
        let stat = |key: &str| engine.query_stat(inner.handle, key);

        TunnelStatus {
            state: inner.state,
            protocol: Some(protocol),
            connected_since: inner.connected_since,
            duration: inner
                .connected_since
                .and_then(|since| SystemTime::now().duration_since(since).ok()),
            rx_bytes: stat("rx_bytes").and_then(|v| v.parse().ok()),
            tx_bytes: stat("tx_bytes").and_then(|v| v.parse().ok()),
            endpoint: stat("endpoint")
                .or_else(|| config.peers().first().map(|peer| peer.endpoint.to_string())),
            device_address: config.interface.addresses.first().map(ToString::to_string),
        }
    }

    /// Host (re)launched the service.
    ///
    /// Brings the last good configuration back up unless the launch was only
    /// a bind or a tunnel is already running. The in-memory request wins over
    /// the persisted one.
    pub fn restore(&self, launch: LaunchReason) -> Result<RestoreOutcome, TunnelError> {
        if launch == LaunchReason::StartOnly {
            debug!("Start-only launch, waiting for a request");
            return Ok(RestoreOutcome::NothingToRestore);
        }

        let in_memory = {
            let inner = self.lock();
            if inner.state == TunnelState::Up {
                return Ok(RestoreOutcome::AlreadyUp);
            }
            inner.request.clone()
        };

        let stored = match in_memory {
            Some(request) => Ok(Some(request)),
            None => self.store.load(),
        };
        let request = match stored {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!("No saved configuration to restore");
                return Ok(RestoreOutcome::NothingToRestore);
            }
            Err(e) => {
                warn!("Saved configuration unusable: {}", e);
                return Ok(RestoreOutcome::NothingToRestore);
            }
        };

        info!("Restoring saved {} configuration", request.protocol);
        self.turn_on(request).map(RestoreOutcome::Restored)
    }

    /// Tear down a tunnel whose engine ended on its own
    fn reap(&self, inner: &mut Inner) {
        let Some(protocol) = inner.active else {
            return;
        };
        if inner.engines.get(protocol).is_alive(inner.handle) {
            return;
        }
        warn!("{} engine is no longer running", protocol);
        if let Err(e) = self.shutdown(inner) {
            warn!("Tearing down dead tunnel: {}", e);
        }
    }

    fn shutdown(&self, inner: &mut Inner) -> Result<(), EngineError> {
        let result = match inner.active.take() {
            Some(protocol) => inner.engines.get_mut(protocol).stop(inner.handle),
            None => Ok(()),
        };

        let was_up = inner.state == TunnelState::Up;
        inner.state = TunnelState::Down;
        inner.handle = TunnelHandle::NONE;
        inner.connected_since = None;
        inner.config = None;
        if was_up {
            self.host.leave_foreground();
        }
        result
    }
}
