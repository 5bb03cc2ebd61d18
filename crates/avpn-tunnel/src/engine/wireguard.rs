//! WireGuard engine over the libwg-go ABI

use super::{EngineError, ProtocolEngine, TunnelHandle};
use crate::codec;
use crate::config::{Protocol, TunnelConfig};
use crate::host::TunDescriptor;
use crate::native::WireGuardAbi;
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct WireGuardEngine {
    abi: Arc<dyn WireGuardAbi>,
}

impl WireGuardEngine {
    pub fn new(abi: Arc<dyn WireGuardAbi>) -> Self {
        Self { abi }
    }
}

impl ProtocolEngine for WireGuardEngine {
    fn protocol(&self) -> Protocol {
        Protocol::WireGuard
    }

    fn version(&self) -> String {
        self.abi.version()
    }

    fn start(
        &mut self,
        config: &TunnelConfig,
        tun: TunDescriptor,
    ) -> Result<TunnelHandle, EngineError> {
        let settings = codec::serialize(config)
            .ok_or(EngineError::UnsupportedConfig(config.protocol()))?;

        let raw = self
            .abi
            .turn_on(&config.interface.session_name, tun.raw_fd(), &settings);
        // The ABI keeps its own duplicate; ours is released either way
        drop(tun);

        if raw < 0 {
            warn!("wgTurnOn failed with code {}", raw);
            return Err(EngineError::Rejected(raw));
        }

        info!("WireGuard tunnel {} up on {}", raw, config.interface.session_name);
        Ok(TunnelHandle::new(raw))
    }

    fn stop(&mut self, handle: TunnelHandle) -> Result<(), EngineError> {
        if !handle.is_active() {
            return Ok(());
        }
        debug!("wgTurnOff({})", handle);
        self.abi.turn_off(handle.raw());
        Ok(())
    }

    fn query_stat(&self, handle: TunnelHandle, key: &str) -> Option<String> {
        if !handle.is_active() {
            return None;
        }
        let dump = self.abi.runtime_config(handle.raw())?;
        codec::lookup(&dump, key)
    }

    fn protected_sockets(&self, handle: TunnelHandle) -> Vec<RawFd> {
        if !handle.is_active() {
            return Vec::new();
        }
        [self.abi.socket_v4(handle.raw()), self.abi.socket_v6(handle.raw())]
            .into_iter()
            .filter(|fd| *fd >= 0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{OpenVpnData, TunnelRequest};
    use crate::settings::Settings;
    use crate::testutil::{FakeWireGuardAbi, WG_CONFIG, test_descriptor};

    fn config() -> TunnelConfig {
        TunnelRequest::wireguard(WG_CONFIG)
            .resolve(&Settings::default())
            .unwrap()
    }

    #[test]
    fn test_start_passes_serialized_settings() {
        let abi = Arc::new(FakeWireGuardAbi::new());
        let mut engine = WireGuardEngine::new(abi.clone());
        let (tun, released) = test_descriptor();

        let handle = engine.start(&config(), tun).unwrap();

        assert!(handle.is_active());
        assert!(released.is_set());
        let settings = abi.last_settings().unwrap();
        assert!(settings.contains("[Peer]"));
        assert!(settings.contains("MTU = 1280"));
        assert_eq!(abi.last_ifname().as_deref(), Some("avpn0"));
    }

    #[test]
    fn test_rejected_start_releases_descriptor() {
        let abi = Arc::new(FakeWireGuardAbi::rejecting(-22));
        let mut engine = WireGuardEngine::new(abi);
        let (tun, released) = test_descriptor();

        let err = engine.start(&config(), tun).unwrap_err();

        assert_eq!(err, EngineError::Rejected(-22));
        assert!(released.is_set());
    }

    #[test]
    fn test_openvpn_config_unsupported() {
        let mut engine = WireGuardEngine::new(Arc::new(FakeWireGuardAbi::new()));
        let config = TunnelRequest::openvpn(OpenVpnData::new("client\n"))
            .resolve(&Settings::default())
            .unwrap();
        let (tun, released) = test_descriptor();

        assert_eq!(
            engine.start(&config, tun).unwrap_err(),
            EngineError::UnsupportedConfig(Protocol::OpenVpn)
        );
        assert!(released.is_set());
    }

    #[test]
    fn test_stop_sentinel_is_noop() {
        let abi = Arc::new(FakeWireGuardAbi::new());
        let mut engine = WireGuardEngine::new(abi.clone());

        engine.stop(TunnelHandle::NONE).unwrap();
        assert!(abi.events().is_empty());
    }

    #[test]
    fn test_stats_and_sockets() {
        let abi = Arc::new(FakeWireGuardAbi::new());
        abi.set_runtime_config("private_key=00\nrx_bytes=4096\ntx_bytes=1024\n");
        abi.set_sockets(17, -1);
        let mut engine = WireGuardEngine::new(abi);
        let (tun, _released) = test_descriptor();
        let handle = engine.start(&config(), tun).unwrap();

        assert_eq!(engine.query_stat(handle, "rx_bytes").as_deref(), Some("4096"));
        assert_eq!(engine.query_stat(handle, "missing"), None);
        assert_eq!(engine.protected_sockets(handle), vec![17]);
        assert_eq!(engine.query_stat(TunnelHandle::NONE, "rx_bytes"), None);
    }
}
