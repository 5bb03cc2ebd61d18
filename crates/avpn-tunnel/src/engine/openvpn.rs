//! OpenVPN engine
//!
//! The client loop blocks for the life of the session, so each session runs
//! on its own worker thread inside a panic isolation boundary. `start`
//! returns once the worker has taken the descriptor. Stopping drops the
//! worker's stop sender and joins the thread; by the time
//! [`ProtocolEngine::stop`] returns the descriptor has been released.

use super::{EngineError, ProtocolEngine, TunnelHandle};
use crate::config::{BackendConfig, Protocol, TunnelConfig};
use crate::host::TunDescriptor;
use crate::native::{OpenVpnClient, StopSignal};
use crossbeam_channel::{Sender, bounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// How a worker session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Client returned cleanly
    Stopped,
    /// Client reported an error
    Failed(String),
    /// Client panicked
    Panicked(String),
}

struct Worker {
    handle: TunnelHandle,
    stop_tx: Sender<()>,
    thread: JoinHandle<WorkerExit>,
}

pub struct OpenVpnEngine {
    client: Arc<dyn OpenVpnClient>,
    worker: Option<Worker>,
    sessions: i32,
    last_exit: Option<WorkerExit>,
}

impl OpenVpnEngine {
    pub fn new(client: Arc<dyn OpenVpnClient>) -> Self {
        Self {
            client,
            worker: None,
            sessions: 0,
            last_exit: None,
        }
    }

    /// Outcome of the most recently joined session
    pub fn last_exit(&self) -> Option<&WorkerExit> {
        self.last_exit.as_ref()
    }

    fn join_worker(&mut self, worker: Worker) -> Result<(), EngineError> {
        let Worker { handle, stop_tx, thread } = worker;
        drop(stop_tx);

        let exit = thread
            .join()
            .unwrap_or_else(|payload| WorkerExit::Panicked(panic_message(payload)));
        debug!("OpenVPN session {} joined: {:?}", handle, exit);

        let result = match &exit {
            WorkerExit::Panicked(msg) => Err(EngineError::WorkerPanicked(msg.clone())),
            _ => Ok(()),
        };
        self.last_exit = Some(exit);
        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn run_session(
    client: &dyn OpenVpnClient,
    handle: TunnelHandle,
    profile: &str,
    tun: TunDescriptor,
    stop: StopSignal,
) -> WorkerExit {
    let result = panic::catch_unwind(AssertUnwindSafe(|| client.connect(profile, &tun, &stop)));
    drop(tun);

    match result {
        Ok(Ok(())) => {
            info!("OpenVPN session {} ended", handle);
            WorkerExit::Stopped
        }
        Ok(Err(e)) => {
            warn!("OpenVPN session {} failed: {}", handle, e);
            WorkerExit::Failed(e)
        }
        Err(payload) => {
            let msg = panic_message(payload);
            error!("OpenVPN session {} panicked: {}", handle, msg);
            WorkerExit::Panicked(msg)
        }
    }
}

impl ProtocolEngine for OpenVpnEngine {
    fn protocol(&self) -> Protocol {
        Protocol::OpenVpn
    }

    fn version(&self) -> String {
        self.client.version()
    }

    fn start(
        &mut self,
        config: &TunnelConfig,
        tun: TunDescriptor,
    ) -> Result<TunnelHandle, EngineError> {
        let BackendConfig::OpenVpn { profile, .. } = &config.backend else {
            return Err(EngineError::UnsupportedConfig(config.protocol()));
        };

        if let Some(previous) = self.worker.take() {
            warn!("OpenVPN session {} still running, stopping it", previous.handle);
            if let Err(e) = self.join_worker(previous) {
                warn!("Previous OpenVPN session: {}", e);
            }
        }

        let handle = TunnelHandle::new(self.sessions);
        self.sessions = self.sessions.wrapping_add(1) & i32::MAX;

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<()>(0);
        let client = self.client.clone();
        let profile = profile.clone();

        let thread = thread::Builder::new()
            .name(format!("openvpn-worker-{}", handle))
            .spawn(move || {
                info!("OpenVPN worker {} started", handle);
                let _ = ready_tx.send(());
                run_session(client.as_ref(), handle, &profile, tun, StopSignal::new(stop_rx))
            })
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        // The worker owns the descriptor from here on
        if ready_rx.recv().is_err() {
            let exit = thread
                .join()
                .unwrap_or_else(|payload| WorkerExit::Panicked(panic_message(payload)));
            return Err(EngineError::Spawn(format!("worker exited early: {:?}", exit)));
        }

        self.worker = Some(Worker {
            handle,
            stop_tx,
            thread,
        });
        Ok(handle)
    }

    fn stop(&mut self, handle: TunnelHandle) -> Result<(), EngineError> {
        match self.worker.take() {
            Some(worker) if worker.handle == handle => self.join_worker(worker),
            other => {
                self.worker = other;
                Ok(())
            }
        }
    }

    fn is_alive(&self, handle: TunnelHandle) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| w.handle == handle && !w.thread.is_finished())
    }
}

impl Drop for OpenVpnEngine {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.join_worker(worker);
        }
    }
}
