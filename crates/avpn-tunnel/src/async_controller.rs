//! Async facade over [`TunnelController`]
//!
//! Controller calls block on the host and the engines, so they run on the
//! tokio blocking pool.

use crate::controller::{LaunchReason, RestoreOutcome, TunnelController, TunnelError, TunnelStatus};
use crate::engine::{EngineError, TunnelHandle};
use crate::request::TunnelRequest;
use std::sync::Arc;
use tokio::task::{self, JoinError};
use tracing::warn;

#[derive(Clone)]
pub struct AsyncTunnelController {
    inner: Arc<TunnelController>,
}

fn panicked(e: JoinError) -> EngineError {
    EngineError::WorkerPanicked(e.to_string())
}

impl AsyncTunnelController {
    pub fn new(controller: TunnelController) -> Self {
        Self {
            inner: Arc::new(controller),
        }
    }

    pub fn controller(&self) -> &TunnelController {
        &self.inner
    }

    pub async fn turn_on(&self, request: TunnelRequest) -> Result<TunnelHandle, TunnelError> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.turn_on(request))
            .await
            .map_err(|e| TunnelError::EngineStart(panicked(e)))?
    }

    pub async fn turn_off(&self) -> Result<(), TunnelError> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.turn_off())
            .await
            .map_err(|e| TunnelError::EngineStop(panicked(e)))?
    }

    pub async fn status(&self) -> TunnelStatus {
        let inner = self.inner.clone();
        match task::spawn_blocking(move || inner.status()).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Status query failed: {}", e);
                self.inner.status()
            }
        }
    }

    pub async fn restore(&self, launch: LaunchReason) -> Result<RestoreOutcome, TunnelError> {
        let inner = self.inner.clone();
        task::spawn_blocking(move || inner.restore(launch))
            .await
            .map_err(|e| TunnelError::EngineStart(panicked(e)))?
    }

    /// Host revoked VPN permission.
    ///
    /// The revocation is recorded before this returns, so a concurrent
    /// `turn_on` backs out even if teardown has not run yet.
    pub async fn on_revoke(&self) {
        self.inner.note_revocation();
        if let Err(e) = self.turn_off().await {
            warn!("Tearing down after revocation: {}", e);
        }
    }
}
