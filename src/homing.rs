//! Reset-to-home worker.
//!
//! Operator reset requests arrive through [`ReplayState`] at any time,
//! including mid-episode. The worker carries them out on its own task, but
//! only through [`SharedGateway`], so a home posture is never interleaved
//! with an in-flight episode frame. The gateway stays reserved for the
//! settle time after the posture is sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::frame::Frame;
use crate::gateway::{ActuatorGateway, SharedGateway};
use crate::state::ReplayState;

/// Send the home posture and hold the gateway while the actuator settles.
pub async fn send_home<G: ActuatorGateway>(
    gateway: &SharedGateway<G>,
    home: &Frame,
    settle: Duration,
) -> Result<(), SendError> {
    tracing::info!("Moving to home position...");
    gateway.send_and_hold(home.clone(), settle).await?;
    tracing::info!("Robot reset to home position");
    Ok(())
}

/// Handle to the running reset worker.
pub struct HomingWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HomingWorker {
    /// Start serving reset requests. Without a home posture, requests are
    /// reported and dropped.
    pub fn spawn<G: ActuatorGateway>(
        gateway: SharedGateway<G>,
        state: Arc<ReplayState>,
        home: Option<Frame>,
        settle: Duration,
        poll_interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                if state.take_reset() {
                    match &home {
                        Some(home) => {
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => break,
                                result = send_home(&gateway, home, settle) => {
                                    if let Err(e) = result {
                                        tracing::error!("Error resetting robot: {}", e);
                                    }
                                }
                            }
                        }
                        None => tracing::warn!("No home position configured, ignoring reset"),
                    }
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = state.changed(poll_interval) => {}
                }
            }
        });
        Self { cancel, handle }
    }

    /// Stop serving requests and wait for the worker to exit.
    ///
    /// A reset still queued for the gateway is dropped; one already handed
    /// to the device finishes on the blocking pool.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Homing worker ended abnormally: {}", e);
        }
    }
}
