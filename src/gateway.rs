//! Actuator gateways.
//!
//! An [`ActuatorGateway`] is the device (or simulation) that accepts named
//! target commands. Device drivers are blocking, so the replay core never
//! calls one directly: it goes through [`SharedGateway`], which owns the
//! gateway behind a single mutex and runs every call on tokio's blocking
//! pool. Episode frames and operator-triggered reset postures therefore
//! can never interleave on the wire.
//!
//! # Example
//!
//! ```no_run
//! use reprise::frame::Frame;
//! use reprise::gateway::{SharedGateway, SimulatedGateway};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let gateway = SharedGateway::new(SimulatedGateway::new(), Some(Duration::from_secs(1)));
//! gateway.connect().await?;
//! gateway.send(Frame::from_pairs([("gripper.pos", 0.0)])?).await?;
//! gateway.disconnect_if_connected().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{ConnectError, SendError};
use crate::frame::Frame;

/// Trait for devices that accept named target commands.
///
/// Implementations may block; callers run them off the async runtime.
pub trait ActuatorGateway: Send + 'static {
    /// Bring the device online.
    fn connect(&mut self) -> Result<(), ConnectError>;

    /// Whether the device is currently online.
    fn is_connected(&self) -> bool;

    /// Deliver one set of named targets.
    fn send(&mut self, targets: &Frame) -> Result<(), SendError>;

    /// Take the device offline. Must be safe to call when not connected.
    fn disconnect(&mut self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exclusive, async access to one gateway.
///
/// Callers queue on an async mutex; the send timeout only starts once the
/// gateway is theirs, so waiting behind another holder is never a failure.
pub struct SharedGateway<G> {
    inner: Arc<tokio::sync::Mutex<G>>,
    send_timeout: Option<Duration>,
}

impl<G> Clone for SharedGateway<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            send_timeout: self.send_timeout,
        }
    }
}

impl<G: ActuatorGateway> SharedGateway<G> {
    /// Wrap a gateway. `send_timeout` bounds the device call of every
    /// [`send`](Self::send).
    pub fn new(gateway: G, send_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(gateway)),
            send_timeout,
        }
    }

    /// Connect and confirm the device reports itself online.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        let mut gateway = Arc::clone(&self.inner).lock_owned().await;
        tokio::task::spawn_blocking(move || {
            gateway.connect()?;
            if !gateway.is_connected() {
                return Err(ConnectError::NotConnected);
            }
            Ok(())
        })
        .await
        .unwrap_or(Err(ConnectError::Worker))
    }

    pub async fn is_connected(&self) -> bool {
        let gateway = Arc::clone(&self.inner).lock_owned().await;
        tokio::task::spawn_blocking(move || gateway.is_connected())
            .await
            .unwrap_or(false)
    }

    /// Send one frame.
    pub async fn send(&self, targets: Frame) -> Result<(), SendError> {
        self.send_and_hold(targets, Duration::ZERO).await
    }

    /// Send one frame, then keep exclusive access for `hold` so nothing else
    /// reaches the device while it settles.
    ///
    /// The timeout covers the device call and the hold, not the wait for
    /// the gateway. On timeout the blocking call keeps running in the
    /// background and still owns the device until it returns.
    pub async fn send_and_hold(&self, targets: Frame, hold: Duration) -> Result<(), SendError> {
        let mut gateway = Arc::clone(&self.inner).lock_owned().await;
        let task = tokio::task::spawn_blocking(move || {
            gateway.send(&targets)?;
            if !hold.is_zero() {
                std::thread::sleep(hold);
            }
            Ok(())
        });

        let joined = match self.send_timeout {
            Some(limit) => match tokio::time::timeout(limit.saturating_add(hold), task).await {
                Ok(joined) => joined,
                Err(_) => return Err(SendError::Timeout(limit)),
            },
            None => task.await,
        };
        joined.unwrap_or(Err(SendError::Worker))
    }

    /// Disconnect if the device reports itself connected.
    ///
    /// Returns whether a disconnect was issued. The request is queued behind
    /// any call still holding the device.
    pub async fn disconnect_if_connected(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        let task = tokio::task::spawn_blocking(move || {
            let mut gateway = inner.blocking_lock_owned();
            if gateway.is_connected() {
                gateway.disconnect();
                true
            } else {
                false
            }
        });
        match self.send_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined.unwrap_or(false),
                Err(_) => {
                    tracing::warn!(
                        "Gateway still busy after {:?}, disconnect will run once it is released",
                        limit
                    );
                    true
                }
            },
            None => task.await.unwrap_or(false),
        }
    }
}

/// What a [`SimulatedGateway`] has seen. Shared so callers can inspect it
/// after the gateway has been moved into a run.
#[derive(Debug, Default)]
pub struct SimulatedLog {
    pub connects: usize,
    pub disconnects: usize,
    pub send_attempts: usize,
    pub sent: Vec<Frame>,
    /// Completion time of each entry in `sent`.
    pub sent_at: Vec<Instant>,
}

/// A gateway with no hardware behind it.
///
/// Logs every target at debug level, can add per-send latency and can be
/// scripted to refuse the connection or fail a given send attempt.
#[derive(Debug, Default)]
pub struct SimulatedGateway {
    connected: bool,
    latency: Duration,
    refuse_connect: bool,
    fail_attempt: Option<usize>,
    log: Arc<Mutex<SimulatedLog>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each send for `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `connect` fail.
    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Fail the send attempt with this zero-based index.
    pub fn fail_on_attempt(mut self, attempt: usize) -> Self {
        self.fail_attempt = Some(attempt);
        self
    }

    /// Handle to the activity log.
    pub fn log(&self) -> Arc<Mutex<SimulatedLog>> {
        Arc::clone(&self.log)
    }
}

impl ActuatorGateway for SimulatedGateway {
    fn connect(&mut self) -> Result<(), ConnectError> {
        if self.refuse_connect {
            return Err(ConnectError::Device("simulated device unavailable".into()));
        }
        lock(&self.log).connects += 1;
        self.connected = true;
        tracing::info!("Simulated actuator connected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, targets: &Frame) -> Result<(), SendError> {
        if !self.connected {
            return Err(SendError::NotConnected);
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let mut log = lock(&self.log);
        let attempt = log.send_attempts;
        log.send_attempts += 1;
        if self.fail_attempt == Some(attempt) {
            return Err(SendError::Device(format!(
                "simulated fault on send #{}",
                attempt
            )));
        }
        tracing::debug!("Simulated send {}", targets);
        log.sent.push(targets.clone());
        log.sent_at.push(Instant::now());
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            lock(&self.log).disconnects += 1;
            tracing::info!("Simulated actuator disconnected");
        }
    }
}
