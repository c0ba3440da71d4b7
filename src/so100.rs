//! Feetech STS3215 gateway for SO100/SO101 arms on a local serial port.
//!
//! Each channel is mapped to one servo id. Targets are recorded in degrees
//! and written as goal positions in radians with a single sync write per
//! frame, so one frame reaches every joint in the same bus transaction.
//!
//! # Example
//!
//! ```no_run
//! use reprise::so100::Sts3215Gateway;
//!
//! let gateway = Sts3215Gateway::new(
//!     "/dev/ttyUSB0",
//!     [("shoulder_pan.pos", 1), ("shoulder_lift.pos", 2)],
//! );
//! ```

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use rustypot::servo::feetech::sts3215::Sts3215Controller;

use crate::error::{ConnectError, SendError};
use crate::frame::Frame;
use crate::gateway::ActuatorGateway;

/// Bus speed of the SO100/SO101 servo chain.
pub const BAUD_RATE: u32 = 1_000_000;

/// Channel order of a single SO101 arm, matching servo ids 1 to 6.
pub const SO101_CHANNELS: [&str; 6] = [
    "shoulder_pan.pos",
    "shoulder_lift.pos",
    "elbow_flex.pos",
    "wrist_flex.pos",
    "wrist_roll.pos",
    "gripper.pos",
];

/// Drives one servo chain.
pub struct Sts3215Gateway {
    port: String,
    servo_ids: HashMap<String, u8>,
    timeout: Duration,
    controller: Option<Sts3215Controller>,
}

impl Sts3215Gateway {
    pub fn new<I, S>(port: &str, servo_ids: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        Self {
            port: port.to_string(),
            servo_ids: servo_ids
                .into_iter()
                .map(|(name, id)| (name.into(), id))
                .collect(),
            timeout: Duration::from_millis(1000),
            controller: None,
        }
    }

    /// Single SO101 arm with servo ids 1 to 6.
    pub fn so101(port: &str) -> Self {
        Self::new(port, SO101_CHANNELS.iter().copied().zip(1u8..))
    }

    /// Serial read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn targets(&self, frame: &Frame) -> Result<(Vec<u8>, Vec<f64>), SendError> {
        let mut ids = Vec::with_capacity(frame.schema().len());
        let mut positions = Vec::with_capacity(frame.schema().len());
        for (name, degrees) in frame.iter() {
            let id = self
                .servo_ids
                .get(name)
                .ok_or_else(|| SendError::UnknownChannel(name.to_string()))?;
            ids.push(*id);
            positions.push(degrees.to_radians());
        }
        Ok((ids, positions))
    }
}

impl ActuatorGateway for Sts3215Gateway {
    fn connect(&mut self) -> Result<(), ConnectError> {
        tracing::info!("Opening serial port {} at {} baud", self.port, BAUD_RATE);
        let port = serialport::new(&self.port, BAUD_RATE)
            .timeout(self.timeout)
            .open()
            .map_err(|e| ConnectError::Device(format!("{}: {}", self.port, e)))?;

        let mut controller = Sts3215Controller::new()
            .with_protocol_v1()
            .with_serial_port(port);

        let mut ids: Vec<u8> = self.servo_ids.values().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if let Err(e) = controller.write_torque_enable(id, true) {
                return Err(ConnectError::Device(format!(
                    "failed to enable torque on servo {}: {}",
                    id, e
                )));
            }
            // Small gap between commands on the bus
            thread::sleep(Duration::from_millis(10));
        }

        self.controller = Some(controller);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.controller.is_some()
    }

    fn send(&mut self, targets: &Frame) -> Result<(), SendError> {
        let (ids, positions) = self.targets(targets)?;
        let controller = self.controller.as_mut().ok_or(SendError::NotConnected)?;
        controller
            .sync_write_goal_position(&ids, &positions)
            .map_err(|e| SendError::Device(e.to_string()))
    }

    fn disconnect(&mut self) {
        // Dropping the controller closes the port; torque stays on so the
        // arm holds its last posture.
        if self.controller.take().is_some() {
            tracing::info!("Closed serial port {}", self.port);
        }
    }
}
