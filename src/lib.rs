//! reprise - interactive replay of recorded robot episodes.
//!
//! A [`ReplayController`] plays a range of recorded episodes against an
//! actuator at a fixed frame rate, while a [`CommandListener`] turns operator
//! input lines into pause, skip, stop and reset requests. The two share a
//! [`ReplayState`] and nothing else.
//!
//! Episode data comes from any [`EpisodeSource`]; actuators implement
//! [`ActuatorGateway`]. A [`SimulatedGateway`] is always available, the
//! Feetech STS3215 driver needs the `so100` feature.
//!
//! # Example
//!
//! ```no_run
//! use reprise::{
//!     stdin_lines, CommandListener, EpisodeSource, MemorySource, ReplayConfig,
//!     ReplayController, ReplayState, SimulatedGateway,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = MemorySource::load_json("episodes.json")?;
//!     let config = ReplayConfig::builder().build(source.episode_count(), source.fps())?;
//!
//!     let state = ReplayState::new();
//!     let listener = CommandListener::spawn(state.clone(), stdin_lines());
//!     let report = ReplayController::new(source, SimulatedGateway::new(), config, state)
//!         .run()
//!         .await;
//!     listener.shutdown().await;
//!     println!("{}: {}", report.result, report.summary);
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod homing;
pub mod listener;
pub mod scheduler;
pub mod source;
pub mod state;

#[cfg(feature = "so100")]
pub mod so100;

pub use command::Command;
pub use config::{FailurePolicy, ReplayConfig, ReplayConfigBuilder};
pub use controller::{ReplayController, ReplayFailure, RunReport, RunResult, RunSummary};
pub use error::{ConfigError, ConnectError, SendError, SourceError};
pub use frame::{ChannelSchema, Frame};
pub use gateway::{ActuatorGateway, SharedGateway, SimulatedGateway};
pub use listener::{stdin_lines, CommandListener};
pub use source::{Episode, EpisodeSource, MemorySource};
pub use state::{Phase, ReplayState};
