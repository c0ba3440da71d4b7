//! Error types for the replay core.
//!
//! Only [`ConnectError`], [`SendError`] and [`SourceError`] can end a run;
//! operator-side issues (unknown commands, closed input) never surface here.

use std::time::Duration;

/// The actuator could not be brought online.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("actuator connection failed: {0}")]
    Device(String),
    #[error("actuator reported disconnected right after connect")]
    NotConnected,
    #[error("gateway worker panicked during connect")]
    Worker,
}

/// A single target command could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("actuator rejected command: {0}")]
    Device(String),
    #[error("actuator is not connected")]
    NotConnected,
    #[error("send did not complete within {0:?}")]
    Timeout(Duration),
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
    #[error("gateway worker panicked during send")]
    Worker,
}

/// Episode data could not be fetched or does not match its schema.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("episode {index} out of range (source has {count} episodes)")]
    EpisodeOutOfRange { index: usize, count: usize },
    #[error("frame {frame} of episode {episode} out of range ({count} frames)")]
    FrameOutOfRange {
        episode: usize,
        frame: usize,
        count: usize,
    },
    #[error("frame has {actual} values but schema has {expected} channels")]
    SchemaMismatch { expected: usize, actual: usize },
    #[error("channel schema is empty")]
    EmptySchema,
    #[error("duplicate channel name {0:?}")]
    DuplicateChannel(String),
    #[error("failed to read episodes: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse episodes: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A replay configuration that cannot be run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("fps must be finite, > 0 and give a representable frame period, got {0}")]
    InvalidFps(f64),
    #[error("episode delay must be a representable duration >= 0 seconds, got {0}")]
    InvalidDelay(f64),
    #[error("start episode {start} is >= total episodes {total}")]
    StartOutOfRange { start: usize, total: usize },
    #[error("start episode {start} > end episode {end}")]
    EmptyRange { start: usize, end: usize },
    #[error("source has no episodes")]
    NoEpisodes,
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
    #[error("invalid home position: {0}")]
    HomePosition(#[source] SourceError),
    #[error("home position channel {0:?} is not in the episode data")]
    HomeChannel(String),
    #[error("send timeout must be a representable duration >= 0 seconds, got {0}")]
    InvalidTimeout(f64),
}
