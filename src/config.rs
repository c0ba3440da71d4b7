//! Replay configuration.
//!
//! A [`ReplayConfig`] is built once, validated against the dataset it will
//! play, and never changes during a run.
//!
//! # Example
//!
//! ```
//! use reprise::config::ReplayConfig;
//!
//! let config = ReplayConfig::builder()
//!     .fps(30.0)
//!     .episodes(0, Some(2))
//!     .auto_advance(true)
//!     .episode_delay(1.0)
//!     .build(5, None)
//!     .unwrap();
//! assert_eq!(config.episode_range(), 0..=2);
//! ```

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::Frame;

/// Cadence used when neither the caller nor the dataset gives one.
pub const DEFAULT_FPS: f64 = 30.0;
/// Pause between episodes in auto-advance mode.
pub const DEFAULT_EPISODE_DELAY: f64 = 2.0;
/// Upper bound on how long any wait goes without re-checking state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on one actuator send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);
/// Time given to the actuator to reach its home posture.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_secs(2);

/// What a failed send does to the rest of the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop the whole run; later episodes never start.
    #[default]
    HaltRun,
    /// Drop the rest of the failing episode and carry on with the next one.
    AbandonEpisode,
}

/// Validated replay settings.
#[derive(Clone, Debug)]
pub struct ReplayConfig {
    pub fps: f64,
    pub start_episode: usize,
    pub end_episode: usize,
    pub total_episodes: usize,
    pub auto_advance: bool,
    pub episode_delay: Duration,
    pub poll_interval: Duration,
    pub send_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub home_position: Option<Frame>,
    pub settle_time: Duration,
    pub home_on_exit: bool,
    pub confirm_each_episode: bool,
    pub progress_interval: usize,
}

impl ReplayConfig {
    pub fn builder() -> ReplayConfigBuilder {
        ReplayConfigBuilder::default()
    }

    /// Episodes to play, in order.
    pub fn episode_range(&self) -> RangeInclusive<usize> {
        self.start_episode..=self.end_episode
    }

    pub fn episodes_requested(&self) -> usize {
        self.end_episode - self.start_episode + 1
    }

    /// Check that the home posture only names channels the episodes drive.
    pub fn check_home_channels(&self, channels: &[String]) -> Result<(), ConfigError> {
        let Some(home) = &self.home_position else {
            return Ok(());
        };
        match home.schema().names().iter().find(|name| !channels.contains(*name)) {
            Some(name) => Err(ConfigError::HomeChannel(name.clone())),
            None => Ok(()),
        }
    }
}

/// Send timeout from seconds; `0` disables it.
pub fn send_timeout_from_secs(secs: f64) -> Result<Option<Duration>, ConfigError> {
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| ConfigError::InvalidTimeout(secs))
}

/// Builder for [`ReplayConfig`].
#[derive(Clone, Debug)]
pub struct ReplayConfigBuilder {
    fps: Option<f64>,
    start_episode: usize,
    end_episode: Option<usize>,
    auto_advance: bool,
    episode_delay: f64,
    poll_interval: Duration,
    send_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
    home_position: Option<Vec<(String, f64)>>,
    settle_time: Duration,
    home_on_exit: bool,
    confirm_each_episode: bool,
    progress_interval: usize,
}

impl Default for ReplayConfigBuilder {
    fn default() -> Self {
        Self {
            fps: None,
            start_episode: 0,
            end_episode: None,
            auto_advance: false,
            episode_delay: DEFAULT_EPISODE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
            failure_policy: FailurePolicy::HaltRun,
            home_position: None,
            settle_time: DEFAULT_SETTLE_TIME,
            home_on_exit: false,
            confirm_each_episode: false,
            progress_interval: 10,
        }
    }
}

impl ReplayConfigBuilder {
    /// Playback rate. Defaults to the dataset's rate.
    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    /// First and last episode (inclusive). `None` means the last episode.
    pub fn episodes(mut self, start: usize, end: Option<usize>) -> Self {
        self.start_episode = start;
        self.end_episode = end;
        self
    }

    pub fn auto_advance(mut self, enabled: bool) -> Self {
        self.auto_advance = enabled;
        self
    }

    /// Seconds to wait between episodes in auto-advance mode.
    pub fn episode_delay(mut self, seconds: f64) -> Self {
        self.episode_delay = seconds;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bound on each send; `None` waits forever.
    pub fn send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Posture sent on a reset request.
    pub fn home_position(mut self, posture: Vec<(String, f64)>) -> Self {
        self.home_position = Some(posture);
        self
    }

    pub fn settle_time(mut self, settle: Duration) -> Self {
        self.settle_time = settle;
        self
    }

    /// Send the home posture once more before disconnecting.
    pub fn home_on_exit(mut self, enabled: bool) -> Self {
        self.home_on_exit = enabled;
        self
    }

    /// Hold before each episode until the operator continues.
    pub fn confirm_each_episode(mut self, enabled: bool) -> Self {
        self.confirm_each_episode = enabled;
        self
    }

    /// Log progress every `frames` frames (0 disables).
    pub fn progress_interval(mut self, frames: usize) -> Self {
        self.progress_interval = frames;
        self
    }

    /// Validate against a dataset of `total_episodes` recorded at
    /// `source_fps`.
    ///
    /// An end episode past the dataset is clamped to the last episode.
    pub fn build(
        self,
        total_episodes: usize,
        source_fps: Option<f64>,
    ) -> Result<ReplayConfig, ConfigError> {
        let fps = self.fps.or(source_fps).unwrap_or(DEFAULT_FPS);
        if !fps.is_finite() || fps <= 0.0 || Duration::try_from_secs_f64(1.0 / fps).is_err() {
            return Err(ConfigError::InvalidFps(fps));
        }
        let episode_delay = Duration::try_from_secs_f64(self.episode_delay)
            .map_err(|_| ConfigError::InvalidDelay(self.episode_delay))?;
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if total_episodes == 0 {
            return Err(ConfigError::NoEpisodes);
        }

        let last = total_episodes - 1;
        let start = self.start_episode;
        if start >= total_episodes {
            return Err(ConfigError::StartOutOfRange {
                start,
                total: total_episodes,
            });
        }
        let end = self.end_episode.map_or(last, |end| end.min(last));
        if start > end {
            return Err(ConfigError::EmptyRange { start, end });
        }

        let home_position = self
            .home_position
            .map(Frame::from_pairs)
            .transpose()
            .map_err(ConfigError::HomePosition)?;

        Ok(ReplayConfig {
            fps,
            start_episode: start,
            end_episode: end,
            total_episodes,
            auto_advance: self.auto_advance,
            episode_delay,
            poll_interval: self.poll_interval,
            send_timeout: self.send_timeout,
            failure_policy: self.failure_policy,
            home_position,
            settle_time: self.settle_time,
            home_on_exit: self.home_on_exit,
            confirm_each_episode: self.confirm_each_episode,
            progress_interval: self.progress_interval,
        })
    }
}
