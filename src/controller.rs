//! Episode replay controller.
//!
//! The controller walks the configured episode range in order and sends
//! every frame to the actuator at the configured cadence, honouring
//! operator pause, skip and stop requests at well-defined checkpoints:
//!
//! - top of every frame, before the send;
//! - while paused (woken by state changes, bounded by the poll interval);
//! - during the inter-frame sleep and the between-episode wait.
//!
//! There is no preemption mid-send: a stop takes effect at the next
//! checkpoint, so no frame is sent after a stop has been observed.
//!
//! Whatever happens, a successful connect is paired with exactly one
//! disconnect before [`ReplayController::run`] returns.
//!
//! # Example
//!
//! ```no_run
//! use reprise::config::ReplayConfig;
//! use reprise::controller::ReplayController;
//! use reprise::gateway::SimulatedGateway;
//! use reprise::listener::{stdin_lines, CommandListener};
//! use reprise::source::{EpisodeSource, MemorySource};
//! use reprise::state::ReplayState;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let source = MemorySource::synthetic(3, 50, &["j1", "j2"]);
//! let config = ReplayConfig::builder()
//!     .auto_advance(true)
//!     .build(source.episode_count(), source.fps())?;
//!
//! let state = ReplayState::new();
//! let listener = CommandListener::spawn(state.clone(), stdin_lines());
//! let report = ReplayController::new(source, SimulatedGateway::new(), config, state)
//!     .run()
//!     .await;
//! listener.shutdown().await;
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{FailurePolicy, ReplayConfig};
use crate::error::{ConnectError, SendError, SourceError};
use crate::gateway::{ActuatorGateway, SharedGateway};
use crate::homing::{send_home, HomingWorker};
use crate::scheduler::frame_delay;
use crate::source::{Episode, EpisodeSource};
use crate::state::{Phase, ReplayState};

/// Why a run failed.
#[derive(Debug, thiserror::Error)]
pub enum ReplayFailure {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Terminal outcome of a run.
#[derive(Debug)]
pub enum RunResult {
    /// Every requested episode was visited. `episodes_played` counts those
    /// played to their last frame.
    Completed { episodes_played: usize },
    /// The operator quit during (or right after) `last_episode`.
    StoppedByUser { last_episode: usize },
    /// A fatal error ended the run. `episode` is `None` when the actuator
    /// never came online; `frame` is `None` when the episode could not be
    /// loaded.
    Failed {
        episode: Option<usize>,
        frame: Option<usize>,
        cause: ReplayFailure,
    },
}

impl RunResult {
    /// Whether a command-line wrapper should exit with success.
    pub fn is_success(&self) -> bool {
        !matches!(self, RunResult::Failed { .. })
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunResult::Completed { episodes_played } => {
                write!(f, "completed ({} episodes played)", episodes_played)
            }
            RunResult::StoppedByUser { last_episode } => {
                write!(f, "stopped by user during episode {}", last_episode)
            }
            RunResult::Failed {
                episode: None,
                cause,
                ..
            } => write!(f, "failed before playback: {}", cause),
            RunResult::Failed {
                episode: Some(episode),
                frame: None,
                cause,
            } => write!(f, "failed loading episode {}: {}", episode, cause),
            RunResult::Failed {
                episode: Some(episode),
                frame: Some(frame),
                cause,
            } => write!(f, "failed at episode {} frame {}: {}", episode, frame, cause),
        }
    }
}

/// Per-run episode counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: usize,
    pub attempted: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} episodes completed ({} attempted, {} skipped, {} failed)",
            self.completed, self.requested, self.attempted, self.skipped, self.failed
        )
    }
}

/// What a run hands back to its caller.
#[derive(Debug)]
pub struct RunReport {
    pub result: RunResult,
    pub summary: RunSummary,
}

enum EpisodeOutcome {
    Finished,
    Skipped,
    Stopped,
    SendFailed { frame: usize, error: SendError },
}

/// Plays a range of recorded episodes against one actuator.
pub struct ReplayController<S, G> {
    source: S,
    gateway: SharedGateway<G>,
    config: ReplayConfig,
    state: Arc<ReplayState>,
}

impl<S: EpisodeSource, G: ActuatorGateway> ReplayController<S, G> {
    pub fn new(source: S, gateway: G, config: ReplayConfig, state: Arc<ReplayState>) -> Self {
        let gateway = SharedGateway::new(gateway, config.send_timeout);
        Self {
            source,
            gateway,
            config,
            state,
        }
    }

    pub fn state(&self) -> Arc<ReplayState> {
        Arc::clone(&self.state)
    }

    /// Connect, play, and always clean up.
    pub async fn run(self) -> RunReport {
        let mut summary = RunSummary {
            requested: self.config.episodes_requested(),
            ..RunSummary::default()
        };

        self.state.set_phase(Phase::Connecting);
        tracing::info!("Connecting to actuator...");
        if let Err(e) = self.gateway.connect().await {
            tracing::error!("Error connecting to actuator: {}", e);
            self.state.set_phase(Phase::Failed);
            self.release_gateway().await;
            return RunReport {
                result: RunResult::Failed {
                    episode: None,
                    frame: None,
                    cause: e.into(),
                },
                summary,
            };
        }
        tracing::info!("Actuator connected");

        let homing = HomingWorker::spawn(
            self.gateway.clone(),
            Arc::clone(&self.state),
            self.config.home_position.clone(),
            self.config.settle_time,
            self.config.poll_interval,
        );

        let result = self.play_range(&mut summary).await;

        homing.shutdown().await;
        if let Some(home) = self.config.home_position.as_ref() {
            if self.config.home_on_exit && self.gateway.is_connected().await {
                if let Err(e) = send_home(&self.gateway, home, self.config.settle_time).await {
                    tracing::warn!("Could not return to home position: {}", e);
                }
            }
        }
        self.release_gateway().await;

        self.state.set_phase(match &result {
            RunResult::Completed { .. } => Phase::Completed,
            RunResult::StoppedByUser { .. } => Phase::Stopped,
            RunResult::Failed { .. } => Phase::Failed,
        });
        match &result {
            RunResult::Failed { .. } => tracing::error!("Replay {}", result),
            _ => tracing::info!("Replay {}", result),
        }
        tracing::info!("{}", summary);

        RunReport { result, summary }
    }

    async fn release_gateway(&self) {
        if self.gateway.disconnect_if_connected().await {
            tracing::info!("Actuator disconnected");
        }
    }

    async fn play_range(&self, summary: &mut RunSummary) -> RunResult {
        let end = self.config.end_episode;
        let mut last_episode = self.config.start_episode;

        for index in self.config.episode_range() {
            if self.state.stop_requested() {
                return self.stopped(last_episode);
            }
            last_episode = index;

            let episode = match Episode::load(&self.source, index) {
                Ok(episode) => episode,
                Err(e) => {
                    tracing::error!("Error loading episode {}: {}", index, e);
                    return RunResult::Failed {
                        episode: Some(index),
                        frame: None,
                        cause: e.into(),
                    };
                }
            };
            summary.attempted += 1;

            if self.state.take_skip() {
                tracing::info!("No episode playing, skip ignored");
            }
            if self.config.confirm_each_episode {
                tracing::warn!(
                    "Robot will move! Ensure clear workspace, then type 'n' to start episode {}",
                    index
                );
                self.state.set_paused(true);
            }

            match self.play_episode(&episode).await {
                EpisodeOutcome::Finished => {
                    summary.completed += 1;
                    tracing::info!("Episode {} completed!", index);
                }
                EpisodeOutcome::Skipped => {
                    summary.skipped += 1;
                    tracing::info!("Episode {} skipped", index);
                }
                EpisodeOutcome::Stopped => return self.stopped(index),
                EpisodeOutcome::SendFailed { frame, error } => {
                    tracing::error!(
                        "Error sending episode {} frame {} to actuator: {}",
                        index,
                        frame,
                        error
                    );
                    match self.config.failure_policy {
                        FailurePolicy::HaltRun => {
                            return RunResult::Failed {
                                episode: Some(index),
                                frame: Some(frame),
                                cause: error.into(),
                            }
                        }
                        FailurePolicy::AbandonEpisode => {
                            summary.failed += 1;
                            tracing::warn!("Abandoning episode {}", index);
                        }
                    }
                }
            }

            if index < end && !self.state.stop_requested() {
                self.between_episodes().await;
            }
        }

        if self.state.stop_requested() {
            return self.stopped(last_episode);
        }
        RunResult::Completed {
            episodes_played: summary.completed,
        }
    }

    fn stopped(&self, last_episode: usize) -> RunResult {
        self.state.set_phase(Phase::Stopping);
        tracing::info!("Replay stopped by user.");
        RunResult::StoppedByUser { last_episode }
    }

    async fn play_episode(&self, episode: &Episode) -> EpisodeOutcome {
        let total = episode.len();
        tracing::info!(
            "Replaying episode {} ({}/{}): {} frames over {} channels at {} fps",
            episode.index(),
            episode.index() + 1,
            self.config.total_episodes,
            total,
            episode.schema().len(),
            self.config.fps
        );
        self.state.set_phase(Phase::Playing);

        for (index, frame) in episode.frames().iter().enumerate() {
            if self.state.stop_requested() {
                return EpisodeOutcome::Stopped;
            }
            if self.state.take_skip() {
                return EpisodeOutcome::Skipped;
            }

            self.wait_while_paused(episode.index(), index).await;
            if self.state.stop_requested() {
                return EpisodeOutcome::Stopped;
            }
            if self.state.take_skip() {
                return EpisodeOutcome::Skipped;
            }

            // The pause wait is behind us, so it never counts against this
            // frame's budget.
            let started = Instant::now();
            if let Err(error) = self.gateway.send(frame.clone()).await {
                return EpisodeOutcome::SendFailed {
                    frame: index,
                    error,
                };
            }
            self.state.set_progress(episode.index(), index);

            tracing::debug!("Episode {} frame {}: {}", episode.index(), index, frame);
            let interval = self.config.progress_interval;
            if interval > 0 && index % interval == 0 {
                tracing::info!(
                    "Frame {}/{} ({:.1}%)",
                    index + 1,
                    total,
                    (index + 1) as f64 / total as f64 * 100.0
                );
            }

            let delay = frame_delay(self.config.fps, started.elapsed());
            self.sleep_unless_stopped(delay).await;
        }
        // Every frame went out; a skip that arrived during the last sleep
        // has nothing left to abandon.
        if self.state.take_skip() {
            tracing::debug!("Episode {} already finished, skip dropped", episode.index());
        }
        EpisodeOutcome::Finished
    }

    async fn wait_while_paused(&self, episode: usize, frame: usize) {
        if !self.state.is_paused() {
            return;
        }
        tracing::info!("Paused before episode {} frame {}", episode, frame);
        self.state.set_phase(Phase::Paused);
        while self.state.is_paused() && !self.state.stop_requested() {
            self.state.changed(self.config.poll_interval).await;
        }
        self.state.set_phase(Phase::Playing);
    }

    async fn between_episodes(&self) {
        self.state.set_phase(Phase::BetweenEpisodes);
        if self.config.auto_advance {
            tracing::info!(
                "Waiting {:.1}s before next episode...",
                self.config.episode_delay.as_secs_f64()
            );
            self.sleep_unless_stopped(self.config.episode_delay).await;
            return;
        }

        tracing::info!("Type 'p' to hold before the next episode, 'q' to quit");
        self.state.changed(self.config.poll_interval).await;
        if self.state.is_paused() {
            tracing::info!("Holding before next episode, type 'n' to continue");
        }
        while self.state.is_paused() && !self.state.stop_requested() {
            self.state.changed(self.config.poll_interval).await;
        }
    }

    /// Sleep for `duration`, returning early once a stop is requested.
    async fn sleep_unless_stopped(&self, duration: Duration) {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            // Past the clock's range: only a stop ends it.
            while !self.state.stop_requested() {
                self.state.changed(self.config.poll_interval).await;
            }
            return;
        };
        while !self.state.stop_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let remaining = deadline - now;
            if remaining <= self.config.poll_interval {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.state.changed(remaining) => {}
                }
            } else {
                self.state.changed(self.config.poll_interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::gateway::{SimulatedGateway, SimulatedLog};
    use crate::listener::CommandListener;
    use crate::source::MemorySource;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Each frame carries its own `(episode, frame)` coordinates.
    fn dataset(episodes: usize, frames: usize) -> MemorySource {
        let data = (0..episodes)
            .map(|e| (0..frames).map(|f| vec![e as f64, f as f64]).collect())
            .collect();
        MemorySource::new(vec!["episode".into(), "frame".into()], data)
    }

    fn coords(frame: &Frame) -> (usize, usize) {
        (
            frame.get("episode").unwrap() as usize,
            frame.get("frame").unwrap() as usize,
        )
    }

    fn sent(log: &Arc<Mutex<SimulatedLog>>) -> Vec<(usize, usize)> {
        log.lock()
            .unwrap()
            .sent
            .iter()
            .filter(|f| f.get("episode").is_some())
            .map(coords)
            .collect()
    }

    fn all_frames(episodes: std::ops::Range<usize>, frames: usize) -> Vec<(usize, usize)> {
        episodes
            .flat_map(|e| (0..frames).map(move |f| (e, f)))
            .collect()
    }

    fn auto(fps: f64) -> crate::config::ReplayConfigBuilder {
        ReplayConfig::builder()
            .fps(fps)
            .auto_advance(true)
            .episode_delay(0.0)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_plays_every_frame_in_order() {
        // 3 episodes x 5 frames at 10 fps, no operator input.
        let source = dataset(3, 5);
        let config = auto(10.0).build(3, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();

        let started = std::time::Instant::now();
        let report = ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 3 }
        ));
        assert_eq!(sent(&log), all_frames(0..3, 5));
        let log = log.lock().unwrap();
        assert_eq!(log.connects, 1);
        assert_eq!(log.disconnects, 1);
        assert!(started.elapsed() >= Duration::from_millis(1400));
        assert_eq!(
            report.summary,
            RunSummary {
                requested: 3,
                attempted: 3,
                completed: 3,
                skipped: 0,
                failed: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_respects_episode_range() {
        let source = dataset(5, 2);
        let config = auto(200.0).episodes(1, Some(3)).build(5, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();

        let report = ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 3 }
        ));
        assert_eq!(sent(&log), all_frames(1..4, 2));
    }

    #[tokio::test]
    async fn test_pause_holds_position_and_clock() {
        let source = dataset(1, 5);
        let config = auto(10.0).build(1, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());

        // Pause while frame 1 is in flight, i.e. before frame 2 goes out.
        wait_for(|| log.lock().unwrap().sent.len() == 2).await;
        tx.send("p".into()).await.unwrap();
        wait_for(|| state.phase() == Phase::Paused).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sent(&log), vec![(0, 0), (0, 1)]);

        tx.send("n".into()).await.unwrap();
        let report = run.await.unwrap();
        listener.shutdown().await;

        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 1 }
        ));
        assert_eq!(sent(&log), all_frames(0..1, 5));

        let log = log.lock().unwrap();
        let gap = |i: usize| log.sent_at[i + 1] - log.sent_at[i];
        assert!(gap(1) >= Duration::from_millis(500));
        // The frame after the pause keeps its full budget.
        assert!(gap(2) >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_send_failure_halts_run() {
        // Fails on episode 1 frame 3 (attempt 5 + 3).
        let source = dataset(3, 5);
        let config = auto(100.0).build(3, None).unwrap();
        let sim = SimulatedGateway::new().fail_on_attempt(8);
        let log = sim.log();

        let report = ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        match report.result {
            RunResult::Failed {
                episode: Some(1),
                frame: Some(3),
                cause: ReplayFailure::Send(SendError::Device(_)),
            } => {}
            other => panic!("unexpected result: {:?}", other),
        }
        let frames = sent(&log);
        assert_eq!(frames.len(), 8);
        assert!(frames.iter().all(|&(e, _)| e < 2));
        assert_eq!(log.lock().unwrap().disconnects, 1);
        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.attempted, 2);
        assert!(!report.result.is_success());
    }

    #[tokio::test]
    async fn test_abandon_policy_moves_on() {
        let source = dataset(3, 5);
        let config = auto(200.0)
            .failure_policy(FailurePolicy::AbandonEpisode)
            .build(3, None)
            .unwrap();
        let sim = SimulatedGateway::new().fail_on_attempt(7);
        let log = sim.log();

        let report = ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 2 }
        ));
        assert_eq!(report.summary.failed, 1);
        let mut expected = all_frames(0..1, 5);
        expected.extend([(1, 0), (1, 1)]);
        expected.extend(all_frames(2..3, 5));
        assert_eq!(sent(&log), expected);
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_closed_input_runs_to_completion() {
        let source = dataset(3, 5);
        let config = auto(100.0).build(3, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let report = ReplayController::new(source, sim, config, Arc::clone(&state))
            .run()
            .await;
        listener.shutdown().await;

        assert!(state.input_closed());
        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 3 }
        ));
        assert_eq!(sent(&log), all_frames(0..3, 5));
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_quit_stops_sending_promptly() {
        let source = dataset(2, 50);
        let config = auto(10.0).build(2, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        wait_for(|| log.lock().unwrap().sent.len() == 3).await;

        tx.send("q".into()).await.unwrap();
        wait_for(|| state.stop_requested()).await;
        let stopped_at = std::time::Instant::now();
        let sent_at_stop = log.lock().unwrap().sent.len();

        let report = run.await.unwrap();
        assert!(stopped_at.elapsed() < Duration::from_millis(250));
        listener.shutdown().await;

        assert!(matches!(
            report.result,
            RunResult::StoppedByUser { last_episode: 0 }
        ));
        assert!(report.result.is_success());
        let log = log.lock().unwrap();
        assert_eq!(log.sent.len(), sent_at_stop);
        assert_eq!(log.disconnects, 1);
        assert_eq!(state.phase(), Phase::Stopped);
    }

    #[tokio::test]
    async fn test_quit_while_paused() {
        let source = dataset(1, 20);
        let config = auto(50.0).build(1, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        state.set_paused(true);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        wait_for(|| state.phase() == Phase::Paused).await;
        state.request_stop();

        let report = tokio::time::timeout(Duration::from_millis(500), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.result, RunResult::StoppedByUser { .. }));
        assert!(log.lock().unwrap().sent.is_empty());
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_never_plays() {
        let source = dataset(2, 5);
        let config = auto(100.0).build(2, None).unwrap();
        let sim = SimulatedGateway::new().refuse_connect();
        let log = sim.log();
        let state = ReplayState::new();

        let report = ReplayController::new(source, sim, config, Arc::clone(&state))
            .run()
            .await;

        assert!(matches!(
            report.result,
            RunResult::Failed {
                episode: None,
                frame: None,
                cause: ReplayFailure::Connect(_)
            }
        ));
        let log = log.lock().unwrap();
        assert_eq!(log.send_attempts, 0);
        assert_eq!(log.disconnects, 0);
        assert_eq!(report.summary.attempted, 0);
        assert_eq!(state.phase(), Phase::Failed);
    }

    #[tokio::test]
    async fn test_bad_episode_data_fails_before_sending_it() {
        let source = MemorySource::new(
            vec!["episode".into(), "frame".into()],
            vec![
                vec![vec![0.0, 0.0], vec![0.0, 1.0]],
                vec![vec![1.0, 0.0], vec![1.0]],
            ],
        );
        let config = auto(200.0).build(2, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();

        let report = ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        assert!(matches!(
            report.result,
            RunResult::Failed {
                episode: Some(1),
                frame: None,
                cause: ReplayFailure::Source(SourceError::SchemaMismatch { .. })
            }
        ));
        assert_eq!(sent(&log), all_frames(0..1, 2));
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_skip_abandons_current_episode_only() {
        let source = dataset(2, 20);
        let config = auto(50.0).build(2, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        wait_for(|| log.lock().unwrap().sent.len() == 3).await;
        tx.send("s".into()).await.unwrap();

        let report = run.await.unwrap();
        listener.shutdown().await;

        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 1 }
        ));
        assert_eq!(report.summary.skipped, 1);
        let frames = sent(&log);
        let first: Vec<_> = frames.iter().filter(|(e, _)| *e == 0).collect();
        assert!(first.len() < 20);
        assert_eq!(
            frames.iter().filter(|(e, _)| *e == 1).count(),
            20,
            "next episode must play in full"
        );
    }

    #[tokio::test]
    async fn test_send_timeout_is_a_failure() {
        let source = dataset(1, 3);
        let config = auto(100.0)
            .send_timeout(Some(Duration::from_millis(50)))
            .build(1, None)
            .unwrap();
        let sim = SimulatedGateway::new().with_latency(Duration::from_millis(300));
        let log = sim.log();

        let report = ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        assert!(matches!(
            report.result,
            RunResult::Failed {
                episode: Some(0),
                frame: Some(0),
                cause: ReplayFailure::Send(SendError::Timeout(_))
            }
        ));
        // The hung send still owns the device; disconnect follows it.
        wait_for(|| log.lock().unwrap().disconnects == 1).await;
    }

    #[tokio::test]
    async fn test_reset_goes_through_the_gateway() {
        let source = dataset(1, 30);
        let home = vec![("pan".to_string(), 0.0), ("lift".to_string(), -90.0)];
        let config = auto(50.0)
            .home_position(home.clone())
            .settle_time(Duration::from_millis(200))
            .build(1, None)
            .unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        wait_for(|| log.lock().unwrap().sent.len() == 5).await;
        tx.send("r".into()).await.unwrap();

        let report = run.await.unwrap();
        listener.shutdown().await;
        assert!(matches!(report.result, RunResult::Completed { .. }));

        let home = Frame::from_pairs(home).unwrap();
        let log = log.lock().unwrap();
        let at: Vec<usize> = (0..log.sent.len())
            .filter(|&i| log.sent[i] == home)
            .collect();
        assert_eq!(at.len(), 1);
        assert_eq!(sent_frames_without(&log, &home), all_frames(0..1, 30));
        // Nothing reached the device while it settled.
        let i = at[0];
        assert!(log.sent_at[i + 1] - log.sent_at[i] >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_reset_with_default_settle_keeps_playing() {
        // Settle (2s) outlasts the send timeout (1s); frames queue behind it.
        let source = dataset(1, 40);
        let home = vec![("pan".to_string(), 0.0), ("lift".to_string(), -90.0)];
        let config = ReplayConfig::builder()
            .fps(20.0)
            .home_position(home.clone())
            .build(1, None)
            .unwrap();
        assert!(config.settle_time > config.send_timeout.unwrap());
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        wait_for(|| log.lock().unwrap().sent.len() == 5).await;
        tx.send("r".into()).await.unwrap();

        let report = run.await.unwrap();
        listener.shutdown().await;
        assert!(
            matches!(report.result, RunResult::Completed { episodes_played: 1 }),
            "unexpected result: {}",
            report.result
        );

        let home = Frame::from_pairs(home).unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.sent.iter().filter(|f| **f == home).count(), 1);
        assert_eq!(sent_frames_without(&log, &home), all_frames(0..1, 40));
        assert_eq!(log.send_attempts, 41);
    }

    #[tokio::test]
    async fn test_skip_after_last_frame_spares_next_episode() {
        let source = dataset(2, 5);
        let config = auto(10.0).build(2, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        // Frame 4 is out; the episode is in its trailing sleep.
        wait_for(|| log.lock().unwrap().sent.len() == 5).await;
        tx.send("s".into()).await.unwrap();

        let report = run.await.unwrap();
        listener.shutdown().await;

        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 2 }
        ));
        assert_eq!(report.summary.skipped, 0);
        assert_eq!(sent(&log), all_frames(0..2, 5));
    }

    #[tokio::test]
    async fn test_skip_between_episodes_is_ignored() {
        let source = dataset(2, 3);
        let config = auto(100.0).episode_delay(0.3).build(2, None).unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());
        wait_for(|| state.phase() == Phase::BetweenEpisodes).await;
        state.request_skip();

        let report = run.await.unwrap();
        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 2 }
        ));
        assert_eq!(report.summary.skipped, 0);
        assert_eq!(sent(&log), all_frames(0..2, 3));
    }

    fn sent_frames_without(log: &SimulatedLog, skip: &Frame) -> Vec<(usize, usize)> {
        log.sent.iter().filter(|f| *f != skip).map(coords).collect()
    }

    #[tokio::test]
    async fn test_home_on_exit_runs_before_disconnect() {
        let source = dataset(1, 2);
        let home = vec![("pan".to_string(), 0.0)];
        let config = auto(200.0)
            .home_position(home.clone())
            .home_on_exit(true)
            .settle_time(Duration::from_millis(10))
            .build(1, None)
            .unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();

        ReplayController::new(source, sim, config, ReplayState::new())
            .run()
            .await;

        let log = log.lock().unwrap();
        assert_eq!(log.sent.len(), 3);
        assert_eq!(log.sent.last(), Some(&Frame::from_pairs(home).unwrap()));
        assert_eq!(log.disconnects, 1);
    }

    #[tokio::test]
    async fn test_confirm_holds_each_episode() {
        let source = dataset(2, 2);
        let config = auto(200.0)
            .confirm_each_episode(true)
            .build(2, None)
            .unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();
        let (tx, rx) = mpsc::channel(4);
        let listener = CommandListener::spawn(Arc::clone(&state), rx);

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());

        wait_for(|| state.phase() == Phase::Paused).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sent(&log).is_empty());
        tx.send("n".into()).await.unwrap();

        wait_for(|| sent(&log).len() == 2 && state.phase() == Phase::Paused).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sent(&log), all_frames(0..1, 2));
        tx.send("n".into()).await.unwrap();

        let report = run.await.unwrap();
        listener.shutdown().await;
        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 2 }
        ));
        assert_eq!(sent(&log), all_frames(0..2, 2));
    }

    #[tokio::test]
    async fn test_manual_advance_holds_while_paused() {
        let source = dataset(2, 2);
        let config = ReplayConfig::builder()
            .fps(200.0)
            .auto_advance(false)
            .build(2, None)
            .unwrap();
        let sim = SimulatedGateway::new();
        let log = sim.log();
        let state = ReplayState::new();

        let run = tokio::spawn(ReplayController::new(source, sim, config, Arc::clone(&state)).run());

        wait_for(|| state.phase() == Phase::BetweenEpisodes).await;
        state.set_paused(true);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sent(&log), all_frames(0..1, 2));

        state.resume();
        let report = run.await.unwrap();
        assert!(matches!(
            report.result,
            RunResult::Completed { episodes_played: 2 }
        ));
        assert_eq!(sent(&log), all_frames(0..2, 2));
    }

    #[test]
    fn test_result_display() {
        let failed = RunResult::Failed {
            episode: Some(1),
            frame: Some(3),
            cause: SendError::NotConnected.into(),
        };
        assert_eq!(
            failed.to_string(),
            "failed at episode 1 frame 3: actuator is not connected"
        );
        let summary = RunSummary {
            requested: 3,
            attempted: 2,
            completed: 1,
            skipped: 0,
            failed: 1,
        };
        assert_eq!(
            summary.to_string(),
            "1 of 3 episodes completed (2 attempted, 0 skipped, 1 failed)"
        );
    }
}
