//! Shared replay state.
//!
//! The controller and the command listener communicate only through
//! [`ReplayState`]. Every field lives behind one mutex, so a [`Snapshot`]
//! never mixes values from two different writes. Changes to the phase and
//! the operator flags fire a [`Notify`] so waiters wake immediately instead
//! of at the next poll tick. Progress counters are written without a
//! wake-up.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

/// Where the controller is in its run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Connecting,
    Playing,
    Paused,
    BetweenEpisodes,
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Stopped | Phase::Completed | Phase::Failed)
    }
}

#[derive(Debug, Default)]
struct Flags {
    phase: Phase,
    paused: bool,
    stop_requested: bool,
    skip_requested: bool,
    reset_requested: bool,
    input_closed: bool,
    current_episode: usize,
    current_frame: usize,
}

/// Consistent view of every field at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    pub paused: bool,
    pub stop_requested: bool,
    pub skip_requested: bool,
    pub reset_requested: bool,
    pub input_closed: bool,
    pub current_episode: usize,
    pub current_frame: usize,
}

/// Synchronized state shared by the controller and the listener.
#[derive(Debug, Default)]
pub struct ReplayState {
    flags: Mutex<Flags>,
    changed: Notify,
}

impl ReplayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut Flags) -> R) -> R {
        let result = f(&mut self.flags());
        self.changed.notify_waiters();
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        let f = self.flags();
        Snapshot {
            phase: f.phase,
            paused: f.paused,
            stop_requested: f.stop_requested,
            skip_requested: f.skip_requested,
            reset_requested: f.reset_requested,
            input_closed: f.input_closed,
            current_episode: f.current_episode,
            current_frame: f.current_frame,
        }
    }

    pub fn phase(&self) -> Phase {
        self.flags().phase
    }

    /// Record a controller transition. Written by the controller only.
    pub fn set_phase(&self, phase: Phase) {
        self.update(|f| f.phase = phase);
    }

    pub fn is_paused(&self) -> bool {
        self.flags().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.update(|f| f.paused = paused);
    }

    /// Flip `paused`, returning the new value.
    pub fn toggle_paused(&self) -> bool {
        self.update(|f| {
            f.paused = !f.paused;
            f.paused
        })
    }

    /// Clear `paused`. Returns false if playback was not paused.
    pub fn resume(&self) -> bool {
        self.update(|f| std::mem::replace(&mut f.paused, false))
    }

    pub fn stop_requested(&self) -> bool {
        self.flags().stop_requested
    }

    /// Request a stop. Sticky for the rest of the run.
    pub fn request_stop(&self) {
        self.update(|f| f.stop_requested = true);
    }

    pub fn request_skip(&self) {
        self.update(|f| f.skip_requested = true);
    }

    /// Consume a pending skip request.
    pub fn take_skip(&self) -> bool {
        std::mem::take(&mut self.flags().skip_requested)
    }

    pub fn request_reset(&self) {
        self.update(|f| f.reset_requested = true);
    }

    /// Consume a pending reset request.
    pub fn take_reset(&self) -> bool {
        std::mem::take(&mut self.flags().reset_requested)
    }

    pub fn input_closed(&self) -> bool {
        self.flags().input_closed
    }

    pub fn mark_input_closed(&self) {
        self.update(|f| f.input_closed = true);
    }

    /// Record playback progress. Written by the controller only, once per
    /// frame, without waking waiters.
    pub fn set_progress(&self, episode: usize, frame: usize) {
        let mut f = self.flags();
        f.current_episode = episode;
        f.current_frame = frame;
    }

    /// Wait until some field changes or `max_wait` elapses.
    ///
    /// Callers re-check their condition afterwards, so a spurious wake-up is
    /// harmless; `max_wait` bounds the latency if a notification is missed.
    pub async fn changed(&self, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.changed.notified()).await;
    }
}
