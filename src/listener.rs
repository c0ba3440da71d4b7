//! Background operator command listener.
//!
//! The listener turns input lines into [`ReplayState`] transitions while the
//! controller plays frames. It never touches the actuator itself: a reset is
//! only queued here and carried out by the homing worker through the shared
//! gateway.
//!
//! # Example
//!
//! ```no_run
//! use reprise::listener::{stdin_lines, CommandListener};
//! use reprise::state::ReplayState;
//!
//! # async fn example() {
//! let state = ReplayState::new();
//! let listener = CommandListener::spawn(state.clone(), stdin_lines());
//! // ... run playback ...
//! listener.shutdown().await;
//! # }
//! ```

use std::io::BufRead;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, HELP};
use crate::state::ReplayState;

/// Outcome of one command, reported back to the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Paused,
    Resumed,
    Continuing,
    AlreadyPlaying,
    Skipping,
    Stopping,
    ResetQueued,
    Help,
    Unknown(String),
}

/// Apply one command to the shared state.
pub fn apply(state: &ReplayState, command: &Command) -> Reply {
    match command {
        Command::Pause => {
            if state.toggle_paused() {
                Reply::Paused
            } else {
                Reply::Resumed
            }
        }
        Command::Resume => {
            if state.resume() {
                Reply::Resumed
            } else {
                Reply::AlreadyPlaying
            }
        }
        Command::Next => {
            if state.resume() {
                Reply::Continuing
            } else {
                Reply::AlreadyPlaying
            }
        }
        Command::Skip => {
            state.request_skip();
            Reply::Skipping
        }
        Command::Quit => {
            state.request_stop();
            Reply::Stopping
        }
        Command::Reset => {
            state.request_reset();
            Reply::ResetQueued
        }
        Command::Help => Reply::Help,
        Command::Unknown(text) => Reply::Unknown(text.clone()),
    }
}

fn report(reply: &Reply) {
    match reply {
        Reply::Paused => tracing::info!("Replay paused"),
        Reply::Resumed => tracing::info!("Replay resumed"),
        Reply::Continuing => tracing::info!("Continuing playback"),
        Reply::AlreadyPlaying => tracing::info!("Already playing, use 'p' to pause first"),
        Reply::Skipping => tracing::info!("Skipping current episode..."),
        Reply::Stopping => tracing::info!("Stopping replay..."),
        Reply::ResetQueued => tracing::info!("Resetting robot to home position..."),
        Reply::Help => println!("\n{}\n", HELP),
        Reply::Unknown(text) => {
            tracing::warn!("Unknown command {:?}. Type 'h' for help.", text)
        }
    }
}

/// Handle to the running listener task.
pub struct CommandListener {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CommandListener {
    /// Start listening. A closed `lines` channel is end of input.
    pub fn spawn(state: Arc<ReplayState>, lines: mpsc::Receiver<String>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            listen(state, lines, token).await;
        });
        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the listener to exit and wait until it has.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Command listener ended abnormally: {}", e);
        }
    }
}

async fn listen(
    state: Arc<ReplayState>,
    mut lines: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            tracing::debug!("Operator input closed");
            state.mark_input_closed();
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = Command::parse(&line);
        tracing::debug!("Operator command: {}", command);
        report(&apply(&state, &command));

        if state.stop_requested() {
            break;
        }
    }
}

/// Forward stdin lines from a dedicated thread.
///
/// Reads block on the OS thread, never on the runtime; the thread ends at
/// end of input or once the receiver is dropped (checked on the next line).
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Operator input error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
