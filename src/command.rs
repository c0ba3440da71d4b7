//! Operator commands.
//!
//! One line of operator input maps to one [`Command`]. Matching is
//! case-insensitive and ignores surrounding whitespace.

use std::fmt;

/// Operator intent parsed from one input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `p` / `pause`: toggle pause.
    Pause,
    /// `resume`: clear pause.
    Resume,
    /// `n` / `next`: continue if paused.
    Next,
    /// `s` / `skip`: abandon the current episode.
    Skip,
    /// `q` / `quit`: stop the run.
    Quit,
    /// `h` / `help`
    Help,
    /// `r` / `reset`: move the actuator to its home posture.
    Reset,
    /// Anything else, trimmed and lowercased.
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let cmd = line.trim().to_lowercase();
        match cmd.as_str() {
            "p" | "pause" => Command::Pause,
            "resume" => Command::Resume,
            "n" | "next" => Command::Next,
            "s" | "skip" => Command::Skip,
            "q" | "quit" => Command::Quit,
            "h" | "help" => Command::Help,
            "r" | "reset" => Command::Reset,
            _ => Command::Unknown(cmd),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Pause => write!(f, "pause"),
            Command::Resume => write!(f, "resume"),
            Command::Next => write!(f, "next"),
            Command::Skip => write!(f, "skip"),
            Command::Quit => write!(f, "quit"),
            Command::Help => write!(f, "help"),
            Command::Reset => write!(f, "reset"),
            Command::Unknown(s) => write!(f, "{:?}", s),
        }
    }
}

/// Command table shown for `help`.
pub const HELP: &str = "\
Available commands:
  h, help  - Show this help
  p, pause - Pause/resume current episode
  n, next  - Continue (move on to the next episode when paused)
  s, skip  - Skip current episode
  r, reset - Move the robot to its home position
  q, quit  - Quit replay";
