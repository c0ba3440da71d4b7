//! Recorded episode sources.
//!
//! The controller only needs positional access to recorded actions, so the
//! [`EpisodeSource`] trait is deliberately small. [`MemorySource`] holds a
//! whole dataset in memory and can be loaded from a JSON document:
//!
//! ```json
//! {
//!   "fps": 30,
//!   "channels": ["shoulder_pan.pos", "gripper.pos"],
//!   "episodes": [
//!     [[0.0, 10.0], [0.5, 10.0]],
//!     [[1.0, 12.0], [1.5, 11.0], [2.0, 10.0]]
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::SourceError;
use crate::frame::{ChannelSchema, Frame};

/// Positional access to recorded episodes.
///
/// `frame(e, f)` is aligned with `channel_names(e)`.
pub trait EpisodeSource: Send {
    /// Number of episodes in the dataset.
    fn episode_count(&self) -> usize;

    /// Number of frames in one episode.
    fn frame_count(&self, episode: usize) -> Result<usize, SourceError>;

    /// Ordered channel names of an episode's action space.
    fn channel_names(&self, episode: usize) -> Result<Vec<String>, SourceError>;

    /// Target values of one frame.
    fn frame(&self, episode: usize, frame: usize) -> Result<Vec<f64>, SourceError>;

    /// Recording rate, when the dataset knows it.
    fn fps(&self) -> Option<f64> {
        None
    }
}

/// One episode, fetched in full and validated against its schema.
#[derive(Clone, Debug)]
pub struct Episode {
    index: usize,
    schema: ChannelSchema,
    frames: Vec<Frame>,
}

impl Episode {
    /// Fetch every frame of `index` from `source`.
    pub fn load<S: EpisodeSource + ?Sized>(source: &S, index: usize) -> Result<Self, SourceError> {
        let count = source.episode_count();
        if index >= count {
            return Err(SourceError::EpisodeOutOfRange { index, count });
        }
        let schema = ChannelSchema::new(source.channel_names(index)?)?;
        let frame_count = source.frame_count(index)?;
        let frames = (0..frame_count)
            .map(|f| Frame::new(schema.clone(), source.frame(index, f)?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            index,
            schema,
            frames,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// An in-memory dataset with one schema shared by every episode.
#[derive(Clone, Debug, Deserialize)]
pub struct MemorySource {
    #[serde(default)]
    fps: Option<f64>,
    channels: Vec<String>,
    episodes: Vec<Vec<Vec<f64>>>,
}

impl MemorySource {
    pub fn new(channels: Vec<String>, episodes: Vec<Vec<Vec<f64>>>) -> Self {
        Self {
            fps: None,
            channels,
            episodes,
        }
    }

    /// Attach the rate the episodes were recorded at.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    /// Parse a JSON dataset document.
    pub fn from_json(json: &str) -> Result<Self, SourceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON dataset from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Smoothly varying demo data: `episodes` x `frames` over `channels`.
    pub fn synthetic(episodes: usize, frames: usize, channels: &[&str]) -> Self {
        let data = (0..episodes)
            .map(|e| {
                (0..frames)
                    .map(|f| {
                        (0..channels.len())
                            .map(|c| 0.1 * (c + 1) as f64 * f as f64 + 0.5 * e as f64)
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Self::new(channels.iter().map(|c| c.to_string()).collect(), data)
    }

    fn episode(&self, episode: usize) -> Result<&Vec<Vec<f64>>, SourceError> {
        self.episodes
            .get(episode)
            .ok_or(SourceError::EpisodeOutOfRange {
                index: episode,
                count: self.episodes.len(),
            })
    }
}

impl EpisodeSource for MemorySource {
    fn episode_count(&self) -> usize {
        self.episodes.len()
    }

    fn frame_count(&self, episode: usize) -> Result<usize, SourceError> {
        Ok(self.episode(episode)?.len())
    }

    fn channel_names(&self, episode: usize) -> Result<Vec<String>, SourceError> {
        self.episode(episode)?;
        Ok(self.channels.clone())
    }

    fn frame(&self, episode: usize, frame: usize) -> Result<Vec<f64>, SourceError> {
        let frames = self.episode(episode)?;
        frames
            .get(frame)
            .cloned()
            .ok_or(SourceError::FrameOutOfRange {
                episode,
                frame,
                count: frames.len(),
            })
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}
