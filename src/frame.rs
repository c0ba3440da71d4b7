//! Named actuator targets.
//!
//! A [`ChannelSchema`] is the ordered list of actuator channels (one per
//! joint) for an action space. It is validated once, when an episode is
//! loaded, and then shared by every [`Frame`] of that episode.
//!
//! # Example
//!
//! ```
//! use reprise::frame::{ChannelSchema, Frame};
//!
//! let schema = ChannelSchema::new(["shoulder_pan.pos", "gripper.pos"]).unwrap();
//! let frame = Frame::new(schema.clone(), vec![12.5, 0.0]).unwrap();
//! assert_eq!(frame.get("gripper.pos"), Some(0.0));
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::SourceError;

/// Ordered, duplicate-free set of channel names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSchema {
    names: Arc<[String]>,
}

impl ChannelSchema {
    /// Validate and build a schema.
    pub fn new<I, S>(names: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(SourceError::EmptySchema);
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(SourceError::DuplicateChannel(name.clone()));
            }
        }
        Ok(Self {
            names: names.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Position of a channel in the schema.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// One timestep of named targets, aligned positionally with its schema.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    schema: ChannelSchema,
    values: Vec<f64>,
}

impl Frame {
    /// Pair a value vector with its schema.
    ///
    /// Fails with [`SourceError::SchemaMismatch`] when the lengths differ.
    pub fn new(schema: ChannelSchema, values: Vec<f64>) -> Result<Self, SourceError> {
        if values.len() != schema.len() {
            return Err(SourceError::SchemaMismatch {
                expected: schema.len(),
                actual: values.len(),
            });
        }
        Ok(Self { schema, values })
    }

    /// Build a frame from `(name, value)` pairs, taking the schema from the
    /// pair order.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (names, values): (Vec<String>, Vec<f64>) =
            pairs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        Self::new(ChannelSchema::new(names)?, values)
    }

    pub fn schema(&self) -> &ChannelSchema {
        &self.schema
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Target value for a channel.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.index_of(name).map(|i| self.values[i])
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:.2}", name, value)?;
        }
        write!(f, "]")
    }
}

const SO101_HOME: [(&str, f64); 6] = [
    ("shoulder_pan", 0.0),
    ("shoulder_lift", -90.0),
    ("elbow_flex", 90.0),
    ("wrist_flex", 0.0),
    ("wrist_roll", 0.0),
    ("gripper", 0.0),
];

/// Safe resting posture for a single SO101 follower (degrees).
pub fn so101_home() -> Vec<(String, f64)> {
    SO101_HOME
        .iter()
        .map(|(joint, value)| (format!("{}.pos", joint), *value))
        .collect()
}

/// Safe resting posture for a bimanual SO101 follower (degrees).
pub fn bi_so101_home() -> Vec<(String, f64)> {
    ["left", "right"]
        .iter()
        .flat_map(|side| {
            SO101_HOME
                .iter()
                .map(move |(joint, value)| (format!("{}_{}.pos", side, joint), *value))
        })
        .collect()
}
