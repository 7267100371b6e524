//! Dose commands and their wire encoding.
//!
//! Wire shape, one JSON object per message:
//! `{"type":"dose_servo","pond_id":1,"rounds":[4,0]}` or
//! `{"type":"dose_pump","pond_id":1,"durations":[4,3]}`.

use serde::{Deserialize, Serialize};

/// Which actuator family a command drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Servo powder dispensers, magnitudes are rounds.
    Powder,
    /// Liquid pumps, magnitudes are seconds.
    Liquid,
}

/// A command for the pond's dosing controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DoseCommand {
    /// Rotate powder servos the given number of rounds per channel.
    #[serde(rename = "dose_servo")]
    Powder {
        /// Target pond.
        pond_id: i64,
        /// Rounds per powder channel.
        rounds: Vec<u32>,
    },
    /// Run liquid pumps for the given seconds per channel.
    #[serde(rename = "dose_pump")]
    Liquid {
        /// Target pond.
        pond_id: i64,
        /// Seconds per liquid channel.
        durations: Vec<u32>,
    },
}

impl DoseCommand {
    /// Build a command of `kind` for `pond_id`.
    pub fn new(kind: CommandKind, pond_id: i64, magnitudes: Vec<u32>) -> Self {
        match kind {
            CommandKind::Powder => Self::Powder {
                pond_id,
                rounds: magnitudes,
            },
            CommandKind::Liquid => Self::Liquid {
                pond_id,
                durations: magnitudes,
            },
        }
    }

    /// The actuator family.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Powder { .. } => CommandKind::Powder,
            Self::Liquid { .. } => CommandKind::Liquid,
        }
    }

    /// The target pond.
    pub fn pond_id(&self) -> i64 {
        match self {
            Self::Powder { pond_id, .. } | Self::Liquid { pond_id, .. } => *pond_id,
        }
    }

    /// Per-channel magnitudes (rounds or seconds).
    pub fn magnitudes(&self) -> &[u32] {
        match self {
            Self::Powder { rounds, .. } => rounds,
            Self::Liquid { durations, .. } => durations,
        }
    }

    /// True when every channel is zero; such commands are never published.
    pub fn is_noop(&self) -> bool {
        self.magnitudes().iter().all(|&m| m == 0)
    }

    /// Serialize to the canonical wire message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a wire message.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown types, missing fields, or negative
    /// magnitudes.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
