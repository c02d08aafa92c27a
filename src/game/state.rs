//! Canonical match data model
//!
//! Player identities, fill-agent handles, the match clock and phase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable player identity, unique per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Opaque fill-agent handle id. Ids are allocated monotonically by the
/// environment, so ordering by id is ordering by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bot-{}", self.0)
    }
}

/// World position (only carried for backups and respawn hints)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Per-player canonical statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub score: u32,
    pub kills: u32,
}

impl PlayerRecord {
    pub fn new(score: u32, kills: u32) -> Self {
        Self { score, kills }
    }
}

/// A computer-controlled participant as seen in the environment
#[derive(Debug, Clone, PartialEq)]
pub struct FillAgentHandle {
    pub id: AgentId,
    /// Owning peer; `None` means the creator disconnected (orphaned)
    pub owner: Option<PlayerId>,
    pub alive: bool,
    pub position: Position,
}

impl FillAgentHandle {
    pub fn is_orphaned(&self) -> bool {
        self.owner.is_none()
    }
}

/// Match lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchPhase {
    /// Pre-match
    #[default]
    Waiting,
    /// Clock running, scoring and population control active
    InProgress,
    /// Clock hit zero, gameplay disabled, final sync in flight
    Ending,
    /// Leaderboard finalized, disconnect pending
    Ended,
}

impl MatchPhase {
    /// Text form written to the property store
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::Waiting => "Waiting",
            MatchPhase::InProgress => "InProgress",
            MatchPhase::Ending => "Ending",
            MatchPhase::Ended => "Ended",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Waiting" => Some(MatchPhase::Waiting),
            "InProgress" => Some(MatchPhase::InProgress),
            "Ending" => Some(MatchPhase::Ending),
            "Ended" => Some(MatchPhase::Ended),
            _ => None,
        }
    }

    /// Whether kills and score deltas are accepted
    pub fn scoring_active(&self) -> bool {
        *self == MatchPhase::InProgress
    }

    /// Whether the population controller may spawn agents
    pub fn population_active(&self) -> bool {
        *self == MatchPhase::InProgress
    }
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Countdown clock, single canonical instance on the authority
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchClock {
    pub remaining_seconds: f32,
    pub active: bool,
}

impl MatchClock {
    pub fn new(remaining_seconds: f32, active: bool) -> Self {
        Self {
            remaining_seconds: remaining_seconds.max(0.0),
            active,
        }
    }

    /// Advance the countdown. Returns true the moment it reaches zero.
    pub fn advance(&mut self, dt: f32) -> bool {
        if !self.active || self.remaining_seconds <= 0.0 {
            return false;
        }
        self.remaining_seconds = (self.remaining_seconds - dt).max(0.0);
        self.remaining_seconds <= 0.0
    }

    /// Format as `MM:SS`, clamping negatives to zero
    pub fn format(&self) -> String {
        format_time(self.remaining_seconds)
    }
}

pub fn format_time(seconds: f32) -> String {
    let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
    let minutes = (seconds / 60.0).floor() as u32;
    let secs = (seconds % 60.0).floor() as u32;
    format!("{:02}:{:02}", minutes, secs)
}
