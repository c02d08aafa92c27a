//! Peer-to-peer remote calls and their bincode wire encoding
//!
//! Requests flow from followers to the authority; everything else is an
//! authority broadcast that followers fold into their mirror.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::dedup::{EventFingerprint, VictimHandle};
use crate::game::state::{MatchPhase, PlayerId, Position};

/// Who a remote call is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Every peer, including the sender
    All,
    /// Every peer except the sender
    Others,
    /// Whichever peer currently holds authority
    Authority,
    /// One specific peer
    Peer(PlayerId),
}

/// Remote calls exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchEvent {
    // === Requests (follower -> authority) ===
    /// A confirmed kill, idempotent under retransmission
    ReportKill { actor: PlayerId, victim: VictimHandle },
    /// Signed score adjustment with an idempotency key
    ReportScoreDelta {
        actor: PlayerId,
        amount: i64,
        request_id: Uuid,
    },
    /// The identity was eliminated; its kill streak resets
    ReportElimination { identity: PlayerId },
    /// A fill agent died; capacity may have opened up
    RequestAgentRespawn { last_death_position: Position },

    // === Authority broadcasts ===
    /// Authoritative post-mutation tuple for one identity
    StatsUpdated {
        identity: PlayerId,
        score: u32,
        kills: u32,
    },
    /// A mutation was applied; followers remember its fingerprint so a
    /// later authority keeps absorbing retransmissions of it
    EventApplied { fingerprint: EventFingerprint },
    /// Countdown value
    ClockSync { remaining_seconds: f32 },
    /// Lifecycle transition
    PhaseChanged { phase: MatchPhase },
    /// Line for the shared message log
    ChatMessage { text: String },
    /// Current occupancy after a reconciliation
    RosterCounts { real_players: u32, fill_agents: u32 },
    /// The room was reset for a new match
    MatchReset,
}

impl MatchEvent {
    /// Whether this event asks the authority to mutate canonical state
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MatchEvent::ReportKill { .. }
                | MatchEvent::ReportScoreDelta { .. }
                | MatchEvent::ReportElimination { .. }
                | MatchEvent::RequestAgentRespawn { .. }
        )
    }
}

/// Encode a message for the wire
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message from the wire
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
