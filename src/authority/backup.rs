//! Per-tick in-memory backup of canonical state
//!
//! Overwritten every authority tick and never transmitted. Only useful when
//! the same process is elected again before any other peer has written;
//! demotion discards it.

use std::time::Duration;

use crate::game::ledger::PlayerStatsLedger;
use crate::game::state::{AgentId, MatchClock, MatchPhase, PlayerId, PlayerRecord, Position};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalBackup {
    pub records: Vec<(PlayerId, PlayerRecord)>,
    pub streaks: Vec<(PlayerId, u32)>,
    pub clock: MatchClock,
    pub phase: MatchPhase,
    pub agent_positions: Vec<(AgentId, Position)>,
    /// Session time the backup was taken at
    pub captured_at: Duration,
}

impl LocalBackup {
    pub fn capture(
        ledger: &PlayerStatsLedger,
        clock: MatchClock,
        phase: MatchPhase,
        agent_positions: Vec<(AgentId, Position)>,
        captured_at: Duration,
    ) -> Self {
        let mut records: Vec<_> = ledger
            .get_all()
            .iter()
            .map(|(id, record)| (id.clone(), *record))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));

        let mut streaks: Vec<_> = ledger
            .streaks()
            .iter()
            .filter(|(_, streak)| **streak > 0)
            .map(|(id, streak)| (id.clone(), *streak))
            .collect();
        streaks.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            records,
            streaks,
            clock,
            phase,
            agent_positions,
            captured_at,
        }
    }
}
