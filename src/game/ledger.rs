//! Player stats ledger
//!
//! The canonical identity -> (score, kills) map plus the kill-streak counters
//! that drive bonus scoring. Every mutation requires a [`WriteCapability`],
//! which only the current authority can obtain.

use hashbrown::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::authority::manager::WriteCapability;
use crate::game::dedup::{DeduplicationFilter, EventFingerprint, VictimHandle};
use crate::game::scoring::{kill_score, streak_notification, KillKind};
use crate::game::state::{PlayerId, PlayerRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Event already applied")]
    Duplicate,
    #[error("Scoring is closed in the current phase")]
    ScoringClosed,
}

/// Result of applying one confirmed kill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillOutcome {
    pub actor: PlayerId,
    pub record: PlayerRecord,
    pub streak: u32,
    pub awarded: u32,
    pub kind: KillKind,
    pub notification: Option<&'static str>,
}

#[derive(Debug)]
pub struct PlayerStatsLedger {
    records: HashMap<PlayerId, PlayerRecord>,
    streaks: HashMap<PlayerId, u32>,
    fill_agent_kills: HashMap<PlayerId, u32>,
    dedup: DeduplicationFilter,
    kill_base: u32,
}

impl PlayerStatsLedger {
    pub fn new(kill_base: u32, dedup_capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            streaks: HashMap::new(),
            fill_agent_kills: HashMap::new(),
            dedup: DeduplicationFilter::new(dedup_capacity),
            kill_base,
        }
    }

    /// Take ownership of a record map recovered from the replicated snapshot,
    /// seeded with the fingerprints the previous authority announced.
    /// Streaks start at zero.
    pub fn claim(
        records: impl IntoIterator<Item = (PlayerId, PlayerRecord)>,
        kill_base: u32,
        dedup: DeduplicationFilter,
    ) -> Self {
        Self {
            records: records.into_iter().collect(),
            streaks: HashMap::new(),
            fill_agent_kills: HashMap::new(),
            dedup,
            kill_base,
        }
    }

    /// Apply a confirmed kill attributed to `actor`.
    ///
    /// Retransmissions of the same `(victim, actor)` pair return
    /// [`LedgerError::Duplicate`] and leave the ledger untouched.
    pub fn apply_kill(
        &mut self,
        _cap: &WriteCapability,
        actor: &PlayerId,
        victim: &VictimHandle,
    ) -> Result<KillOutcome, LedgerError> {
        let fingerprint = EventFingerprint::Kill {
            victim: victim.clone(),
            actor: actor.clone(),
        };
        if !self.dedup.insert(fingerprint) {
            return Err(LedgerError::Duplicate);
        }

        let kind = match victim {
            VictimHandle::FillAgent(_) => KillKind::FillAgent,
            VictimHandle::Player { .. } => KillKind::Player,
        };

        let streak = {
            let streak = self.streaks.entry(actor.clone()).or_insert(0);
            *streak += 1;
            *streak
        };
        let awarded = kill_score(kind, streak, self.kill_base);

        if kind == KillKind::FillAgent {
            *self.fill_agent_kills.entry(actor.clone()).or_insert(0) += 1;
        }

        let record = self.records.entry(actor.clone()).or_default();
        record.kills = record.kills.saturating_add(1);
        record.score = record.score.saturating_add(awarded);

        Ok(KillOutcome {
            actor: actor.clone(),
            record: *record,
            streak,
            awarded,
            kind,
            notification: streak_notification(streak),
        })
    }

    /// Apply a signed score delta. Score never drops below zero.
    /// With a `request_id`, retransmissions are rejected as duplicates.
    pub fn apply_score_delta(
        &mut self,
        _cap: &WriteCapability,
        actor: &PlayerId,
        amount: i64,
        request_id: Option<Uuid>,
    ) -> Result<PlayerRecord, LedgerError> {
        if let Some(request_id) = request_id {
            let fingerprint = EventFingerprint::ScoreDelta {
                actor: actor.clone(),
                request_id,
            };
            if !self.dedup.insert(fingerprint) {
                return Err(LedgerError::Duplicate);
            }
        }

        let record = self.records.entry(actor.clone()).or_default();
        let updated = (i64::from(record.score) + amount).clamp(0, i64::from(u32::MAX));
        record.score = updated as u32;
        Ok(*record)
    }

    /// The actor was eliminated; its streak restarts
    pub fn record_death(&mut self, _cap: &WriteCapability, identity: &PlayerId) {
        if let Some(streak) = self.streaks.get_mut(identity) {
            *streak = 0;
        }
    }

    /// Make sure a record exists for `identity` (zeroed if new)
    pub fn ensure_player(&mut self, _cap: &WriteCapability, identity: &PlayerId) -> PlayerRecord {
        *self.records.entry(identity.clone()).or_default()
    }

    pub fn get(&self, identity: &PlayerId) -> Option<PlayerRecord> {
        self.records.get(identity).copied()
    }

    pub fn get_all(&self) -> &HashMap<PlayerId, PlayerRecord> {
        &self.records
    }

    pub fn streak(&self, identity: &PlayerId) -> u32 {
        self.streaks.get(identity).copied().unwrap_or(0)
    }

    pub fn streaks(&self) -> &HashMap<PlayerId, u32> {
        &self.streaks
    }

    /// Restore streak counters from a same-process backup
    pub fn restore_streaks(&mut self, streaks: impl IntoIterator<Item = (PlayerId, u32)>) {
        self.streaks.clear();
        self.streaks.extend(streaks);
    }

    pub fn fill_agent_kills(&self, identity: &PlayerId) -> u32 {
        self.fill_agent_kills.get(identity).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Start a fresh match: forget streaks and seen events, keep nothing
    pub fn reset(&mut self, _cap: &WriteCapability) {
        self.records.clear();
        self.streaks.clear();
        self.fill_agent_kills.clear();
        self.dedup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::AgentId;

    fn cap() -> WriteCapability {
        WriteCapability::for_tests()
    }

    fn player_victim(name: &str, life: u32) -> VictimHandle {
        VictimHandle::Player {
            identity: PlayerId::from(name),
            life,
        }
    }

    #[test]
    fn test_first_kill_creates_record() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");

        let outcome = ledger.apply_kill(&cap(), &actor, &player_victim("B", 0)).unwrap();

        assert_eq!(outcome.record, PlayerRecord::new(10, 1));
        assert_eq!(outcome.streak, 1);
        assert_eq!(outcome.notification, None);
    }

    #[test]
    fn test_streak_bonus_progression() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");

        let mut scores = Vec::new();
        for life in 0..6 {
            let outcome = ledger.apply_kill(&cap(), &actor, &player_victim("B", life)).unwrap();
            scores.push(outcome.awarded);
        }

        assert_eq!(scores, vec![10, 15, 25, 40, 60, 60]);
        assert_eq!(ledger.get(&actor), Some(PlayerRecord::new(210, 6)));
    }

    #[test]
    fn test_base_score_added() {
        let mut ledger = PlayerStatsLedger::new(100, 64);
        let actor = PlayerId::from("A");

        let outcome = ledger.apply_kill(&cap(), &actor, &player_victim("B", 0)).unwrap();

        assert_eq!(outcome.awarded, 110);
    }

    #[test]
    fn test_duplicate_kill_is_idempotent() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");
        let victim = VictimHandle::FillAgent(AgentId(3));

        ledger.apply_kill(&cap(), &actor, &victim).unwrap();
        let before = ledger.get(&actor);
        let again = ledger.apply_kill(&cap(), &actor, &victim);

        assert_eq!(again, Err(LedgerError::Duplicate));
        assert_eq!(ledger.get(&actor), before);
        assert_eq!(ledger.streak(&actor), 1);
    }

    #[test]
    fn test_fill_agent_kill_uses_discounted_table() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");

        let first = ledger.apply_kill(&cap(), &actor, &VictimHandle::FillAgent(AgentId(1))).unwrap();
        let second = ledger.apply_kill(&cap(), &actor, &VictimHandle::FillAgent(AgentId(2))).unwrap();

        assert_eq!(first.awarded, 5);
        assert_eq!(second.awarded, 8);
        assert_eq!(second.notification, Some("Double Kill"));
        assert_eq!(ledger.fill_agent_kills(&actor), 2);
    }

    #[test]
    fn test_death_resets_streak() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");

        ledger.apply_kill(&cap(), &actor, &player_victim("B", 0)).unwrap();
        ledger.apply_kill(&cap(), &actor, &player_victim("B", 1)).unwrap();
        ledger.record_death(&cap(), &actor);
        assert_eq!(ledger.streak(&actor), 0);

        let outcome = ledger.apply_kill(&cap(), &actor, &player_victim("B", 2)).unwrap();
        assert_eq!(outcome.streak, 1);
        assert_eq!(outcome.awarded, 10);
    }

    #[test]
    fn test_score_delta_clamps_at_zero() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");

        ledger.apply_score_delta(&cap(), &actor, 50, None).unwrap();
        let record = ledger.apply_score_delta(&cap(), &actor, -80, None).unwrap();

        assert_eq!(record.score, 0);
    }

    #[test]
    fn test_score_delta_request_id_dedup() {
        let mut ledger = PlayerStatsLedger::new(0, 64);
        let actor = PlayerId::from("A");
        let id = Uuid::new_v4();

        ledger.apply_score_delta(&cap(), &actor, 25, Some(id)).unwrap();
        let again = ledger.apply_score_delta(&cap(), &actor, 25, Some(id));

        assert_eq!(again, Err(LedgerError::Duplicate));
        assert_eq!(ledger.get(&actor).unwrap().score, 25);
    }

    #[test]
    fn test_claim_from_snapshot() {
        let ledger = PlayerStatsLedger::claim(
            vec![(PlayerId::from("A"), PlayerRecord::new(300, 3))],
            100,
            DeduplicationFilter::new(64),
        );

        assert_eq!(ledger.get(&PlayerId::from("A")), Some(PlayerRecord::new(300, 3)));
        assert_eq!(ledger.streak(&PlayerId::from("A")), 0);
    }

    #[test]
    fn test_claim_keeps_announced_fingerprints() {
        let actor = PlayerId::from("A");
        let victim = VictimHandle::FillAgent(AgentId(500));
        let mut announced = DeduplicationFilter::new(64);
        announced.insert(EventFingerprint::Kill {
            victim: victim.clone(),
            actor: actor.clone(),
        });

        let mut ledger = PlayerStatsLedger::claim(
            vec![(actor.clone(), PlayerRecord::new(105, 1))],
            100,
            announced,
        );

        assert_eq!(ledger.apply_kill(&cap(), &actor, &victim), Err(LedgerError::Duplicate));
        assert_eq!(ledger.get(&actor), Some(PlayerRecord::new(105, 1)));
    }

    #[test]
    fn test_interleaved_requests_match_sequential_application() {
        let a = PlayerId::from("A");
        let b = PlayerId::from("B");

        let mut interleaved = PlayerStatsLedger::new(0, 64);
        interleaved.apply_score_delta(&cap(), &a, 5, None).unwrap();
        interleaved.apply_kill(&cap(), &b, &player_victim("A", 0)).unwrap();
        interleaved.apply_score_delta(&cap(), &b, 7, None).unwrap();
        interleaved.apply_kill(&cap(), &a, &player_victim("B", 0)).unwrap();

        let mut sequential = PlayerStatsLedger::new(0, 64);
        sequential.apply_score_delta(&cap(), &a, 5, None).unwrap();
        sequential.apply_kill(&cap(), &a, &player_victim("B", 0)).unwrap();
        sequential.apply_kill(&cap(), &b, &player_victim("A", 0)).unwrap();
        sequential.apply_score_delta(&cap(), &b, 7, None).unwrap();

        assert_eq!(interleaved.get_all(), sequential.get_all());
    }
}
