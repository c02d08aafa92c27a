//! Deduplication filter for at-least-once delivered mutation events
//!
//! Holds a bounded set of event fingerprints for the lifetime of a match.
//! When full, the oldest fingerprint is evicted first.

use std::collections::VecDeque;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::state::{AgentId, PlayerId};

/// The participant a kill report refers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VictimHandle {
    /// A fill agent; ids are never reused within a session
    FillAgent(AgentId),
    /// A real player in a specific life (incremented on every respawn)
    Player { identity: PlayerId, life: u32 },
}

impl VictimHandle {
    pub fn label(&self) -> String {
        match self {
            VictimHandle::FillAgent(id) => id.to_string(),
            VictimHandle::Player { identity, .. } => identity.to_string(),
        }
    }
}

/// Composite key identifying one logical mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFingerprint {
    Kill { victim: VictimHandle, actor: PlayerId },
    ScoreDelta { actor: PlayerId, request_id: Uuid },
}

/// Bounded set of seen fingerprints
#[derive(Debug, Clone)]
pub struct DeduplicationFilter {
    seen: HashSet<EventFingerprint>,
    order: VecDeque<EventFingerprint>,
    capacity: usize,
}

impl DeduplicationFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Record a fingerprint. Returns false if it was already present.
    pub fn insert(&mut self, fingerprint: EventFingerprint) -> bool {
        if self.seen.contains(&fingerprint) {
            return false;
        }

        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }

        self.order.push_back(fingerprint.clone());
        self.seen.insert(fingerprint);
        true
    }

    pub fn contains(&self, fingerprint: &EventFingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget everything (new match)
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kill(agent: u64, actor: &str) -> EventFingerprint {
        EventFingerprint::Kill {
            victim: VictimHandle::FillAgent(AgentId(agent)),
            actor: PlayerId::from(actor),
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut filter = DeduplicationFilter::new(16);
        assert!(filter.insert(kill(1, "A")));
        assert!(!filter.insert(kill(1, "A")));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_same_victim_different_actor_is_distinct() {
        let mut filter = DeduplicationFilter::new(16);
        assert!(filter.insert(kill(1, "A")));
        assert!(filter.insert(kill(1, "B")));
    }

    #[test]
    fn test_player_lives_are_distinct() {
        let mut filter = DeduplicationFilter::new(16);
        let first = EventFingerprint::Kill {
            victim: VictimHandle::Player { identity: "V".into(), life: 0 },
            actor: "A".into(),
        };
        let second = EventFingerprint::Kill {
            victim: VictimHandle::Player { identity: "V".into(), life: 1 },
            actor: "A".into(),
        };
        assert!(filter.insert(first.clone()));
        assert!(filter.insert(second));
        assert!(!filter.insert(first));
    }

    #[test]
    fn test_oldest_evicted_at_capacity() {
        let mut filter = DeduplicationFilter::new(2);
        filter.insert(kill(1, "A"));
        filter.insert(kill(2, "A"));
        filter.insert(kill(3, "A"));

        assert_eq!(filter.len(), 2);
        assert!(!filter.contains(&kill(1, "A")));
        assert!(filter.contains(&kill(3, "A")));
    }

    #[test]
    fn test_clear() {
        let mut filter = DeduplicationFilter::new(4);
        filter.insert(kill(1, "A"));
        filter.clear();
        assert!(filter.is_empty());
        assert!(filter.insert(kill(1, "A")));
    }
}
