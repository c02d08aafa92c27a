//! Match result and ranking
//!
//! Computes the final leaderboard once the match has ended.

use crate::game::state::{PlayerId, PlayerRecord};

/// Final leaderboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub winner: Option<PlayerId>,
    pub rankings: Vec<PlayerRanking>,
    pub total_kills: u32,
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRanking {
    pub identity: PlayerId,
    pub rank: u32,
    pub score: u32,
    pub kills: u32,
}

impl MatchOutcome {
    /// Plain-text leaderboard, one line per player
    pub fn render(&self) -> String {
        self.rankings
            .iter()
            .map(|r| format!("{}. {}  score {}  kills {}", r.rank, r.identity, r.score, r.kills))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Rank players by score (desc), then kills (desc)
pub fn determine_result<'a>(
    records: impl IntoIterator<Item = (&'a PlayerId, &'a PlayerRecord)>,
) -> MatchOutcome {
    let mut rankings: Vec<PlayerRanking> = records
        .into_iter()
        .map(|(identity, record)| PlayerRanking {
            identity: identity.clone(),
            rank: 0,
            score: record.score,
            kills: record.kills,
        })
        .collect();

    // Identity as last key keeps equal rows in a stable order on every peer
    rankings.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.kills.cmp(&a.kills))
            .then_with(|| a.identity.cmp(&b.identity))
    });

    for (i, ranking) in rankings.iter_mut().enumerate() {
        ranking.rank = (i + 1) as u32;
    }

    let total_kills = rankings.iter().map(|r| r.kills).sum();
    let winner = rankings.first().map(|r| r.identity.clone());

    MatchOutcome {
        winner,
        rankings,
        total_kills,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_ranking_score_then_kills() {
        let mut records = BTreeMap::new();
        records.insert(PlayerId::from("A"), PlayerRecord::new(300, 3));
        records.insert(PlayerId::from("B"), PlayerRecord::new(300, 5));
        records.insert(PlayerId::from("C"), PlayerRecord::new(100, 10));

        let result = determine_result(&records);

        let order: Vec<_> = result.rankings.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(order, vec!["B", "A", "C"]);
        assert_eq!(result.winner, Some(PlayerId::from("B")));
        assert_eq!(result.rankings[2].rank, 3);
        assert_eq!(result.total_kills, 18);
    }

    #[test]
    fn test_empty_match() {
        let records: BTreeMap<PlayerId, PlayerRecord> = BTreeMap::new();
        let result = determine_result(&records);
        assert!(result.winner.is_none());
        assert!(result.rankings.is_empty());
    }

    #[test]
    fn test_render() {
        let mut records = BTreeMap::new();
        records.insert(PlayerId::from("A"), PlayerRecord::new(10, 1));

        assert_eq!(determine_result(&records).render(), "1. A  score 10  kills 1");
    }
}
