//! Projection of canonical state onto the replicated property store
//!
//! Layout:
//! - `PlayerStats`: `{ "<identity>": { "Score": n, "Kills": n }, ... }`
//! - `GameTime`: remaining seconds (float)
//! - `GameState`: phase text (`Waiting`, `InProgress`, `Ending`, `Ended`)
//! - `RealPlayerCount`, `NPCCount`, `TotalPlayers`: occupancy integers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::game::state::{MatchClock, MatchPhase, PlayerId, PlayerRecord};
use crate::net::substrate::{PropertyStore, PropertyValue};

pub mod keys {
    pub const PLAYER_STATS: &str = "PlayerStats";
    pub const GAME_TIME: &str = "GameTime";
    pub const GAME_STATE: &str = "GameState";
    pub const REAL_PLAYER_COUNT: &str = "RealPlayerCount";
    pub const NPC_COUNT: &str = "NPCCount";
    pub const TOTAL_PLAYERS: &str = "TotalPlayers";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("Malformed property {key}: {reason}")]
    Decode { key: &'static str, reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsEntry {
    #[serde(rename = "Score")]
    score: u32,
    #[serde(rename = "Kills")]
    kills: u32,
}

/// Room occupancy as published after each reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomOccupancy {
    pub real_players: u32,
    pub fill_agents: u32,
}

impl RoomOccupancy {
    pub fn new(real_players: u32, fill_agents: u32) -> Self {
        Self {
            real_players,
            fill_agents,
        }
    }

    pub fn total(&self) -> u32 {
        self.real_players + self.fill_agents
    }

    pub fn to_properties(&self) -> Vec<(String, PropertyValue)> {
        vec![
            (keys::REAL_PLAYER_COUNT.to_string(), json!(self.real_players)),
            (keys::NPC_COUNT.to_string(), json!(self.fill_agents)),
            (keys::TOTAL_PLAYERS.to_string(), json!(self.total())),
        ]
    }

    /// Read occupancy back; `None` until the authority has published it
    pub fn read(store: &dyn PropertyStore) -> Option<Self> {
        let real = store.get(keys::REAL_PLAYER_COUNT)?.as_u64()?;
        let fill = store.get(keys::NPC_COUNT)?.as_u64()?;
        Some(Self::new(real as u32, fill as u32))
    }
}

/// Durable recovery source written by the authority
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedSnapshot {
    pub players: BTreeMap<PlayerId, PlayerRecord>,
    pub clock: MatchClock,
    pub phase: MatchPhase,
    pub occupancy: RoomOccupancy,
}

/// Encode the `PlayerStats` value
pub fn player_stats_value<'a>(
    records: impl IntoIterator<Item = (&'a PlayerId, &'a PlayerRecord)>,
) -> PropertyValue {
    let entries: BTreeMap<&str, StatsEntry> = records
        .into_iter()
        .map(|(identity, record)| {
            (
                identity.as_str(),
                StatsEntry {
                    score: record.score,
                    kills: record.kills,
                },
            )
        })
        .collect();
    serde_json::to_value(entries).unwrap_or_else(|_| json!({}))
}

/// Decode the `PlayerStats` value
pub fn parse_player_stats(value: &PropertyValue) -> Result<BTreeMap<PlayerId, PlayerRecord>, SnapshotError> {
    let entries: BTreeMap<String, StatsEntry> =
        serde_json::from_value(value.clone()).map_err(|e| SnapshotError::Decode {
            key: keys::PLAYER_STATS,
            reason: e.to_string(),
        })?;
    Ok(entries
        .into_iter()
        .map(|(identity, entry)| (PlayerId(identity), PlayerRecord::new(entry.score, entry.kills)))
        .collect())
}

impl ReplicatedSnapshot {
    pub fn to_properties(&self) -> Vec<(String, PropertyValue)> {
        let mut properties = vec![
            (keys::PLAYER_STATS.to_string(), player_stats_value(&self.players)),
            (
                keys::GAME_TIME.to_string(),
                json!(self.clock.remaining_seconds),
            ),
            (keys::GAME_STATE.to_string(), json!(self.phase.as_str())),
        ];
        properties.extend(self.occupancy.to_properties());
        properties
    }

    /// Read the snapshot from the store.
    ///
    /// Returns `Ok(None)` when none of the canonical keys were ever written
    /// (first authority of the match). Missing individual keys default.
    pub fn read(store: &dyn PropertyStore) -> Result<Option<Self>, SnapshotError> {
        let stats = store.get(keys::PLAYER_STATS);
        let time = store.get(keys::GAME_TIME);
        let state = store.get(keys::GAME_STATE);

        if stats.is_none() && time.is_none() && state.is_none() {
            return Ok(None);
        }

        let players = match stats {
            Some(value) => parse_player_stats(&value)?,
            None => BTreeMap::new(),
        };

        let remaining = match time {
            Some(value) => value.as_f64().ok_or_else(|| SnapshotError::Decode {
                key: keys::GAME_TIME,
                reason: format!("expected number, got {}", value),
            })? as f32,
            None => 0.0,
        };

        let phase = match state {
            Some(value) => value
                .as_str()
                .and_then(MatchPhase::parse)
                .ok_or_else(|| SnapshotError::Decode {
                    key: keys::GAME_STATE,
                    reason: format!("unknown phase {}", value),
                })?,
            None => MatchPhase::Waiting,
        };

        Ok(Some(Self {
            players,
            clock: MatchClock::new(remaining, phase == MatchPhase::InProgress),
            phase,
            occupancy: RoomOccupancy::read(store).unwrap_or_default(),
        }))
    }
}
