use std::time::Duration;

use crate::game::constants::{population, scoring, timing};

/// Match configuration shared by every peer in a session
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Total occupancy (real players + fill agents) the room aims for
    pub total_slots: usize,
    /// Maximum real players admitted by the room
    pub max_real_players: usize,
    /// Countdown length when the authority starts a match
    pub match_duration_secs: f32,
    /// Flat score added to every confirmed kill before the streak bonus
    pub kill_base_score: u32,
    /// Delay between election and running the recovery procedure
    pub recovery_settle: Duration,
    /// Full ledger/clock/phase re-broadcast interval
    pub resync_interval: Duration,
    /// Population safety-net reconciliation interval
    pub population_safety_interval: Duration,
    /// Spacing between consecutive spawn requests
    pub inter_spawn_delay: Duration,
    /// Delay before acting on a fill-agent respawn request
    pub agent_respawn_delay: Duration,
    /// How often the authority broadcasts the countdown value
    pub clock_sync_interval: Duration,
    /// Time spent in Ending before the authority finalizes the match
    pub ending_settle: Duration,
    /// Extra wait on followers before computing the final ranking
    pub follower_leaderboard_delay: Duration,
    /// Capacity of the shared chat/message log
    pub message_log_capacity: usize,
    /// Capacity of the deduplication filter
    pub dedup_capacity: usize,
    /// Reconnection attempts before giving up
    pub reconnect_attempts: u32,
    /// Wait between reconnection attempts
    pub reconnect_interval: Duration,
    /// Per-peer tick rate in Hz
    pub tick_rate: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            total_slots: population::TOTAL_SLOTS,
            max_real_players: population::MAX_REAL_PLAYERS,
            match_duration_secs: timing::MATCH_DURATION_SECS,
            kill_base_score: scoring::KILL_BASE,
            recovery_settle: Duration::from_millis(timing::RECOVERY_SETTLE_MS),
            resync_interval: Duration::from_millis(timing::RESYNC_INTERVAL_MS),
            population_safety_interval: Duration::from_millis(timing::POPULATION_SAFETY_MS),
            inter_spawn_delay: Duration::from_millis(timing::INTER_SPAWN_DELAY_MS),
            agent_respawn_delay: Duration::from_millis(timing::AGENT_RESPAWN_DELAY_MS),
            clock_sync_interval: Duration::from_millis(timing::CLOCK_SYNC_MS),
            ending_settle: Duration::from_millis(timing::ENDING_SETTLE_MS),
            follower_leaderboard_delay: Duration::from_millis(timing::FOLLOWER_LEADERBOARD_DELAY_MS),
            message_log_capacity: scoring::MESSAGE_LOG_CAPACITY,
            dedup_capacity: scoring::DEDUP_CAPACITY,
            reconnect_attempts: timing::RECONNECT_ATTEMPTS,
            reconnect_interval: Duration::from_millis(timing::RECONNECT_INTERVAL_MS),
            tick_rate: timing::TICK_RATE,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

impl MatchConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(slots) = env_parse::<usize>("TOTAL_SLOTS") {
            if slots > 0 && slots <= 64 {
                config.total_slots = slots;
            } else {
                tracing::warn!("TOTAL_SLOTS must be 1-64, using default");
            }
        }

        if let Some(max) = env_parse::<usize>("MAX_REAL_PLAYERS") {
            config.max_real_players = max;
        }

        if let Some(secs) = env_parse::<f32>("MATCH_DURATION_SECS") {
            if secs.is_finite() && secs > 0.0 {
                config.match_duration_secs = secs;
            } else {
                tracing::warn!("MATCH_DURATION_SECS must be > 0, using default");
            }
        }

        if let Some(base) = env_parse::<u32>("KILL_BASE_SCORE") {
            config.kill_base_score = base;
        }

        if let Some(settle) = env_millis("RECOVERY_SETTLE_MS") {
            config.recovery_settle = settle;
        }
        if let Some(resync) = env_millis("RESYNC_INTERVAL_MS") {
            config.resync_interval = resync;
        }
        if let Some(safety) = env_millis("POPULATION_SAFETY_INTERVAL_MS") {
            config.population_safety_interval = safety;
        }
        if let Some(delay) = env_millis("INTER_SPAWN_DELAY_MS") {
            config.inter_spawn_delay = delay;
        }
        if let Some(delay) = env_millis("AGENT_RESPAWN_DELAY_MS") {
            config.agent_respawn_delay = delay;
        }
        if let Some(interval) = env_millis("CLOCK_SYNC_INTERVAL_MS") {
            config.clock_sync_interval = interval;
        }
        if let Some(settle) = env_millis("ENDING_SETTLE_MS") {
            config.ending_settle = settle;
        }

        if let Some(capacity) = env_parse::<usize>("DEDUP_CAPACITY") {
            config.dedup_capacity = capacity;
        }

        if let Some(attempts) = env_parse::<u32>("RECONNECT_ATTEMPTS") {
            config.reconnect_attempts = attempts;
        }
        if let Some(interval) = env_millis("RECONNECT_INTERVAL_MS") {
            config.reconnect_interval = interval;
        }

        if let Some(rate) = env_parse::<u32>("TICK_RATE") {
            if rate > 0 && rate <= 240 {
                config.tick_rate = rate;
            } else {
                tracing::warn!("TICK_RATE must be 1-240, using default");
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.total_slots == 0 {
            return Err("total_slots must be at least 1".to_string());
        }
        if self.max_real_players > self.total_slots {
            return Err("max_real_players cannot exceed total_slots".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.dedup_capacity == 0 {
            return Err("dedup_capacity must be at least 1".to_string());
        }
        if self.message_log_capacity == 0 {
            return Err("message_log_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    /// Fixed tick length derived from the tick rate
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MatchConfig::default();
        assert_eq!(config.total_slots, 6);
        assert_eq!(config.resync_interval, Duration::from_secs(5));
        assert_eq!(config.recovery_settle, Duration::from_secs(1));
        assert_eq!(config.inter_spawn_delay, Duration::from_millis(500));
        assert_eq!(config.message_log_capacity, 10);
        assert_eq!(config.reconnect_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = MatchConfig::load_or_default();
        assert!(config.total_slots > 0);
    }

    #[test]
    fn test_validate_rejects_too_many_real_players() {
        let config = MatchConfig {
            max_real_players: 7,
            ..MatchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_duration() {
        let config = MatchConfig {
            tick_rate: 20,
            ..MatchConfig::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(50));
    }
}
