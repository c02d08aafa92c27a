/// Room occupancy constants
pub mod population {
    /// Total participants (real + fill agents) the room is topped up to
    pub const TOTAL_SLOTS: usize = 6;
    /// Maximum number of real players allowed in a room
    pub const MAX_REAL_PLAYERS: usize = 6;
}

/// Scoring constants
pub mod scoring {
    /// Flat score for any confirmed kill, added before the streak bonus
    pub const KILL_BASE: u32 = 100;
    /// Streak bonus for player kills, indexed by streak - 1 (last entry repeats)
    pub const PLAYER_STREAK_BONUS: [u32; 5] = [10, 15, 25, 40, 60];
    /// Streak bonus for fill-agent kills (discounted)
    pub const FILL_AGENT_STREAK_BONUS: [u32; 5] = [5, 8, 12, 20, 30];
    /// Shared chat/message log capacity
    pub const MESSAGE_LOG_CAPACITY: usize = 10;
    /// Deduplication filter capacity (oldest fingerprints evicted beyond this)
    pub const DEDUP_CAPACITY: usize = 4096;
}

/// Timing constants (milliseconds unless stated)
pub mod timing {
    /// Default countdown length in seconds
    pub const MATCH_DURATION_SECS: f32 = 300.0;
    /// Settle window before the recovery procedure runs
    pub const RECOVERY_SETTLE_MS: u64 = 1000;
    /// Full resync interval
    pub const RESYNC_INTERVAL_MS: u64 = 5000;
    /// Population safety-net tick
    pub const POPULATION_SAFETY_MS: u64 = 5000;
    /// Delay between consecutive spawn requests
    pub const INTER_SPAWN_DELAY_MS: u64 = 500;
    /// Delay before a fill-agent respawn request is acted on
    pub const AGENT_RESPAWN_DELAY_MS: u64 = 2000;
    /// Countdown broadcast interval
    pub const CLOCK_SYNC_MS: u64 = 1000;
    /// Ending -> Ended settle delay on the authority
    pub const ENDING_SETTLE_MS: u64 = 2000;
    /// Additional wait on followers before showing the final ranking
    pub const FOLLOWER_LEADERBOARD_DELAY_MS: u64 = 1000;
    /// Reconnection attempts before reporting failure
    pub const RECONNECT_ATTEMPTS: u32 = 5;
    /// Wait between reconnection attempts
    pub const RECONNECT_INTERVAL_MS: u64 = 2000;
    /// Per-peer tick rate in Hz
    pub const TICK_RATE: u32 = 30;
}
