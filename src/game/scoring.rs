//! Kill-streak scoring tables and streak notifications

use serde::{Deserialize, Serialize};

use crate::game::constants::scoring::{FILL_AGENT_STREAK_BONUS, PLAYER_STREAK_BONUS};

/// What kind of participant was eliminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KillKind {
    Player,
    FillAgent,
}

/// Streak bonus for the `streak`-th consecutive kill (streak >= 1).
/// A streak of 0 earns nothing.
pub fn streak_bonus(kind: KillKind, streak: u32) -> u32 {
    if streak == 0 {
        return 0;
    }
    let table = match kind {
        KillKind::Player => &PLAYER_STREAK_BONUS,
        KillKind::FillAgent => &FILL_AGENT_STREAK_BONUS,
    };
    let index = (streak as usize - 1).min(table.len() - 1);
    table[index]
}

/// Total score for one kill: flat base plus streak bonus
pub fn kill_score(kind: KillKind, streak: u32, base: u32) -> u32 {
    base.saturating_add(streak_bonus(kind, streak))
}

/// Notification text emitted when a streak crosses a threshold
pub fn streak_notification(streak: u32) -> Option<&'static str> {
    match streak {
        2 => Some("Double Kill"),
        3 => Some("Triple Kill"),
        4 => Some("Killing Spree"),
        5 => Some("God Like"),
        _ => None,
    }
}
