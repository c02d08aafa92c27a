//! Match lifecycle state machine
//!
//! Waiting -> InProgress -> Ending -> Ended. Only the authority drives
//! transitions; followers mirror the phase and clock they receive.

use thiserror::Error;

use crate::authority::manager::WriteCapability;
use crate::game::state::{MatchClock, MatchPhase};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Invalid phase transition {from} -> {to}")]
    InvalidTransition { from: MatchPhase, to: MatchPhase },
}

#[derive(Debug, Clone, Default)]
pub struct MatchLifecycle {
    phase: MatchPhase,
    clock: MatchClock,
}

impl MatchLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a recovered phase and clock
    pub fn from_parts(phase: MatchPhase, clock: MatchClock) -> Self {
        let clock = MatchClock::new(clock.remaining_seconds, phase == MatchPhase::InProgress);
        Self { phase, clock }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn clock(&self) -> MatchClock {
        self.clock
    }

    fn transition(&mut self, to: MatchPhase) -> Result<(), LifecycleError> {
        let allowed = matches!(
            (self.phase, to),
            (MatchPhase::Waiting, MatchPhase::InProgress)
                | (MatchPhase::InProgress, MatchPhase::Ending)
                | (MatchPhase::Ending, MatchPhase::Ended)
                | (MatchPhase::Ended, MatchPhase::Waiting)
        );
        if !allowed {
            return Err(LifecycleError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Explicit start signal from the authority
    pub fn start(&mut self, _cap: &WriteCapability, duration_secs: f32) -> Result<(), LifecycleError> {
        self.transition(MatchPhase::InProgress)?;
        self.clock = MatchClock::new(duration_secs, true);
        Ok(())
    }

    /// Advance the countdown. Returns `Some(Ending)` on the tick the clock
    /// is found at zero, including a clock recovered already expired.
    pub fn tick(&mut self, _cap: &WriteCapability, dt: f32) -> Option<MatchPhase> {
        if self.phase != MatchPhase::InProgress {
            return None;
        }
        let expired = self.clock.advance(dt) || self.clock.remaining_seconds <= 0.0;
        if expired {
            self.clock.active = false;
            self.phase = MatchPhase::Ending;
            return Some(MatchPhase::Ending);
        }
        None
    }

    /// Ending -> Ended once the settle delay has elapsed
    pub fn finalize(&mut self, _cap: &WriteCapability) -> Result<(), LifecycleError> {
        self.transition(MatchPhase::Ended)
    }

    /// Ended -> Waiting for a new match in the same room
    pub fn reset(&mut self, _cap: &WriteCapability) -> Result<(), LifecycleError> {
        self.transition(MatchPhase::Waiting)?;
        self.clock = MatchClock::default();
        Ok(())
    }

    /// Mirror a phase broadcast by the authority
    pub fn mirror_phase(&mut self, phase: MatchPhase) {
        self.phase = phase;
        self.clock.active = phase == MatchPhase::InProgress;
    }

    /// Mirror a clock value broadcast by the authority
    pub fn mirror_clock(&mut self, remaining_seconds: f32) {
        self.clock.remaining_seconds = remaining_seconds.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap() -> WriteCapability {
        WriteCapability::for_tests()
    }

    #[test]
    fn test_full_lifecycle() {
        let mut lifecycle = MatchLifecycle::new();
        assert_eq!(lifecycle.phase(), MatchPhase::Waiting);

        lifecycle.start(&cap(), 2.0).unwrap();
        assert_eq!(lifecycle.phase(), MatchPhase::InProgress);
        assert!(lifecycle.clock().active);

        assert_eq!(lifecycle.tick(&cap(), 1.0), None);
        assert_eq!(lifecycle.tick(&cap(), 1.5), Some(MatchPhase::Ending));
        assert_eq!(lifecycle.clock().remaining_seconds, 0.0);
        assert!(!lifecycle.clock().active);

        lifecycle.finalize(&cap()).unwrap();
        assert_eq!(lifecycle.phase(), MatchPhase::Ended);
    }

    #[test]
    fn test_cannot_finalize_in_progress() {
        let mut lifecycle = MatchLifecycle::new();
        lifecycle.start(&cap(), 10.0).unwrap();

        let result = lifecycle.finalize(&cap());
        assert_eq!(
            result,
            Err(LifecycleError::InvalidTransition {
                from: MatchPhase::InProgress,
                to: MatchPhase::Ended,
            })
        );
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut lifecycle = MatchLifecycle::new();
        lifecycle.start(&cap(), 10.0).unwrap();
        assert!(lifecycle.start(&cap(), 10.0).is_err());
    }

    #[test]
    fn test_tick_outside_progress_is_noop() {
        let mut lifecycle = MatchLifecycle::new();
        assert_eq!(lifecycle.tick(&cap(), 100.0), None);
        assert_eq!(lifecycle.phase(), MatchPhase::Waiting);
    }

    #[test]
    fn test_from_parts_restores_running_clock() {
        let lifecycle = MatchLifecycle::from_parts(MatchPhase::InProgress, MatchClock::new(120.0, false));
        assert_eq!(lifecycle.phase(), MatchPhase::InProgress);
        assert_eq!(lifecycle.clock().remaining_seconds, 120.0);
        assert!(lifecycle.clock().active);
    }

    #[test]
    fn test_recovered_expired_clock_ends_on_next_tick() {
        let mut lifecycle = MatchLifecycle::from_parts(MatchPhase::InProgress, MatchClock::new(0.0, true));
        assert_eq!(lifecycle.tick(&cap(), 0.1), Some(MatchPhase::Ending));
        assert_eq!(lifecycle.phase(), MatchPhase::Ending);
        assert!(!lifecycle.clock().active);
        assert_eq!(lifecycle.tick(&cap(), 0.1), None);
    }

    #[test]
    fn test_reset_after_end() {
        let mut lifecycle = MatchLifecycle::new();
        lifecycle.start(&cap(), 1.0).unwrap();
        lifecycle.tick(&cap(), 1.0);
        lifecycle.finalize(&cap()).unwrap();
        lifecycle.reset(&cap()).unwrap();
        assert_eq!(lifecycle.phase(), MatchPhase::Waiting);
    }

    #[test]
    fn test_mirror() {
        let mut lifecycle = MatchLifecycle::new();
        lifecycle.mirror_phase(MatchPhase::InProgress);
        lifecycle.mirror_clock(42.0);
        assert_eq!(lifecycle.phase(), MatchPhase::InProgress);
        assert_eq!(lifecycle.clock().remaining_seconds, 42.0);
    }
}
