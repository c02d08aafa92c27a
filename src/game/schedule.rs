//! Scheduled continuations on a logical clock
//!
//! Nothing in the session blocks: delayed work (settle windows, spaced
//! spawns, deferred finalization) is queued here and released by the tick
//! that crosses its due time.

use std::time::Duration;

#[derive(Debug)]
struct Scheduled<T> {
    due: Duration,
    seq: u64,
    task: T,
}

/// Timer queue keyed by logical session time
#[derive(Debug)]
pub struct Scheduler<T> {
    now: Duration,
    next_seq: u64,
    queue: Vec<Scheduled<T>>,
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            queue: Vec::new(),
        }
    }

    /// Current logical time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Queue `task` to run `delay` from now
    pub fn schedule_in(&mut self, delay: Duration, task: T) {
        let entry = Scheduled {
            due: self.now + delay,
            seq: self.next_seq,
            task,
        };
        self.next_seq += 1;

        // Keep sorted by (due, seq) so draining is a prefix split
        let index = self
            .queue
            .partition_point(|s| (s.due, s.seq) <= (entry.due, entry.seq));
        self.queue.insert(index, entry);
    }

    /// Move the clock forward
    pub fn advance(&mut self, dt: Duration) {
        self.now += dt;
    }

    /// Remove and return every task whose due time has passed, in due order
    pub fn drain_due(&mut self) -> Vec<T> {
        let split = self.queue.partition_point(|s| s.due <= self.now);
        self.queue.drain(..split).map(|s| s.task).collect()
    }

    /// Cancel tasks not matching the predicate
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.queue.retain(|s| keep(&s.task));
    }

    pub fn count(&self, mut matches: impl FnMut(&T) -> bool) -> usize {
        self.queue.iter().filter(|s| matches(&s.task)).count()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires once every `interval` of accumulated time
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval: Duration,
    elapsed: Duration,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
        }
    }

    /// Accumulate `dt`; returns true when the interval elapsed
    pub fn tick(&mut self, dt: Duration) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        self.elapsed += dt;
        if self.elapsed >= self.interval {
            self.elapsed -= self.interval;
            // Never fire more than once per tick after a long stall
            if self.elapsed >= self.interval {
                self.elapsed = Duration::ZERO;
            }
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_released_in_due_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_in(Duration::from_millis(500), "b");
        scheduler.schedule_in(Duration::from_millis(100), "a");
        scheduler.schedule_in(Duration::from_millis(500), "c");

        scheduler.advance(Duration::from_millis(200));
        assert_eq!(scheduler.drain_due(), vec!["a"]);

        scheduler.advance(Duration::from_millis(300));
        assert_eq!(scheduler.drain_due(), vec!["b", "c"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_zero_delay_is_due_immediately() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_in(Duration::ZERO, 1);
        assert_eq!(scheduler.drain_due(), vec![1]);
    }

    #[test]
    fn test_retain_cancels() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_in(Duration::from_secs(1), 1);
        scheduler.schedule_in(Duration::from_secs(1), 2);
        scheduler.retain(|t| *t != 1);

        scheduler.advance(Duration::from_secs(2));
        assert_eq!(scheduler.drain_due(), vec![2]);
    }

    #[test]
    fn test_interval_timer() {
        let mut timer = IntervalTimer::new(Duration::from_secs(5));
        assert!(!timer.tick(Duration::from_secs(3)));
        assert!(timer.tick(Duration::from_secs(3)));
        assert!(!timer.tick(Duration::from_secs(3)));
        assert!(timer.tick(Duration::from_secs(3)));
    }
}
