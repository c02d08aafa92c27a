//! Bounded reconnection loop
//!
//! Retries a fixed number of times with a fixed wait, reporting status text
//! for the UI after every attempt. Exhausting the retries is terminal.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::MatchConfig;

pub const RETRIES_EXHAUSTED_STATUS: &str = "Failed to reconnect. Please restart the game.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to reconnect after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &MatchConfig) -> Self {
        Self {
            attempts: config.reconnect_attempts,
            interval: config.reconnect_interval,
        }
    }

    /// Run `connect` until it succeeds or the attempts run out.
    ///
    /// `status` receives `Reconnecting... Attempt N` before each attempt, an
    /// empty string on success and the terminal failure text otherwise.
    /// Returns the attempt number that succeeded.
    pub async fn run<F, Fut, S>(&self, mut connect: F, mut status: S) -> Result<u32, ConnectionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
        S: FnMut(String),
    {
        for attempt in 1..=self.attempts {
            status(format!("Reconnecting... Attempt {}", attempt));
            info!(attempt, max = self.attempts, "Attempting to reconnect");

            if connect(attempt).await {
                info!(attempt, "Reconnected");
                status(String::new());
                return Ok(attempt);
            }

            sleep(self.interval).await;
        }

        warn!(attempts = self.attempts, "Failed to reconnect after maximum attempts");
        status(RETRIES_EXHAUSTED_STATUS.to_string());
        Err(ConnectionError::RetriesExhausted {
            attempts: self.attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: 5,
            interval: Duration::from_secs(2),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let mut statuses = Vec::new();
        let started = Instant::now();

        let result = policy()
            .run(|attempt| async move { attempt == 3 }, |s| statuses.push(s))
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(
            statuses,
            vec![
                "Reconnecting... Attempt 1".to_string(),
                "Reconnecting... Attempt 2".to_string(),
                "Reconnecting... Attempt 3".to_string(),
                String::new(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let mut last_status = String::new();

        let result = policy()
            .run(
                |_| {
                    calls += 1;
                    async { false }
                },
                |s| last_status = s,
            )
            .await;

        assert_eq!(result, Err(ConnectionError::RetriesExhausted { attempts: 5 }));
        assert_eq!(calls, 5);
        assert_eq!(last_status, RETRIES_EXHAUSTED_STATUS);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = ReconnectPolicy::from_config(&MatchConfig::default());
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.interval, Duration::from_secs(2));
    }
}
