//! Bounded retry with a fixed delay between attempts.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Wait between a failed attempt and the next one
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `op` until it succeeds or the attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. Every attempt, successful or
    /// not, is recorded in the returned trail.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<Retried<T>, Vec<AttemptRecord>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut trail = Vec::with_capacity(attempts as usize);

        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => {
                    debug!(attempt, "Attempt succeeded");
                    trail.push(AttemptRecord {
                        attempt,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    return Ok(Retried { value, trail });
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Attempt failed");
                    trail.push(AttemptRecord {
                        attempt,
                        outcome: AttemptOutcome::Failed(e.to_string()),
                    });
                    if attempt < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(trail)
    }
}

/// A successful value and the attempts it took to get it
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub trail: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let result = policy
            .run(|attempt| async move {
                if attempt < 3 {
                    Err(format!("empty on attempt {attempt}"))
                } else {
                    Ok("notes")
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "notes");
        assert_eq!(result.trail.len(), 3);
        assert!(!result.trail[0].succeeded());
        assert!(result.trail[2].succeeded());
        // Two waits of 2s between three attempts
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_full_trail() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let trail = policy
            .run(|_| async { Err::<(), _>("nothing") })
            .await
            .unwrap_err();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[1].attempt, 2);
        assert_eq!(trail[2].outcome, AttemptOutcome::Failed("nothing".to_string()));
    }
}
