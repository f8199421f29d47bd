use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
    /// Pause after a forceful kill before polling again.
    pub settle: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            settle: Duration::from_secs(5),
            max_attempts: 32,
        }
    }
}

impl RetryPolicy {
    /// No sleeping at all; checks are still repeated up to `max_attempts`.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            timeout: Duration::ZERO,
            settle: Duration::ZERO,
            max_attempts,
        }
    }

    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }
}

/// Polls `check` until it reports true, the attempts run out or the timeout elapses.
///
/// With a zero timeout every attempt still runs, back to back.
pub fn wait_until<F>(policy: &RetryPolicy, mut check: F) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay.min(policy.max_delay);

    for attempt in 1..=max_attempts {
        if check()? {
            return Ok(true);
        }
        if attempt == max_attempts {
            break;
        }
        if policy.timeout > Duration::ZERO {
            let elapsed = started.elapsed();
            if elapsed >= policy.timeout {
                break;
            }
            thread::sleep(delay.min(policy.timeout - elapsed));
        }
        delay = policy.next_delay(delay);
    }

    Ok(false)
}
