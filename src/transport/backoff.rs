use std::time::Duration;
use tokio::time::Instant;

/// Automatic reconnection after unexpected connection loss
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per failed attempt
    pub growth: f64,
    pub max_delay: Duration,
    /// Retries allowed before giving up; 0 disables reconnection
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            growth: 1.5,
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * growth^attempt, max)`, where `attempt` counts the retries
    /// already scheduled since the last successful open
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let delay = base * self.growth.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let max = self.max_delay.as_secs_f64();

        if !delay.is_finite() || delay >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// One scheduled connect / reconnect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAttempt {
    /// 0 for the initial connect, then 1.. for each retry
    pub attempt: u32,
    /// Wait before dialing
    pub delay: Duration,
    /// Dialing gives up at this instant
    pub deadline: Instant,
}

impl ConnectionAttempt {
    pub fn immediate(connect_timeout: Duration) -> Self {
        Self {
            attempt: 0,
            delay: Duration::ZERO,
            deadline: Instant::now() + connect_timeout,
        }
    }

    /// Next retry after `attempt` failures, or `None` once the policy is
    /// exhausted
    pub fn retry(policy: &ReconnectPolicy, attempt: u32, connect_timeout: Duration) -> Option<Self> {
        if !policy.should_retry(attempt) {
            return None;
        }

        let delay = policy.delay_for(attempt);
        Some(Self {
            attempt: attempt + 1,
            delay,
            deadline: Instant::now() + delay + connect_timeout,
        })
    }
}
