//! Reconnection backoff.
//!
//! After an abnormal close a channel waits `min(2^k × base, cap)` before its
//! k-th retry (k counted from zero), and gives up once `max_attempts` retries
//! have been scheduled.  The counter only moves forward on abnormal closes and
//! only goes back to zero when the caller explicitly asks for a new
//! connection; a successful automatic reconnect does not reset it.
//!
//! The timer itself is a tokio task owned by the channel.  This module is the
//! pure arithmetic around it.

use std::time::Duration;

/// Backoff schedule shared by both channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Retries allowed before the channel stays closed.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use vms_viewer::domain::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy::default();
    /// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    /// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    /// assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Per-channel retry counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectState {
    attempts: u32,
}

impl ReconnectState {
    /// Retries scheduled since the last caller-initiated connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` once the policy's ceiling has been reached.
    pub fn is_exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }

    /// Consumes one attempt and returns how long to wait before it, or `None`
    /// when no attempts remain.
    pub fn next_delay(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        if self.is_exhausted(policy) {
            return None;
        }
        let delay = policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Back to zero.  Only a caller-initiated connect does this.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
