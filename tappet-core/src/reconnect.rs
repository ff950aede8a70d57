//! Reconnect backoff for connecting engines.
//!
//! A connecting engine asks for a delay after every failed connect or lost
//! connection and resets once a handshake succeeds. With
//! `reconnect_ivl_max == 0` the delay stays at `reconnect_ivl`; otherwise it
//! doubles per failure up to the maximum.

use crate::options::SocketOptions;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectState {
    initial: Duration,
    ceiling: Option<Duration>,
    upcoming: Duration,
    failures: u32,
}

impl ReconnectState {
    #[must_use]
    pub fn new(options: &SocketOptions) -> Self {
        let ceiling = (!options.reconnect_ivl_max.is_zero())
            .then(|| options.reconnect_ivl_max.max(options.reconnect_ivl));
        Self {
            initial: options.reconnect_ivl,
            ceiling,
            upcoming: options.reconnect_ivl,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.upcoming;
        self.failures = self.failures.saturating_add(1);
        if let Some(ceiling) = self.ceiling {
            self.upcoming = delay.saturating_mul(2).min(ceiling);
        }
        delay
    }

    /// Connection is healthy again.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.upcoming = self.initial;
    }

    /// Failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ivl_ms: u64, max_ms: u64) -> ReconnectState {
        ReconnectState::new(
            &SocketOptions::new()
                .with_reconnect_ivl(Duration::from_millis(ivl_ms))
                .with_reconnect_ivl_max(Duration::from_millis(max_ms)),
        )
    }

    fn delays(state: &mut ReconnectState, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| state.next_delay().as_millis() as u64)
            .collect()
    }

    #[test]
    fn fixed_interval_without_max() {
        let mut s = state(50, 0);
        assert_eq!(delays(&mut s, 4), [50, 50, 50, 50]);
        assert_eq!(s.failures(), 4);
    }

    #[test]
    fn doubles_up_to_max() {
        let mut s = state(100, 500);
        assert_eq!(delays(&mut s, 6), [100, 200, 400, 500, 500, 500]);
    }

    #[test]
    fn max_below_interval_never_shrinks_delay() {
        let mut s = state(300, 100);
        assert_eq!(delays(&mut s, 3), [300, 300, 300]);
    }

    #[test]
    fn reset_after_handshake() {
        let mut s = state(20, 1000);
        delays(&mut s, 3);
        s.reset();
        assert_eq!(s.failures(), 0);
        assert_eq!(delays(&mut s, 2), [20, 40]);
    }

    #[test]
    fn saturates_instead_of_overflowing() {
        let mut s = ReconnectState::new(
            &SocketOptions::new()
                .with_reconnect_ivl(Duration::from_secs(u64::MAX / 2))
                .with_reconnect_ivl_max(Duration::MAX),
        );
        s.next_delay();
        assert_eq!(s.next_delay(), Duration::from_secs(u64::MAX / 2).saturating_mul(2));
    }
}
