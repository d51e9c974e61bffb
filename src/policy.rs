//! Stream health policy: staleness detection and bounded reconnection.
//!
//! Both pieces are plain state machines driven by the caller's clock, so the
//! session manager can arm a single timer for [`Watchdog::next_deadline`] and
//! tear everything down by dropping its stream task.

use std::time::Duration;

use tokio::time::Instant;

/// Timer settings for [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Maximum silence (any message type) before the stream counts as stalled.
    pub heartbeat_window: Duration,
    /// Maximum wait for the first data message after the stream opens.
    pub data_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            heartbeat_window: Duration::from_secs(300),
            data_timeout: Duration::from_secs(30),
        }
    }
}

/// Advisory signal raised by the [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    /// No message of any type within the heartbeat window.
    Stalled,
    /// No data message within the data timeout after opening.
    NoDataWarning,
}

/// Tracks message arrival on one open stream.
#[derive(Debug, Clone)]
pub struct Watchdog {
    config: WatchdogConfig,
    opened_at: Instant,
    last_message: Instant,
    data_seen: bool,
    warned: bool,
    stalled: bool,
}

impl Watchdog {
    /// Start watching a stream opened at `now`.
    pub fn new(config: WatchdogConfig, now: Instant) -> Self {
        Self {
            config,
            opened_at: now,
            last_message: now,
            data_seen: false,
            warned: false,
            stalled: false,
        }
    }

    /// Record a message arrival.
    ///
    /// Returns true if this message ends a stall.
    pub fn record_message(&mut self, is_data: bool, now: Instant) -> bool {
        self.last_message = now;
        if is_data {
            self.data_seen = true;
        }
        std::mem::replace(&mut self.stalled, false)
    }

    /// Earliest instant at which [`poll`](Self::poll) may raise a signal.
    pub fn next_deadline(&self) -> Option<Instant> {
        let heartbeat =
            (!self.stalled).then(|| self.last_message + self.config.heartbeat_window);
        let data = (!self.data_seen && !self.warned)
            .then(|| self.opened_at + self.config.data_timeout);

        match (heartbeat, data) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Signals due at `now`. Each signal is reported once until cleared.
    pub fn poll(&mut self, now: Instant) -> Vec<HealthSignal> {
        let mut signals = Vec::new();

        if !self.data_seen && !self.warned && now >= self.opened_at + self.config.data_timeout {
            self.warned = true;
            signals.push(HealthSignal::NoDataWarning);
        }

        if !self.stalled && now >= self.last_message + self.config.heartbeat_window {
            self.stalled = true;
            signals.push(HealthSignal::Stalled);
        }

        signals
    }
}

/// Backoff settings for [`ReconnectPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Number of attempts before giving up. Zero disables reconnection.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

/// Position in the reconnection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Connected,
    /// Attempt `n` (1-based) is scheduled or running.
    Retrying(u32),
    /// Attempts exhausted; waiting for the user.
    Failed,
}

/// Bounded exponential backoff: `Connected → Retrying(n) → Failed`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    state: ReconnectState,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ReconnectState::Connected,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// The stream is healthy again; forget previous failures.
    pub fn on_connected(&mut self) {
        if self.state != ReconnectState::Failed {
            self.state = ReconnectState::Connected;
        }
    }

    /// A transport failure happened.
    ///
    /// Returns the delay before the next attempt, or `None` once attempts are
    /// exhausted (the policy is then `Failed`).
    pub fn on_failure(&mut self) -> Option<Duration> {
        let attempt = match self.state {
            ReconnectState::Connected => 1,
            ReconnectState::Retrying(n) => n + 1,
            ReconnectState::Failed => return None,
        };

        if attempt > self.config.max_attempts {
            self.state = ReconnectState::Failed;
            return None;
        }

        self.state = ReconnectState::Retrying(attempt);
        Some(self.delay_for(attempt))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.config.multiplier.max(1.0).powi(attempt as i32 - 1);
        let secs = self.config.initial_delay.as_secs_f64() * factor;
        let max = self.config.max_delay.max(self.config.initial_delay);
        Duration::try_from_secs_f64(secs).map_or(max, |d| d.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            heartbeat_window: Duration::from_secs(300),
            data_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_data_warning_fires_once() {
        let t0 = Instant::now();
        let mut dog = Watchdog::new(config(), t0);

        assert!(dog.poll(t0 + Duration::from_secs(29)).is_empty());
        assert_eq!(
            dog.poll(t0 + Duration::from_secs(30)),
            vec![HealthSignal::NoDataWarning]
        );
        assert!(dog.poll(t0 + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn test_data_before_timeout_prevents_warning() {
        let t0 = Instant::now();
        let mut dog = Watchdog::new(config(), t0);

        dog.record_message(true, t0 + Duration::from_secs(10));
        assert!(dog.poll(t0 + Duration::from_secs(31)).is_empty());
        assert_eq!(
            dog.next_deadline(),
            Some(t0 + Duration::from_secs(310))
        );
    }

    #[test]
    fn test_heartbeats_do_not_count_as_data() {
        let t0 = Instant::now();
        let mut dog = Watchdog::new(config(), t0);

        dog.record_message(false, t0 + Duration::from_secs(10));
        assert_eq!(
            dog.poll(t0 + Duration::from_secs(30)),
            vec![HealthSignal::NoDataWarning]
        );
    }

    #[test]
    fn test_stall_and_recovery() {
        let t0 = Instant::now();
        let mut dog = Watchdog::new(config(), t0);
        dog.record_message(true, t0);

        let signals = dog.poll(t0 + Duration::from_secs(300));
        assert_eq!(signals, vec![HealthSignal::Stalled]);
        assert!(dog.poll(t0 + Duration::from_secs(900)).is_empty());
        assert_eq!(dog.next_deadline(), None);

        assert!(dog.record_message(false, t0 + Duration::from_secs(901)));
        assert!(!dog.record_message(false, t0 + Duration::from_secs(902)));
        assert_eq!(
            dog.next_deadline(),
            Some(t0 + Duration::from_secs(1202))
        );
    }

    #[test]
    fn test_next_deadline_is_earliest_timer() {
        let t0 = Instant::now();
        let dog = Watchdog::new(config(), t0);
        assert_eq!(dog.next_deadline(), Some(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15),
            max_attempts: 4,
        });

        assert_eq!(policy.on_failure(), Some(Duration::from_secs(5)));
        assert_eq!(policy.state(), ReconnectState::Retrying(1));
        assert_eq!(policy.on_failure(), Some(Duration::from_secs(10)));
        assert_eq!(policy.on_failure(), Some(Duration::from_secs(15)));
        assert_eq!(policy.on_failure(), Some(Duration::from_secs(15)));
        assert_eq!(policy.on_failure(), None);
        assert_eq!(policy.state(), ReconnectState::Failed);
        assert_eq!(policy.on_failure(), None);
    }

    #[test]
    fn test_single_retry_configuration() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 1,
            ..ReconnectConfig::default()
        });

        assert_eq!(policy.on_failure(), Some(Duration::from_secs(5)));
        assert_eq!(policy.on_failure(), None);
        assert_eq!(policy.state(), ReconnectState::Failed);
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        policy.on_failure();
        policy.on_failure();
        policy.on_connected();
        assert_eq!(policy.state(), ReconnectState::Connected);
        assert_eq!(policy.on_failure(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_failed_is_sticky() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.on_failure(), None);
        policy.on_connected();
        assert_eq!(policy.state(), ReconnectState::Failed);
        assert_eq!(policy.on_failure(), None);
    }
}
