/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Heartbeat and TestRequest management.
//!
//! This module handles FIX session heartbeat logic including:
//! - Sending heartbeats at configured intervals
//! - Sending TestRequest when no messages received
//! - Detecting heartbeat timeouts
//!
//! The manager never reads the clock itself; every call takes the current
//! [`Instant`], so the session can be driven deterministically.

use std::time::{Duration, Instant};

/// What the session should do after a liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing is due.
    None,
    /// Nothing was sent for a full interval.
    SendHeartbeat,
    /// Nothing was received for interval plus tolerance.
    SendTestRequest,
    /// The TestRequest went unanswered for the tolerance period.
    TimedOut,
}

/// Manages heartbeat timing for a FIX session.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// Heartbeat interval, zero when disabled.
    interval: Duration,
    /// Multiplier applied to the interval to get the tolerance.
    multiplier: f64,
    /// Grace period before TestRequest and before timing out.
    tolerance: Duration,
    /// Time of last message sent.
    last_sent: Instant,
    /// Time of last message received.
    last_received: Instant,
    /// Pending TestRequest ID, if any.
    test_request_pending: Option<String>,
    /// Time when TestRequest was sent.
    test_request_sent_at: Option<Instant>,
}

impl HeartbeatManager {
    /// Creates a new heartbeat manager.
    ///
    /// # Arguments
    /// * `interval` - The heartbeat interval, zero to disable
    /// * `multiplier` - TestRequestDelayMultiplier, a positive fraction
    /// * `now` - The current instant
    #[must_use]
    pub fn new(interval: Duration, multiplier: f64, now: Instant) -> Self {
        Self {
            interval,
            multiplier,
            tolerance: tolerance(interval, multiplier),
            last_sent: now,
            last_received: now,
            test_request_pending: None,
            test_request_sent_at: None,
        }
    }

    /// Replaces the interval, e.g. with the one negotiated at logon.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
        self.tolerance = tolerance(interval, self.multiplier);
    }

    /// Records that a message was sent.
    #[inline]
    pub fn on_message_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Records that a message was received.
    ///
    /// Any inbound message proves liveness, so a pending TestRequest is
    /// cleared as well.
    #[inline]
    pub fn on_message_received(&mut self, now: Instant) {
        self.last_received = now;
        self.test_request_pending = None;
        self.test_request_sent_at = None;
    }

    /// Records that a TestRequest was sent.
    ///
    /// # Arguments
    /// * `test_req_id` - The TestReqID that was sent
    /// * `now` - The current instant
    pub fn on_test_request_sent(&mut self, test_req_id: String, now: Instant) {
        self.test_request_pending = Some(test_req_id);
        self.test_request_sent_at = Some(now);
        self.last_sent = now;
    }

    /// Evaluates liveness at `now`.
    ///
    /// At most one action is returned per call; the caller reports what it
    /// sent through [`HeartbeatManager::on_message_sent`] or
    /// [`HeartbeatManager::on_test_request_sent`].
    #[must_use]
    pub fn check(&self, now: Instant) -> HeartbeatAction {
        if self.interval.is_zero() {
            return HeartbeatAction::None;
        }
        if let Some(sent_at) = self.test_request_sent_at {
            if now.saturating_duration_since(sent_at) >= self.tolerance {
                return HeartbeatAction::TimedOut;
            }
        } else if now.saturating_duration_since(self.last_received) >= self.interval + self.tolerance {
            return HeartbeatAction::SendTestRequest;
        }
        if now.saturating_duration_since(self.last_sent) >= self.interval {
            return HeartbeatAction::SendHeartbeat;
        }
        HeartbeatAction::None
    }

    /// Returns the pending TestRequest ID, if any.
    #[must_use]
    pub fn pending_test_request(&self) -> Option<&str> {
        self.test_request_pending.as_deref()
    }

    /// Returns the time since the last message was received.
    #[must_use]
    pub fn time_since_last_received(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    /// Returns the time since the last message was sent.
    #[must_use]
    pub fn time_since_last_sent(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_sent)
    }

    /// Returns the heartbeat interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the test request tolerance.
    #[must_use]
    pub const fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Resets the manager state.
    pub fn reset(&mut self, now: Instant) {
        self.last_sent = now;
        self.last_received = now;
        self.test_request_pending = None;
        self.test_request_sent_at = None;
    }
}

fn tolerance(interval: Duration, multiplier: f64) -> Duration {
    Duration::try_from_secs_f64(interval.as_secs_f64() * multiplier).unwrap_or(Duration::ZERO)
}

/// Generates a unique TestReqID.
///
/// Uses the current timestamp in nanoseconds.
#[must_use]
pub fn generate_test_req_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    format!("TEST{}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_heartbeat_manager_new() {
        let mgr = HeartbeatManager::new(secs(30), 0.5, Instant::now());
        assert_eq!(mgr.interval(), secs(30));
        assert_eq!(mgr.tolerance(), secs(15));
        assert!(mgr.pending_test_request().is_none());
    }

    #[test]
    fn test_silent_counterparty_timeline() {
        let start = Instant::now();
        let mut mgr = HeartbeatManager::new(secs(30), 0.5, start);

        assert_eq!(mgr.check(start + secs(29)), HeartbeatAction::None);
        assert_eq!(mgr.check(start + secs(30)), HeartbeatAction::SendHeartbeat);
        mgr.on_message_sent(start + secs(30));

        assert_eq!(mgr.check(start + secs(44)), HeartbeatAction::None);
        assert_eq!(mgr.check(start + secs(45)), HeartbeatAction::SendTestRequest);
        mgr.on_test_request_sent("T1".to_string(), start + secs(45));

        assert_eq!(mgr.check(start + secs(59)), HeartbeatAction::None);
        assert_eq!(mgr.check(start + secs(60)), HeartbeatAction::TimedOut);
    }

    #[test]
    fn test_any_inbound_message_answers_test_request() {
        let start = Instant::now();
        let mut mgr = HeartbeatManager::new(secs(30), 0.5, start);

        mgr.on_test_request_sent("TEST123".to_string(), start + secs(45));
        assert_eq!(mgr.pending_test_request(), Some("TEST123"));

        mgr.on_message_received(start + secs(50));
        assert!(mgr.pending_test_request().is_none());
        assert_eq!(mgr.check(start + secs(61)), HeartbeatAction::None);
        assert_eq!(mgr.time_since_last_received(start + secs(61)), secs(11));
    }

    #[test]
    fn test_on_message_sent_postpones_heartbeat() {
        let start = Instant::now();
        let mut mgr = HeartbeatManager::new(secs(10), 0.5, start);
        mgr.on_message_sent(start + secs(8));
        mgr.on_message_received(start + secs(8));

        assert_eq!(mgr.check(start + secs(12)), HeartbeatAction::None);
        assert_eq!(mgr.check(start + secs(18)), HeartbeatAction::SendHeartbeat);
        assert_eq!(mgr.time_since_last_sent(start + secs(18)), secs(10));
    }

    #[test]
    fn test_zero_interval_disables() {
        let start = Instant::now();
        let mgr = HeartbeatManager::new(Duration::ZERO, 0.5, start);
        assert_eq!(mgr.check(start + secs(3600)), HeartbeatAction::None);
    }

    #[test]
    fn test_set_interval_and_reset() {
        let start = Instant::now();
        let mut mgr = HeartbeatManager::new(secs(30), 0.5, start);
        mgr.set_interval(secs(2));
        assert_eq!(mgr.tolerance(), Duration::from_secs(1));

        mgr.on_test_request_sent("T".to_string(), start);
        mgr.reset(start + secs(5));
        assert!(mgr.pending_test_request().is_none());
        assert_eq!(mgr.check(start + secs(6)), HeartbeatAction::None);
    }

    #[test]
    fn test_generate_test_req_id() {
        let id = generate_test_req_id();
        assert!(id.starts_with("TEST"));
        assert!(id.len() > 4);
    }
}
