//! Debounce between blink events and outbound verification requests.
//!
//! Every blink is counted and lights the "blinking" indicator, but only a
//! blink that arrives at least `cooldown` after the previous capture, while no
//! other submission is outstanding, turns into a capture + verify request.
//!
//! The coordinator only decides. Performing the capture and the network call
//! is the caller's job; it must hand the [`CaptureTicket`] back through
//! [`CaptureCoordinator::settle`] when the submission finishes, whether it
//! succeeded or not.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::session::BlinkEvent;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);
/// How long the "blinking" indicator stays up after each event.
pub const BLINK_INDICATOR: Duration = Duration::from_millis(300);

/// Permission to run one capture + submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureTicket {
    /// Session epoch the ticket was issued in.
    pub epoch: u64,
    pub requested_at: DateTime<Utc>,
}

impl CaptureTicket {
    /// `YYYY-MM-DD HH:mm:ss` in local time, as sent alongside the capture.
    pub fn timestamp_string(&self) -> String {
        format_capture_timestamp(self.requested_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    Submit(CaptureTicket),
    CoolingDown { remaining: Duration },
    InFlight,
}

#[derive(Debug, Clone)]
pub struct CaptureCoordinator {
    cooldown: Duration,
    last_capture: Option<DateTime<Utc>>,
    in_flight: bool,
    epoch: u64,
    blinking_until: Option<DateTime<Utc>>,
    submissions: u32,
}

impl CaptureCoordinator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_capture: None,
            in_flight: false,
            epoch: 0,
            blinking_until: None,
            submissions: 0,
        }
    }

    /// Decide what to do with a blink, timed by the event's own timestamp.
    pub fn on_blink(&mut self, event: &BlinkEvent) -> CaptureDecision {
        let now = event.timestamp;
        self.blinking_until = Some(now + to_delta(BLINK_INDICATOR));

        if let Some(last) = self.last_capture {
            // A negative gap means the frame clock stepped back; the old
            // capture time no longer bounds anything.
            let elapsed = match (now - last).to_std() {
                Ok(elapsed) => elapsed,
                Err(_) => {
                    tracing::warn!(
                        sequence = event.sequence,
                        last_capture = %last,
                        now = %now,
                        "frame clock went backwards, dropping cooldown window"
                    );
                    self.last_capture = None;
                    self.cooldown
                }
            };
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                tracing::debug!(
                    sequence = event.sequence,
                    remaining_ms = remaining.as_millis() as u64,
                    "blink inside cooldown, skipping capture"
                );
                return CaptureDecision::CoolingDown { remaining };
            }
        }

        if self.in_flight {
            tracing::debug!(sequence = event.sequence, "submission in flight, skipping capture");
            return CaptureDecision::InFlight;
        }

        self.in_flight = true;
        self.last_capture = Some(now);
        self.submissions += 1;

        CaptureDecision::Submit(CaptureTicket {
            epoch: self.epoch,
            requested_at: now,
        })
    }

    /// Mark a submission as finished. Tickets from an earlier epoch are ignored.
    ///
    /// Returns whether the ticket was accepted.
    pub fn settle(&mut self, ticket: &CaptureTicket) -> bool {
        if ticket.epoch != self.epoch {
            tracing::debug!(
                ticket_epoch = ticket.epoch,
                epoch = self.epoch,
                "ignoring completion from a stopped session"
            );
            return false;
        }
        self.in_flight = false;
        true
    }

    /// Forget everything and start a new epoch.
    pub fn reset(&mut self) {
        self.last_capture = None;
        self.in_flight = false;
        self.blinking_until = None;
        self.submissions = 0;
        self.epoch += 1;
    }

    pub fn is_blinking(&self, now: DateTime<Utc>) -> bool {
        self.blinking_until.is_some_and(|until| now < until)
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn submissions(&self) -> u32 {
        self.submissions
    }

    pub fn last_capture(&self) -> Option<DateTime<Utc>> {
        self.last_capture
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for CaptureCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

fn to_delta(d: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(d).unwrap_or_else(|_| chrono::TimeDelta::zero())
}

pub fn format_capture_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn blink_at(ms: i64) -> BlinkEvent {
        BlinkEvent {
            sequence: 1,
            trigger_ear: 0.05,
            drop_percent: 83.0,
            timestamp: t0() + TimeDelta::milliseconds(ms),
        }
    }

    fn submit(decision: CaptureDecision) -> CaptureTicket {
        match decision {
            CaptureDecision::Submit(ticket) => ticket,
            other => panic!("expected submit, got {other:?}"),
        }
    }

    #[test]
    fn test_first_blink_submits() {
        let mut c = CaptureCoordinator::default();
        let ticket = submit(c.on_blink(&blink_at(0)));
        assert_eq!(ticket.requested_at, t0());
        assert!(c.in_flight());
        assert_eq!(c.submissions(), 1);
    }

    #[test]
    fn test_cooldown_debounces() {
        let mut c = CaptureCoordinator::default();
        let ticket = submit(c.on_blink(&blink_at(0)));
        c.settle(&ticket);

        match c.on_blink(&blink_at(500)) {
            CaptureDecision::CoolingDown { remaining } => {
                assert_eq!(remaining, Duration::from_millis(1500));
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        submit(c.on_blink(&blink_at(2100)));
        assert_eq!(c.submissions(), 2);
    }

    #[test]
    fn test_cooldown_boundary_is_inclusive() {
        let mut c = CaptureCoordinator::default();
        let ticket = submit(c.on_blink(&blink_at(0)));
        c.settle(&ticket);
        submit(c.on_blink(&blink_at(2000)));
    }

    #[test]
    fn test_clock_step_back_does_not_block_submissions() {
        let mut c = CaptureCoordinator::default();
        let ticket = submit(c.on_blink(&blink_at(0)));
        c.settle(&ticket);

        // Detector clock jumps an hour into the past
        let ticket = submit(c.on_blink(&blink_at(-3_600_000)));
        assert_eq!(c.last_capture(), Some(t0() - TimeDelta::hours(1)));
        c.settle(&ticket);

        // Cooldown is measured on the new clock from here on
        match c.on_blink(&blink_at(-3_599_000)) {
            CaptureDecision::CoolingDown { remaining } => {
                assert_eq!(remaining, Duration::from_millis(1000));
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        submit(c.on_blink(&blink_at(-3_597_000)));
        assert_eq!(c.submissions(), 3);
    }

    #[test]
    fn test_in_flight_blocks_after_cooldown() {
        let mut c = CaptureCoordinator::default();
        submit(c.on_blink(&blink_at(0)));
        assert_eq!(c.on_blink(&blink_at(5000)), CaptureDecision::InFlight);
        assert_eq!(c.submissions(), 1);
        // A suppressed blink does not move the cooldown window
        assert_eq!(c.last_capture(), Some(t0()));
    }

    #[test]
    fn test_failed_submission_clears_in_flight() {
        let mut c = CaptureCoordinator::default();
        let ticket = submit(c.on_blink(&blink_at(0)));
        assert!(c.settle(&ticket));
        assert!(!c.in_flight());
        submit(c.on_blink(&blink_at(3000)));
    }

    #[test]
    fn test_stale_ticket_ignored_after_reset() {
        let mut c = CaptureCoordinator::default();
        let stale = submit(c.on_blink(&blink_at(0)));
        c.reset();
        let fresh = submit(c.on_blink(&blink_at(100)));
        assert!(!c.settle(&stale));
        assert!(c.in_flight());
        assert!(c.settle(&fresh));
        assert!(!c.in_flight());
    }

    #[test]
    fn test_reset_restores_initial_values() {
        let mut c = CaptureCoordinator::default();
        submit(c.on_blink(&blink_at(0)));
        let epoch = c.epoch();
        c.reset();
        assert!(!c.in_flight());
        assert_eq!(c.last_capture(), None);
        assert_eq!(c.submissions(), 0);
        assert!(!c.is_blinking(t0()));
        assert_eq!(c.epoch(), epoch + 1);
    }

    #[test]
    fn test_blinking_indicator_holds_300ms() {
        let mut c = CaptureCoordinator::default();
        c.on_blink(&blink_at(0));
        assert!(c.is_blinking(t0() + TimeDelta::milliseconds(299)));
        assert!(!c.is_blinking(t0() + TimeDelta::milliseconds(300)));
        // Suppressed blinks still light the indicator
        c.on_blink(&blink_at(1000));
        assert!(c.is_blinking(t0() + TimeDelta::milliseconds(1100)));
    }

    #[test]
    fn test_timestamp_format_shape() {
        let s = format_capture_timestamp(t0());
        assert_eq!(s.len(), 19);
        let bytes = s.as_bytes();
        assert_eq!(bytes[4], b'-');
        assert_eq!(bytes[7], b'-');
        assert_eq!(bytes[10], b' ');
        assert_eq!(bytes[13], b':');
        assert_eq!(bytes[16], b':');
    }
}
