//! Presence timeline and alarm debouncing.
//!
//! `PresenceTracker` turns a sequence of per-frame person counts into a
//! stateful presence timeline: a run of frames with at least one person,
//! anchored at the first such frame. `AlarmDispatcher` converts
//! eligibility into at most one alert per cooldown window.
//!
//! Both are plain state machines. Callers wrap each in its own `Mutex`
//! so the whole read-decide-write sequence is one critical section; the
//! locks are never nested and never held across I/O. The dispatcher
//! returns the alert payload instead of sending it, so the outbound
//! send happens after the lock is released.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::alert::AlertMessage;

/// Shared presence state. `active_since` is set iff `active` is true.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresenceState {
    pub active: bool,
    pub active_since: Option<DateTime<Utc>>,
}

/// Outcome of observing one frame.
#[derive(Clone, Copy, Debug)]
pub struct PresenceObservation {
    pub is_active: bool,
    /// Time since the current presence run started. Zero when inactive
    /// or on the run's first frame.
    pub duration: Duration,
    /// True once `duration` has reached the configured threshold.
    pub alert_eligible: bool,
}

pub struct PresenceTracker {
    state: PresenceState,
    threshold: Duration,
}

impl PresenceTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            state: PresenceState::default(),
            threshold,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// Fold one frame's person count into the presence timeline.
    ///
    /// A zero-person frame clears the state immediately; there is no
    /// debounce for one-frame detection dropouts, so the next run
    /// restarts its own timer. The first frame of a run is never
    /// eligible regardless of timestamps.
    pub fn observe(&mut self, now: DateTime<Utc>, person_count: u32) -> PresenceObservation {
        if person_count == 0 {
            self.state = PresenceState::default();
            return PresenceObservation {
                is_active: false,
                duration: Duration::ZERO,
                alert_eligible: false,
            };
        }

        let Some(active_since) = self.state.active_since else {
            self.state = PresenceState {
                active: true,
                active_since: Some(now),
            };
            return PresenceObservation {
                is_active: true,
                duration: Duration::ZERO,
                alert_eligible: false,
            };
        };

        // Clock steps backwards read as zero elapsed time.
        let duration = (now - active_since).to_std().unwrap_or(Duration::ZERO);
        PresenceObservation {
            is_active: true,
            duration,
            alert_eligible: duration >= self.threshold,
        }
    }
}

/// Shared alarm state. `last_alarm_at` is monotonically non-decreasing
/// once set.
pub struct AlarmDispatcher {
    last_alarm_at: Option<DateTime<Utc>>,
    cooldown: Duration,
}

impl AlarmDispatcher {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            last_alarm_at: None,
            cooldown,
        }
    }

    pub fn last_alarm_at(&self) -> Option<DateTime<Utc>> {
        self.last_alarm_at
    }

    /// Atomic check-and-set: fires iff the frame is alert-eligible and
    /// the cooldown has elapsed (or no alarm has fired yet).
    ///
    /// `last_alarm_at` is recorded here, at decision time, so an
    /// attempted-but-undelivered alert still starts the cooldown. The
    /// returned payload is sent by the caller outside this state's lock.
    pub fn decide(
        &mut self,
        now: DateTime<Utc>,
        person_count: u32,
        duration: Duration,
        alert_eligible: bool,
    ) -> Option<AlertMessage> {
        if !alert_eligible {
            return None;
        }
        if let Some(last) = self.last_alarm_at {
            let since_last = (now - last).to_std().unwrap_or(Duration::ZERO);
            if since_last < self.cooldown {
                return None;
            }
        }
        self.last_alarm_at = Some(now);
        Some(AlertMessage::intrusion(now, person_count, duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Duration::from_secs(5))
    }

    #[test]
    fn empty_frames_never_activate() {
        let mut tracker = tracker();
        for i in 0..10 {
            let obs = tracker.observe(t(i), 0);
            assert!(!obs.is_active);
            assert!(!obs.alert_eligible);
            assert_eq!(obs.duration, Duration::ZERO);
        }
        assert!(!tracker.state().active);
        assert!(tracker.state().active_since.is_none());
    }

    #[test]
    fn first_active_frame_is_never_eligible() {
        let mut tracker = tracker();
        // Even with an arbitrary "late" timestamp the 0 -> >0 transition
        // only anchors the run.
        let obs = tracker.observe(t(1000), 3);
        assert!(obs.is_active);
        assert!(!obs.alert_eligible);
        assert_eq!(obs.duration, Duration::ZERO);
    }

    #[test]
    fn eligibility_begins_exactly_at_threshold() {
        let mut tracker = tracker();
        tracker.observe(t(0), 1);
        for i in 1..5 {
            let obs = tracker.observe(t(i), 1);
            assert!(!obs.alert_eligible, "t={} should not be eligible", i);
        }
        let obs = tracker.observe(t(5), 1);
        assert!(obs.alert_eligible);
        assert_eq!(obs.duration, Duration::from_secs(5));
        // Stays eligible while presence continues.
        assert!(tracker.observe(t(6), 2).alert_eligible);
    }

    #[test]
    fn zero_person_frame_resets_the_timer() {
        let mut tracker = tracker();
        tracker.observe(t(0), 1);
        tracker.observe(t(2), 1);
        let obs = tracker.observe(t(3), 0);
        assert!(!obs.is_active);

        // New run anchored at t=3; its own 5s timer applies.
        tracker.observe(t(3), 1);
        assert!(!tracker.observe(t(7), 1).alert_eligible);
        assert!(tracker.observe(t(8), 1).alert_eligible);
    }

    #[test]
    fn clock_step_backwards_reads_as_zero_duration() {
        let mut tracker = tracker();
        tracker.observe(t(10), 1);
        let obs = tracker.observe(t(4), 1);
        assert!(obs.is_active);
        assert_eq!(obs.duration, Duration::ZERO);
        assert!(!obs.alert_eligible);
    }

    #[test]
    fn dispatcher_respects_cooldown() {
        let mut alarm = AlarmDispatcher::new(Duration::from_secs(10));
        let d = Duration::from_secs(5);

        assert!(alarm.decide(t(5), 1, d, true).is_some());
        // 5s after the first fire: suppressed.
        assert!(alarm.decide(t(10), 1, Duration::from_secs(10), true).is_none());
        // Exactly one cooldown later: fires again.
        assert!(alarm.decide(t(15), 1, Duration::from_secs(15), true).is_some());
        assert_eq!(alarm.last_alarm_at(), Some(t(15)));
    }

    #[test]
    fn dispatcher_never_fires_when_ineligible() {
        let mut alarm = AlarmDispatcher::new(Duration::from_secs(10));
        assert!(alarm.decide(t(0), 4, Duration::from_secs(60), false).is_none());
        assert!(alarm.last_alarm_at().is_none());
    }

    #[test]
    fn threshold_and_cooldown_scenario() {
        // threshold=5s, cooldown=10s; one person in every frame at
        // t=0..=9: exactly one alarm, at t=5. t=10 is eligible but
        // inside the cooldown; t=15 fires again.
        let mut tracker = tracker();
        let mut alarm = AlarmDispatcher::new(Duration::from_secs(10));
        let mut fired_at = Vec::new();

        for i in 0..10 {
            let obs = tracker.observe(t(i), 1);
            if alarm.decide(t(i), 1, obs.duration, obs.alert_eligible).is_some() {
                fired_at.push(i);
            }
        }
        assert_eq!(fired_at, vec![5]);

        let obs = tracker.observe(t(10), 1);
        assert!(obs.alert_eligible);
        assert!(alarm.decide(t(10), 1, obs.duration, obs.alert_eligible).is_none());

        let obs = tracker.observe(t(15), 1);
        assert_eq!(obs.duration, Duration::from_secs(15));
        let msg = alarm.decide(t(15), 1, obs.duration, obs.alert_eligible);
        assert!(msg.is_some());
    }
}
