// Progress persistence timing.
//
// Two timers decide when listening progress is written out:
// - a debounce timer restarted by every time update, so a burst of updates
//   turns into a single save once playback has been quiet for a moment
// - a periodic timer running while playing, a safety net in case the
//   event-driven saves are missed
//
// Timers are plain deadlines owned by the schedule. Cancelling one is just
// clearing it, so nothing can fire after the state it was armed for is gone.

use std::time::Duration;
use tokio::time::Instant;

use crate::catalog::EpisodeId;
use crate::config::PlayerSettings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSave {
    pub episode_id: EpisodeId,
    pub percent: u8,
    pub position: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueTimers {
    pub debounce: bool,
    pub periodic: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressSchedule {
    debounce: Duration,
    interval: Duration,
    min_percent: u8,
    debounce_at: Option<Instant>,
    periodic_at: Option<Instant>,
}

impl ProgressSchedule {
    pub fn new(settings: &PlayerSettings) -> Self {
        ProgressSchedule {
            debounce: settings.debounce(),
            interval: settings.periodic_interval(),
            min_percent: settings.min_progress_percent,
            debounce_at: None,
            periodic_at: None,
        }
    }

    pub fn restart_debounce(&mut self, now: Instant) {
        self.debounce_at = Some(now + self.debounce);
    }

    pub fn cancel_debounce(&mut self) {
        self.debounce_at = None;
    }

    pub fn start_periodic(&mut self, now: Instant) {
        self.periodic_at = Some(now + self.interval);
    }

    pub fn stop_periodic(&mut self) {
        self.periodic_at = None;
    }

    pub fn cancel_all(&mut self) {
        self.debounce_at = None;
        self.periodic_at = None;
    }

    pub fn debounce_pending(&self) -> bool {
        self.debounce_at.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_at, self.periodic_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // Clears the debounce timer and re-arms the periodic one if they're due
    pub fn take_due(&mut self, now: Instant) -> DueTimers {
        let mut due = DueTimers::default();
        if matches!(self.debounce_at, Some(at) if at <= now) {
            self.debounce_at = None;
            due.debounce = true;
        }
        if let Some(at) = self.periodic_at {
            if at <= now {
                self.periodic_at = Some(now + self.interval);
                due.periodic = true;
            }
        }
        due
    }

    // Very short listens are noise and never reach the store
    pub fn worth_saving(&self, percent: u8) -> bool {
        percent > self.min_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> ProgressSchedule {
        ProgressSchedule::new(&PlayerSettings {
            debounce_ms: 1000,
            periodic_save_secs: 5,
            min_progress_percent: 3,
            ..PlayerSettings::default()
        })
    }

    #[test]
    fn debounce_fires_once_after_quiet_period() {
        let mut s = schedule();
        let t0 = Instant::now();
        s.restart_debounce(t0);
        s.restart_debounce(t0 + Duration::from_millis(400));
        s.restart_debounce(t0 + Duration::from_millis(800));

        assert_eq!(s.take_due(t0 + Duration::from_millis(1500)), DueTimers::default());
        let due = s.take_due(t0 + Duration::from_millis(1800));
        assert!(due.debounce);
        assert!(!s.debounce_pending());
        assert!(!s.take_due(t0 + Duration::from_secs(10)).debounce);
    }

    #[test]
    fn periodic_rearms_until_stopped() {
        let mut s = schedule();
        let t0 = Instant::now();
        s.start_periodic(t0);
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_secs(5)));

        assert!(s.take_due(t0 + Duration::from_secs(5)).periodic);
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_secs(10)));

        s.stop_periodic();
        assert_eq!(s.next_deadline(), None);
        assert!(!s.take_due(t0 + Duration::from_secs(20)).periodic);
    }

    #[test]
    fn next_deadline_is_the_earliest() {
        let mut s = schedule();
        let t0 = Instant::now();
        s.start_periodic(t0);
        s.restart_debounce(t0);
        assert_eq!(s.next_deadline(), Some(t0 + Duration::from_secs(1)));
        s.cancel_all();
        assert_eq!(s.next_deadline(), None);
    }

    #[test]
    fn threshold_discards_short_listens() {
        let s = schedule();
        assert!(!s.worth_saving(0));
        assert!(!s.worth_saving(3));
        assert!(s.worth_saving(4));
    }
}
