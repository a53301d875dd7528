//! Deadline registry for the manager's single-shot timers.
//!
//! Each [`TimerKind`] holds at most one deadline; arming a kind replaces the
//! previous one. The driver sleeps until [`TimerRegistry::next_due`].

use std::time::Duration;

use tokio::time::Instant;

/// Deadline used when `now + after` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    ConnectTimeout,
    Heartbeat,
    HeartbeatTimeout,
    Reconnect,
}

impl TimerKind {
    const ALL: [TimerKind; 4] = [
        TimerKind::ConnectTimeout,
        TimerKind::Heartbeat,
        TimerKind::HeartbeatTimeout,
        TimerKind::Reconnect,
    ];

    fn slot(self) -> usize {
        match self {
            Self::ConnectTimeout => 0,
            Self::Heartbeat => 1,
            Self::HeartbeatTimeout => 2,
            Self::Reconnect => 3,
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerRegistry {
    deadlines: [Option<Instant>; 4],
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        let now = Instant::now();
        let at = now
            .checked_add(after)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.deadlines[kind.slot()] = Some(at);
    }

    pub fn clear(&mut self, kind: TimerKind) {
        self.deadlines[kind.slot()] = None;
    }

    pub fn clear_all(&mut self) {
        self.deadlines = [None; 4];
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].is_some()
    }

    pub fn active(&self) -> usize {
        self.deadlines.iter().filter(|d| d.is_some()).count()
    }

    /// Earliest armed deadline. Ties go to the kind listed first in [`TimerKind`].
    pub fn next_due(&self) -> Option<(TimerKind, Instant)> {
        TimerKind::ALL
            .iter()
            .filter_map(|k| self.deadlines[k.slot()].map(|at| (*k, at)))
            .min_by_key(|(_, at)| *at)
    }

    /// Disarms and returns `kind` if its deadline has passed.
    pub fn take_if_due(&mut self, kind: TimerKind, now: Instant) -> bool {
        match self.deadlines[kind.slot()] {
            Some(at) if at <= now => {
                self.deadlines[kind.slot()] = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn arming_replaces_previous_deadline() {
        let mut timers = TimerRegistry::new();
        timers.arm(TimerKind::Heartbeat, Duration::from_secs(30));
        timers.arm(TimerKind::Heartbeat, Duration::from_secs(5));
        assert_eq!(timers.active(), 1);

        let (kind, at) = timers.next_due().unwrap();
        assert_eq!(kind, TimerKind::Heartbeat);
        assert_eq!(at, Instant::now() + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn next_due_picks_earliest() {
        let mut timers = TimerRegistry::new();
        timers.arm(TimerKind::Reconnect, Duration::from_millis(10));
        timers.arm(TimerKind::ConnectTimeout, Duration::from_secs(10));
        assert_eq!(timers.next_due().unwrap().0, TimerKind::Reconnect);

        timers.clear(TimerKind::Reconnect);
        assert_eq!(timers.next_due().unwrap().0, TimerKind::ConnectTimeout);
        assert!(!timers.is_armed(TimerKind::Reconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn take_if_due_only_fires_expired() {
        let mut timers = TimerRegistry::new();
        timers.arm(TimerKind::HeartbeatTimeout, Duration::from_secs(1));
        assert!(!timers.take_if_due(TimerKind::HeartbeatTimeout, Instant::now()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(timers.take_if_due(TimerKind::HeartbeatTimeout, Instant::now()));
        assert_eq!(timers.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_delay_is_clamped() {
        let mut timers = TimerRegistry::new();
        timers.arm(TimerKind::Heartbeat, Duration::MAX);
        assert!(timers.is_armed(TimerKind::Heartbeat));

        let (_, at) = timers.next_due().unwrap();
        assert!(at >= Instant::now() + Duration::from_secs(86_400 * 365));
        assert!(!timers.take_if_due(TimerKind::Heartbeat, Instant::now()));
    }

    #[test]
    fn clear_all_empties_registry() {
        let mut timers = TimerRegistry::new();
        for kind in TimerKind::ALL {
            timers.arm(kind, Duration::from_secs(1));
        }
        assert_eq!(timers.active(), 4);
        timers.clear_all();
        assert_eq!(timers.active(), 0);
        assert!(timers.next_due().is_none());
    }
}
