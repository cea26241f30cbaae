//! Normalizes the refresh sources of a dashboard into one prioritized trigger stream.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::store::ChangeKind;

/// Priority class of a trigger; the derived order is the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerClass {
    Periodic,
    Manual,
    Push,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Mount,
    Visibility,
    Focus,
    Periodic,
    Push(ChangeKind),
    ForceRefresh,
}

impl Trigger {
    pub fn class(&self) -> TriggerClass {
        match self {
            Trigger::Periodic => TriggerClass::Periodic,
            Trigger::Push(_) => TriggerClass::Push,
            Trigger::Mount | Trigger::Visibility | Trigger::Focus | Trigger::ForceRefresh => {
                TriggerClass::Manual
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Mount => write!(f, "mount"),
            Trigger::Visibility => write!(f, "visibility"),
            Trigger::Focus => write!(f, "focus"),
            Trigger::Periodic => write!(f, "periodic"),
            Trigger::Push(ChangeKind::ProfileChanged) => write!(f, "push:profile"),
            Trigger::Push(ChangeKind::AnalysisInserted) => write!(f, "push:analysis"),
            Trigger::ForceRefresh => write!(f, "force_refresh"),
        }
    }
}

/// Whether a debounced source would fire right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Armed,
    Debouncing,
}

#[derive(Debug, Clone, Copy)]
pub struct BusTimings {
    pub focus_debounce: Duration,
    pub periodic_interval: Duration,
}

#[derive(Debug, Default, Clone, Copy)]
struct LastFired {
    periodic: Option<Instant>,
    manual: Option<Instant>,
    push: Option<Instant>,
}

/// Per-session trigger bus. Keeps only last-fired timestamps and the last seen visibility.
#[derive(Debug)]
pub struct TriggerBus {
    timings: BusTimings,
    mounted: bool,
    visible: bool,
    last_visible_at: Option<Instant>,
    last: LastFired,
}

impl TriggerBus {
    pub fn new(timings: BusTimings) -> Self {
        Self {
            timings,
            mounted: false,
            visible: true,
            last_visible_at: None,
            last: LastFired::default(),
        }
    }

    pub fn mount(&mut self, now: Instant) -> Option<Trigger> {
        if self.mounted {
            return None;
        }
        self.mounted = true;
        Some(self.fire(Trigger::Mount, now))
    }

    /// Fires only on a hidden to visible transition.
    pub fn visibility_changed(&mut self, visible: bool, now: Instant) -> Option<Trigger> {
        let was_visible = std::mem::replace(&mut self.visible, visible);
        if !visible || was_visible {
            return None;
        }
        self.last_visible_at = Some(now);
        Some(self.fire(Trigger::Visibility, now))
    }

    pub fn focus_state(&self, now: Instant) -> DebounceState {
        match self.last_visible_at {
            Some(at) if now.saturating_duration_since(at) < self.timings.focus_debounce => {
                DebounceState::Debouncing
            }
            _ => DebounceState::Armed,
        }
    }

    pub fn focus(&mut self, now: Instant) -> Option<Trigger> {
        if self.focus_state(now) == DebounceState::Debouncing {
            debug!("focus debounced against visibility");
            return None;
        }
        Some(self.fire(Trigger::Focus, now))
    }

    /// Periodic tick; suppressed when a manual or push trigger fired within the interval.
    pub fn periodic(&mut self, now: Instant) -> Option<Trigger> {
        let recent = |at: Option<Instant>| {
            at.is_some_and(|t| now.saturating_duration_since(t) < self.timings.periodic_interval)
        };
        if recent(self.last.manual) || recent(self.last.push) {
            debug!("periodic refresh suppressed by recent trigger");
            return None;
        }
        Some(self.fire(Trigger::Periodic, now))
    }

    pub fn push(&mut self, kind: ChangeKind, now: Instant) -> Trigger {
        self.fire(Trigger::Push(kind), now)
    }

    pub fn force_refresh(&mut self, now: Instant) -> Trigger {
        self.fire(Trigger::ForceRefresh, now)
    }

    #[cfg(test)]
    pub fn last_fired(&self, class: TriggerClass) -> Option<Instant> {
        match class {
            TriggerClass::Periodic => self.last.periodic,
            TriggerClass::Manual => self.last.manual,
            TriggerClass::Push => self.last.push,
        }
    }

    fn fire(&mut self, trigger: Trigger, now: Instant) -> Trigger {
        let slot = match trigger.class() {
            TriggerClass::Periodic => &mut self.last.periodic,
            TriggerClass::Manual => &mut self.last.manual,
            TriggerClass::Push => &mut self.last.push,
        };
        *slot = Some(now);
        trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> TriggerBus {
        TriggerBus::new(BusTimings {
            focus_debounce: Duration::from_millis(500),
            periodic_interval: Duration::from_secs(10),
        })
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn classes_are_ordered_by_priority() {
        assert!(TriggerClass::Push > TriggerClass::Manual);
        assert!(TriggerClass::Manual > TriggerClass::Periodic);
        assert_eq!(Trigger::Mount.class(), TriggerClass::Manual);
        assert_eq!(Trigger::ForceRefresh.class(), TriggerClass::Manual);
        assert_eq!(Trigger::Push(ChangeKind::ProfileChanged).class(), TriggerClass::Push);
    }

    #[test]
    fn mount_fires_once() {
        let mut b = bus();
        let t0 = Instant::now();
        assert_eq!(b.mount(t0), Some(Trigger::Mount));
        assert_eq!(b.mount(t0 + ms(1)), None);
    }

    #[test]
    fn visibility_fires_only_when_becoming_visible() {
        let mut b = bus();
        let t0 = Instant::now();
        assert_eq!(b.visibility_changed(true, t0), None, "already visible");
        assert_eq!(b.visibility_changed(false, t0 + ms(10)), None);
        assert_eq!(b.visibility_changed(false, t0 + ms(20)), None);
        assert_eq!(b.visibility_changed(true, t0 + ms(30)), Some(Trigger::Visibility));
        assert_eq!(b.visibility_changed(true, t0 + ms(40)), None);
    }

    #[test]
    fn focus_is_debounced_after_visibility() {
        let mut b = bus();
        let t0 = Instant::now();
        b.visibility_changed(false, t0);
        b.visibility_changed(true, t0 + ms(100));
        assert_eq!(b.focus_state(t0 + ms(300)), DebounceState::Debouncing);
        assert_eq!(b.focus(t0 + ms(300)), None);
        assert_eq!(b.focus_state(t0 + ms(600)), DebounceState::Armed);
        assert_eq!(b.focus(t0 + ms(600)), Some(Trigger::Focus));
    }

    #[test]
    fn focus_without_visibility_fires() {
        let mut b = bus();
        assert_eq!(b.focus(Instant::now()), Some(Trigger::Focus));
    }

    #[test]
    fn periodic_suppressed_by_recent_manual_or_push() {
        let mut b = bus();
        let t0 = Instant::now();
        b.mount(t0);
        assert_eq!(b.periodic(t0 + Duration::from_secs(5)), None);
        assert_eq!(b.periodic(t0 + Duration::from_secs(10)), Some(Trigger::Periodic));

        let t1 = t0 + Duration::from_secs(20);
        b.push(ChangeKind::AnalysisInserted, t1);
        assert_eq!(b.periodic(t1 + Duration::from_secs(9)), None);
        assert_eq!(b.periodic(t1 + Duration::from_secs(10)), Some(Trigger::Periodic));
    }

    #[test]
    fn push_and_force_refresh_always_fire() {
        let mut b = bus();
        let t0 = Instant::now();
        assert_eq!(b.periodic(t0), Some(Trigger::Periodic));
        assert_eq!(
            b.push(ChangeKind::ProfileChanged, t0),
            Trigger::Push(ChangeKind::ProfileChanged)
        );
        assert_eq!(b.force_refresh(t0), Trigger::ForceRefresh);
        assert_eq!(b.last_fired(TriggerClass::Push), Some(t0));
        assert_eq!(b.last_fired(TriggerClass::Manual), Some(t0));
    }
}
