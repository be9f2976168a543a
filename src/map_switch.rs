//! Debounced next/previous map hotkeys.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::event::CanonicalEvent;
use crate::matcher::trigger_matches;
use crate::model::DeviceTrigger;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Which map-cycle actions fired for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub next: bool,
    pub prev: bool,
}

impl SwitchOutcome {
    #[inline]
    pub fn any(&self) -> bool {
        self.next || self.prev
    }
}

/// Window tracker for one direction.
#[derive(Debug, Default)]
struct Debounce {
    last_fired: Mutex<Option<Instant>>,
}

impl Debounce {
    /// Claims the slot at `now` unless the previous fire is inside `window`.
    fn try_fire(&self, now: Instant, window: Duration) -> bool {
        let mut last = self.last_fired.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

/// Fires map-cycle actions for matching trigger events, at most once per
/// debounce window and direction.
///
/// The same physical press can reach this controller twice, once from the
/// interceptor and once from the raw listener; the window absorbs that.
#[derive(Debug)]
pub struct MapSwitchController {
    window: Duration,
    next: Debounce,
    prev: Debounce,
}

impl Default for MapSwitchController {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl MapSwitchController {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            next: Debounce::default(),
            prev: Debounce::default(),
        }
    }

    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn on_input(
        &self,
        event: &CanonicalEvent,
        next_trigger: Option<&DeviceTrigger>,
        prev_trigger: Option<&DeviceTrigger>,
        next_action: impl FnOnce(),
        prev_action: impl FnOnce(),
    ) -> SwitchOutcome {
        self.on_input_at(
            Instant::now(),
            event,
            next_trigger,
            prev_trigger,
            next_action,
            prev_action,
        )
    }

    pub fn on_input_at(
        &self,
        now: Instant,
        event: &CanonicalEvent,
        next_trigger: Option<&DeviceTrigger>,
        prev_trigger: Option<&DeviceTrigger>,
        next_action: impl FnOnce(),
        prev_action: impl FnOnce(),
    ) -> SwitchOutcome {
        let mut outcome = SwitchOutcome::default();

        if next_trigger.is_some_and(|t| trigger_matches(t, event))
            && self.next.try_fire(now, self.window)
        {
            log::debug!("map_switch: next map via {}", event.control_label);
            next_action();
            outcome.next = true;
        }

        if prev_trigger.is_some_and(|t| trigger_matches(t, event))
            && self.prev.try_fire(now, self.window)
        {
            log::debug!("map_switch: previous map via {}", event.control_label);
            prev_action();
            outcome.prev = true;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeviceClass;
    use std::cell::Cell;

    fn trigger(label: &str) -> DeviceTrigger {
        DeviceTrigger::new(DeviceClass::Keyboard, label)
    }

    #[test]
    fn test_presses_inside_window_fire_once() {
        let controller = MapSwitchController::new(Duration::from_millis(250));
        let next = trigger("PageDown");
        let event = CanonicalEvent::keyboard("PageDown");
        let fired = Cell::new(0);
        let t0 = Instant::now();

        for offset in [0, 10] {
            controller.on_input_at(
                t0 + Duration::from_millis(offset),
                &event,
                Some(&next),
                None,
                || fired.set(fired.get() + 1),
                || {},
            );
        }
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_presses_outside_window_fire_twice() {
        let controller = MapSwitchController::new(Duration::from_millis(250));
        let next = trigger("PageDown");
        let event = CanonicalEvent::keyboard("PageDown");
        let fired = Cell::new(0);
        let t0 = Instant::now();

        for offset in [0, 300] {
            controller.on_input_at(
                t0 + Duration::from_millis(offset),
                &event,
                Some(&next),
                None,
                || fired.set(fired.get() + 1),
                || {},
            );
        }
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn test_directions_debounce_independently() {
        let controller = MapSwitchController::default();
        let next = trigger("PageDown");
        let prev = trigger("PageUp");
        let t0 = Instant::now();

        let first = controller.on_input_at(
            t0,
            &CanonicalEvent::keyboard("PageDown"),
            Some(&next),
            Some(&prev),
            || {},
            || {},
        );
        let second = controller.on_input_at(
            t0 + Duration::from_millis(10),
            &CanonicalEvent::keyboard("pageup"),
            Some(&next),
            Some(&prev),
            || {},
            || {},
        );
        assert_eq!(first, SwitchOutcome { next: true, prev: false });
        assert_eq!(second, SwitchOutcome { next: false, prev: true });
    }

    #[test]
    fn test_non_matching_event_does_not_arm_window() {
        let controller = MapSwitchController::default();
        let next = trigger("PageDown");
        let t0 = Instant::now();

        let miss = controller.on_input_at(
            t0,
            &CanonicalEvent::keyboard("K"),
            Some(&next),
            None,
            || panic!("must not fire"),
            || {},
        );
        assert!(!miss.any());

        let hit = controller.on_input_at(
            t0 + Duration::from_millis(5),
            &CanonicalEvent::keyboard("PageDown"),
            Some(&next),
            None,
            || {},
            || {},
        );
        assert!(hit.next);
    }

    #[test]
    fn test_missing_triggers_never_fire() {
        let controller = MapSwitchController::default();
        let outcome = controller.on_input(
            &CanonicalEvent::mouse("LeftButton"),
            None,
            None,
            || panic!("no next trigger"),
            || panic!("no prev trigger"),
        );
        assert_eq!(outcome, SwitchOutcome::default());
    }
}
