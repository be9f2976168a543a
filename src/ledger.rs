//! Ledger of virtual outputs currently asserted by the router.

use std::collections::HashMap;

use crate::model::OutputId;

/// Set of pressed outputs, each tagged with the generation of its press.
///
/// The generation lets a delayed tap release tell whether the press it was
/// scheduled for is still the one in the ledger.
#[derive(Debug, Default)]
pub struct ActiveOutputLedger {
    pressed: HashMap<OutputId, u64>,
    next_generation: u64,
}

impl ActiveOutputLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as pressed and returns the generation of this press.
    ///
    /// Re-pressing an output that is already pressed starts a new generation
    /// but does not add a second entry.
    pub fn press(&mut self, id: OutputId) -> u64 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.pressed.insert(id, self.next_generation);
        self.next_generation
    }

    /// Removes `id`. Returns whether it was pressed.
    pub fn release(&mut self, id: OutputId) -> bool {
        self.pressed.remove(&id).is_some()
    }

    #[inline]
    pub fn is_pressed(&self, id: OutputId) -> bool {
        self.pressed.contains_key(&id)
    }

    #[inline]
    pub fn generation(&self, id: OutputId) -> Option<u64> {
        self.pressed.get(&id).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pressed.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pressed.is_empty()
    }

    /// Empties the ledger and returns the drained outputs in a stable order.
    pub fn drain(&mut self) -> Vec<OutputId> {
        let mut ids: Vec<OutputId> = self.pressed.drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_is_idempotent_per_output() {
        let mut ledger = ActiveOutputLedger::new();
        let first = ledger.press(OutputId::Joystick(1));
        let second = ledger.press(OutputId::Joystick(1));
        assert_eq!(ledger.len(), 1);
        assert_ne!(first, second);
        assert_eq!(ledger.generation(OutputId::Joystick(1)), Some(second));
    }

    #[test]
    fn test_release_reports_prior_state() {
        let mut ledger = ActiveOutputLedger::new();
        ledger.press(OutputId::Joystick(4));
        assert!(ledger.release(OutputId::Joystick(4)));
        assert!(!ledger.release(OutputId::Joystick(4)));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_drain_empties_ledger() {
        let mut ledger = ActiveOutputLedger::new();
        ledger.press(OutputId::Joystick(7));
        ledger.press(OutputId::Keyboard {
            scan_code: 0x1E,
            extended: false,
        });
        ledger.press(OutputId::Joystick(2));

        let drained = ledger.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0], OutputId::Joystick(2));
        assert!(ledger.is_empty());
        assert!(ledger.drain().is_empty());
    }
}
