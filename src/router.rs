//! Output router: turns matched bindings into virtual output transitions.
//!
//! Every driver call and ledger mutation happens under one mutex. A press is
//! matched against the active map and emitted under that same lock, so a
//! context switch taken through [`OutputRouter::switch_context`] can never
//! interleave with a half-routed press. Outputs stay in the ledger until they
//! are released, either by the release of the control that pressed them, an
//! expired tap, or [`OutputRouter::release_all`].

mod tap;

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use smallvec::SmallVec;

use crate::event::{CanonicalEvent, DeviceClass};
use crate::label;
use crate::ledger::ActiveOutputLedger;
use crate::matcher;
use crate::model::{OutputId, ProfileStore, VirtualOutput};
use crate::sink::{SinkError, VirtualOutputSink};

use tap::TapScheduler;

/// Default hold time for tap emission.
pub const DEFAULT_TAP_DURATION: Duration = Duration::from_millis(40);

/// How a press is turned into output transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionMode {
    /// Assert on press, release on the matching release event.
    Hold,
    /// Assert on press, release automatically after the given duration.
    Tap(Duration),
}

impl Default for EmissionMode {
    fn default() -> Self {
        EmissionMode::Tap(DEFAULT_TAP_DURATION)
    }
}

/// Decides whether routing may run at this moment.
pub trait OperationGate: Send + Sync {
    fn should_operate_now(&self) -> bool;
}

impl<F> OperationGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn should_operate_now(&self) -> bool {
        self()
    }
}

/// Physical control behind an event, independent of the modifiers held.
///
/// `Ctrl + K` and `K` come from the same key, so a chord released after its
/// modifier still finds the outputs it pressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ControlSource {
    class: DeviceClass,
    control: String,
}

impl ControlSource {
    fn of(event: &CanonicalEvent) -> Self {
        let control = match event.device_class {
            DeviceClass::Keyboard => label::strip_modifiers(&event.control_label),
            _ => event.control_label.trim(),
        };
        Self {
            class: event.device_class,
            control: control.to_ascii_lowercase(),
        }
    }
}

struct RouterCore {
    sink: Box<dyn VirtualOutputSink>,
    ledger: ActiveOutputLedger,
    /// Outputs each held control pressed in Hold mode.
    held: HashMap<ControlSource, SmallVec<[OutputId; 4]>>,
}

impl RouterCore {
    #[inline]
    fn drive(&mut self, id: OutputId, down: bool) -> Result<(), SinkError> {
        match id {
            OutputId::Joystick(index) => self.sink.set_joystick_button(index, down),
            OutputId::Keyboard {
                scan_code,
                extended,
            } => self.sink.send_key(scan_code, extended, down),
        }
    }

    /// Issues one transition. Returns the ledger generation for a successful
    /// press, `Some(0)` for a successful release.
    fn emit(&mut self, output: VirtualOutput, down: bool) -> Option<u64> {
        let Some(id) = output.output_id() else {
            if output != VirtualOutput::None {
                log::warn!("router: ignoring out-of-range output {:?}", output);
            }
            return None;
        };

        if !self.sink.is_available(id) {
            log::debug!("router: driver unavailable, dropping {} {}", id, down);
            return None;
        }

        match self.drive(id, down) {
            Ok(()) if down => Some(self.ledger.press(id)),
            Ok(()) => {
                self.ledger.release(id);
                Some(0)
            }
            Err(e) => {
                log::warn!("router: {} {} failed: {}", id, if down { "down" } else { "up" }, e);
                if !down {
                    self.ledger.release(id);
                }
                None
            }
        }
    }

    /// Releases a pressed output. Returns false when it was not pressed.
    fn release(&mut self, id: OutputId) -> bool {
        if !self.ledger.is_pressed(id) {
            return false;
        }
        if let Err(e) = self.drive(id, false) {
            log::warn!("router: release of {} failed: {}", id, e);
        }
        self.ledger.release(id)
    }

    #[inline]
    fn is_held(&self, id: OutputId) -> bool {
        self.held.values().any(|ids| ids.contains(&id))
    }

    fn release_all(&mut self) -> usize {
        self.held.clear();
        let pressed = self.ledger.drain();
        for &id in &pressed {
            if let Err(e) = self.drive(id, false) {
                log::warn!("router: release of {} failed: {}", id, e);
            }
        }
        if !pressed.is_empty() {
            log::debug!("router: released {} active outputs", pressed.len());
        }
        pressed.len()
    }
}

struct RouterShared {
    core: Mutex<RouterCore>,
    profiles: Arc<ProfileStore>,
    gate: Arc<dyn OperationGate>,
}

impl RouterShared {
    #[inline]
    fn lock(&self) -> MutexGuard<'_, RouterCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases `id` only if the press of `generation` is still current and
    /// no held control still owns it.
    fn release_tap(&self, id: OutputId, generation: u64) {
        let mut core = self.lock();
        if core.ledger.generation(id) != Some(generation) || core.is_held(id) {
            return;
        }
        core.release(id);
    }

    fn outputs_for(&self, event: &CanonicalEvent) -> SmallVec<[VirtualOutput; 4]> {
        self.profiles
            .with_active_map(|map| matcher::matched_outputs(map, event))
            .unwrap_or_default()
    }
}

/// Routes canonical events to the virtual output sink.
pub struct OutputRouter {
    shared: Arc<RouterShared>,
    mode: EmissionMode,
    taps: Option<TapScheduler>,
}

impl OutputRouter {
    pub fn new(
        sink: Box<dyn VirtualOutputSink>,
        profiles: Arc<ProfileStore>,
        gate: Arc<dyn OperationGate>,
        mode: EmissionMode,
    ) -> io::Result<Self> {
        let shared = Arc::new(RouterShared {
            core: Mutex::new(RouterCore {
                sink,
                ledger: ActiveOutputLedger::new(),
                held: HashMap::new(),
            }),
            profiles,
            gate,
        });

        // Hold mode still taps HID presses, so the timer always runs.
        let weak = Arc::downgrade(&shared);
        let taps = TapScheduler::start(move |id, generation| {
            if let Some(shared) = weak.upgrade() {
                shared.release_tap(id, generation);
            }
        })?;

        Ok(Self {
            shared,
            mode,
            taps: Some(taps),
        })
    }

    #[inline]
    pub fn mode(&self) -> EmissionMode {
        self.mode
    }

    /// Emission used for `event`. HID reports never produce a release, so
    /// Hold mode falls back to a default-length tap for them.
    pub fn emission_for(&self, event: &CanonicalEvent) -> EmissionMode {
        match self.mode {
            EmissionMode::Hold if event.device_class == DeviceClass::Hid => {
                EmissionMode::Tap(DEFAULT_TAP_DURATION)
            }
            mode => mode,
        }
    }

    /// Emits "down" for every output bound to `event` in the active map.
    ///
    /// Does nothing while the gate reports routing suspended or disabled.
    /// Returns the number of outputs asserted.
    pub fn on_input(&self, event: &CanonicalEvent) -> usize {
        let mut core = self.shared.lock();
        if !self.shared.gate.should_operate_now() {
            return 0;
        }

        let mode = self.emission_for(event);
        let mut pressed: SmallVec<[OutputId; 4]> = SmallVec::new();
        for output in self.shared.outputs_for(event) {
            let (Some(generation), Some(id)) = (core.emit(output, true), output.output_id()) else {
                continue;
            };
            pressed.push(id);
            if let (EmissionMode::Tap(duration), Some(taps)) = (mode, &self.taps) {
                taps.schedule(id, generation, duration);
            }
        }

        let asserted = pressed.len();
        if mode == EmissionMode::Hold && asserted > 0 {
            let owned = core.held.entry(ControlSource::of(event)).or_default();
            for id in pressed {
                if !owned.contains(&id) {
                    owned.push(id);
                }
            }
        }
        asserted
    }

    /// Releases the outputs the control behind `event` pressed.
    ///
    /// An output another held control also pressed stays down until that
    /// control is released too. Returns the number of outputs released.
    pub fn on_release(&self, event: &CanonicalEvent) -> usize {
        let mut core = self.shared.lock();
        let Some(owned) = core.held.remove(&ControlSource::of(event)) else {
            return 0;
        };
        owned
            .into_iter()
            .filter(|&id| !core.is_held(id) && core.release(id))
            .count()
    }

    /// Issues a single transition and updates the ledger.
    ///
    /// The sink call is issued even when the output is already in the
    /// requested state. Returns whether the driver accepted the call.
    pub fn emit(&self, output: VirtualOutput, down: bool) -> bool {
        self.shared.lock().emit(output, down).is_some()
    }

    /// Releases every output in the ledger and empties it.
    ///
    /// Returns the number of outputs released.
    pub fn release_all(&self) -> usize {
        self.shared.lock().release_all()
    }

    /// Flushes every active output and runs `change` before any further
    /// press is routed.
    ///
    /// `change` must not call back into the router.
    pub fn switch_context<R>(&self, change: impl FnOnce() -> R) -> R {
        let mut core = self.shared.lock();
        core.release_all();
        change()
    }

    pub fn active_output_count(&self) -> usize {
        self.shared.lock().ledger.len()
    }

    pub fn is_active(&self, id: OutputId) -> bool {
        self.shared.lock().ledger.is_pressed(id)
    }
}

impl Drop for OutputRouter {
    fn drop(&mut self) {
        // Stop the timer first so no tap fires after the final flush.
        self.taps.take();
        self.shared.lock().release_all();
    }
}
