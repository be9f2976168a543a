//! Profiles, maps and bindings as consumed by the routing engine.
//!
//! These values are owned by the configuration collaborator; the engine only
//! reads them. [`ProfileStore`] publishes immutable snapshots so readers on the
//! hook and raw-input threads never wait on a writer.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};

use scc::{AtomicShared, Guard, Shared, Tag};
use serde::{Deserialize, Serialize};

use crate::event::{DeviceClass, Modifiers};
use crate::label;

/// Highest joystick button index supported by the virtual joystick driver.
pub const MAX_JOYSTICK_BUTTON: u8 = 128;

/// Device-origin trigger: a device class plus a control label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceTrigger {
    pub device_class: DeviceClass,
    pub control_label: String,
}

impl DeviceTrigger {
    pub fn new(device_class: DeviceClass, control_label: impl Into<String>) -> Self {
        Self {
            device_class,
            control_label: control_label.into(),
        }
    }
}

/// Output asserted when a binding fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VirtualOutput {
    #[default]
    None,
    JoystickButton { button: u8 },
    Keyboard { scan_code: u16, extended: bool },
}

impl VirtualOutput {
    /// Resolves the output to a ledger identifier; `None` and out-of-range
    /// joystick buttons resolve to nothing.
    #[inline]
    pub fn output_id(&self) -> Option<OutputId> {
        match *self {
            VirtualOutput::None => None,
            VirtualOutput::JoystickButton { button } => {
                if (1..=MAX_JOYSTICK_BUTTON).contains(&button) {
                    Some(OutputId::Joystick(button))
                } else {
                    None
                }
            }
            VirtualOutput::Keyboard {
                scan_code,
                extended,
            } => Some(OutputId::Keyboard {
                scan_code,
                extended,
            }),
        }
    }
}

/// Identifier of one virtual output as tracked by the active-output ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputId {
    Joystick(u8),
    Keyboard { scan_code: u16, extended: bool },
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputId::Joystick(index) => write!(f, "joystick:{}", index),
            OutputId::Keyboard {
                scan_code,
                extended,
            } => write!(f, "keyboard:{}:{}", scan_code, extended),
        }
    }
}

/// User-configured rule mapping one control to one virtual output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    /// Keyboard-origin trigger key, used when `device` is unset.
    #[serde(default, with = "label::key_name", skip_serializing_if = "Option::is_none")]
    pub key: Option<u32>,
    /// Swallow the original key so only the routed output is seen.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub block_original: bool,
    // Table-valued fields stay last so the TOML form keeps plain keys first.
    /// Device-origin trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceTrigger>,
    #[serde(default, skip_serializing_if = "Modifiers::is_empty")]
    pub modifiers: Modifiers,
    #[serde(default)]
    pub output: VirtualOutput,
}

impl Binding {
    pub fn device(
        name: impl Into<String>,
        device_class: DeviceClass,
        control_label: impl Into<String>,
        output: VirtualOutput,
    ) -> Self {
        Self {
            name: name.into(),
            device: Some(DeviceTrigger::new(device_class, control_label)),
            key: None,
            modifiers: Modifiers::NONE,
            output,
            block_original: false,
        }
    }

    pub fn keyboard(
        name: impl Into<String>,
        key: u32,
        modifiers: Modifiers,
        output: VirtualOutput,
    ) -> Self {
        Self {
            name: name.into(),
            device: None,
            key: Some(key),
            modifiers,
            output,
            block_original: false,
        }
    }

    pub fn blocking(mut self) -> Self {
        self.block_original = true;
        self
    }

    /// Trigger this binding matches against.
    ///
    /// Keyboard-origin bindings synthesize their label with the same builder
    /// the capture paths use.
    pub fn trigger(&self) -> Option<DeviceTrigger> {
        if let Some(device) = &self.device {
            return Some(device.clone());
        }
        self.key.map(|vk| {
            DeviceTrigger::new(DeviceClass::Keyboard, label::build_label(self.modifiers, vk))
        })
    }
}

/// Named, ordered collection of bindings plus map-cycling triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Map {
    pub name: String,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_map_trigger: Option<DeviceTrigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_map_trigger: Option<DeviceTrigger>,
}

impl Map {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }
}

/// Ordered collection of maps with exactly one selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Name of the selected map; the first map is used when unset or unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_map: Option<String>,
    #[serde(default)]
    pub maps: Vec<Arc<Map>>,
    #[serde(skip)]
    selected: usize,
}

impl Profile {
    pub fn new(name: impl Into<String>, maps: Vec<Map>) -> Self {
        let mut profile = Self {
            name: name.into(),
            maps: maps.into_iter().map(Arc::new).collect(),
            selected_map: None,
            selected: 0,
        };
        profile.resolve_selection();
        profile
    }

    /// Re-resolves the selected index from `selected_map`, defaulting to the
    /// first map.
    pub fn resolve_selection(&mut self) {
        self.selected = self
            .selected_map
            .as_ref()
            .and_then(|name| self.maps.iter().position(|m| &m.name == name))
            .unwrap_or(0);
        self.selected_map = self.maps.get(self.selected).map(|m| m.name.clone());
    }

    #[inline]
    pub fn selected_index(&self) -> usize {
        self.selected
    }

    #[inline]
    pub fn active_map(&self) -> Option<&Arc<Map>> {
        self.maps.get(self.selected)
    }

    /// Returns a copy of this profile with `index` selected.
    pub fn with_selected(&self, index: usize) -> Option<Self> {
        let map = self.maps.get(index)?;
        let mut next = self.clone();
        next.selected = index;
        next.selected_map = Some(map.name.clone());
        Some(next)
    }
}

/// Holder of the current profile snapshot.
///
/// Reads are lock-free. Writers serialize on a mutex so a read-modify-write
/// such as a map step never overwrites a concurrent profile replacement.
pub struct ProfileStore {
    current: AtomicShared<Profile>,
    writer: Mutex<()>,
}

impl ProfileStore {
    pub fn new(mut profile: Profile) -> Self {
        profile.resolve_selection();
        Self {
            current: AtomicShared::from(Shared::new(profile)),
            writer: Mutex::new(()),
        }
    }

    #[inline]
    fn publish(&self, profile: Profile) {
        let _ = self
            .current
            .swap((Some(Shared::new(profile)), Tag::None), Ordering::Release);
    }

    /// Derives the next snapshot from the current one under the writer lock.
    fn update<R>(&self, next: impl FnOnce(&Profile) -> Option<(Profile, R)>) -> Option<R> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let (profile, result) = next(&self.snapshot())?;
        self.publish(profile);
        Some(result)
    }

    /// Runs `f` against the active map of the current snapshot.
    #[inline]
    pub fn with_active_map<R>(&self, f: impl FnOnce(&Map) -> R) -> Option<R> {
        let guard = Guard::new();
        let ptr = self.current.load(Ordering::Acquire, &guard);
        let map = ptr.as_ref()?.active_map()?;
        Some(f(map))
    }

    /// Clones the current snapshot.
    pub fn snapshot(&self) -> Profile {
        let guard = Guard::new();
        self.current
            .load(Ordering::Acquire, &guard)
            .as_ref()
            .cloned()
            .unwrap_or_default()
    }

    pub fn active_map_name(&self) -> Option<String> {
        self.with_active_map(|map| map.name.clone())
    }

    pub fn replace_profile(&self, mut profile: Profile) {
        profile.resolve_selection();
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.publish(profile);
    }

    /// Selects the map at `index`. Returns false when out of range.
    pub fn select_map(&self, index: usize) -> bool {
        self.update(|profile| Some((profile.with_selected(index)?, ())))
            .is_some()
    }

    /// Advances to the next map, wrapping. Returns the new index.
    pub fn select_next_map(&self) -> Option<usize> {
        self.step(1)
    }

    /// Moves to the previous map, wrapping. Returns the new index.
    pub fn select_previous_map(&self) -> Option<usize> {
        self.step(-1)
    }

    fn step(&self, delta: isize) -> Option<usize> {
        self.update(|profile| {
            let count = profile.maps.len();
            if count == 0 {
                return None;
            }
            let index =
                (profile.selected_index() as isize + delta).rem_euclid(count as isize) as usize;
            Some((profile.with_selected(index)?, index))
        })
    }
}
