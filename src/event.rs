//! Canonical input events exchanged between capture and routing layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Class of the physical device an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    Keyboard,
    Mouse,
    #[serde(rename = "HID", alias = "Hid")]
    Hid,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Keyboard => "Keyboard",
            DeviceClass::Mouse => "Mouse",
            DeviceClass::Hid => "HID",
        };
        f.write_str(name)
    }
}

/// Modifier keys held during a key transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub win: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        alt: false,
        shift: false,
        win: false,
    };

    pub const CTRL: Modifiers = Modifiers {
        ctrl: true,
        ..Modifiers::NONE
    };

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        !(self.ctrl || self.alt || self.shift || self.win)
    }

    /// Packs the modifier state into the low four bits (ctrl, alt, shift, win).
    #[inline(always)]
    pub fn bits(&self) -> u8 {
        (self.ctrl as u8) | (self.alt as u8) << 1 | (self.shift as u8) << 2 | (self.win as u8) << 3
    }

    #[inline(always)]
    pub fn from_bits(bits: u8) -> Self {
        Self {
            ctrl: bits & 0b0001 != 0,
            alt: bits & 0b0010 != 0,
            shift: bits & 0b0100 != 0,
            win: bits & 0b1000 != 0,
        }
    }
}

/// Normalized description of one input transition.
///
/// Only `device_class` and `control_label` take part in binding matches; the
/// remaining fields are informational.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalEvent {
    pub device_class: DeviceClass,
    pub device_label: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub control_label: String,
}

impl CanonicalEvent {
    pub fn keyboard(control_label: impl Into<String>) -> Self {
        Self {
            device_class: DeviceClass::Keyboard,
            device_label: "Keyboard".to_string(),
            vendor_id: 0,
            product_id: 0,
            control_label: control_label.into(),
        }
    }

    pub fn mouse(control_label: impl Into<String>) -> Self {
        Self {
            device_class: DeviceClass::Mouse,
            device_label: "Mouse".to_string(),
            vendor_id: 0,
            product_id: 0,
            control_label: control_label.into(),
        }
    }

    pub fn hid(
        device_label: impl Into<String>,
        vendor_id: u16,
        product_id: u16,
        control_label: impl Into<String>,
    ) -> Self {
        Self {
            device_class: DeviceClass::Hid,
            device_label: device_label.into(),
            vendor_id,
            product_id,
            control_label: control_label.into(),
        }
    }
}

impl fmt::Display for CanonicalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.device_class, self.device_label, self.control_label)
    }
}

/// Transition delivered through the event pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Pressed(CanonicalEvent),
    Released(CanonicalEvent),
}

impl InputEvent {
    #[inline(always)]
    pub fn event(&self) -> &CanonicalEvent {
        match self {
            InputEvent::Pressed(e) | InputEvent::Released(e) => e,
        }
    }

    #[inline(always)]
    pub fn is_press(&self) -> bool {
        matches!(self, InputEvent::Pressed(_))
    }
}
