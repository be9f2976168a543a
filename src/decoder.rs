//! Raw input records to canonical events.
//!
//! The platform layer copies the fields it needs out of the OS structure
//! into a [`RawRecord`]; everything past that point is plain data and never
//! fails loudly. Records that cannot be decoded produce `None`.

use crate::event::{CanonicalEvent, Modifiers};
use crate::label::build_label;

/// Opaque OS device handle. Zero means "no source device".
pub type DeviceHandle = isize;

/// Keyboard record flag marking a key release.
pub const RI_KEY_BREAK: u16 = 0x0001;

pub const RI_MOUSE_LEFT_BUTTON_DOWN: u16 = 0x0001;
pub const RI_MOUSE_LEFT_BUTTON_UP: u16 = 0x0002;
pub const RI_MOUSE_RIGHT_BUTTON_DOWN: u16 = 0x0004;
pub const RI_MOUSE_RIGHT_BUTTON_UP: u16 = 0x0008;
pub const RI_MOUSE_MIDDLE_BUTTON_DOWN: u16 = 0x0010;
pub const RI_MOUSE_MIDDLE_BUTTON_UP: u16 = 0x0020;
pub const RI_MOUSE_BUTTON_4_DOWN: u16 = 0x0040;
pub const RI_MOUSE_BUTTON_4_UP: u16 = 0x0080;
pub const RI_MOUSE_BUTTON_5_DOWN: u16 = 0x0100;
pub const RI_MOUSE_BUTTON_5_UP: u16 = 0x0200;

/// Down flag, up flag and label per mouse button, in priority order.
const MOUSE_BUTTONS: [(u16, u16, &str); 5] = [
    (RI_MOUSE_LEFT_BUTTON_DOWN, RI_MOUSE_LEFT_BUTTON_UP, "LeftButton"),
    (RI_MOUSE_RIGHT_BUTTON_DOWN, RI_MOUSE_RIGHT_BUTTON_UP, "RightButton"),
    (RI_MOUSE_MIDDLE_BUTTON_DOWN, RI_MOUSE_MIDDLE_BUTTON_UP, "MiddleButton"),
    (RI_MOUSE_BUTTON_4_DOWN, RI_MOUSE_BUTTON_4_UP, "XButton1"),
    (RI_MOUSE_BUTTON_5_DOWN, RI_MOUSE_BUTTON_5_UP, "XButton2"),
];

/// Plain-data copy of one raw input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawRecord<'a> {
    Keyboard {
        device: DeviceHandle,
        vkey: u16,
        flags: u16,
    },
    Mouse {
        device: DeviceHandle,
        button_flags: u16,
    },
    Hid {
        device: DeviceHandle,
        /// Size of one report in bytes.
        size_hid: u32,
        /// Number of reports in `data`.
        count: u32,
        data: &'a [u8],
    },
}

impl RawRecord<'_> {
    #[inline]
    pub fn device(&self) -> DeviceHandle {
        match *self {
            RawRecord::Keyboard { device, .. }
            | RawRecord::Mouse { device, .. }
            | RawRecord::Hid { device, .. } => device,
        }
    }
}

/// Identity of a HID device as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidDeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub usage_page: u16,
    pub usage: u16,
    /// Friendly product name, when the device exposes one.
    pub name: Option<String>,
}

impl HidDeviceInfo {
    pub fn device_label(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("HID {:04X}:{:04X}", self.vendor_id, self.product_id),
        }
    }
}

/// Device-info query backing HID decoding.
pub trait DeviceInfoSource: Send + Sync {
    fn hid_info(&self, device: DeviceHandle) -> Option<HidDeviceInfo>;
}

impl<F> DeviceInfoSource for F
where
    F: Fn(DeviceHandle) -> Option<HidDeviceInfo> + Send + Sync,
{
    fn hid_info(&self, device: DeviceHandle) -> Option<HidDeviceInfo> {
        self(device)
    }
}

/// Caches device info per handle in front of a slower source.
pub struct DeviceInfoCache<S> {
    source: S,
    cache: scc::HashMap<DeviceHandle, HidDeviceInfo>,
}

impl<S: DeviceInfoSource> DeviceInfoCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: scc::HashMap::new(),
        }
    }

    /// Drops the entry for one handle, e.g. on device removal.
    pub fn invalidate(&self, device: DeviceHandle) {
        let _ = self.cache.remove_sync(&device);
    }

    pub fn clear(&self) {
        self.cache.clear_sync();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<S: DeviceInfoSource> DeviceInfoSource for DeviceInfoCache<S> {
    fn hid_info(&self, device: DeviceHandle) -> Option<HidDeviceInfo> {
        if let Some(info) = self.cache.read_sync(&device, |_, v| v.clone()) {
            return Some(info);
        }
        let info = self.source.hid_info(device)?;
        let _ = self.cache.upsert_sync(device, info.clone());
        Some(info)
    }
}

/// Turns raw records into canonical events.
pub struct RawEventDecoder<S> {
    devices: S,
}

impl<S: DeviceInfoSource> RawEventDecoder<S> {
    pub fn new(devices: S) -> Self {
        Self { devices }
    }

    #[inline]
    pub fn devices(&self) -> &S {
        &self.devices
    }

    /// Decodes a press ("make" transition or button down).
    ///
    /// `modifiers` is the modifier state held at the time of the record.
    pub fn decode(&self, record: &RawRecord<'_>, modifiers: Modifiers) -> Option<CanonicalEvent> {
        // SendInput records carry no source device; dropping them keeps the
        // engine from re-reading its own keystrokes.
        if record.device() == 0 {
            return None;
        }

        match *record {
            RawRecord::Keyboard { vkey, flags, .. } => {
                if flags & RI_KEY_BREAK != 0 {
                    return None;
                }
                keyboard_event(vkey, modifiers)
            }
            RawRecord::Mouse { button_flags, .. } => MOUSE_BUTTONS
                .iter()
                .find(|(down, _, _)| button_flags & down != 0)
                .map(|(_, _, label)| CanonicalEvent::mouse(*label)),
            RawRecord::Hid {
                device,
                size_hid,
                count,
                data,
            } => {
                let expected = (size_hid as usize).checked_mul(count as usize)?;
                if expected == 0 || data.len() < expected {
                    return None;
                }
                let info = self.devices.hid_info(device)?;
                Some(CanonicalEvent::hid(
                    info.device_label(),
                    info.vendor_id,
                    info.product_id,
                    format!("UsagePage {}, Usage {}", info.usage_page, info.usage),
                ))
            }
        }
    }

    /// Decodes a release ("break" transition or button up).
    ///
    /// HID reports have no release notion and always produce `None`.
    pub fn decode_release(
        &self,
        record: &RawRecord<'_>,
        modifiers: Modifiers,
    ) -> Option<CanonicalEvent> {
        if record.device() == 0 {
            return None;
        }

        match *record {
            RawRecord::Keyboard { vkey, flags, .. } => {
                if flags & RI_KEY_BREAK == 0 {
                    return None;
                }
                keyboard_event(vkey, modifiers)
            }
            RawRecord::Mouse { button_flags, .. } => MOUSE_BUTTONS
                .iter()
                .find(|(_, up, _)| button_flags & up != 0)
                .map(|(_, _, label)| CanonicalEvent::mouse(*label)),
            RawRecord::Hid { .. } => None,
        }
    }
}

#[inline]
fn keyboard_event(vkey: u16, modifiers: Modifiers) -> Option<CanonicalEvent> {
    // 0xFF is the OS placeholder for escaped scan-code prefixes.
    if vkey == 0 || vkey == 0xFF {
        return None;
    }
    Some(CanonicalEvent::keyboard(build_label(modifiers, u32::from(vkey))))
}
