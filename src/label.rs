//! Control label construction shared by every keyboard path.
//!
//! The interceptor, the raw-input decoder and keyboard-origin bindings all
//! produce labels through [`build_label`], so a label captured on one path
//! compares equal to the label produced on any other.

use std::borrow::Cow;

use crate::event::Modifiers;

pub const VK_BACK: u32 = 0x08;
pub const VK_RETURN: u32 = 0x0D;
pub const VK_ESCAPE: u32 = 0x1B;
pub const VK_SPACE: u32 = 0x20;
pub const VK_PRIOR: u32 = 0x21;
pub const VK_NEXT: u32 = 0x22;
pub const VK_OEM_PLUS: u32 = 0xBB;
pub const VK_OEM_MINUS: u32 = 0xBD;

pub const VK_SHIFT: u32 = 0x10;
pub const VK_CONTROL: u32 = 0x11;
pub const VK_MENU: u32 = 0x12;
pub const VK_LWIN: u32 = 0x5B;
pub const VK_RWIN: u32 = 0x5C;
pub const VK_LSHIFT: u32 = 0xA0;
pub const VK_RSHIFT: u32 = 0xA1;
pub const VK_LCONTROL: u32 = 0xA2;
pub const VK_RCONTROL: u32 = 0xA3;
pub const VK_LMENU: u32 = 0xA4;
pub const VK_RMENU: u32 = 0xA5;

/// Modifier contributed by `vk` when it is itself a modifier key.
#[inline]
pub fn modifier_of(vk: u32) -> Option<Modifiers> {
    let mut m = Modifiers::NONE;
    match vk {
        VK_CONTROL | VK_LCONTROL | VK_RCONTROL => m.ctrl = true,
        VK_MENU | VK_LMENU | VK_RMENU => m.alt = true,
        VK_SHIFT | VK_LSHIFT | VK_RSHIFT => m.shift = true,
        VK_LWIN | VK_RWIN => m.win = true,
        _ => return None,
    }
    Some(m)
}

/// Folds side-specific Ctrl, Shift and Alt codes into their generic code.
///
/// The keyboard hook reports `VK_LCONTROL` where raw input reports
/// `VK_CONTROL` for the same key. The Win keys have no generic code.
#[inline]
pub fn generic_vk(vk: u32) -> u32 {
    match vk {
        VK_LCONTROL | VK_RCONTROL => VK_CONTROL,
        VK_LSHIFT | VK_RSHIFT => VK_SHIFT,
        VK_LMENU | VK_RMENU => VK_MENU,
        _ => vk,
    }
}

/// Friendly name for the keys users bind most often.
#[inline]
pub fn friendly_key_name(vk: u32) -> Option<Cow<'static, str>> {
    let name = match vk {
        VK_RETURN => "Enter",
        VK_ESCAPE => "Esc",
        VK_PRIOR => "PageUp",
        VK_NEXT => "PageDown",
        VK_SPACE => "Space",
        VK_BACK => "Backspace",
        VK_OEM_PLUS => "+",
        VK_OEM_MINUS => "-",
        0x30..=0x39 | 0x41..=0x5A => {
            return char::from_u32(vk).map(|c| Cow::Owned(c.to_string()));
        }
        _ => return None,
    };
    Some(Cow::Borrowed(name))
}

/// Raw virtual-key tag used when no friendly name exists.
#[inline]
pub fn raw_key_tag(vk: u32) -> String {
    match vk {
        0x41..=0x5A | 0x30..=0x39 => format!("VK_{:02X}", vk),
        0x60..=0x69 => format!("NUMPAD{}", vk - 0x60),
        0x70..=0x87 => format!("F{}", vk - 0x70 + 1),
        0x09 => "TAB".to_string(),
        0x2E => "DELETE".to_string(),
        0x2D => "INSERT".to_string(),
        0x24 => "HOME".to_string(),
        0x23 => "END".to_string(),
        0x26 => "UP".to_string(),
        0x28 => "DOWN".to_string(),
        0x25 => "LEFT".to_string(),
        0x27 => "RIGHT".to_string(),
        0x14 => "CAPITAL".to_string(),
        0x90 => "NUMLOCK".to_string(),
        0x91 => "SCROLL".to_string(),
        0x13 => "PAUSE".to_string(),
        0x2C => "SNAPSHOT".to_string(),
        0x6A => "MULTIPLY".to_string(),
        0x6B => "ADD".to_string(),
        0x6C => "SEPARATOR".to_string(),
        0x6D => "SUBTRACT".to_string(),
        0x6E => "DECIMAL".to_string(),
        0x6F => "DIVIDE".to_string(),
        0xBA => "OEM_1".to_string(),
        0xBC => "OEM_COMMA".to_string(),
        0xBE => "OEM_PERIOD".to_string(),
        0xBF => "OEM_2".to_string(),
        0xC0 => "OEM_3".to_string(),
        0xDB => "OEM_4".to_string(),
        0xDC => "OEM_5".to_string(),
        0xDD => "OEM_6".to_string(),
        0xDE => "OEM_7".to_string(),
        0xDF => "OEM_8".to_string(),
        0xE2 => "OEM_102".to_string(),
        VK_SHIFT => "SHIFT".to_string(),
        VK_CONTROL => "CTRL".to_string(),
        VK_MENU => "ALT".to_string(),
        VK_LCONTROL => "LCTRL".to_string(),
        VK_RCONTROL => "RCTRL".to_string(),
        VK_LMENU => "LALT".to_string(),
        VK_RMENU => "RALT".to_string(),
        VK_LSHIFT => "LSHIFT".to_string(),
        VK_RSHIFT => "RSHIFT".to_string(),
        VK_LWIN => "LWIN".to_string(),
        VK_RWIN => "RWIN".to_string(),
        _ => format!("VK_{:02X}", vk),
    }
}

/// Builds the control label for a key transition.
///
/// Held modifiers are prefixed in the fixed order Ctrl, Alt, Shift, Win, each
/// as `"<Name> + "`. A modifier key does not repeat its own modifier, and
/// left/right variants share the generic key's label.
pub fn build_label(modifiers: Modifiers, vk: u32) -> String {
    let vk = generic_vk(vk);
    let mut held = modifiers;
    if let Some(own) = modifier_of(vk) {
        held = Modifiers::from_bits(held.bits() & !own.bits());
    }

    let mut prefix = String::with_capacity(24);
    if held.ctrl {
        prefix.push_str("Ctrl + ");
    }
    if held.alt {
        prefix.push_str("Alt + ");
    }
    if held.shift {
        prefix.push_str("Shift + ");
    }
    if held.win {
        prefix.push_str("Win + ");
    }

    let key = friendly_key_name(vk)
        .map(Cow::into_owned)
        .unwrap_or_else(|| raw_key_tag(vk));

    if key.trim().is_empty() {
        prefix.push_str(&format!("VK_{:02X}", vk));
    } else {
        prefix.push_str(&key);
    }
    prefix
}

const MODIFIER_PREFIXES: [&str; 4] = ["Ctrl + ", "Alt + ", "Shift + ", "Win + "];

/// Key part of a label produced by [`build_label`], without the held
/// modifier prefixes.
pub fn strip_modifiers(label: &str) -> &str {
    let mut rest = label.trim();
    while let Some(next) = MODIFIER_PREFIXES
        .iter()
        .find_map(|prefix| rest.strip_prefix(prefix))
        .filter(|next| !next.is_empty())
    {
        rest = next;
    }
    rest
}

/// Resolves a configured key name to a virtual-key code.
pub fn key_name_to_vk(key_name: &str) -> Option<u32> {
    let key = key_name.trim().to_uppercase();

    if key.len() == 1
        && let Some(c) = key.chars().next()
    {
        if c.is_ascii_alphanumeric() {
            return Some(c as u32);
        }
        return match c {
            '+' => Some(VK_OEM_PLUS),
            '-' => Some(VK_OEM_MINUS),
            _ => None,
        };
    }

    if let Some(hex) = key.strip_prefix("VK_")
        && let Ok(vk) = u32::from_str_radix(hex, 16)
        && vk <= 0xFF
    {
        return Some(vk);
    }

    if let Some(num) = key.strip_prefix('F')
        && let Ok(num) = num.parse::<u32>()
        && (1..=24).contains(&num)
    {
        return Some(0x70 + num - 1);
    }

    if let Some(num) = key.strip_prefix("NUMPAD")
        && let Ok(num) = num.parse::<u32>()
        && num <= 9
    {
        return Some(0x60 + num);
    }

    match key.as_str() {
        "ESC" | "ESCAPE" => Some(VK_ESCAPE),
        "ENTER" | "RETURN" => Some(VK_RETURN),
        "TAB" => Some(0x09),
        "SHIFT" => Some(VK_SHIFT),
        "CTRL" => Some(VK_CONTROL),
        "ALT" => Some(VK_MENU),
        "PAUSE" => Some(0x13),
        "CAPSLOCK" | "CAPITAL" => Some(0x14),
        "SPACE" => Some(VK_SPACE),
        "BACKSPACE" | "BACK" => Some(VK_BACK),
        "DELETE" => Some(0x2E),
        "INSERT" => Some(0x2D),
        "HOME" => Some(0x24),
        "END" => Some(0x23),
        "PAGEUP" => Some(VK_PRIOR),
        "PAGEDOWN" => Some(VK_NEXT),
        "UP" => Some(0x26),
        "DOWN" => Some(0x28),
        "LEFT" => Some(0x25),
        "RIGHT" => Some(0x27),
        "LSHIFT" => Some(VK_LSHIFT),
        "RSHIFT" => Some(VK_RSHIFT),
        "LCTRL" => Some(VK_LCONTROL),
        "RCTRL" => Some(VK_RCONTROL),
        "LALT" => Some(VK_LMENU),
        "RALT" => Some(VK_RMENU),
        "LWIN" => Some(VK_LWIN),
        "RWIN" => Some(VK_RWIN),
        "NUMLOCK" => Some(0x90),
        "SCROLL" => Some(0x91),
        "SNAPSHOT" => Some(0x2C),
        "MULTIPLY" => Some(0x6A),
        "ADD" => Some(0x6B),
        "SEPARATOR" => Some(0x6C),
        "SUBTRACT" => Some(0x6D),
        "DECIMAL" => Some(0x6E),
        "DIVIDE" => Some(0x6F),
        "OEM_1" => Some(0xBA),
        "OEM_PLUS" => Some(VK_OEM_PLUS),
        "OEM_COMMA" => Some(0xBC),
        "OEM_MINUS" => Some(VK_OEM_MINUS),
        "OEM_PERIOD" => Some(0xBE),
        "OEM_2" => Some(0xBF),
        "OEM_3" => Some(0xC0),
        "OEM_4" => Some(0xDB),
        "OEM_5" => Some(0xDC),
        "OEM_6" => Some(0xDD),
        "OEM_7" => Some(0xDE),
        "OEM_8" => Some(0xDF),
        "OEM_102" => Some(0xE2),
        _ => None,
    }
}

/// Name written back to configuration for a virtual-key code.
pub fn vk_to_key_name(vk: u32) -> String {
    match vk {
        0x30..=0x39 | 0x41..=0x5A => char::from_u32(vk)
            .map(|c| c.to_string())
            .unwrap_or_else(|| raw_key_tag(vk)),
        VK_RETURN => "ENTER".to_string(),
        VK_ESCAPE => "ESC".to_string(),
        VK_PRIOR => "PAGEUP".to_string(),
        VK_NEXT => "PAGEDOWN".to_string(),
        VK_SPACE => "SPACE".to_string(),
        VK_BACK => "BACKSPACE".to_string(),
        VK_OEM_PLUS => "OEM_PLUS".to_string(),
        VK_OEM_MINUS => "OEM_MINUS".to_string(),
        _ => raw_key_tag(vk),
    }
}

/// Serde adapter storing optional virtual-key codes by name.
pub mod key_name {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(vk: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match vk {
            Some(vk) => serializer.serialize_str(&super::vk_to_key_name(*vk)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        let name: Option<String> = Option::deserialize(deserializer)?;
        match name {
            None => Ok(None),
            Some(name) => super::key_name_to_vk(&name)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown key name: {}", name))),
        }
    }
}
