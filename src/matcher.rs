//! Binding matcher: pure lookup of the bindings an event fires.

use smallvec::SmallVec;

use crate::event::{CanonicalEvent, DeviceClass, Modifiers};
use crate::label;
use crate::model::{Binding, DeviceTrigger, Map, VirtualOutput};

const USAGE_PAGE_TOKEN: &str = "usagepage";

#[inline(always)]
fn has_usage_page_token(label: &str) -> bool {
    label.to_ascii_lowercase().contains(USAGE_PAGE_TOKEN)
}

/// Device-binding equality.
///
/// Class and label must agree (label case-insensitively). Two HID labels that
/// both carry a usage-page token are a class-level match, since per-button HID
/// decoding is not performed. An empty label on either side never matches.
pub fn controls_match(
    a_class: DeviceClass,
    a_label: &str,
    b_class: DeviceClass,
    b_label: &str,
) -> bool {
    let a = a_label.trim();
    let b = b_label.trim();
    if a.is_empty() || b.is_empty() || a_class != b_class {
        return false;
    }
    if a.eq_ignore_ascii_case(b) {
        return true;
    }
    a_class == DeviceClass::Hid && has_usage_page_token(a) && has_usage_page_token(b)
}

#[inline]
pub fn trigger_matches(trigger: &DeviceTrigger, event: &CanonicalEvent) -> bool {
    controls_match(
        trigger.device_class,
        &trigger.control_label,
        event.device_class,
        &event.control_label,
    )
}

/// Returns every binding in `map` whose trigger matches `event`, in map order.
pub fn match_bindings<'m>(map: &'m Map, event: &CanonicalEvent) -> SmallVec<[&'m Binding; 4]> {
    map.bindings
        .iter()
        .filter(|binding| {
            binding
                .trigger()
                .is_some_and(|trigger| trigger_matches(&trigger, event))
        })
        .collect()
}

/// Outputs fired by `event` in `map`, skipping bindings without an output.
pub fn matched_outputs(map: &Map, event: &CanonicalEvent) -> SmallVec<[VirtualOutput; 4]> {
    match_bindings(map, event)
        .into_iter()
        .map(|binding| binding.output)
        .filter(|output| *output != VirtualOutput::None)
        .collect()
}

/// Whether a physical key transition should be swallowed for `map`.
///
/// True when a binding with `block_original` set matches the label the
/// decoder would produce for this key.
pub fn should_block_key(map: &Map, vk: u32, modifiers: Modifiers) -> bool {
    let event_label = label::build_label(modifiers, vk);
    map.bindings.iter().any(|binding| {
        binding.block_original
            && binding.trigger().is_some_and(|trigger| {
                controls_match(
                    trigger.device_class,
                    &trigger.control_label,
                    DeviceClass::Keyboard,
                    &event_label,
                )
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(n: u8) -> VirtualOutput {
        VirtualOutput::JoystickButton { button: n }
    }

    #[test]
    fn test_controls_match_case_insensitive() {
        assert!(controls_match(
            DeviceClass::Keyboard,
            "Ctrl + K",
            DeviceClass::Keyboard,
            "ctrl + k"
        ));
        assert!(!controls_match(
            DeviceClass::Keyboard,
            "LeftButton",
            DeviceClass::Mouse,
            "LeftButton"
        ));
    }

    #[test]
    fn test_controls_match_empty_labels_never_match() {
        assert!(!controls_match(DeviceClass::Mouse, "", DeviceClass::Mouse, ""));
        assert!(!controls_match(DeviceClass::Mouse, "  ", DeviceClass::Mouse, "LeftButton"));
    }

    #[test]
    fn test_hid_usage_page_class_match() {
        assert!(controls_match(
            DeviceClass::Hid,
            "UsagePage 1, Usage 4",
            DeviceClass::Hid,
            "UsagePage 1, Usage 5"
        ));
        assert!(!controls_match(
            DeviceClass::Hid,
            "UsagePage 1, Usage 4",
            DeviceClass::Hid,
            "Button 3"
        ));
        assert!(!controls_match(
            DeviceClass::Keyboard,
            "UsagePage 1, Usage 4",
            DeviceClass::Keyboard,
            "UsagePage 1, Usage 5"
        ));
    }

    #[test]
    fn test_all_matching_bindings_fire() {
        let map = Map::new("m")
            .with_binding(Binding::device("a", DeviceClass::Mouse, "LeftButton", button(1)))
            .with_binding(Binding::device("b", DeviceClass::Mouse, "RightButton", button(2)))
            .with_binding(Binding::device("c", DeviceClass::Mouse, "leftbutton", button(3)));

        let matches = match_bindings(&map, &CanonicalEvent::mouse("LeftButton"));
        let names: Vec<_> = matches.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_keyboard_origin_binding_matches_decoded_label() {
        let map = Map::new("m").with_binding(Binding::keyboard(
            "k",
            0x4B,
            Modifiers::CTRL,
            button(3),
        ));
        let event = CanonicalEvent::keyboard(label::build_label(Modifiers::CTRL, 0x4B));
        assert_eq!(matched_outputs(&map, &event).as_slice(), &[button(3)]);
        assert!(matched_outputs(&map, &CanonicalEvent::keyboard("K")).is_empty());
    }

    #[test]
    fn test_outputs_skip_none_targets() {
        let map = Map::new("m")
            .with_binding(Binding::device("x", DeviceClass::Mouse, "Middle", VirtualOutput::None))
            .with_binding(Binding::device("y", DeviceClass::Mouse, "Middle", button(9)));
        let outputs = matched_outputs(&map, &CanonicalEvent::mouse("Middle"));
        assert_eq!(outputs.as_slice(), &[button(9)]);
    }

    #[test]
    fn test_should_block_key_requires_flag() {
        let map = Map::new("m")
            .with_binding(Binding::keyboard("plain", 0x41, Modifiers::NONE, button(1)))
            .with_binding(Binding::keyboard("blocked", 0x42, Modifiers::NONE, button(2)).blocking());
        assert!(!should_block_key(&map, 0x41, Modifiers::NONE));
        assert!(should_block_key(&map, 0x42, Modifiers::NONE));
        assert!(!should_block_key(&map, 0x42, Modifiers::CTRL));
    }

    #[test]
    fn test_should_block_key_for_keyboard_device_binding() {
        let map = Map::new("m").with_binding(
            Binding::device("dev", DeviceClass::Keyboard, "Ctrl + K", button(1)).blocking(),
        );
        assert!(should_block_key(&map, 0x4B, Modifiers::CTRL));
    }

    #[test]
    fn test_should_block_side_specific_modifier_key() {
        let map = Map::new("m").with_binding(
            Binding::device("ctrl", DeviceClass::Keyboard, "CTRL", button(1)).blocking(),
        );
        assert!(should_block_key(&map, label::VK_LCONTROL, Modifiers::CTRL));
        assert!(should_block_key(&map, label::VK_RCONTROL, Modifiers::CTRL));
        assert!(should_block_key(&map, label::VK_CONTROL, Modifiers::NONE));
        assert!(!should_block_key(&map, label::VK_LSHIFT, Modifiers::NONE));
    }
}
