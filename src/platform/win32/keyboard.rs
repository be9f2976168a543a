//! Modifier state and scan-code keystroke synthesis.

use windows::Win32::UI::Input::KeyboardAndMouse::*;

use crate::event::Modifiers;
use crate::label::{VK_CONTROL, VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT};
use crate::sink::SinkError;

/// Marker value to identify simulated keyboard events.
pub const SIMULATED_EVENT_MARKER: usize = 0x4659;

#[inline(always)]
fn is_held(vk: u32) -> bool {
    // High bit set means the key is down.
    unsafe { GetAsyncKeyState(vk as i32) < 0 }
}

/// Modifier keys currently held, as seen by the async key state.
pub fn current_modifiers() -> Modifiers {
    Modifiers {
        ctrl: is_held(VK_CONTROL),
        alt: is_held(VK_MENU),
        shift: is_held(VK_SHIFT),
        win: is_held(VK_LWIN) || is_held(VK_RWIN),
    }
}

/// Sends one scan-code transition through `SendInput`.
///
/// Events carry [`SIMULATED_EVENT_MARKER`] and are reported as injected to
/// the low-level hook, which lets them pass untouched.
pub fn send_scancode(scan_code: u16, extended: bool, down: bool) -> Result<(), SinkError> {
    let mut flags = KEYEVENTF_SCANCODE;
    if extended {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }
    if !down {
        flags |= KEYEVENTF_KEYUP;
    }

    let input = INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: scan_code,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: SIMULATED_EVENT_MARKER,
            },
        },
    };

    let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
    if sent == 1 {
        Ok(())
    } else {
        Err(SinkError::Rejected {
            operation: "SendInput",
        })
    }
}
