use super::keyboard::send_scancode;
use super::vjoy::VJoyDevice;
use crate::model::OutputId;
use crate::sink::{SinkError, VirtualOutputSink};

/// Joystick buttons through vJoy, keystrokes through `SendInput`.
///
/// Keystroke synthesis is always available. Joystick outputs are available
/// only while `vJoyInterface.dll` is loaded and the device is acquired.
pub struct Win32OutputSink {
    vjoy: Option<VJoyDevice>,
}

impl Win32OutputSink {
    pub fn new(vjoy: Option<VJoyDevice>) -> Self {
        Self { vjoy }
    }

    /// Loads vJoy for `device_id`, falling back to keystrokes only.
    pub fn with_vjoy_device(device_id: u32) -> Self {
        match VJoyDevice::load(device_id) {
            Ok(device) => Self::new(Some(device)),
            Err(e) => {
                log::warn!("sink: {}, joystick outputs disabled", e);
                Self::new(None)
            }
        }
    }
}

impl VirtualOutputSink for Win32OutputSink {
    fn is_available(&mut self, id: OutputId) -> bool {
        match id {
            OutputId::Joystick(_) => self.vjoy.as_mut().is_some_and(VJoyDevice::is_ready),
            OutputId::Keyboard { .. } => true,
        }
    }

    fn set_joystick_button(&mut self, index: u8, down: bool) -> Result<(), SinkError> {
        match self.vjoy.as_mut() {
            Some(vjoy) => vjoy.set_button(index, down),
            None => Err(SinkError::Unavailable("vJoy is not installed".to_string())),
        }
    }

    fn send_key(&mut self, scan_code: u16, extended: bool, down: bool) -> Result<(), SinkError> {
        send_scancode(scan_code, extended, down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_vjoy_reports_only_keyboard_available() {
        let mut sink = Win32OutputSink::new(None);
        assert!(!sink.is_available(OutputId::Joystick(1)));
        assert!(sink.is_available(OutputId::Keyboard {
            scan_code: 0x1E,
            extended: false,
        }));
        assert!(sink.set_joystick_button(1, true).is_err());
    }
}
