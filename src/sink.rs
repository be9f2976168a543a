//! Boundary to the virtual joystick driver and the keystroke synthesizer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::model::OutputId;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("virtual output driver unavailable: {0}")]
    Unavailable(String),
    #[error("virtual joystick device {0} could not be acquired")]
    NotAcquired(u32),
    #[error("driver rejected {operation}")]
    Rejected { operation: &'static str },
}

/// Capability to assert and release virtual outputs.
///
/// Callers serialize access; implementations are not required to be `Sync`.
pub trait VirtualOutputSink: Send {
    /// Whether the driver behind `id` can accept calls right now.
    fn is_available(&mut self, id: OutputId) -> bool;

    /// Presses or releases joystick button `index` (1-based).
    fn set_joystick_button(&mut self, index: u8, down: bool) -> Result<(), SinkError>;

    /// Synthesizes a keystroke transition by scan code.
    fn send_key(&mut self, scan_code: u16, extended: bool, down: bool) -> Result<(), SinkError>;
}

/// A driver call observed by [`RecordingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Button { index: u8, down: bool },
    Key { scan_code: u16, extended: bool, down: bool },
}

/// Sink that records every call. Clones share the same log, so a test can
/// keep one handle while the router owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    unavailable: Arc<AtomicBool>,
    joystick_unavailable: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Simulates the driver disappearing or coming back.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Simulates a missing joystick driver while keystrokes keep working.
    pub fn set_joystick_available(&self, available: bool) {
        self.joystick_unavailable.store(!available, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VirtualOutputSink for RecordingSink {
    fn is_available(&mut self, id: OutputId) -> bool {
        if self.unavailable.load(Ordering::SeqCst) {
            return false;
        }
        !(matches!(id, OutputId::Joystick(_)) && self.joystick_unavailable.load(Ordering::SeqCst))
    }

    fn set_joystick_button(&mut self, index: u8, down: bool) -> Result<(), SinkError> {
        self.lock().push(SinkCall::Button { index, down });
        Ok(())
    }

    fn send_key(&mut self, scan_code: u16, extended: bool, down: bool) -> Result<(), SinkError> {
        self.lock().push(SinkCall::Key {
            scan_code,
            extended,
            down,
        });
        Ok(())
    }
}
