//! Modal "press the control to bind" capture.

use std::time::Duration;

use crate::bus::{EventBus, SubscriptionId};
use crate::event::{CanonicalEvent, InputEvent};

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Removes the temporary subscription however the capture ends.
struct Subscription<'a> {
    bus: &'a EventBus,
    id: SubscriptionId,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// Blocks until the next press is published or `timeout` elapses.
///
/// Releases are ignored. The temporary subscriber is torn down before this
/// returns, including on timeout.
pub fn capture_next_event(bus: &EventBus, timeout: Duration) -> Option<CanonicalEvent> {
    let (tx, rx) = crossbeam_channel::bounded::<CanonicalEvent>(1);
    let _subscription = Subscription {
        bus,
        id: bus.subscribe(move |event| {
            if let InputEvent::Pressed(e) = event {
                let _ = tx.try_send(e.clone());
            }
        }),
    };

    match rx.recv_timeout(timeout) {
        Ok(event) => {
            log::debug!("capture: captured {}", event);
            Some(event)
        }
        Err(_) => {
            log::debug!("capture: timed out after {:?}", timeout);
            None
        }
    }
}
