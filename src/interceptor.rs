//! System-wide key interception.
//!
//! [`InterceptorCore`] holds the decision logic run for every key transition
//! and is independent of the OS. The OS hook itself sits behind [`KeyHook`];
//! the Windows implementation lives in `platform::win32::hook`.
//!
//! Injected transitions (the engine's own `SendInput` output) are passed
//! through untouched: they are never swallowed and never synthesize events.
//! Without that rule the engine would re-route its own keystrokes forever.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Sender;
use thiserror::Error;

use crate::event::{CanonicalEvent, InputEvent, Modifiers};
use crate::label::build_label;

/// Decides whether a key transition is swallowed: `(vk, modifiers, is_down)`.
pub type SwallowPredicate = Arc<dyn Fn(u32, Modifiers, bool) -> bool + Send + Sync>;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("failed to install keyboard hook: {0}")]
    Install(String),
    #[error("keyboard hook thread exited before reporting status")]
    ThreadExited,
}

/// One key transition as seen by the OS hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub vk: u32,
    pub is_down: bool,
    /// Set when the OS reports the transition as synthesized.
    pub injected: bool,
}

pub struct InterceptorCore {
    predicate: SwallowPredicate,
    injector: Sender<InputEvent>,
    active: AtomicBool,
}

impl InterceptorCore {
    /// `injector` feeds the same queue the raw-input listener drains.
    pub fn new(predicate: SwallowPredicate, injector: Sender<InputEvent>) -> Self {
        Self {
            predicate,
            injector,
            active: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) -> bool {
        self.active.swap(active, Ordering::AcqRel) != active
    }

    /// Returns `true` when the transition must be swallowed.
    ///
    /// A swallowed real key-down is re-published as a synthetic press since
    /// the raw-input layer will never see it; a swallowed key-up is
    /// re-published as a release. Never blocks.
    pub fn on_transition(&self, transition: KeyTransition, modifiers: Modifiers) -> bool {
        if !self.is_active() || transition.injected {
            return false;
        }

        let swallow = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.predicate)(transition.vk, modifiers, transition.is_down)
        }))
        .unwrap_or_else(|_| {
            log::error!("hook: swallow predicate panicked, passing key through");
            false
        });

        if swallow {
            let event = CanonicalEvent::keyboard(build_label(modifiers, transition.vk));
            let message = if transition.is_down {
                InputEvent::Pressed(event)
            } else {
                InputEvent::Released(event)
            };
            if self.injector.try_send(message).is_err() {
                log::debug!("hook: event queue unavailable, dropping synthetic event");
            }
        }

        swallow
    }
}

/// OS-level hook driving an [`InterceptorCore`].
pub trait KeyHook: Send {
    fn install(&mut self, core: Arc<InterceptorCore>) -> Result<(), HookError>;
    fn uninstall(&mut self);
}

/// Installs a [`KeyHook`] once per session. Start and stop are idempotent
/// and safe to call from any thread.
pub struct SystemKeyInterceptor {
    core: Arc<InterceptorCore>,
    hook: Mutex<Box<dyn KeyHook>>,
}

impl SystemKeyInterceptor {
    pub fn new(core: Arc<InterceptorCore>, hook: Box<dyn KeyHook>) -> Self {
        Self {
            core,
            hook: Mutex::new(hook),
        }
    }

    #[inline]
    pub fn core(&self) -> &Arc<InterceptorCore> {
        &self.core
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.core.is_active()
    }

    /// Installs the hook. Returns `false` if installation failed.
    pub fn start(&self) -> bool {
        let mut hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if self.core.is_active() {
            return true;
        }
        self.core.set_active(true);
        match hook.install(Arc::clone(&self.core)) {
            Ok(()) => {
                log::info!("hook: keyboard interceptor installed");
                true
            }
            Err(e) => {
                self.core.set_active(false);
                log::error!("hook: {}", e);
                false
            }
        }
    }

    pub fn stop(&self) {
        let mut hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner);
        if self.core.set_active(false) {
            hook.uninstall();
            log::info!("hook: keyboard interceptor removed");
        }
    }
}

impl Drop for SystemKeyInterceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use std::sync::atomic::AtomicUsize;

    fn core_with(predicate: SwallowPredicate) -> (Arc<InterceptorCore>, Receiver<InputEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let core = Arc::new(InterceptorCore::new(predicate, tx));
        core.set_active(true);
        (core, rx)
    }

    fn all_modifier_states() -> impl Iterator<Item = Modifiers> {
        (0u8..16).map(Modifiers::from_bits)
    }

    #[test]
    fn test_swallowed_key_down_synthesizes_once() {
        let (core, rx) = core_with(Arc::new(|vk: u32, _: Modifiers, _: bool| vk == 0x4B));
        let down = KeyTransition {
            vk: 0x4B,
            is_down: true,
            injected: false,
        };

        assert!(core.on_transition(down, Modifiers::CTRL));
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_press());
        assert_eq!(events[0].event().control_label, "Ctrl + K");
    }

    #[test]
    fn test_swallowed_key_up_forwards_release() {
        let (core, rx) = core_with(Arc::new(|_: u32, _: Modifiers, _: bool| true));
        let up = KeyTransition {
            vk: 0x4B,
            is_down: false,
            injected: false,
        };
        assert!(core.on_transition(up, Modifiers::NONE));
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_press());
    }

    #[test]
    fn test_passed_through_key_is_not_synthesized() {
        let (core, rx) = core_with(Arc::new(|_: u32, _: Modifiers, _: bool| false));
        for modifiers in all_modifier_states() {
            let down = KeyTransition {
                vk: 0x41,
                is_down: true,
                injected: false,
            };
            assert!(!core.on_transition(down, modifiers));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_injected_transitions_are_immune() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (core, rx) = core_with(Arc::new(move |_: u32, _: Modifiers, _: bool| {
            counter.fetch_add(1, Ordering::Relaxed);
            true
        }));

        for modifiers in all_modifier_states() {
            for is_down in [true, false] {
                let t = KeyTransition {
                    vk: 0x20,
                    is_down,
                    injected: true,
                };
                assert!(!core.on_transition(t, modifiers));
            }
        }
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_predicate_panic_means_pass_through() {
        let (core, rx) = core_with(Arc::new(|_: u32, _: Modifiers, _: bool| -> bool {
            panic!("predicate failure")
        }));
        let down = KeyTransition {
            vk: 0x41,
            is_down: true,
            injected: false,
        };
        assert!(!core.on_transition(down, Modifiers::NONE));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_inactive_core_never_swallows() {
        let (core, _rx) = core_with(Arc::new(|_: u32, _: Modifiers, _: bool| true));
        core.set_active(false);
        let down = KeyTransition {
            vk: 0x41,
            is_down: true,
            injected: false,
        };
        assert!(!core.on_transition(down, Modifiers::NONE));
    }

    struct CountingHook {
        installs: Arc<AtomicUsize>,
        uninstalls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl KeyHook for CountingHook {
        fn install(&mut self, _core: Arc<InterceptorCore>) -> Result<(), HookError> {
            if self.fail {
                return Err(HookError::Install("denied".to_string()));
            }
            self.installs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn uninstall(&mut self) {
            self.uninstalls.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_start_stop_are_idempotent() {
        let installs = Arc::new(AtomicUsize::new(0));
        let uninstalls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = crossbeam_channel::unbounded();
        let predicate: SwallowPredicate = Arc::new(|_: u32, _: Modifiers, _: bool| false);
        let core = Arc::new(InterceptorCore::new(predicate, tx));
        let interceptor = SystemKeyInterceptor::new(
            core,
            Box::new(CountingHook {
                installs: installs.clone(),
                uninstalls: uninstalls.clone(),
                fail: false,
            }),
        );

        assert!(interceptor.start());
        assert!(interceptor.start());
        assert!(interceptor.is_running());
        interceptor.stop();
        interceptor.stop();
        drop(interceptor);

        assert_eq!(installs.load(Ordering::Relaxed), 1);
        assert_eq!(uninstalls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_install_is_reported() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let predicate: SwallowPredicate = Arc::new(|_: u32, _: Modifiers, _: bool| true);
        let core = Arc::new(InterceptorCore::new(predicate, tx));
        let interceptor = SystemKeyInterceptor::new(
            core,
            Box::new(CountingHook {
                installs: Arc::new(AtomicUsize::new(0)),
                uninstalls: Arc::new(AtomicUsize::new(0)),
                fail: true,
            }),
        );
        assert!(!interceptor.start());
        assert!(!interceptor.is_running());
    }
}
