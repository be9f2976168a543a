//! Game-mode guard: suspends routing while a denylisted process has focus.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use scc::{AtomicShared, Guard, Shared, Tag};

use crate::router::OperationGate;

/// Default foreground poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Shortest poll interval accepted; faster polling buys nothing.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Source of the foreground process executable name.
pub trait ForegroundProbe: Send + Sync {
    /// Executable name or full image path of the foreground process.
    fn foreground_executable(&self) -> Option<String>;
}

impl<F> ForegroundProbe for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn foreground_executable(&self) -> Option<String> {
        self()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardTransition {
    Suspended { process: String },
    Resumed,
}

type TransitionListener = Arc<dyn Fn(&GuardTransition) + Send + Sync>;

/// Reduces an image path to a lowercase executable name.
fn normalize_executable(name: &str) -> String {
    name.trim()
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

pub struct GameModeGuard {
    enabled: AtomicBool,
    suspended: AtomicBool,
    denylist: AtomicShared<Vec<String>>,
    probe: Box<dyn ForegroundProbe>,
    listener: Mutex<Option<TransitionListener>>,
}

impl GameModeGuard {
    pub fn new<I, S>(enabled: bool, denylist: I, probe: Box<dyn ForegroundProbe>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            enabled: AtomicBool::new(enabled),
            suspended: AtomicBool::new(false),
            denylist: AtomicShared::from(Shared::new(Self::normalize_list(denylist))),
            probe,
            listener: Mutex::new(None),
        }
    }

    fn normalize_list<I, S>(names: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|n| normalize_executable(n.as_ref()))
            .filter(|n| !n.is_empty())
            .collect()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// True only while game mode is enabled and no denylisted process owns focus.
    #[inline(always)]
    pub fn should_operate_now(&self) -> bool {
        self.is_enabled() && !self.is_suspended()
    }

    pub fn set_denylist<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let list = Shared::new(Self::normalize_list(names));
        let _ = self.denylist.swap((Some(list), Tag::None), Ordering::Release);
    }

    pub fn is_denylisted(&self, executable: &str) -> bool {
        let name = normalize_executable(executable);
        if name.is_empty() {
            return false;
        }
        let guard = Guard::new();
        self.denylist
            .load(Ordering::Acquire, &guard)
            .as_ref()
            .is_some_and(|list| list.iter().any(|entry| *entry == name))
    }

    /// Registers the callback invoked once per suspended/active transition.
    pub fn set_transition_listener(&self, listener: impl Fn(&GuardTransition) + Send + Sync + 'static) {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(listener));
    }

    /// Runs one poll tick. Returns the transition if the state changed.
    ///
    /// A probe failure or panic counts as "not suspended".
    pub fn poll(&self) -> Option<GuardTransition> {
        let foreground = panic::catch_unwind(AssertUnwindSafe(|| self.probe.foreground_executable()))
            .unwrap_or_else(|_| {
                log::warn!("guard: foreground probe panicked");
                None
            });

        let denylisted = foreground
            .as_deref()
            .filter(|name| self.is_denylisted(name))
            .map(normalize_executable);

        let now_suspended = denylisted.is_some();
        if self.suspended.swap(now_suspended, Ordering::AcqRel) == now_suspended {
            return None;
        }

        let transition = match denylisted {
            Some(process) => {
                log::info!("guard: suspending output, {} is in the foreground", process);
                GuardTransition::Suspended { process }
            }
            None => {
                log::info!("guard: resuming output");
                GuardTransition::Resumed
            }
        };

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener
            && panic::catch_unwind(AssertUnwindSafe(|| listener(&transition))).is_err()
        {
            log::error!("guard: transition listener panicked");
        }

        Some(transition)
    }

    /// Starts polling on a dedicated thread until the returned handle is dropped.
    pub fn start(self: &Arc<Self>, interval: Duration) -> io::Result<GuardPoller> {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);
        let guard = Arc::clone(self);

        let worker = thread::Builder::new()
            .name("game_mode_guard".to_string())
            .spawn(move || {
                loop {
                    guard.poll();
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
            })?;

        Ok(GuardPoller {
            stop: Some(stop),
            worker: Some(worker),
        })
    }
}

impl OperationGate for GameModeGuard {
    fn should_operate_now(&self) -> bool {
        GameModeGuard::should_operate_now(self)
    }
}

/// Handle to the polling thread; stops and joins it on drop.
pub struct GuardPoller {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl GuardPoller {
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for GuardPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
