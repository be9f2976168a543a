//! Raw event listener: device registration and the dispatch thread.
//!
//! Two producers feed one queue: the raw-input surface (genuine decoded
//! records) and the key interceptor (synthetic events for swallowed keys).
//! A single dispatch thread drains the queue into the [`EventBus`], so
//! subscribers always observe events in arrival order and never on an OS
//! callback thread.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, select};
use thiserror::Error;

use crate::bus::{EventBus, SubscriptionId};
use crate::event::InputEvent;

/// A top-level HID collection the listener registers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageClass {
    pub usage_page: u16,
    /// `None` registers every usage on the page.
    pub usage: Option<u16>,
}

impl UsageClass {
    pub const fn new(usage_page: u16, usage: u16) -> Self {
        Self {
            usage_page,
            usage: Some(usage),
        }
    }

    pub const fn page(usage_page: u16) -> Self {
        Self {
            usage_page,
            usage: None,
        }
    }
}

/// Keyboard, mouse, joystick, gamepad, multi-axis, simulation page, consumer control.
pub const REGISTERED_CLASSES: [UsageClass; 7] = [
    UsageClass::new(0x01, 0x06),
    UsageClass::new(0x01, 0x02),
    UsageClass::new(0x01, 0x04),
    UsageClass::new(0x01, 0x05),
    UsageClass::new(0x01, 0x08),
    UsageClass::page(0x02),
    UsageClass::new(0x0C, 0x01),
];

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("transient registration failure: {0}")]
    Transient(String),
    #[error("registration failed: {0}")]
    Fatal(String),
}

impl RegistrationError {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistrationError::Transient(_))
    }
}

/// Registers device classes with the OS for one receiving surface.
pub trait DeviceRegistrar: Send {
    fn register(&mut self, classes: &[UsageClass]) -> Result<(), RegistrationError>;
    /// Best-effort removal; failures are ignored.
    fn unregister(&mut self, classes: &[UsageClass]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorStatus {
    /// Waiting for the receiving surface.
    Pending = 0,
    Active = 1,
    /// Registration gave up; synthetic events still flow.
    Degraded = 2,
    Disposed = 3,
}

impl MonitorStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => MonitorStatus::Pending,
            1 => MonitorStatus::Active,
            2 => MonitorStatus::Degraded,
            _ => MonitorStatus::Disposed,
        }
    }
}

pub struct RawEventListener {
    bus: Arc<EventBus>,
    injector: Sender<InputEvent>,
    status: AtomicU8,
    registrar: Mutex<Option<Box<dyn DeviceRegistrar>>>,
    stop: Mutex<Option<Sender<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl RawEventListener {
    /// Starts the dispatch thread. Device registration is deferred until
    /// [`on_surface_ready`](Self::on_surface_ready).
    pub fn new(bus: Arc<EventBus>) -> io::Result<Self> {
        let (injector, events) = crossbeam_channel::unbounded::<InputEvent>();
        let (stop, stopped) = crossbeam_channel::bounded::<()>(1);

        let dispatch_bus = Arc::clone(&bus);
        let dispatch = thread::Builder::new()
            .name("event_dispatch".to_string())
            .spawn(move || Self::dispatch_loop(&dispatch_bus, &events, &stopped))?;

        Ok(Self {
            bus,
            injector,
            status: AtomicU8::new(MonitorStatus::Pending as u8),
            registrar: Mutex::new(None),
            stop: Mutex::new(Some(stop)),
            dispatch: Mutex::new(Some(dispatch)),
            disposed: AtomicBool::new(false),
        })
    }

    fn dispatch_loop(bus: &EventBus, events: &Receiver<InputEvent>, stopped: &Receiver<()>) {
        loop {
            select! {
                recv(events) -> msg => {
                    match msg {
                        Ok(event) => {
                            bus.publish(&event);
                        }
                        Err(_) => break,
                    }
                }
                recv(stopped) -> _ => break,
            }
        }
        log::debug!("listener: dispatch thread exited");
    }

    /// Queue shared by every event producer.
    #[inline]
    pub fn injector(&self) -> Sender<InputEvent> {
        self.injector.clone()
    }

    #[inline]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    #[inline]
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: MonitorStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Subscribes `callback` to every event. Pair with [`stop_monitor`](Self::stop_monitor).
    pub fn start_monitor(
        &self,
        callback: impl Fn(&InputEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.bus.subscribe(callback)
    }

    pub fn stop_monitor(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Registers the device classes once the receiving surface exists.
    ///
    /// A transient failure is retried once. On final failure the listener
    /// reports [`MonitorStatus::Degraded`] and keeps dispatching synthetic
    /// events.
    pub fn on_surface_ready(&self, mut registrar: Box<dyn DeviceRegistrar>) -> MonitorStatus {
        // Held until the registrar is stored, so a concurrent dispose either
        // wins outright or finds the registrar to unregister.
        let mut slot = self.registrar.lock().unwrap_or_else(PoisonError::into_inner);
        if self.disposed.load(Ordering::Acquire) {
            return MonitorStatus::Disposed;
        }

        let status = match Self::register_with_retry(registrar.as_mut()) {
            Ok(()) => {
                log::info!(
                    "listener: registered {} device classes",
                    REGISTERED_CLASSES.len()
                );
                *slot = Some(registrar);
                MonitorStatus::Active
            }
            Err(e) => {
                log::error!("listener: monitoring degraded, {}", e);
                MonitorStatus::Degraded
            }
        };
        self.set_status(status);
        status
    }

    fn register_with_retry(registrar: &mut dyn DeviceRegistrar) -> Result<(), RegistrationError> {
        match registrar.register(&REGISTERED_CLASSES) {
            Err(e) if e.is_transient() => {
                log::warn!("listener: {}, retrying once", e);
                registrar.register(&REGISTERED_CLASSES)
            }
            other => other,
        }
    }

    /// Deregisters devices and stops dispatching. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut registrar) = self
            .registrar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            registrar.unregister(&REGISTERED_CLASSES);
        }

        if let Some(stop) = self.stop.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = stop.try_send(());
        }
        let dispatch = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatch) = dispatch
            && dispatch.thread().id() != thread::current().id()
        {
            let _ = dispatch.join();
        }

        self.set_status(MonitorStatus::Disposed);
        log::info!("listener: disposed");
    }
}

impl Drop for RawEventListener {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CanonicalEvent;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct ScriptedRegistrar {
        failures: Vec<RegistrationError>,
        attempts: Arc<AtomicUsize>,
        unregistered: Arc<AtomicUsize>,
    }

    impl ScriptedRegistrar {
        fn boxed(
            failures: Vec<RegistrationError>,
        ) -> (Box<Self>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let attempts = Arc::new(AtomicUsize::new(0));
            let unregistered = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    failures,
                    attempts: attempts.clone(),
                    unregistered: unregistered.clone(),
                }),
                attempts,
                unregistered,
            )
        }
    }

    impl DeviceRegistrar for ScriptedRegistrar {
        fn register(&mut self, classes: &[UsageClass]) -> Result<(), RegistrationError> {
            assert_eq!(classes.len(), REGISTERED_CLASSES.len());
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.failures.is_empty() {
                Ok(())
            } else {
                Err(self.failures.remove(0))
            }
        }

        fn unregister(&mut self, _classes: &[UsageClass]) {
            self.unregistered.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_status_pending_until_surface_ready() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        assert_eq!(listener.status(), MonitorStatus::Pending);

        let (registrar, attempts, _) = ScriptedRegistrar::boxed(vec![]);
        assert_eq!(listener.on_surface_ready(registrar), MonitorStatus::Active);
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_transient_failure_retried_once() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        let (registrar, attempts, _) =
            ScriptedRegistrar::boxed(vec![RegistrationError::Transient("busy".into())]);
        assert_eq!(listener.on_surface_ready(registrar), MonitorStatus::Active);
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_repeated_transient_failure_degrades() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        let (registrar, attempts, _) = ScriptedRegistrar::boxed(vec![
            RegistrationError::Transient("busy".into()),
            RegistrationError::Transient("still busy".into()),
        ]);
        assert_eq!(listener.on_surface_ready(registrar), MonitorStatus::Degraded);
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_fatal_failure_is_not_retried() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        let (registrar, attempts, _) =
            ScriptedRegistrar::boxed(vec![RegistrationError::Fatal("denied".into())]);
        assert_eq!(listener.on_surface_ready(registrar), MonitorStatus::Degraded);
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_injected_events_reach_monitor() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        listener.start_monitor(move |_| {
            s.fetch_add(1, Ordering::Relaxed);
        });

        let injector = listener.injector();
        injector
            .send(InputEvent::Pressed(CanonicalEvent::keyboard("K")))
            .unwrap();
        injector
            .send(InputEvent::Released(CanonicalEvent::keyboard("K")))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.load(Ordering::Relaxed) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        let (registrar, _, unregistered) = ScriptedRegistrar::boxed(vec![]);
        listener.on_surface_ready(registrar);

        listener.dispose();
        listener.dispose();
        drop(listener);

        assert_eq!(unregistered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_surface_ready_after_dispose_is_ignored() {
        let listener = RawEventListener::new(Arc::new(EventBus::new())).unwrap();
        listener.dispose();
        let (registrar, attempts, _) = ScriptedRegistrar::boxed(vec![]);
        assert_eq!(listener.on_surface_ready(registrar), MonitorStatus::Disposed);
        assert_eq!(attempts.load(Ordering::Relaxed), 0);
    }

    /// Blocks inside `register` until the test lets it continue.
    struct GatedRegistrar {
        entered: Sender<()>,
        proceed: Receiver<()>,
        unregistered: Arc<AtomicUsize>,
    }

    impl DeviceRegistrar for GatedRegistrar {
        fn register(&mut self, _classes: &[UsageClass]) -> Result<(), RegistrationError> {
            let _ = self.entered.send(());
            let _ = self.proceed.recv_timeout(Duration::from_secs(2));
            Ok(())
        }

        fn unregister(&mut self, _classes: &[UsageClass]) {
            self.unregistered.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_dispose_during_registration_unregisters() {
        let listener = Arc::new(RawEventListener::new(Arc::new(EventBus::new())).unwrap());
        let (entered_tx, entered) = crossbeam_channel::bounded(1);
        let (proceed, proceed_rx) = crossbeam_channel::bounded(1);
        let unregistered = Arc::new(AtomicUsize::new(0));
        let registrar = Box::new(GatedRegistrar {
            entered: entered_tx,
            proceed: proceed_rx,
            unregistered: unregistered.clone(),
        });

        let registering = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.on_surface_ready(registrar))
        };
        entered.recv_timeout(Duration::from_secs(2)).unwrap();

        let disposing = {
            let listener = Arc::clone(&listener);
            thread::spawn(move || listener.dispose())
        };
        thread::sleep(Duration::from_millis(20));
        proceed.send(()).unwrap();

        assert_eq!(registering.join().unwrap(), MonitorStatus::Active);
        disposing.join().unwrap();
        assert_eq!(unregistered.load(Ordering::Relaxed), 1);
        assert_eq!(listener.status(), MonitorStatus::Disposed);
    }
}
