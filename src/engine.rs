//! Engine facade wiring capture, routing and suspension together.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::bus::{EventBus, SubscriptionId};
use crate::capture;
use crate::event::{CanonicalEvent, InputEvent, Modifiers};
use crate::guard::{DEFAULT_POLL_INTERVAL, ForegroundProbe, GameModeGuard, GuardPoller, GuardTransition};
use crate::interceptor::{InterceptorCore, SwallowPredicate};
use crate::listener::RawEventListener;
use crate::map_switch::{DEFAULT_DEBOUNCE, MapSwitchController};
use crate::matcher::{self, trigger_matches};
use crate::model::{Profile, ProfileStore};
use crate::router::{EmissionMode, OperationGate, OutputRouter};
use crate::sink::VirtualOutputSink;

/// Runtime knobs for [`Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub game_mode_enabled: bool,
    pub process_denylist: Vec<String>,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub emission: EmissionMode,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            game_mode_enabled: true,
            process_denylist: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
            emission: EmissionMode::default(),
        }
    }
}

/// Shared state the routing subscriber closes over.
struct Routing {
    profiles: Arc<ProfileStore>,
    router: Arc<OutputRouter>,
    map_switch: MapSwitchController,
}

impl Routing {
    fn handle(&self, input: &InputEvent) {
        let event = input.event();
        match input {
            InputEvent::Pressed(_) => {
                if self.switch_maps(event) {
                    return;
                }
                self.router.on_input(event);
            }
            InputEvent::Released(_) => {
                if self.router.mode() == EmissionMode::Hold {
                    self.router.on_release(event);
                }
            }
        }
    }

    /// Runs map-cycle hotkeys. Returns true when `event` is a map trigger,
    /// in which case it is not routed further.
    fn switch_maps(&self, event: &CanonicalEvent) -> bool {
        let Some((next, prev)) = self
            .profiles
            .with_active_map(|map| (map.next_map_trigger.clone(), map.prev_map_trigger.clone()))
        else {
            return false;
        };

        let is_trigger = next
            .iter()
            .chain(prev.iter())
            .any(|trigger| trigger_matches(trigger, event));
        if !is_trigger {
            return false;
        }

        self.map_switch.on_input(
            event,
            next.as_ref(),
            prev.as_ref(),
            || {
                if let Some(index) = self.router.switch_context(|| self.profiles.select_next_map()) {
                    log::info!("engine: switched to map {}", index);
                }
            },
            || {
                if let Some(index) =
                    self.router.switch_context(|| self.profiles.select_previous_map())
                {
                    log::info!("engine: switched to map {}", index);
                }
            },
        );
        true
    }
}

pub struct Engine {
    profiles: Arc<ProfileStore>,
    bus: Arc<EventBus>,
    router: Arc<OutputRouter>,
    guard: Arc<GameModeGuard>,
    listener: Arc<RawEventListener>,
    routing_subscription: SubscriptionId,
    poll_interval: Duration,
    poller: Mutex<Option<GuardPoller>>,
    shut_down: AtomicBool,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        profile: Profile,
        sink: Box<dyn VirtualOutputSink>,
        probe: Box<dyn ForegroundProbe>,
    ) -> io::Result<Self> {
        let profiles = Arc::new(ProfileStore::new(profile));
        let guard = Arc::new(GameModeGuard::new(
            options.game_mode_enabled,
            &options.process_denylist,
            probe,
        ));
        let gate: Arc<dyn OperationGate> = guard.clone();
        let router = Arc::new(OutputRouter::new(
            sink,
            Arc::clone(&profiles),
            gate,
            options.emission,
        )?);

        let weak_router = Arc::downgrade(&router);
        guard.set_transition_listener(move |transition| {
            if let GuardTransition::Suspended { .. } = transition
                && let Some(router) = weak_router.upgrade()
            {
                router.release_all();
            }
        });

        let bus = Arc::new(EventBus::new());
        let listener = Arc::new(RawEventListener::new(Arc::clone(&bus))?);

        let routing = Routing {
            profiles: Arc::clone(&profiles),
            router: Arc::clone(&router),
            map_switch: MapSwitchController::new(options.debounce),
        };
        let routing_subscription = bus.subscribe(move |input| routing.handle(input));

        log::info!(
            "engine: started with {:?} emission, game mode {}",
            options.emission,
            if options.game_mode_enabled { "on" } else { "off" }
        );

        Ok(Self {
            profiles,
            bus,
            router,
            guard,
            listener,
            routing_subscription,
            poll_interval: options.poll_interval,
            poller: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    #[inline]
    pub fn router(&self) -> &OutputRouter {
        &self.router
    }

    #[inline]
    pub fn guard(&self) -> &Arc<GameModeGuard> {
        &self.guard
    }

    /// The listener a platform surface reports readiness and records to.
    #[inline]
    pub fn listener(&self) -> &Arc<RawEventListener> {
        &self.listener
    }

    #[inline]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Starts the foreground poll thread. Calling it again is a no-op.
    pub fn start_guard(&self) -> io::Result<()> {
        let mut poller = self.poller.lock().unwrap_or_else(PoisonError::into_inner);
        if poller.is_none() && !self.is_shut_down() {
            *poller = Some(self.guard.start(self.poll_interval)?);
        }
        Ok(())
    }

    /// Swallow decision for the key interceptor: routing is live and the
    /// active map has a blocking binding for this key.
    pub fn swallow_predicate(&self) -> SwallowPredicate {
        let guard = Arc::clone(&self.guard);
        let profiles = Arc::clone(&self.profiles);
        Arc::new(move |vk: u32, modifiers: Modifiers, _is_down: bool| {
            guard.should_operate_now()
                && profiles
                    .with_active_map(|map| matcher::should_block_key(map, vk, modifiers))
                    .unwrap_or(false)
        })
    }

    /// Interceptor core feeding this engine's event queue.
    pub fn interceptor_core(&self) -> Arc<InterceptorCore> {
        Arc::new(InterceptorCore::new(
            self.swallow_predicate(),
            self.listener.injector(),
        ))
    }

    pub fn subscribe(&self, handler: impl Fn(&InputEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.bus.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn capture_next_event(&self, timeout: Duration) -> Option<CanonicalEvent> {
        capture::capture_next_event(&self.bus, timeout)
    }

    /// Swaps the profile. Every active output is released first, and no
    /// press is routed between the flush and the swap.
    pub fn set_profile(&self, profile: Profile) {
        log::info!("engine: loaded profile {}", profile.name);
        self.router.switch_context(|| self.profiles.replace_profile(profile));
    }

    /// Selects a map by index. Active outputs are released first.
    pub fn select_map(&self, index: usize) -> bool {
        self.router.switch_context(|| self.profiles.select_map(index))
    }

    pub fn select_next_map(&self) -> Option<usize> {
        self.router.switch_context(|| self.profiles.select_next_map())
    }

    pub fn select_previous_map(&self) -> Option<usize> {
        self.router.switch_context(|| self.profiles.select_previous_map())
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stops polling and dispatch and releases every output. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(mut poller) = self.poller.lock().unwrap_or_else(PoisonError::into_inner).take() {
            poller.stop();
        }
        self.bus.unsubscribe(self.routing_subscription);
        self.listener.dispose();
        let released = self.router.release_all();
        log::info!("engine: shut down, released {} outputs", released);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
