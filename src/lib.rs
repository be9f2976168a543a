//! Input capture and output routing for virtual joysticks.
//!
//! Physical keyboard, mouse and HID input is normalized into
//! [`event::CanonicalEvent`]s, published on an [`bus::EventBus`] and routed
//! through the active [`model::Map`] to a [`sink::VirtualOutputSink`].
//! Everything outside [`platform`] is OS-independent and testable headless.

pub mod bus;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod event;
pub mod guard;
pub mod interceptor;
pub mod label;
pub mod ledger;
pub mod listener;
pub mod map_switch;
pub mod matcher;
pub mod model;
pub mod platform;
pub mod router;
pub mod sink;

// Re-export types for test modules
pub use config::EngineConfig;
pub use engine::{Engine, EngineOptions};
pub use event::{CanonicalEvent, DeviceClass, InputEvent, Modifiers};
pub use model::{Binding, DeviceTrigger, Map, Profile, ProfileStore, VirtualOutput};
pub use router::{EmissionMode, OutputRouter};
