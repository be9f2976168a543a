use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::engine::EngineOptions;
use crate::event::{DeviceClass, Modifiers};
use crate::label;
use crate::model::{Binding, DeviceTrigger, Map, Profile, VirtualOutput};
use crate::router::EmissionMode;

/// How a routed press is turned into output transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionKind {
    #[default]
    Tap,
    Hold,
}

impl EmissionKind {
    fn as_str(&self) -> &'static str {
        match self {
            EmissionKind::Tap => "tap",
            EmissionKind::Hold => "hold",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_game_mode_enabled")]
    pub game_mode_enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub emission: EmissionKind,
    #[serde(default = "default_tap_duration_ms")]
    pub tap_duration_ms: u64,
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    #[serde(default = "default_vjoy_device_id")]
    pub vjoy_device_id: u32,
    #[serde(default)]
    pub process_denylist: Vec<String>,
    #[serde(default)]
    pub profile: Profile,
}

fn default_game_mode_enabled() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_debounce_ms() -> u64 {
    250
}
fn default_tap_duration_ms() -> u64 {
    40
}
fn default_capture_timeout_ms() -> u64 {
    5000
}
fn default_vjoy_device_id() -> u32 {
    1
}

/// Profile written on first run so the file shows every binding form.
fn default_profile() -> Profile {
    let mut main = Map::new("Main")
        .with_binding(Binding::device(
            "Side button",
            DeviceClass::Mouse,
            "XButton1",
            VirtualOutput::JoystickButton { button: 1 },
        ))
        .with_binding(
            Binding::keyboard(
                "Push to talk",
                0x4B,
                Modifiers::CTRL,
                VirtualOutput::JoystickButton { button: 3 },
            )
            .blocking(),
        );
    main.next_map_trigger = Some(DeviceTrigger::new(DeviceClass::Keyboard, "PageDown"));
    main.prev_map_trigger = Some(DeviceTrigger::new(DeviceClass::Keyboard, "PageUp"));

    let mut alternate = Map::new("Alternate").with_binding(Binding::device(
        "Side button",
        DeviceClass::Mouse,
        "XButton1",
        VirtualOutput::Keyboard {
            scan_code: 0x1E,
            extended: false,
        },
    ));
    alternate.next_map_trigger = main.next_map_trigger.clone();
    alternate.prev_map_trigger = main.prev_map_trigger.clone();

    Profile::new("Default", vec![main, alternate])
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game_mode_enabled: default_game_mode_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            emission: EmissionKind::Tap,
            tap_duration_ms: default_tap_duration_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
            vjoy_device_id: default_vjoy_device_id(),
            process_denylist: vec![],
            profile: default_profile(),
        }
    }
}

#[derive(Serialize)]
struct ProfileSection<'a> {
    profile: &'a Profile,
}

impl EngineConfig {
    /// Load config from file, or create default if not exists
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            let default_config = Self::default();
            default_config.save_to_file(&path)?;
            return Ok(default_config);
        }
        Self::load_from_file(path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: EngineConfig = toml::from_str(&content)?;

        config.poll_interval_ms = config.poll_interval_ms.max(100);
        config.tap_duration_ms = config.tap_duration_ms.clamp(5, 1000);
        config.capture_timeout_ms = config.capture_timeout_ms.max(100);
        config.vjoy_device_id = config.vjoy_device_id.clamp(1, 16);
        config.profile.resolve_selection();

        for map in &config.profile.maps {
            for binding in &map.bindings {
                if binding.device.is_none() && binding.key.is_none() {
                    log::warn!(
                        "config: binding '{}' in map '{}' has no trigger and never fires",
                        binding.name,
                        map.name
                    );
                }
            }
        }

        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut result = format!(
            "game_mode_enabled = {}       # Route input only while no denylisted process has focus\n\
             poll_interval_ms = {}         # Foreground process poll interval (ms, minimum 100)\n\
             debounce_ms = {}              # Map switch hotkey debounce window (ms)\n\
             emission = \"{}\"              # \"tap\" = press then auto-release, \"hold\" = follow the physical release\n\
             tap_duration_ms = {}           # Hold time for tap emission (ms, 5-1000)\n\
             capture_timeout_ms = {}      # Timeout when capturing a control to bind (ms)\n\
             vjoy_device_id = {}             # Virtual joystick device to drive (1-16)\n\n\
             # Processes that suspend routing while in the foreground\n\
             process_denylist = {:?}     # Example: [\"game.exe\", \"launcher.exe\"]\n\n\
             # Profile: ordered maps, each with its bindings.\n\
             # Device bindings: device = {{ device_class = \"Keyboard\" | \"Mouse\" | \"HID\", control_label = \"...\" }}\n\
             # Keyboard bindings: key = \"K\" plus optional modifiers = {{ ctrl = true }}\n\
             # Outputs: {{ kind = \"joystick_button\", button = 1 }} or {{ kind = \"keyboard\", scan_code = 30, extended = false }}\n",
            self.game_mode_enabled,
            self.poll_interval_ms,
            self.debounce_ms,
            self.emission.as_str(),
            self.tap_duration_ms,
            self.capture_timeout_ms,
            self.vjoy_device_id,
            self.process_denylist
        );

        result.push_str(&toml::to_string(&ProfileSection {
            profile: &self.profile,
        })?);

        fs::write(path, result)?;
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            game_mode_enabled: self.game_mode_enabled,
            process_denylist: self.process_denylist.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            emission: match self.emission {
                EmissionKind::Tap => EmissionMode::Tap(Duration::from_millis(self.tap_duration_ms)),
                EmissionKind::Hold => EmissionMode::Hold,
            },
        }
    }

    #[inline]
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

/// Display form of a keyboard binding's trigger, e.g. `"Ctrl + K"`.
pub fn binding_display(binding: &Binding) -> String {
    match (&binding.device, binding.key) {
        (Some(device), _) => format!("{} {}", device.device_class, device.control_label),
        (None, Some(vk)) => label::build_label(binding.modifiers, vk),
        (None, None) => String::new(),
    }
}
