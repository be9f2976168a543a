//! Configuration file tests.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use padroute::config::{EmissionKind, EngineConfig};
use padroute::{DeviceClass, EmissionMode, Modifiers, VirtualOutput};

/// Returns a unique temporary file path for test isolation.
fn get_test_file_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("padroute_config_test_{}_{}.toml", name, std::process::id()));
    path
}

fn cleanup_test_file(path: &PathBuf) {
    let _ = fs::remove_file(path);
}

#[test]
fn test_default_config_round_trip() {
    let path = get_test_file_path("round_trip");
    let config = EngineConfig::default();

    config.save_to_file(&path).expect("Failed to save config");
    let loaded = EngineConfig::load_from_file(&path).expect("Failed to load config");

    assert_eq!(loaded.game_mode_enabled, config.game_mode_enabled);
    assert_eq!(loaded.emission, config.emission);
    assert_eq!(loaded.tap_duration_ms, config.tap_duration_ms);
    assert_eq!(loaded.vjoy_device_id, config.vjoy_device_id);
    assert_eq!(loaded.profile, config.profile);

    cleanup_test_file(&path);
}

#[test]
fn test_load_or_create_writes_default_file() {
    let path = get_test_file_path("create");
    cleanup_test_file(&path);

    let created = EngineConfig::load_or_create(&path).expect("Failed to create config");
    assert!(path.exists());
    let reloaded = EngineConfig::load_or_create(&path).expect("Failed to reload config");
    assert_eq!(created.profile.maps.len(), reloaded.profile.maps.len());

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("# Processes that suspend routing"));

    cleanup_test_file(&path);
}

#[test]
fn test_out_of_range_values_are_clamped() {
    let path = get_test_file_path("clamp");
    fs::write(
        &path,
        "poll_interval_ms = 10\n\
         tap_duration_ms = 5000\n\
         capture_timeout_ms = 0\n\
         vjoy_device_id = 40\n",
    )
    .unwrap();

    let config = EngineConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(config.poll_interval_ms, 100);
    assert_eq!(config.tap_duration_ms, 1000);
    assert_eq!(config.capture_timeout_ms, 100);
    assert_eq!(config.vjoy_device_id, 16);

    cleanup_test_file(&path);
}

#[test]
fn test_profile_with_key_names_and_selected_map() {
    let path = get_test_file_path("profile");
    fs::write(
        &path,
        r#"emission = "hold"
process_denylist = ["Game.exe"]

[profile]
name = "racing"
selected_map = "pit"

[[profile.maps]]
name = "track"

[[profile.maps.bindings]]
name = "boost"
key = "F5"
block_original = true
modifiers = { shift = true }
output = { kind = "joystick_button", button = 7 }

[[profile.maps]]
name = "pit"

[[profile.maps.bindings]]
name = "wheel"
device = { device_class = "HID", control_label = "UsagePage 1, Usage 4" }
output = { kind = "keyboard", scan_code = 57, extended = false }
"#,
    )
    .unwrap();

    let config = EngineConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(config.emission, EmissionKind::Hold);
    assert_eq!(config.engine_options().emission, EmissionMode::Hold);
    assert_eq!(config.process_denylist, vec!["Game.exe".to_string()]);

    let profile = &config.profile;
    assert_eq!(profile.selected_index(), 1);
    assert_eq!(profile.active_map().map(|m| m.name.as_str()), Some("pit"));

    let boost = &profile.maps[0].bindings[0];
    assert_eq!(boost.key, Some(0x74));
    assert!(boost.modifiers.shift && !boost.modifiers.ctrl);
    assert!(boost.block_original);
    assert_eq!(boost.output, VirtualOutput::JoystickButton { button: 7 });

    let wheel = &profile.maps[1].bindings[0];
    let trigger = wheel.device.as_ref().expect("device trigger");
    assert_eq!(trigger.device_class, DeviceClass::Hid);
    assert_eq!(wheel.modifiers, Modifiers::NONE);

    cleanup_test_file(&path);
}

#[test]
fn test_unknown_key_name_is_rejected() {
    let path = get_test_file_path("bad_key");
    fs::write(
        &path,
        r#"[profile]
name = "broken"

[[profile.maps]]
name = "main"

[[profile.maps.bindings]]
name = "nope"
key = "NOT_A_KEY"
"#,
    )
    .unwrap();

    assert!(EngineConfig::load_from_file(&path).is_err());

    cleanup_test_file(&path);
}

#[test]
fn test_unknown_selected_map_falls_back_to_first() {
    let path = get_test_file_path("fallback");
    fs::write(
        &path,
        r#"[profile]
name = "p"
selected_map = "missing"

[[profile.maps]]
name = "one"

[[profile.maps]]
name = "two"
"#,
    )
    .unwrap();

    let config = EngineConfig::load_from_file(&path).expect("Failed to load config");
    assert_eq!(config.profile.selected_index(), 0);
    assert_eq!(config.profile.selected_map.as_deref(), Some("one"));
    assert_eq!(config.capture_timeout(), Duration::from_millis(5000));

    cleanup_test_file(&path);
}
