//! End-to-end tests for the buildhubd wiring.
//!
//! Each test builds a virtual node, a registry and a fleet exactly like the
//! daemon does, then drives the simulated devices and watches what the
//! automations write back. Time is paused: the reading clock follows
//! tokio's clock so delays elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use buildhub_adapter_virtual::{DeviceKind, VirtualNode};
use buildhub_app::automations::{HvacOccupancyConfig, OccupancyLightsConfig};
use buildhub_app::registry::Registry;
use buildhub_domain::reading::OccupancyState;
use buildhub_domain::settings::WriteSettings;
use buildhub_domain::time::Clock;
use buildhubd::config::AutomationsConfig;
use buildhubd::fleet::Fleet;
use chrono::{TimeDelta, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A wall clock that advances with tokio's (paused) clock.
fn tokio_clock() -> Clock {
    let wall = Utc::now();
    let start = Instant::now();
    Clock::from_fn(move || {
        wall + TimeDelta::from_std(start.elapsed()).unwrap_or_default()
    })
}

fn node(clock: &Clock) -> Arc<VirtualNode> {
    let node = VirtualNode::default()
        .with_clock(clock.clone())
        .with_device("pir-1", DeviceKind::OccupancySensor)
        .and_then(|n| n.with_device("light-1", DeviceKind::Light))
        .and_then(|n| n.with_device("light-2", DeviceKind::Light))
        .and_then(|n| n.with_device("ahu-1", DeviceKind::Thermostat))
        .expect("device names are unique");
    Arc::new(node)
}

fn fleet(node: &Arc<VirtualNode>, cancel: &CancellationToken) -> Fleet<VirtualNode> {
    let registry = Arc::new(Registry::builder().fallback(Arc::clone(node)).build());
    Fleet::new(registry, cancel)
}

fn settings(clock: &Clock) -> WriteSettings {
    WriteSettings {
        clock: clock.clone(),
        ..WriteSettings::default()
    }
}

fn lights_config(clock: &Clock) -> OccupancyLightsConfig {
    OccupancyLightsConfig {
        name: "floor-1".to_string(),
        occupancy_sensors: vec!["pir-1".to_string()],
        lights: vec!["light-1".to_string(), "light-2".to_string()],
        unoccupied_off_delay_secs: 600,
        write: settings(clock),
        ..OccupancyLightsConfig::default()
    }
}

fn hvac_config(clock: &Clock, dry_run: bool) -> HvacOccupancyConfig {
    HvacOccupancyConfig {
        name: "wing-a".to_string(),
        occupancy_sensors: vec!["pir-1".to_string()],
        thermostats: vec!["ahu-1".to_string()],
        dry_run,
        write: settings(clock),
        ..HvacOccupancyConfig::default()
    }
}

/// Wait until `light` reports `level`.
async fn wait_for_level(node: &VirtualNode, light: &str, level: f32, within: Duration) {
    let mut rx = node.watch_brightness(light).expect("light exists");
    tokio::time::timeout(within, async {
        while rx.borrow_and_update().level_percent != level {
            rx.changed().await.expect("light outlives the test");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{light} never reached {level}%"));
}

/// Wait until `check` holds, polling the simulated devices.
async fn wait_until(within: Duration, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(within, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Occupancy lights
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn should_switch_lights_with_occupancy_after_delay() {
    let clock = tokio_clock();
    let node = node(&clock);
    let cancel = CancellationToken::new();
    let mut fleet = fleet(&node, &cancel);
    fleet
        .apply(&AutomationsConfig {
            occupancy_lights: vec![lights_config(&clock)],
            ..AutomationsConfig::default()
        })
        .await;

    node.set_occupancy("pir-1", OccupancyState::Occupied)
        .unwrap();
    wait_for_level(&node, "light-1", 100.0, Duration::from_secs(10)).await;
    wait_for_level(&node, "light-2", 100.0, Duration::from_secs(10)).await;

    node.set_occupancy("pir-1", OccupancyState::Unoccupied)
        .unwrap();
    let vacant_at = Instant::now();

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(node.brightness("light-1").unwrap().level_percent, 100.0);

    wait_for_level(&node, "light-1", 0.0, Duration::from_secs(600)).await;
    assert!(vacant_at.elapsed() >= Duration::from_secs(600));
    assert_eq!(node.writes("light-1"), 2);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn should_rewrite_light_changed_from_outside() {
    use buildhub_app::ports::DeviceNode;
    use buildhub_domain::reading::Brightness;

    let clock = tokio_clock();
    let node = node(&clock);
    let cancel = CancellationToken::new();
    let mut fleet = fleet(&node, &cancel);
    fleet
        .apply(&AutomationsConfig {
            occupancy_lights: vec![lights_config(&clock)],
            ..AutomationsConfig::default()
        })
        .await;
    node.set_occupancy("pir-1", OccupancyState::Occupied)
        .unwrap();
    wait_for_level(&node, "light-1", 100.0, Duration::from_secs(10)).await;

    // Someone dims the light at the wall switch.
    tokio::time::sleep(Duration::from_secs(10)).await;
    node.update_brightness("light-1", Brightness::new(30.0).unwrap())
        .await
        .unwrap();

    wait_for_level(&node, "light-1", 100.0, Duration::from_secs(10)).await;
    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn should_retry_unavailable_light_once_cache_expires() {
    let clock = tokio_clock();
    let node = node(&clock);
    node.set_available("light-2", false).unwrap();

    let mut config = lights_config(&clock);
    config.write.write_retry_delay_secs = 5;
    config.write.write_cache_expiry_secs = 30;

    let cancel = CancellationToken::new();
    let mut fleet = fleet(&node, &cancel);
    fleet
        .apply(&AutomationsConfig {
            occupancy_lights: vec![config],
            ..AutomationsConfig::default()
        })
        .await;

    node.set_occupancy("pir-1", OccupancyState::Occupied)
        .unwrap();
    wait_for_level(&node, "light-1", 100.0, Duration::from_secs(10)).await;
    assert_eq!(node.brightness("light-2").unwrap().level_percent, 0.0);

    node.set_available("light-2", true).unwrap();
    wait_for_level(&node, "light-2", 100.0, Duration::from_secs(120)).await;

    fleet.shutdown().await;
}

// ---------------------------------------------------------------------------
// HVAC occupancy (poll-only thermostat)
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn should_drive_poll_only_thermostat() {
    let clock = tokio_clock();
    let node = node(&clock);
    let cancel = CancellationToken::new();
    let mut fleet = fleet(&node, &cancel);
    fleet
        .apply(&AutomationsConfig {
            hvac_occupancy: vec![hvac_config(&clock, false)],
            ..AutomationsConfig::default()
        })
        .await;

    node.set_occupancy("pir-1", OccupancyState::Occupied)
        .unwrap();
    wait_until(Duration::from_secs(30), || {
        node.modes("ahu-1")
            .is_some_and(|m| m.get("occupancy") == Some("occupied"))
    })
    .await;
    assert_eq!(
        node.air_temperature("ahu-1").unwrap().setpoint_celsius,
        Some(21.0)
    );

    node.set_occupancy("pir-1", OccupancyState::Unoccupied)
        .unwrap();
    wait_until(Duration::from_secs(30), || {
        node.air_temperature("ahu-1")
            .is_some_and(|t| t.setpoint_celsius == Some(16.0))
    })
    .await;

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn should_not_touch_devices_in_dry_run_until_switched_off() {
    let clock = tokio_clock();
    let node = node(&clock);
    let cancel = CancellationToken::new();
    let mut fleet = fleet(&node, &cancel);
    fleet
        .apply(&AutomationsConfig {
            hvac_occupancy: vec![hvac_config(&clock, true)],
            ..AutomationsConfig::default()
        })
        .await;

    node.set_occupancy("pir-1", OccupancyState::Occupied)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(node.writes("ahu-1"), 0);

    let changes = fleet
        .apply(&AutomationsConfig {
            hvac_occupancy: vec![hvac_config(&clock, false)],
            ..AutomationsConfig::default()
        })
        .await;
    assert_eq!(changes.restarted, vec!["wing-a".to_string()]);

    wait_until(Duration::from_secs(30), || node.writes("ahu-1") == 2).await;
    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn should_stop_automations_on_shutdown() {
    let clock = tokio_clock();
    let node = node(&clock);
    let cancel = CancellationToken::new();
    let mut fleet = fleet(&node, &cancel);
    fleet
        .apply(&AutomationsConfig {
            occupancy_lights: vec![lights_config(&clock)],
            hvac_occupancy: vec![hvac_config(&clock, false)],
        })
        .await;
    assert_eq!(fleet.names(), vec!["floor-1", "wing-a"]);

    tokio::time::timeout(Duration::from_secs(5), fleet.shutdown())
        .await
        .expect("automations stop promptly");

    node.set_occupancy("pir-1", OccupancyState::Occupied)
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.writes("light-1"), 0);
}
