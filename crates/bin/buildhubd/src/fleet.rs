//! The set of running automations, reconciled against configuration.
//!
//! [`Fleet::apply`] is called at startup and on every reload. Automations
//! are matched by name: existing ones receive their new config through
//! their handle, new ones are spawned and missing ones are stopped. An
//! automation whose `dry_run` flag flips, or whose task has ended, is
//! restarted since its actions are chosen at spawn time.

use std::collections::BTreeMap;
use std::sync::Arc;

use buildhub_app::actions::{DryRunActions, NodeActions};
use buildhub_app::automation::{
    Automation, AutomationConfig, AutomationHandle, spawn_automation,
};
use buildhub_app::automations::{
    HvacOccupancy, HvacOccupancyConfig, OccupancyLights, OccupancyLightsConfig,
};
use buildhub_app::ports::DeviceNode;
use buildhub_app::pull::PullOptions;
use buildhub_app::registry::Registry;
use buildhub_app::sources::ReadingSource;
use buildhub_domain::reading::{AirTemperature, Brightness, Modes, Occupancy};
use tokio_util::sync::CancellationToken;

use crate::config::AutomationsConfig;

/// Fields the fleet needs from every automation config.
trait Member: AutomationConfig + Clone {
    fn name(&self) -> &str;
    fn dry_run(&self) -> bool;
}

impl Member for OccupancyLightsConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}

impl Member for HvacOccupancyConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// What a call to [`Fleet::apply`] changed, by automation name.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FleetChanges {
    pub started: Vec<String>,
    pub updated: Vec<String>,
    pub restarted: Vec<String>,
    pub stopped: Vec<String>,
}

/// Running automations over the devices of one registry.
pub struct Fleet<N> {
    registry: Arc<Registry<N>>,
    pull: PullOptions,
    cancel: CancellationToken,
    occupancy_lights: BTreeMap<String, AutomationHandle<OccupancyLightsConfig>>,
    hvac_occupancy: BTreeMap<String, AutomationHandle<HvacOccupancyConfig>>,
}

impl<N: DeviceNode> Fleet<N> {
    /// An empty fleet; every automation it spawns stops with `parent`.
    #[must_use]
    pub fn new(registry: Arc<Registry<N>>, parent: &CancellationToken) -> Self {
        Self {
            registry,
            pull: PullOptions::default(),
            cancel: parent.child_token(),
            occupancy_lights: BTreeMap::new(),
            hvac_occupancy: BTreeMap::new(),
        }
    }

    /// Subscription timings for automations spawned from now on.
    #[must_use]
    pub fn with_pull_options(mut self, pull: PullOptions) -> Self {
        self.pull = pull;
        self
    }

    /// Names of the running automations, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .occupancy_lights
            .keys()
            .chain(self.hvac_occupancy.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Bring the running automations in line with `config`.
    ///
    /// Stopped automations are awaited before returning.
    pub async fn apply(&mut self, config: &AutomationsConfig) -> FleetChanges {
        let mut changes = FleetChanges::default();

        let registry = Arc::clone(&self.registry);
        let pull = self.pull.clone();
        let cancel = self.cancel.clone();
        let stopped_lights = reconcile(
            &mut self.occupancy_lights,
            &config.occupancy_lights,
            |c| spawn_occupancy_lights(&registry, &pull, c, &cancel),
            &mut changes,
        );
        let stopped_hvac = reconcile(
            &mut self.hvac_occupancy,
            &config.hvac_occupancy,
            |c| spawn_hvac_occupancy(&registry, &pull, c, &cancel),
            &mut changes,
        );

        join_all(stopped_lights).await;
        join_all(stopped_hvac).await;

        if changes != FleetChanges::default() {
            tracing::info!(
                started = ?changes.started,
                updated = changes.updated.len(),
                restarted = ?changes.restarted,
                stopped = ?changes.stopped,
                "automations reconciled"
            );
        }
        changes
    }

    /// Stop every automation and wait for them to end.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        join_all(self.occupancy_lights.into_values()).await;
        join_all(self.hvac_occupancy.into_values()).await;
    }
}

/// Apply `configs` to `handles`, returning the handles that were stopped.
fn reconcile<C: Member>(
    handles: &mut BTreeMap<String, AutomationHandle<C>>,
    configs: &[C],
    mut spawn: impl FnMut(C) -> AutomationHandle<C>,
    changes: &mut FleetChanges,
) -> Vec<AutomationHandle<C>> {
    let desired: BTreeMap<&str, &C> = configs.iter().map(|c| (c.name(), c)).collect();
    let mut stopped = Vec::new();

    let removed: Vec<String> = handles
        .keys()
        .filter(|name| !desired.contains_key(name.as_str()))
        .cloned()
        .collect();
    for name in removed {
        if let Some(handle) = handles.remove(&name) {
            handle.stop();
            stopped.push(handle);
            changes.stopped.push(name);
        }
    }

    for (name, config) in desired {
        let restart = match handles.get(name) {
            None => {
                handles.insert(name.to_string(), spawn(config.clone()));
                changes.started.push(name.to_string());
                continue;
            }
            Some(handle) => handle.is_finished() || handle.config().dry_run() != config.dry_run(),
        };
        if restart {
            if let Some(old) = handles.insert(name.to_string(), spawn(config.clone())) {
                old.stop();
                stopped.push(old);
            }
            changes.restarted.push(name.to_string());
        } else if let Some(handle) = handles.get(name) {
            handle.configure(config.clone());
            changes.updated.push(name.to_string());
        }
    }
    stopped
}

async fn join_all<C>(handles: impl IntoIterator<Item = AutomationHandle<C>>) {
    for handle in handles {
        let name = handle.name().to_string();
        if let Err(err) = handle.join().await {
            tracing::warn!(automation = %name, %err, "automation ended with an error");
        }
    }
}

fn spawn_occupancy_lights<N: DeviceNode>(
    registry: &Arc<Registry<N>>,
    pull: &PullOptions,
    config: OccupancyLightsConfig,
    cancel: &CancellationToken,
) -> AutomationHandle<OccupancyLightsConfig> {
    let sensors = ReadingSource::<N, Occupancy, _>::new(
        Arc::clone(registry),
        |c: &OccupancyLightsConfig| c.occupancy_sensors.clone(),
    )
    .with_options(pull.clone());
    let lights = ReadingSource::<N, Brightness, _>::new(
        Arc::clone(registry),
        |c: &OccupancyLightsConfig| c.lights.clone(),
    )
    .with_options(pull.clone());
    let name = config.name.clone();

    if config.dry_run {
        let automation = Automation::new(name, OccupancyLights, DryRunActions)
            .source(sensors)
            .source(lights);
        spawn_automation(automation, config, cancel)
    } else {
        let actions = NodeActions::new(Arc::clone(registry));
        let automation = Automation::new(name, OccupancyLights, actions)
            .source(sensors)
            .source(lights);
        spawn_automation(automation, config, cancel)
    }
}

fn spawn_hvac_occupancy<N: DeviceNode>(
    registry: &Arc<Registry<N>>,
    pull: &PullOptions,
    config: HvacOccupancyConfig,
    cancel: &CancellationToken,
) -> AutomationHandle<HvacOccupancyConfig> {
    let sensors = ReadingSource::<N, Occupancy, _>::new(
        Arc::clone(registry),
        |c: &HvacOccupancyConfig| c.occupancy_sensors.clone(),
    )
    .with_options(pull.clone());
    let temperatures = ReadingSource::<N, AirTemperature, _>::new(
        Arc::clone(registry),
        |c: &HvacOccupancyConfig| c.thermostats.clone(),
    )
    .with_options(pull.clone());
    let modes = ReadingSource::<N, Modes, _>::new(
        Arc::clone(registry),
        |c: &HvacOccupancyConfig| c.thermostats.clone(),
    )
    .with_options(pull.clone());
    let name = config.name.clone();

    if config.dry_run {
        let automation = Automation::new(name, HvacOccupancy, DryRunActions)
            .source(sensors)
            .source(temperatures)
            .source(modes);
        spawn_automation(automation, config, cancel)
    } else {
        let actions = NodeActions::new(Arc::clone(registry));
        let automation = Automation::new(name, HvacOccupancy, actions)
            .source(sensors)
            .source(temperatures)
            .source(modes);
        spawn_automation(automation, config, cancel)
    }
}
