//! Configuration loading — TOML file with environment variable overrides.
//!
//! Reads `buildhub.toml` from the working directory, or the file named by
//! `BUILDHUB_CONFIG`. Every field has a default so the file is optional.
//! Environment variables take precedence over file values.
//!
//! ```toml
//! [logging]
//! filter = "buildhubd=debug"
//!
//! [sources]
//! poll_interval_ms = 5000
//!
//! [[virtual.devices]]
//! name = "pir-1"
//! kind = "occupancy_sensor"
//!
//! [[automations.occupancy_lights]]
//! name = "floor-1"
//! occupancy_sensors = ["pir-1"]
//! lights = ["light-1"]
//! unoccupied_off_delay_secs = 600
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use buildhub_adapter_virtual::{VirtualConfig, VirtualNode};
use buildhub_app::automations::{HvacOccupancyConfig, OccupancyLightsConfig};
use buildhub_app::pull::PullOptions;
use buildhub_domain::error::ValidationError;
use serde::Deserialize;

const DEFAULT_PATH: &str = "buildhub.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub sources: SourcesConfig,
    /// Simulated devices served by the virtual node.
    #[serde(rename = "virtual")]
    pub virtual_node: VirtualConfig,
    pub automations: AutomationsConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "buildhubd=info,buildhub_app=info,buildhub_adapter_virtual=info".to_string(),
        }
    }
}

/// Subscription and polling timings, shared by every device subscription.
///
/// Read at startup only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// First reconnect delay after a failed subscription; doubles per failure.
    pub pull_backoff_initial_ms: u64,
    pub pull_backoff_max_secs: u64,
    /// Delay between two polls of a device that cannot be subscribed to.
    pub poll_interval_ms: u64,
    pub poll_backoff_max_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let defaults = PullOptions::default();
        Self {
            pull_backoff_initial_ms: millis(defaults.pull_backoff_initial),
            pull_backoff_max_secs: defaults.pull_backoff_max.as_secs(),
            poll_interval_ms: millis(defaults.poll_interval),
            poll_backoff_max_secs: defaults.poll_backoff_max.as_secs(),
        }
    }
}

impl SourcesConfig {
    #[must_use]
    pub fn pull_options(&self) -> PullOptions {
        PullOptions {
            pull_backoff_initial: Duration::from_millis(self.pull_backoff_initial_ms),
            pull_backoff_max: Duration::from_secs(self.pull_backoff_max_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            poll_backoff_max: Duration::from_secs(self.poll_backoff_max_secs),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.pull_backoff_initial_ms == 0 {
            return Err(ValidationError::ZeroDuration {
                field: "pull_backoff_initial_ms",
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::ZeroDuration {
                field: "poll_interval_ms",
            });
        }
        Ok(())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Automation instances, per kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutomationsConfig {
    pub occupancy_lights: Vec<OccupancyLightsConfig>,
    pub hvac_occupancy: Vec<HvacOccupancyConfig>,
}

impl AutomationsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        let named = self
            .occupancy_lights
            .iter()
            .map(|c| (c.name.as_str(), c.validate()))
            .chain(
                self.hvac_occupancy
                    .iter()
                    .map(|c| (c.name.as_str(), c.validate())),
            );
        for (name, validation) in named {
            validation.map_err(|source| ConfigError::Validation {
                context: format!("automation {name:?}"),
                source,
            })?;
            if !names.insert(name) {
                return Err(ConfigError::DuplicateAutomation(name.to_string()));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default location, apply environment
    /// overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the result is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&Self::path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// The config file location: `BUILDHUB_CONFIG` or `buildhub.toml`.
    #[must_use]
    pub fn path() -> PathBuf {
        std::env::var_os("BUILDHUB_CONFIG")
            .map_or_else(|| PathBuf::from(DEFAULT_PATH), PathBuf::from)
    }

    /// Read `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("BUILDHUB_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid section found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sources
            .validate()
            .map_err(|source| ConfigError::Validation {
                context: "sources".to_string(),
                source,
            })?;
        VirtualNode::from_config(&self.virtual_node).map_err(|source| {
            ConfigError::Validation {
                context: "virtual devices".to_string(),
                source,
            }
        })?;
        self.automations.validate()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration for {context}")]
    Validation {
        context: String,
        #[source]
        source: ValidationError,
    },
    #[error("automation name {0:?} is used more than once")]
    DuplicateAutomation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const FULL: &str = r#"
        [logging]
        filter = "debug"

        [sources]
        poll_interval_ms = 250
        pull_backoff_max_secs = 5

        [[virtual.devices]]
        name = "pir-1"
        kind = "occupancy_sensor"

        [[virtual.devices]]
        name = "light-1"
        kind = "light"

        [[virtual.devices]]
        name = "ahu-1"
        kind = "thermostat"

        [[automations.occupancy_lights]]
        name = "floor-1"
        occupancy_sensors = ["pir-1"]
        lights = ["light-1"]
        unoccupied_off_delay_secs = 300
        write_cache_expiry_secs = 3600

        [[automations.hvac_occupancy]]
        name = "wing-a"
        occupancy_sensors = ["pir-1"]
        thermostats = ["ahu-1"]
        dry_run = true
    "#;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert!(config.logging.filter.contains("buildhubd=info"));
        assert!(config.virtual_node.devices.is_empty());
        assert!(config.automations.occupancy_lights.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_default_sources_to_pull_defaults() {
        let options = SourcesConfig::default().pull_options();
        let defaults = PullOptions::default();
        assert_eq!(options.pull_backoff_initial, defaults.pull_backoff_initial);
        assert_eq!(options.pull_backoff_max, defaults.pull_backoff_max);
        assert_eq!(options.poll_interval, defaults.poll_interval);
        assert_eq!(options.poll_backoff_max, defaults.poll_backoff_max);
    }

    #[test]
    fn should_reject_zero_poll_interval() {
        let config: Config = toml::from_str("[sources]\npoll_interval_ms = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                source: ValidationError::ZeroDuration {
                    field: "poll_interval_ms"
                },
                ..
            })
        ));
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.automations.hvac_occupancy.is_empty());
    }

    #[test]
    fn should_parse_full_toml() {
        let config: Config = toml::from_str(FULL).unwrap();

        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.virtual_node.devices.len(), 3);

        let pull = config.sources.pull_options();
        assert_eq!(pull.poll_interval, Duration::from_millis(250));
        assert_eq!(pull.pull_backoff_max, Duration::from_secs(5));
        assert_eq!(pull.pull_backoff_initial, Duration::from_millis(100));

        let lights = &config.automations.occupancy_lights[0];
        assert_eq!(lights.name, "floor-1");
        assert_eq!(lights.unoccupied_off_delay(), Duration::from_secs(300));
        assert_eq!(
            lights.write.write_cache_expiry(),
            Some(Duration::from_secs(3600))
        );

        let hvac = &config.automations.hvac_occupancy[0];
        assert!(hvac.dry_run);
        assert_eq!(hvac.mode_key, "occupancy");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file(Path::new("nonexistent.toml")).unwrap();
        assert!(config.automations.occupancy_lights.is_empty());
    }

    #[test]
    fn should_prefer_rust_log_over_buildhub_log() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "BUILDHUB_LOG" => Some("warn".to_string()),
            "RUST_LOG" => Some("trace".to_string()),
            _ => None,
        });
        assert_eq!(config.logging.filter, "trace");

        let mut config = Config::default();
        config.apply_env_overrides(|key| (key == "BUILDHUB_LOG").then(|| "warn".to_string()));
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn should_reject_invalid_automation() {
        let config: Config = toml::from_str(
            r#"
            [[automations.occupancy_lights]]
            name = "floor-1"
            lights = ["light-1", "light-1"]
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation {
                source: ValidationError::DuplicateDevice { .. },
                ..
            }
        ));
        assert_eq!(
            err.to_string(),
            "invalid configuration for automation \"floor-1\""
        );
    }

    #[test]
    fn should_reject_duplicate_automation_names() {
        let config: Config = toml::from_str(
            r#"
            [[automations.occupancy_lights]]
            name = "zone"

            [[automations.hvac_occupancy]]
            name = "zone"
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAutomation(name)) if name == "zone"
        ));
    }

    #[test]
    fn should_reject_duplicate_virtual_devices() {
        let config: Config = toml::from_str(
            r#"
            [[virtual.devices]]
            name = "light-1"
            kind = "light"

            [[virtual.devices]]
            name = "light-1"
            kind = "light"
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
