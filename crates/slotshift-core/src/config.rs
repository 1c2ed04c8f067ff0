//! slotshift.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::strategy::{BlueGreenConfig, RolloutStrategy};
use crate::types::{DEFAULT_DELIMITER, NamingTransition, TARGET_GROUP_PLACEHOLDER};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub cluster: String,
    pub region: String,
    #[serde(default)]
    pub strategy: RolloutStrategy,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub slots: SlotsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancerConfig>,
    #[serde(default)]
    pub naming: NamingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub steady_state: String,
    pub poll_interval: String,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            steady_state: "10m".to_string(),
            poll_interval: "10s".to_string(),
        }
    }
}

/// What to do when probing a slot fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbePolicy {
    /// Treat the slot as absent and log a warning.
    #[default]
    Lenient,
    /// Abort resolution.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotsConfig {
    pub probe_policy: ProbePolicy,
    pub delimiter: String,
}

impl Default for SlotsConfig {
    fn default() -> Self {
        Self {
            probe_policy: ProbePolicy::Lenient,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

/// Listener layout for blue/green traffic switching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub name: String,
    pub prod_listener: String,
    pub prod_rule: String,
    pub stage_listener: String,
    pub stage_rule: String,
    /// Target group rendered into stage manifests. Resolved from the stage
    /// rule when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_target_group: Option<String>,
    #[serde(default = "default_placeholder")]
    pub target_group_placeholder: String,
}

fn default_placeholder() -> String {
    TARGET_GROUP_PLACEHOLDER.to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub transition: NamingTransition,
}

impl RolloutConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: RolloutConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed durations up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.steady_state_timeout()?;
        if self.poll_interval()?.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "timeouts.poll_interval".to_string(),
            });
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn steady_state_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("timeouts.steady_state", &self.timeouts.steady_state)
    }

    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("timeouts.poll_interval", &self.timeouts.poll_interval)
    }

    /// Scaffold a starter slotshift.toml for a blue/green service.
    pub fn scaffold(cluster: &str, region: &str) -> Self {
        RolloutConfig {
            cluster: cluster.to_string(),
            region: region.to_string(),
            strategy: RolloutStrategy::BlueGreen(BlueGreenConfig::default()),
            timeouts: TimeoutsConfig::default(),
            slots: SlotsConfig::default(),
            load_balancer: Some(LoadBalancerConfig {
                name: "app-lb".to_string(),
                prod_listener: "listener-prod".to_string(),
                prod_rule: "rule-prod".to_string(),
                stage_listener: "listener-stage".to_string(),
                stage_rule: "rule-stage".to_string(),
                stage_target_group: None,
                target_group_placeholder: default_placeholder(),
            }),
            naming: NamingConfig::default(),
        }
    }
}

/// Parse `"500ms"`, `"30s"`, `"10m"`, `"1h"`, or bare seconds.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Duration {
        field: field.to_string(),
        value: value.to_string(),
    };
    let s = value.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(invalid());
    }
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = |scale: u64| {
        n.checked_mul(scale)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    };
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "" | "s" => Ok(Duration::from_secs(n)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(invalid()),
    }
}
