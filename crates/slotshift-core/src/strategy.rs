//! Rollout strategies: rolling update, canary, blue-green.
//!
//! The strategy is plain configuration: the deployer matches on it once and
//! picks the executor path, instead of inspecting which handler it was given.

/// How to roll out a new version of a service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Update the service in place. Default.
    Rolling(RollingConfig),
    /// Stand up a separately-named canary service next to the live one.
    Canary(CanaryConfig),
    /// Deploy into the inactive slot, then swap listener targets.
    BlueGreen(BlueGreenConfig),
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        Self::Rolling(RollingConfig::default())
    }
}

impl RolloutStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rolling(_) => "rolling",
            Self::Canary(_) => "canary",
            Self::BlueGreen(_) => "blue_green",
        }
    }
}

/// Configuration for in-place updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    /// Keep the currently desired count instead of the manifest's.
    pub same_as_running_count: bool,
    /// Force a redeploy even when the task definition is unchanged.
    pub force_new_deployment: bool,
}

/// Configuration for canary services.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CanaryConfig {
    /// Appended to the manifest's service name.
    pub suffix: String,
    /// Instances to run in the canary, overriding the manifest.
    pub instances: Option<u32>,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            suffix: "Canary".to_string(),
            instances: Some(1),
        }
    }
}

/// Configuration for blue-green switches.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BlueGreenConfig {
    /// Scale the previously active slot to zero after cutover.
    pub downsize_old: bool,
    /// Point the stage listener at the old target group after cutover.
    pub swap_stage_listener: bool,
}

impl Default for BlueGreenConfig {
    fn default() -> Self {
        Self {
            downsize_old: true,
            swap_stage_listener: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rolling() {
        match RolloutStrategy::default() {
            RolloutStrategy::Rolling(cfg) => {
                assert!(!cfg.same_as_running_count);
                assert!(!cfg.force_new_deployment);
            }
            other => panic!("expected Rolling, got {other:?}"),
        }
    }

    #[test]
    fn parses_tagged_toml() {
        let strategy: RolloutStrategy = toml::from_str(
            r#"
type = "blue_green"
downsize_old = false
"#,
        )
        .unwrap();
        match strategy {
            RolloutStrategy::BlueGreen(cfg) => {
                assert!(!cfg.downsize_old);
                assert!(cfg.swap_stage_listener);
            }
            other => panic!("expected BlueGreen, got {other:?}"),
        }
    }

    #[test]
    fn serializes_roundtrip() {
        let strategy = RolloutStrategy::Canary(CanaryConfig {
            suffix: "Probe".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_string(&strategy).unwrap();
        let back: RolloutStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
        assert_eq!(back.name(), "canary");
    }
}
