//! Auto-scaling descriptors and snapshots.
//!
//! A [`ScalingSnapshot`] is what the scaling migrator captures from one
//! service before touching it and replays onto another. Descriptors keep the
//! provider's camelCase field names so user-supplied YAML manifests and
//! captured snapshots share one format.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Namespace for container services in the autoscaling API.
pub const ECS_SERVICE_NAMESPACE: &str = "ecs";

/// Scalable dimension for a service's desired count.
pub const DESIRED_COUNT_DIMENSION: &str = "ecs:service:DesiredCount";

/// Autoscaling resource id of a service: `service/{cluster}/{name}`.
pub fn scaling_resource_id(cluster: &str, service_name: &str) -> String {
    format!("service/{cluster}/{service_name}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalableTarget {
    #[serde(default = "default_namespace")]
    pub service_namespace: String,
    /// Substituted on replay; manifests may leave it empty.
    #[serde(default)]
    pub resource_id: String,
    #[serde(default = "default_dimension")]
    pub scalable_dimension: String,
    pub min_capacity: u32,
    pub max_capacity: u32,
    #[serde(rename = "roleARN", default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
}

impl ScalableTarget {
    pub fn from_yaml(manifest: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(manifest).map_err(|e| ConfigError::Manifest {
            kind: "scalable target".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn with_resource_id(&self, resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingPolicy {
    pub policy_name: String,
    #[serde(default = "default_namespace")]
    pub service_namespace: String,
    #[serde(default)]
    pub resource_id: String,
    #[serde(default = "default_dimension")]
    pub scalable_dimension: String,
    #[serde(default = "default_policy_type")]
    pub policy_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tracking_scaling_policy_configuration: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_scaling_policy_configuration: Option<serde_json::Value>,
}

impl ScalingPolicy {
    pub fn from_yaml(manifest: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(manifest).map_err(|e| ConfigError::Manifest {
            kind: "scaling policy".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn with_resource_id(&self, resource_id: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            ..self.clone()
        }
    }

    /// Whether this policy applies to `target`.
    pub fn belongs_to(&self, target: &ScalableTarget) -> bool {
        self.service_namespace == target.service_namespace
            && self.scalable_dimension == target.scalable_dimension
    }
}

fn default_namespace() -> String {
    ECS_SERVICE_NAMESPACE.to_string()
}

fn default_dimension() -> String {
    DESIRED_COUNT_DIMENSION.to_string()
}

fn default_policy_type() -> String {
    "TargetTrackingScaling".to_string()
}

/// A scalable target together with the policies attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingEntry {
    pub target: ScalableTarget,
    #[serde(default)]
    pub policies: Vec<ScalingPolicy>,
}

/// Ordered autoscaling state of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingSnapshot {
    #[serde(default)]
    pub entries: Vec<ScalingEntry>,
}

impl ScalingSnapshot {
    /// Pair policies with targets of the same dimension.
    ///
    /// Returns the snapshot and any policies that matched no target.
    pub fn from_parts(
        targets: Vec<ScalableTarget>,
        policies: Vec<ScalingPolicy>,
    ) -> (Self, Vec<ScalingPolicy>) {
        let mut entries: Vec<ScalingEntry> = targets
            .into_iter()
            .map(|target| ScalingEntry {
                target,
                policies: Vec::new(),
            })
            .collect();
        let mut orphans = Vec::new();

        for policy in policies {
            match entries.iter_mut().find(|e| policy.belongs_to(&e.target)) {
                Some(entry) => entry.policies.push(policy),
                None => orphans.push(policy),
            }
        }

        (Self { entries }, orphans)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy_count(&self) -> usize {
        self.entries.iter().map(|e| e.policies.len()).sum()
    }

    /// Copy of this snapshot with every descriptor pointed at `resource_id`.
    pub fn for_resource(&self, resource_id: &str) -> Self {
        let entries = self
            .entries
            .iter()
            .map(|e| ScalingEntry {
                target: e.target.with_resource_id(resource_id),
                policies: e
                    .policies
                    .iter()
                    .map(|p| p.with_resource_id(resource_id))
                    .collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Manifest {
            kind: "scaling snapshot".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Manifest {
            kind: "scaling snapshot".to_string(),
            reason: e.to_string(),
        })
    }
}
