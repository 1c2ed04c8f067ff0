//! Domain types for the rollout engine.
//!
//! These are local, per-invocation copies of control-plane state: service
//! descriptors, load-balancer listeners and rules, version slots, and the
//! records a deploy leaves behind for a later rollback. All types are
//! serializable so they can be persisted in the rollout ledger.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::scaling::ScalingSnapshot;

/// Tag key carrying the blue/green marker on a service.
pub const BG_VERSION_TAG: &str = "BG_VERSION";

/// Placeholder rendered with the stage target group in service manifests.
pub const TARGET_GROUP_PLACEHOLDER: &str = "<+targetGroupArn>";

/// Separator between a service prefix and its slot or release suffix.
pub const DEFAULT_DELIMITER: &str = "__";

/// Suffix of the canonical inactive name in the non-versioned convention.
pub const INACTIVE_SUFFIX: &str = "INACTIVE";

// ── Slots & tags ───────────────────────────────────────────────────

/// One of the two physical slots a logical service rotates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotIndex {
    One,
    Two,
}

impl SlotIndex {
    /// Probe order. Slot 1 always comes first.
    pub const ALL: [SlotIndex; 2] = [SlotIndex::One, SlotIndex::Two];

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

/// A resolved slot: `{prefix}{1|2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVersionSlot {
    pub name_prefix: String,
    pub slot: SlotIndex,
    pub resolved_name: String,
}

impl ServiceVersionSlot {
    pub fn new(name_prefix: &str, slot: SlotIndex) -> Self {
        Self {
            name_prefix: name_prefix.to_string(),
            slot,
            resolved_name: format!("{name_prefix}{}", slot.number()),
        }
    }
}

/// Blue/green marker stored under [`BG_VERSION_TAG`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VersionTag {
    /// Receiving live traffic.
    Blue,
    /// Idle, or staged and waiting for cutover.
    Green,
}

impl VersionTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "BLUE",
            Self::Green => "GREEN",
        }
    }

    /// Parse a tag value. Comparison is case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("BLUE") {
            Some(Self::Blue)
        } else if value.eq_ignore_ascii_case("GREEN") {
            Some(Self::Green)
        } else {
            None
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Services ───────────────────────────────────────────────────────

/// Lifecycle status of a service as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Active,
    Draining,
    Inactive,
}

/// A key/value resource tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// A provider lifecycle event. Identity is the opaque `id`, never content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub id: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    pub message: String,
}

/// Snapshot of a running service as returned by `describe_service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// ARN or GUID. Stable across renames.
    pub id: String,
    pub status: ServiceStatus,
    pub desired_count: u32,
    pub running_count: u32,
    #[serde(default)]
    pub pending_count: u32,
    #[serde(default)]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Lifecycle events in provider order (newest first on most providers).
    #[serde(default)]
    pub events: Vec<ServiceEvent>,
    /// Router URLs currently mapped to the service.
    #[serde(default)]
    pub routes: Vec<String>,
    /// Unix timestamp (seconds) when the service was created.
    #[serde(default)]
    pub created_at: u64,
}

impl ServiceDescriptor {
    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }

    /// Running count has caught up with desired count.
    pub fn is_steady(&self) -> bool {
        self.running_count == self.desired_count
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn version_tag(&self) -> Option<VersionTag> {
        self.tag(BG_VERSION_TAG).and_then(VersionTag::parse)
    }
}

/// Load balancer attachment inside a service manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerBinding {
    pub target_group_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
}

/// Desired service shape, parsed from a YAML service manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancers: Vec<LoadBalancerBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<String>,
}

impl ServiceDefinition {
    /// Parse a service manifest.
    pub fn from_yaml(manifest: &str) -> Result<Self, ConfigError> {
        let def: ServiceDefinition =
            serde_yaml::from_str(manifest).map_err(|e| ConfigError::Manifest {
                kind: "service definition".to_string(),
                reason: e.to_string(),
            })?;
        if def.service_name.trim().is_empty() {
            return Err(ConfigError::Manifest {
                kind: "service definition".to_string(),
                reason: "serviceName is empty".to_string(),
            });
        }
        Ok(def)
    }

    /// Set a tag, replacing any existing value for the same key.
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.retain(|t| t.key != key);
        self.tags.push(Tag::new(key, value));
        self
    }
}

/// Substitute every occurrence of `placeholder` in a raw manifest.
pub fn render_placeholder(manifest: &str, placeholder: &str, value: &str) -> String {
    if manifest.contains(placeholder) {
        manifest.replace(placeholder, value)
    } else {
        manifest.to_string()
    }
}

/// In-place update of an existing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceUpdate {
    pub service_name: String,
    pub task_definition: Option<String>,
    /// `None` keeps the currently desired count.
    pub desired_count: Option<u32>,
    pub force_new_deployment: bool,
}

impl ServiceUpdate {
    pub fn from_definition(def: &ServiceDefinition, force_new_deployment: bool) -> Self {
        Self {
            service_name: def.service_name.clone(),
            task_definition: def.task_definition.clone(),
            desired_count: def.desired_count,
            force_new_deployment,
        }
    }

    /// A resize-only update.
    pub fn resize(service_name: &str, desired_count: u32) -> Self {
        Self {
            service_name: service_name.to_string(),
            task_definition: None,
            desired_count: Some(desired_count),
            force_new_deployment: false,
        }
    }
}

/// What a successful deploy hands back to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHandle {
    pub name: String,
    pub id: String,
    pub region: String,
}

// ── Load balancing ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub arn: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Forward,
    Redirect,
    FixedResponse,
}

/// A listener or rule action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    #[serde(default)]
    pub target_group_arn: Option<String>,
}

impl Action {
    pub fn forward(target_group_arn: &str) -> Self {
        Self {
            action_type: ActionType::Forward,
            target_group_arn: Some(target_group_arn.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub arn: String,
    pub load_balancer_arn: String,
    #[serde(default)]
    pub default_actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub arn: String,
    pub listener_arn: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// One forwarding point: a listener's default rule or a specific rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEndpoint {
    pub listener_id: String,
    pub rule_id: String,
    pub is_default_rule: bool,
    pub current_target_id: String,
}

// ── Rollback records ───────────────────────────────────────────────

/// A forwarding relationship that must be restored on rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteBinding {
    /// Router URL mapped to an application.
    Url { url: String },
    /// Listener rule forwarding to the recorded target group.
    Listener { endpoint: TrafficEndpoint },
}

/// Which naming convention governs the rename step of a rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NamingTransition {
    #[default]
    NonVersionedToNonVersioned,
    NonVersionedToVersioned,
    Rollback,
}

impl NamingTransition {
    /// Previously active/inactive versions get their canonical names back.
    pub fn renames_to_canonical(self) -> bool {
        matches!(self, Self::NonVersionedToNonVersioned | Self::NonVersionedToVersioned)
    }

    /// Release ordering is recomputed from the provider's release list.
    pub fn resets_releases(self) -> bool {
        matches!(self, Self::NonVersionedToVersioned | Self::Rollback)
    }

    /// Naming convention the reset pass restores.
    pub fn reset_to_versioned(self) -> bool {
        matches!(self, Self::Rollback)
    }
}

/// Deploy-time facts about one version of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDetails {
    pub name: String,
    pub id: String,
    /// Instance count before the deploy touched this version.
    pub initial_instance_count: u32,
    #[serde(default)]
    pub routes: Vec<RouteBinding>,
    /// Auto-scaling state captured before the deploy downsized this version.
    #[serde(default)]
    pub scaling: Option<ScalingSnapshot>,
    /// Whether the deploy reduced this version's instance count.
    #[serde(default)]
    pub downsized: bool,
    #[serde(default)]
    pub version_tag: Option<VersionTag>,
}

/// Phases of the route-restoring rollback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackPhase {
    Start,
    RoutesRestored,
    OldResized,
    CompletionChecked,
    Renamed,
    Skipped,
    Done,
}

/// Something the coordinator observed or did, appended as it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionFact {
    pub phase: RollbackPhase,
    pub detail: String,
}

/// Everything a rollback needs, recorded at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackContext {
    pub rollout_id: String,
    pub name_prefix: String,
    pub previous_active: Option<VersionDetails>,
    pub previous_inactive: Option<VersionDetails>,
    pub new_version: VersionDetails,
    #[serde(default)]
    pub routes_to_restore: Vec<RouteBinding>,
    #[serde(default)]
    pub naming: NamingTransition,
    #[serde(default)]
    pub facts: Vec<CompletionFact>,
}

impl RollbackContext {
    /// Instance counts each version must return to, keyed by version id.
    pub fn expected_instance_counts(&self) -> BTreeMap<String, u32> {
        let mut counts = BTreeMap::new();
        counts.insert(
            self.new_version.id.clone(),
            self.new_version.initial_instance_count,
        );
        if let Some(prev) = &self.previous_active {
            counts.insert(prev.id.clone(), prev.initial_instance_count);
        }
        counts
    }

    pub fn record(&mut self, phase: RollbackPhase, detail: impl Into<String>) {
        self.facts.push(CompletionFact {
            phase,
            detail: detail.into(),
        });
    }
}

// ── Rollout ledger ─────────────────────────────────────────────────

/// Where a recorded rollout currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Deployed,
    RolledBack,
    RollbackIncomplete,
    RollbackFailed,
}

/// A deploy as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub rollout_id: String,
    pub service_prefix: String,
    pub strategy: crate::strategy::RolloutStrategy,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    pub handle: ServiceHandle,
    pub rollback: RollbackContext,
    pub status: RecordStatus,
}

impl DeployRecord {
    /// Composite key: `{service_prefix}:{rollout_id}`.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service_prefix, self.rollout_id)
    }
}

// ── Kubernetes releases ────────────────────────────────────────────

/// Identity of a Kubernetes-style resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.name)
    }
}

/// A rendered manifest for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub id: ResourceId,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Succeeded,
    Failed,
    InProgress,
}

/// One revision of a Kubernetes release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    pub number: u32,
    pub status: ReleaseStatus,
    #[serde(default)]
    pub manifests: Vec<ResourceManifest>,
}

impl Release {
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        self.manifests.iter().map(|m| m.id.clone()).collect()
    }
}
