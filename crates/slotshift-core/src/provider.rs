//! Provider interfaces the rollout engine drives.
//!
//! Each trait is a thin view over one control-plane API. A provider instance
//! is already scoped to a cluster and region, so calls name resources only.
//! Abstracting at this level lets tests run against the in-memory simulator
//! instead of mocking vendor SDKs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::scaling::{ScalableTarget, ScalingPolicy};
use crate::types::{
    Action, Listener, LoadBalancer, Release, ResourceId, ResourceManifest, Rule,
    ServiceDefinition, ServiceDescriptor, ServiceUpdate, Tag,
};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Marker for the next page; `None` on the last one.
    pub next_marker: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_marker: None,
        }
    }
}

/// Container service API (ECS-like, or a PaaS application API).
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// `None` when no service with this name exists.
    async fn describe_service(&self, name: &str) -> ProviderResult<Option<ServiceDescriptor>>;

    async fn create_service(&self, definition: &ServiceDefinition)
    -> ProviderResult<ServiceDescriptor>;

    async fn update_service(&self, update: &ServiceUpdate) -> ProviderResult<ServiceDescriptor>;

    /// Starts deletion. The service drains before it turns inactive.
    async fn delete_service(&self, name: &str) -> ProviderResult<ServiceDescriptor>;

    /// Services whose name starts with `prefix`, including inactive ones.
    async fn list_services(&self, prefix: &str) -> ProviderResult<Vec<ServiceDescriptor>>;

    async fn list_tasks(&self, name: &str) -> ProviderResult<Vec<String>>;

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> ProviderResult<()>;

    async fn untag_resource(&self, resource_id: &str, keys: &[String]) -> ProviderResult<()>;

    async fn rename_service(&self, id: &str, new_name: &str) -> ProviderResult<()>;

    async fn map_routes(&self, name: &str, routes: &[String]) -> ProviderResult<()>;

    async fn unmap_routes(&self, name: &str, routes: &[String]) -> ProviderResult<()>;
}

/// Application/network load balancer API.
#[async_trait]
pub trait LoadBalancerProvider: Send + Sync {
    async fn describe_load_balancer(&self, name: &str) -> ProviderResult<Option<LoadBalancer>>;

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
        marker: Option<String>,
    ) -> ProviderResult<Page<Listener>>;

    async fn describe_rules(
        &self,
        listener_arn: &str,
        marker: Option<String>,
    ) -> ProviderResult<Page<Rule>>;

    async fn modify_listener(
        &self,
        listener_arn: &str,
        default_actions: Vec<Action>,
    ) -> ProviderResult<()>;

    async fn modify_rule(&self, rule_arn: &str, actions: Vec<Action>) -> ProviderResult<()>;
}

/// Application autoscaling API.
#[async_trait]
pub trait AutoscalingProvider: Send + Sync {
    async fn describe_scalable_targets(
        &self,
        namespace: &str,
        resource_id: &str,
    ) -> ProviderResult<Vec<ScalableTarget>>;

    async fn describe_scaling_policies(
        &self,
        namespace: &str,
        resource_id: &str,
    ) -> ProviderResult<Vec<ScalingPolicy>>;

    async fn register_scalable_target(&self, target: &ScalableTarget) -> ProviderResult<()>;

    async fn put_scaling_policy(&self, policy: &ScalingPolicy) -> ProviderResult<()>;

    async fn deregister_scalable_target(&self, target: &ScalableTarget) -> ProviderResult<()>;

    async fn delete_scaling_policy(&self, policy: &ScalingPolicy) -> ProviderResult<()>;
}

/// Kubernetes-style manifest API with release history.
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Releases of `release_name`, oldest first.
    async fn release_history(&self, release_name: &str) -> ProviderResult<Vec<Release>>;

    async fn apply(&self, manifests: &[ResourceManifest]) -> ProviderResult<()>;

    async fn delete(&self, resources: &[ResourceId]) -> ProviderResult<()>;
}

/// Turns an opaque connector reference into client configuration files.
#[async_trait]
pub trait CredentialStager: Send + Sync {
    /// Write whatever the provider client needs into `dir`.
    async fn stage(&self, dir: &Path) -> ProviderResult<Vec<PathBuf>>;
}
