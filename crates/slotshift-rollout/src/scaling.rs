//! Scaling state migration.
//!
//! Captures a service's autoscaling targets and policies, detaches them, and
//! replays an equivalent snapshot onto another service. Every operation on
//! an empty snapshot is a no-op.

use slotshift_core::{
    ScalableTarget, ScalingPolicy, ScalingSnapshot, scaling::ECS_SERVICE_NAMESPACE,
    scaling_resource_id,
};
use tracing::{info, warn};

use crate::context::RolloutContext;
use crate::error::{RolloutError, RolloutResult};

pub struct ScalingMigrator<'a> {
    ctx: &'a RolloutContext,
}

impl<'a> ScalingMigrator<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx }
    }

    fn resource_id(&self, service_name: &str) -> String {
        scaling_resource_id(&self.ctx.settings.cluster, service_name)
    }

    pub async fn capture(&self, service_name: &str) -> RolloutResult<ScalingSnapshot> {
        Ok(self.capture_parts(service_name).await?.0)
    }

    /// The snapshot plus any policies that matched no scalable target.
    /// Those cannot be replayed and only show up for deletion.
    async fn capture_parts(
        &self,
        service_name: &str,
    ) -> RolloutResult<(ScalingSnapshot, Vec<ScalingPolicy>)> {
        let resource_id = self.resource_id(service_name);
        let autoscaling = &self.ctx.providers.autoscaling;
        let targets = autoscaling
            .describe_scalable_targets(ECS_SERVICE_NAMESPACE, &resource_id)
            .await
            .map_err(RolloutError::provider("describe scalable targets for", &resource_id))?;
        let policies = autoscaling
            .describe_scaling_policies(ECS_SERVICE_NAMESPACE, &resource_id)
            .await
            .map_err(RolloutError::provider("describe scaling policies for", &resource_id))?;

        let (snapshot, orphans) = ScalingSnapshot::from_parts(targets, policies);
        for orphan in &orphans {
            warn!(
                service = %service_name,
                policy = %orphan.policy_name,
                "policy has no matching scalable target"
            );
            self.ctx.log.warn(&format!(
                "Scaling policy {} of {service_name} has no matching scalable target \
                 and will not be replayed",
                orphan.policy_name
            ));
        }
        if snapshot.is_empty() {
            self.ctx
                .log
                .info(&format!("Didn't find scalable targets for service {service_name}"));
        } else {
            self.ctx.log.info(&format!(
                "Captured {} scalable targets and {} scaling policies of {service_name}",
                snapshot.entries.len(),
                snapshot.policy_count()
            ));
        }
        Ok((snapshot, orphans))
    }

    /// Capture, then delete every policy (orphans included) and deregister
    /// every target.
    ///
    /// Returns what can be replayed.
    pub async fn detach_and_delete(&self, service_name: &str) -> RolloutResult<ScalingSnapshot> {
        let (snapshot, orphans) = self.capture_parts(service_name).await?;
        if snapshot.is_empty() && orphans.is_empty() {
            return Ok(snapshot);
        }
        let autoscaling = &self.ctx.providers.autoscaling;

        let policies = snapshot.entries.iter().flat_map(|e| &e.policies);
        for policy in policies.chain(&orphans) {
            autoscaling
                .delete_scaling_policy(policy)
                .await
                .map_err(RolloutError::provider("delete scaling policy", &policy.policy_name))?;
        }
        for entry in &snapshot.entries {
            autoscaling
                .deregister_scalable_target(&entry.target)
                .await
                .map_err(RolloutError::provider(
                    "deregister scalable target",
                    &entry.target.resource_id,
                ))?;
        }

        info!(
            service = %service_name,
            targets = snapshot.entries.len(),
            orphans = orphans.len(),
            "scaling detached"
        );
        self.ctx
            .log
            .info(&format!("Detached autoscaling from {service_name}"));
        Ok(snapshot)
    }

    /// Replay `snapshot` onto `service_name`.
    pub async fn reattach(
        &self,
        service_name: &str,
        snapshot: &ScalingSnapshot,
    ) -> RolloutResult<()> {
        if snapshot.is_empty() {
            return Ok(());
        }
        let retargeted = snapshot.for_resource(&self.resource_id(service_name));
        for entry in &retargeted.entries {
            self.register(&entry.target).await?;
        }
        for policy in retargeted.entries.iter().flat_map(|e| &e.policies) {
            self.put(policy).await?;
        }
        info!(service = %service_name, targets = retargeted.entries.len(), "scaling reattached");
        self.ctx
            .log
            .info(&format!("Attached autoscaling to {service_name}"));
        Ok(())
    }

    /// Parse user-supplied target and policy manifests and apply them to
    /// `service_name`. Nothing is applied if any manifest is malformed.
    pub async fn register_manifests(
        &self,
        service_name: &str,
        target_manifests: &[String],
        policy_manifests: &[String],
    ) -> RolloutResult<()> {
        let targets = target_manifests
            .iter()
            .map(|m| ScalableTarget::from_yaml(m))
            .collect::<Result<Vec<_>, _>>()?;
        let policies = policy_manifests
            .iter()
            .map(|m| ScalingPolicy::from_yaml(m))
            .collect::<Result<Vec<_>, _>>()?;

        let resource_id = self.resource_id(service_name);
        for target in &targets {
            self.register(&target.with_resource_id(&resource_id)).await?;
        }
        for policy in &policies {
            self.put(&policy.with_resource_id(&resource_id)).await?;
        }
        if !targets.is_empty() || !policies.is_empty() {
            self.ctx.log.info(&format!(
                "Registered {} scalable targets and {} scaling policies for {service_name}",
                targets.len(),
                policies.len()
            ));
        }
        Ok(())
    }

    async fn register(&self, target: &ScalableTarget) -> RolloutResult<()> {
        self.ctx
            .providers
            .autoscaling
            .register_scalable_target(target)
            .await
            .map_err(RolloutError::provider("register scalable target", &target.resource_id))
    }

    async fn put(&self, policy: &ScalingPolicy) -> RolloutResult<()> {
        self.ctx
            .providers
            .autoscaling
            .put_scaling_policy(policy)
            .await
            .map_err(RolloutError::provider("put scaling policy", &policy.policy_name))
    }
}
