//! Application autoscaling side of the simulator.

use async_trait::async_trait;
use slotshift_core::{
    AutoscalingProvider, ProviderError, ProviderResult, ScalableTarget, ScalingPolicy,
};

use crate::cloud::SimCloud;

fn same_target(a: &ScalableTarget, b: &ScalableTarget) -> bool {
    a.service_namespace == b.service_namespace
        && a.resource_id == b.resource_id
        && a.scalable_dimension == b.scalable_dimension
}

#[async_trait]
impl AutoscalingProvider for SimCloud {
    async fn describe_scalable_targets(
        &self,
        namespace: &str,
        resource_id: &str,
    ) -> ProviderResult<Vec<ScalableTarget>> {
        self.with(|inner| {
            inner.enter("describe_scalable_targets", resource_id)?;
            Ok(inner
                .world
                .scalable_targets
                .iter()
                .filter(|t| t.service_namespace == namespace && t.resource_id == resource_id)
                .cloned()
                .collect())
        })
    }

    async fn describe_scaling_policies(
        &self,
        namespace: &str,
        resource_id: &str,
    ) -> ProviderResult<Vec<ScalingPolicy>> {
        self.with(|inner| {
            inner.enter("describe_scaling_policies", resource_id)?;
            Ok(inner
                .world
                .scaling_policies
                .iter()
                .filter(|p| p.service_namespace == namespace && p.resource_id == resource_id)
                .cloned()
                .collect())
        })
    }

    async fn register_scalable_target(&self, target: &ScalableTarget) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("register_scalable_target", &target.resource_id)?;
            if target.min_capacity > target.max_capacity {
                return Err(ProviderError::Rejected(format!(
                    "minCapacity {} exceeds maxCapacity {}",
                    target.min_capacity, target.max_capacity
                )));
            }
            let targets = &mut inner.world.scalable_targets;
            targets.retain(|t| !same_target(t, target));
            targets.push(target.clone());
            Ok(())
        })
    }

    async fn put_scaling_policy(&self, policy: &ScalingPolicy) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("put_scaling_policy", &policy.resource_id)?;
            let world = &mut inner.world;
            let registered = world.scalable_targets.iter().any(|t| {
                t.resource_id == policy.resource_id
                    && t.scalable_dimension == policy.scalable_dimension
            });
            if !registered {
                return Err(ProviderError::Rejected(format!(
                    "no scalable target registered for {}",
                    policy.resource_id
                )));
            }
            world.scaling_policies.retain(|p| {
                !(p.policy_name == policy.policy_name && p.resource_id == policy.resource_id)
            });
            world.scaling_policies.push(policy.clone());
            Ok(())
        })
    }

    async fn deregister_scalable_target(&self, target: &ScalableTarget) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("deregister_scalable_target", &target.resource_id)?;
            let world = &mut inner.world;
            let before = world.scalable_targets.len();
            world.scalable_targets.retain(|t| !same_target(t, target));
            if world.scalable_targets.len() == before {
                return Err(ProviderError::NotFound(format!(
                    "scalable target {}",
                    target.resource_id
                )));
            }
            world.scaling_policies.retain(|p| {
                !(p.resource_id == target.resource_id
                    && p.scalable_dimension == target.scalable_dimension)
            });
            Ok(())
        })
    }

    async fn delete_scaling_policy(&self, policy: &ScalingPolicy) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("delete_scaling_policy", &policy.resource_id)?;
            let policies = &mut inner.world.scaling_policies;
            let before = policies.len();
            policies.retain(|p| {
                !(p.policy_name == policy.policy_name && p.resource_id == policy.resource_id)
            });
            if policies.len() == before {
                return Err(ProviderError::NotFound(format!(
                    "scaling policy {}",
                    policy.policy_name
                )));
            }
            Ok(())
        })
    }
}
