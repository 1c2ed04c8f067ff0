//! Deployment executor.
//!
//! Creates or updates the target service and orchestrates scaling migration
//! and steady-state confirmation around it. Nothing here rolls back on
//! failure; errors propagate with the failing action named.

use std::time::Duration;

use slotshift_core::{
    BG_VERSION_TAG, RollingConfig, ServiceDefinition, ServiceDescriptor, ServiceHandle,
    ServiceUpdate, Tag, VersionTag, render_placeholder,
};
use tracing::info;

use crate::context::RolloutContext;
use crate::error::{RolloutError, RolloutResult};
use crate::scaling::ScalingMigrator;
use crate::steady::{EventCursor, SteadyStateWaiter};

/// User-supplied autoscaling manifests (YAML).
#[derive(Debug, Clone, Default)]
pub struct ScalingManifests {
    pub targets: Vec<String>,
    pub policies: Vec<String>,
}

impl ScalingManifests {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.policies.is_empty()
    }
}

/// A service that was created but not yet confirmed steady.
#[derive(Debug, Clone)]
pub struct LaunchedService {
    pub descriptor: ServiceDescriptor,
    pub cursor: EventCursor,
}

/// The definition a canary is created from: renamed and resized.
pub fn canary_definition(
    definition: ServiceDefinition,
    suffix: &str,
    instances: Option<u32>,
) -> ServiceDefinition {
    ServiceDefinition {
        service_name: format!("{}{suffix}", definition.service_name),
        desired_count: instances.or(definition.desired_count),
        ..definition
    }
}

/// Render the target group placeholder and parse a service manifest.
pub fn render_definition(
    manifest: &str,
    placeholder: &str,
    target_group: Option<&str>,
) -> RolloutResult<ServiceDefinition> {
    let rendered = match target_group {
        Some(tg) => render_placeholder(manifest, placeholder, tg),
        None => manifest.to_string(),
    };
    Ok(ServiceDefinition::from_yaml(&rendered)?)
}

pub struct DeploymentExecutor<'a> {
    ctx: &'a RolloutContext,
}

impl<'a> DeploymentExecutor<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx }
    }

    fn handle(&self, service: &ServiceDescriptor) -> ServiceHandle {
        ServiceHandle {
            name: service.name.clone(),
            id: service.id.clone(),
            region: self.ctx.settings.region.clone(),
        }
    }

    async fn describe(&self, name: &str) -> RolloutResult<Option<ServiceDescriptor>> {
        self.ctx
            .providers
            .compute
            .describe_service(name)
            .await
            .map_err(RolloutError::provider("describe service", name))
    }

    /// Create the service if absent, otherwise update it in place.
    pub async fn create_or_update(
        &self,
        definition: &ServiceDefinition,
        scaling: &ScalingManifests,
        timeout: Duration,
        flags: &RollingConfig,
    ) -> RolloutResult<ServiceHandle> {
        let name = definition.service_name.as_str();
        let migrator = ScalingMigrator::new(self.ctx);
        let waiter = SteadyStateWaiter::new(self.ctx);

        let existing = self.describe(name).await?.filter(|s| s.is_active());
        let Some(existing) = existing else {
            let launched = self.launch(definition).await?;
            return self.settle(launched, scaling, timeout).await;
        };

        let captured = migrator.detach_and_delete(name).await?;

        let mut update = ServiceUpdate::from_definition(definition, flags.force_new_deployment);
        if flags.same_as_running_count {
            update.desired_count = None;
        }
        self.ctx.log.info(&format!(
            "Updating service {name} with task definition {} and desired count {}",
            update.task_definition.as_deref().unwrap_or("(unchanged)"),
            update.desired_count.unwrap_or(existing.desired_count)
        ));
        let updated = self
            .ctx
            .providers
            .compute
            .update_service(&update)
            .await
            .map_err(RolloutError::provider("update service", name))?;

        let mut cursor = EventCursor::seeded(&updated.events);
        waiter.await_steady_state(name, timeout, &mut cursor).await?;

        if scaling.is_empty() {
            migrator.reattach(name, &captured).await?;
        } else {
            migrator
                .register_manifests(name, &scaling.targets, &scaling.policies)
                .await?;
        }

        info!(service = %name, "service updated");
        self.ctx.log.info(&format!("Updated service {name}"));
        Ok(self.handle(&updated))
    }

    /// Issue the create call. The returned cursor is seeded with the events
    /// in the create response.
    pub async fn launch(&self, definition: &ServiceDefinition) -> RolloutResult<LaunchedService> {
        let name = definition.service_name.as_str();
        self.ctx.log.info(&format!(
            "Creating service {name} with task definition {} and desired count {}",
            definition.task_definition.as_deref().unwrap_or("(none)"),
            definition.desired_count.unwrap_or(1)
        ));
        let descriptor = self
            .ctx
            .providers
            .compute
            .create_service(definition)
            .await
            .map_err(RolloutError::provider("create service", name))?;
        info!(service = %name, id = %descriptor.id, "service created");
        let cursor = EventCursor::seeded(&descriptor.events);
        Ok(LaunchedService { descriptor, cursor })
    }

    /// Wait for a launched service to settle, then register its scaling.
    pub async fn settle(
        &self,
        launched: LaunchedService,
        scaling: &ScalingManifests,
        timeout: Duration,
    ) -> RolloutResult<ServiceHandle> {
        let LaunchedService {
            descriptor,
            mut cursor,
        } = launched;
        SteadyStateWaiter::new(self.ctx)
            .await_steady_state(&descriptor.name, timeout, &mut cursor)
            .await?;
        self.ctx.log.info(&format!(
            "Created service {} with id {}",
            descriptor.name, descriptor.id
        ));
        ScalingMigrator::new(self.ctx)
            .register_manifests(&descriptor.name, &scaling.targets, &scaling.policies)
            .await?;
        Ok(self.handle(&descriptor))
    }

    /// Delete a stale active service with this name, if any, and create the
    /// replacement tagged GREEN.
    pub async fn launch_replacing(
        &self,
        definition: ServiceDefinition,
        timeout: Duration,
    ) -> RolloutResult<LaunchedService> {
        let name = definition.service_name.clone();
        if let Some(stale) = self.describe(&name).await?.filter(|s| s.is_active()) {
            self.ctx
                .log
                .info(&format!("Deleting existing service with name {}", stale.name));
            self.delete_services(std::slice::from_ref(&name), timeout)
                .await?;
            self.ctx
                .log
                .info(&format!("Deleted existing service with name {}", stale.name));
        }
        let definition = definition.with_tag(BG_VERSION_TAG, VersionTag::Green.as_str());
        self.launch(&definition).await
    }

    /// Stage a blue/green candidate under `stage_name`.
    pub async fn create_stage(
        &self,
        definition: ServiceDefinition,
        stage_name: &str,
        scaling: &ScalingManifests,
        timeout: Duration,
    ) -> RolloutResult<ServiceHandle> {
        let definition = ServiceDefinition {
            service_name: stage_name.to_string(),
            ..definition
        };
        let launched = self.launch_replacing(definition, timeout).await?;
        self.settle(launched, scaling, timeout).await
    }

    /// Create `{serviceName}{suffix}` next to the live service.
    pub async fn create_canary(
        &self,
        definition: ServiceDefinition,
        suffix: &str,
        instances: Option<u32>,
        scaling: &ScalingManifests,
        timeout: Duration,
    ) -> RolloutResult<ServiceHandle> {
        let definition = canary_definition(definition, suffix, instances);
        let launched = self.launch_replacing(definition, timeout).await?;
        self.settle(launched, scaling, timeout).await
    }

    pub async fn update_desired_count(
        &self,
        name: &str,
        count: u32,
    ) -> RolloutResult<ServiceDescriptor> {
        let Some(service) = self.describe(name).await? else {
            return Err(RolloutError::ServiceNotFound {
                name: name.to_string(),
            });
        };
        if !service.is_active() {
            return Err(RolloutError::ServiceNotActive {
                name: name.to_string(),
                action: format!("set desired count to {count}"),
            });
        }
        self.ctx.log.info(&format!(
            "Updating desired count of {name} from {} to {count}",
            service.desired_count
        ));
        self.ctx
            .providers
            .compute
            .update_service(&ServiceUpdate::resize(name, count))
            .await
            .map_err(RolloutError::provider("update desired count of", name))
    }

    /// Replace the blue/green tag. Returns false when the service is not active.
    pub async fn update_tag(&self, name: &str, tag: VersionTag) -> RolloutResult<bool> {
        self.set_tag(name, Some(tag)).await
    }

    /// Drop the blue/green marker, leaving the service untagged.
    pub async fn clear_tag(&self, name: &str) -> RolloutResult<bool> {
        self.set_tag(name, None).await
    }

    async fn set_tag(&self, name: &str, tag: Option<VersionTag>) -> RolloutResult<bool> {
        let Some(service) = self.describe(name).await?.filter(|s| s.is_active()) else {
            self.ctx.log.warn(&format!(
                "Service {name} is not active; leaving its {BG_VERSION_TAG} tag unchanged"
            ));
            return Ok(false);
        };
        let compute = &self.ctx.providers.compute;
        compute
            .untag_resource(&service.id, &[BG_VERSION_TAG.to_string()])
            .await
            .map_err(RolloutError::provider("untag", name))?;
        let Some(tag) = tag else {
            self.ctx
                .log
                .info(&format!("Removed {BG_VERSION_TAG} tag from service {name}"));
            return Ok(true);
        };
        compute
            .tag_resource(&service.id, &[Tag::new(BG_VERSION_TAG, tag.as_str())])
            .await
            .map_err(RolloutError::provider("tag", name))?;
        self.ctx
            .log
            .info(&format!("Tagged service {name} with {BG_VERSION_TAG}={tag}"));
        Ok(true)
    }

    /// Delete each active service and wait for it to turn inactive.
    pub async fn delete_services(&self, names: &[String], timeout: Duration) -> RolloutResult<()> {
        let waiter = SteadyStateWaiter::new(self.ctx);
        for name in names {
            let active = self.describe(name).await?.is_some_and(|s| s.is_active());
            if !active {
                continue;
            }
            self.ctx
                .providers
                .compute
                .delete_service(name)
                .await
                .map_err(RolloutError::provider("delete service", name))?;
            waiter.await_inactive(name, timeout).await?;
            info!(service = %name, "service deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use slotshift_core::{LogLevel, ServiceStatus, TARGET_GROUP_PLACEHOLDER};
    use slotshift_sim::fixtures::service;
    use slotshift_sim::{Convergence, World};

    const MANIFEST: &str = r#"
serviceName: app
taskDefinition: app:2
desiredCount: 3
loadBalancers:
  - targetGroupArn: <+targetGroupArn>
    containerName: web
    containerPort: 8080
"#;
    const TARGET: &str = "minCapacity: 1\nmaxCapacity: 4\n";

    fn timeout() -> Duration {
        Duration::from_secs(300)
    }

    #[tokio::test(start_paused = true)]
    async fn creates_missing_service_and_registers_scaling() {
        let (ctx, sim, _) = testing::context(World::new("prod", "us-east-1"));
        let def = render_definition(MANIFEST, TARGET_GROUP_PLACEHOLDER, Some("tg-1")).unwrap();
        let scaling = ScalingManifests {
            targets: vec![TARGET.to_string()],
            policies: vec![],
        };
        let handle = DeploymentExecutor::new(&ctx)
            .create_or_update(&def, &scaling, timeout(), &RollingConfig::default())
            .await
            .unwrap();

        assert_eq!(handle.name, "app");
        assert_eq!(handle.region, "us-east-1");
        let world = sim.world();
        assert_eq!(world.scalable_targets[0].resource_id, "service/prod/app");
        assert_eq!(sim.calls_to("create_service").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn update_preserves_scaling_and_running_count() {
        let mut world = World::new("prod", "us-east-1");
        world.services.push(service("app", "arn:app", 5, None));
        let (ctx, sim, _) = testing::context(world);
        let exec = DeploymentExecutor::new(&ctx);
        ScalingMigrator::new(&ctx)
            .register_manifests("app", &[TARGET.to_string()], &[])
            .await
            .unwrap();

        let def = render_definition(MANIFEST, TARGET_GROUP_PLACEHOLDER, None).unwrap();
        let flags = RollingConfig {
            same_as_running_count: true,
            force_new_deployment: true,
        };
        exec.create_or_update(&def, &ScalingManifests::default(), timeout(), &flags)
            .await
            .unwrap();

        let svc = sim.service("app").unwrap();
        assert_eq!(svc.desired_count, 5);
        assert_eq!(svc.task_definition.as_deref(), Some("app:2"));
        assert_eq!(sim.calls_to("deregister_scalable_target").len(), 1);
        assert_eq!(sim.world().scalable_targets.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_manifests_win_over_captured_snapshot() {
        let mut world = World::new("prod", "us-east-1");
        world.services.push(service("app", "arn:app", 2, None));
        let (ctx, sim, _) = testing::context(world);
        ScalingMigrator::new(&ctx)
            .register_manifests("app", &["minCapacity: 1\nmaxCapacity: 2\n".to_string()], &[])
            .await
            .unwrap();

        let def = render_definition(MANIFEST, TARGET_GROUP_PLACEHOLDER, None).unwrap();
        let scaling = ScalingManifests {
            targets: vec!["minCapacity: 3\nmaxCapacity: 9\n".to_string()],
            policies: vec![],
        };
        DeploymentExecutor::new(&ctx)
            .create_or_update(&def, &scaling, timeout(), &RollingConfig::default())
            .await
            .unwrap();
        let targets = sim.world().scalable_targets;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].max_capacity, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn stage_replaces_stale_service_and_tags_green() {
        let mut world = World::new("prod", "us-east-1");
        world
            .services
            .push(service("app__2", "arn:stale", 1, Some(VersionTag::Green)));
        let (ctx, sim, _) = testing::context(world);

        let def = render_definition(MANIFEST, TARGET_GROUP_PLACEHOLDER, Some("tg-stage")).unwrap();
        let handle = DeploymentExecutor::new(&ctx)
            .create_stage(def, "app__2", &ScalingManifests::default(), timeout())
            .await
            .unwrap();

        assert_eq!(handle.name, "app__2");
        assert_ne!(handle.id, "arn:stale");
        let svc = sim.service("app__2").unwrap();
        assert_eq!(svc.version_tag(), Some(VersionTag::Green));
        assert_eq!(sim.calls_to("delete_service").len(), 1);
        let stale = sim
            .world()
            .services
            .into_iter()
            .find(|s| s.id == "arn:stale")
            .unwrap();
        assert_eq!(stale.status, ServiceStatus::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn canary_uses_suffix_and_instance_override() {
        let (ctx, sim, _) = testing::context(World::new("prod", "us-east-1"));
        let def = render_definition(MANIFEST, TARGET_GROUP_PLACEHOLDER, Some("tg-c")).unwrap();
        let handle = DeploymentExecutor::new(&ctx)
            .create_canary(def, "Canary", Some(1), &ScalingManifests::default(), timeout())
            .await
            .unwrap();
        assert_eq!(handle.name, "appCanary");
        assert_eq!(sim.service("appCanary").unwrap().desired_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_create_propagates_timeout() {
        let (ctx, sim, _) = testing::context(World::new("prod", "us-east-1"));
        sim.set_convergence("app", Convergence::Stuck);
        let def = render_definition(MANIFEST, TARGET_GROUP_PLACEHOLDER, None).unwrap();
        let err = DeploymentExecutor::new(&ctx)
            .create_or_update(
                &def,
                &ScalingManifests::default(),
                Duration::from_secs(30),
                &RollingConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::SteadyStateTimeout { .. }));
        // Created service is left in place.
        assert!(sim.service("app").is_some());
    }

    #[tokio::test]
    async fn desired_count_requires_active_service() {
        let mut world = World::new("prod", "us-east-1");
        let mut draining = service("app__1", "arn:1", 0, None);
        draining.status = ServiceStatus::Draining;
        world.services.push(draining);
        world.services.push(service("app__2", "arn:2", 2, None));
        let (ctx, _, _) = testing::context(world);
        let exec = DeploymentExecutor::new(&ctx);

        let err = exec.update_desired_count("app__1", 3).await.unwrap_err();
        assert!(matches!(err, RolloutError::ServiceNotActive { .. }));
        let err = exec.update_desired_count("nope", 3).await.unwrap_err();
        assert!(matches!(err, RolloutError::ServiceNotFound { .. }));
        let svc = exec.update_desired_count("app__2", 0).await.unwrap();
        assert_eq!(svc.desired_count, 0);
    }

    #[tokio::test]
    async fn update_tag_untags_then_tags() {
        let mut world = World::new("prod", "us-east-1");
        world
            .services
            .push(service("app__1", "arn:1", 2, Some(VersionTag::Green)));
        let (ctx, sim, log) = testing::context(world);
        let exec = DeploymentExecutor::new(&ctx);

        assert!(exec.update_tag("app__1", VersionTag::Blue).await.unwrap());
        let ops: Vec<_> = sim
            .calls()
            .into_iter()
            .map(|c| c.op)
            .filter(|op| op.ends_with("tag_resource"))
            .collect();
        assert_eq!(ops, vec!["untag_resource", "tag_resource"]);
        assert_eq!(
            sim.service("app__1").unwrap().version_tag(),
            Some(VersionTag::Blue)
        );

        assert!(!exec.update_tag("missing", VersionTag::Blue).await.unwrap());
        assert!(log.contains(LogLevel::Warn, "not active"));
    }

    #[tokio::test]
    async fn clear_tag_leaves_service_untagged() {
        let mut world = World::new("prod", "us-east-1");
        world
            .services
            .push(service("app__1", "arn:1", 2, Some(VersionTag::Green)));
        let (ctx, sim, log) = testing::context(world);
        let exec = DeploymentExecutor::new(&ctx);

        assert!(exec.clear_tag("app__1").await.unwrap());
        assert_eq!(sim.service("app__1").unwrap().version_tag(), None);
        assert!(sim.calls_to("tag_resource").is_empty());
        assert!(log.contains(LogLevel::Info, "Removed"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_services_skips_inactive_and_waits() {
        let mut world = World::new("prod", "us-east-1");
        world.services.push(service("app__1", "arn:1", 2, None));
        let (ctx, sim, _) = testing::context(world);
        let exec = DeploymentExecutor::new(&ctx);
        let names = vec!["app__1".to_string(), "missing".to_string()];

        exec.delete_services(&names, timeout()).await.unwrap();
        assert_eq!(
            sim.service("app__1").unwrap().status,
            ServiceStatus::Inactive
        );
        assert_eq!(sim.calls_to("delete_service").len(), 1);

        exec.delete_services(&names, timeout()).await.unwrap();
        assert_eq!(sim.calls_to("delete_service").len(), 1);
    }
}
