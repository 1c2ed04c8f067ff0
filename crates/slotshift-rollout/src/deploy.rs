//! Deployer: drives one rollout end to end.
//!
//! Matches on the configured strategy once and walks the executor path for
//! it. Blue/green is the full flow:
//!
//! ```text
//! resolve endpoints ─▶ resolve slots ─▶ launch stage ─▶ record
//!        ─▶ settle ─▶ swap target groups ─▶ flip tags ─▶ downsize old
//! ```
//!
//! The record is written as soon as the new service exists, so a deploy that
//! fails afterwards still leaves a rollback context carrying its id.

use std::time::Duration;

use slotshift_core::{
    BlueGreenConfig, CanaryConfig, DeployRecord, LoadBalancerConfig, RecordStatus, RollbackContext,
    RollingConfig, RolloutStrategy, RouteBinding, ServiceDefinition, ServiceDescriptor,
    ServiceHandle, VersionDetails, VersionTag,
};
use slotshift_state::RolloutLedger;
use tracing::{info, warn};

use crate::context::{RolloutContext, epoch_secs};
use crate::error::{RolloutError, RolloutResult};
use crate::executor::{
    DeploymentExecutor, LaunchedService, ScalingManifests, canary_definition, render_definition,
};
use crate::scaling::ScalingMigrator;
use crate::slots::SlotResolver;
use crate::steady::{EventCursor, SteadyStateWaiter};
use crate::traffic::TrafficRouter;

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub rollout_id: String,
    /// Raw service manifest (YAML), possibly containing the target group placeholder.
    pub manifest: String,
    pub scaling: ScalingManifests,
}

#[derive(Debug, Clone)]
pub struct DeployReport {
    pub handle: ServiceHandle,
    pub record: DeployRecord,
}

/// Deploy-time facts about a live service.
pub fn version_details(service: &ServiceDescriptor) -> VersionDetails {
    VersionDetails {
        name: service.name.clone(),
        id: service.id.clone(),
        initial_instance_count: service.desired_count,
        routes: service
            .routes
            .iter()
            .map(|url| RouteBinding::Url { url: url.clone() })
            .collect(),
        scaling: None,
        downsized: false,
        version_tag: service.version_tag(),
    }
}

fn fresh_version(launched: &LaunchedService) -> VersionDetails {
    VersionDetails {
        name: launched.descriptor.name.clone(),
        id: launched.descriptor.id.clone(),
        initial_instance_count: 0,
        routes: Vec::new(),
        scaling: None,
        downsized: false,
        version_tag: launched.descriptor.version_tag(),
    }
}

pub struct Deployer<'a> {
    ctx: &'a RolloutContext,
    ledger: Option<&'a RolloutLedger>,
}

impl<'a> Deployer<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx, ledger: None }
    }

    pub fn with_ledger(mut self, ledger: &'a RolloutLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn deploy(&self, request: &DeployRequest) -> RolloutResult<DeployReport> {
        let strategy = self.ctx.settings.strategy.clone();
        info!(rollout = %request.rollout_id, strategy = strategy.name(), "deploy started");
        let report = match &strategy {
            RolloutStrategy::Rolling(flags) => self.rolling(request, flags).await?,
            RolloutStrategy::Canary(config) => self.canary(request, config).await?,
            RolloutStrategy::BlueGreen(config) => self.blue_green(request, config).await?,
        };
        info!(
            rollout = %request.rollout_id,
            service = %report.handle.name,
            id = %report.handle.id,
            "deploy finished"
        );
        Ok(report)
    }

    fn persist(&self, record: &DeployRecord) -> RolloutResult<()> {
        if let Some(ledger) = self.ledger {
            ledger.put_record(record)?;
        }
        Ok(())
    }

    fn record(
        &self,
        request: &DeployRequest,
        prefix: &str,
        handle: ServiceHandle,
        rollback: RollbackContext,
    ) -> DeployRecord {
        DeployRecord {
            rollout_id: request.rollout_id.clone(),
            service_prefix: prefix.to_string(),
            strategy: self.ctx.settings.strategy.clone(),
            created_at: epoch_secs(),
            handle,
            rollback,
            status: RecordStatus::Deployed,
        }
    }

    fn handle(&self, service: &ServiceDescriptor) -> ServiceHandle {
        ServiceHandle {
            name: service.name.clone(),
            id: service.id.clone(),
            region: self.ctx.settings.region.clone(),
        }
    }

    fn rollback_context(
        &self,
        request: &DeployRequest,
        prefix: &str,
        previous_active: Option<VersionDetails>,
        new_version: VersionDetails,
        routes_to_restore: Vec<RouteBinding>,
    ) -> RollbackContext {
        RollbackContext {
            rollout_id: request.rollout_id.clone(),
            name_prefix: prefix.to_string(),
            previous_active,
            previous_inactive: None,
            new_version,
            routes_to_restore,
            naming: self.ctx.settings.naming,
            facts: Vec::new(),
        }
    }

    async fn describe_live(&self, name: &str) -> RolloutResult<Option<ServiceDescriptor>> {
        Ok(self
            .ctx
            .providers
            .compute
            .describe_service(name)
            .await
            .map_err(RolloutError::provider("describe service", name))?
            .filter(|s| s.is_active()))
    }

    /// Stage target group: the configured override, else whatever the stage
    /// rule forwards to now.
    async fn stage_target_group(&self, config: &LoadBalancerConfig) -> RolloutResult<String> {
        if let Some(tg) = &config.stage_target_group {
            return Ok(tg.clone());
        }
        let stage = TrafficRouter::new(self.ctx)
            .resolve_current_target(&config.name, &config.stage_listener, &config.stage_rule)
            .await?;
        Ok(stage.current_target_id)
    }

    async fn rolling(
        &self,
        request: &DeployRequest,
        flags: &RollingConfig,
    ) -> RolloutResult<DeployReport> {
        let definition = render_definition(&request.manifest, "", None)?;
        let name = definition.service_name.clone();
        let exec = DeploymentExecutor::new(self.ctx);
        let timeout = self.ctx.settings.steady_state_timeout;

        let Some(live) = self.describe_live(&name).await? else {
            let launched = exec.launch(&definition).await?;
            let rollback =
                self.rollback_context(request, &name, None, fresh_version(&launched), Vec::new());
            let record = self.record(request, &name, self.handle(&launched.descriptor), rollback);
            self.persist(&record)?;
            let handle = exec.settle(launched, &request.scaling, timeout).await?;
            return Ok(DeployReport { handle, record });
        };

        // The update detaches scaling before it touches the service, so the
        // record and snapshot must exist first.
        let snapshot = ScalingMigrator::new(self.ctx).capture(&name).await?;
        if let Some(ledger) = self.ledger
            && !snapshot.is_empty()
        {
            ledger.put_snapshot(&request.rollout_id, &name, &snapshot)?;
        }
        let mut previous = version_details(&live);
        previous.scaling = Some(snapshot);
        let new_version = VersionDetails {
            routes: Vec::new(),
            scaling: None,
            version_tag: None,
            ..previous.clone()
        };
        let rollback =
            self.rollback_context(request, &name, Some(previous), new_version, Vec::new());
        let record = self.record(request, &name, self.handle(&live), rollback);
        self.persist(&record)?;

        let handle = exec
            .create_or_update(&definition, &request.scaling, timeout, flags)
            .await?;
        Ok(DeployReport { handle, record })
    }

    async fn canary(
        &self,
        request: &DeployRequest,
        config: &CanaryConfig,
    ) -> RolloutResult<DeployReport> {
        let (placeholder, target_group) = match &self.ctx.settings.load_balancer {
            Some(lb) => (
                lb.target_group_placeholder.clone(),
                Some(self.stage_target_group(lb).await?),
            ),
            None => (String::new(), None),
        };
        let definition =
            render_definition(&request.manifest, &placeholder, target_group.as_deref())?;
        let prefix = definition.service_name.clone();
        let previous = self.describe_live(&prefix).await?.map(|s| version_details(&s));

        let definition = canary_definition(definition, &config.suffix, config.instances);
        let exec = DeploymentExecutor::new(self.ctx);
        let timeout = self.ctx.settings.steady_state_timeout;
        let launched = exec.launch_replacing(definition, timeout).await?;

        let rollback =
            self.rollback_context(request, &prefix, previous, fresh_version(&launched), Vec::new());
        let record = self.record(request, &prefix, self.handle(&launched.descriptor), rollback);
        self.persist(&record)?;

        let handle = exec.settle(launched, &request.scaling, timeout).await?;
        self.ctx
            .log
            .info(&format!("Canary {} is running", handle.name));
        Ok(DeployReport { handle, record })
    }

    async fn blue_green(
        &self,
        request: &DeployRequest,
        config: &BlueGreenConfig,
    ) -> RolloutResult<DeployReport> {
        let lb = self.ctx.settings.load_balancer.as_ref().ok_or_else(|| {
            RolloutError::Misconfigured(
                "blue/green deploys need a [load_balancer] section".to_string(),
            )
        })?;
        let timeout = self.ctx.settings.steady_state_timeout;
        let router = TrafficRouter::new(self.ctx);
        let exec = DeploymentExecutor::new(self.ctx);

        let prod = router
            .resolve_current_target(&lb.name, &lb.prod_listener, &lb.prod_rule)
            .await?;
        let stage = router
            .resolve_current_target(&lb.name, &lb.stage_listener, &lb.stage_rule)
            .await?;
        let stage_tg = lb
            .stage_target_group
            .clone()
            .unwrap_or_else(|| stage.current_target_id.clone());

        let definition = render_definition(
            &request.manifest,
            &lb.target_group_placeholder,
            Some(&stage_tg),
        )?;
        let prefix = format!(
            "{}{}",
            definition.service_name, self.ctx.settings.delimiter
        );
        let slots = SlotResolver::new(self.ctx).resolve(&prefix).await?;
        let stage_name = slots.inactive.resolved_name.clone();
        self.ctx.log.info(&format!(
            "Deploying {} into inactive slot {stage_name} (target group {stage_tg})",
            definition.service_name
        ));
        let previous = slots.active_service.as_ref().map(version_details);

        let mut routes_to_restore = vec![RouteBinding::Listener {
            endpoint: prod,
        }];
        if config.swap_stage_listener {
            routes_to_restore.push(RouteBinding::Listener { endpoint: stage });
        }

        let definition = ServiceDefinition {
            service_name: stage_name.clone(),
            ..definition
        };
        let launched = exec.launch_replacing(definition, timeout).await?;
        let rollback = self.rollback_context(
            request,
            &prefix,
            previous,
            fresh_version(&launched),
            routes_to_restore,
        );
        let mut record = self.record(request, &prefix, self.handle(&launched.descriptor), rollback);
        self.persist(&record)?;

        let handle = exec.settle(launched, &request.scaling, timeout).await?;
        router.swap_target_groups(lb, config.swap_stage_listener).await?;

        exec.update_tag(&stage_name, VersionTag::Blue).await?;
        let Some(old) = slots.active_service else {
            self.ctx.log.info(&format!(
                "No previously active slot for {prefix}; nothing to downsize"
            ));
            return Ok(DeployReport { handle, record });
        };
        exec.update_tag(&old.name, VersionTag::Green).await?;

        if config.downsize_old {
            self.downsize(&old, &mut record, timeout).await?;
        }
        Ok(DeployReport { handle, record })
    }

    /// Detach the old slot's scaling, record it, and scale the slot to zero.
    async fn downsize(
        &self,
        old: &ServiceDescriptor,
        record: &mut DeployRecord,
        timeout: Duration,
    ) -> RolloutResult<()> {
        let snapshot = ScalingMigrator::new(self.ctx)
            .detach_and_delete(&old.name)
            .await?;
        if let Some(ledger) = self.ledger {
            ledger.put_snapshot(&record.rollout_id, &old.name, &snapshot)?;
        }
        if let Some(prev) = record.rollback.previous_active.as_mut() {
            prev.scaling = Some(snapshot);
            prev.downsized = true;
        }
        self.persist(record)?;

        let updated = DeploymentExecutor::new(self.ctx)
            .update_desired_count(&old.name, 0)
            .await?;
        let mut cursor = EventCursor::seeded(&updated.events);
        if let Err(e) = SteadyStateWaiter::new(self.ctx)
            .await_steady_state(&old.name, timeout, &mut cursor)
            .await
        {
            warn!(service = %old.name, error = %e, "old slot did not drain");
            return Err(e);
        }
        self.ctx
            .log
            .info(&format!("Downsized {} to 0 instances", old.name));
        Ok(())
    }
}
