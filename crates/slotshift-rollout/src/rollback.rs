//! Rollback coordinator.
//!
//! Reverses a deploy from the state recorded at deploy time. Each phase
//! converges on the recorded target rather than replaying the deploy
//! backwards, so a rollback can be re-run after a partial failure.
//!
//! ```text
//! START ─▶ ROUTES_RESTORED ─▶ OLD_RESIZED ─▶ COMPLETION_CHECKED ─┬─▶ RENAMED ─▶ DONE
//!                                                                └─▶ SKIPPED
//! ```
//!
//! Destructive steps (deleting the new version, renaming) only run once the
//! completion check passes on both sides.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slotshift_core::{
    CompletionFact, CredentialStager, INACTIVE_SUFFIX, RecordStatus, RollbackContext,
    RollbackPhase, RouteBinding, ServiceDescriptor, ServiceStatus, VersionTag,
};
use tracing::{debug, info, warn};

use crate::context::RolloutContext;
use crate::error::{RolloutError, RolloutResult};
use crate::executor::DeploymentExecutor;
use crate::scaling::ScalingMigrator;
use crate::steady::{EventCursor, SteadyStateWaiter};
use crate::traffic::TrafficRouter;

/// File the rollback context is staged to inside the working directory.
pub const CONTEXT_FILE: &str = "rollback-context.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackStatus {
    Completed,
    /// Not converged yet; nothing destructive ran. Safe to retry.
    Incomplete,
    Failed,
}

impl RollbackStatus {
    pub fn record_status(self) -> RecordStatus {
        match self {
            Self::Completed => RecordStatus::RolledBack,
            Self::Incomplete => RecordStatus::RollbackIncomplete,
            Self::Failed => RecordStatus::RollbackFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamedService {
    pub id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub status: RollbackStatus,
    pub error: Option<String>,
    pub final_state: RollbackPhase,
    pub facts: Vec<CompletionFact>,
    pub updated_names: Vec<RenamedService>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rename {
    id: String,
    from: String,
    to: String,
}

/// Names and flags the reset pass settles on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetPlan {
    pub active_id: String,
    pub inactive_id: Option<String>,
    /// Final name per service id.
    pub names: BTreeMap<String, String>,
}

/// Recompute release ordering for every live release of `base`.
///
/// `releases` must be sorted oldest first and not be empty.
pub fn plan_reset(
    base: &str,
    delimiter: &str,
    releases: &[ServiceDescriptor],
    preferred_active: Option<&str>,
    preferred_inactive: Option<&str>,
    versioned: bool,
) -> Option<ResetPlan> {
    let by_id = |id: &str| releases.iter().find(|s| s.id == id);
    let active = preferred_active
        .and_then(by_id)
        .or_else(|| {
            releases
                .iter()
                .find(|s| s.version_tag() == Some(VersionTag::Blue))
        })
        .or_else(|| {
            releases
                .iter()
                .rev()
                .find(|s| s.desired_count > 0 && !s.routes.is_empty())
        })
        .or_else(|| releases.iter().rev().find(|s| s.desired_count > 0))
        .or_else(|| releases.last())?;
    let inactive = preferred_inactive
        .and_then(by_id)
        .filter(|s| s.id != active.id)
        .or_else(|| releases.iter().rev().find(|s| s.id != active.id));

    let member_prefix = format!("{base}{delimiter}");
    let ordinal = |s: &ServiceDescriptor| {
        s.name
            .strip_prefix(&member_prefix)
            .and_then(|n| n.parse::<u32>().ok())
    };
    let mut next = releases.iter().filter_map(ordinal).max().unwrap_or(0) + 1;

    let mut names = BTreeMap::new();
    for release in releases {
        let name = if !versioned && release.id == active.id {
            base.to_string()
        } else if !versioned && inactive.is_some_and(|i| i.id == release.id) {
            format!("{member_prefix}{INACTIVE_SUFFIX}")
        } else if let Some(n) = ordinal(release) {
            format!("{member_prefix}{n}")
        } else {
            let name = format!("{member_prefix}{next}");
            next += 1;
            name
        };
        names.insert(release.id.clone(), name);
    }

    Some(ResetPlan {
        active_id: active.id.clone(),
        inactive_id: inactive.map(|s| s.id.clone()),
        names,
    })
}

pub struct RollbackCoordinator<'a> {
    ctx: &'a RolloutContext,
    stager: Option<Arc<dyn CredentialStager>>,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx, stager: None }
    }

    pub fn with_stager(mut self, stager: Arc<dyn CredentialStager>) -> Self {
        self.stager = Some(stager);
        self
    }

    /// Run the rollback. Never returns an error; the outcome carries it.
    pub async fn rollback(&self, mut context: RollbackContext) -> RollbackOutcome {
        info!(rollout = %context.rollout_id, prefix = %context.name_prefix, "rollback started");
        self.ctx.log.info(&format!(
            "Rolling back {} (rollout {})",
            context.name_prefix, context.rollout_id
        ));
        let mut renamed = Vec::new();

        let result = match tempfile::Builder::new()
            .prefix("slotshift-rollback-")
            .tempdir()
        {
            Ok(workdir) => {
                let result = self.run(&mut context, workdir.path(), &mut renamed).await;
                let path = workdir.path().display().to_string();
                if let Err(e) = workdir.close() {
                    warn!(path = %path, error = %e, "working directory cleanup failed");
                    self.ctx
                        .log
                        .warn(&format!("Failed to clean up working directory {path}: {e}"));
                }
                result
            }
            Err(e) => Err(RolloutError::Staging(format!(
                "creating working directory: {e}"
            ))),
        };

        let status = match &result {
            Ok(true) => RollbackStatus::Completed,
            Ok(false) => RollbackStatus::Incomplete,
            Err(e) if e.is_timeout() || matches!(e, RolloutError::Cancelled { .. }) => {
                RollbackStatus::Incomplete
            }
            Err(_) => RollbackStatus::Failed,
        };
        match (&result, status) {
            (Err(e), RollbackStatus::Incomplete) => self.ctx.log.warn(&format!(
                "Rollback of {} is incomplete: {e}. Cleanup was skipped; retry the rollback",
                context.name_prefix
            )),
            (Err(e), _) => self
                .ctx
                .log
                .error(&format!("Rollback of {} failed: {e}", context.name_prefix)),
            (Ok(_), _) => {}
        }
        info!(rollout = %context.rollout_id, status = ?status, "rollback finished");

        RollbackOutcome {
            status,
            error: result.err().map(|e| e.to_string()),
            final_state: context
                .facts
                .last()
                .map(|f| f.phase)
                .unwrap_or(RollbackPhase::Start),
            facts: context.facts,
            updated_names: renamed,
        }
    }

    async fn run(
        &self,
        context: &mut RollbackContext,
        workdir: &Path,
        renamed: &mut Vec<RenamedService>,
    ) -> RolloutResult<bool> {
        self.stage(context, workdir).await?;

        let restored = self.restore_routes(context).await?;
        context.record(
            RollbackPhase::RoutesRestored,
            format!("{restored} routes restored"),
        );

        self.resize_versions(context).await?;

        if !self.check_completion(context).await? {
            self.ctx.log.warn(&format!(
                "Rollback of {} did not converge; skipping cleanup",
                context.name_prefix
            ));
            context.record(RollbackPhase::Skipped, "completion check failed");
            return Ok(false);
        }

        self.delete_new_version(context).await?;
        let names = self.reconcile_names(context).await?;
        context.record(
            RollbackPhase::Renamed,
            format!("{} services renamed", names.len()),
        );
        renamed.extend(names);

        self.retag(context).await?;
        context.record(RollbackPhase::Done, "rollback completed");
        self.ctx
            .log
            .info(&format!("Rollback of {} completed", context.name_prefix));
        Ok(true)
    }

    async fn stage(&self, context: &RollbackContext, workdir: &Path) -> RolloutResult<()> {
        let yaml =
            serde_yaml::to_string(context).map_err(|e| RolloutError::Staging(e.to_string()))?;
        let path = workdir.join(CONTEXT_FILE);
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| RolloutError::Staging(format!("writing {}: {e}", path.display())))?;
        if let Some(stager) = &self.stager {
            let files = stager
                .stage(workdir)
                .await
                .map_err(|e| RolloutError::Staging(e.to_string()))?;
            debug!(files = files.len(), "credentials staged");
        }
        Ok(())
    }

    // ── lookups ─────────────────────────────────────────────────────

    fn base_name<'c>(&self, context: &'c RollbackContext) -> &'c str {
        let delimiter = self.ctx.settings.delimiter.as_str();
        context
            .name_prefix
            .strip_suffix(delimiter)
            .unwrap_or(&context.name_prefix)
    }

    async fn live_services(&self, prefix: &str) -> RolloutResult<Vec<ServiceDescriptor>> {
        let services = self
            .ctx
            .providers
            .compute
            .list_services(prefix)
            .await
            .map_err(RolloutError::provider("list services with prefix", prefix))?;
        Ok(services
            .into_iter()
            .filter(|s| s.status != ServiceStatus::Inactive)
            .collect())
    }

    async fn locate(
        &self,
        context: &RollbackContext,
        id: &str,
    ) -> RolloutResult<Vec<ServiceDescriptor>> {
        Ok(self
            .live_services(self.base_name(context))
            .await?
            .into_iter()
            .filter(|s| s.id == id)
            .collect())
    }

    /// The single live service with `id`. Ambiguous matches count as missing.
    async fn current(
        &self,
        context: &RollbackContext,
        id: &str,
    ) -> RolloutResult<Option<ServiceDescriptor>> {
        let mut found = self.locate(context, id).await?;
        if found.len() > 1 {
            warn!(id, matches = found.len(), "ambiguous service id");
            self.ctx.log.warn(&format!(
                "Found {} services with id {id}; leaving them untouched",
                found.len()
            ));
            return Ok(None);
        }
        Ok(found.pop())
    }

    // ── phases ──────────────────────────────────────────────────────

    async fn restore_routes(&self, context: &RollbackContext) -> RolloutResult<usize> {
        let mut bindings = context.routes_to_restore.clone();
        if let Some(prev) = &context.previous_active {
            for route in &prev.routes {
                if !bindings.contains(route) {
                    bindings.push(route.clone());
                }
            }
        }

        let live_prev = match &context.previous_active {
            Some(prev) => self.current(context, &prev.id).await?,
            None => None,
        };
        let router = TrafficRouter::new(self.ctx);
        let mut restored = 0;
        let mut missing_urls = Vec::new();

        for binding in &bindings {
            match binding {
                RouteBinding::Listener { endpoint } => {
                    if router.restore(endpoint).await? {
                        restored += 1;
                    }
                }
                RouteBinding::Url { url } => match &live_prev {
                    Some(service) if !service.routes.contains(url) => {
                        missing_urls.push(url.clone());
                    }
                    Some(_) => {}
                    None => self.ctx.log.warn(&format!(
                        "No live previous version to map route {url} to"
                    )),
                },
            }
        }

        if let Some(service) = &live_prev
            && !missing_urls.is_empty()
        {
            self.ctx
                .providers
                .compute
                .map_routes(&service.name, &missing_urls)
                .await
                .map_err(RolloutError::provider("map routes to", &service.name))?;
            self.ctx.log.info(&format!(
                "Mapped routes {} to {}",
                missing_urls.join(", "),
                service.name
            ));
            restored += missing_urls.len();
        }
        Ok(restored)
    }

    async fn resize(&self, name: &str, count: u32, timeout: Duration) -> RolloutResult<()> {
        let updated = DeploymentExecutor::new(self.ctx)
            .update_desired_count(name, count)
            .await?;
        let mut cursor = EventCursor::seeded(&updated.events);
        SteadyStateWaiter::new(self.ctx)
            .await_steady_state(name, timeout, &mut cursor)
            .await?;
        Ok(())
    }

    async fn resize_versions(&self, context: &mut RollbackContext) -> RolloutResult<()> {
        let timeout = self.ctx.settings.steady_state_timeout;
        let migrator = ScalingMigrator::new(self.ctx);

        if let Some(prev) = context.previous_active.clone()
            && prev.downsized
        {
            match self.current(context, &prev.id).await? {
                Some(service) => {
                    let captured = migrator.detach_and_delete(&service.name).await?;
                    self.resize(&service.name, prev.initial_instance_count, timeout)
                        .await?;
                    let snapshot = prev
                        .scaling
                        .clone()
                        .filter(|s| !s.is_empty())
                        .unwrap_or(captured);
                    migrator.reattach(&service.name, &snapshot).await?;
                    context.record(
                        RollbackPhase::OldResized,
                        format!(
                            "{} resized to {}",
                            service.name, prev.initial_instance_count
                        ),
                    );
                }
                None => self.ctx.log.warn(&format!(
                    "Previous version {} ({}) not found; it cannot be resized",
                    prev.name, prev.id
                )),
            }
        } else if let Some(prev) = context.previous_active.clone()
            && let Some(snapshot) = prev.scaling.filter(|s| !s.is_empty())
            && let Some(service) = self.current(context, &prev.id).await?
            && migrator.capture(&service.name).await?.is_empty()
        {
            // An in-place update failed after detaching scaling.
            migrator.reattach(&service.name, &snapshot).await?;
            context.record(
                RollbackPhase::OldResized,
                format!("{} scaling reattached", service.name),
            );
        }

        let new = context.new_version.clone();
        let same_as_previous = context
            .previous_active
            .as_ref()
            .is_some_and(|p| p.id == new.id);
        if same_as_previous {
            return Ok(());
        }
        if let Some(service) = self.current(context, &new.id).await? {
            if service.desired_count != new.initial_instance_count
                || service.running_count != new.initial_instance_count
            {
                migrator.detach_and_delete(&service.name).await?;
                self.resize(&service.name, new.initial_instance_count, timeout)
                    .await?;
            }
            if new.initial_instance_count == 0 && !service.routes.is_empty() {
                self.ctx
                    .providers
                    .compute
                    .unmap_routes(&service.name, &service.routes)
                    .await
                    .map_err(RolloutError::provider("unmap routes from", &service.name))?;
                self.ctx
                    .log
                    .info(&format!("Unmapped routes from {}", service.name));
            }
            context.record(
                RollbackPhase::OldResized,
                format!(
                    "{} resized to {}",
                    service.name, new.initial_instance_count
                ),
            );
        }
        Ok(())
    }

    /// Complete iff every recorded version runs its initial count again.
    async fn check_completion(&self, context: &mut RollbackContext) -> RolloutResult<bool> {
        let live = self.live_services(self.base_name(context)).await?;
        let mut complete = true;
        for (id, expected) in context.expected_instance_counts() {
            let actual = live
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.running_count)
                .unwrap_or(0);
            complete &= actual == expected;
            context.record(
                RollbackPhase::CompletionChecked,
                format!("{id}: running {actual}, expected {expected}"),
            );
        }
        Ok(complete)
    }

    async fn delete_new_version(&self, context: &mut RollbackContext) -> RolloutResult<()> {
        let new = context.new_version.clone();
        if new.initial_instance_count > 0 {
            self.ctx.log.info(&format!(
                "{} ran {} instances before the deploy; keeping it",
                new.name, new.initial_instance_count
            ));
            return Ok(());
        }
        if context
            .previous_active
            .as_ref()
            .is_some_and(|p| p.id == new.id)
        {
            return Ok(());
        }

        let matches = self.locate(context, &new.id).await?;
        match matches.as_slice() {
            [] => {
                self.ctx.log.info(&format!(
                    "No service with id {} found; nothing to delete",
                    new.id
                ));
            }
            [service] => {
                DeploymentExecutor::new(self.ctx)
                    .delete_services(
                        std::slice::from_ref(&service.name),
                        self.ctx.settings.steady_state_timeout,
                    )
                    .await?;
                self.ctx.log.info(&format!(
                    "Deleted new version {} ({})",
                    service.name, service.id
                ));
                context.record(
                    RollbackPhase::CompletionChecked,
                    format!("deleted {}", service.id),
                );
            }
            many => {
                warn!(id = %new.id, matches = many.len(), "ambiguous delete skipped");
                self.ctx.log.warn(&format!(
                    "Found {} services with id {}; skipping delete",
                    many.len(),
                    new.id
                ));
            }
        }
        Ok(())
    }

    async fn reconcile_names(
        &self,
        context: &RollbackContext,
    ) -> RolloutResult<Vec<RenamedService>> {
        if context.naming.resets_releases() {
            return self.reset_releases(context).await;
        }
        if !context.naming.renames_to_canonical() {
            return Ok(Vec::new());
        }

        let mut plan = Vec::new();
        for version in [&context.previous_active, &context.previous_inactive]
            .into_iter()
            .flatten()
        {
            if let Some(service) = self.current(context, &version.id).await?
                && service.name != version.name
            {
                plan.push(Rename {
                    id: service.id,
                    from: service.name,
                    to: version.name.clone(),
                });
            }
        }
        self.apply_renames(context, plan).await
    }

    async fn reset_releases(
        &self,
        context: &RollbackContext,
    ) -> RolloutResult<Vec<RenamedService>> {
        let delimiter = self.ctx.settings.delimiter.as_str();
        let base = self.base_name(context);
        let member_prefix = format!("{base}{delimiter}");
        let mut releases: Vec<ServiceDescriptor> = self
            .live_services(base)
            .await?
            .into_iter()
            .filter(|s| s.name == base || s.name.starts_with(&member_prefix))
            .collect();
        releases.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });

        let Some(plan) = plan_reset(
            base,
            delimiter,
            &releases,
            context.previous_active.as_ref().map(|v| v.id.as_str()),
            context.previous_inactive.as_ref().map(|v| v.id.as_str()),
            context.naming.reset_to_versioned(),
        ) else {
            self.ctx
                .log
                .info(&format!("No live releases of {base} to reset"));
            return Ok(Vec::new());
        };

        let renames = releases
            .iter()
            .filter_map(|s| {
                let to = plan.names.get(&s.id)?;
                (to != &s.name).then(|| Rename {
                    id: s.id.clone(),
                    from: s.name.clone(),
                    to: to.clone(),
                })
            })
            .collect();
        let renamed = self.apply_renames(context, renames).await?;

        let exec = DeploymentExecutor::new(self.ctx);
        if let Some(name) = plan.names.get(&plan.active_id) {
            exec.update_tag(name, VersionTag::Blue).await?;
        }
        if let Some(name) = plan.inactive_id.as_ref().and_then(|id| plan.names.get(id)) {
            exec.update_tag(name, VersionTag::Green).await?;
        }
        Ok(renamed)
    }

    /// Rename in two passes so names can be exchanged within the plan.
    /// A target held by a live service outside the plan is skipped.
    async fn apply_renames(
        &self,
        context: &RollbackContext,
        plan: Vec<Rename>,
    ) -> RolloutResult<Vec<RenamedService>> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let live = self.live_services(self.base_name(context)).await?;
        let planned: HashSet<&str> = plan.iter().map(|r| r.id.as_str()).collect();

        let mut ready = Vec::new();
        for rename in &plan {
            let holder = live.iter().find(|s| {
                s.name == rename.to && s.id != rename.id && !planned.contains(s.id.as_str())
            });
            if let Some(holder) = holder {
                warn!(
                    id = %rename.id,
                    target = %rename.to,
                    holder = %holder.id,
                    "rename target taken"
                );
                self.ctx.log.warn(&format!(
                    "Cannot rename {} to {}: the name is used by {}",
                    rename.from, rename.to, holder.id
                ));
                continue;
            }
            ready.push(rename.clone());
        }

        let targets: HashSet<&str> = ready.iter().map(|r| r.to.as_str()).collect();
        for rename in &ready {
            if targets.contains(rename.from.as_str()) {
                let parked = format!("{}-rollback-{}", rename.from, context.rollout_id);
                self.rename(&rename.id, &parked).await?;
            }
        }

        let mut done = Vec::new();
        for rename in ready {
            self.rename(&rename.id, &rename.to).await?;
            done.push(RenamedService {
                id: rename.id,
                from: rename.from,
                to: rename.to,
            });
        }
        Ok(done)
    }

    async fn rename(&self, id: &str, name: &str) -> RolloutResult<()> {
        self.ctx
            .providers
            .compute
            .rename_service(id, name)
            .await
            .map_err(RolloutError::provider("rename service", id))?;
        self.ctx
            .log
            .info(&format!("Renamed service {id} to {name}"));
        Ok(())
    }

    async fn retag(&self, context: &RollbackContext) -> RolloutResult<()> {
        if context.naming.resets_releases() {
            return Ok(());
        }
        let Some(prev) = &context.previous_active else {
            return Ok(());
        };
        let Some(service) = self.current(context, &prev.id).await? else {
            return Ok(());
        };
        // An untagged live service counts as active; put it back the way it was.
        let exec = DeploymentExecutor::new(self.ctx);
        match prev.version_tag {
            Some(_) => exec.update_tag(&service.name, VersionTag::Blue).await?,
            None if service.version_tag().is_some() => exec.clear_tag(&service.name).await?,
            None => false,
        };
        Ok(())
    }
}
