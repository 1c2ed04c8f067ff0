//! Release rollback for manifest-applied workloads.
//!
//! Finds the last successful release before the current one, deletes what
//! the current release added (dependents first), re-applies the shared
//! resources from the successful release, and optionally recreates the
//! resources the current release pruned.

use std::collections::BTreeSet;
use std::sync::Arc;

use slotshift_core::{
    ExecutionLog, ManifestApplier, Release, ReleaseStatus, ResourceId, ResourceManifest,
};
use tracing::info;

use crate::error::{RolloutError, RolloutResult};

/// Kinds in the order they are installed. Unknown kinds install last.
const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "Role",
    "RoleBinding",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "Ingress",
    "APIService",
];

fn install_rank(kind: &str) -> usize {
    INSTALL_ORDER
        .iter()
        .position(|k| k.eq_ignore_ascii_case(kind))
        .unwrap_or(INSTALL_ORDER.len())
}

/// Sort resources so dependents are deleted before what they depend on.
pub fn deletion_order(mut ids: Vec<ResourceId>) -> Vec<ResourceId> {
    ids.sort_by(|a, b| {
        install_rank(&b.kind)
            .cmp(&install_rank(&a.kind))
            .then_with(|| a.cmp(b))
    });
    ids
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePlan {
    pub current: u32,
    pub target: u32,
    /// Added by the current release, in deletion order.
    pub to_delete: Vec<ResourceId>,
    /// Present in both releases, as the target release rendered them.
    pub to_restore: Vec<ResourceManifest>,
    /// Pruned by the current release.
    pub to_recreate: Vec<ResourceManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseRollback {
    Skipped { reason: String },
    Planned(ReleasePlan),
}

/// Diff the newest release against the last successful one before it.
pub fn plan(history: &[Release], recreate_pruned: bool) -> ReleaseRollback {
    let Some(current) = history.iter().max_by_key(|r| r.number) else {
        return ReleaseRollback::Skipped {
            reason: "release history is empty".to_string(),
        };
    };
    let Some(target) = history
        .iter()
        .filter(|r| r.number < current.number && r.status == ReleaseStatus::Succeeded)
        .max_by_key(|r| r.number)
    else {
        return ReleaseRollback::Skipped {
            reason: format!(
                "no successful release of {} before release {}",
                current.name, current.number
            ),
        };
    };

    let current_ids: BTreeSet<ResourceId> = current.resource_ids().into_iter().collect();
    let target_ids: BTreeSet<ResourceId> = target.resource_ids().into_iter().collect();

    let to_delete = deletion_order(current_ids.difference(&target_ids).cloned().collect());
    let to_restore = target
        .manifests
        .iter()
        .filter(|m| current_ids.contains(&m.id))
        .cloned()
        .collect();
    let to_recreate = if recreate_pruned {
        target
            .manifests
            .iter()
            .filter(|m| !current_ids.contains(&m.id))
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    ReleaseRollback::Planned(ReleasePlan {
        current: current.number,
        target: target.number,
        to_delete,
        to_restore,
        to_recreate,
    })
}

pub struct ReleaseRollbackPlanner {
    applier: Arc<dyn ManifestApplier>,
    log: Arc<dyn ExecutionLog>,
}

impl ReleaseRollbackPlanner {
    pub fn new(applier: Arc<dyn ManifestApplier>, log: Arc<dyn ExecutionLog>) -> Self {
        Self { applier, log }
    }

    pub async fn rollback(
        &self,
        release_name: &str,
        recreate_pruned: bool,
    ) -> RolloutResult<ReleaseRollback> {
        let history = self
            .applier
            .release_history(release_name)
            .await
            .map_err(RolloutError::provider("fetch release history of", release_name))?;

        let plan = match plan(&history, recreate_pruned) {
            ReleaseRollback::Planned(plan) => plan,
            ReleaseRollback::Skipped { reason } => {
                self.log
                    .info(&format!("Skipping rollback of {release_name}: {reason}"));
                return Ok(ReleaseRollback::Skipped { reason });
            }
        };

        self.log.info(&format!(
            "Rolling back {release_name} from release {} to release {}",
            plan.current, plan.target
        ));
        if !plan.to_delete.is_empty() {
            for id in &plan.to_delete {
                self.log.info(&format!("Deleting {id}"));
            }
            self.applier
                .delete(&plan.to_delete)
                .await
                .map_err(RolloutError::provider("delete resources of", release_name))?;
        }

        let mut manifests = plan.to_restore.clone();
        manifests.extend(plan.to_recreate.iter().cloned());
        if !manifests.is_empty() {
            self.applier
                .apply(&manifests)
                .await
                .map_err(RolloutError::provider("apply manifests of", release_name))?;
        }
        for manifest in &plan.to_recreate {
            self.log.info(&format!("Recreated pruned resource {}", manifest.id));
        }

        info!(
            release = %release_name,
            target = plan.target,
            deleted = plan.to_delete.len(),
            recreated = plan.to_recreate.len(),
            "release rolled back"
        );
        Ok(ReleaseRollback::Planned(plan))
    }
}
