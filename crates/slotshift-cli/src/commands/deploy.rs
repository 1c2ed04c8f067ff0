use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::json;
use slotshift_rollout::context::epoch_secs;
use slotshift_rollout::{DeployRequest, Deployer, ScalingManifests};

use super::{OutputFormat, Session, Workspace};

fn read_all(paths: &[PathBuf]) -> anyhow::Result<Vec<String>> {
    paths.iter().map(|p| read(p)).collect()
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

pub async fn deploy(
    workspace: &Workspace,
    manifest: &Path,
    scaling_targets: &[PathBuf],
    scaling_policies: &[PathBuf],
    rollout_id: Option<String>,
) -> anyhow::Result<()> {
    let request = DeployRequest {
        rollout_id: rollout_id.unwrap_or_else(|| format!("r{}", epoch_secs())),
        manifest: read(manifest)?,
        scaling: ScalingManifests {
            targets: read_all(scaling_targets)?,
            policies: read_all(scaling_policies)?,
        },
    };

    let session = Session::open(workspace)?.cancel_on_interrupt();
    let ledger = workspace.open_ledger()?;
    let result = Deployer::new(&session.ctx)
        .with_ledger(&ledger)
        .deploy(&request)
        .await;
    // Whatever got created stays in the world, success or not.
    session.save()?;
    let report = result.with_context(|| format!("rollout {} failed", request.rollout_id))?;

    match workspace.format {
        OutputFormat::Json => workspace.print_json(&json!(report.record)),
        OutputFormat::Text => {
            println!(
                "✓ Deployed {} ({}) in {}",
                report.handle.name, report.handle.id, report.handle.region
            );
            println!(
                "  rollout {} recorded under {}",
                report.record.rollout_id, report.record.service_prefix
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{MANIFEST, rule_target, workspace};
    use slotshift_core::RecordStatus;
    use slotshift_sim::World;

    #[tokio::test(start_paused = true)]
    async fn deploy_cuts_over_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(&dir);
        let manifest = dir.path().join("service.yaml");
        std::fs::write(&manifest, MANIFEST).unwrap();
        let target = dir.path().join("target.yaml");
        std::fs::write(&target, "minCapacity: 2\nmaxCapacity: 6\n").unwrap();

        deploy(&workspace, &manifest, &[target], &[], Some("r1".to_string()))
            .await
            .unwrap();

        assert_eq!(rule_target(&workspace, "rule-prod"), "tg-2");
        let world = World::load(&workspace.world).unwrap();
        let new = world.services.iter().find(|s| s.name == "app__2").unwrap();
        assert_eq!(new.running_count, 2);
        assert_eq!(
            world
                .scalable_targets
                .iter()
                .filter(|t| t.resource_id == "service/prod/app__2")
                .count(),
            1
        );

        let record = workspace
            .open_ledger()
            .unwrap()
            .get_record("app__", "r1")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecordStatus::Deployed);
        assert_eq!(record.handle.name, "app__2");
    }

    #[tokio::test]
    async fn missing_manifest_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(&dir);
        let missing = dir.path().join("nope.yaml");

        let err = deploy(&workspace, &missing, &[], &[], None).await.unwrap_err();
        assert!(format!("{err:#}").contains("nope.yaml"));
    }
}
