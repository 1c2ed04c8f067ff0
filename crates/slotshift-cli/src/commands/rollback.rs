use anyhow::{Context, bail};
use serde_json::json;
use slotshift_rollout::{RollbackCoordinator, RollbackStatus};

use super::{OutputFormat, Session, Workspace};

pub async fn rollback(
    workspace: &Workspace,
    prefix: &str,
    rollout_id: Option<&str>,
) -> anyhow::Result<()> {
    let ledger = workspace.open_ledger()?;
    let record = match rollout_id {
        Some(id) => ledger.get_record(prefix, id)?,
        None => ledger.latest_record(prefix)?,
    };
    let Some(record) = record else {
        bail!(
            "no rollout recorded for {prefix}{}",
            rollout_id.map(|id| format!(" with id {id}")).unwrap_or_default()
        );
    };

    let session = Session::open(workspace)?.cancel_on_interrupt();
    let outcome = RollbackCoordinator::new(&session.ctx)
        .rollback(record.rollback.clone())
        .await;
    session.save()?;
    ledger
        .set_status(prefix, &record.rollout_id, outcome.status.record_status())
        .context("recording rollback status")?;

    match workspace.format {
        OutputFormat::Json => workspace.print_json(&json!({
            "rollout_id": record.rollout_id,
            "outcome": outcome,
        }))?,
        OutputFormat::Text => {
            println!(
                "Rollback of {} finished: {:?} at {:?}",
                record.rollout_id, outcome.status, outcome.final_state
            );
            for renamed in &outcome.updated_names {
                println!("  renamed {} -> {}", renamed.from, renamed.to);
            }
        }
    }

    if outcome.status != RollbackStatus::Completed {
        bail!(
            "rollback of {} did not complete: {}",
            record.rollout_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::deploy::deploy;
    use crate::commands::testing::{MANIFEST, rule_target, workspace};
    use slotshift_core::{RecordStatus, ServiceStatus};
    use slotshift_sim::World;

    #[tokio::test(start_paused = true)]
    async fn rollback_restores_latest_rollout() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(&dir);
        let manifest = dir.path().join("service.yaml");
        std::fs::write(&manifest, MANIFEST).unwrap();
        deploy(&workspace, &manifest, &[], &[], Some("r1".to_string()))
            .await
            .unwrap();

        rollback(&workspace, "app__", None).await.unwrap();

        assert_eq!(rule_target(&workspace, "rule-prod"), "tg-1");
        assert_eq!(rule_target(&workspace, "rule-stage"), "tg-2");
        let world = World::load(&workspace.world).unwrap();
        let old = world.services.iter().find(|s| s.name == "app__1").unwrap();
        assert_eq!(old.desired_count, 2);
        assert!(
            world
                .services
                .iter()
                .filter(|s| s.name == "app__2")
                .all(|s| s.status == ServiceStatus::Inactive)
        );

        let record = workspace
            .open_ledger()
            .unwrap()
            .latest_record("app__")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, RecordStatus::RolledBack);
    }

    #[tokio::test]
    async fn unknown_rollout_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = workspace(&dir);

        let err = rollback(&workspace, "app__", Some("r9")).await.unwrap_err();
        assert_eq!(err.to_string(), "no rollout recorded for app__ with id r9");
    }
}
