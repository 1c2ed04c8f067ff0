use serde_json::json;

use super::{OutputFormat, Workspace};

pub fn status(workspace: &Workspace, prefix: &str) -> anyhow::Result<()> {
    let ledger = workspace.open_ledger()?;
    let records = ledger.list_records(prefix)?;

    match workspace.format {
        OutputFormat::Json => workspace.print_json(&json!(records)),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No rollouts recorded for {prefix}");
                return Ok(());
            }
            println!("{:<16} {:<12} {:<24} STATUS", "ROLLOUT", "CREATED", "SERVICE");
            for record in &records {
                println!(
                    "{:<16} {:<12} {:<24} {:?}",
                    record.rollout_id, record.created_at, record.handle.name, record.status
                );
            }
            Ok(())
        }
    }
}
