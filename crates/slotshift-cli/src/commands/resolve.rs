use serde_json::json;
use slotshift_rollout::SlotResolver;

use super::{OutputFormat, Session, Workspace};

pub async fn resolve(workspace: &Workspace, prefix: &str) -> anyhow::Result<()> {
    let session = Session::open(workspace)?;
    let resolution = SlotResolver::new(&session.ctx).resolve(prefix).await?;
    session.save()?;

    let active = resolution.active.as_ref().map(|s| s.resolved_name.as_str());
    let inactive = resolution.inactive.resolved_name.as_str();
    match workspace.format {
        OutputFormat::Json => workspace.print_json(&json!({
            "prefix": prefix,
            "active": active,
            "inactive": inactive,
        })),
        OutputFormat::Text => {
            println!("active:   {}", active.unwrap_or("(none)"));
            println!("inactive: {inactive}");
            Ok(())
        }
    }
}
