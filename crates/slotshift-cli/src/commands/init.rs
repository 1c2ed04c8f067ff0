use anyhow::bail;
use slotshift_core::RolloutConfig;
use slotshift_sim::World;

use super::Workspace;

pub fn init(workspace: &Workspace, cluster: &str, region: &str, force: bool) -> anyhow::Result<()> {
    if workspace.config.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            workspace.config.display()
        );
    }

    let config = RolloutConfig::scaffold(cluster, region);
    std::fs::write(&workspace.config, config.to_toml_string()?)?;
    println!("✓ Generated {}", workspace.config.display());

    if !workspace.world.exists() {
        World::new(cluster, region).save(&workspace.world)?;
        println!("✓ Generated {}", workspace.world.display());
    }
    Ok(())
}
