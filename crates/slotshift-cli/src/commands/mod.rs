pub mod deploy;
pub mod init;
pub mod resolve;
pub mod rollback;
pub mod status;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::ValueEnum;
use serde_json::Value;
use slotshift_core::{RolloutConfig, TracingLog};
use slotshift_rollout::{Providers, RolloutContext, Settings};
use slotshift_sim::{SimCloud, World};
use slotshift_state::RolloutLedger;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Files every command works against.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub config: PathBuf,
    pub world: PathBuf,
    pub state: PathBuf,
    pub format: OutputFormat,
}

impl Workspace {
    pub fn load_config(&self) -> anyhow::Result<RolloutConfig> {
        RolloutConfig::from_file(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))
    }

    pub fn open_ledger(&self) -> anyhow::Result<RolloutLedger> {
        RolloutLedger::open(&self.state)
            .with_context(|| format!("opening ledger {}", self.state.display()))
    }

    pub fn print_json(&self, value: &Value) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// A rollout context bound to the simulated world on disk.
pub struct Session {
    pub ctx: RolloutContext,
    pub sim: SimCloud,
    world_path: PathBuf,
}

impl Session {
    pub fn open(workspace: &Workspace) -> anyhow::Result<Self> {
        let config = workspace.load_config()?;
        let settings = Settings::from_config(&config)?;

        let world = if workspace.world.exists() {
            World::load(&workspace.world)
                .with_context(|| format!("loading world {}", workspace.world.display()))?
        } else {
            info!(path = %workspace.world.display(), "no world file, starting empty");
            World::new(&config.cluster, &config.region)
        };
        let sim = SimCloud::new(world);
        let ctx = RolloutContext::new(
            Providers::from_one(sim.clone()),
            Arc::new(TracingLog),
            settings,
        );

        Ok(Self {
            ctx,
            sim,
            world_path: workspace.world.clone(),
        })
    }

    /// Stop polling at the next sleep once Ctrl-C is pressed.
    pub fn cancel_on_interrupt(mut self) -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping at the next poll");
                let _ = tx.send(true);
            }
        });
        self.ctx = self.ctx.with_cancel(rx);
        self
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.sim
            .world()
            .save(&self.world_path)
            .with_context(|| format!("saving world {}", self.world_path.display()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use slotshift_core::VersionTag;
    use slotshift_sim::fixtures::{listener, load_balancer, rule, service};
    use tempfile::TempDir;

    pub const MANIFEST: &str = r#"
serviceName: app
taskDefinition: app:2
desiredCount: 2
loadBalancers:
  - targetGroupArn: <+targetGroupArn>
    containerName: web
    containerPort: 8080
"#;

    /// A workspace in a temp dir, with the scaffolded config and a world
    /// where `app__1` is live behind the scaffolded listeners.
    pub fn workspace(dir: &TempDir) -> Workspace {
        let workspace = Workspace {
            config: dir.path().join("slotshift.toml"),
            world: dir.path().join("world.json"),
            state: dir.path().join("slotshift.redb"),
            format: OutputFormat::Text,
        };
        super::init::init(&workspace, "prod", "us-east-1", false).unwrap();

        let mut world = World::new("prod", "us-east-1");
        world.load_balancers.push(load_balancer("app-lb"));
        world
            .listeners
            .push(listener("listener-prod", "arn:lb/app-lb", "tg-default"));
        world
            .listeners
            .push(listener("listener-stage", "arn:lb/app-lb", "tg-default"));
        world
            .rules
            .push(rule("rule-prod", "listener-prod", "tg-1", false));
        world
            .rules
            .push(rule("rule-stage", "listener-stage", "tg-2", false));
        world
            .services
            .push(service("app__1", "arn:app-1", 2, Some(VersionTag::Blue)));
        world.save(&workspace.world).unwrap();
        workspace
    }

    pub fn rule_target(workspace: &Workspace, arn: &str) -> String {
        World::load(&workspace.world)
            .unwrap()
            .rules
            .into_iter()
            .find(|r| r.arn == arn)
            .and_then(|r| r.actions[0].target_group_arn.clone())
            .unwrap()
    }
}
