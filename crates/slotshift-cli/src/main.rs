//! slotshift: blue/green rollouts from the command line.
//!
//! Runs the rollout engine against a simulated control plane kept in a JSON
//! world file, and records every deploy in a local ledger so `rollback` can
//! undo it later.
//!
//! # Usage
//!
//! ```text
//! slotshift init
//! slotshift deploy --manifest service.yaml --scaling-target target.yaml
//! slotshift status --prefix app-
//! slotshift rollback --prefix app-
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{OutputFormat, Workspace};

#[derive(Parser)]
#[command(
    name = "slotshift",
    about = "slotshift: blue/green rollouts with recorded rollback",
    version,
    propagate_version = true
)]
struct Cli {
    /// Rollout configuration file.
    #[arg(long, global = true, default_value = "slotshift.toml")]
    config: PathBuf,
    /// Simulated control plane state (JSON). Written back after each command.
    #[arg(long, global = true, default_value = "slotshift-world.json")]
    world: PathBuf,
    /// Rollout ledger database.
    #[arg(long, global = true, default_value = "slotshift.redb")]
    state: PathBuf,
    /// Output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter slotshift.toml and an empty world file.
    Init {
        #[arg(long, default_value = "default")]
        cluster: String,
        #[arg(long, default_value = "us-east-1")]
        region: String,
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },
    /// Show which slot is live and which one the next deploy targets.
    Resolve {
        /// Service name prefix, e.g. `app-`.
        #[arg(short, long)]
        prefix: String,
    },
    /// Deploy a service manifest with the configured strategy.
    Deploy {
        /// Service manifest (YAML).
        #[arg(short, long)]
        manifest: PathBuf,
        /// Scalable target manifest to register on the new service.
        #[arg(long = "scaling-target")]
        scaling_targets: Vec<PathBuf>,
        /// Scaling policy manifest to register on the new service.
        #[arg(long = "scaling-policy")]
        scaling_policies: Vec<PathBuf>,
        /// Rollout id. Generated from the current time when omitted.
        #[arg(long)]
        rollout_id: Option<String>,
    },
    /// Roll back the latest (or a named) rollout of a prefix.
    Rollback {
        #[arg(short, long)]
        prefix: String,
        #[arg(long)]
        rollout_id: Option<String>,
    },
    /// List recorded rollouts of a prefix, newest last.
    Status {
        #[arg(short, long)]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("slotshift=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let workspace = Workspace {
        config: cli.config,
        world: cli.world,
        state: cli.state,
        format: cli.format,
    };

    match cli.command {
        Commands::Init {
            cluster,
            region,
            force,
        } => commands::init::init(&workspace, &cluster, &region, force),
        Commands::Resolve { prefix } => commands::resolve::resolve(&workspace, &prefix).await,
        Commands::Deploy {
            manifest,
            scaling_targets,
            scaling_policies,
            rollout_id,
        } => {
            commands::deploy::deploy(
                &workspace,
                &manifest,
                &scaling_targets,
                &scaling_policies,
                rollout_id,
            )
            .await
        }
        Commands::Rollback { prefix, rollout_id } => {
            commands::rollback::rollback(&workspace, &prefix, rollout_id.as_deref()).await
        }
        Commands::Status { prefix } => commands::status::status(&workspace, &prefix),
    }
}
