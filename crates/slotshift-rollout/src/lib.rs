//! slotshift rollouts: slot resolution, blue/green cutover, rollback.
//!
//! This crate drives a versioned compute service through a deploy and, on
//! failure, back out again. It talks to the control plane only through the
//! provider traits in `slotshift-core` and records deploy-time facts in the
//! `slotshift-state` ledger.
//!
//! # Components
//!
//! - **`slots`**: picks the active and inactive of two physical slots
//! - **`scaling`**: captures, detaches and replays autoscaling state
//! - **`steady`**: polls a service until running == desired
//! - **`executor`**: create-or-update, stage and canary services
//! - **`traffic`**: listener and rule cutover
//! - **`deploy`**: the end-to-end deploy for each strategy
//! - **`rollback`**: the inverse state machine
//! - **`release`**: rollback of manifest-applied releases
//!
//! ```text
//! Deployer ──▶ SlotResolver ──▶ DeploymentExecutor ──▶ SteadyStateWaiter
//!    │                               │
//!    │                               └──▶ ScalingMigrator
//!    └──▶ TrafficRouter
//!
//! RollbackCoordinator ──▶ TrafficRouter, DeploymentExecutor, ScalingMigrator
//! ```

pub mod context;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod release;
pub mod rollback;
pub mod scaling;
pub mod slots;
pub mod steady;
pub mod traffic;

pub use context::{Providers, RolloutContext, Settings};
pub use deploy::{DeployReport, DeployRequest, Deployer};
pub use error::{RolloutError, RolloutResult};
pub use executor::{DeploymentExecutor, LaunchedService, ScalingManifests, render_definition};
pub use release::{ReleasePlan, ReleaseRollback, ReleaseRollbackPlanner};
pub use rollback::{RenamedService, RollbackCoordinator, RollbackOutcome, RollbackStatus};
pub use scaling::ScalingMigrator;
pub use slots::{SlotResolution, SlotResolver};
pub use steady::{EventCursor, SteadyStateResult, SteadyStateWaiter};
pub use traffic::TrafficRouter;
