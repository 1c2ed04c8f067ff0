//! Shared vocabulary for the slotshift rollout engine.
//!
//! Everything the rollout components exchange lives here: the service and
//! traffic data model, auto-scaling descriptors, rollback records, the
//! provider interfaces the engine drives, the operator-facing execution log,
//! and `slotshift.toml` parsing.
//!
//! # Architecture
//!
//! ```text
//! slotshift-rollout ──uses──▶ ComputeProvider / LoadBalancerProvider /
//!                             AutoscalingProvider / ManifestApplier
//!                    ──logs──▶ ExecutionLog
//!                    ──reads─▶ RolloutConfig
//! ```
//!
//! Providers are the sole source of truth. Every type in this crate is a
//! disposable local copy of provider state owned by one invocation.

pub mod config;
pub mod error;
pub mod log;
pub mod provider;
pub mod scaling;
pub mod strategy;
pub mod types;

pub use config::{
    LoadBalancerConfig, NamingConfig, ProbePolicy, RolloutConfig, SlotsConfig, TimeoutsConfig,
    parse_duration,
};
pub use error::{ConfigError, ProviderError, ProviderResult};
pub use log::{ExecutionLog, LogLevel, LogLine, MemoryLog, TracingLog};
pub use provider::{
    AutoscalingProvider, ComputeProvider, CredentialStager, LoadBalancerProvider, ManifestApplier,
    Page,
};
pub use scaling::{
    ScalableTarget, ScalingEntry, ScalingPolicy, ScalingSnapshot, scaling_resource_id,
};
pub use strategy::{BlueGreenConfig, CanaryConfig, RollingConfig, RolloutStrategy};
pub use types::*;
