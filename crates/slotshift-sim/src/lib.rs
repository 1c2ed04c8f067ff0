//! slotshift-sim: an in-memory control plane.
//!
//! [`SimCloud`] implements every provider interface from `slotshift-core`
//! over one serializable [`World`]: container services with configurable
//! convergence, load balancer listeners and rules with pagination,
//! autoscaling registrations, and Kubernetes releases.
//!
//! # Components
//!
//! - **`world`**: the serializable state and its convergence rules
//! - **`cloud`**: the shared handle, call recording, fault injection, compute API
//! - **`balancer`**: listeners and rules
//! - **`autoscaling`**: scalable targets and policies
//! - **`releases`**: release history and manifest apply/delete
//! - **`stager`**: a credential stager writing fixed files

pub mod autoscaling;
pub mod balancer;
pub mod cloud;
pub mod error;
pub mod fixtures;
pub mod releases;
pub mod stager;
pub mod world;

pub use cloud::{Call, SimCloud};
pub use error::{SimError, SimResult};
pub use stager::StaticCredentials;
pub use world::{Convergence, World};
