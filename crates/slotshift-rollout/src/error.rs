//! Error types for the rollout engine.

use std::time::Duration;

use slotshift_core::{ConfigError, ProviderError};
use slotshift_state::StateError;
use thiserror::Error;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("load balancer with name: {name} is not present")]
    LoadBalancerNotFound { name: String },

    #[error("listener with arn: {listener} is not present in load balancer: {load_balancer}")]
    ListenerNotFound {
        listener: String,
        load_balancer: String,
    },

    #[error("listener rule with arn: {rule} is not present in listener: {listener}")]
    RuleNotFound { rule: String, listener: String },

    #[error("no action is present in listener rule: {rule}")]
    NoForwardAction { rule: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("misconfigured rollout: {0}")]
    Misconfigured(String),

    #[error("service {name} not found")]
    ServiceNotFound { name: String },

    #[error("service {name} is not active; cannot {action}")]
    ServiceNotActive { name: String, action: String },

    #[error("both slots of {prefix} are active; no inactive slot to deploy into")]
    NoInactiveSlot { prefix: String },

    #[error("probe of slot {slot} failed: {source}")]
    SlotProbe {
        slot: String,
        #[source]
        source: ProviderError,
    },

    #[error("service {name} did not reach steady state within {timeout:?}")]
    SteadyStateTimeout { name: String, timeout: Duration },

    #[error("service {name} did not become inactive within {timeout:?}")]
    InactiveTimeout { name: String, timeout: Duration },

    #[error("{action} on {name} cancelled")]
    Cancelled { name: String, action: String },

    #[error("{action} {resource} failed: {source}")]
    Provider {
        action: &'static str,
        resource: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("rollback staging failed: {0}")]
    Staging(String),
}

impl RolloutError {
    /// Closure factory wrapping a provider error with the attempted action.
    pub fn provider(action: &'static str, resource: &str) -> impl FnOnce(ProviderError) -> Self {
        let resource = resource.to_string();
        move |source| Self::Provider {
            action,
            resource,
            source,
        }
    }

    /// Whether the step may converge if retried later.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::SteadyStateTimeout { .. } | Self::InactiveTimeout { .. }
        )
    }
}
