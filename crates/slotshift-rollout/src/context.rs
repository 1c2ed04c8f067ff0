//! Per-invocation context shared by every rollout component.
//!
//! A [`RolloutContext`] bundles the provider handles, the operator log, the
//! resolved settings, and an optional cancellation signal. Components borrow
//! it; nothing in here is global.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use slotshift_core::{
    AutoscalingProvider, ComputeProvider, ConfigError, ExecutionLog, LoadBalancerConfig,
    LoadBalancerProvider, NamingTransition, ProbePolicy, RolloutConfig, RolloutStrategy,
};
use tokio::sync::watch;

use crate::error::{RolloutError, RolloutResult};

/// Handles to the control-plane APIs.
#[derive(Clone)]
pub struct Providers {
    pub compute: Arc<dyn ComputeProvider>,
    pub balancer: Arc<dyn LoadBalancerProvider>,
    pub autoscaling: Arc<dyn AutoscalingProvider>,
}

impl Providers {
    /// Use one implementation for every API.
    pub fn from_one<P>(provider: P) -> Self
    where
        P: ComputeProvider + LoadBalancerProvider + AutoscalingProvider + Clone + 'static,
    {
        Self {
            compute: Arc::new(provider.clone()),
            balancer: Arc::new(provider.clone()),
            autoscaling: Arc::new(provider),
        }
    }
}

/// Validated settings with durations already parsed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cluster: String,
    pub region: String,
    pub strategy: RolloutStrategy,
    pub steady_state_timeout: Duration,
    pub poll_interval: Duration,
    pub probe_policy: ProbePolicy,
    pub delimiter: String,
    pub load_balancer: Option<LoadBalancerConfig>,
    pub naming: NamingTransition,
}

impl Settings {
    pub fn from_config(config: &RolloutConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            cluster: config.cluster.clone(),
            region: config.region.clone(),
            strategy: config.strategy.clone(),
            steady_state_timeout: config.steady_state_timeout()?,
            poll_interval: config.poll_interval()?,
            probe_policy: config.slots.probe_policy,
            delimiter: config.slots.delimiter.clone(),
            load_balancer: config.load_balancer.clone(),
            naming: config.naming.transition,
        })
    }
}

pub struct RolloutContext {
    pub providers: Providers,
    pub log: Arc<dyn ExecutionLog>,
    pub settings: Settings,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl RolloutContext {
    pub fn new(providers: Providers, log: Arc<dyn ExecutionLog>, settings: Settings) -> Self {
        Self {
            providers,
            log,
            settings,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sleep for `duration`, returning early with `Cancelled` if the
    /// cancellation signal flips to `true`.
    pub async fn pause(&self, duration: Duration, name: &str, action: &str) -> RolloutResult<()> {
        let cancelled = || RolloutError::Cancelled {
            name: name.to_string(),
            action: action.to_string(),
        };
        let Some(mut cancel) = self.cancel.clone() else {
            tokio::time::sleep(duration).await;
            return Ok(());
        };
        if *cancel.borrow() {
            return Err(cancelled());
        }

        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = cancel.changed() => match changed {
                    Ok(()) if *cancel.borrow() => return Err(cancelled()),
                    Ok(()) => continue,
                    // Sender dropped: nobody can cancel any more.
                    Err(_) => {
                        (&mut sleep).await;
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use slotshift_core::MemoryLog;
    use slotshift_sim::{SimCloud, World};

    pub fn settings() -> Settings {
        Settings {
            cluster: "prod".to_string(),
            region: "us-east-1".to_string(),
            strategy: RolloutStrategy::default(),
            steady_state_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(10),
            probe_policy: ProbePolicy::Lenient,
            delimiter: "__".to_string(),
            load_balancer: None,
            naming: NamingTransition::default(),
        }
    }

    pub fn context(world: World) -> (RolloutContext, SimCloud, Arc<MemoryLog>) {
        let sim = SimCloud::new(world);
        let log = Arc::new(MemoryLog::new());
        let ctx = RolloutContext::new(Providers::from_one(sim.clone()), log.clone(), settings());
        (ctx, sim, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotshift_sim::World;

    #[tokio::test(start_paused = true)]
    async fn pause_without_signal_sleeps() {
        let (ctx, _, _) = testing::context(World::new("prod", "us-east-1"));
        let start = tokio::time::Instant::now();
        ctx.pause(Duration::from_secs(10), "app-1", "wait").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_observes_cancellation() {
        let (tx, rx) = watch::channel(false);
        let (ctx, _, _) = testing::context(World::new("prod", "us-east-1"));
        let ctx = ctx.with_cancel(rx);

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            let _ = tx.send(true);
        });
        let err = ctx
            .pause(Duration::from_secs(10), "app-2", "steady-state wait")
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled { .. }));
        cancel.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_still_sleeps() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let (ctx, _, _) = testing::context(World::new("prod", "us-east-1"));
        let ctx = ctx.with_cancel(rx);
        let start = tokio::time::Instant::now();
        ctx.pause(Duration::from_secs(5), "app-1", "wait").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn settings_from_config() {
        let config = RolloutConfig::scaffold("prod", "us-east-1");
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.strategy.name(), "blue_green");
        assert!(settings.load_balancer.is_some());
    }

    #[test]
    fn settings_reject_zero_poll_interval() {
        let mut config = RolloutConfig::scaffold("prod", "us-east-1");
        config.timeouts.poll_interval = "0ms".to_string();
        let err = Settings::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { .. }));
    }
}
