//! Steady-state waiter.
//!
//! Polls a service until its running count matches its desired count,
//! surfacing each provider lifecycle event exactly once. The same loop with
//! a different predicate waits for a deleted service to turn inactive.
//!
//! ```text
//! describe ──▶ emit unseen events (oldest first)
//!    ▲              │
//!    │        running == desired? ──yes──▶ converged
//!    │              │ no
//!    └── sleep ◀── deadline passed? ──yes──▶ timed out
//! ```

use std::collections::HashSet;
use std::time::Duration;

use slotshift_core::{ServiceDescriptor, ServiceEvent, ServiceStatus};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::RolloutContext;
use crate::error::{RolloutError, RolloutResult};

/// Remembers which lifecycle events were already emitted.
#[derive(Debug, Clone, Default)]
pub struct EventCursor {
    seen: HashSet<String>,
}

impl EventCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor that treats `events` as already emitted.
    pub fn seeded(events: &[ServiceEvent]) -> Self {
        let mut cursor = Self::new();
        cursor.seen.extend(events.iter().map(|e| e.id.clone()));
        cursor
    }

    /// Events not seen before, oldest first. Marks them seen.
    pub fn take_new(&mut self, events: &[ServiceEvent]) -> Vec<ServiceEvent> {
        let mut fresh: Vec<ServiceEvent> = events
            .iter()
            .filter(|e| !self.seen.contains(&e.id))
            .cloned()
            .collect();
        // Providers list newest first; ties keep that order reversed.
        fresh.reverse();
        fresh.sort_by_key(|e| e.created_at);
        self.seen.extend(fresh.iter().map(|e| e.id.clone()));
        fresh
    }
}

#[derive(Debug, Clone)]
pub struct SteadyStateResult {
    pub converged: bool,
    pub observed_events: Vec<ServiceEvent>,
    /// Last successful describe, if any.
    pub service: Option<ServiceDescriptor>,
}

pub struct SteadyStateWaiter<'a> {
    ctx: &'a RolloutContext,
}

impl<'a> SteadyStateWaiter<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx }
    }

    /// Poll until steady or `timeout` elapses. Only cancellation is an error.
    pub async fn poll(
        &self,
        name: &str,
        timeout: Duration,
        cursor: &mut EventCursor,
    ) -> RolloutResult<SteadyStateResult> {
        let deadline = Instant::now() + timeout;
        let mut observed = Vec::new();
        let mut last = None;

        self.ctx
            .log
            .info(&format!("Waiting for service {name} to reach steady state"));

        loop {
            match self.ctx.providers.compute.describe_service(name).await {
                Ok(Some(service)) => {
                    self.emit(cursor.take_new(&service.events), &mut observed);
                    self.ctx.log.info(&format!(
                        "Service {name}: desired {}, running {}, pending {}",
                        service.desired_count, service.running_count, service.pending_count
                    ));
                    let steady = service.is_active() && service.is_steady();
                    last = Some(service);
                    if steady {
                        info!(service = %name, "steady state reached");
                        self.ctx
                            .log
                            .info(&format!("Service {name} reached steady state"));
                        return Ok(SteadyStateResult {
                            converged: true,
                            observed_events: observed,
                            service: last,
                        });
                    }
                }
                Ok(None) => {
                    debug!(service = %name, "service not visible yet");
                }
                Err(e) => {
                    warn!(
                        service = %name,
                        error = %e,
                        transient = e.is_transient(),
                        "describe failed while polling"
                    );
                    self.ctx
                        .log
                        .warn(&format!("Failed to describe service {name}: {e}. Retrying"));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(service = %name, ?timeout, "steady state not reached");
                return Ok(SteadyStateResult {
                    converged: false,
                    observed_events: observed,
                    service: last,
                });
            }
            let interval = self.ctx.settings.poll_interval.min(deadline - now);
            self.ctx.pause(interval, name, "steady-state wait").await?;
        }
    }

    /// Like [`poll`](Self::poll), but a timeout is an error.
    pub async fn await_steady_state(
        &self,
        name: &str,
        timeout: Duration,
        cursor: &mut EventCursor,
    ) -> RolloutResult<SteadyStateResult> {
        let result = self.poll(name, timeout, cursor).await?;
        if !result.converged {
            self.ctx.log.error(&format!(
                "Service {name} did not reach steady state within {timeout:?}"
            ));
            return Err(RolloutError::SteadyStateTimeout {
                name: name.to_string(),
                timeout,
            });
        }
        Ok(result)
    }

    /// Wait until `name` is gone or INACTIVE.
    pub async fn await_inactive(&self, name: &str, timeout: Duration) -> RolloutResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.ctx.providers.compute.describe_service(name).await {
                Ok(None) => return Ok(()),
                Ok(Some(service)) if service.status == ServiceStatus::Inactive => {
                    self.ctx
                        .log
                        .info(&format!("Service {name} is inactive"));
                    return Ok(());
                }
                Ok(Some(service)) => {
                    debug!(service = %name, status = ?service.status, "waiting for inactive");
                }
                Err(e) => {
                    warn!(
                        service = %name,
                        error = %e,
                        "describe failed while waiting for inactive"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RolloutError::InactiveTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
            let interval = self.ctx.settings.poll_interval.min(deadline - now);
            self.ctx.pause(interval, name, "inactive wait").await?;
        }
    }

    fn emit(&self, events: Vec<ServiceEvent>, observed: &mut Vec<ServiceEvent>) {
        for event in events {
            self.ctx
                .log
                .info(&format!("# Event: {} {}", event.created_at, event.message));
            observed.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use slotshift_core::{ComputeProvider, LogLevel, ServiceDefinition};
    use slotshift_sim::fixtures::service;
    use slotshift_sim::{Convergence, World};
    use tokio::sync::watch;

    fn event(id: &str, at: u64) -> ServiceEvent {
        ServiceEvent {
            id: id.to_string(),
            created_at: at,
            message: format!("message {id}"),
        }
    }

    fn definition(name: &str, count: u32) -> ServiceDefinition {
        ServiceDefinition {
            service_name: name.to_string(),
            task_definition: Some("app:2".to_string()),
            desired_count: Some(count),
            tags: vec![],
            load_balancers: vec![],
            routes: vec![],
        }
    }

    #[test]
    fn cursor_emits_each_event_once_oldest_first() {
        let mut cursor = EventCursor::seeded(&[event("e1", 1)]);
        let newest_first = vec![event("e3", 3), event("e2", 2), event("e1", 1)];
        let fresh = cursor.take_new(&newest_first);
        let ids: Vec<_> = fresh.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
        assert!(cursor.take_new(&newest_first).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gradual_service_converges() {
        let mut world = World::new("prod", "us-east-1");
        world.default_convergence = Convergence::Gradual;
        let (ctx, sim, log) = testing::context(world);
        let created = sim.create_service(&definition("app-2", 3)).await.unwrap();

        let mut cursor = EventCursor::seeded(&created.events);
        let result = SteadyStateWaiter::new(&ctx)
            .await_steady_state("app-2", Duration::from_secs(600), &mut cursor)
            .await
            .unwrap();
        assert!(result.converged);
        assert_eq!(result.service.unwrap().running_count, 3);

        // "was created" was seeded, so only progress events were emitted.
        let messages: Vec<_> = result.observed_events.iter().map(|e| e.message.clone()).collect();
        assert!(messages.iter().all(|m| !m.contains("was created")));
        assert!(messages.last().unwrap().contains("steady state"));
        assert!(log.contains(LogLevel::Info, "reached steady state"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_service_times_out() {
        let (ctx, sim, _) = testing::context(World::new("prod", "us-east-1"));
        sim.set_convergence("app-2", Convergence::Stuck);
        sim.create_service(&definition("app-2", 3)).await.unwrap();

        let start = Instant::now();
        let err = SteadyStateWaiter::new(&ctx)
            .await_steady_state("app-2", Duration::from_secs(60), &mut EventCursor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::SteadyStateTimeout { .. }));
        assert!(start.elapsed() >= Duration::from_secs(60));
        // One describe per 10s interval plus the initial one.
        assert_eq!(sim.calls_to("describe_service").len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let mut world = World::new("prod", "us-east-1");
        world.services.push(service("app-1", "arn:app-1", 2, None));
        let (ctx, sim, log) = testing::context(world);
        sim.fail_describe("app-1", 2);

        let result = SteadyStateWaiter::new(&ctx)
            .poll("app-1", Duration::from_secs(60), &mut EventCursor::new())
            .await
            .unwrap();
        assert!(result.converged);
        assert!(log.contains(LogLevel::Warn, "Retrying"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_wait() {
        let (tx, rx) = watch::channel(false);
        let (ctx, sim, _) = testing::context(World::new("prod", "us-east-1"));
        let ctx = ctx.with_cancel(rx);
        sim.set_convergence("app-2", Convergence::Stuck);
        sim.create_service(&definition("app-2", 1)).await.unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            let _ = tx.send(true);
        });
        let err = SteadyStateWaiter::new(&ctx)
            .poll("app-2", Duration::from_secs(600), &mut EventCursor::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_inactive() {
        let mut world = World::new("prod", "us-east-1");
        world.services.push(service("app-1", "arn:app-1", 2, None));
        let (ctx, sim, _) = testing::context(world);
        sim.delete_service("app-1").await.unwrap();

        let waiter = SteadyStateWaiter::new(&ctx);
        waiter
            .await_inactive("app-1", Duration::from_secs(60))
            .await
            .unwrap();
        waiter
            .await_inactive("never-existed", Duration::from_secs(60))
            .await
            .unwrap();
    }
}
