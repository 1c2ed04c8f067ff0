//! End-to-end rollout scenarios.
//!
//! Each scenario runs a full deploy and/or rollback against the simulated
//! control plane with an in-memory ledger. Polling runs on a paused clock, so
//! multi-minute steady-state timeouts finish instantly.

use std::sync::Arc;

use slotshift_core::{
    ComputeProvider, LogLevel, MemoryLog, RecordStatus, RolloutConfig, ScalableTarget,
    ScalingPolicy, ServiceStatus, VersionTag,
};
use slotshift_rollout::{
    DeployRequest, Deployer, Providers, RollbackCoordinator, RollbackStatus, RolloutContext,
    ScalingManifests, Settings, SlotResolver,
};
use slotshift_sim::fixtures::{listener, load_balancer, rule, service};
use slotshift_sim::{Convergence, SimCloud, World};
use slotshift_state::RolloutLedger;

const CONFIG: &str = r#"
cluster = "prod"
region = "us-east-1"

[strategy]
type = "blue_green"

[timeouts]
steady_state = "5m"
poll_interval = "10s"

[slots]
delimiter = "-"

[load_balancer]
name = "app-lb"
prod_listener = "listener-prod"
prod_rule = "rule-123"
stage_listener = "listener-stage"
stage_rule = "default-stage"
"#;

const MANIFEST: &str = r#"
serviceName: app
taskDefinition: app:8
desiredCount: 3
loadBalancers:
  - targetGroupArn: <+targetGroupArn>
    containerName: web
    containerPort: 8080
"#;

const TARGET: &str = "minCapacity: 3\nmaxCapacity: 12\n";
const POLICY: &str = r#"
policyName: cpu50
targetTrackingScalingPolicyConfiguration:
  targetValue: 50.0
"#;

struct Harness {
    ctx: RolloutContext,
    sim: SimCloud,
    log: Arc<MemoryLog>,
    ledger: RolloutLedger,
}

/// Slot 1 is live with three tasks and autoscaling; prod traffic goes to tg-1.
fn world() -> World {
    let mut world = World::new("prod", "us-east-1");
    world.load_balancers.push(load_balancer("app-lb"));
    world
        .listeners
        .push(listener("listener-prod", "arn:lb/app-lb", "tg-default"));
    world
        .listeners
        .push(listener("listener-stage", "arn:lb/app-lb", "tg-2"));
    world
        .rules
        .push(rule("default-prod", "listener-prod", "tg-default", true));
    world
        .rules
        .push(rule("rule-123", "listener-prod", "tg-1", false));
    world
        .rules
        .push(rule("default-stage", "listener-stage", "tg-2", true));
    world
        .services
        .push(service("app-1", "arn:app-1", 3, Some(VersionTag::Blue)));

    let target = ScalableTarget::from_yaml(TARGET)
        .unwrap()
        .with_resource_id("service/prod/app-1");
    let policy = ScalingPolicy::from_yaml(POLICY)
        .unwrap()
        .with_resource_id("service/prod/app-1");
    world.scalable_targets.push(target);
    world.scaling_policies.push(policy);
    world
}

fn harness(world: World) -> Harness {
    let config = RolloutConfig::parse(CONFIG).unwrap();
    let settings = Settings::from_config(&config).unwrap();
    let sim = SimCloud::new(world);
    let log = Arc::new(MemoryLog::new());
    let ctx = RolloutContext::new(Providers::from_one(sim.clone()), log.clone(), settings);
    Harness {
        ctx,
        sim,
        log,
        ledger: RolloutLedger::open_in_memory().unwrap(),
    }
}

fn request(rollout_id: &str) -> DeployRequest {
    DeployRequest {
        rollout_id: rollout_id.to_string(),
        manifest: MANIFEST.to_string(),
        scaling: ScalingManifests::default(),
    }
}

fn target_of(sim: &SimCloud, rule_arn: &str) -> String {
    sim.world()
        .rules
        .into_iter()
        .find(|r| r.arn == rule_arn)
        .and_then(|r| r.actions[0].target_group_arn.clone())
        .unwrap()
}

fn targets_for(sim: &SimCloud, resource_id: &str) -> usize {
    sim.world()
        .scalable_targets
        .iter()
        .filter(|t| t.resource_id == resource_id)
        .count()
}

#[tokio::test(start_paused = true)]
async fn blue_green_deploy_moves_traffic_to_slot_two() {
    let h = harness(world());

    let report = Deployer::new(&h.ctx)
        .with_ledger(&h.ledger)
        .deploy(&request("r1"))
        .await
        .unwrap();

    assert_eq!(report.handle.name, "app-2");
    assert_eq!(report.handle.region, "us-east-1");

    // Prod rule now forwards to the stage target group and vice versa.
    assert_eq!(target_of(&h.sim, "rule-123"), "tg-2");
    assert_eq!(target_of(&h.sim, "default-stage"), "tg-1");
    assert_eq!(h.sim.calls_to("modify_rule").len(), 1);
    assert_eq!(h.sim.calls_to("modify_listener").len(), 1);

    let new = h.sim.service("app-2").unwrap();
    assert_eq!(new.version_tag(), Some(VersionTag::Blue));
    assert_eq!(new.running_count, 3);

    let old = h.sim.service("app-1").unwrap();
    assert_eq!(old.version_tag(), Some(VersionTag::Green));
    assert_eq!(old.desired_count, 0);
    assert_eq!(targets_for(&h.sim, "service/prod/app-1"), 0);

    let record = h.ledger.get_record("app-", "r1").unwrap().unwrap();
    let previous = record.rollback.previous_active.unwrap();
    assert!(previous.downsized);
    assert_eq!(previous.initial_instance_count, 3);
    assert_eq!(previous.scaling.unwrap().policy_count(), 1);
    assert!(h.ledger.get_snapshot("r1", "app-1").unwrap().is_some());
    assert_eq!(record.rollback.new_version.id, new.id);

    // The next deploy targets slot 1 again.
    let next = SlotResolver::new(&h.ctx)
        .resolve_inactive_slot("app-")
        .await
        .unwrap();
    assert_eq!(next.resolved_name, "app-1");
}

#[tokio::test(start_paused = true)]
async fn rollback_after_cutover_restores_slot_one() {
    let h = harness(world());
    let report = Deployer::new(&h.ctx)
        .with_ledger(&h.ledger)
        .deploy(&request("r1"))
        .await
        .unwrap();
    let new_id = report.handle.id.clone();
    h.sim.clear_calls();

    let record = h.ledger.latest_record("app-").unwrap().unwrap();
    let outcome = RollbackCoordinator::new(&h.ctx)
        .rollback(record.rollback)
        .await;
    assert_eq!(outcome.status, RollbackStatus::Completed, "{:?}", outcome.error);
    h.ledger
        .set_status("app-", "r1", outcome.status.record_status())
        .unwrap();

    assert_eq!(target_of(&h.sim, "rule-123"), "tg-1");
    assert_eq!(target_of(&h.sim, "default-stage"), "tg-2");

    let old = h.sim.service("app-1").unwrap();
    assert_eq!(old.desired_count, 3);
    assert_eq!(old.version_tag(), Some(VersionTag::Blue));
    assert_eq!(targets_for(&h.sim, "service/prod/app-1"), 1);
    assert_eq!(targets_for(&h.sim, "service/prod/app-2"), 0);

    let deleted = h
        .sim
        .world()
        .services
        .into_iter()
        .find(|s| s.id == new_id)
        .unwrap();
    assert_eq!(deleted.status, ServiceStatus::Inactive);
    assert!(h.sim.calls_to("rename_service").is_empty());
    assert!(outcome.updated_names.is_empty());
    assert_eq!(
        h.ledger.latest_record("app-").unwrap().unwrap().status,
        RecordStatus::RolledBack
    );
}

#[tokio::test(start_paused = true)]
async fn rollback_leaves_untagged_slot_untagged() {
    let mut world = world();
    world.services[0].tags.clear();
    let h = harness(world);

    Deployer::new(&h.ctx)
        .with_ledger(&h.ledger)
        .deploy(&request("r1"))
        .await
        .unwrap();
    assert_eq!(
        h.sim.service("app-1").unwrap().version_tag(),
        Some(VersionTag::Green)
    );

    let record = h.ledger.latest_record("app-").unwrap().unwrap();
    let outcome = RollbackCoordinator::new(&h.ctx)
        .rollback(record.rollback)
        .await;
    assert_eq!(outcome.status, RollbackStatus::Completed, "{:?}", outcome.error);
    assert_eq!(h.sim.service("app-1").unwrap().version_tag(), None);

    // Slot 1 still counts as live, so the next deploy must not replace it.
    let next = SlotResolver::new(&h.ctx)
        .resolve_inactive_slot("app-")
        .await
        .unwrap();
    assert_eq!(next.resolved_name, "app-2");

    h.sim.clear_calls();
    Deployer::new(&h.ctx)
        .with_ledger(&h.ledger)
        .deploy(&request("r2"))
        .await
        .unwrap();
    let old = h.sim.service("app-1").unwrap();
    assert_eq!(old.id, "arn:app-1");
    assert_eq!(old.status, ServiceStatus::Active);
    assert!(
        h.sim
            .calls_to("delete_service")
            .iter()
            .all(|c| c.target != "app-1")
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_deploy_rolls_back_by_id() {
    let h = harness(world());
    h.sim.set_convergence("app-2", Convergence::Stuck);

    let err = Deployer::new(&h.ctx)
        .with_ledger(&h.ledger)
        .deploy(&request("r1"))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(h.log.contains(LogLevel::Error, "did not reach steady state"));
    // No cutover happened.
    assert_eq!(target_of(&h.sim, "rule-123"), "tg-1");

    let record = h.ledger.latest_record("app-").unwrap().unwrap();
    let stuck_id = record.rollback.new_version.id.clone();
    h.sim.clear_calls();

    let outcome = RollbackCoordinator::new(&h.ctx)
        .rollback(record.rollback)
        .await;
    assert_eq!(outcome.status, RollbackStatus::Completed, "{:?}", outcome.error);

    // Slot 1 never changed name and keeps its capacity and scaling.
    let old = h.sim.service("app-1").unwrap();
    assert_eq!(old.desired_count, 3);
    assert_eq!(old.id, "arn:app-1");
    assert_eq!(targets_for(&h.sim, "service/prod/app-1"), 1);
    assert!(h.sim.calls_to("rename_service").is_empty());
    assert!(h.sim.calls_to("modify_rule").is_empty());

    let deletes: Vec<_> = h
        .sim
        .calls_to("delete_service")
        .into_iter()
        .map(|c| c.target)
        .collect();
    assert_eq!(deletes, vec!["app-2".to_string()]);
    let stuck = h
        .sim
        .world()
        .services
        .into_iter()
        .find(|s| s.id == stuck_id)
        .unwrap();
    assert_eq!(stuck.status, ServiceStatus::Inactive);
}

#[tokio::test(start_paused = true)]
async fn rollback_is_safe_to_repeat() {
    let h = harness(world());
    Deployer::new(&h.ctx)
        .with_ledger(&h.ledger)
        .deploy(&request("r1"))
        .await
        .unwrap();
    let record = h.ledger.latest_record("app-").unwrap().unwrap();

    let coordinator = RollbackCoordinator::new(&h.ctx);
    let first = coordinator.rollback(record.rollback.clone()).await;
    assert_eq!(first.status, RollbackStatus::Completed);
    h.sim.clear_calls();

    let second = coordinator.rollback(record.rollback).await;
    assert_eq!(second.status, RollbackStatus::Completed, "{:?}", second.error);
    assert!(h.sim.calls_to("modify_rule").is_empty());
    assert!(h.sim.calls_to("modify_listener").is_empty());
    assert!(h.sim.calls_to("delete_service").is_empty());
    assert!(h.log.contains(LogLevel::Info, "nothing to delete"));
}

#[tokio::test(start_paused = true)]
async fn stale_stage_service_is_replaced() {
    let mut world = world();
    world
        .services
        .push(service("app-2", "arn:stale", 1, Some(VersionTag::Green)));
    let h = harness(world);

    let report = Deployer::new(&h.ctx).deploy(&request("r1")).await.unwrap();
    assert_eq!(report.handle.name, "app-2");
    assert_ne!(report.handle.id, "arn:stale");

    let stale = h
        .sim
        .world()
        .services
        .into_iter()
        .find(|s| s.id == "arn:stale")
        .unwrap();
    assert_eq!(stale.status, ServiceStatus::Inactive);
}

#[tokio::test(start_paused = true)]
async fn cutover_fails_cleanly_on_missing_rule() {
    let mut world = world();
    world.rules.retain(|r| r.arn != "rule-123");
    let h = harness(world);

    let err = Deployer::new(&h.ctx).deploy(&request("r1")).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "listener rule with arn: rule-123 is not present in listener: listener-prod"
    );
    // Nothing was created before the lookup failed.
    assert!(h.sim.calls_to("create_service").is_empty());
    let slot_two = h.sim.describe_service("app-2").await.unwrap();
    assert!(slot_two.is_none());
}
