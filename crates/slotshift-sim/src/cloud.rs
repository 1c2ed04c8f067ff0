//! SimCloud: a shared handle to a simulated [`World`].
//!
//! Every provider call is recorded in order so tests can assert exactly
//! which mutations a rollout step performed. Faults can be injected per
//! service (failing describes) or per operation (one-shot errors).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use slotshift_core::{
    ComputeProvider, ProviderError, ProviderResult, ServiceDefinition, ServiceDescriptor,
    ServiceStatus, ServiceUpdate, Tag,
};
use tracing::debug;

use crate::world::{Convergence, World};

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: String,
    pub target: String,
}

#[derive(Debug, Default)]
struct Faults {
    /// Remaining failing describes per service name.
    describe: BTreeMap<String, u32>,
    /// One-shot errors keyed by operation name.
    once: BTreeMap<String, ProviderError>,
}

pub(crate) struct Inner {
    pub(crate) world: World,
    calls: Vec<Call>,
    faults: Faults,
}

impl Inner {
    /// Record a call and surface any injected one-shot fault for it.
    pub(crate) fn enter(&mut self, op: &str, target: &str) -> ProviderResult<()> {
        debug!(op, target, "sim call");
        self.calls.push(Call {
            op: op.to_string(),
            target: target.to_string(),
        });
        match self.faults.once.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn live_index(&self, name: &str) -> ProviderResult<usize> {
        self.world
            .services
            .iter()
            .position(|s| s.name == name && s.status == ServiceStatus::Active)
            .ok_or_else(|| ProviderError::NotFound(format!("service {name}")))
    }

    fn index_by_id(&self, id: &str) -> ProviderResult<usize> {
        self.world
            .services
            .iter()
            .position(|s| s.id == id && s.status != ServiceStatus::Inactive)
            .ok_or_else(|| ProviderError::NotFound(format!("service id {id}")))
    }
}

/// Cloneable handle over one simulated world.
#[derive(Clone)]
pub struct SimCloud {
    inner: Arc<Mutex<Inner>>,
}

impl SimCloud {
    pub fn new(world: World) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                world,
                calls: Vec::new(),
                faults: Faults::default(),
            })),
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock().expect("world lock");
        f(&mut inner)
    }

    /// Copy of the current world.
    pub fn world(&self) -> World {
        self.with(|inner| inner.world.clone())
    }

    pub fn update_world(&self, f: impl FnOnce(&mut World)) {
        self.with(|inner| f(&mut inner.world));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with(|inner| inner.calls.clone())
    }

    /// Calls to a single operation, in order.
    pub fn calls_to(&self, op: &str) -> Vec<Call> {
        self.with(|inner| inner.calls.iter().filter(|c| c.op == op).cloned().collect())
    }

    pub fn clear_calls(&self) {
        self.with(|inner| inner.calls.clear());
    }

    /// Make the next `times` describes of `name` fail with a transport error.
    pub fn fail_describe(&self, name: &str, times: u32) {
        self.with(|inner| {
            inner.faults.describe.insert(name.to_string(), times);
        });
    }

    /// Fail the next call to `op` with `err`.
    pub fn fail_once(&self, op: &str, err: ProviderError) {
        self.with(|inner| {
            inner.faults.once.insert(op.to_string(), err);
        });
    }

    pub fn set_convergence(&self, name: &str, mode: Convergence) {
        self.with(|inner| {
            inner.world.convergence.insert(name.to_string(), mode);
        });
    }

    /// Current state of a service without advancing convergence.
    pub fn service(&self, name: &str) -> Option<ServiceDescriptor> {
        self.with(|inner| {
            inner
                .world
                .find_service(name)
                .map(|i| inner.world.services[i].clone())
        })
    }
}

#[async_trait]
impl ComputeProvider for SimCloud {
    async fn describe_service(&self, name: &str) -> ProviderResult<Option<ServiceDescriptor>> {
        self.with(|inner| {
            inner.enter("describe_service", name)?;
            if let Some(left) = inner.faults.describe.get_mut(name)
                && *left > 0
            {
                *left -= 1;
                return Err(ProviderError::Transport(format!(
                    "describe of {name} timed out"
                )));
            }
            let Some(index) = inner.world.find_service(name) else {
                return Ok(None);
            };
            inner.world.advance(index);
            Ok(Some(inner.world.services[index].clone()))
        })
    }

    async fn create_service(
        &self,
        definition: &ServiceDefinition,
    ) -> ProviderResult<ServiceDescriptor> {
        let name = definition.service_name.clone();
        self.with(|inner| {
            inner.enter("create_service", &name)?;
            let world = &mut inner.world;
            if world
                .services
                .iter()
                .any(|s| s.name == name && s.status != ServiceStatus::Inactive)
            {
                return Err(ProviderError::Rejected(format!(
                    "service {name} already exists"
                )));
            }

            let serial = world.fresh_id("svc");
            let created_at = world.tick();
            let service = ServiceDescriptor {
                name: name.clone(),
                id: format!("arn:{}:service/{}/{serial}", world.region, world.cluster),
                status: ServiceStatus::Active,
                desired_count: definition.desired_count.unwrap_or(1),
                running_count: 0,
                pending_count: 0,
                task_definition: definition.task_definition.clone(),
                tags: definition.tags.clone(),
                events: Vec::new(),
                routes: definition.routes.clone(),
                created_at,
            };
            world.services.push(service);
            let index = world.services.len() - 1;
            world.push_event(index, format!("(service {name}) was created."));
            if world.convergence_of(&name) == Convergence::Instant {
                world.advance(index);
            }
            Ok(world.services[index].clone())
        })
    }

    async fn update_service(&self, update: &ServiceUpdate) -> ProviderResult<ServiceDescriptor> {
        let name = update.service_name.clone();
        self.with(|inner| {
            inner.enter("update_service", &name)?;
            let index = inner.live_index(&name)?;
            let world = &mut inner.world;
            let svc = &mut world.services[index];
            let redeploy = update.force_new_deployment
                || (update.task_definition.is_some()
                    && update.task_definition != svc.task_definition);
            if let Some(task) = &update.task_definition {
                svc.task_definition = Some(task.clone());
            }
            if let Some(count) = update.desired_count {
                svc.desired_count = count;
            }
            if redeploy {
                world.push_event(index, format!("(service {name}) started a new deployment."));
            }
            if world.convergence_of(&name) == Convergence::Instant {
                world.advance(index);
            }
            Ok(world.services[index].clone())
        })
    }

    async fn delete_service(&self, name: &str) -> ProviderResult<ServiceDescriptor> {
        self.with(|inner| {
            inner.enter("delete_service", name)?;
            let index = inner.live_index(name)?;
            let svc = &mut inner.world.services[index];
            svc.status = ServiceStatus::Draining;
            svc.desired_count = 0;
            Ok(svc.clone())
        })
    }

    async fn list_services(&self, prefix: &str) -> ProviderResult<Vec<ServiceDescriptor>> {
        self.with(|inner| {
            inner.enter("list_services", prefix)?;
            Ok(inner
                .world
                .services
                .iter()
                .filter(|s| s.name.starts_with(prefix))
                .cloned()
                .collect())
        })
    }

    async fn list_tasks(&self, name: &str) -> ProviderResult<Vec<String>> {
        self.with(|inner| {
            inner.enter("list_tasks", name)?;
            let Some(index) = inner.world.find_service(name) else {
                return Ok(Vec::new());
            };
            let svc = &inner.world.services[index];
            Ok((0..svc.running_count)
                .map(|i| format!("{}/task-{i}", svc.id))
                .collect())
        })
    }

    async fn tag_resource(&self, resource_id: &str, tags: &[Tag]) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("tag_resource", resource_id)?;
            let index = inner.index_by_id(resource_id)?;
            let svc = &mut inner.world.services[index];
            for tag in tags {
                svc.tags.retain(|t| t.key != tag.key);
                svc.tags.push(tag.clone());
            }
            Ok(())
        })
    }

    async fn untag_resource(&self, resource_id: &str, keys: &[String]) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("untag_resource", resource_id)?;
            let index = inner.index_by_id(resource_id)?;
            inner.world.services[index]
                .tags
                .retain(|t| !keys.contains(&t.key));
            Ok(())
        })
    }

    async fn rename_service(&self, id: &str, new_name: &str) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("rename_service", id)?;
            let index = inner.index_by_id(id)?;
            let taken = inner.world.services.iter().any(|s| {
                s.name == new_name && s.id != id && s.status != ServiceStatus::Inactive
            });
            if taken {
                return Err(ProviderError::Rejected(format!(
                    "name {new_name} is already in use"
                )));
            }
            inner.world.services[index].name = new_name.to_string();
            Ok(())
        })
    }

    async fn map_routes(&self, name: &str, routes: &[String]) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("map_routes", name)?;
            let index = inner.live_index(name)?;
            let svc = &mut inner.world.services[index];
            for route in routes {
                if !svc.routes.contains(route) {
                    svc.routes.push(route.clone());
                }
            }
            Ok(())
        })
    }

    async fn unmap_routes(&self, name: &str, routes: &[String]) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("unmap_routes", name)?;
            let index = inner.live_index(name)?;
            inner.world.services[index]
                .routes
                .retain(|r| !routes.contains(r));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::service;
    use slotshift_core::{BG_VERSION_TAG, VersionTag};

    fn cloud() -> SimCloud {
        let mut world = World::new("prod", "us-east-1");
        world
            .services
            .push(service("app-1", "arn:app-1", 3, Some(VersionTag::Blue)));
        SimCloud::new(world)
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

    #[tokio::test]
    async fn create_then_describe_converges() {
        let sim = cloud();
        let created = sim.create_service(&definition("app-2", 3)).await.unwrap();
        assert_eq!(created.running_count, 3);
        assert!(created.id.contains("svc-"));

        let err = sim.create_service(&definition("app-2", 3)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }

    #[tokio::test]
    async fn stuck_service_never_converges() {
        let sim = cloud();
        sim.set_convergence("app-2", Convergence::Stuck);
        sim.create_service(&definition("app-2", 3)).await.unwrap();
        for _ in 0..3 {
            let svc = sim.describe_service("app-2").await.unwrap().unwrap();
            assert_eq!(svc.running_count, 0);
        }
    }

    #[tokio::test]
    async fn delete_drains_then_inactive() {
        let sim = cloud();
        let svc = sim.delete_service("app-1").await.unwrap();
        assert_eq!(svc.status, ServiceStatus::Draining);
        let svc = sim.describe_service("app-1").await.unwrap().unwrap();
        assert_eq!(svc.status, ServiceStatus::Inactive);
        assert!(sim.delete_service("app-1").await.is_err());
    }

    #[tokio::test]
    async fn describe_faults_then_recovers() {
        let sim = cloud();
        sim.fail_describe("app-1", 2);
        assert!(sim.describe_service("app-1").await.is_err());
        assert!(sim.describe_service("app-1").await.is_err());
        assert!(sim.describe_service("app-1").await.unwrap().is_some());
        assert_eq!(sim.calls_to("describe_service").len(), 3);
    }

    #[tokio::test]
    async fn tags_and_rename_by_id() {
        let sim = cloud();
        sim.untag_resource("arn:app-1", &[BG_VERSION_TAG.to_string()])
            .await
            .unwrap();
        sim.tag_resource("arn:app-1", &[Tag::new(BG_VERSION_TAG, "GREEN")])
            .await
            .unwrap();
        sim.rename_service("arn:app-1", "app-").await.unwrap();

        let svc = sim.service("app-").unwrap();
        assert_eq!(svc.version_tag(), Some(VersionTag::Green));
        assert!(sim.service("app-1").is_none());
    }

    #[tokio::test]
    async fn route_mapping_is_idempotent() {
        let sim = cloud();
        let routes = vec!["app.example.com".to_string()];
        sim.map_routes("app-1", &routes).await.unwrap();
        sim.map_routes("app-1", &routes).await.unwrap();
        assert_eq!(sim.service("app-1").unwrap().routes.len(), 1);
        sim.unmap_routes("app-1", &routes).await.unwrap();
        assert!(sim.service("app-1").unwrap().routes.is_empty());
    }

    #[tokio::test]
    async fn one_shot_fault() {
        let sim = cloud();
        sim.fail_once("list_tasks", ProviderError::Throttled("slow down".into()));
        assert!(sim.list_tasks("app-1").await.is_err());
        assert_eq!(sim.list_tasks("app-1").await.unwrap().len(), 3);
    }
}
