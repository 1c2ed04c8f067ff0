//! Serializable state of the simulated control plane.
//!
//! A [`World`] is plain data: services, load balancer objects, autoscaling
//! registrations, and Kubernetes releases. The CLI loads one from a JSON
//! file, runs a command against it, and writes it back.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use slotshift_core::{
    Listener, LoadBalancer, Release, ResourceManifest, Rule, ScalableTarget, ScalingPolicy,
    ServiceDescriptor, ServiceEvent, ServiceStatus,
};

use crate::error::{SimError, SimResult};

/// How a service's running count follows its desired count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convergence {
    /// Running count matches desired count right after each mutation.
    #[default]
    Instant,
    /// Running count moves one task per poll.
    Gradual,
    /// Running count never moves.
    Stuck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct World {
    pub cluster: String,
    pub region: String,
    /// Logical clock, advanced on every mutation and poll.
    #[serde(default)]
    pub clock: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default)]
    pub default_convergence: Convergence,
    /// Convergence overrides keyed by service name.
    #[serde(default)]
    pub convergence: BTreeMap<String, Convergence>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancer>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub scalable_targets: Vec<ScalableTarget>,
    #[serde(default)]
    pub scaling_policies: Vec<ScalingPolicy>,
    #[serde(default)]
    pub releases: BTreeMap<String, Vec<Release>>,
    /// Kubernetes resources currently applied.
    #[serde(default)]
    pub resources: Vec<ResourceManifest>,
    #[serde(default)]
    next_id: u64,
}

fn default_page_size() -> usize {
    10
}

impl World {
    pub fn new(cluster: &str, region: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            region: region.to_string(),
            clock: 0,
            page_size: default_page_size(),
            services: Vec::new(),
            default_convergence: Convergence::Instant,
            convergence: BTreeMap::new(),
            load_balancers: Vec::new(),
            listeners: Vec::new(),
            rules: Vec::new(),
            scalable_targets: Vec::new(),
            scaling_policies: Vec::new(),
            releases: BTreeMap::new(),
            resources: Vec::new(),
            next_id: 0,
        }
    }

    pub fn load(path: &Path) -> SimResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(SimError::Json)
    }

    pub fn save(&self, path: &Path) -> SimResult<()> {
        let content = serde_json::to_string_pretty(self).map_err(SimError::Json)?;
        std::fs::write(path, content).map_err(|source| SimError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub(crate) fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub(crate) fn fresh_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{}", self.next_id)
    }

    pub(crate) fn convergence_of(&self, name: &str) -> Convergence {
        self.convergence
            .get(name)
            .copied()
            .unwrap_or(self.default_convergence)
    }

    /// Index of the live (not inactive) service with `name`, falling back to
    /// the newest inactive one.
    pub(crate) fn find_service(&self, name: &str) -> Option<usize> {
        let live = self
            .services
            .iter()
            .position(|s| s.name == name && s.status != ServiceStatus::Inactive);
        live.or_else(|| {
            self.services
                .iter()
                .enumerate()
                .filter(|(_, s)| s.name == name)
                .max_by_key(|(_, s)| s.created_at)
                .map(|(i, _)| i)
        })
    }

    pub(crate) fn push_event(&mut self, index: usize, message: String) {
        let at = self.tick();
        let id = self.fresh_id("ev");
        self.services[index].events.insert(
            0,
            ServiceEvent {
                id,
                created_at: at,
                message,
            },
        );
    }

    /// Apply one poll's worth of convergence to a service.
    pub(crate) fn advance(&mut self, index: usize) {
        let name = self.services[index].name.clone();
        let mode = self.convergence_of(&name);
        let svc = &mut self.services[index];

        match svc.status {
            ServiceStatus::Draining => {
                svc.status = ServiceStatus::Inactive;
                svc.running_count = 0;
                svc.desired_count = 0;
                return;
            }
            ServiceStatus::Inactive => return,
            ServiceStatus::Active => {}
        }

        let before = svc.running_count;
        match mode {
            Convergence::Instant => svc.running_count = svc.desired_count,
            Convergence::Gradual => {
                if svc.running_count < svc.desired_count {
                    svc.running_count += 1;
                } else if svc.running_count > svc.desired_count {
                    svc.running_count -= 1;
                }
            }
            Convergence::Stuck => {}
        }
        let after = svc.running_count;
        let steady = svc.is_steady();

        if after > before {
            self.push_event(
                index,
                format!("(service {name}) has started {} tasks", after - before),
            );
        } else if after < before {
            self.push_event(
                index,
                format!("(service {name}) has stopped {} tasks", before - after),
            );
        }
        if steady && after != before {
            self.push_event(index, format!("(service {name}) has reached a steady state."));
        }
    }
}
