//! Builders for common world objects.

use slotshift_core::{
    Action, BG_VERSION_TAG, Listener, LoadBalancer, Rule, ServiceDescriptor, ServiceStatus, Tag,
    VersionTag,
};

/// An active, steady service with `count` tasks.
pub fn service(name: &str, id: &str, count: u32, tag: Option<VersionTag>) -> ServiceDescriptor {
    ServiceDescriptor {
        name: name.to_string(),
        id: id.to_string(),
        status: ServiceStatus::Active,
        desired_count: count,
        running_count: count,
        pending_count: 0,
        task_definition: Some(format!("{name}:1")),
        tags: tag
            .map(|t| vec![Tag::new(BG_VERSION_TAG, t.as_str())])
            .unwrap_or_default(),
        events: Vec::new(),
        routes: Vec::new(),
        created_at: 0,
    }
}

pub fn load_balancer(name: &str) -> LoadBalancer {
    LoadBalancer {
        arn: format!("arn:lb/{name}"),
        name: name.to_string(),
    }
}

pub fn listener(arn: &str, load_balancer_arn: &str, default_target: &str) -> Listener {
    Listener {
        arn: arn.to_string(),
        load_balancer_arn: load_balancer_arn.to_string(),
        default_actions: vec![Action::forward(default_target)],
    }
}

pub fn rule(arn: &str, listener_arn: &str, target: &str, is_default: bool) -> Rule {
    Rule {
        arn: arn.to_string(),
        listener_arn: listener_arn.to_string(),
        is_default,
        actions: vec![Action::forward(target)],
    }
}
