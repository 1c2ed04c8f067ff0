//! Load balancer side of the simulator.
//!
//! Listings paginate with the world's `page_size`; markers are plain
//! offsets. A listener's default rule mirrors its default actions, and the
//! default rule itself cannot be modified directly.

use async_trait::async_trait;
use slotshift_core::{
    Action, Listener, LoadBalancer, LoadBalancerProvider, Page, ProviderError, ProviderResult,
    Rule,
};

use crate::cloud::SimCloud;

fn paginate<T: Clone>(
    items: Vec<T>,
    marker: Option<String>,
    page_size: usize,
) -> ProviderResult<Page<T>> {
    let start = match marker {
        Some(m) => m
            .parse::<usize>()
            .map_err(|_| ProviderError::Rejected(format!("invalid marker {m}")))?,
        None => 0,
    };
    let page_size = page_size.max(1);
    let end = (start + page_size).min(items.len());
    let page = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    let next_marker = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: page,
        next_marker,
    })
}

#[async_trait]
impl LoadBalancerProvider for SimCloud {
    async fn describe_load_balancer(&self, name: &str) -> ProviderResult<Option<LoadBalancer>> {
        self.with(|inner| {
            inner.enter("describe_load_balancer", name)?;
            Ok(inner
                .world
                .load_balancers
                .iter()
                .find(|lb| lb.name == name)
                .cloned())
        })
    }

    async fn describe_listeners(
        &self,
        load_balancer_arn: &str,
        marker: Option<String>,
    ) -> ProviderResult<Page<Listener>> {
        self.with(|inner| {
            inner.enter("describe_listeners", load_balancer_arn)?;
            let listeners: Vec<Listener> = inner
                .world
                .listeners
                .iter()
                .filter(|l| l.load_balancer_arn == load_balancer_arn)
                .cloned()
                .collect();
            paginate(listeners, marker, inner.world.page_size)
        })
    }

    async fn describe_rules(
        &self,
        listener_arn: &str,
        marker: Option<String>,
    ) -> ProviderResult<Page<Rule>> {
        self.with(|inner| {
            inner.enter("describe_rules", listener_arn)?;
            if !inner.world.listeners.iter().any(|l| l.arn == listener_arn) {
                return Err(ProviderError::NotFound(format!("listener {listener_arn}")));
            }
            let rules: Vec<Rule> = inner
                .world
                .rules
                .iter()
                .filter(|r| r.listener_arn == listener_arn)
                .cloned()
                .collect();
            paginate(rules, marker, inner.world.page_size)
        })
    }

    async fn modify_listener(
        &self,
        listener_arn: &str,
        default_actions: Vec<Action>,
    ) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("modify_listener", listener_arn)?;
            let world = &mut inner.world;
            let listener = world
                .listeners
                .iter_mut()
                .find(|l| l.arn == listener_arn)
                .ok_or_else(|| ProviderError::NotFound(format!("listener {listener_arn}")))?;
            listener.default_actions = default_actions.clone();
            for rule in world
                .rules
                .iter_mut()
                .filter(|r| r.listener_arn == listener_arn && r.is_default)
            {
                rule.actions = default_actions.clone();
            }
            Ok(())
        })
    }

    async fn modify_rule(&self, rule_arn: &str, actions: Vec<Action>) -> ProviderResult<()> {
        self.with(|inner| {
            inner.enter("modify_rule", rule_arn)?;
            let rule = inner
                .world
                .rules
                .iter_mut()
                .find(|r| r.arn == rule_arn)
                .ok_or_else(|| ProviderError::NotFound(format!("rule {rule_arn}")))?;
            if rule.is_default {
                return Err(ProviderError::Rejected(format!(
                    "default rule {rule_arn} cannot be modified; modify the listener"
                )));
            }
            rule.actions = actions;
            Ok(())
        })
    }
}
