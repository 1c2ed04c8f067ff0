//! Listener and rule traffic routing.
//!
//! Resolves which target group a listener rule forwards to and repoints it.
//! A listener's default rule can only be changed through the listener, so
//! every mutation dispatches on `is_default` first.

use slotshift_core::{Action, LoadBalancerConfig, Rule, TrafficEndpoint};
use tracing::info;

use crate::context::RolloutContext;
use crate::error::{RolloutError, RolloutResult};

pub struct TrafficRouter<'a> {
    ctx: &'a RolloutContext,
}

impl<'a> TrafficRouter<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx }
    }

    /// Walk every page of rules on `listener_arn` looking for `rule_arn`.
    pub async fn find_rule(&self, listener_arn: &str, rule_arn: &str) -> RolloutResult<Rule> {
        let balancer = &self.ctx.providers.balancer;
        let mut marker = None;
        loop {
            let page = balancer
                .describe_rules(listener_arn, marker)
                .await
                .map_err(RolloutError::provider("describe rules of", listener_arn))?;
            if let Some(rule) = page
                .items
                .into_iter()
                .find(|r| r.arn.eq_ignore_ascii_case(rule_arn))
            {
                return Ok(rule);
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => {
                    return Err(RolloutError::RuleNotFound {
                        rule: rule_arn.to_string(),
                        listener: listener_arn.to_string(),
                    });
                }
            }
        }
    }

    /// Point `rule_arn` at `target_group_arn`.
    ///
    /// Mutations go through the arns the provider reported, not the caller's
    /// spelling of them.
    pub async fn swap(
        &self,
        listener_arn: &str,
        rule_arn: &str,
        target_group_arn: &str,
    ) -> RolloutResult<()> {
        let balancer = &self.ctx.providers.balancer;
        let rule = self.find_rule(listener_arn, rule_arn).await?;
        let actions = vec![Action::forward(target_group_arn)];
        if rule.is_default {
            balancer
                .modify_listener(&rule.listener_arn, actions)
                .await
                .map_err(RolloutError::provider("modify listener", &rule.listener_arn))?;
        } else {
            balancer
                .modify_rule(&rule.arn, actions)
                .await
                .map_err(RolloutError::provider("modify rule", &rule.arn))?;
        }
        info!(
            listener = %rule.listener_arn,
            rule = %rule.arn,
            target = %target_group_arn,
            "traffic repointed"
        );
        self.ctx.log.info(&format!(
            "Modified rule {} of listener {} to forward to {target_group_arn}",
            rule.arn, rule.listener_arn
        ));
        Ok(())
    }

    /// Current forwarding target of a rule, looked up through its load balancer.
    pub async fn resolve_current_target(
        &self,
        load_balancer: &str,
        listener_arn: &str,
        rule_arn: &str,
    ) -> RolloutResult<TrafficEndpoint> {
        let balancer = &self.ctx.providers.balancer;
        let lb = balancer
            .describe_load_balancer(load_balancer)
            .await
            .map_err(RolloutError::provider("describe load balancer", load_balancer))?
            .ok_or_else(|| RolloutError::LoadBalancerNotFound {
                name: load_balancer.to_string(),
            })?;

        let mut marker = None;
        let listener = loop {
            let page = balancer
                .describe_listeners(&lb.arn, marker)
                .await
                .map_err(RolloutError::provider("describe listeners of", &lb.arn))?;
            if let Some(found) = page
                .items
                .into_iter()
                .find(|l| l.arn.eq_ignore_ascii_case(listener_arn))
            {
                break found;
            }
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => {
                    return Err(RolloutError::ListenerNotFound {
                        listener: listener_arn.to_string(),
                        load_balancer: load_balancer.to_string(),
                    });
                }
            }
        };

        let rule = self.find_rule(&listener.arn, rule_arn).await?;
        let target = rule
            .actions
            .iter()
            .find_map(|a| a.target_group_arn.clone())
            .ok_or_else(|| RolloutError::NoForwardAction {
                rule: rule_arn.to_string(),
            })?;
        Ok(TrafficEndpoint {
            listener_id: listener.arn,
            rule_id: rule.arn,
            is_default_rule: rule.is_default,
            current_target_id: target,
        })
    }

    /// Exchange the prod and stage target groups.
    ///
    /// Returns the `(prod, stage)` endpoints as they were before the swap.
    pub async fn swap_target_groups(
        &self,
        config: &LoadBalancerConfig,
        swap_stage: bool,
    ) -> RolloutResult<(TrafficEndpoint, TrafficEndpoint)> {
        let prod = self
            .resolve_current_target(&config.name, &config.prod_listener, &config.prod_rule)
            .await?;
        let stage = self
            .resolve_current_target(&config.name, &config.stage_listener, &config.stage_rule)
            .await?;

        self.swap(&prod.listener_id, &prod.rule_id, &stage.current_target_id)
            .await?;
        if swap_stage {
            self.swap(&stage.listener_id, &stage.rule_id, &prod.current_target_id)
                .await?;
        }
        self.ctx.log.info(&format!(
            "Swapped target groups: prod now forwards to {}",
            stage.current_target_id
        ));
        Ok((prod, stage))
    }

    /// Point an endpoint back at its recorded target. Returns false when it
    /// already forwards there.
    pub async fn restore(&self, endpoint: &TrafficEndpoint) -> RolloutResult<bool> {
        let rule = self.find_rule(&endpoint.listener_id, &endpoint.rule_id).await?;
        let current = rule.actions.iter().find_map(|a| a.target_group_arn.as_deref());
        if current == Some(endpoint.current_target_id.as_str()) {
            self.ctx.log.info(&format!(
                "Rule {} already forwards to {}",
                endpoint.rule_id, endpoint.current_target_id
            ));
            return Ok(false);
        }
        self.swap(
            &endpoint.listener_id,
            &endpoint.rule_id,
            &endpoint.current_target_id,
        )
        .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing;
    use slotshift_sim::fixtures::{listener, load_balancer, rule};
    use slotshift_sim::{SimCloud, World};

    fn world() -> World {
        let mut world = World::new("prod", "us-east-1");
        world.page_size = 2;
        world.load_balancers.push(load_balancer("app-lb"));
        world
            .listeners
            .push(listener("listener-prod", "arn:lb/app-lb", "tg-blue"));
        world
            .listeners
            .push(listener("listener-stage", "arn:lb/app-lb", "tg-green"));
        world
            .rules
            .push(rule("default-prod", "listener-prod", "tg-blue", true));
        world
            .rules
            .push(rule("rule-other", "listener-prod", "tg-x", false));
        world
            .rules
            .push(rule("rule-123", "listener-prod", "tg-blue", false));
        world
            .rules
            .push(rule("default-stage", "listener-stage", "tg-green", true));
        world
    }

    fn config(prod_rule: &str, stage_rule: &str) -> LoadBalancerConfig {
        LoadBalancerConfig {
            name: "app-lb".to_string(),
            prod_listener: "listener-prod".to_string(),
            prod_rule: prod_rule.to_string(),
            stage_listener: "listener-stage".to_string(),
            stage_rule: stage_rule.to_string(),
            stage_target_group: None,
            target_group_placeholder: slotshift_core::TARGET_GROUP_PLACEHOLDER.to_string(),
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

    #[tokio::test]
    async fn finds_rule_on_later_page() {
        let (ctx, sim, _) = testing::context(world());
        let rule = TrafficRouter::new(&ctx)
            .find_rule("listener-prod", "RULE-123")
            .await
            .unwrap();
        assert_eq!(rule.arn, "rule-123");
        assert_eq!(sim.calls_to("describe_rules").len(), 2);
    }

    #[tokio::test]
    async fn missing_rule_names_both_ids() {
        let (ctx, _, _) = testing::context(world());
        let err = TrafficRouter::new(&ctx)
            .find_rule("listener-prod", "rule-404")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "listener rule with arn: rule-404 is not present in listener: listener-prod"
        );
    }

    #[tokio::test]
    async fn resolve_reports_lookup_failures() {
        let (ctx, _, _) = testing::context(world());
        let router = TrafficRouter::new(&ctx);

        let err = router
            .resolve_current_target("nope-lb", "listener-prod", "rule-123")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "load balancer with name: nope-lb is not present");

        let err = router
            .resolve_current_target("app-lb", "listener-nope", "rule-123")
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::ListenerNotFound { .. }));

        let endpoint = router
            .resolve_current_target("app-lb", "listener-prod", "rule-123")
            .await
            .unwrap();
        assert_eq!(endpoint.current_target_id, "tg-blue");
        assert!(!endpoint.is_default_rule);
    }

    #[tokio::test]
    async fn non_default_rule_is_modified_directly() {
        let (ctx, sim, _) = testing::context(world());
        TrafficRouter::new(&ctx)
            .swap("listener-prod", "rule-123", "tg-green")
            .await
            .unwrap();
        assert_eq!(sim.calls_to("modify_rule").len(), 1);
        assert!(sim.calls_to("modify_listener").is_empty());
        assert_eq!(target_of(&sim, "rule-123"), "tg-green");
    }

    #[tokio::test]
    async fn arns_match_regardless_of_case() {
        let (ctx, sim, _) = testing::context(world());
        let router = TrafficRouter::new(&ctx);
        let endpoint = router
            .resolve_current_target("app-lb", "LISTENER-PROD", "Rule-123")
            .await
            .unwrap();
        assert_eq!(endpoint.listener_id, "listener-prod");
        assert_eq!(endpoint.rule_id, "rule-123");

        router
            .swap("listener-prod", "RULE-123", "tg-green")
            .await
            .unwrap();
        let calls = sim.calls_to("modify_rule");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target, "rule-123");
        assert_eq!(target_of(&sim, "rule-123"), "tg-green");
    }

    #[tokio::test]
    async fn default_rule_goes_through_listener() {
        let (ctx, sim, _) = testing::context(world());
        TrafficRouter::new(&ctx)
            .swap("listener-prod", "default-prod", "tg-green")
            .await
            .unwrap();
        assert_eq!(sim.calls_to("modify_listener").len(), 1);
        assert!(sim.calls_to("modify_rule").is_empty());
        assert_eq!(target_of(&sim, "default-prod"), "tg-green");
    }

    #[tokio::test]
    async fn swap_exchanges_prod_and_stage() {
        let (ctx, sim, _) = testing::context(world());
        let (prod, stage) = TrafficRouter::new(&ctx)
            .swap_target_groups(&config("rule-123", "default-stage"), true)
            .await
            .unwrap();
        assert_eq!(prod.current_target_id, "tg-blue");
        assert_eq!(stage.current_target_id, "tg-green");
        assert_eq!(target_of(&sim, "rule-123"), "tg-green");
        assert_eq!(target_of(&sim, "default-stage"), "tg-blue");
    }

    #[tokio::test]
    async fn stage_can_be_left_alone() {
        let (ctx, sim, _) = testing::context(world());
        TrafficRouter::new(&ctx)
            .swap_target_groups(&config("rule-123", "default-stage"), false)
            .await
            .unwrap();
        assert_eq!(target_of(&sim, "default-stage"), "tg-green");
        assert!(sim.calls_to("modify_listener").is_empty());
    }

    #[tokio::test]
    async fn restore_is_idempotent() {
        let (ctx, sim, _) = testing::context(world());
        let router = TrafficRouter::new(&ctx);
        let endpoint = router
            .resolve_current_target("app-lb", "listener-prod", "rule-123")
            .await
            .unwrap();
        router.swap("listener-prod", "rule-123", "tg-green").await.unwrap();

        assert!(router.restore(&endpoint).await.unwrap());
        assert!(!router.restore(&endpoint).await.unwrap());
        assert_eq!(target_of(&sim, "rule-123"), "tg-blue");
        assert_eq!(sim.calls_to("modify_rule").len(), 2);
    }
}
