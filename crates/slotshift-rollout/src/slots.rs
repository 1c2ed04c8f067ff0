//! Version slot resolution.
//!
//! A logical service rotates between two physical services, `{prefix}1` and
//! `{prefix}2`. Slot 1 is always probed first and wins ties. The decision is
//! a pure function over the two probe results; only the probing talks to the
//! provider.

use slotshift_core::{
    ProbePolicy, ProviderError, ServiceDescriptor, ServiceVersionSlot, SlotIndex, VersionTag,
};
use tracing::{debug, warn};

use crate::context::RolloutContext;
use crate::error::{RolloutError, RolloutResult};

/// Raw outcome of describing one slot.
#[derive(Debug, Clone)]
pub enum SlotProbe {
    Absent,
    Found(ServiceDescriptor),
    Failed(ProviderError),
}

/// Active iff the service is ACTIVE and not explicitly tagged GREEN.
pub fn slot_is_active(service: &ServiceDescriptor) -> bool {
    service.is_active() && service.version_tag() != Some(VersionTag::Green)
}

/// Both slots of a prefix, classified.
#[derive(Debug, Clone)]
pub struct SlotResolution {
    pub active: Option<ServiceVersionSlot>,
    pub active_service: Option<ServiceDescriptor>,
    pub inactive: ServiceVersionSlot,
    /// Whatever currently occupies the inactive slot, if anything.
    pub inactive_service: Option<ServiceDescriptor>,
}

/// Apply the probe policy to one probe.
pub fn classify(
    slot: &ServiceVersionSlot,
    probe: SlotProbe,
    policy: ProbePolicy,
) -> RolloutResult<Option<ServiceDescriptor>> {
    match probe {
        SlotProbe::Absent => Ok(None),
        SlotProbe::Found(service) => Ok(Some(service)),
        SlotProbe::Failed(source) => match policy {
            ProbePolicy::Lenient => Ok(None),
            ProbePolicy::Strict => Err(RolloutError::SlotProbe {
                slot: slot.resolved_name.clone(),
                source,
            }),
        },
    }
}

/// Pick active and inactive slots from the services found in slot 1 and 2.
pub fn pick_slots(
    prefix: &str,
    found: [Option<ServiceDescriptor>; 2],
) -> RolloutResult<SlotResolution> {
    let mut active = None;
    let mut inactive = None;

    for (index, service) in SlotIndex::ALL.into_iter().zip(found) {
        let slot = ServiceVersionSlot::new(prefix, index);
        let is_active = service.as_ref().is_some_and(slot_is_active);
        if is_active {
            if active.is_none() {
                active = Some((slot, service));
            }
        } else if inactive.is_none() {
            inactive = Some((slot, service));
        }
    }

    let Some((inactive, inactive_service)) = inactive else {
        return Err(RolloutError::NoInactiveSlot {
            prefix: prefix.to_string(),
        });
    };
    let (active, active_service) = match active {
        Some((slot, service)) => (Some(slot), service),
        None => (None, None),
    };
    Ok(SlotResolution {
        active,
        active_service,
        inactive,
        inactive_service,
    })
}

pub struct SlotResolver<'a> {
    ctx: &'a RolloutContext,
}

impl<'a> SlotResolver<'a> {
    pub fn new(ctx: &'a RolloutContext) -> Self {
        Self { ctx }
    }

    async fn probe(&self, slot: &ServiceVersionSlot) -> SlotProbe {
        match self
            .ctx
            .providers
            .compute
            .describe_service(&slot.resolved_name)
            .await
        {
            Ok(Some(service)) => SlotProbe::Found(service),
            Ok(None) => SlotProbe::Absent,
            Err(e) => SlotProbe::Failed(e),
        }
    }

    pub async fn resolve(&self, prefix: &str) -> RolloutResult<SlotResolution> {
        let policy = self.ctx.settings.probe_policy;
        let mut found: [Option<ServiceDescriptor>; 2] = [None, None];

        for (i, index) in SlotIndex::ALL.into_iter().enumerate() {
            let slot = ServiceVersionSlot::new(prefix, index);
            let probe = self.probe(&slot).await;
            if let SlotProbe::Failed(e) = &probe
                && policy == ProbePolicy::Lenient
            {
                warn!(
                    slot = %slot.resolved_name,
                    error = %e,
                    "slot probe failed, treating as absent"
                );
                self.ctx.log.warn(&format!(
                    "Could not describe {}: {e}. Treating the slot as empty.",
                    slot.resolved_name
                ));
            }
            found[i] = classify(&slot, probe, policy)?;
        }

        let resolution = pick_slots(prefix, found)?;
        debug!(
            prefix,
            active = ?resolution.active.as_ref().map(|s| &s.resolved_name),
            inactive = %resolution.inactive.resolved_name,
            "slots resolved"
        );
        Ok(resolution)
    }

    pub async fn resolve_inactive_slot(&self, prefix: &str) -> RolloutResult<ServiceVersionSlot> {
        let resolution = self.resolve(prefix).await?;
        self.ctx.log.info(&format!(
            "Inactive slot for {prefix} is {}",
            resolution.inactive.resolved_name
        ));
        Ok(resolution.inactive)
    }

    pub async fn resolve_active_slot(
        &self,
        prefix: &str,
    ) -> RolloutResult<Option<ServiceVersionSlot>> {
        Ok(self.resolve(prefix).await?.active)
    }
}
