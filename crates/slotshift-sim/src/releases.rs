//! Kubernetes release history and applied resources.

use async_trait::async_trait;
use slotshift_core::{ManifestApplier, ProviderResult, Release, ResourceId, ResourceManifest};

use crate::cloud::SimCloud;

#[async_trait]
impl ManifestApplier for SimCloud {
    async fn release_history(&self, release_name: &str) -> ProviderResult<Vec<Release>> {
        self.with(|inner| {
            inner.enter("release_history", release_name)?;
            let mut releases = inner
                .world
                .releases
                .get(release_name)
                .cloned()
                .unwrap_or_default();
            releases.sort_by_key(|r| r.number);
            Ok(releases)
        })
    }

    async fn apply(&self, manifests: &[ResourceManifest]) -> ProviderResult<()> {
        self.with(|inner| {
            for manifest in manifests {
                inner.enter("apply", &manifest.id.to_string())?;
                let resources = &mut inner.world.resources;
                resources.retain(|r| r.id != manifest.id);
                resources.push(manifest.clone());
            }
            Ok(())
        })
    }

    /// Deleting a resource that is already gone is not an error.
    async fn delete(&self, resources: &[ResourceId]) -> ProviderResult<()> {
        self.with(|inner| {
            for id in resources {
                inner.enter("delete", &id.to_string())?;
                inner.world.resources.retain(|r| &r.id != id);
            }
            Ok(())
        })
    }
}
