//! Data-residency routing: which bucket and store a client's files use.

use super::{ObjectLocation, ObjectStore};
use crate::models::client::ClientRegion;
use std::{collections::HashMap, fmt, sync::Arc};

/// A bucket in a provider region, with the store that serves it.
#[derive(Clone)]
pub struct StoreTarget {
    pub bucket: String,
    pub region_name: String,
    pub store: Arc<dyn ObjectStore>,
}

impl StoreTarget {
    pub fn new(
        bucket: impl Into<String>,
        region_name: impl Into<String>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            region_name: region_name.into(),
            store,
        }
    }

    pub fn location(&self, key: impl Into<String>) -> ObjectLocation {
        ObjectLocation {
            bucket: self.bucket.clone(),
            key: key.into(),
            region: self.region_name.clone(),
        }
    }
}

impl fmt::Debug for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTarget")
            .field("bucket", &self.bucket)
            .field("region_name", &self.region_name)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

/// Built once at startup. With multi-region disabled every client region
/// resolves to the default target.
#[derive(Clone, Debug)]
pub struct RegionRouter {
    default_target: StoreTarget,
    targets: HashMap<ClientRegion, StoreTarget>,
    multi_region: bool,
}

impl RegionRouter {
    pub fn new(default_region: ClientRegion, default_target: StoreTarget, multi_region: bool) -> Self {
        let mut targets = HashMap::new();
        targets.insert(default_region, default_target.clone());
        Self {
            default_target,
            targets,
            multi_region,
        }
    }

    /// A router that sends everything to one target.
    pub fn single(target: StoreTarget) -> Self {
        Self::new(ClientRegion::Australia, target, false)
    }

    pub fn with_target(mut self, region: ClientRegion, target: StoreTarget) -> Self {
        self.targets.insert(region, target);
        self
    }

    pub fn default_target(&self) -> &StoreTarget {
        &self.default_target
    }

    pub fn resolve(&self, region: ClientRegion) -> &StoreTarget {
        if !self.multi_region {
            return self.default_target();
        }
        self.targets
            .get(&region)
            .unwrap_or_else(|| self.default_target())
    }

    /// Target owning an already-stored object.
    ///
    /// Objects keep the bucket they were written to even if routing changes
    /// later, so lookups go by bucket and fall back to the default target.
    pub fn for_location(&self, location: &ObjectLocation) -> &StoreTarget {
        self.targets
            .values()
            .find(|target| target.bucket == location.bucket)
            .unwrap_or_else(|| self.default_target())
    }

    pub fn targets(&self) -> impl Iterator<Item = &StoreTarget> {
        self.targets.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::memory::MemoryObjectStore;

    fn router(multi_region: bool) -> RegionRouter {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        RegionRouter::new(
            ClientRegion::Australia,
            StoreTarget::new("immigration-docs-au", "ap-southeast-2", store.clone()),
            multi_region,
        )
        .with_target(
            ClientRegion::India,
            StoreTarget::new("immigration-docs-in", "ap-south-1", store),
        )
    }

    #[test]
    fn multi_region_routes_by_client_region() {
        let router = router(true);
        assert_eq!(router.resolve(ClientRegion::India).bucket, "immigration-docs-in");
        assert_eq!(router.resolve(ClientRegion::Australia).region_name, "ap-southeast-2");
    }

    #[test]
    fn single_region_ignores_client_region() {
        let router = router(false);
        assert_eq!(router.resolve(ClientRegion::India).bucket, "immigration-docs-au");
    }

    #[test]
    fn stored_objects_resolve_by_bucket() {
        let router = router(false);
        let location = ObjectLocation {
            bucket: "immigration-docs-in".into(),
            key: "k".into(),
            region: "ap-south-1".into(),
        };
        assert_eq!(router.for_location(&location).region_name, "ap-south-1");
    }
}
