//! Workload resolver
//!
//! Turns the current allocations into a `{bus id → workload}` map. Only claims
//! of the configured resource class count, and only the first device id of a
//! claim is attributed to the container. Every failure, including a panic in
//! the query, degrades to an empty map so that telemetry keeps flowing.

use crate::allocation::{AllocationSource, PodAllocation};
use accel_core::{BusId, IdentityMap, WorkloadIdentity, DEFAULT_RESOURCE_NAME};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Provides the device-to-workload map for one cycle
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Current identities; empty when they cannot be determined
    async fn resolve(&self) -> IdentityMap;
}

/// Resolver backed by an [`AllocationSource`]
pub struct WorkloadResolver {
    source: Arc<dyn AllocationSource>,
    resource_name: String,
}

impl WorkloadResolver {
    /// Create a resolver for the default accelerator resource class
    pub fn new(source: Arc<dyn AllocationSource>) -> Self {
        Self {
            source,
            resource_name: DEFAULT_RESOURCE_NAME.to_string(),
        }
    }

    /// Only attribute claims of this resource class
    pub fn with_resource_name(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = resource_name.into();
        self
    }

    /// Resource class being attributed
    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }
}

#[async_trait]
impl IdentityResolver for WorkloadResolver {
    async fn resolve(&self) -> IdentityMap {
        let source = Arc::clone(&self.source);
        let outcome = tokio::spawn(async move { source.list().await }).await;

        match outcome {
            Ok(Ok(pods)) => {
                let identities = identity_map(&pods, &self.resource_name);
                debug!("Resolved {} device identities from {} pods", identities.len(), pods.len());
                identities
            }
            Ok(Err(e)) => {
                warn!("Workload lookup failed ({}): {}", e.category(), e);
                for hint in e.remediation_hints() {
                    warn!("  - {}", hint);
                }
                IdentityMap::new()
            }
            Err(e) => {
                warn!("Workload lookup failed unexpectedly: {}", e);
                warn!("  - Workload labels stay empty until the next successful lookup");
                IdentityMap::new()
            }
        }
    }
}

/// Map the first claimed device of every matching container to its workload
pub fn identity_map(pods: &[PodAllocation], resource_name: &str) -> IdentityMap {
    let mut identities = IdentityMap::new();
    for pod in pods {
        for container in &pod.containers {
            for claim in &container.devices {
                if claim.resource_name != resource_name {
                    continue;
                }
                let Some(device_id) = claim.device_ids.first() else {
                    continue;
                };
                identities.insert(
                    BusId::canonical(device_id),
                    WorkloadIdentity::new(&pod.namespace, &pod.name, &container.name),
                );
            }
        }
    }
    identities
}
