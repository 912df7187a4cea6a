//! Discovery Service (component C, spec.md §4.3).
//!
//! Grounded on `kube-rs`'s own `discovery` module (`Discovery`, `ApiGroup`,
//! `ApiCapabilities`) re-expressed as a thin per-session cache with TTL
//! invalidation, aggregated by union across sessions. Version-priority
//! sorting is reimplemented locally rather than reusing kube-rs's internal
//! `Version` type (not part of its public API) but follows the exact rule
//! spec.md §4.3 states: stable > beta > alpha, then numeric descending.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use kube::discovery::{Discovery, Scope};
use kubeview_core::{CoreError, EventBus, StatusEvent};
use kubeview_transport::{ClusterSession, ConnectionEvent, ContextName, Gvk, SessionState};
use tracing::warn;

use crate::model::MultiClusterGvk;
use crate::registry::SessionRegistry;

#[derive(Clone)]
struct CachedResource {
    gvk: Gvk,
    api_resource: kube::api::ApiResource,
    scope: Scope,
}

struct CacheEntry {
    fetched_at: SystemTime,
    resources: Vec<CachedResource>,
}

/// Enumerates GVKs per session and aggregates into a multi-cluster index
/// (spec.md §4.3).
pub struct DiscoveryService {
    registry: Arc<SessionRegistry>,
    cache: DashMap<ContextName, CacheEntry>,
    ttl: Duration,
    status_events: EventBus<StatusEvent>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<SessionRegistry>, ttl: Duration, status_events: EventBus<StatusEvent>) -> Self {
        DiscoveryService {
            registry,
            cache: DashMap::new(),
            ttl,
            status_events,
        }
    }

    /// Drop a context's cached discovery, e.g. in response to a
    /// `Unhealthy → Ready` transition on the Event Bus (spec.md §4.3:
    /// "invalidated on session transitions to Unhealthy → Ready").
    pub fn invalidate(&self, context: &ContextName) {
        self.cache.remove(context);
    }

    pub fn handle_connection_event(&self, event: &ConnectionEvent) {
        if let ConnectionEvent::StateChanged { context, state: SessionState::Ready } = event {
            self.invalidate(context);
        }
    }

    /// `ListGVKs(contexts) → [MultiClusterGVK…]` (spec.md §4.3).
    pub async fn list_gvks(&self, contexts: &[ContextName]) -> Vec<MultiClusterGvk> {
        let mut per_gvk: std::collections::HashMap<Gvk, Vec<ContextName>> = std::collections::HashMap::new();

        for context in contexts {
            match self.resources_for(context).await {
                Ok(resources) => {
                    for resource in resources {
                        per_gvk.entry(resource.gvk).or_default().push(context.clone());
                    }
                }
                Err(err) => {
                    // Failure policy (§4.3): exclude the failing context,
                    // keep the rest; never block the whole view.
                    warn!(context = %context, error = %err, "discovery failed for context");
                    self.status_events.publish(StatusEvent::warning(
                        "discovery",
                        format!("context `{context}` excluded from discovery: {err}"),
                    ));
                }
            }
        }

        let mut entries: Vec<MultiClusterGvk> = per_gvk
            .into_iter()
            .map(|(gvk, contexts)| MultiClusterGvk::new(gvk, contexts))
            .collect();
        entries.sort_by(|a, b| gvk_sort_key(&a.gvk).cmp(&gvk_sort_key(&b.gvk)));
        entries
    }

    /// Resolve a previously-discovered GVK to the `ApiResource`/`Scope`
    /// pair needed to build a `ResourceHandle`. Returns `None` if the
    /// context hasn't been discovered (or its cache entry expired) since
    /// the GVK was last seen — callers should call `list_gvks` first.
    pub fn resolve(&self, context: &ContextName, gvk: &Gvk) -> Option<(kube::api::ApiResource, Scope)> {
        let entry = self.cache.get(context)?;
        entry
            .resources
            .iter()
            .find(|r| &r.gvk == gvk)
            .map(|r| (r.api_resource.clone(), r.scope.clone()))
    }

    async fn resources_for(&self, context: &ContextName) -> Result<Vec<CachedResource>, CoreError> {
        if let Some(entry) = self.cache.get(context) {
            if entry.fetched_at.elapsed().unwrap_or(Duration::MAX) < self.ttl {
                return Ok(entry.resources.clone());
            }
        }

        let session = self
            .registry
            .get(context)
            .ok_or_else(|| CoreError::NotFound(context.to_string()))?;
        let resources = self.refresh(&session).await?;
        self.cache.insert(
            context.clone(),
            CacheEntry {
                fetched_at: SystemTime::now(),
                resources: resources.clone(),
            },
        );
        Ok(resources)
    }

    async fn refresh(&self, session: &ClusterSession) -> Result<Vec<CachedResource>, CoreError> {
        let client = session
            .client()
            .await
            .ok_or_else(|| CoreError::transport_message(session.context().to_string(), "not connected"))?;

        let discovery = Discovery::new(client)
            .run()
            .await
            .map_err(|e| CoreError::Protocol(format!("discovery run failed: {e}")))?;

        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (api_resource, capabilities) in group.recommended_resources() {
                // Subresources (`deployments/status`) are not independently
                // browsable GVKs.
                if api_resource.plural.contains('/') {
                    continue;
                }
                resources.push(CachedResource {
                    gvk: Gvk::new(
                        api_resource.group.clone(),
                        api_resource.version.clone(),
                        api_resource.kind.clone(),
                    ),
                    api_resource,
                    scope: capabilities.scope,
                });
            }
        }
        Ok(resources)
    }
}

/// Ordering key for spec.md §4.3's "deterministic order": core group
/// first, then groups alphabetically; within a (group, kind) versions
/// sorted stable > beta > alpha, then numeric descending.
fn gvk_sort_key(gvk: &Gvk) -> (bool, String, String, std::cmp::Reverse<VersionRank>) {
    (
        !gvk.is_core_group(),
        gvk.group.clone(),
        gvk.kind.clone(),
        std::cmp::Reverse(parse_version_rank(&gvk.version)),
    )
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct VersionRank {
    major: i64,
    stability: i8,
    pre: i64,
}

/// Parses Kubernetes-style version strings (`v1`, `v2beta1`, `v1alpha1`)
/// into a tuple that sorts stable > beta > alpha, numeric descending
/// within each stability tier, matching spec.md §4.3's literal example:
/// `v2 > v1 > v1beta2 > v1beta1 > v1alpha1`.
fn parse_version_rank(version: &str) -> VersionRank {
    let Some(rest) = version.strip_prefix('v') else {
        return VersionRank { major: 0, stability: 2, pre: 0 };
    };

    let major_digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    let major: i64 = major_digits.parse().unwrap_or(0);
    let rest = &rest[major_digits.len()..];

    if let Some(pre_digits) = rest.strip_prefix("alpha") {
        VersionRank { major, stability: 0, pre: pre_digits.parse().unwrap_or(0) }
    } else if let Some(pre_digits) = rest.strip_prefix("beta") {
        VersionRank { major, stability: 1, pre: pre_digits.parse().unwrap_or(0) }
    } else {
        VersionRank { major, stability: 2, pre: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_sort_matches_spec_example() {
        let mut versions = vec!["v1alpha1", "v2", "v1", "v2beta1", "v1beta1"];
        versions.sort_by_key(|v| std::cmp::Reverse(parse_version_rank(v)));
        assert_eq!(versions, vec!["v2", "v2beta1", "v1", "v1beta1", "v1alpha1"]);
    }

    #[test]
    fn core_group_gvks_sort_before_named_groups() {
        let core = Gvk::new("", "v1", "Pod");
        let apps = Gvk::new("apps", "v1", "Deployment");
        assert!(gvk_sort_key(&core) < gvk_sort_key(&apps));
    }

    #[test]
    fn groups_sort_alphabetically() {
        let batch = Gvk::new("batch", "v1", "Job");
        let networking = Gvk::new("networking.k8s.io", "v1", "Ingress");
        assert!(gvk_sort_key(&batch) < gvk_sort_key(&networking));
    }

    proptest::proptest! {
        #[test]
        fn stable_always_outranks_beta_and_alpha_for_same_major(major in 1i64..50) {
            let stable = VersionRank { major, stability: 2, pre: 0 };
            let beta = VersionRank { major, stability: 1, pre: 9 };
            let alpha = VersionRank { major, stability: 0, pre: 9 };
            proptest::prop_assert!(stable > beta);
            proptest::prop_assert!(beta > alpha);
        }
    }
}
