//! `ExplorerApi` — the façade (spec.md §6) tying every other component in
//! this crate together into the single surface a UI layer calls. No
//! teacher module plays quite this role (the teacher's `spark_switch::Switch`
//! comes closest: one type owning a registry, a router and an event bus,
//! exposing a small set of public methods that each touch multiple
//! subsystems), so this is grounded on that shape rather than any single
//! file.

use std::sync::{Arc, Mutex};

use kube::runtime::watcher;
use kubeview_core::{CoreError, EventBus, StatusEvent};
use kubeview_transport::{ContextName, ContextProvider, Gvk};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregationEngine, ConsumerToken, WatchSourceFactory};
use crate::discovery::DiscoveryService;
use crate::favorites::FavoritesStore;
use crate::model::{CellChange, Favorite, MultiClusterGvk, ResourceRow, SchemaNode};
use crate::registry::{ConnectionResult, SessionRegistry};
use crate::schema::SchemaService;
use crate::transport_adapter::TransportWatchSource;

/// `PollResources() → {rows, changes, watchStatus}` (spec.md §6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

pub struct PollResult {
    pub rows: Vec<ResourceRow>,
    pub changes: Vec<CellChange>,
    pub watch_status: WatchStatus,
}

struct ActiveWatch {
    contexts: Vec<ContextName>,
}

/// The single entry point a UI layer talks to. Owns (by `Arc`) every
/// long-lived component; cloning an `ExplorerApi` is cheap and shares all
/// underlying state, matching the teacher's "one façade, many clone
/// holders" pattern for its top-level `Switch` type.
#[derive(Clone)]
pub struct ExplorerApi {
    provider: Arc<dyn ContextProvider>,
    registry: Arc<SessionRegistry>,
    discovery: Arc<DiscoveryService>,
    schema: Arc<SchemaService>,
    aggregation: AggregationEngine,
    favorites: Arc<FavoritesStore>,
    status_events: EventBus<StatusEvent>,
    consumer: ConsumerToken,
    active: Arc<Mutex<Option<ActiveWatch>>>,
}

impl ExplorerApi {
    /// Assembles every component from an `EngineConfig` and a caller-supplied
    /// `ContextProvider`. `consumer` is registered once, up front — this
    /// façade models a single UI session per `ExplorerApi` instance; a
    /// multi-window UI would construct one `ExplorerApi` per window sharing
    /// the same `registry`/`discovery`/`schema` but each with its own
    /// consumer token (not wired up here since spec.md's §6 surface is
    /// single-consumer).
    pub async fn new(provider: Arc<dyn ContextProvider>, config: kubeview_core::EngineConfig, favorites: Arc<FavoritesStore>) -> Self {
        let status_events: EventBus<StatusEvent> = EventBus::new(config.event_bus_capacity);
        let connection_events = EventBus::default();

        let registry = Arc::new(SessionRegistry::new(
            provider.clone(),
            connection_events.clone(),
            config.reconnect_backoff,
            config.connect_timeout,
            config.connect_many_parallelism,
        ));

        let discovery = Arc::new(DiscoveryService::new(registry.clone(), config.discovery_ttl, status_events.clone()));

        let ignored = crate::schema::IgnoredFields::new(config.ignored_schema_fields.clone());
        let schema = Arc::new(SchemaService::new(registry.clone(), ignored, config.schema_timeout));

        let factory = make_watch_source_factory(registry.clone(), discovery.clone());
        let aggregation = AggregationEngine::with_system_clock(factory, config.reconnect_backoff);

        let consumer = aggregation.register_consumer().await;

        let api = ExplorerApi {
            provider,
            registry,
            discovery,
            schema,
            aggregation,
            favorites,
            status_events,
            consumer,
            active: Arc::new(Mutex::new(None)),
        };

        let discovery_for_events = api.discovery.clone();
        let schema_for_events = api.schema.clone();
        let mut connection_rx = connection_events.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = connection_rx.recv().await {
                discovery_for_events.handle_connection_event(&event);
                schema_for_events.handle_connection_event(&event);
            }
        });

        api
    }

    pub fn status_events(&self) -> EventBus<StatusEvent> {
        self.status_events.clone()
    }

    /// `ListContexts() → [contextName…]` (spec.md §6) — every context named
    /// by the provider, connected or not.
    pub fn list_contexts(&self) -> Vec<ContextName> {
        self.provider.list_context_names()
    }

    /// `RefreshContexts() → [contextName…]` (spec.md §6) — re-reads the
    /// provider's context list; does not itself connect or disconnect
    /// anything.
    pub fn refresh_contexts(&self) -> Vec<ContextName> {
        self.provider.list_context_names()
    }

    /// `ConnectToContexts([contextName…]) → [{context, ok, error?}…]`
    /// (spec.md §6, invariant 1: totality in input order).
    pub async fn connect_to_contexts(&self, contexts: Vec<ContextName>) -> Vec<ConnectionResult> {
        self.registry.connect_many(contexts).await
    }

    /// `GetGVKs([contextName…]) → [MultiClusterGVK…]` (spec.md §6).
    pub async fn get_gvks(&self, contexts: &[ContextName]) -> Vec<MultiClusterGvk> {
        self.discovery.list_gvks(contexts).await
    }

    /// `GetNodeTree(gvk, [contextName…]) → SchemaNode` (spec.md §6).
    pub async fn get_node_tree(&self, gvk: &Gvk, contexts: &[ContextName]) -> SchemaNode {
        self.schema.field_tree(gvk, contexts).await
    }

    /// `StartResources(gvk, [contextName…])` (spec.md §6). Waits for every
    /// Watch Worker's initial Listing to complete before returning, so the
    /// first `PollResources` call already sees a populated table.
    pub async fn start_resources(&self, gvk: Gvk, contexts: Vec<ContextName>) {
        *self.active.lock().unwrap() = Some(ActiveWatch { contexts: contexts.clone() });
        self.aggregation.start(gvk, contexts).await;
        self.aggregation.on_ready().await;
    }

    /// `StopResources()` (spec.md §6).
    pub async fn stop_resources(&self) {
        *self.active.lock().unwrap() = None;
        self.aggregation.stop().await;
    }

    /// `PollResources() → {rows, changes, watchStatus}` (spec.md §6).
    pub async fn poll_resources(&self) -> PollResult {
        let (rows, changes) = self.aggregation.snapshot(self.consumer).await;
        let watch_status = self.current_watch_status();
        PollResult { rows, changes, watch_status }
    }

    fn current_watch_status(&self) -> WatchStatus {
        let active = self.active.lock().unwrap();
        let Some(active) = active.as_ref() else {
            return WatchStatus::Disconnected;
        };
        if active.contexts.is_empty() {
            return WatchStatus::Disconnected;
        }
        let ready: std::collections::HashSet<ContextName> = self.registry.connected_contexts().into_iter().collect();
        if active.contexts.iter().all(|c| ready.contains(c)) {
            WatchStatus::Connected
        } else {
            WatchStatus::Reconnecting
        }
    }

    pub fn list_favorites(&self) -> Vec<Favorite> {
        self.favorites.list()
    }

    pub fn save_favorite(&self, name: String, gvk: Gvk, fields: Vec<Vec<String>>) -> Result<Favorite, CoreError> {
        self.favorites.create(name, gvk, fields)
    }

    pub fn rename_favorite(&self, id: &str, name: String) -> Result<(), CoreError> {
        self.favorites.rename(id, name)
    }

    pub fn delete_favorite(&self, id: &str) -> Result<(), CoreError> {
        self.favorites.delete(id)
    }

    /// `SaveFile(defaultName, content) → path | cancelled` (spec.md §6).
    /// The OS file-picker dialog is out of scope for this core (§9 "the
    /// core does not implement an OS file dialog") — callers supply the
    /// closure that actually shows one and returns the chosen path, or
    /// `None` if the user cancelled.
    pub fn save_file(
        &self,
        default_name: &str,
        content: &[u8],
        show_dialog: impl FnOnce(&str) -> Option<std::path::PathBuf>,
    ) -> Result<Option<std::path::PathBuf>, CoreError> {
        let Some(path) = show_dialog(default_name) else {
            return Ok(None);
        };
        std::fs::write(&path, content).map_err(|e| CoreError::Storage(format!("failed to save file: {e}")))?;
        Ok(Some(path))
    }
}

fn make_watch_source_factory(registry: Arc<SessionRegistry>, discovery: Arc<DiscoveryService>) -> WatchSourceFactory {
    Arc::new(move |context: &ContextName, gvk: &Gvk| {
        let session = registry.get(context)?;
        let (api_resource, scope) = discovery.resolve(context, gvk)?;
        let config = watcher::Config::default();

        // `resource_handle` is async (it awaits a lock on the session's
        // client); the factory contract is synchronous, so resolve it via
        // `futures::executor::block_on` the same way
        // `KubeconfigFileProvider::kube_config` bridges sync-over-async for
        // a one-shot, already-cheap lookup.
        let handle = futures::executor::block_on(session.resource_handle(api_resource, scope))?;
        let source: Arc<dyn crate::watch::WatchSource> = Arc::new(TransportWatchSource::new(handle, config));
        Some(source)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::NullContextProvider;
    use kubeview_core::EngineConfig;

    async fn make_api(dir: &tempfile::TempDir) -> ExplorerApi {
        let favorites = Arc::new(FavoritesStore::at_path(dir.path().join("favorites.json"), EventBus::default()));
        ExplorerApi::new(Arc::new(NullContextProvider), EngineConfig::default(), favorites).await
    }

    #[tokio::test]
    async fn list_contexts_delegates_to_provider() {
        let dir = tempfile::tempdir().unwrap();
        let api = make_api(&dir).await;
        assert!(api.list_contexts().is_empty());
    }

    #[tokio::test]
    async fn poll_before_start_is_disconnected_with_empty_rows() {
        let dir = tempfile::tempdir().unwrap();
        let api = make_api(&dir).await;
        let result = api.poll_resources().await;
        assert!(result.rows.is_empty());
        assert_eq!(result.watch_status, WatchStatus::Disconnected);
    }

    #[tokio::test]
    async fn favorites_round_trip_through_the_facade() {
        let dir = tempfile::tempdir().unwrap();
        let api = make_api(&dir).await;
        let favorite = api
            .save_favorite("mine".to_string(), Gvk::new("", "v1", "Pod"), vec![vec!["metadata".into(), "name".into()]])
            .unwrap();
        assert_eq!(api.list_favorites().len(), 1);
        api.delete_favorite(&favorite.id).unwrap();
        assert!(api.list_favorites().is_empty());
    }

    #[tokio::test]
    async fn connect_to_unknown_contexts_fails_without_aborting_batch() {
        let dir = tempfile::tempdir().unwrap();
        let api = make_api(&dir).await;
        let results = api.connect_to_contexts(vec![ContextName::new("nonexistent")]).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].ok);
    }
}
