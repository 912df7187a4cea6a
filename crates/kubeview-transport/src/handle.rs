//! Capability handles exposed by a Cluster Session (spec.md §4.1: "a
//! listable/watchable handle keyed by GVK, and a schema reader"). These are
//! the only two surfaces the engine crate touches — it never sees a raw
//! `kube::Client`.

use futures::stream::BoxStream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::ObjectList;
use kube::discovery::Scope;
use kube::runtime::watcher::{self, watcher};
use kube::Client;
use kubeview_core::CoreError;

/// Listable/watchable handle for one (cluster, GVK) pair. Construction
/// requires a resolved `kube::discovery::ApiResource` rather than a bare
/// GVK, because the REST plural (`deployments` vs `Deployment`) cannot be
/// derived from the GVK alone for every resource — the Discovery Service
/// one layer up is the component that resolves it.
#[derive(Clone)]
pub struct ResourceHandle {
    client: Client,
    api_resource: ApiResource,
    scope: Scope,
}

impl ResourceHandle {
    pub fn new(client: Client, api_resource: ApiResource, scope: Scope) -> Self {
        ResourceHandle {
            client,
            api_resource,
            scope,
        }
    }

    /// An `Api` spanning every namespace (namespaced resources) or the
    /// whole cluster (cluster-scoped resources) — the Aggregation Engine
    /// wants every row regardless of namespace, so `self.scope` only
    /// affects how list/watch requests are shaped under the hood, which
    /// `Api::all_with` already handles for both scopes.
    fn api(&self) -> Api<DynamicObject> {
        let _ = &self.scope;
        Api::all_with(self.client.clone(), &self.api_resource)
    }

    /// One bounded list call — the `Listing` state of the Watch Worker
    /// state machine (§4.5) uses this to seed its mirror.
    pub async fn list(&self, params: &kube::api::ListParams) -> Result<ObjectList<DynamicObject>, CoreError> {
        self.api()
            .list(params)
            .await
            .map_err(|e| CoreError::Protocol(format!("list {} failed: {e}", self.api_resource.kind)))
    }

    /// Long-lived watch stream, built on `kube::runtime::watcher` (the
    /// same primitive `orka`'s kubehub and `b4n`'s `BgObserver` use). The
    /// engine's Watch Worker maps the resulting `watcher::Event` stream
    /// onto the spec's ADDED/MODIFIED/DELETED vocabulary itself.
    pub fn watch(
        &self,
        config: watcher::Config,
    ) -> BoxStream<'static, Result<watcher::Event<DynamicObject>, watcher::Error>> {
        Box::pin(watcher(self.api(), config))
    }

    pub fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }
}

/// Raw OpenAPI schema reader for one cluster (spec.md §4.1: "a schema
/// reader returning the raw schema document for that cluster"). The
/// Schema Service builds its `SchemaNode` trees from whatever this
/// returns; this handle does no interpretation of its own.
#[derive(Clone)]
pub struct SchemaHandle {
    client: Client,
}

impl SchemaHandle {
    pub fn new(client: Client) -> Self {
        SchemaHandle { client }
    }

    /// Fetch the raw OpenAPI v2 document (`/openapi/v2`) as a
    /// `serde_json::Value`. `k8s-openapi` models individual resource
    /// types but not the discovery document itself, so this goes through
    /// `Client::request` against the raw path, the way the teacher's
    /// transport crates drop to a raw request when the typed surface
    /// doesn't cover a case.
    pub async fn fetch_openapi_document(&self) -> Result<serde_json::Value, CoreError> {
        let request = http::Request::get("/openapi/v2")
            .body(Vec::new())
            .map_err(|e| CoreError::Protocol(format!("malformed openapi request: {e}")))?;
        self.client
            .request::<serde_json::Value>(request)
            .await
            .map_err(|e| CoreError::Protocol(format!("openapi fetch failed: {e}")))
    }

    /// Resource list for a single group/version, used when the Schema
    /// Service only needs field names for one GVK rather than the whole
    /// cluster's document.
    pub async fn fetch_api_resource_list(
        &self,
        group_version_path: &str,
    ) -> Result<APIResourceList, CoreError> {
        let request = http::Request::get(group_version_path)
            .body(Vec::new())
            .map_err(|e| CoreError::Protocol(format!("malformed discovery request: {e}")))?;
        self.client
            .request::<APIResourceList>(request)
            .await
            .map_err(|e| CoreError::Protocol(format!("discovery fetch failed: {e}")))
    }
}
