//! # kubeview-engine
//!
//! ## Role
//! The engine: everything that turns a set of kubeconfig contexts into a
//! live, multi-cluster resource table a UI can poll. Built on
//! `kubeview-transport`'s per-cluster primitives (Cluster Session, capability
//! handles) and `kubeview-core`'s ambient stack (errors, events, backoff,
//! config). [`api::ExplorerApi`] is the one type a UI layer needs to know
//! about; everything else in this crate is a component it assembles.

pub mod aggregate;
pub mod api;
pub mod diff;
pub mod discovery;
pub mod favorites;
pub mod model;
pub mod registry;
pub mod schema;
pub mod transport_adapter;
pub mod watch;

#[cfg(test)]
pub mod testutil;

pub use aggregate::{AggregationEngine, ConsumerToken};
pub use api::{ExplorerApi, PollResult, WatchStatus};
pub use discovery::DiscoveryService;
pub use favorites::FavoritesStore;
pub use model::{CellChange, FieldType, Favorite, MultiClusterGvk, ResourceRow, RowId, SchemaNode, WatchEvent};
pub use registry::{ConnectionResult, SessionRegistry};
pub use schema::{IgnoredFields, SchemaService};
pub use watch::{RawWatchEvent, WatchSource, WatchWorker, WorkerState};
