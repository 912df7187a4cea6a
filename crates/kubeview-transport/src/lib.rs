//! # kubeview-transport
//!
//! Component A from the system overview: the Cluster Session. Owns one
//! authenticated connection to one context, probes its capabilities, and
//! hands out narrow capability handles (`ResourceHandle`, `SchemaHandle`)
//! that the engine crate uses without ever touching a `kube::Client`
//! directly. Nothing upstream of this crate knows how a connection is
//! authenticated or reconnected.

pub mod handle;
pub mod provider;
pub mod session;
pub mod types;

pub use handle::{ResourceHandle, SchemaHandle};
pub use provider::{ContextProvider, KubeconfigFileProvider};
pub use session::{ClusterSession, ConnectionEvent, SessionState};
pub use types::{ContextName, Gvk};
