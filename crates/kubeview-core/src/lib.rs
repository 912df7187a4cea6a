//! # kubeview-core
//!
//! ## Role
//! Ambient stack shared by every other crate in this workspace: the error
//! taxonomy, the internal event bus, adaptive reconnect backoff, a clock
//! seam for deterministic testing, process-wide configuration, and a
//! `tracing` bootstrap helper. Nothing in this crate knows what a GVK or a
//! `kube::Client` is — that belongs to `kubeview-transport` and
//! `kubeview-engine`.
//!
//! ## Design note
//! The teacher this workspace is descended from (`spark-core`) keeps this
//! layer `no_std`-compatible so it can run on embedded transports. This
//! application is a concrete desktop-adjacent Tokio process talking to
//! Kubernetes API servers, so that generality buys nothing here and was
//! dropped — see `DESIGN.md`.

pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod retry;
pub mod time;

pub use config::EngineConfig;
pub use error::{CoreError, ErrorCategory};
pub use events::{EngineEvent, EventBus, Severity, StatusEvent};
pub use observability::init_tracing;
pub use retry::BackoffPolicy;
pub use time::{Clock, SystemClock};
