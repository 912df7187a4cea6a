//! Fakes shared across this crate's test modules, so none of them touch a
//! real API server (SPEC_FULL.md's Test tooling section).

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use kubeview_core::CoreError;
use kubeview_transport::{ContextName, ContextProvider};

use crate::watch::{RawWatchEvent, WatchSource};

/// A `ContextProvider` that knows no contexts and rejects every lookup —
/// used by registry tests that only care about fan-out behavior, not
/// actual connectivity.
pub struct NullContextProvider;

impl ContextProvider for NullContextProvider {
    fn list_context_names(&self) -> Vec<ContextName> {
        Vec::new()
    }

    fn kube_config(&self, name: &ContextName) -> Result<kube::Config, CoreError> {
        Err(CoreError::NotFound(name.to_string()))
    }
}

/// A `WatchSource` that replays a fixed, caller-supplied script exactly
/// once. Consuming it twice yields an empty stream the second time, which
/// exercises the same "stream ended" relist path a dropped connection
/// would.
pub struct ScriptedWatchSource {
    events: Mutex<Option<Vec<Result<RawWatchEvent, CoreError>>>>,
}

impl ScriptedWatchSource {
    pub fn new(events: Vec<Result<RawWatchEvent, CoreError>>) -> Self {
        ScriptedWatchSource {
            events: Mutex::new(Some(events)),
        }
    }
}

#[async_trait]
impl WatchSource for ScriptedWatchSource {
    fn stream(&self) -> BoxStream<'static, Result<RawWatchEvent, CoreError>> {
        let events = self.events.lock().unwrap().take().unwrap_or_default();
        Box::pin(stream::iter(events))
    }
}
