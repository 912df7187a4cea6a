//! Adapts `kubeview-transport`'s [`ResourceHandle`] to the engine's
//! [`WatchSource`] abstraction, converting `kube::runtime::watcher::Event`
//! into the flattened [`RawWatchEvent`] vocabulary the Watch Worker speaks.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::runtime::watcher;
use kubeview_core::CoreError;
use kubeview_transport::ResourceHandle;

use crate::watch::{RawWatchEvent, WatchSource};

pub struct TransportWatchSource {
    handle: ResourceHandle,
    config: watcher::Config,
}

impl TransportWatchSource {
    pub fn new(handle: ResourceHandle, config: watcher::Config) -> Self {
        TransportWatchSource { handle, config }
    }
}

#[async_trait]
impl WatchSource for TransportWatchSource {
    fn stream(&self) -> BoxStream<'static, Result<RawWatchEvent, CoreError>> {
        let inner = self.handle.watch(self.config.clone());
        Box::pin(inner.map(|item| {
            item.map(|event| match event {
                watcher::Event::Init => RawWatchEvent::Init,
                watcher::Event::InitApply(obj) => {
                    RawWatchEvent::InitApply(serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null))
                }
                watcher::Event::InitDone => RawWatchEvent::InitDone,
                watcher::Event::Apply(obj) => {
                    RawWatchEvent::Apply(serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null))
                }
                watcher::Event::Delete(obj) => {
                    RawWatchEvent::Delete(serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null))
                }
            })
            .map_err(|e| CoreError::Protocol(format!("watch stream error: {e}")))
        }))
    }
}
