//! Watch Worker (component E, spec.md §4.5).
//!
//! One instance per (Session, GVK). Grounded on `kube::runtime::watcher`
//! (used the same way by `orka`'s kubehub and `b4n`'s `BgObserver`): the
//! watcher itself already relists on "resource version too old"/connection
//! reset, emitting `Init`/`InitApply`/`InitDone` for each (re)list cycle and
//! `Apply`/`Delete` for steady-state changes. This worker maps that
//! vocabulary onto the spec's explicit `ADDED`/`MODIFIED`/`DELETED` events
//! and `Listing`/`Watching`/`Relisting` states rather than exposing
//! kube-rs's enum directly (per the "dynamically typed resource objects"
//! redesign note, §9), and synthesizes a diff on every relist so the
//! Aggregation Engine never sees a user-visible reset (§4.5: "Never deliver
//! a user-visible reset").
//!
//! Abstracted over [`WatchSource`] rather than `kube::Api` directly so
//! tests exercise the full state machine without a real API server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kubeview_core::{BackoffPolicy, CoreError};
use kubeview_transport::ContextName;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::diff::diff_fields;
use crate::model::{ResourceRow, RowId, WatchEvent};

/// One step of the underlying watch stream, already flattened to a plain
/// JSON document so tests don't need to construct a `DynamicObject`.
#[derive(Clone, Debug)]
pub enum RawWatchEvent {
    /// Start of a (re)list cycle.
    Init,
    /// One object returned by the (re)list.
    InitApply(serde_json::Value),
    /// The (re)list cycle is complete.
    InitDone,
    /// Steady-state create/update.
    Apply(serde_json::Value),
    /// Steady-state delete.
    Delete(serde_json::Value),
}

/// Source of raw watch events for one (session, GVK) pair. The production
/// implementation lives in [`crate::transport_adapter`]; tests supply an
/// in-memory fake.
#[async_trait]
pub trait WatchSource: Send + Sync + 'static {
    fn stream(&self) -> BoxStream<'static, Result<RawWatchEvent, CoreError>>;
}

/// `Init → Listing → Watching ↔ Relisting → Stopped` (spec.md §4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum WorkerState {
    Init = 0,
    Listing = 1,
    Watching = 2,
    Relisting = 3,
    Stopped = 4,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => WorkerState::Init,
            1 => WorkerState::Listing,
            2 => WorkerState::Watching,
            3 => WorkerState::Relisting,
            _ => WorkerState::Stopped,
        }
    }
}

fn row_from_value(context: &ContextName, object: serde_json::Value) -> ResourceRow {
    ResourceRow {
        context: context.clone(),
        object,
    }
}

/// A Watch Worker. Owns a local mirror (`RowId → ResourceRow`) used only to
/// synthesize relist diffs and to know whether an `Apply` is an `ADDED` or
/// a `MODIFIED` — the Aggregation Engine keeps its own canonical table
/// independently.
pub struct WatchWorker {
    context: ContextName,
    state: Arc<AtomicU8>,
    cancellation_token: CancellationToken,
}

impl WatchWorker {
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// Spawn the worker's run loop. `events_tx` carries `(context,
    /// WatchEvent)` to the Aggregation Engine's single-writer task;
    /// `state_tx` carries state transitions for observability.
    #[instrument(skip(source, events_tx, state_tx, backoff), fields(context = %context))]
    pub fn start(
        context: ContextName,
        source: Arc<dyn WatchSource>,
        events_tx: mpsc::UnboundedSender<(ContextName, WatchEvent)>,
        state_tx: mpsc::UnboundedSender<(ContextName, WorkerState)>,
        backoff: BackoffPolicy,
    ) -> Self {
        let state = Arc::new(AtomicU8::new(WorkerState::Init as u8));
        let cancellation_token = CancellationToken::new();
        let worker = WatchWorker {
            context: context.clone(),
            state: state.clone(),
            cancellation_token: cancellation_token.clone(),
        };

        tokio::spawn(run_loop(
            context,
            source,
            events_tx,
            state_tx,
            state,
            cancellation_token,
            backoff,
        ));

        worker
    }
}

async fn run_loop(
    context: ContextName,
    source: Arc<dyn WatchSource>,
    events_tx: mpsc::UnboundedSender<(ContextName, WatchEvent)>,
    state_tx: mpsc::UnboundedSender<(ContextName, WorkerState)>,
    state: Arc<AtomicU8>,
    cancellation_token: CancellationToken,
    backoff: BackoffPolicy,
) {
    let mut mirror: HashMap<RowId, ResourceRow> = HashMap::new();
    let mut relist_buffer: HashMap<RowId, ResourceRow> = HashMap::new();
    let mut first_cycle = true;
    let mut attempt: u32 = 0;

    let set_state = |s: WorkerState| {
        state.store(s as u8, Ordering::Release);
        let _ = state_tx.send((context.clone(), s));
    };

    'outer: loop {
        if cancellation_token.is_cancelled() {
            set_state(WorkerState::Stopped);
            return;
        }

        let mut stream = source.stream();
        loop {
            let next = tokio::select! {
                _ = cancellation_token.cancelled() => {
                    set_state(WorkerState::Stopped);
                    return;
                }
                item = stream.next() => item,
            };

            let Some(item) = next else {
                // Stream ended — treat like a transport drop and relist
                // on the shared backoff schedule (§4.5).
                break;
            };

            match item {
                Ok(RawWatchEvent::Init) => {
                    set_state(if first_cycle {
                        WorkerState::Listing
                    } else {
                        WorkerState::Relisting
                    });
                    relist_buffer.clear();
                }
                Ok(RawWatchEvent::InitApply(value)) => {
                    let row = row_from_value(&context, value);
                    relist_buffer.insert(row.row_id(), row);
                }
                Ok(RawWatchEvent::InitDone) => {
                    if first_cycle {
                        for row in relist_buffer.values() {
                            let _ = events_tx.send((context.clone(), WatchEvent::Added(row.clone())));
                        }
                        mirror = relist_buffer.clone();
                        first_cycle = false;
                    } else {
                        synthesize_relist_diff(&context, &mirror, &relist_buffer, &events_tx);
                        mirror = relist_buffer.clone();
                    }
                    attempt = 0;
                    set_state(WorkerState::Watching);
                }
                Ok(RawWatchEvent::Apply(value)) => {
                    let next_row = row_from_value(&context, value);
                    let row_id = next_row.row_id();
                    match mirror.insert(row_id.clone(), next_row.clone()) {
                        Some(prev_row) => {
                            let _ = events_tx.send((
                                context.clone(),
                                WatchEvent::Modified { prev: prev_row, next: next_row },
                            ));
                        }
                        // No prior row — either genuinely new, or (§7
                        // "Data" category) a MODIFIED with a missing
                        // previous row; both cases are an ADDED here.
                        None => {
                            let _ = events_tx.send((context.clone(), WatchEvent::Added(next_row)));
                        }
                    }
                }
                Ok(RawWatchEvent::Delete(value)) => {
                    let row = row_from_value(&context, value);
                    let row_id = row.row_id();
                    if let Some(removed) = mirror.remove(&row_id) {
                        let _ = events_tx.send((context.clone(), WatchEvent::Deleted(removed)));
                    }
                }
                Err(err) => {
                    warn!(error = %err, "watch stream error, relisting");
                    break;
                }
            }
        }

        if cancellation_token.is_cancelled() {
            set_state(WorkerState::Stopped);
            return;
        }

        let delay = backoff.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                set_state(WorkerState::Stopped);
                return;
            }
            _ = tokio::time::sleep(delay) => continue 'outer,
        }
    }
}

/// Compares the fresh relist against the prior mirror and emits
/// ADDED/MODIFIED/DELETED so the consumer sees a coherent delta instead of
/// a reset (spec.md §4.5, invariant 4: "Relist idempotence").
fn synthesize_relist_diff(
    context: &ContextName,
    mirror: &HashMap<RowId, ResourceRow>,
    fresh: &HashMap<RowId, ResourceRow>,
    events_tx: &mpsc::UnboundedSender<(ContextName, WatchEvent)>,
) {
    for (row_id, fresh_row) in fresh {
        match mirror.get(row_id) {
            None => {
                let _ = events_tx.send((context.clone(), WatchEvent::Added(fresh_row.clone())));
            }
            Some(prev_row) => {
                if !diff_fields(&prev_row.object, &fresh_row.object).is_empty() {
                    let _ = events_tx.send((
                        context.clone(),
                        WatchEvent::Modified {
                            prev: prev_row.clone(),
                            next: fresh_row.clone(),
                        },
                    ));
                }
            }
        }
    }
    for (row_id, prev_row) in mirror {
        if !fresh.contains_key(row_id) {
            let _ = events_tx.send((context.clone(), WatchEvent::Deleted(prev_row.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc::unbounded_channel;

    struct ScriptedSource {
        events: Mutex<Option<Vec<Result<RawWatchEvent, CoreError>>>>,
    }

    impl ScriptedSource {
        fn new(events: Vec<Result<RawWatchEvent, CoreError>>) -> Self {
            ScriptedSource {
                events: Mutex::new(Some(events)),
            }
        }
    }

    #[async_trait]
    impl WatchSource for ScriptedSource {
        fn stream(&self) -> BoxStream<'static, Result<RawWatchEvent, CoreError>> {
            let events = self.events.lock().unwrap().take().unwrap_or_default();
            Box::pin(stream::iter(events))
        }
    }

    fn pod(name: &str, phase: &str) -> serde_json::Value {
        json!({ "metadata": { "name": name, "namespace": "default" }, "status": { "phase": phase } })
    }

    #[tokio::test]
    async fn initial_list_emits_added_for_every_row() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(RawWatchEvent::Init),
            Ok(RawWatchEvent::InitApply(pod("a", "Running"))),
            Ok(RawWatchEvent::InitApply(pod("b", "Running"))),
            Ok(RawWatchEvent::InitDone),
        ]));
        let (events_tx, mut events_rx) = unbounded_channel();
        let (state_tx, _state_rx) = unbounded_channel();
        let worker = WatchWorker::start(
            ContextName::new("dev"),
            source,
            events_tx,
            state_tx,
            BackoffPolicy::default(),
        );

        let mut added = Vec::new();
        for _ in 0..2 {
            let (_, event) = events_rx.recv().await.unwrap();
            added.push(event);
        }
        assert!(added.iter().all(|e| matches!(e, WatchEvent::Added(_))));
        worker.stop();
    }

    #[tokio::test]
    async fn apply_without_prior_row_is_added_not_modified() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(RawWatchEvent::Init),
            Ok(RawWatchEvent::InitDone),
            Ok(RawWatchEvent::Apply(pod("a", "Running"))),
        ]));
        let (events_tx, mut events_rx) = unbounded_channel();
        let (state_tx, _state_rx) = unbounded_channel();
        let worker = WatchWorker::start(
            ContextName::new("dev"),
            source,
            events_tx,
            state_tx,
            BackoffPolicy::default(),
        );

        let (_, event) = events_rx.recv().await.unwrap();
        assert!(matches!(event, WatchEvent::Added(_)));
        worker.stop();
    }

    #[tokio::test]
    async fn relist_with_no_changes_produces_empty_delta() {
        let context = ContextName::new("dev");
        let mut mirror = HashMap::new();
        let row = row_from_value(&context, pod("a", "Running"));
        mirror.insert(row.row_id(), row.clone());
        let mut fresh = HashMap::new();
        fresh.insert(row.row_id(), row);

        let (events_tx, mut events_rx) = unbounded_channel();
        synthesize_relist_diff(&context, &mirror, &fresh, &events_tx);
        drop(events_tx);
        assert!(events_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn relist_reports_additions_and_removals_only() {
        let context = ContextName::new("dev");
        let mut mirror = HashMap::new();
        let stale = row_from_value(&context, pod("stale", "Running"));
        mirror.insert(stale.row_id(), stale.clone());

        let mut fresh = HashMap::new();
        let new_row = row_from_value(&context, pod("new", "Running"));
        fresh.insert(new_row.row_id(), new_row);

        let (events_tx, mut events_rx) = unbounded_channel();
        synthesize_relist_diff(&context, &mirror, &fresh, &events_tx);
        drop(events_tx);

        let mut saw_added = false;
        let mut saw_deleted = false;
        while let Some((_, event)) = events_rx.recv().await {
            match event {
                WatchEvent::Added(_) => saw_added = true,
                WatchEvent::Deleted(_) => saw_deleted = true,
                WatchEvent::Modified { .. } => panic!("unexpected modified"),
            }
        }
        assert!(saw_added && saw_deleted);
    }
}
