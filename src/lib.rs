//! Durable orchestration execution engine.
//!
//! Orchestrations are long-running workflows whose progress is recorded as an
//! append-only event history. Instead of holding state in memory across
//! failures, the engine re-executes orchestration logic from the start on
//! every pass, feeding it recorded completions so it deterministically reaches
//! the same suspension point and only then observes new events. A pass
//! produces an ordered list of [`OrchestratorAction`]s for the task hub to
//! apply durably; the engine itself performs no side effects.
//!
//! The crate ships no transport. A host implements [`protocol::TaskHub`] over
//! its queue/store of choice and drives a [`worker::Worker`] against it.

pub mod actions;
pub mod correlation;
pub mod error;
pub mod futures;
pub mod history;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod replay;
pub mod state;
pub mod worker;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use tracing::warn;

pub use crate::actions::{ActionPayload, OrchestratorAction};
pub use crate::error::EngineError;
pub use crate::futures::{DurableFuture, DurableOutput};
pub use crate::history::{
    EventPayload, EventType, HistoryEvent, OrchestrationInstance, OrchestrationStatus,
    TaskFailureDetails, NO_EVENT_ID,
};
pub use crate::registry::{
    ActivityHandler, ActivityRegistry, FnActivity, FnOrchestration, OrchestrationHandler,
    OrchestrationRegistry, Registry, RegistryBuilder, VersionPolicy,
};
pub use crate::replay::{ReplayEngine, TurnOutcome, TurnResult};
pub use crate::state::OrchestrationState;
pub use crate::worker::{Worker, WorkerOptions};

use crate::actions::ActionCollector;
use crate::correlation::{CorrelationMap, SequenceCounter};

/// Mutable per-pass state shared between the context handle and its futures.
pub(crate) struct CtxInner {
    pub(crate) instance: OrchestrationInstance,
    pub(crate) sequence: SequenceCounter,
    pub(crate) correlation: CorrelationMap,
    pub(crate) collector: ActionCollector,
    pub(crate) custom_status: Option<String>,
    /// (input, new_version) once `continue_as_new` has been called.
    pub(crate) pending_continue_as_new: Option<(Option<String>, Option<String>)>,
    /// Deterministic time: timestamp of the latest OrchestratorStarted applied.
    pub(crate) current_time_ms: u64,
    pub(crate) is_replaying: bool,
    /// First collector violation, surfaced as a Failed completion.
    pub(crate) collect_error: Option<EngineError>,
}

impl CtxInner {
    fn new(instance: OrchestrationInstance) -> Self {
        Self {
            instance,
            sequence: SequenceCounter::new(),
            correlation: CorrelationMap::new(),
            collector: ActionCollector::new(),
            custom_status: None,
            pending_continue_as_new: None,
            current_time_ms: 0,
            is_replaying: true,
            collect_error: None,
        }
    }

    pub(crate) fn record_action(&mut self, action: OrchestratorAction) {
        if let Err(e) = self.collector.push(action) {
            warn!(instance = %self.instance.instance_id, error = %e, "action rejected");
            if self.collect_error.is_none() {
                self.collect_error = Some(e);
            }
        }
    }

    /// Called when logic claims an id with no history counterpart: everything
    /// from here on is live execution, not replay.
    pub(crate) fn mark_live(&mut self) {
        self.is_replaying = false;
    }
}

/// Handle orchestration logic uses to schedule durable work.
///
/// Cheap to clone; all clones share the same pass state.
#[derive(Clone)]
pub struct OrchestrationContext {
    pub(crate) inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    pub(crate) fn new(instance: OrchestrationInstance) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CtxInner::new(instance))),
        }
    }

    pub fn instance(&self) -> OrchestrationInstance {
        self.inner.lock().expect("ctx lock").instance.clone()
    }

    /// Deterministic current time: the timestamp of the latest
    /// OrchestratorStarted event, identical on every replay.
    pub fn now_ms(&self) -> u64 {
        self.inner.lock().expect("ctx lock").current_time_ms
    }

    /// True while the pass is re-executing recorded history.
    pub fn is_replaying(&self) -> bool {
        self.inner.lock().expect("ctx lock").is_replaying
    }

    /// Schedule an activity invocation; resolves with its result or failure.
    pub fn schedule_activity(
        &self,
        name: impl Into<String>,
        input: Option<String>,
    ) -> DurableFuture {
        futures::task(self.clone(), name.into(), None, input)
    }

    /// Like [`schedule_activity`](Self::schedule_activity) but pinned to a
    /// registered handler version.
    pub fn schedule_activity_versioned(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        input: Option<String>,
    ) -> DurableFuture {
        futures::task(self.clone(), name.into(), Some(version.into()), input)
    }

    /// Schedule a durable timer that fires `delay_ms` after the pass's
    /// deterministic current time.
    pub fn schedule_timer(&self, delay_ms: u64) -> DurableFuture {
        futures::timer(self.clone(), delay_ms)
    }

    /// Schedule a child orchestration. When `instance_id` is `None` a
    /// deterministic child id is derived from the parent id and the
    /// correlation id.
    pub fn schedule_sub_orchestration(
        &self,
        name: impl Into<String>,
        instance_id: Option<String>,
        input: Option<String>,
    ) -> DurableFuture {
        futures::sub_orchestration(self.clone(), name.into(), None, instance_id, input)
    }

    /// Like [`schedule_sub_orchestration`](Self::schedule_sub_orchestration)
    /// but pinned to a registered handler version.
    pub fn schedule_sub_orchestration_versioned(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
        instance_id: Option<String>,
        input: Option<String>,
    ) -> DurableFuture {
        futures::sub_orchestration(
            self.clone(),
            name.into(),
            Some(version.into()),
            instance_id,
            input,
        )
    }

    /// Wait for the next external event with the given name (FIFO per name).
    pub fn wait_event(&self, name: impl Into<String>) -> DurableFuture {
        futures::external(self.clone(), name.into())
    }

    /// Fire-and-forget event to another instance. Consumes a correlation id
    /// so replay stays aligned; the action is only recorded the first time,
    /// not when the send is rehydrated from history.
    pub fn send_event(
        &self,
        target: OrchestrationInstance,
        name: impl Into<String>,
        data: Option<String>,
    ) {
        let mut inner = self.inner.lock().expect("ctx lock");
        let id = inner.sequence.next_id();
        if !inner.correlation.is_in_history(id) {
            inner.mark_live();
            inner.correlation.record_in_history(id);
            inner.record_action(OrchestratorAction::new(
                id,
                ActionPayload::SendEvent {
                    target_instance: target,
                    name: name.into(),
                    data,
                },
            ));
        }
    }

    /// Restart the instance as a fresh execution with `input`. The returned
    /// future never resolves; the pass ends at the next suspension.
    pub fn continue_as_new(
        &self,
        input: Option<String>,
        new_version: Option<String>,
    ) -> impl Future<Output = ()> {
        {
            let mut inner = self.inner.lock().expect("ctx lock");
            if inner.pending_continue_as_new.is_none() {
                inner.pending_continue_as_new = Some((input, new_version));
            }
        }
        ::futures::future::pending()
    }

    pub fn set_custom_status(&self, status: impl Into<String>) {
        self.inner.lock().expect("ctx lock").custom_status = Some(status.into());
    }

    pub fn clear_custom_status(&self) {
        self.inner.lock().expect("ctx lock").custom_status = None;
    }

    /// Replay-aware info log: emitted only on the live execution, never while
    /// re-executing history.
    pub fn trace_info(&self, message: impl AsRef<str>) {
        let inner = self.inner.lock().expect("ctx lock");
        if !inner.is_replaying {
            tracing::info!(
                target: "durotask::orchestration",
                instance = %inner.instance.instance_id,
                "{}",
                message.as_ref()
            );
        }
    }

    /// Replay-aware warn log.
    pub fn trace_warn(&self, message: impl AsRef<str>) {
        let inner = self.inner.lock().expect("ctx lock");
        if !inner.is_replaying {
            tracing::warn!(
                target: "durotask::orchestration",
                instance = %inner.instance.instance_id,
                "{}",
                message.as_ref()
            );
        }
    }
}

fn noop_raw_waker() -> RawWaker {
    fn clone(_: *const ()) -> RawWaker {
        noop_raw_waker()
    }
    fn noop(_: *const ()) {}
    static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
    RawWaker::new(std::ptr::null(), &VTABLE)
}

pub(crate) fn noop_waker() -> Waker {
    // SAFETY: the vtable functions never dereference the null data pointer.
    unsafe { Waker::from_raw(noop_raw_waker()) }
}

/// Poll a future exactly once. Orchestration completions resolve
/// synchronously, so a single poll always reaches the pending frontier.
pub(crate) fn poll_once<F: Future + ?Sized>(fut: Pin<&mut F>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    fut.poll(&mut cx)
}
