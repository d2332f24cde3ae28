//! Poll-based suspension points for orchestration logic.
//!
//! A [`DurableFuture`] claims its correlation id lazily on first poll, so ids
//! are assigned in await order and replay re-derives the same ids as the
//! original execution. The pass executor polls with a noop waker: a future is
//! `Ready` exactly when its completion is already recorded in the correlation
//! map, and `Pending` marks the pass's frontier.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::actions::{ActionPayload, OrchestratorAction};
use crate::correlation::{CompletionValue, PendingKind};
use crate::history::TaskFailureDetails;
use crate::OrchestrationContext;

/// Resolved value of a durable suspension point.
#[derive(Debug, Clone)]
pub enum DurableOutput {
    Activity(Result<Option<String>, TaskFailureDetails>),
    Timer,
    External(Option<String>),
    SubOrchestration(Result<Option<String>, TaskFailureDetails>),
}

impl DurableOutput {
    pub fn into_activity(self) -> Result<Option<String>, TaskFailureDetails> {
        match self {
            DurableOutput::Activity(r) => r,
            other => panic!("expected activity output, got {other:?}"),
        }
    }

    pub fn into_sub_orchestration(self) -> Result<Option<String>, TaskFailureDetails> {
        match self {
            DurableOutput::SubOrchestration(r) => r,
            other => panic!("expected sub-orchestration output, got {other:?}"),
        }
    }

    pub fn into_external(self) -> Option<String> {
        match self {
            DurableOutput::External(v) => v,
            other => panic!("expected external event output, got {other:?}"),
        }
    }
}

/// A suspension point. `Unpin` by construction, so logic can combine these
/// with `futures::future::join` and friends without boxing.
pub struct DurableFuture(pub(crate) Kind);

pub(crate) enum Kind {
    Task {
        ctx: OrchestrationContext,
        name: String,
        version: Option<String>,
        input: Option<String>,
        claimed_id: Cell<Option<i32>>,
    },
    Timer {
        ctx: OrchestrationContext,
        delay_ms: u64,
        claimed_id: Cell<Option<i32>>,
    },
    SubOrchestration {
        ctx: OrchestrationContext,
        name: String,
        version: Option<String>,
        instance_id: Option<String>,
        input: Option<String>,
        claimed_id: Cell<Option<i32>>,
    },
    External {
        ctx: OrchestrationContext,
        name: String,
    },
}

pub(crate) fn task(
    ctx: OrchestrationContext,
    name: String,
    version: Option<String>,
    input: Option<String>,
) -> DurableFuture {
    DurableFuture(Kind::Task {
        ctx,
        name,
        version,
        input,
        claimed_id: Cell::new(None),
    })
}

pub(crate) fn timer(ctx: OrchestrationContext, delay_ms: u64) -> DurableFuture {
    DurableFuture(Kind::Timer {
        ctx,
        delay_ms,
        claimed_id: Cell::new(None),
    })
}

pub(crate) fn sub_orchestration(
    ctx: OrchestrationContext,
    name: String,
    version: Option<String>,
    instance_id: Option<String>,
    input: Option<String>,
) -> DurableFuture {
    DurableFuture(Kind::SubOrchestration {
        ctx,
        name,
        version,
        instance_id,
        input,
        claimed_id: Cell::new(None),
    })
}

pub(crate) fn external(ctx: OrchestrationContext, name: String) -> DurableFuture {
    DurableFuture(Kind::External { ctx, name })
}

impl Future for DurableFuture {
    type Output = DurableOutput;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &self.get_mut().0 {
            Kind::Task {
                ctx,
                name,
                version,
                input,
                claimed_id,
            } => {
                let mut inner = ctx.inner.lock().expect("ctx lock");
                let id = match claimed_id.get() {
                    Some(id) => id,
                    None => {
                        let id = inner.sequence.next_id();
                        claimed_id.set(Some(id));
                        if !inner.correlation.is_in_history(id) {
                            inner.mark_live();
                            inner
                                .correlation
                                .record_scheduled(id, PendingKind::Task, false);
                            inner.record_action(OrchestratorAction::new(
                                id,
                                ActionPayload::ScheduleTask {
                                    name: name.clone(),
                                    version: version.clone(),
                                    input: input.clone(),
                                },
                            ));
                        }
                        id
                    }
                };
                match inner.correlation.take_completion(id) {
                    Some(CompletionValue::Task(r)) => Poll::Ready(DurableOutput::Activity(r)),
                    // resolve() enforces kind agreement, so other variants
                    // cannot be stored under a task id.
                    _ => Poll::Pending,
                }
            }
            Kind::Timer {
                ctx,
                delay_ms,
                claimed_id,
            } => {
                let mut inner = ctx.inner.lock().expect("ctx lock");
                let id = match claimed_id.get() {
                    Some(id) => id,
                    None => {
                        let id = inner.sequence.next_id();
                        claimed_id.set(Some(id));
                        if !inner.correlation.is_in_history(id) {
                            inner.mark_live();
                            inner
                                .correlation
                                .record_scheduled(id, PendingKind::Timer, false);
                            let fire_at_ms = inner.current_time_ms + delay_ms;
                            inner.record_action(OrchestratorAction::new(
                                id,
                                ActionPayload::CreateTimer { fire_at_ms },
                            ));
                        }
                        id
                    }
                };
                match inner.correlation.take_completion(id) {
                    Some(CompletionValue::TimerFired { .. }) => Poll::Ready(DurableOutput::Timer),
                    _ => Poll::Pending,
                }
            }
            Kind::SubOrchestration {
                ctx,
                name,
                version,
                instance_id,
                input,
                claimed_id,
            } => {
                let mut inner = ctx.inner.lock().expect("ctx lock");
                let id = match claimed_id.get() {
                    Some(id) => id,
                    None => {
                        let id = inner.sequence.next_id();
                        claimed_id.set(Some(id));
                        if !inner.correlation.is_in_history(id) {
                            inner.mark_live();
                            inner
                                .correlation
                                .record_scheduled(id, PendingKind::SubOrchestration, false);
                            let child_id = instance_id.clone().unwrap_or_else(|| {
                                format!("{}:{:04x}", inner.instance.instance_id, id)
                            });
                            inner.record_action(OrchestratorAction::new(
                                id,
                                ActionPayload::CreateSubOrchestration {
                                    instance_id: child_id,
                                    name: name.clone(),
                                    version: version.clone(),
                                    input: input.clone(),
                                },
                            ));
                        }
                        id
                    }
                };
                match inner.correlation.take_completion(id) {
                    Some(CompletionValue::SubOrchestration(r)) => {
                        Poll::Ready(DurableOutput::SubOrchestration(r))
                    }
                    _ => Poll::Pending,
                }
            }
            Kind::External { ctx, name } => {
                let mut inner = ctx.inner.lock().expect("ctx lock");
                match inner.correlation.pop_event(name) {
                    Some(input) => Poll::Ready(DurableOutput::External(input)),
                    None => Poll::Pending,
                }
            }
        }
    }
}
