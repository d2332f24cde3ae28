//! Two-phase history replayer.
//!
//! Phase 1 rehydrates `past_events` into the correlation map and execution
//! metadata without producing actions. Phase 2 applies `new_events` in arrival
//! order, honoring suspension buffering and the terminate short-circuit. The
//! orchestration logic then re-executes from the top with a noop-waker poll:
//! recorded completions resolve synchronously, so one poll reaches the pass's
//! pending frontier.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::actions::{ActionPayload, OrchestratorAction};
use crate::correlation::{CompletionValue, PendingKind};
use crate::history::{
    EventPayload, HistoryEvent, OrchestrationInstance, OrchestrationStatus, TaskFailureDetails,
    NO_EVENT_ID,
};
use crate::registry::OrchestrationHandler;
use crate::{poll_once, OrchestrationContext};

/// How a pass ended.
#[derive(Debug, Clone)]
pub enum TurnResult {
    /// Logic is suspended on outstanding work; more events are needed.
    Continue,
    Completed(Option<String>),
    Failed(TaskFailureDetails),
    ContinuedAsNew {
        input: Option<String>,
        new_version: Option<String>,
    },
    Terminated {
        output: Option<String>,
    },
    /// Instance is suspended; logic was not polled.
    Suspended,
}

/// Everything a pass produced: the ordered actions for the hub, the latest
/// custom status, and how the pass ended.
#[derive(Debug)]
pub struct TurnOutcome {
    pub actions: Vec<OrchestratorAction>,
    pub custom_status: Option<String>,
    pub result: TurnResult,
}

pub struct ReplayEngine {
    ctx: OrchestrationContext,
    name: Option<String>,
    version: Option<String>,
    input: Option<String>,
    suspended: bool,
    suspend_buffer: Vec<HistoryEvent>,
    terminated_with: Option<Option<String>>,
    history_terminal: bool,
}

impl ReplayEngine {
    /// Folds both event lists up front; accessors and `execute` operate on
    /// the rehydrated state.
    pub fn new(
        instance: OrchestrationInstance,
        past_events: &[HistoryEvent],
        new_events: &[HistoryEvent],
    ) -> Self {
        let mut engine = Self {
            ctx: OrchestrationContext::new(instance),
            name: None,
            version: None,
            input: None,
            suspended: false,
            suspend_buffer: Vec::new(),
            terminated_with: None,
            history_terminal: false,
        };
        // A first pass has nothing to replay; otherwise logic is replaying
        // until it claims an id with no history counterpart.
        engine
            .ctx
            .inner
            .lock()
            .expect("ctx lock")
            .is_replaying = !past_events.is_empty();
        for event in past_events {
            engine.fold(event);
        }
        for event in new_events {
            engine.fold(event);
        }
        engine
    }

    /// Orchestration name from ExecutionStarted, once folded.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn fold(&mut self, event: &HistoryEvent) {
        // After a terminate, only the completion the hub appended for it still
        // matters: seeing it marks the history terminal so later passes on
        // the instance do not re-emit the terminated completion.
        if self.terminated_with.is_some() {
            if matches!(event.payload, EventPayload::ExecutionCompleted { .. }) {
                self.history_terminal = true;
            }
            return;
        }

        // Terminate cuts through suspension; everything else buffers while
        // suspended until the matching resume re-applies it in order.
        if self.suspended {
            match &event.payload {
                EventPayload::ExecutionResumed { .. } => {
                    self.suspended = false;
                    let buffered = std::mem::take(&mut self.suspend_buffer);
                    for ev in buffered {
                        self.fold(&ev);
                    }
                }
                EventPayload::ExecutionTerminated { input } => {
                    self.terminated_with = Some(input.clone());
                }
                EventPayload::ExecutionSuspended { .. } => {}
                _ => self.suspend_buffer.push(event.clone()),
            }
            return;
        }

        let mut inner = self.ctx.inner.lock().expect("ctx lock");
        match &event.payload {
            EventPayload::OrchestratorStarted => {
                inner.current_time_ms = event.timestamp_ms;
            }
            EventPayload::OrchestratorCompleted => {}
            EventPayload::ExecutionStarted {
                name,
                version,
                input,
                ..
            } => {
                self.name = Some(name.clone());
                self.version = version.clone();
                self.input = input.clone();
            }
            EventPayload::ExecutionCompleted { status, .. } => {
                debug!(
                    instance = %inner.instance.instance_id,
                    ?status,
                    "history already terminal"
                );
                self.history_terminal = true;
            }
            EventPayload::ExecutionTerminated { input } => {
                self.terminated_with = Some(input.clone());
            }
            EventPayload::ExecutionSuspended { .. } => {
                self.suspended = true;
            }
            EventPayload::ExecutionResumed { .. } => {}
            EventPayload::TaskScheduled { .. } => {
                inner
                    .correlation
                    .record_scheduled(event.event_id, PendingKind::Task, true);
            }
            EventPayload::TimerCreated { .. } => {
                inner
                    .correlation
                    .record_scheduled(event.event_id, PendingKind::Timer, true);
            }
            EventPayload::SubOrchestrationInstanceCreated { .. } => {
                inner
                    .correlation
                    .record_scheduled(event.event_id, PendingKind::SubOrchestration, true);
            }
            EventPayload::TaskCompleted {
                task_scheduled_id,
                result,
            } => {
                inner
                    .correlation
                    .resolve(*task_scheduled_id, CompletionValue::Task(Ok(result.clone())));
            }
            EventPayload::TaskFailed {
                task_scheduled_id,
                failure_details,
            } => {
                inner.correlation.resolve(
                    *task_scheduled_id,
                    CompletionValue::Task(Err(failure_details.clone())),
                );
            }
            EventPayload::SubOrchestrationInstanceCompleted {
                task_scheduled_id,
                result,
            } => {
                inner.correlation.resolve(
                    *task_scheduled_id,
                    CompletionValue::SubOrchestration(Ok(result.clone())),
                );
            }
            EventPayload::SubOrchestrationInstanceFailed {
                task_scheduled_id,
                failure_details,
            } => {
                inner.correlation.resolve(
                    *task_scheduled_id,
                    CompletionValue::SubOrchestration(Err(failure_details.clone())),
                );
            }
            EventPayload::TimerFired {
                fire_at_ms,
                timer_id,
            } => {
                inner.correlation.resolve(
                    *timer_id,
                    CompletionValue::TimerFired {
                        fire_at_ms: *fire_at_ms,
                    },
                );
            }
            EventPayload::EventRaised { name, input } => {
                inner.correlation.push_event(name.clone(), input.clone());
            }
            EventPayload::EventSent { .. } => {
                // Sends are fire-and-forget but still consume a correlation
                // id; re-claiming it must not resend.
                if event.event_id != NO_EVENT_ID {
                    inner.correlation.record_in_history(event.event_id);
                }
            }
            EventPayload::Generic { .. } => {}
            EventPayload::HistoryState { .. } => {}
            EventPayload::ContinueAsNew { .. } => {}
        }
    }

    /// Run one pass of the orchestration logic and collect its outcome.
    pub fn execute(self, handler: &dyn OrchestrationHandler) -> TurnOutcome {
        let instance_id = self.ctx.instance().instance_id;

        if self.history_terminal {
            warn!(instance = %instance_id, "pass on terminal history produced no actions");
            return TurnOutcome {
                actions: Vec::new(),
                custom_status: None,
                result: TurnResult::Continue,
            };
        }

        if let Some(output) = self.terminated_with {
            let action = OrchestratorAction::new(
                NO_EVENT_ID,
                ActionPayload::CompleteOrchestration {
                    status: OrchestrationStatus::Terminated,
                    result: output.clone(),
                    details: None,
                    new_version: None,
                    carryover_events: Vec::new(),
                    failure_details: None,
                },
            );
            return TurnOutcome {
                actions: vec![action],
                custom_status: None,
                result: TurnResult::Terminated { output },
            };
        }

        if self.suspended {
            debug!(instance = %instance_id, "instance suspended, logic not polled");
            return TurnOutcome {
                actions: Vec::new(),
                custom_status: None,
                result: TurnResult::Suspended,
            };
        }

        let mut fut = handler.invoke(self.ctx.clone(), self.input.clone());
        let polled = catch_unwind(AssertUnwindSafe(|| poll_once(fut.as_mut())));
        drop(fut);

        let mut inner = self.ctx.inner.lock().expect("ctx lock");

        let result = match polled {
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "orchestration panicked".to_string());
                warn!(instance = %instance_id, %message, "orchestration panicked");
                TurnResult::Failed(TaskFailureDetails::new("OrchestrationPanic", message))
            }
            Ok(std::task::Poll::Ready(Ok(output))) => TurnResult::Completed(output),
            Ok(std::task::Poll::Ready(Err(message))) => {
                TurnResult::Failed(TaskFailureDetails::new("OrchestrationError", message))
            }
            Ok(std::task::Poll::Pending) => {
                if let Some(e) = inner.collect_error.take() {
                    TurnResult::Failed(TaskFailureDetails::new("EngineError", e.to_string()))
                } else if let Some((input, new_version)) = inner.pending_continue_as_new.take() {
                    TurnResult::ContinuedAsNew { input, new_version }
                } else {
                    TurnResult::Continue
                }
            }
        };

        // Completion outcomes go through the collector so nothing can follow
        // them and emission order is preserved.
        match &result {
            TurnResult::Completed(output) => {
                inner.record_action(OrchestratorAction::new(
                    NO_EVENT_ID,
                    ActionPayload::CompleteOrchestration {
                        status: OrchestrationStatus::Completed,
                        result: output.clone(),
                        details: None,
                        new_version: None,
                        carryover_events: Vec::new(),
                        failure_details: None,
                    },
                ));
            }
            TurnResult::Failed(details) => {
                inner.record_action(OrchestratorAction::new(
                    NO_EVENT_ID,
                    ActionPayload::CompleteOrchestration {
                        status: OrchestrationStatus::Failed,
                        result: None,
                        details: Some(details.display_message()),
                        new_version: None,
                        carryover_events: Vec::new(),
                        failure_details: Some(details.clone()),
                    },
                ));
            }
            TurnResult::ContinuedAsNew { input, new_version } => {
                let now = inner.current_time_ms;
                let carryover: Vec<HistoryEvent> = inner
                    .correlation
                    .unconsumed_events()
                    .into_iter()
                    .map(|(name, input)| {
                        HistoryEvent::new(NO_EVENT_ID, now, EventPayload::EventRaised { name, input })
                    })
                    .collect();
                inner.record_action(OrchestratorAction::new(
                    NO_EVENT_ID,
                    ActionPayload::CompleteOrchestration {
                        status: OrchestrationStatus::ContinuedAsNew,
                        result: input.clone(),
                        details: None,
                        new_version: new_version.clone(),
                        carryover_events: carryover,
                        failure_details: None,
                    },
                ));
            }
            TurnResult::Continue | TurnResult::Terminated { .. } | TurnResult::Suspended => {}
        }

        let actions = std::mem::take(&mut inner.collector).into_actions();
        let custom_status = inner.custom_status.clone();
        drop(inner);

        TurnOutcome {
            actions,
            custom_status,
            result,
        }
    }
}
