//! Projection of an event history into the queryable instance state.
//!
//! The projector is a pure left fold over the history: re-running it over the
//! same events always yields the same state, and an instance's state can be
//! rebuilt from scratch at any time.

use serde::{Deserialize, Serialize};

use crate::history::{EventPayload, HistoryEvent, OrchestrationStatus, TaskFailureDetails};

/// Queryable snapshot of one orchestration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub instance_id: String,
    pub execution_id: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub status: OrchestrationStatus,
    pub created_ms: u64,
    pub last_updated_ms: u64,
    pub scheduled_start_ms: Option<u64>,
    pub input: Option<String>,
    pub output: Option<String>,
    pub custom_status: Option<String>,
    pub failure_details: Option<TaskFailureDetails>,
    /// Status masked by a suspension, restored on resume.
    pre_suspend_status: Option<OrchestrationStatus>,
}

impl OrchestrationState {
    /// Fold a full history into a state. `None` until an ExecutionStarted
    /// (or HistoryState snapshot) has been seen.
    pub fn project<'a>(history: impl IntoIterator<Item = &'a HistoryEvent>) -> Option<Self> {
        let mut state = None;
        for event in history {
            state = Self::fold(state, event);
        }
        state
    }

    /// Apply one event to an optional state.
    pub fn fold(state: Option<Self>, event: &HistoryEvent) -> Option<Self> {
        match &event.payload {
            EventPayload::ExecutionStarted {
                name,
                version,
                input,
                orchestration_instance,
                scheduled_start_ms,
                ..
            } => {
                // A new execution replaces whatever came before.
                let status = match scheduled_start_ms {
                    Some(at) if *at > event.timestamp_ms => OrchestrationStatus::Pending,
                    _ => OrchestrationStatus::Running,
                };
                Some(Self {
                    instance_id: orchestration_instance.instance_id.clone(),
                    execution_id: orchestration_instance.execution_id.clone(),
                    name: name.clone(),
                    version: version.clone(),
                    status,
                    created_ms: event.timestamp_ms,
                    last_updated_ms: event.timestamp_ms,
                    scheduled_start_ms: *scheduled_start_ms,
                    input: input.clone(),
                    output: None,
                    custom_status: None,
                    failure_details: None,
                    pre_suspend_status: None,
                })
            }
            // A carried snapshot takes precedence over anything folded so far.
            EventPayload::HistoryState {
                orchestration_state,
            } => Some(orchestration_state.clone()),
            _ => {
                let mut s = state?;
                s.apply(event);
                Some(s)
            }
        }
    }

    fn apply(&mut self, event: &HistoryEvent) {
        match &event.payload {
            EventPayload::OrchestratorCompleted => {
                self.last_updated_ms = event.timestamp_ms;
            }
            EventPayload::ExecutionCompleted {
                status,
                result,
                failure_details,
            } => {
                self.status = *status;
                self.output = result.clone();
                self.failure_details = failure_details.clone();
                self.pre_suspend_status = None;
                self.last_updated_ms = event.timestamp_ms;
            }
            EventPayload::ExecutionTerminated { input } => {
                self.status = OrchestrationStatus::Terminated;
                self.output = input.clone();
                self.pre_suspend_status = None;
                self.last_updated_ms = event.timestamp_ms;
            }
            EventPayload::ContinueAsNew { .. } => {
                self.status = OrchestrationStatus::ContinuedAsNew;
                self.pre_suspend_status = None;
                self.last_updated_ms = event.timestamp_ms;
            }
            EventPayload::ExecutionSuspended { .. } => {
                if !self.status.is_terminal() && self.status != OrchestrationStatus::Suspended {
                    self.pre_suspend_status = Some(self.status);
                    self.status = OrchestrationStatus::Suspended;
                    self.last_updated_ms = event.timestamp_ms;
                }
            }
            EventPayload::ExecutionResumed { .. } => {
                if let Some(prev) = self.pre_suspend_status.take() {
                    self.status = prev;
                    self.last_updated_ms = event.timestamp_ms;
                }
            }
            _ => {}
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
