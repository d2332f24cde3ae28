//! Event model: the append-only facts that make up an orchestration's history.
//!
//! Every mutation of an orchestration instance is expressed as a `HistoryEvent`
//! appended by the task hub; nothing is ever rewritten in place. The payload
//! enum mirrors the wire protocol's oneof exactly (one populated variant per
//! event, discriminated by [`EventType`]), and optional fields stay `Option` so
//! an absent value is distinguishable from an empty string after a round trip.

use serde::{Deserialize, Serialize};

use crate::state::OrchestrationState;

/// Sentinel event id for events that are not scheduling points.
///
/// Scheduling events (`TaskScheduled`, `TimerCreated`,
/// `SubOrchestrationInstanceCreated`) carry the correlation id assigned by the
/// orchestration logic as their `event_id`; everything else carries this.
pub const NO_EVENT_ID: i32 = -1;

/// Identity of one logical workflow run.
///
/// `instance_id` is stable across continue-as-new generations; `execution_id`
/// changes with each generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationInstance {
    pub instance_id: String,
    pub execution_id: Option<String>,
}

impl OrchestrationInstance {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: None,
        }
    }

    pub fn with_execution(instance_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: Some(execution_id.into()),
        }
    }
}

/// Link back to the parent orchestration for a sub-orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInstanceInfo {
    pub orchestration_instance: OrchestrationInstance,
    pub name: Option<String>,
    /// The scheduling id the parent used for `SubOrchestrationInstanceCreated`.
    pub task_scheduled_id: Option<i32>,
}

/// Failure description carried by failed tasks, sub-orchestrations and
/// orchestrations. `inner_failure` chains causes for root-causing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailureDetails {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub inner_failure: Option<Box<TaskFailureDetails>>,
    /// When set, no caller may automatically retry the failed work.
    pub is_non_retriable: bool,
}

impl TaskFailureDetails {
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            stack_trace: None,
            inner_failure: None,
            is_non_retriable: false,
        }
    }

    pub fn non_retriable(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            is_non_retriable: true,
            ..Self::new(error_type, error_message)
        }
    }

    /// Wrap `self` around an inner cause.
    pub fn caused_by(mut self, inner: TaskFailureDetails) -> Self {
        self.inner_failure = Some(Box::new(inner));
        self
    }

    /// Walk the `inner_failure` chain to the deepest cause.
    pub fn root_cause(&self) -> &TaskFailureDetails {
        let mut cur = self;
        while let Some(inner) = cur.inner_failure.as_deref() {
            cur = inner;
        }
        cur
    }

    pub fn display_message(&self) -> String {
        format!("{}: {}", self.error_type, self.error_message)
    }
}

impl std::fmt::Display for TaskFailureDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.error_message)
    }
}

/// Runtime status of an orchestration instance.
///
/// The discriminants are wire-stable: persisted records and the dispatch
/// boundary both rely on these exact ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum OrchestrationStatus {
    Running = 0,
    Completed = 1,
    ContinuedAsNew = 2,
    Failed = 3,
    Canceled = 4,
    Terminated = 5,
    Pending = 6,
    Suspended = 7,
}

impl OrchestrationStatus {
    /// Terminal states end the execution; `Suspended` is re-enterable and
    /// `Pending`/`Running` are live.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::ContinuedAsNew
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Canceled
                | OrchestrationStatus::Terminated
        )
    }
}

/// One history fact: a stable id, the wall-clock time the hub recorded it, and
/// exactly one payload variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i32,
    pub timestamp_ms: u64,
    pub payload: EventPayload,
}

impl HistoryEvent {
    pub fn new(event_id: i32, timestamp_ms: u64, payload: EventPayload) -> Self {
        Self {
            event_id,
            timestamp_ms,
            payload,
        }
    }

    /// The wire discriminator for the populated payload variant.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

/// The closed set of history event payloads.
///
/// A native tagged enum makes the "exactly one variant populated" invariant
/// unrepresentable to violate, unlike the generated wire bindings this models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    ExecutionStarted {
        name: String,
        version: Option<String>,
        input: Option<String>,
        orchestration_instance: OrchestrationInstance,
        parent_instance: Option<ParentInstanceInfo>,
        scheduled_start_ms: Option<u64>,
        correlation_data: Option<String>,
    },
    ExecutionCompleted {
        status: OrchestrationStatus,
        result: Option<String>,
        failure_details: Option<TaskFailureDetails>,
    },
    ExecutionTerminated {
        input: Option<String>,
    },
    ExecutionSuspended {
        input: Option<String>,
    },
    ExecutionResumed {
        input: Option<String>,
    },
    TaskScheduled {
        name: String,
        version: Option<String>,
        input: Option<String>,
    },
    TaskCompleted {
        task_scheduled_id: i32,
        result: Option<String>,
    },
    TaskFailed {
        task_scheduled_id: i32,
        failure_details: TaskFailureDetails,
    },
    SubOrchestrationInstanceCreated {
        instance_id: String,
        name: String,
        version: Option<String>,
        input: Option<String>,
    },
    SubOrchestrationInstanceCompleted {
        task_scheduled_id: i32,
        result: Option<String>,
    },
    SubOrchestrationInstanceFailed {
        task_scheduled_id: i32,
        failure_details: TaskFailureDetails,
    },
    TimerCreated {
        fire_at_ms: u64,
    },
    TimerFired {
        fire_at_ms: u64,
        timer_id: i32,
    },
    OrchestratorStarted,
    OrchestratorCompleted,
    EventSent {
        instance_id: String,
        name: String,
        input: Option<String>,
    },
    EventRaised {
        name: String,
        input: Option<String>,
    },
    Generic {
        data: String,
    },
    HistoryState {
        orchestration_state: OrchestrationState,
    },
    ContinueAsNew {
        input: Option<String>,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::ExecutionStarted { .. } => EventType::ExecutionStarted,
            EventPayload::ExecutionCompleted { .. } => EventType::ExecutionCompleted,
            EventPayload::ExecutionTerminated { .. } => EventType::ExecutionTerminated,
            EventPayload::ExecutionSuspended { .. } => EventType::ExecutionSuspended,
            EventPayload::ExecutionResumed { .. } => EventType::ExecutionResumed,
            EventPayload::TaskScheduled { .. } => EventType::TaskScheduled,
            EventPayload::TaskCompleted { .. } => EventType::TaskCompleted,
            EventPayload::TaskFailed { .. } => EventType::TaskFailed,
            EventPayload::SubOrchestrationInstanceCreated { .. } => {
                EventType::SubOrchestrationInstanceCreated
            }
            EventPayload::SubOrchestrationInstanceCompleted { .. } => {
                EventType::SubOrchestrationInstanceCompleted
            }
            EventPayload::SubOrchestrationInstanceFailed { .. } => {
                EventType::SubOrchestrationInstanceFailed
            }
            EventPayload::TimerCreated { .. } => EventType::TimerCreated,
            EventPayload::TimerFired { .. } => EventType::TimerFired,
            EventPayload::OrchestratorStarted => EventType::OrchestratorStarted,
            EventPayload::OrchestratorCompleted => EventType::OrchestratorCompleted,
            EventPayload::EventSent { .. } => EventType::EventSent,
            EventPayload::EventRaised { .. } => EventType::EventRaised,
            EventPayload::Generic { .. } => EventType::Generic,
            EventPayload::HistoryState { .. } => EventType::HistoryState,
            EventPayload::ContinueAsNew { .. } => EventType::ContinueAsNew,
        }
    }
}

/// Wire-stable discriminator for [`EventPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EventType {
    ExecutionStarted = 3,
    ExecutionCompleted = 4,
    ExecutionTerminated = 5,
    TaskScheduled = 6,
    TaskCompleted = 7,
    TaskFailed = 8,
    SubOrchestrationInstanceCreated = 9,
    SubOrchestrationInstanceCompleted = 10,
    SubOrchestrationInstanceFailed = 11,
    TimerCreated = 12,
    TimerFired = 13,
    OrchestratorStarted = 14,
    OrchestratorCompleted = 15,
    EventSent = 16,
    EventRaised = 17,
    Generic = 18,
    HistoryState = 19,
    ContinueAsNew = 20,
    ExecutionSuspended = 21,
    ExecutionResumed = 22,
}
