//! Orchestrator actions: the side-effect requests a pass produces.
//!
//! A pass never performs side effects directly; it emits an ordered list of
//! actions for the hub to durably apply. Emission order is wire order.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::history::{HistoryEvent, OrchestrationInstance, OrchestrationStatus, TaskFailureDetails};

/// One requested side effect, tagged with the correlation id that scheduled it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorAction {
    pub id: i32,
    pub payload: ActionPayload,
}

impl OrchestratorAction {
    pub fn new(id: i32, payload: ActionPayload) -> Self {
        Self { id, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ActionPayload {
    ScheduleTask {
        name: String,
        version: Option<String>,
        input: Option<String>,
    },
    CreateSubOrchestration {
        instance_id: String,
        name: String,
        version: Option<String>,
        input: Option<String>,
    },
    CreateTimer {
        fire_at_ms: u64,
    },
    SendEvent {
        target_instance: OrchestrationInstance,
        name: String,
        data: Option<String>,
    },
    CompleteOrchestration {
        status: OrchestrationStatus,
        result: Option<String>,
        details: Option<String>,
        new_version: Option<String>,
        /// Events re-delivered to the next execution on continue-as-new.
        carryover_events: Vec<HistoryEvent>,
        failure_details: Option<TaskFailureDetails>,
    },
}

/// Collects actions in emission order and enforces that nothing follows a
/// `CompleteOrchestration`.
#[derive(Debug, Default)]
pub struct ActionCollector {
    actions: Vec<OrchestratorAction>,
    completed: bool,
}

impl ActionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: OrchestratorAction) -> Result<(), EngineError> {
        if self.completed {
            return Err(EngineError::ActionAfterCompletion);
        }
        if matches!(action.payload, ActionPayload::CompleteOrchestration { .. }) {
            self.completed = true;
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn into_actions(self) -> Vec<OrchestratorAction> {
        self.actions
    }
}
