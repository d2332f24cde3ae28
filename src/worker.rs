//! Work item dispatch: fetches items from the hub and runs passes.
//!
//! Orchestrator passes for the same instance are strictly sequential (a
//! per-instance async mutex); distinct instances and activities run
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use crate::actions::{ActionPayload, OrchestratorAction};
use crate::error::EngineError;
use crate::history::{
    OrchestrationInstance, OrchestrationStatus, TaskFailureDetails, NO_EVENT_ID,
};
use crate::protocol::{
    ActivityRequest, ActivityResponse, OrchestratorRequest, OrchestratorResponse, TaskHub,
    WorkItem,
};
use crate::registry::{ActivityRegistry, OrchestrationRegistry};
use crate::replay::ReplayEngine;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Sleep between polls when the hub has no work.
    pub idle_sleep_ms: u64,
    /// Upper bound on work items in flight at once (orchestrator passes and
    /// activities combined).
    pub max_concurrent_items: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 10,
            max_concurrent_items: 64,
        }
    }
}

pub struct Worker {
    orchestrations: OrchestrationRegistry,
    activities: ActivityRegistry,
    options: WorkerOptions,
    instance_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Worker {
    pub fn new(
        orchestrations: OrchestrationRegistry,
        activities: ActivityRegistry,
        options: WorkerOptions,
    ) -> Self {
        Self {
            orchestrations,
            activities,
            options,
            instance_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn instance_lock(&self, instance_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.instance_locks.lock().await;
        locks
            .entry(instance_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one orchestrator pass. Serialized per instance id.
    pub async fn execute_orchestrator(
        &self,
        request: OrchestratorRequest,
    ) -> Result<OrchestratorResponse, EngineError> {
        let instance_id = request.instance_id.clone();
        let lock = self.instance_lock(&instance_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_pass(request).await
        };
        drop(lock);

        // Evict the entry once no other pass is holding or waiting on it,
        // so long-lived workers do not accumulate one lock per instance.
        let mut locks = self.instance_locks.lock().await;
        if locks
            .get(&instance_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(&instance_id);
        }
        drop(locks);

        result
    }

    async fn run_pass(
        &self,
        request: OrchestratorRequest,
    ) -> Result<OrchestratorResponse, EngineError> {
        let instance = match &request.execution_id {
            Some(eid) => OrchestrationInstance::with_execution(request.instance_id.clone(), eid),
            None => OrchestrationInstance::new(request.instance_id.clone()),
        };
        let engine = ReplayEngine::new(instance, &request.past_events, &request.new_events);

        let name = engine
            .name()
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::MalformedWorkItem(format!(
                    "instance '{}' has no ExecutionStarted event",
                    request.instance_id
                ))
            })?;
        let version = engine.version().map(str::to_string);

        let actions;
        let custom_status;
        match self.orchestrations.resolve_wire(&name, version.as_deref()) {
            Some(handler) => {
                debug!(instance = %request.instance_id, %name, "orchestrator pass");
                let outcome = engine.execute(&*handler);
                actions = outcome.actions;
                custom_status = outcome.custom_status;
            }
            None => {
                warn!(instance = %request.instance_id, %name, "unregistered orchestration");
                actions = vec![OrchestratorAction::new(
                    NO_EVENT_ID,
                    ActionPayload::CompleteOrchestration {
                        status: OrchestrationStatus::Failed,
                        result: None,
                        details: Some(format!("unregistered:{name}")),
                        new_version: None,
                        carryover_events: Vec::new(),
                        failure_details: Some(TaskFailureDetails::non_retriable(
                            "UnregisteredOrchestration",
                            format!("unregistered:{name}"),
                        )),
                    },
                )];
                custom_status = None;
            }
        }

        Ok(OrchestratorResponse {
            instance_id: request.instance_id,
            actions,
            custom_status,
        })
    }

    /// Run one activity. Handler errors become failure details, never a
    /// worker error.
    pub async fn execute_activity(&self, request: ActivityRequest) -> ActivityResponse {
        let instance_id = request.orchestration_instance.instance_id.clone();
        let outcome = match self
            .activities
            .resolve_wire(&request.name, request.version.as_deref())
        {
            Some(handler) => handler.invoke(request.input).await,
            None => {
                warn!(instance = %instance_id, name = %request.name, "unregistered activity");
                return ActivityResponse {
                    instance_id,
                    task_id: request.task_id,
                    result: None,
                    failure_details: Some(TaskFailureDetails::non_retriable(
                        "UnregisteredActivity",
                        format!("unregistered:{}", request.name),
                    )),
                };
            }
        };
        match outcome {
            Ok(result) => ActivityResponse {
                instance_id,
                task_id: request.task_id,
                result,
                failure_details: None,
            },
            Err(message) => ActivityResponse {
                instance_id,
                task_id: request.task_id,
                result: None,
                failure_details: Some(TaskFailureDetails::new("ActivityError", message)),
            },
        }
    }

    /// Fetch-and-dispatch loop. Each item runs on its own task, gated by the
    /// concurrency cap; malformed items are logged and left unacknowledged so
    /// the hub redelivers them.
    pub async fn run(self: Arc<Self>, hub: Arc<dyn TaskHub>) -> Result<(), EngineError> {
        let gate = Arc::new(Semaphore::new(self.options.max_concurrent_items));
        loop {
            let permit = Arc::clone(&gate)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Hub("worker semaphore closed".to_string()))?;
            match hub.get_work_item().await? {
                None => {
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(self.options.idle_sleep_ms)).await;
                }
                Some(item) => {
                    let worker = Arc::clone(&self);
                    let hub = Arc::clone(&hub);
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = worker.process_item(&*hub, item).await {
                            warn!(error = %e, "work item not acknowledged");
                        }
                    });
                }
            }
        }
    }

    /// Dispatch one item and acknowledge it on success.
    pub async fn process_item(&self, hub: &dyn TaskHub, item: WorkItem) -> Result<(), EngineError> {
        match item {
            WorkItem::Orchestrator(request) => {
                let response = self.execute_orchestrator(request).await?;
                hub.complete_orchestrator_task(response).await?;
            }
            WorkItem::Activity(request) => {
                let response = self.execute_activity(request).await;
                hub.complete_activity_task(response).await?;
            }
        }
        Ok(())
    }
}
