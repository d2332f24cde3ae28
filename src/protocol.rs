//! Work dispatch boundary: wire types and the [`TaskHub`] trait.
//!
//! The hub owns durability, queues, and timers; this crate owns execution
//! semantics. All types here are serde-friendly mirrors of the dispatch
//! protocol, preserving its compatibility surface (status ordinals,
//! absent-vs-empty optionality, field names). Binary framing belongs to the
//! transport a host puts behind its `TaskHub` implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::actions::OrchestratorAction;
use crate::error::EngineError;
use crate::history::{
    HistoryEvent, OrchestrationInstance, OrchestrationStatus, TaskFailureDetails,
};
use crate::state::OrchestrationState;

/// One orchestrator pass: replay `past_events`, apply `new_events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorRequest {
    pub instance_id: String,
    pub execution_id: Option<String>,
    pub past_events: Vec<HistoryEvent>,
    pub new_events: Vec<HistoryEvent>,
}

/// The pass's output: ordered actions plus the latest custom status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorResponse {
    pub instance_id: String,
    pub actions: Vec<OrchestratorAction>,
    pub custom_status: Option<String>,
}

/// One activity invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRequest {
    pub name: String,
    pub version: Option<String>,
    pub input: Option<String>,
    pub orchestration_instance: OrchestrationInstance,
    /// The scheduling id the parent pass assigned; echoed back in the
    /// TaskCompleted/TaskFailed event.
    pub task_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub instance_id: String,
    pub task_id: i32,
    pub result: Option<String>,
    pub failure_details: Option<TaskFailureDetails>,
}

/// A unit of work handed out by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkItem {
    Orchestrator(OrchestratorRequest),
    Activity(ActivityRequest),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTaskResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub instance_id: String,
    pub name: String,
    pub version: Option<String>,
    pub input: Option<String>,
    pub scheduled_start_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceResponse {
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInstanceRequest {
    pub instance_id: String,
    /// When false the hub may omit input/output payloads from the state.
    pub get_inputs_and_outputs: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetInstanceResponse {
    pub exists: bool,
    pub state: Option<OrchestrationState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseEventRequest {
    pub instance_id: String,
    pub name: String,
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaiseEventResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateRequest {
    pub instance_id: String,
    pub output: Option<String>,
    /// Terminate child orchestrations too.
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendRequest {
    pub instance_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRequest {
    pub instance_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewindInstanceRequest {
    pub instance_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewindInstanceResponse {}

/// Filter for multi-instance queries. All bounds optional; absent means
/// unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InstanceQuery {
    pub statuses: Vec<OrchestrationStatus>,
    pub created_after_ms: Option<u64>,
    pub created_before_ms: Option<u64>,
    pub name_prefix: Option<String>,
    pub page_size: Option<u32>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryInstancesRequest {
    pub query: InstanceQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInstancesResponse {
    pub states: Vec<OrchestrationState>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PurgeInstanceFilter {
    pub created_after_ms: Option<u64>,
    pub created_before_ms: Option<u64>,
    pub statuses: Vec<OrchestrationStatus>,
}

/// Purge by id or by filter; only terminal instances may be purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurgeInstancesRequest {
    InstanceId(String),
    Filter(PurgeInstanceFilter),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeInstancesResponse {
    pub deleted_instance_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskHubRequest {
    pub recreate_if_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskHubResponse {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTaskHubRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTaskHubResponse {}

/// The external collaborator: durable storage, queues, and timers.
///
/// The crate ships no transport; tests drive an in-memory hub and hosts wire
/// this to their backend of choice.
#[async_trait]
pub trait TaskHub: Send + Sync {
    /// Next unit of work, or `None` when the queue is momentarily empty.
    async fn get_work_item(&self) -> Result<Option<WorkItem>, EngineError>;

    /// Durably apply a pass's actions and acknowledge the work item.
    async fn complete_orchestrator_task(
        &self,
        response: OrchestratorResponse,
    ) -> Result<CompleteTaskResponse, EngineError>;

    /// Record an activity result and acknowledge the work item.
    async fn complete_activity_task(
        &self,
        response: ActivityResponse,
    ) -> Result<CompleteTaskResponse, EngineError>;

    async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, EngineError>;

    async fn get_instance(
        &self,
        request: GetInstanceRequest,
    ) -> Result<GetInstanceResponse, EngineError>;

    async fn raise_event(
        &self,
        request: RaiseEventRequest,
    ) -> Result<RaiseEventResponse, EngineError>;

    async fn terminate_instance(
        &self,
        request: TerminateRequest,
    ) -> Result<TerminateResponse, EngineError>;

    async fn suspend_instance(
        &self,
        request: SuspendRequest,
    ) -> Result<SuspendResponse, EngineError>;

    async fn resume_instance(
        &self,
        request: ResumeRequest,
    ) -> Result<ResumeResponse, EngineError>;

    async fn rewind_instance(
        &self,
        request: RewindInstanceRequest,
    ) -> Result<RewindInstanceResponse, EngineError>;

    async fn query_instances(
        &self,
        request: QueryInstancesRequest,
    ) -> Result<QueryInstancesResponse, EngineError>;

    async fn purge_instances(
        &self,
        request: PurgeInstancesRequest,
    ) -> Result<PurgeInstancesResponse, EngineError>;

    async fn create_task_hub(
        &self,
        request: CreateTaskHubRequest,
    ) -> Result<CreateTaskHubResponse, EngineError>;

    async fn delete_task_hub(
        &self,
        request: DeleteTaskHubRequest,
    ) -> Result<DeleteTaskHubResponse, EngineError>;
}
