//! In-memory task hub and harness for the integration suites.
//!
//! The hub keeps per-instance histories, materializes pass actions into
//! events, and fires timers eagerly so suites run without real sleeps. A
//! logical clock stamps every event, which also gives passes a deterministic
//! `now_ms` via the OrchestratorStarted event prepended on delivery.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use durotask::actions::ActionPayload;
use durotask::history::{
    EventPayload, HistoryEvent, OrchestrationInstance, OrchestrationStatus, ParentInstanceInfo,
    TaskFailureDetails, NO_EVENT_ID,
};
use durotask::protocol::{
    ActivityRequest, ActivityResponse, CompleteTaskResponse, CreateInstanceRequest,
    CreateInstanceResponse, CreateTaskHubRequest, CreateTaskHubResponse, DeleteTaskHubRequest,
    DeleteTaskHubResponse, GetInstanceRequest, GetInstanceResponse, OrchestratorRequest,
    OrchestratorResponse, PurgeInstancesRequest, PurgeInstancesResponse, QueryInstancesRequest,
    QueryInstancesResponse, RaiseEventRequest, RaiseEventResponse, ResumeRequest, ResumeResponse,
    RewindInstanceRequest, RewindInstanceResponse, SuspendRequest, SuspendResponse, TaskHub,
    TerminateRequest, TerminateResponse, WorkItem,
};
use durotask::state::OrchestrationState;
use durotask::{
    ActivityRegistry, EngineError, OrchestrationRegistry, Worker, WorkerOptions,
};

struct InstanceRecord {
    name: String,
    version: Option<String>,
    input: Option<String>,
    execution_id: String,
    execution_counter: u32,
    history: Vec<HistoryEvent>,
    pending: Vec<HistoryEvent>,
    in_flight: Option<Vec<HistoryEvent>>,
    custom_status: Option<String>,
    parent: Option<(String, i32, String)>, // (parent id, scheduling id, parent name)
}

impl InstanceRecord {
    fn is_terminal(&self) -> bool {
        OrchestrationState::project(&self.history)
            .map(|s| s.is_terminal())
            .unwrap_or(false)
    }

    fn projected(&self) -> Option<OrchestrationState> {
        let mut state =
            OrchestrationState::project(self.history.iter().chain(self.in_flight.iter().flatten()));
        if let Some(s) = state.as_mut() {
            s.custom_status = self.custom_status.clone();
        }
        state
    }
}

struct HubInner {
    now_ms: u64,
    instances: HashMap<String, InstanceRecord>,
    activities: VecDeque<ActivityRequest>,
}

impl HubInner {
    fn tick(&mut self) -> u64 {
        self.now_ms += 10;
        self.now_ms
    }
}

pub struct InMemoryTaskHub {
    inner: Mutex<HubInner>,
}

impl InMemoryTaskHub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                now_ms: 1_000,
                instances: HashMap::new(),
                activities: VecDeque::new(),
            }),
        }
    }

    fn push_pending(inner: &mut HubInner, instance_id: &str, payload: EventPayload) -> bool {
        let now = inner.tick();
        match inner.instances.get_mut(instance_id) {
            Some(rec) => {
                rec.pending.push(HistoryEvent::new(NO_EVENT_ID, now, payload));
                true
            }
            None => false,
        }
    }

    fn seed_instance(
        inner: &mut HubInner,
        instance_id: String,
        name: String,
        version: Option<String>,
        input: Option<String>,
        scheduled_start_ms: Option<u64>,
        parent: Option<(String, i32, String)>,
    ) {
        let now = inner.tick();
        let parent_info = parent.as_ref().map(|(pid, tsid, pname)| ParentInstanceInfo {
            orchestration_instance: OrchestrationInstance::new(pid.clone()),
            name: Some(pname.clone()),
            task_scheduled_id: Some(*tsid),
        });
        let started = HistoryEvent::new(
            NO_EVENT_ID,
            now,
            EventPayload::ExecutionStarted {
                name: name.clone(),
                version: version.clone(),
                input: input.clone(),
                orchestration_instance: OrchestrationInstance::with_execution(
                    instance_id.clone(),
                    "exec-1",
                ),
                parent_instance: parent_info,
                scheduled_start_ms,
                correlation_data: None,
            },
        );
        inner.instances.insert(
            instance_id,
            InstanceRecord {
                name,
                version,
                input,
                execution_id: "exec-1".to_string(),
                execution_counter: 1,
                history: Vec::new(),
                pending: vec![started],
                in_flight: None,
                custom_status: None,
                parent,
            },
        );
    }
}

#[async_trait]
impl TaskHub for InMemoryTaskHub {
    async fn get_work_item(&self) -> Result<Option<WorkItem>, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        if let Some(req) = inner.activities.pop_front() {
            return Ok(Some(WorkItem::Activity(req)));
        }
        let next = inner
            .instances
            .iter()
            .find(|(_, r)| r.in_flight.is_none() && !r.pending.is_empty())
            .map(|(id, _)| id.clone());
        let Some(instance_id) = next else {
            return Ok(None);
        };
        let now = inner.tick();
        let rec = inner
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.clone()))?;
        let mut new_events = vec![HistoryEvent::new(
            NO_EVENT_ID,
            now,
            EventPayload::OrchestratorStarted,
        )];
        new_events.append(&mut rec.pending);
        rec.in_flight = Some(new_events.clone());
        Ok(Some(WorkItem::Orchestrator(OrchestratorRequest {
            instance_id,
            execution_id: Some(rec.execution_id.clone()),
            past_events: rec.history.clone(),
            new_events,
        })))
    }

    async fn complete_orchestrator_task(
        &self,
        response: OrchestratorResponse,
    ) -> Result<CompleteTaskResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let now = inner.tick();

        let mut new_activities: Vec<ActivityRequest> = Vec::new();
        let mut cross_events: Vec<(String, EventPayload)> = Vec::new();
        let mut child_creates: Vec<(String, String, Option<String>, Option<String>, i32)> =
            Vec::new();
        let mut restart: Option<(Option<String>, Option<String>, Vec<HistoryEvent>)> = None;
        let mut notify_parent: Option<EventPayload> = None;

        {
            let rec = inner
                .instances
                .get_mut(&response.instance_id)
                .ok_or_else(|| EngineError::InstanceNotFound(response.instance_id.clone()))?;
            let delivered = rec.in_flight.take().unwrap_or_default();
            rec.history.extend(delivered);
            rec.custom_status = response.custom_status.clone();
            let orchestration_instance = OrchestrationInstance::with_execution(
                response.instance_id.clone(),
                rec.execution_id.clone(),
            );
            let parent = rec.parent.clone();
            let parent_name = rec.name.clone();

            for action in &response.actions {
                match &action.payload {
                    ActionPayload::ScheduleTask {
                        name,
                        version,
                        input,
                    } => {
                        rec.history.push(HistoryEvent::new(
                            action.id,
                            now,
                            EventPayload::TaskScheduled {
                                name: name.clone(),
                                version: version.clone(),
                                input: input.clone(),
                            },
                        ));
                        new_activities.push(ActivityRequest {
                            name: name.clone(),
                            version: version.clone(),
                            input: input.clone(),
                            orchestration_instance: orchestration_instance.clone(),
                            task_id: action.id,
                        });
                    }
                    ActionPayload::CreateTimer { fire_at_ms } => {
                        rec.history.push(HistoryEvent::new(
                            action.id,
                            now,
                            EventPayload::TimerCreated {
                                fire_at_ms: *fire_at_ms,
                            },
                        ));
                        // Eager fire keeps suites free of real sleeps.
                        rec.pending.push(HistoryEvent::new(
                            NO_EVENT_ID,
                            now,
                            EventPayload::TimerFired {
                                fire_at_ms: *fire_at_ms,
                                timer_id: action.id,
                            },
                        ));
                    }
                    ActionPayload::CreateSubOrchestration {
                        instance_id,
                        name,
                        version,
                        input,
                    } => {
                        rec.history.push(HistoryEvent::new(
                            action.id,
                            now,
                            EventPayload::SubOrchestrationInstanceCreated {
                                instance_id: instance_id.clone(),
                                name: name.clone(),
                                version: version.clone(),
                                input: input.clone(),
                            },
                        ));
                        child_creates.push((
                            instance_id.clone(),
                            name.clone(),
                            version.clone(),
                            input.clone(),
                            action.id,
                        ));
                    }
                    ActionPayload::SendEvent {
                        target_instance,
                        name,
                        data,
                    } => {
                        rec.history.push(HistoryEvent::new(
                            action.id,
                            now,
                            EventPayload::EventSent {
                                instance_id: target_instance.instance_id.clone(),
                                name: name.clone(),
                                input: data.clone(),
                            },
                        ));
                        cross_events.push((
                            target_instance.instance_id.clone(),
                            EventPayload::EventRaised {
                                name: name.clone(),
                                input: data.clone(),
                            },
                        ));
                    }
                    ActionPayload::CompleteOrchestration {
                        status,
                        result,
                        new_version,
                        carryover_events,
                        failure_details,
                        ..
                    } => {
                        rec.history.push(HistoryEvent::new(
                            NO_EVENT_ID,
                            now,
                            EventPayload::ExecutionCompleted {
                                status: *status,
                                result: result.clone(),
                                failure_details: failure_details.clone(),
                            },
                        ));
                        if *status == OrchestrationStatus::ContinuedAsNew {
                            restart = Some((
                                result.clone(),
                                new_version.clone(),
                                carryover_events.clone(),
                            ));
                        } else if let Some((_, tsid, _)) = &parent {
                            notify_parent = Some(match status {
                                OrchestrationStatus::Completed => {
                                    EventPayload::SubOrchestrationInstanceCompleted {
                                        task_scheduled_id: *tsid,
                                        result: result.clone(),
                                    }
                                }
                                _ => EventPayload::SubOrchestrationInstanceFailed {
                                    task_scheduled_id: *tsid,
                                    failure_details: failure_details.clone().unwrap_or_else(
                                        || {
                                            TaskFailureDetails::new(
                                                "SubOrchestrationFailed",
                                                format!("{parent_name} ended as {status:?}"),
                                            )
                                        },
                                    ),
                                },
                            });
                        }
                    }
                }
            }
            rec.history
                .push(HistoryEvent::new(NO_EVENT_ID, now, EventPayload::OrchestratorCompleted));
        }

        if let Some((input, new_version, carryover)) = restart {
            let now = inner.tick();
            let rec = inner
                .instances
                .get_mut(&response.instance_id)
                .ok_or_else(|| EngineError::InstanceNotFound(response.instance_id.clone()))?;
            rec.execution_counter += 1;
            rec.execution_id = format!("exec-{}", rec.execution_counter);
            if new_version.is_some() {
                rec.version = new_version;
            }
            rec.input = input.clone();
            rec.history.clear();
            let parent_info = rec.parent.as_ref().map(|(pid, tsid, pname)| ParentInstanceInfo {
                orchestration_instance: OrchestrationInstance::new(pid.clone()),
                name: Some(pname.clone()),
                task_scheduled_id: Some(*tsid),
            });
            let started = HistoryEvent::new(
                NO_EVENT_ID,
                now,
                EventPayload::ExecutionStarted {
                    name: rec.name.clone(),
                    version: rec.version.clone(),
                    input,
                    orchestration_instance: OrchestrationInstance::with_execution(
                        response.instance_id.clone(),
                        rec.execution_id.clone(),
                    ),
                    parent_instance: parent_info,
                    scheduled_start_ms: None,
                    correlation_data: None,
                },
            );
            let mut pending = vec![started];
            pending.extend(carryover);
            pending.append(&mut rec.pending);
            rec.pending = pending;
        }

        if let Some(payload) = notify_parent {
            let parent_id = {
                let rec = inner
                    .instances
                    .get(&response.instance_id)
                    .and_then(|r| r.parent.clone());
                rec.map(|(pid, _, _)| pid)
            };
            if let Some(pid) = parent_id {
                InMemoryTaskHub::push_pending(&mut inner, &pid, payload);
            }
        }

        for (target, payload) in cross_events {
            InMemoryTaskHub::push_pending(&mut inner, &target, payload);
        }

        for (child_id, name, version, input, tsid) in child_creates {
            if inner.instances.contains_key(&child_id) {
                continue;
            }
            let parent = Some((
                response.instance_id.clone(),
                tsid,
                inner
                    .instances
                    .get(&response.instance_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
            ));
            InMemoryTaskHub::seed_instance(&mut inner, child_id, name, version, input, None, parent);
        }

        inner.activities.extend(new_activities);
        Ok(CompleteTaskResponse {})
    }

    async fn complete_activity_task(
        &self,
        response: ActivityResponse,
    ) -> Result<CompleteTaskResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let payload = match response.failure_details {
            None => EventPayload::TaskCompleted {
                task_scheduled_id: response.task_id,
                result: response.result,
            },
            Some(details) => EventPayload::TaskFailed {
                task_scheduled_id: response.task_id,
                failure_details: details,
            },
        };
        InMemoryTaskHub::push_pending(&mut inner, &response.instance_id, payload);
        Ok(CompleteTaskResponse {})
    }

    async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<CreateInstanceResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        if inner.instances.contains_key(&request.instance_id) {
            return Err(EngineError::InstanceAlreadyExists(request.instance_id));
        }
        InMemoryTaskHub::seed_instance(
            &mut inner,
            request.instance_id.clone(),
            request.name,
            request.version,
            request.input,
            request.scheduled_start_ms,
            None,
        );
        Ok(CreateInstanceResponse {
            instance_id: request.instance_id,
        })
    }

    async fn get_instance(
        &self,
        request: GetInstanceRequest,
    ) -> Result<GetInstanceResponse, EngineError> {
        let inner = self.inner.lock().expect("hub lock");
        match inner.instances.get(&request.instance_id) {
            None => Ok(GetInstanceResponse {
                exists: false,
                state: None,
            }),
            Some(rec) => {
                let mut state = rec.projected();
                if !request.get_inputs_and_outputs {
                    if let Some(s) = state.as_mut() {
                        s.input = None;
                        s.output = None;
                    }
                }
                Ok(GetInstanceResponse {
                    exists: true,
                    state,
                })
            }
        }
    }

    async fn raise_event(
        &self,
        request: RaiseEventRequest,
    ) -> Result<RaiseEventResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let payload = EventPayload::EventRaised {
            name: request.name,
            input: request.input,
        };
        if !InMemoryTaskHub::push_pending(&mut inner, &request.instance_id, payload) {
            return Err(EngineError::InstanceNotFound(request.instance_id));
        }
        Ok(RaiseEventResponse {})
    }

    async fn terminate_instance(
        &self,
        request: TerminateRequest,
    ) -> Result<TerminateResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let Some(rec) = inner.instances.get(&request.instance_id) else {
            return Err(EngineError::InstanceNotFound(request.instance_id));
        };
        if rec.is_terminal() {
            return Ok(TerminateResponse {});
        }
        let mut targets = vec![request.instance_id.clone()];
        if request.recursive {
            targets.extend(
                inner
                    .instances
                    .iter()
                    .filter(|(_, r)| {
                        r.parent
                            .as_ref()
                            .is_some_and(|(pid, _, _)| *pid == request.instance_id)
                    })
                    .map(|(id, _)| id.clone()),
            );
        }
        for id in targets {
            InMemoryTaskHub::push_pending(
                &mut inner,
                &id,
                EventPayload::ExecutionTerminated {
                    input: request.output.clone(),
                },
            );
        }
        Ok(TerminateResponse {})
    }

    async fn suspend_instance(
        &self,
        request: SuspendRequest,
    ) -> Result<SuspendResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let payload = EventPayload::ExecutionSuspended {
            input: request.reason,
        };
        if !InMemoryTaskHub::push_pending(&mut inner, &request.instance_id, payload) {
            return Err(EngineError::InstanceNotFound(request.instance_id));
        }
        Ok(SuspendResponse {})
    }

    async fn resume_instance(
        &self,
        request: ResumeRequest,
    ) -> Result<ResumeResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let payload = EventPayload::ExecutionResumed {
            input: request.reason,
        };
        if !InMemoryTaskHub::push_pending(&mut inner, &request.instance_id, payload) {
            return Err(EngineError::InstanceNotFound(request.instance_id));
        }
        Ok(ResumeResponse {})
    }

    async fn rewind_instance(
        &self,
        _request: RewindInstanceRequest,
    ) -> Result<RewindInstanceResponse, EngineError> {
        Err(EngineError::Hub(
            "rewind is not supported by the in-memory hub".to_string(),
        ))
    }

    async fn query_instances(
        &self,
        request: QueryInstancesRequest,
    ) -> Result<QueryInstancesResponse, EngineError> {
        let inner = self.inner.lock().expect("hub lock");
        let q = request.query;
        let mut states: Vec<OrchestrationState> = inner
            .instances
            .values()
            .filter_map(|rec| rec.projected())
            .filter(|s| q.statuses.is_empty() || q.statuses.contains(&s.status))
            .filter(|s| q.created_after_ms.is_none_or(|t| s.created_ms >= t))
            .filter(|s| q.created_before_ms.is_none_or(|t| s.created_ms <= t))
            .filter(|s| {
                q.name_prefix
                    .as_deref()
                    .is_none_or(|p| s.name.starts_with(p))
            })
            .collect();
        states.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        if let Some(page) = q.page_size {
            states.truncate(page as usize);
        }
        Ok(QueryInstancesResponse {
            states,
            continuation_token: None,
        })
    }

    async fn purge_instances(
        &self,
        request: PurgeInstancesRequest,
    ) -> Result<PurgeInstancesResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        let mut deleted = 0u64;
        match request {
            PurgeInstancesRequest::InstanceId(id) => match inner.instances.get(&id) {
                None => {}
                Some(rec) if rec.is_terminal() => {
                    inner.instances.remove(&id);
                    deleted = 1;
                }
                Some(_) => {
                    return Err(EngineError::Hub(format!(
                        "cannot purge non-terminal instance '{id}'"
                    )))
                }
            },
            PurgeInstancesRequest::Filter(filter) => {
                let ids: Vec<String> = inner
                    .instances
                    .iter()
                    .filter_map(|(id, rec)| rec.projected().map(|s| (id.clone(), s)))
                    .filter(|(_, s)| s.is_terminal())
                    .filter(|(_, s)| {
                        filter.statuses.is_empty() || filter.statuses.contains(&s.status)
                    })
                    .filter(|(_, s)| filter.created_after_ms.is_none_or(|t| s.created_ms >= t))
                    .filter(|(_, s)| filter.created_before_ms.is_none_or(|t| s.created_ms <= t))
                    .map(|(id, _)| id)
                    .collect();
                for id in ids {
                    inner.instances.remove(&id);
                    deleted += 1;
                }
            }
        }
        Ok(PurgeInstancesResponse {
            deleted_instance_count: deleted,
        })
    }

    async fn create_task_hub(
        &self,
        request: CreateTaskHubRequest,
    ) -> Result<CreateTaskHubResponse, EngineError> {
        if request.recreate_if_exists {
            let mut inner = self.inner.lock().expect("hub lock");
            inner.instances.clear();
            inner.activities.clear();
        }
        Ok(CreateTaskHubResponse {})
    }

    async fn delete_task_hub(
        &self,
        _request: DeleteTaskHubRequest,
    ) -> Result<DeleteTaskHubResponse, EngineError> {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.instances.clear();
        inner.activities.clear();
        Ok(DeleteTaskHubResponse {})
    }
}

/// Hub + worker pair with the drive helpers the suites share.
pub struct Harness {
    pub hub: Arc<InMemoryTaskHub>,
    pub worker: Arc<Worker>,
}

impl Harness {
    pub fn new(orchestrations: OrchestrationRegistry, activities: ActivityRegistry) -> Self {
        Self {
            hub: Arc::new(InMemoryTaskHub::new()),
            worker: Arc::new(Worker::new(
                orchestrations,
                activities,
                WorkerOptions::default(),
            )),
        }
    }

    pub async fn start(&self, instance_id: &str, name: &str, input: Option<String>) {
        self.hub
            .create_instance(CreateInstanceRequest {
                instance_id: instance_id.to_string(),
                name: name.to_string(),
                version: None,
                input,
                scheduled_start_ms: None,
            })
            .await
            .expect("create instance");
    }

    pub async fn raise(&self, instance_id: &str, name: &str, input: Option<String>) {
        self.hub
            .raise_event(RaiseEventRequest {
                instance_id: instance_id.to_string(),
                name: name.to_string(),
                input,
            })
            .await
            .expect("raise event");
    }

    pub async fn suspend(&self, instance_id: &str) {
        self.hub
            .suspend_instance(SuspendRequest {
                instance_id: instance_id.to_string(),
                reason: None,
            })
            .await
            .expect("suspend");
    }

    pub async fn resume(&self, instance_id: &str) {
        self.hub
            .resume_instance(ResumeRequest {
                instance_id: instance_id.to_string(),
                reason: None,
            })
            .await
            .expect("resume");
    }

    pub async fn terminate(&self, instance_id: &str, output: Option<String>) {
        self.hub
            .terminate_instance(TerminateRequest {
                instance_id: instance_id.to_string(),
                output,
                recursive: false,
            })
            .await
            .expect("terminate");
    }

    pub async fn state(&self, instance_id: &str) -> Option<OrchestrationState> {
        self.hub
            .get_instance(GetInstanceRequest {
                instance_id: instance_id.to_string(),
                get_inputs_and_outputs: true,
            })
            .await
            .expect("get instance")
            .state
    }

    /// Process work items until the hub goes idle.
    pub async fn drain(&self) {
        while let Some(item) = self.hub.get_work_item().await.expect("get work item") {
            self.worker
                .process_item(self.hub.as_ref(), item)
                .await
                .expect("process item");
        }
    }

    /// Drain repeatedly until the instance reaches a terminal status.
    pub async fn run_until_terminal(&self, instance_id: &str) -> OrchestrationState {
        for _ in 0..100 {
            self.drain().await;
            if let Some(state) = self.state(instance_id).await {
                if state.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("instance '{instance_id}' never reached a terminal status");
    }
}
