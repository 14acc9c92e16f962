//! Agent-facing `WorkflowService` (spec.md §4.E.1, §6): `GetAction` and
//! `ReportActionStatus`, each wrapped in the shared exponential-backoff
//! retry (spec.md §5 "Retry budget for engine RPCs: 5 minutes total").
//! Grounded on `tink/server/internal/grpc/grpc.go`'s `doGetAction`/
//! `doReportActionStatus`.

use std::sync::Arc;
use std::time::Duration;

use anvil_backend::{WorkflowBackend, WorkflowBackendError};
use anvil_model::{ActionState, CurrentState, ObjectKey, WorkflowState};
use anvil_rpc::{
    ActionRequest, ActionResponse, ActionState as WireActionState, ActionStatusRequest,
    ActionStatusResponse, WorkflowService,
};
use backon::{ExponentialBuilder, Retryable};
use tonic::{Request, Response, Status};

const RETRY_BUDGET: Duration = Duration::from_secs(5 * 60);

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default().with_total_delay(RETRY_BUDGET)
}

pub struct WorkflowServiceImpl {
    backend: Arc<dyn WorkflowBackend>,
}

impl WorkflowServiceImpl {
    pub fn new(backend: Arc<dyn WorkflowBackend>) -> Self {
        Self { backend }
    }
}

#[tonic::async_trait]
impl WorkflowService for WorkflowServiceImpl {
    async fn get_action(
        &self,
        request: Request<ActionRequest>,
    ) -> Result<Response<ActionResponse>, Status> {
        let worker_id = request.into_inner().worker_id;
        if worker_id.is_empty() {
            return Err(Status::invalid_argument("worker_id must not be empty"));
        }

        let backend = self.backend.clone();
        let response = (|| {
            let backend = backend.clone();
            let worker_id = worker_id.clone();
            async move { do_get_action(backend.as_ref(), &worker_id).await }
        })
        .retry(retry_policy())
        .when(|e: &GetActionError| e.is_retryable())
        .await
        .map_err(GetActionError::into_status)?;

        Ok(Response::new(response))
    }

    async fn report_action_status(
        &self,
        request: Request<ActionStatusRequest>,
    ) -> Result<Response<ActionStatusResponse>, Status> {
        let req = request.into_inner();
        if req.workflow_id.is_empty() || req.task_id.is_empty() || req.action_id.is_empty() {
            return Err(Status::invalid_argument("workflow_id, task_id and action_id are required"));
        }

        let backend = self.backend.clone();
        (|| {
            let backend = backend.clone();
            let req = req.clone();
            async move { do_report_action_status(backend.as_ref(), req).await }
        })
        .retry(retry_policy())
        .when(|e: &ReportStatusError| e.is_retryable())
        .await
        .map_err(ReportStatusError::into_status)?;

        Ok(Response::new(ActionStatusResponse {}))
    }
}

#[derive(Debug, thiserror::Error)]
enum GetActionError {
    #[error("no workflows found")]
    NoWorkflow,
    #[error("workflow is in preparing state")]
    Preparing,
    #[error("workflow is not pending or running")]
    BadWorkflowState,
    #[error("first action not in pending state")]
    FirstActionNotPending,
    #[error("current action is not in success state")]
    CurrentNotSuccess,
    #[error("last action in task")]
    LastAction,
    #[error(transparent)]
    Backend(#[from] WorkflowBackendError),
}

impl GetActionError {
    fn is_retryable(&self) -> bool {
        matches!(self, GetActionError::Backend(e) if !e.is_not_found())
    }

    fn into_status(self) -> Status {
        match self {
            GetActionError::NoWorkflow => Status::not_found("no workflows found"),
            GetActionError::Preparing => Status::failed_precondition("workflow is in preparing state"),
            GetActionError::BadWorkflowState => {
                Status::failed_precondition("workflow is not pending or running")
            }
            GetActionError::FirstActionNotPending => {
                Status::not_found("first action not in pending state")
            }
            GetActionError::CurrentNotSuccess => {
                Status::failed_precondition("current action is not in success state")
            }
            GetActionError::LastAction => Status::not_found("last action in task"),
            GetActionError::Backend(e) if e.is_not_found() => Status::not_found("no workflows found"),
            GetActionError::Backend(e) => Status::internal(e.to_string()),
        }
    }
}

/// Mirrors `doGetAction` in `tink/server/internal/grpc/grpc.go`:
/// first-call semantics seed `currentState`, subsequent calls advance it
/// only if the previously served action succeeded (spec.md §4.E.1).
async fn do_get_action(
    backend: &dyn WorkflowBackend,
    worker_id: &str,
) -> Result<ActionResponse, GetActionError> {
    let mut workflow = backend
        .get_workflow_for_worker(worker_id)
        .await
        .map_err(|e| if e.is_not_found() { GetActionError::NoWorkflow } else { e.into() })?;

    if workflow.status.state == WorkflowState::Preparing {
        return Err(GetActionError::Preparing);
    }
    if !matches!(workflow.status.state, WorkflowState::Pending | WorkflowState::Running) {
        return Err(GetActionError::BadWorkflowState);
    }

    let (task_index, action_index) = match workflow.current_position() {
        Some((task_index, action_index)) => {
            let action = &workflow.status.tasks[task_index].actions[action_index];
            if action.state != ActionState::Success {
                return Err(GetActionError::CurrentNotSuccess);
            }
            if workflow.is_last_action(task_index, action_index) {
                return Err(GetActionError::LastAction);
            }
            (task_index, action_index + 1)
        }
        None => {
            let task = workflow.status.tasks.first().ok_or(GetActionError::NoWorkflow)?;
            let action = task.actions.first().ok_or(GetActionError::NoWorkflow)?;
            if action.state != ActionState::Pending {
                return Err(GetActionError::FirstActionNotPending);
            }
            (0, 0)
        }
    };

    let task = workflow.status.tasks[task_index].clone();
    let action = task.actions[action_index].clone();
    let workflow_key = workflow.key();

    workflow.status.current_state = Some(CurrentState {
        worker_id: worker_id.to_string(),
        task_id: task.id.clone(),
        action_id: action.id.clone(),
        action_name: action.name.clone(),
        state: action.state,
    });

    backend.write_workflow(workflow).await?;

    let mut environment: Vec<String> =
        task.merged_environment(&action).into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    environment.sort();

    Ok(ActionResponse {
        workflow_id: workflow_key.to_string(),
        task_id: task.id,
        worker_id: worker_id.to_string(),
        action_id: action.id,
        name: action.name,
        image: action.image,
        timeout: action.timeout_seconds as i64,
        command: action.command.unwrap_or_default(),
        volumes: task.merged_volumes(&action),
        environment,
        pid: action.pid_namespace,
    })
}

#[derive(Debug, thiserror::Error)]
enum ReportStatusError {
    #[error("no matching workflow/task/action")]
    NotFound,
    #[error("reported action state was unspecified")]
    UnspecifiedState,
    #[error(transparent)]
    Backend(#[from] WorkflowBackendError),
}

impl ReportStatusError {
    fn is_retryable(&self) -> bool {
        matches!(self, ReportStatusError::Backend(e) if !e.is_not_found())
    }

    fn into_status(self) -> Status {
        match self {
            ReportStatusError::NotFound => Status::not_found("no matching workflow/task/action"),
            ReportStatusError::UnspecifiedState => {
                Status::invalid_argument("action_state must not be unspecified")
            }
            ReportStatusError::Backend(e) if e.is_not_found() => {
                Status::not_found("no matching workflow/task/action")
            }
            ReportStatusError::Backend(e) => Status::internal(e.to_string()),
        }
    }
}

/// Mirrors `doReportActionStatus`: writes the reported outcome onto the
/// matching action, propagates non-`Success` states to the workflow
/// level, and promotes the workflow to `Post` on the last action's
/// success (spec.md §4.E.1).
async fn do_report_action_status(
    backend: &dyn WorkflowBackend,
    req: ActionStatusRequest,
) -> Result<(), ReportStatusError> {
    let wire_state = WireActionState::try_from(req.action_state)
        .unwrap_or(WireActionState::Unspecified);
    let action_state =
        ActionState::try_from(wire_state).map_err(|_| ReportStatusError::UnspecifiedState)?;

    let (namespace, name) = req
        .workflow_id
        .split_once('/')
        .ok_or(ReportStatusError::NotFound)?;
    let key = ObjectKey::new(namespace, name);

    let mut workflow = backend
        .get_workflow(&key)
        .await
        .map_err(|e| if e.is_not_found() { ReportStatusError::NotFound } else { e.into() })?;

    let (task_index, task, action_index) = workflow
        .find_action_mut(&req.task_id, &req.action_id)
        .ok_or(ReportStatusError::NotFound)?;
    if task.worker_addr != req.worker_id {
        return Err(ReportStatusError::NotFound);
    }

    let action = &mut task.actions[action_index];
    action.execution_start = timestamp_from_epoch_seconds(req.execution_start);
    action.execution_stop = timestamp_from_epoch_seconds(req.execution_stop);
    action.execution_duration_seconds = Some(req.execution_duration);
    action.message = req.message.map(|m| m.message);
    action.state = action_state;

    let task_id = task.id.clone();
    let action_id = action.id.clone();
    let action_name = action.name.clone();
    let is_last = workflow.is_last_action(task_index, action_index);

    if action_state != ActionState::Success {
        workflow.status.state = match action_state {
            ActionState::Running => WorkflowState::Running,
            ActionState::Pending => WorkflowState::Pending,
            _ => WorkflowState::Failed,
        };
    } else if is_last {
        workflow.status.state = WorkflowState::Post;
    }

    workflow.status.current_state = Some(CurrentState {
        worker_id: req.worker_id,
        task_id,
        action_id,
        action_name,
        state: action_state,
    });

    backend.write_workflow(workflow).await?;
    Ok(())
}

fn timestamp_from_epoch_seconds(seconds: i64) -> Option<chrono::DateTime<chrono::Utc>> {
    if seconds == 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(seconds, 0)
}
