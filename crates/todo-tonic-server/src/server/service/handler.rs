//! gRPC service implementation for task management.
//!
//! [`TaskService`] implements the generated [`TodoService`] trait. Each
//! method registers with the shared
//! [`CallTracker`](crate::server::shutdown::CallTracker) first, so calls
//! arriving during shutdown are refused, and hands the resulting guard to
//! whatever finishes the call: the handler itself for unary and client
//! streaming, the spawned producer for server and bidirectional streaming.
//!
//! ## Responsibilities
//!
//! - Validate `AddTask` input and honor the caller deadline before touching
//!   the store.
//! - Dispatch the streaming calls to the loops in
//!   [`streaming`](crate::server::streaming).
//! - Build the intercepted, compression-enabled tonic service.

use crate::server::{
    config::ServerConfig,
    service::{
        auth::{AuthInterceptor, Principal},
        deadline::RequestDeadline,
    },
    shutdown::CallTracker,
    store::TaskStore,
    streaming::{
        abort_on_shutdown, delete::spawn_deletes, list::spawn_list, update::apply_updates,
    },
};
use core::pin::Pin;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use todo_tonic_core::{
    Error, FieldMask,
    proto::{
        AddTaskRequest, AddTaskResponse, DeleteTaskRequest, DeleteTaskResponse,
        ListTasksRequest, ListTasksResponse, UpdateTaskRequest, UpdateTaskResponse,
        todo_service_server::{TodoService, TodoServiceServer},
    },
    types::timestamp_to_system_time,
};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tonic::{
    Request, Response, Status, Streaming, codec::CompressionEncoding,
    service::interceptor::InterceptedService,
};

pub const ADD_TASK: &str = "AddTask";
pub const LIST_TASKS: &str = "ListTasks";
pub const UPDATE_TASK: &str = "UpdateTask";
pub const DELETE_TASK: &str = "DeleteTask";

/// `todo.TodoService` over a shared [`TaskStore`].
#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    tracker: Arc<CallTracker>,
    stream_buffer_size: usize,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        tracker: Arc<CallTracker>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            stream_buffer_size: config.stream_buffer_size,
        }
    }

    fn add(
        &self,
        request: AddTaskRequest,
        deadline: Option<RequestDeadline>,
    ) -> Result<AddTaskResponse, Error> {
        let (description, due_at) = validate_add(request)?;

        if deadline.is_some_and(|d| d.is_elapsed()) {
            return Err(Error::DeadlineExceeded);
        }

        let id = self.store.add(description, due_at);
        tracing::debug!(%id, "Task added");
        Ok(AddTaskResponse { id: id.0 })
    }
}

/// Checks an `AddTask` request without touching the store.
fn validate_add(request: AddTaskRequest) -> Result<(String, SystemTime), Error> {
    if request.description.is_empty() {
        return Err(Error::InvalidArgument {
            reason: "description is required".to_string(),
        });
    }
    let due_date = request.due_date.ok_or_else(|| Error::InvalidArgument {
        reason: "due_date is required".to_string(),
    })?;
    let due_at = timestamp_to_system_time(due_date)?;
    Ok((request.description, due_at))
}

/// The service as mounted on the router: compression in both directions for
/// gzip, zstd and deflate, behind the authentication interceptor.
pub type TodoServer = InterceptedService<TodoServiceServer<TaskService>, AuthInterceptor>;

pub fn build_todo_service(service: TaskService, auth: AuthInterceptor) -> TodoServer {
    let server = TodoServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate);
    InterceptedService::new(server, auth)
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl TodoService for TaskService {
    type ListTasksStream = ResponseStream<ListTasksResponse>;
    type DeleteTaskStream = ResponseStream<DeleteTaskResponse>;

    #[tracing::instrument(skip_all, fields(principal = tracing::field::Empty))]
    async fn add_task(
        &self,
        request: Request<AddTaskRequest>,
    ) -> Result<Response<AddTaskResponse>, Status> {
        let deadline = RequestDeadline::from_metadata(request.metadata(), Instant::now());
        let guard = self.tracker.begin(ADD_TASK)?;

        if let Some(principal) = request.extensions().get::<Principal>() {
            tracing::Span::current().record("principal", principal.token());
        }

        let result = self
            .add(request.into_inner(), deadline)
            .map(Response::new)
            .map_err(Status::from);
        guard.finish_with(result)
    }

    async fn list_tasks(
        &self,
        request: Request<ListTasksRequest>,
    ) -> Result<Response<Self::ListTasksStream>, Status> {
        let guard = self.tracker.begin(LIST_TASKS)?;
        let shutdown = guard.shutdown_token();
        let mask = FieldMask::from(request.into_inner().mask);

        let (resp_tx, resp_rx) = mpsc::channel(self.stream_buffer_size);
        spawn_list(Arc::clone(&self.store), mask, resp_tx, guard);

        Ok(Response::new(Box::pin(abort_on_shutdown(resp_rx, shutdown))))
    }

    async fn update_task(
        &self,
        request: Request<Streaming<UpdateTaskRequest>>,
    ) -> Result<Response<UpdateTaskResponse>, Status> {
        let guard = self.tracker.begin(UPDATE_TASK)?;
        let shutdown = guard.shutdown_token();

        let result = apply_updates(self.store.as_ref(), request.into_inner(), &shutdown)
            .await
            .map(|applied| {
                tracing::debug!(applied, "Update stream closed by client");
                Response::new(UpdateTaskResponse {})
            });
        guard.finish_with(result)
    }

    async fn delete_task(
        &self,
        request: Request<Streaming<DeleteTaskRequest>>,
    ) -> Result<Response<Self::DeleteTaskStream>, Status> {
        let guard = self.tracker.begin(DELETE_TASK)?;
        let shutdown = guard.shutdown_token();

        let (resp_tx, resp_rx) = mpsc::channel(self.stream_buffer_size);
        spawn_deletes(Arc::clone(&self.store), request.into_inner(), resp_tx, guard);

        Ok(Response::new(Box::pin(abort_on_shutdown(resp_rx, shutdown))))
    }
}
