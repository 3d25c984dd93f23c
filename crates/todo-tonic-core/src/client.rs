//! Typed client for the task service.
//!
//! [`TaskClient`] wraps the generated `TodoServiceClient` and drives each of
//! the four interaction shapes:
//!
//! - [`TaskClient::add_task`] - unary, bounded by a per-call deadline.
//! - [`TaskClient::list_tasks`] - server stream, read until end-of-stream.
//! - [`TaskClient::update_tasks`] - client stream, half-closed after the last
//!   update, answered once by the server.
//! - [`TaskClient::delete_tasks`] - bidirectional stream. A writer and a
//!   reader run concurrently and the call only completes once the writer has
//!   half-closed *and* the reader has observed end-of-stream.
//!
//! Every call carries the configured `authorization` token via
//! [`AuthToken`].

use crate::{
    Error, FieldMask, Result, Task, TaskId,
    proto::{
        AddTaskRequest, DeleteTaskRequest, ListTasksRequest, ListTasksResponse,
        UpdateTaskRequest, todo_service_client::TodoServiceClient,
    },
    types::system_time_to_timestamp,
};
use core::time::Duration;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{
    Code, Request, Status, Streaming,
    codec::CompressionEncoding,
    metadata::{Ascii, MetadataValue},
    service::{Interceptor, interceptor::InterceptedService},
    transport::{Channel, Endpoint},
};

/// Metadata key carrying the caller's token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Default deadline applied to unary calls.
pub const DEFAULT_UNARY_TIMEOUT: Duration = Duration::from_secs(1);

// Outbound delete requests buffered ahead of the transport.
const DELETE_BUFFER_SIZE: usize = 16;

/// Client-side interceptor that attaches the `authorization` token to every
/// outgoing call.
#[derive(Clone, Debug, Default)]
pub struct AuthToken(Option<MetadataValue<Ascii>>);

impl AuthToken {
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the token is not valid ASCII
    /// metadata.
    pub fn new(token: &str) -> Result<Self> {
        let value = token.parse().map_err(|_| Error::InvalidArgument {
            reason: "auth token is not valid metadata".to_string(),
        })?;
        Ok(Self(Some(value)))
    }
}

impl Interceptor for AuthToken {
    fn call(&mut self, mut request: Request<()>) -> core::result::Result<Request<()>, Status> {
        if let Some(token) = &self.0 {
            request
                .metadata_mut()
                .insert(AUTHORIZATION_HEADER, token.clone());
        }
        Ok(request)
    }
}

/// Connection options for [`TaskClient`].
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub unary_timeout: Duration,
    pub gzip: bool,
    #[cfg(feature = "tls")]
    pub tls: Option<tonic::transport::ClientTlsConfig>,
}

impl ClientOptions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: None,
            unary_timeout: DEFAULT_UNARY_TIMEOUT,
            gzip: false,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_unary_timeout(mut self, timeout: Duration) -> Self {
        self.unary_timeout = timeout;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }

    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: tonic::transport::ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// One entry of a `ListTasks` stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedTask {
    pub task: Task,
    pub overdue: bool,
}

impl TryFrom<ListTasksResponse> for ListedTask {
    type Error = Error;

    fn try_from(resp: ListTasksResponse) -> Result<Self> {
        let task = resp.task.ok_or_else(|| Error::Internal {
            context: "list response without a task".to_string(),
        })?;
        Ok(Self {
            task: Task::try_from(task)?,
            overdue: resp.overdue,
        })
    }
}

type Inner = TodoServiceClient<InterceptedService<Channel, AuthToken>>;

/// Typed client for `todo.TodoService`.
#[derive(Clone)]
pub struct TaskClient {
    inner: Inner,
    unary_timeout: Duration,
}

impl TaskClient {
    /// Connects to the server described by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the endpoint is malformed or the
    /// connection cannot be established.
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let endpoint = Endpoint::from_shared(options.endpoint.clone())?;
        #[cfg(feature = "tls")]
        let endpoint = match options.tls.clone() {
            Some(tls) => endpoint.tls_config(tls)?,
            None => endpoint,
        };
        let channel = endpoint.connect().await?;
        Self::with_channel(channel, &options)
    }

    /// Builds a client over an existing channel.
    pub fn with_channel(channel: Channel, options: &ClientOptions) -> Result<Self> {
        let token = match options.auth_token.as_deref() {
            Some(token) => AuthToken::new(token)?,
            None => AuthToken::default(),
        };
        let mut inner = TodoServiceClient::with_interceptor(channel, token);
        if options.gzip {
            inner = inner
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }
        Ok(Self {
            inner,
            unary_timeout: options.unary_timeout,
        })
    }

    /// Creates a task and returns its id.
    pub async fn add_task(
        &mut self,
        description: impl Into<String>,
        due_at: SystemTime,
    ) -> Result<TaskId> {
        self.add(AddTaskRequest {
            description: description.into(),
            due_date: Some(system_time_to_timestamp(due_at)),
        })
        .await
    }

    /// Sends a raw `AddTask` request under the client's unary deadline.
    ///
    /// The deadline is propagated to the server as `grpc-timeout` and also
    /// enforced locally, so a slow or unreachable server yields
    /// [`Error::DeadlineExceeded`].
    pub async fn add(&mut self, request: AddTaskRequest) -> Result<TaskId> {
        let mut request = Request::new(request);
        request.set_timeout(self.unary_timeout);
        let started = Instant::now();

        match tokio::time::timeout(self.unary_timeout, self.inner.add_task(request)).await {
            Err(_) => Err(Error::DeadlineExceeded),
            // The channel enforces `grpc-timeout` too and reports it as
            // `Cancelled`.
            Ok(Err(status))
                if status.code() == Code::Cancelled && started.elapsed() >= self.unary_timeout =>
            {
                Err(Error::DeadlineExceeded)
            }
            Ok(response) => Ok(TaskId(response?.into_inner().id)),
        }
    }

    /// Opens a `ListTasks` stream without consuming it.
    pub async fn list_stream(&mut self, mask: FieldMask) -> Result<Streaming<ListTasksResponse>> {
        let mask = (!mask.is_empty()).then(|| mask.into());
        let response = self.inner.list_tasks(ListTasksRequest { mask }).await?;
        Ok(response.into_inner())
    }

    /// Lists every task, reading until the server ends the stream.
    pub async fn list_tasks(&mut self, mask: FieldMask) -> Result<Vec<ListedTask>> {
        let mut stream = self.list_stream(mask).await?;
        let mut tasks = Vec::new();
        while let Some(resp) = stream.message().await? {
            tasks.push(ListedTask::try_from(resp)?);
        }
        Ok(tasks)
    }

    /// Streams the given task states to the server and waits for its single
    /// acknowledgement.
    pub async fn update_tasks<I>(&mut self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = Task>,
    {
        let requests: Vec<_> = tasks.into_iter().map(update_request).collect();
        self.update_stream(tokio_stream::iter(requests)).await
    }

    /// Drives `UpdateTask` from an arbitrary request stream. The stream ending
    /// is the half-close.
    pub async fn update_stream<S>(&mut self, updates: S) -> Result<()>
    where
        S: Stream<Item = UpdateTaskRequest> + Send + 'static,
    {
        self.inner.update_task(updates).await?;
        Ok(())
    }

    /// Deletes `ids` over the bidirectional stream.
    ///
    /// Returns the confirmed ids, in request order. Confirmation `n` pairs
    /// with request `n`. The writer and the reader run concurrently and both
    /// must finish before this returns. If the server aborts the stream, its
    /// status is returned and no further requests are sent.
    pub async fn delete_tasks<I>(&mut self, ids: I) -> Result<Vec<TaskId>>
    where
        I: IntoIterator<Item = TaskId>,
    {
        let (req_tx, req_rx) = mpsc::channel(DELETE_BUFFER_SIZE);
        // Ids sent but not yet confirmed, oldest first.
        let (pending_tx, mut pending_rx) = mpsc::unbounded_channel::<TaskId>();

        let writer = async move {
            for id in ids {
                if pending_tx.send(id).is_err() {
                    break;
                }
                if req_tx.send(DeleteTaskRequest { id: id.0 }).await.is_err() {
                    // The call is over. The reader reports why.
                    tracing::debug!("Delete stream closed before request for task {id}");
                    break;
                }
            }
            // Dropping the sender half-closes the request stream.
            drop(req_tx);
            Ok::<(), Error>(())
        };

        let mut inner = self.inner.clone();
        let reader = async move {
            let mut inbound = inner
                .delete_task(ReceiverStream::new(req_rx))
                .await?
                .into_inner();

            let mut confirmed = Vec::new();
            while inbound.message().await?.is_some() {
                let id = pending_rx.recv().await.ok_or_else(|| Error::Internal {
                    context: "confirmation received for a request that was never sent"
                        .to_string(),
                })?;
                confirmed.push(id);
            }
            Ok::<_, Error>(confirmed)
        };

        let ((), confirmed) = tokio::try_join!(writer, reader)?;
        Ok(confirmed)
    }
}

fn update_request(task: Task) -> UpdateTaskRequest {
    UpdateTaskRequest {
        id: task.id.0,
        description: task.description,
        due_date: Some(system_time_to_timestamp(task.due_at)),
        done: task.done,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_token_is_attached_to_requests() {
        let mut token = AuthToken::new("tk-tk").unwrap();
        let request = token.call(Request::new(())).unwrap();
        assert_eq!(
            request.metadata().get(AUTHORIZATION_HEADER).unwrap(),
            "tk-tk"
        );
    }

    #[test]
    fn empty_token_leaves_metadata_untouched() {
        let request = AuthToken::default().call(Request::new(())).unwrap();
        assert!(request.metadata().get(AUTHORIZATION_HEADER).is_none());
    }

    #[test]
    fn rejects_non_ascii_token() {
        assert!(matches!(
            AuthToken::new("tok\nen"),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn listed_task_requires_a_task() {
        let err = ListedTask::try_from(ListTasksResponse {
            task: None,
            overdue: false,
        })
        .unwrap_err();
        assert_eq!(err.code(), tonic::Code::Internal);
    }
}
