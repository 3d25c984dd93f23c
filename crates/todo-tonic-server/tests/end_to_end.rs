use core::time::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use todo_tonic_core::{
    FieldMask, Task, TaskId,
    client::{ClientOptions, TaskClient},
    mask::FIELD_ID,
    proto::{
        AddTaskRequest, DeleteTaskRequest, UpdateTaskRequest,
        todo_service_client::TodoServiceClient,
    },
    types::system_time_to_timestamp,
};
use todo_tonic_server::server::{
    config::ServerConfig,
    run::run_with_incoming,
    shutdown::ShutdownOutcome,
    store::{InMemoryTaskStore, TaskStore},
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::Code;
use tonic::transport::Endpoint;

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<ShutdownOutcome>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        Self::start_with_store(config, Arc::new(InMemoryTaskStore::new())).await
    }

    async fn start_with_store(config: ServerConfig, store: Arc<InMemoryTaskStore>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, signal) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_with_incoming(
            TcpListenerStream::new(listener),
            config,
            store,
            async move {
                let _ = signal.await;
            },
        ));

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    fn options(&self) -> ClientOptions {
        ClientOptions::new(format!("http://{}", self.addr))
    }

    async fn client(&self) -> TaskClient {
        TaskClient::connect(self.options()).await.unwrap()
    }

    async fn stop(self) -> ShutdownOutcome {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }
}

fn in_a_day() -> SystemTime {
    SystemTime::now() + Duration::from_secs(86_400)
}

fn an_hour_ago() -> SystemTime {
    SystemTime::now() - Duration::from_secs(3_600)
}

#[tokio::test(flavor = "multi_thread")]
async fn full_task_lifecycle() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = TaskClient::connect(server.options().with_gzip(true))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(client.add_task(format!("task {i}"), in_a_day()).await.unwrap());
    }
    assert_eq!(ids.len(), 3);
    assert!(ids[0] != ids[1] && ids[1] != ids[2] && ids[0] != ids[2]);

    let listed = client.list_tasks(FieldMask::default()).await.unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.iter().all(|t| !t.overdue && !t.task.done));

    let updates: Vec<Task> = ids[1..]
        .iter()
        .map(|&id| Task {
            id,
            description: format!("updated {id}"),
            done: true,
            due_at: in_a_day(),
        })
        .collect();
    client.update_tasks(updates).await.unwrap();

    let listed = client.list_tasks(FieldMask::default()).await.unwrap();
    for entry in &listed {
        let updated = ids[1..].contains(&entry.task.id);
        assert_eq!(entry.task.done, updated);
        assert_eq!(
            entry.task.description.starts_with("updated"),
            updated,
            "unexpected description {:?}",
            entry.task.description
        );
    }

    let confirmed = client.delete_tasks(ids.clone()).await.unwrap();
    assert_eq!(confirmed.len(), 3);
    assert!(client.list_tasks(FieldMask::default()).await.unwrap().is_empty());

    assert_eq!(server.stop().await, ShutdownOutcome::Graceful);
}

#[tokio::test(flavor = "multi_thread")]
async fn add_then_list_round_trips_description_and_due_date() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let due_at = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000_000_000);
    let id = client.add_task("renew passport", due_at).await.unwrap();

    let listed = client.list_tasks(FieldMask::default()).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].task,
        Task {
            id,
            description: "renew passport".to_string(),
            done: false,
            due_at,
        }
    );

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_add_requests_leave_the_store_untouched() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let err = client.add_task("", in_a_day()).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = client
        .add(AddTaskRequest {
            description: "no due date".to_string(),
            due_date: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    assert!(client.list_tasks(FieldMask::default()).await.unwrap().is_empty());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn id_mask_clears_other_fields() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let id = client.add_task("masked out", an_hour_ago()).await.unwrap();
    let listed = client.list_tasks(FieldMask::new([FIELD_ID])).await.unwrap();

    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task.id, id);
    assert!(listed[0].task.description.is_empty());
    assert_eq!(listed[0].task.due_at, SystemTime::UNIX_EPOCH);
    // Overdue reflects the stored task, not the projection.
    assert!(listed[0].overdue);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn overdue_clears_once_done() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let due_at = an_hour_ago();
    let id = client.add_task("file taxes", due_at).await.unwrap();
    let listed = client.list_tasks(FieldMask::default()).await.unwrap();
    assert!(listed[0].overdue);

    client
        .update_tasks([Task {
            id,
            description: "file taxes".to_string(),
            done: true,
            due_at,
        }])
        .await
        .unwrap();

    let listed = client.list_tasks(FieldMask::default()).await.unwrap();
    assert!(!listed[0].overdue);
    assert!(listed[0].task.done);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn update_of_missing_task_fails_the_call() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let id = client.add_task("exists", in_a_day()).await.unwrap();
    let err = client
        .update_tasks([
            Task {
                id,
                description: "applied before the failure".to_string(),
                done: false,
                due_at: in_a_day(),
            },
            Task {
                id: TaskId(1),
                description: "missing".to_string(),
                done: false,
                due_at: in_a_day(),
            },
        ])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);

    let listed = client.list_tasks(FieldMask::default()).await.unwrap();
    assert_eq!(listed[0].task.description, "applied before the failure");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_delete_fails_on_second_occurrence() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let a = client.add_task("a", in_a_day()).await.unwrap();
    let b = client.add_task("b", in_a_day()).await.unwrap();

    let err = client.delete_tasks([a, a, b]).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);

    let remaining: Vec<TaskId> = client
        .list_tasks(FieldMask::default())
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.task.id)
        .collect();
    assert_eq!(remaining, vec![b]);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_of_nothing_ends_cleanly() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let confirmed = client.delete_tasks(Vec::new()).await.unwrap();
    assert!(confirmed.is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn required_auth_rejects_anonymous_calls() {
    let config = ServerConfig {
        require_auth: true,
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;

    let mut anonymous = server.client().await;
    let err = anonymous.add_task("nope", in_a_day()).await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);

    let mut authed = TaskClient::connect(server.options().with_auth_token("tk-tk"))
        .await
        .unwrap();
    authed.add_task("yes", in_a_day()).await.unwrap();
    assert_eq!(authed.list_tasks(FieldMask::default()).await.unwrap().len(), 1);

    server.stop().await;
}

fn update_request(id: TaskId, description: &str) -> UpdateTaskRequest {
    UpdateTaskRequest {
        id: id.0,
        description: description.to_string(),
        due_date: Some(system_time_to_timestamp(in_a_day())),
        done: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn in_flight_call_finishing_within_grace_shuts_down_gracefully() {
    let config = ServerConfig {
        shutdown_grace: Duration::from_secs(5),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;
    let mut client = server.client().await;
    let id = client.add_task("draft", in_a_day()).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    let mut updater = client.clone();
    let update =
        tokio::spawn(async move { updater.update_stream(ReceiverStream::new(rx)).await });

    tx.send(update_request(id, "first pass")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopping = tokio::spawn(server.stop());
    tokio::time::sleep(Duration::from_millis(200)).await;

    tx.send(update_request(id, "second pass")).await.unwrap();
    drop(tx);

    update.await.unwrap().unwrap();
    assert_eq!(stopping.await.unwrap(), ShutdownOutcome::Graceful);
}

#[tokio::test(flavor = "multi_thread")]
async fn call_outliving_grace_is_forcibly_ended() {
    let config = ServerConfig {
        shutdown_grace: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let server = TestServer::start(config).await;
    let mut client = server.client().await;
    let id = client.add_task("never finished", in_a_day()).await.unwrap();

    let (tx, rx) = mpsc::channel(4);
    let mut updater = client.clone();
    let update =
        tokio::spawn(async move { updater.update_stream(ReceiverStream::new(rx)).await });

    tx.send(update_request(id, "still editing")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The request stream is never half-closed.
    assert_eq!(server.stop().await, ShutdownOutcome::Forced { remaining: 1 });

    let result = tokio::time::timeout(Duration::from_secs(5), update)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_err());
    drop(tx);
}

#[tokio::test(flavor = "multi_thread")]
async fn each_delete_is_applied_before_it_is_confirmed() {
    let server = TestServer::start(ServerConfig::default()).await;
    let mut client = server.client().await;

    let mut ids = Vec::new();
    for i in 0..3 {
        ids.push(client.add_task(format!("task {i}"), in_a_day()).await.unwrap());
    }

    let mut raw = TodoServiceClient::connect(format!("http://{}", server.addr))
        .await
        .unwrap();
    let (req_tx, req_rx) = mpsc::channel(1);
    let mut confirmations = raw
        .delete_task(ReceiverStream::new(req_rx))
        .await
        .unwrap()
        .into_inner();

    for (n, id) in ids.iter().enumerate() {
        req_tx.send(DeleteTaskRequest { id: id.0 }).await.unwrap();
        confirmations.message().await.unwrap().unwrap();

        let remaining: Vec<TaskId> = client
            .list_tasks(FieldMask::default())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.task.id)
            .collect();
        assert!(!remaining.contains(id));
        assert_eq!(remaining.len(), ids.len() - n - 1);
    }

    drop(req_tx);
    assert!(confirmations.message().await.unwrap().is_none());
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unanswered_add_fails_with_deadline_exceeded() {
    // Accepts connections and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let options =
        ClientOptions::new(format!("http://{addr}")).with_unary_timeout(Duration::from_millis(200));
    let channel = Endpoint::from_shared(options.endpoint.clone())
        .unwrap()
        .connect_lazy();
    let mut client = TaskClient::with_channel(channel, &options).unwrap();

    let started = std::time::Instant::now();
    let err = client.add_task("never stored", in_a_day()).await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(started.elapsed() < Duration::from_secs(5));

    silent.abort();
}

// Large descriptions so a stalled reader exhausts the HTTP/2 flow-control
// windows well before the listing is done.
fn store_with_large_tasks(count: usize) -> Arc<InMemoryTaskStore> {
    let store = Arc::new(InMemoryTaskStore::new());
    let description = "x".repeat(4 * 1024);
    for _ in 0..count {
        store.add(description.clone(), in_a_day());
    }
    store
}

#[tokio::test(flavor = "multi_thread")]
async fn list_read_to_the_end_within_grace_shuts_down_gracefully() {
    let config = ServerConfig {
        shutdown_grace: Duration::from_secs(5),
        ..ServerConfig::default()
    };
    let server = TestServer::start_with_store(config, store_with_large_tasks(2_000)).await;
    let mut client = server.client().await;

    let mut stream = client.list_stream(FieldMask::default()).await.unwrap();
    assert!(stream.message().await.unwrap().is_some());
    let mut received = 1;

    let stopping = tokio::spawn(server.stop());
    tokio::time::sleep(Duration::from_millis(200)).await;

    while stream.message().await.unwrap().is_some() {
        received += 1;
    }
    assert_eq!(received, 2_000);
    assert_eq!(stopping.await.unwrap(), ShutdownOutcome::Graceful);
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_list_reader_is_forcibly_ended() {
    let config = ServerConfig {
        shutdown_grace: Duration::from_millis(300),
        ..ServerConfig::default()
    };
    let server = TestServer::start_with_store(config, store_with_large_tasks(2_000)).await;
    let mut client = server.client().await;

    let mut stream = client.list_stream(FieldMask::default()).await.unwrap();
    assert!(stream.message().await.unwrap().is_some());
    // Stop reading long enough for the windows to fill.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), server.stop())
        .await
        .unwrap();
    assert_eq!(outcome, ShutdownOutcome::Forced { remaining: 1 });

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        let mut received = 1;
        loop {
            match stream.message().await {
                Ok(Some(_)) => received += 1,
                Ok(None) => return Ok(received),
                Err(status) => return Err(status),
            }
        }
    })
    .await
    .unwrap();
    assert!(drained.is_err());
}
