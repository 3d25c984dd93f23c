use crate::server::{shutdown::CallGuard, store::TaskStore};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use todo_tonic_core::{Error, TaskId, proto::DeleteTaskRequest, proto::DeleteTaskResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

pub type DeleteSender = mpsc::Sender<Result<DeleteTaskResponse, Status>>;

/// Runs the delete loop on its own task and records the call on `guard` when
/// it ends. Dropping `resp_tx` at the end closes the response stream.
pub fn spawn_deletes<S>(
    store: Arc<dyn TaskStore>,
    inbound: S,
    resp_tx: DeleteSender,
    guard: CallGuard,
) where
    S: Stream<Item = Result<DeleteTaskRequest, Status>> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let shutdown = guard.shutdown_token();
        let code = match delete_loop(store.as_ref(), inbound, &resp_tx, &shutdown).await {
            Ok(deleted) => {
                tracing::debug!(deleted, "Delete stream closed by client");
                tonic::Code::Ok
            }
            Err(status) => status.code(),
        };
        guard.finish(code);
    });
}

/// Deletes one task per inbound request and confirms each one in order.
///
/// Confirmation `n` is enqueued only after request `n` was applied. A failed
/// delete enqueues its status and ends the loop, so no later request is
/// applied or confirmed.
pub async fn delete_loop<S>(
    store: &dyn TaskStore,
    mut inbound: S,
    resp_tx: &DeleteSender,
    shutdown: &CancellationToken,
) -> Result<usize, Status>
where
    S: Stream<Item = Result<DeleteTaskRequest, Status>> + Unpin,
{
    let mut deleted = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(Error::ServiceShutdown.into()),
            next = inbound.next() => next,
        };

        let Some(request) = next else {
            return Ok(deleted);
        };
        let id = TaskId(request?.id);

        if let Err(e) = store.delete(id) {
            tracing::warn!(%id, "Delete failed: {e}");
            let message = format!("error deleting task: {e}");
            send_reply(resp_tx, Err(Status::internal(message.clone())), shutdown).await?;
            return Err(Status::internal(message));
        }

        send_reply(resp_tx, Ok(DeleteTaskResponse {}), shutdown).await?;
        deleted += 1;
    }
}

async fn send_reply(
    resp_tx: &DeleteSender,
    reply: Result<DeleteTaskResponse, Status>,
    shutdown: &CancellationToken,
) -> Result<(), Status> {
    tokio::select! {
        biased;
        () = shutdown.cancelled() => Err(Error::ServiceShutdown.into()),
        sent = resp_tx.send(reply) => sent.map_err(|_| Error::RequestCancelled.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::InMemoryTaskStore;
    use std::time::SystemTime;
    use tonic::Code;

    fn requests(ids: &[TaskId]) -> Vec<Result<DeleteTaskRequest, Status>> {
        ids.iter().map(|id| Ok(DeleteTaskRequest { id: id.0 })).collect()
    }

    #[tokio::test]
    async fn confirms_each_delete_then_ends() {
        let store = InMemoryTaskStore::new();
        let ids: Vec<_> = (0..3)
            .map(|i| store.add(format!("task {i}"), SystemTime::now()))
            .collect();
        let (tx, mut rx) = mpsc::channel(8);

        let deleted = delete_loop(
            &store,
            tokio_stream::iter(requests(&ids)),
            &tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        drop(tx);

        assert_eq!(deleted, 3);
        let mut confirmations = 0;
        while let Some(reply) = rx.recv().await {
            reply.unwrap();
            confirmations += 1;
        }
        assert_eq!(confirmations, 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_fails_on_second_occurrence() {
        let store = InMemoryTaskStore::new();
        let a = store.add("a".to_string(), SystemTime::now());
        let b = store.add("b".to_string(), SystemTime::now());
        let (tx, mut rx) = mpsc::channel(8);

        let status = delete_loop(
            &store,
            tokio_stream::iter(requests(&[a, a, b])),
            &tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        drop(tx);

        assert_eq!(status.code(), Code::Internal);
        assert!(rx.recv().await.unwrap().is_ok());
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(err.message().contains("error deleting task"));
        assert!(rx.recv().await.is_none());
        // The request after the failure was never applied.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn forced_shutdown_stops_the_loop() {
        let store = InMemoryTaskStore::new();
        let (tx, _rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        token.cancel();

        let status = delete_loop(&store, futures::stream::pending(), &tx, &token)
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
