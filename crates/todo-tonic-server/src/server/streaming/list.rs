use crate::server::{shutdown::CallGuard, store::TaskStore, telemetry::increment_tasks_streamed};
use std::sync::Arc;
use std::time::SystemTime;
use todo_tonic_core::{Error, FieldMask, Result, proto::ListTasksResponse};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

pub type ListSender = mpsc::Sender<core::result::Result<ListTasksResponse, Status>>;

/// Streams every stored task into `resp_tx`, projected through `mask`.
///
/// Runs the synchronous store visitor on the blocking pool so each send can
/// park the thread while it waits for channel capacity. The call is recorded
/// on `guard` when iteration ends.
pub fn spawn_list(
    store: Arc<dyn TaskStore>,
    mask: FieldMask,
    resp_tx: ListSender,
    guard: CallGuard,
) {
    tokio::task::spawn_blocking(move || {
        let shutdown = guard.shutdown_token();
        let code = match feed_tasks(store.as_ref(), &mask, &resp_tx, &shutdown) {
            Ok(sent) => {
                tracing::debug!(sent, "Task listing complete");
                Code::Ok
            }
            Err(Error::ChannelError { context }) => {
                tracing::debug!("Task listing stopped early: {context}");
                Code::Cancelled
            }
            Err(e) => e.code(),
        };
        guard.finish(code);
    });
}

/// Visits the store once, sending one response per task.
///
/// Returns the number of responses sent. Iteration stops with
/// [`Error::ChannelError`] when the receiver is gone and with
/// [`Error::ServiceShutdown`] once `shutdown` is cancelled.
///
/// Must not be called from an async context.
pub fn feed_tasks(
    store: &dyn TaskStore,
    mask: &FieldMask,
    resp_tx: &ListSender,
    shutdown: &CancellationToken,
) -> Result<usize> {
    let now = SystemTime::now();
    let mut sent = 0;

    store.for_each(&mut |task| {
        if shutdown.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let overdue = task.is_overdue(now);
        let response = ListTasksResponse {
            task: Some(mask.project(task).to_proto()),
            overdue,
        };

        send_blocking(resp_tx, response, shutdown)?;
        increment_tasks_streamed();
        sent += 1;
        Ok(())
    })?;

    Ok(sent)
}

// A reader that stopped polling leaves the channel full, so the wait for
// capacity must also end on shutdown.
fn send_blocking(
    resp_tx: &ListSender,
    response: ListTasksResponse,
    shutdown: &CancellationToken,
) -> Result<()> {
    futures::executor::block_on(async {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(Error::ServiceShutdown),
            sent = resp_tx.send(Ok(response)) => sent.map_err(|e| Error::ChannelError {
                context: format!("Failed to forward task: {e}"),
            }),
        }
    })
}
