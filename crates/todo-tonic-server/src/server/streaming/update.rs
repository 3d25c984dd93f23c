use crate::server::store::TaskStore;
use futures::{Stream, StreamExt};
use std::time::SystemTime;
use todo_tonic_core::{Error, TaskId, proto::UpdateTaskRequest, types::timestamp_to_system_time};
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Applies inbound updates one at a time until the client half-closes.
///
/// Returns the number of updates applied. The first store failure aborts the
/// call, and updates applied before it stay applied.
pub async fn apply_updates<S>(
    store: &dyn TaskStore,
    mut inbound: S,
    shutdown: &CancellationToken,
) -> Result<usize, Status>
where
    S: Stream<Item = Result<UpdateTaskRequest, Status>> + Unpin,
{
    let mut applied = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(Error::ServiceShutdown.into()),
            next = inbound.next() => next,
        };

        let Some(request) = next else {
            return Ok(applied);
        };
        apply_update(store, request?)?;
        applied += 1;
    }
}

fn apply_update(store: &dyn TaskStore, request: UpdateTaskRequest) -> Result<(), Status> {
    let id = TaskId(request.id);
    // An update without a due date resets it to the zero timestamp.
    let due_at = match request.due_date {
        Some(ts) => timestamp_to_system_time(ts)?,
        None => SystemTime::UNIX_EPOCH,
    };

    store
        .update(id, request.description, due_at, request.done)
        .map_err(|e| {
            tracing::warn!(%id, "Update failed: {e}");
            Status::internal(format!("error updating task: {e}"))
        })
}
