//! Per-call loops for the three streaming interactions.
//!
//! ## Structure
//!
//! - [`list`] - server streaming: store iteration feeding the response
//!   channel.
//! - [`update`] - client streaming: apply each inbound update in order.
//! - [`delete`] - bidirectional: one confirmation per applied delete.
//!
//! Every loop observes the service-wide shutdown token handed out by
//! [`CallGuard`](crate::server::shutdown::CallGuard) and stops once it is
//! cancelled.

pub mod delete;
pub mod list;
pub mod update;

use futures::Stream;
use todo_tonic_core::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Response stream over `rx` that ends with `Unavailable` once `shutdown` is
/// cancelled.
///
/// The receiver is dropped at that point, so a producer blocked on the
/// channel observes a send failure and stops.
pub fn abort_on_shutdown<T>(
    rx: mpsc::Receiver<Result<T, Status>>,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<T, Status>> + Send + 'static
where
    T: Send + 'static,
{
    futures::stream::unfold(Some((rx, shutdown)), |state| async move {
        let (mut rx, shutdown) = state?;
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                Some((Err(Status::from(Error::ServiceShutdown)), None))
            }
            item = rx.recv() => item.map(|item| (item, Some((rx, shutdown)))),
        }
    })
}
