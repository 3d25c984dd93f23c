//! Call tracking and graceful shutdown.
//!
//! Every RPC registers with the [`CallTracker`] before it touches the store
//! and holds a [`CallGuard`] until it finishes. The guard keeps the in-flight
//! count, emits the call-outcome log on drop, and hands streaming loops the
//! service-wide force-cancel token.
//!
//! [`ShutdownCoordinator::run`] races the transport against an external
//! termination signal. Once the signal fires it:
//!
//! 1. marks the tracker as draining, so new calls fail with `Unavailable`,
//! 2. tells the transport to stop accepting connections,
//! 3. waits up to the grace period for in-flight calls and the transport to
//!    finish,
//! 4. on timeout, cancels the force token so streaming loops abort, then
//!    drops the transport.

use crate::server::telemetry::{
    decrement_calls_inflight, increment_calls, increment_calls_inflight, record_call,
};
use core::future::Future;
use core::time::Duration;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use todo_tonic_core::Error;
use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tonic::{Code, Status};

/// Shared registry of in-flight calls.
#[derive(Debug, Default)]
pub struct CallTracker {
    inflight: AtomicUsize,
    draining: AtomicBool,
    idle: Notify,
    force: CancellationToken,
}

impl CallTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new call to `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once draining has begun.
    pub fn begin(self: &Arc<Self>, method: &'static str) -> Result<CallGuard, Error> {
        if self.is_draining() {
            record_call(method, Code::Unavailable, Duration::ZERO);
            return Err(Error::ServiceShutdown);
        }

        self.inflight.fetch_add(1, Ordering::AcqRel);
        increment_calls();
        increment_calls_inflight();

        Ok(CallGuard {
            tracker: Arc::clone(self),
            method,
            started: Instant::now(),
            outcome: None,
        })
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Refuses every call registered from now on.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::Release);
    }

    /// Aborts the calls still in flight.
    pub fn force_cancel(&self) {
        self.force.cancel();
    }

    pub fn is_forced(&self) -> bool {
        self.force.is_cancelled()
    }

    /// Resolves once no call is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent final drop is not
            // missed.
            notified.as_mut().enable();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Registration of one in-flight call.
///
/// Dropping the guard records the call outcome. A guard dropped without
/// [`finish`](CallGuard::finish) was torn down by the transport and is
/// logged as `Cancelled`.
#[derive(Debug)]
pub struct CallGuard {
    tracker: Arc<CallTracker>,
    method: &'static str,
    started: Instant,
    outcome: Option<Code>,
}

impl CallGuard {
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Token cancelled when the grace period runs out.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.tracker.force.clone()
    }

    pub fn finish(mut self, code: Code) {
        self.outcome = Some(code);
    }

    /// Records the outcome of `result` and passes it through.
    pub fn finish_with<T>(self, result: Result<T, Status>) -> Result<T, Status> {
        let code = match &result {
            Ok(_) => Code::Ok,
            Err(status) => status.code(),
        };
        self.finish(code);
        result
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let code = self.outcome.unwrap_or(Code::Cancelled);
        record_call(self.method, code, self.started.elapsed());
        decrement_calls_inflight();

        if self.tracker.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

/// How the server came down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight call finished within the grace period, or the
    /// transport stopped on its own. Connections still open once the grace
    /// period elapses are dropped without turning this into `Forced`.
    Graceful,
    /// The grace period elapsed with `remaining` calls still in flight.
    Forced { remaining: usize },
}

/// Races in-flight work against a bounded grace period.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tracker: Arc<CallTracker>,
    grace: Duration,
    stop_accepting: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(tracker: Arc<CallTracker>, grace: Duration) -> Self {
        Self {
            tracker,
            grace,
            stop_accepting: CancellationToken::new(),
        }
    }

    /// Future to hand to the transport: resolves when it must stop accepting
    /// new connections.
    pub fn stop_accepting(&self) -> WaitForCancellationFutureOwned {
        self.stop_accepting.clone().cancelled_owned()
    }

    /// Drives `serve` until it exits or `signal` fires, then shuts down.
    ///
    /// `serve` must observe [`stop_accepting`](Self::stop_accepting). It is
    /// dropped, not awaited, if the grace period elapses.
    ///
    /// # Errors
    ///
    /// Propagates any error returned by `serve`.
    pub async fn run<S, E, F>(&self, serve: S, signal: F) -> Result<ShutdownOutcome, E>
    where
        S: Future<Output = Result<(), E>>,
        F: Future<Output = ()>,
    {
        tokio::pin!(serve);

        tokio::select! {
            res = &mut serve => {
                res?;
                tracing::info!("Transport stopped without a shutdown signal");
                return Ok(ShutdownOutcome::Graceful);
            }
            () = signal => {}
        }

        tracing::info!(
            inflight = self.tracker.inflight(),
            grace_ms = self.grace.as_millis() as u64,
            "Shutdown signal received, refusing new calls"
        );
        self.tracker.begin_drain();
        self.stop_accepting.cancel();

        let drain = async {
            self.tracker.wait_idle().await;
            (&mut serve).await
        };

        match tokio::time::timeout(self.grace, drain).await {
            Ok(res) => {
                res?;
                tracing::info!("All in-flight calls finished");
                Ok(ShutdownOutcome::Graceful)
            }
            Err(_) => {
                let remaining = self.tracker.inflight();
                self.tracker.force_cancel();
                if remaining == 0 {
                    tracing::warn!(
                        "Grace period of {:?} elapsed with no call in flight, dropping open connections",
                        self.grace
                    );
                    return Ok(ShutdownOutcome::Graceful);
                }
                tracing::warn!(
                    remaining,
                    "Grace period of {:?} elapsed, forcing shutdown",
                    self.grace
                );
                Ok(ShutdownOutcome::Forced { remaining })
            }
        }
    }
}
