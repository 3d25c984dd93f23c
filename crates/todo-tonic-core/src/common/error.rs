//! Error types for the task service.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure of the service and its client. It
//! implements `From<Error>` for `tonic::Status` so handlers can propagate with
//! `?` and clients receive a machine-readable code plus a message.
//!
//! ## Error Cases
//! - `InvalidArgument`: malformed or missing required input. Never touches the
//!   store.
//! - `NotFound`: the referenced task id is not in the store. Surfaced to
//!   clients as `Internal`.
//! - `Internal`: unexpected store or transport failure.
//! - `DeadlineExceeded`: the caller's deadline elapsed before completion.
//! - `RequestCancelled`: the peer aborted the call.
//! - `ServiceShutdown`: the call arrived, or was still running, while the
//!   service was shutting down.
//! - `ChannelError`: an internal channel between tasks closed unexpectedly.
//! - `Transport` / `Rpc`: client-side connection and call failures.

use crate::types::TaskId;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the task service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The client request was invalid.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// No live task has the given id.
    #[error("Task {id} not found")]
    NotFound { id: TaskId },

    /// Unexpected failure that is not the caller's fault.
    #[error("Internal error: {context}")]
    Internal { context: String },

    /// The caller-supplied deadline elapsed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The client aborted the request.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// Could not establish or configure the client connection.
    #[error("Transport error: {context}")]
    Transport { context: String },

    /// The server answered a call with a non-OK status.
    #[error("RPC failed with {code:?}: {message}")]
    Rpc { code: Code, message: String },
}

impl Error {
    /// The gRPC code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            Error::InvalidArgument { .. } => Code::InvalidArgument,
            // Store misses inside a call are reported as internal failures.
            Error::NotFound { .. } | Error::Internal { .. } | Error::ChannelError { .. } => {
                Code::Internal
            }
            Error::DeadlineExceeded => Code::DeadlineExceeded,
            Error::RequestCancelled => Code::Cancelled,
            Error::ServiceShutdown | Error::Transport { .. } => Code::Unavailable,
            Error::Rpc { code, .. } => *code,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidArgument { reason } => Status::invalid_argument(reason),
            Error::NotFound { id } => Status::internal(format!("task {id} not found")),
            Error::Internal { context } => Status::internal(context),
            Error::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::Transport { context } => Status::unavailable(context),
            Error::Rpc { code, message } => Status::new(code, message),
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Rpc {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport {
            context: err.to_string(),
        }
    }
}
