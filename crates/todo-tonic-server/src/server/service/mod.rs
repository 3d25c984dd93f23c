//! gRPC service implementation and its per-call collaborators.
//!
//! ## Structure
//!
//! - [`handler`] - `TodoService` entry points (`TaskService`).
//! - [`auth`] - metadata interceptor attaching the caller [`auth::Principal`].
//! - [`deadline`] - `grpc-timeout` parsing for unary deadline checks.

pub mod auth;
pub mod deadline;
pub mod handler;
