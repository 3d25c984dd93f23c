//! Task service server.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`store`] - the shared task store.
//! - [`service`] - the `TodoService` implementation and its collaborators.
//! - [`streaming`] - per-call loops for the streaming interactions.
//! - [`shutdown`] - call tracking and the graceful shutdown race.
//! - [`telemetry`] - logging, tracing and metrics setup.
//! - [`run`] - wires everything into a running tonic server.

pub mod config;
pub mod run;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod streaming;
pub mod telemetry;
