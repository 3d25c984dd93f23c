//! Shared types, errors and protocol bindings for the task service.
//!
//! ## Structure
//!
//! - [`error`] - unified [`Error`] and its `tonic::Status` mapping.
//! - [`mask`] - field-mask projection of tasks.
//! - [`types`] - the [`Task`] entity and its wire conversions.
//! - [`proto`] - generated protobuf messages and gRPC service stubs.

pub mod error;
pub mod mask;
pub mod types;

pub use error::{Error, Result};
pub use mask::FieldMask;
pub use types::{Task, TaskId};

/// gRPC service and message definitions generated from `proto/todo.proto`.
///
/// ## Service
///
/// - `AddTask` - unary create.
/// - `ListTasks` - server stream of `{task, overdue}` terminated by
///   end-of-stream.
/// - `UpdateTask` - client stream of updates answered once after half-close.
/// - `DeleteTask` - bidirectional stream, one confirmation per request.
pub mod proto {
    tonic::include_proto!("todo");

    /// Encoded file descriptor set for server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("todo_descriptor");
}
