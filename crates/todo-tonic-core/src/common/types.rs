//! # Task domain types
//!
//! [`Task`] is the only entity with persistent identity in the service. It is
//! owned by the server-side store and crosses the wire as [`proto::Task`].
//!
//! ## Conversions
//!
//! - [`Task::to_proto`] - domain to wire, used by `ListTasks`.
//! - [`timestamp_to_system_time`] / [`system_time_to_timestamp`] - bridge
//!   between `google.protobuf.Timestamp` and [`SystemTime`].
//!
//! The derived `overdue` flag is never stored. It is computed with
//! [`Task::is_overdue`] at read time.

use crate::{Error, proto};
use core::fmt;
use prost_types::Timestamp;
use std::time::SystemTime;

/// Server-assigned task identifier.
///
/// Ids are handed out by the store in strictly increasing order and are never
/// reused within a process lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// A stored task.
///
/// The zero value (`Task::default()`) has id `0`, an empty description,
/// `done == false` and a due date at the Unix epoch. Field projection starts
/// from this value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub done: bool,
    pub due_at: SystemTime,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: TaskId::default(),
            description: String::new(),
            done: false,
            due_at: SystemTime::UNIX_EPOCH,
        }
    }
}

impl Task {
    /// `true` when the task is not done and `now` is past its due date.
    pub fn is_overdue(&self, now: SystemTime) -> bool {
        !self.done && now > self.due_at
    }

    pub fn to_proto(&self) -> proto::Task {
        proto::Task {
            id: self.id.0,
            description: self.description.clone(),
            done: self.done,
            due_date: Some(system_time_to_timestamp(self.due_at)),
        }
    }
}

impl TryFrom<proto::Task> for Task {
    type Error = Error;

    fn try_from(task: proto::Task) -> Result<Self, Self::Error> {
        let due_at = match task.due_date {
            Some(ts) => timestamp_to_system_time(ts)?,
            None => SystemTime::UNIX_EPOCH,
        };
        Ok(Self {
            id: TaskId(task.id),
            description: task.description,
            done: task.done,
            due_at,
        })
    }
}

/// Converts a protobuf timestamp into a [`SystemTime`].
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the timestamp is out of the range
/// representable by the platform clock.
pub fn timestamp_to_system_time(ts: Timestamp) -> Result<SystemTime, Error> {
    SystemTime::try_from(ts).map_err(|e| Error::InvalidArgument {
        reason: format!("invalid timestamp: {e}"),
    })
}

pub fn system_time_to_timestamp(time: SystemTime) -> Timestamp {
    Timestamp::from(time)
}
