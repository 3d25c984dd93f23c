//! Field-mask projection for `ListTasks`.
//!
//! A mask names the [`Task`] attributes a response should carry, using the
//! protobuf field names of `todo.Task`. Unknown names are ignored, and an
//! empty mask selects every field.

use crate::types::Task;

/// Field path for [`Task::id`].
pub const FIELD_ID: &str = "id";
/// Field path for [`Task::description`].
pub const FIELD_DESCRIPTION: &str = "description";
/// Field path for [`Task::done`].
pub const FIELD_DONE: &str = "done";
/// Field path for [`Task::due_at`].
pub const FIELD_DUE_DATE: &str = "due_date";

/// The subset of task fields requested by a caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Returns a copy of `task` carrying only the masked fields.
    ///
    /// Fields outside the mask keep their zero value (see [`Task::default`]).
    /// An empty mask returns the task unchanged.
    pub fn project(&self, task: Task) -> Task {
        if self.is_empty() {
            return task;
        }

        let mut projected = Task::default();
        for path in &self.paths {
            match path.as_str() {
                FIELD_ID => projected.id = task.id,
                FIELD_DESCRIPTION => projected.description.clone_from(&task.description),
                FIELD_DONE => projected.done = task.done,
                FIELD_DUE_DATE => projected.due_at = task.due_at,
                _ => {}
            }
        }
        projected
    }
}

impl From<Option<prost_types::FieldMask>> for FieldMask {
    fn from(mask: Option<prost_types::FieldMask>) -> Self {
        mask.map(|m| Self { paths: m.paths }).unwrap_or_default()
    }
}

impl From<FieldMask> for prost_types::FieldMask {
    fn from(mask: FieldMask) -> Self {
        Self { paths: mask.paths }
    }
}
