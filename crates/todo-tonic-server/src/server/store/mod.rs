//! Task storage.
//!
//! [`TaskStore`] is the narrow interface every handler goes through. It is
//! not coupled to any container, cursor or iterator type: bulk reads go
//! through a visitor that can stop the iteration by returning an error.
//!
//! [`InMemoryTaskStore`] is the only backend. It is volatile and guards its
//! map with a single mutex.

mod memory;

pub use memory::InMemoryTaskStore;

use std::time::SystemTime;
use todo_tonic_core::{Result, Task, TaskId};

pub trait TaskStore: Send + Sync + 'static {
    /// Stores a new, not-done task and returns its freshly assigned id.
    fn add(&self, description: String, due_at: SystemTime) -> TaskId;

    /// Calls `visit` once per stored task, in no particular order.
    ///
    /// Iteration stops at the first error returned by `visit`, and that error
    /// is returned. Implementations must document which concurrent mutations
    /// an iteration observes.
    fn for_each(&self, visit: &mut dyn FnMut(Task) -> Result<()>) -> Result<()>;

    /// Replaces the mutable fields of task `id`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](todo_tonic_core::Error::NotFound) if `id` is not
    /// stored.
    fn update(&self, id: TaskId, description: String, due_at: SystemTime, done: bool)
    -> Result<()>;

    /// Removes task `id` permanently.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](todo_tonic_core::Error::NotFound) if `id` is not
    /// stored.
    fn delete(&self, id: TaskId) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
