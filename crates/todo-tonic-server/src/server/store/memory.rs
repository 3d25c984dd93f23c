use super::TaskStore;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use todo_tonic_core::{Error, Result, Task, TaskId};

/// Volatile task store backed by a `HashMap` behind one mutex.
///
/// Ids come from a clock-seeded counter: each id is the current Unix time in
/// nanoseconds, or the previous id plus one if the clock has not advanced.
/// Ids are therefore strictly increasing and never reused, even after the
/// task they named is deleted.
///
/// # Iteration visibility
///
/// [`for_each`](TaskStore::for_each) copies the stored tasks while holding
/// the lock, releases it, then visits the copy. Mutations made while the
/// visitor runs (including by the visitor itself) are not observed by that
/// iteration, and the visitor never blocks writers.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
    last_id: AtomicU64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> TaskId {
        let now = unix_nanos();
        let prev = match self
            .last_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        TaskId(now.max(prev + 1))
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

impl TaskStore for InMemoryTaskStore {
    fn add(&self, description: String, due_at: SystemTime) -> TaskId {
        let id = self.next_id();
        let task = Task {
            id,
            description,
            done: false,
            due_at,
        };
        self.tasks.lock().insert(id, task);
        id
    }

    fn for_each(&self, visit: &mut dyn FnMut(Task) -> Result<()>) -> Result<()> {
        let snapshot: Vec<Task> = self.tasks.lock().values().cloned().collect();
        snapshot.into_iter().try_for_each(visit)
    }

    fn update(
        &self,
        id: TaskId,
        description: String,
        due_at: SystemTime,
        done: bool,
    ) -> Result<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(&id).ok_or(Error::NotFound { id })?;
        task.description = description;
        task.due_at = due_at;
        task.done = done;
        Ok(())
    }

    fn delete(&self, id: TaskId) -> Result<()> {
        self.tasks
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::NotFound { id })
    }

    fn len(&self) -> usize {
        self.tasks.lock().len()
    }
}
