use std::fmt;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// One unit of work bound for a worker lane
///
/// A task is created when a message arrives or a timer fires, owned by
/// its lane's queue until popped, then consumed exactly once by the
/// worker. The correlation key decides the lane and therefore the
/// serialization domain; tasks sharing a key never run concurrently.
pub struct Task {
    id: Uuid,
    key: String,
    name: String,
    created: Instant,
    work: Box<dyn FnOnce() + Send>,
}

impl Task {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        work: impl FnOnce() + Send + 'static,
    ) -> Self {
        Task {
            id: Uuid::new_v4(),
            key: key.into(),
            name: name.into(),
            created: Instant::now(),
            work: Box::new(work),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The correlation key (Call-ID or timer key) this task serializes on
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-readable name, used in logs when execution fails
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long the task has been waiting since creation
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Runs the task, consuming it
    pub fn run(self) {
        (self.work)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("name", &self.name)
            .field("age", &self.age())
            .finish()
    }
}
