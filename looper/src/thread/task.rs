use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Periodic work driven by a looper's tick.
///
/// All three hooks run on the looper's worker thread: `before` once when the
/// thread starts, `update` once per tick, `after` once when the thread exits
/// (even if it exits by unwinding).
pub trait Task: Send {
    fn before(&mut self) {}

    /// Called once per tick with the configured tick interval.
    fn update(&mut self, elapsed: Duration);

    fn after(&mut self) {}
}

/// A task that does nothing on tick. For loopers used only for events and calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleTask;

impl Task for IdleTask {
    fn update(&mut self, _elapsed: Duration) {}
}

/// Adapts a closure into a `Task` that only implements `update`.
pub struct TickFn<F> {
    f: F,
}

impl<F> TickFn<F>
where
    F: FnMut(Duration) + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Task for TickFn<F>
where
    F: FnMut(Duration) + Send,
{
    fn update(&mut self, elapsed: Duration) {
        (self.f)(elapsed)
    }
}

/// How a looper holds its task.
///
/// `Owned` moves the task into the worker thread. `Shared` keeps it behind an
/// `Arc<Mutex<_>>` so the creator can inspect it; the worker locks it for the
/// duration of each hook.
pub enum TaskSlot {
    Owned(Box<dyn Task>),
    Shared(Arc<Mutex<dyn Task>>),
}

impl TaskSlot {
    pub fn owned<T: Task + 'static>(task: T) -> Self {
        TaskSlot::Owned(Box::new(task))
    }

    pub fn shared<T: Task + 'static>(task: Arc<Mutex<T>>) -> Self {
        TaskSlot::Shared(task)
    }

    /// Runs `f` with exclusive access to the task.
    pub fn with<R>(&mut self, f: impl FnOnce(&mut dyn Task) -> R) -> R {
        match self {
            TaskSlot::Owned(task) => f(task.as_mut()),
            TaskSlot::Shared(task) => {
                let mut guard = task.lock().unwrap_or_else(PoisonError::into_inner);
                f(&mut *guard)
            }
        }
    }
}

impl fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSlot::Owned(_) => f.write_str("TaskSlot::Owned"),
            TaskSlot::Shared(_) => f.write_str("TaskSlot::Shared"),
        }
    }
}
