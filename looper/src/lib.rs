// Looper: a per-thread event-loop actor
//
// A `Looper` owns one dedicated worker thread that runs an event loop. The loop
// fires a `Task` on a fixed tick interval and drains work submitted from any
// other thread: named events delivered to registered listeners, and deferred
// calls. Both kinds of work are stamped from one sequence counter, so a single
// producer observes its submissions processed in order.

pub mod logging;
pub mod thread;

// Re-export commonly used types
pub use thread::{
    Looper, LooperConfig, LooperError, LooperHandle, Task, ThreadCategory, WaitStatus,
};

#[doc(hidden)]
pub use tracing;
