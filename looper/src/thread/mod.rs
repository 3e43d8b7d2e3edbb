//! Thread-bound event loop runtime for Looper.

pub mod collections;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod finalizer;
pub mod local;
pub mod looper;
pub mod seq_item;
pub mod task;
pub mod ticker;

// Re-export key types for easier usage
pub use config::{LooperConfig, ThreadCategory, DEFAULT_TICK_INTERVAL, MIN_TICK_INTERVAL};
pub use error::LooperError;
pub use looper::{DeferredCall, Listener, Looper, LooperHandle, WaitStatus};
pub use seq_item::{SequenceCounter, SequencedItem};
pub use task::{IdleTask, Task, TaskSlot, TickFn};
