use std::fmt;
use std::time::Duration;

/// Tick interval used when none is configured.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);

/// Shortest tick interval a looper will schedule. Smaller values are clamped.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

// --- Configuration Enums ---

/// Label describing what a looper thread is used for.
///
/// The category is informational only: nothing restricts which work may be
/// submitted to a looper based on its category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ThreadCategory {
    #[default]
    AnyThread,
    MainThread,
    PhysicsThread,
    RenderThread,
    NetThread,
}

impl ThreadCategory {
    /// Bit flag for the category. `AnyThread` has no bits set.
    pub fn bits(&self) -> u32 {
        match self {
            ThreadCategory::AnyThread => 0,
            ThreadCategory::MainThread => 1 << 0,
            ThreadCategory::PhysicsThread => 1 << 1,
            ThreadCategory::RenderThread => 1 << 2,
            ThreadCategory::NetThread => 1 << 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadCategory::AnyThread => "any",
            ThreadCategory::MainThread => "main",
            ThreadCategory::PhysicsThread => "physics",
            ThreadCategory::RenderThread => "render",
            ThreadCategory::NetThread => "net",
        }
    }
}

impl fmt::Display for ThreadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Looper Configuration ---

/// Configuration for a single `Looper`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LooperConfig {
    /// Name used for the worker thread (`looper-{name}`) and in log records.
    pub name: String,

    /// Informational category tag.
    pub category: ThreadCategory,

    /// Interval between two `Task::update` calls.
    pub tick_interval: Duration,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            name: "looper".to_string(),
            category: ThreadCategory::AnyThread,
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl LooperConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: ThreadCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// The tick interval actually scheduled, clamped to `MIN_TICK_INTERVAL`.
    pub fn effective_tick_interval(&self) -> Duration {
        self.tick_interval.max(MIN_TICK_INTERVAL)
    }

    pub fn thread_name(&self) -> String {
        format!("looper-{}", self.name)
    }
}
