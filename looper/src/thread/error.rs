use thiserror::Error;

/// Errors reported by `Looper` lifecycle and submission operations.
///
/// Contract violations that indicate a bug in the caller (popping an empty
/// collection, draining a looper from a foreign thread) are not represented
/// here; those panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LooperError {
    #[error("Looper is already running")]
    AlreadyRunning,
    #[error("Looper is not running")]
    NotRunning,
    #[error("Looper has been stopped")]
    Stopped,
    #[error("Worker thread is not joinable (already joined, detached or current)")]
    NotJoinable,
    #[error("Thread setup error: {0}")]
    ThreadSetup(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
    #[error("Deferred call was dropped before it ran")]
    CallAbandoned,
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("owned boom"))), "owned boom");
        assert_eq!(panic_message(Box::new(42u32)), "Unknown panic");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(LooperError::Stopped.to_string(), "Looper has been stopped");
        assert_eq!(
            LooperError::WorkerPanicked("bad listener".into()).to_string(),
            "Worker thread panicked: bad listener"
        );
    }
}
