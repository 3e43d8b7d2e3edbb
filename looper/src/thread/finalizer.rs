/// Runs a closure when dropped.
///
/// The closure fires on every exit path of the enclosing scope: normal
/// return, early return, `?` propagation and unwinding.
#[must_use = "a Finalizer runs its closure as soon as it is dropped"]
pub struct Finalizer<F: FnOnce()> {
    callback: Option<F>,
}

impl<F: FnOnce()> Finalizer<F> {
    pub fn new(callback: F) -> Self {
        Self {
            callback: Some(callback),
        }
    }
}

impl<F: FnOnce()> Drop for Finalizer<F> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_runs_on_scope_exit() {
        let ran = Cell::new(false);
        {
            let _guard = Finalizer::new(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }

    #[test]
    fn test_runs_on_early_return() {
        fn early(ran: &Cell<u32>, bail: bool) -> Result<(), &'static str> {
            let _guard = Finalizer::new(|| ran.set(ran.get() + 1));
            if bail {
                return Err("bail");
            }
            Ok(())
        }

        let ran = Cell::new(0);
        assert!(early(&ran, true).is_err());
        assert!(early(&ran, false).is_ok());
        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn test_runs_on_panic() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = panic::catch_unwind(move || {
            let _guard = Finalizer::new(move || flag.store(true, Ordering::SeqCst));
            panic!("task blew up");
        });
        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));
    }
}
