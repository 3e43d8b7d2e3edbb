//! # Event Loop Module
//!
//! The single-threaded event loop a looper's worker thread runs on. It is
//! built from a tokio current-thread runtime and a `LocalSet`, and exposes a
//! callback-style surface:
//!
//! - create and destroy a loop (`EventLoop::new`, drop)
//! - run it until stopped (`EventLoop::run`)
//! - one-shot and repeating timers (`LoopHandle::timer`, `LoopHandle::repeating`)
//! - a cross-thread wake object whose callback runs on the loop thread
//!   (`LoopHandle::wake_signal`)
//! - stop from inside a callback (`LoopHandle::stop`, `StopHandle::stop`)
//!
//! ## Panics in callbacks
//! Tokio would swallow a panic inside a spawned local task. Instead, every
//! callback is run under `catch_unwind`; the first panic halts the loop and is
//! resumed from `EventLoop::run` on the loop's thread.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, LocalSet};
use uuid::Uuid;

use crate::thread::local::LocalSlot;

lazy_static! {
    static ref CURRENT_LOOP: LocalSlot = LocalSlot::named("looper.event_loop");
}

/// Identity of one event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(Uuid);

impl LoopId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The id of the event loop created on the calling thread, if any.
    pub fn current() -> Option<LoopId> {
        CURRENT_LOOP
            .get()
            .and_then(|value| value.downcast::<LoopId>().ok())
            .map(|id| *id)
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Thread-safe handle that halts an event loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    notify: Arc<Notify>,
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests the loop to return from `run`. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

type PanicPayload = Box<dyn Any + Send + 'static>;

/// Catches callback panics and parks the first one until `run` returns.
#[derive(Clone)]
struct PanicTrap {
    payload: Rc<RefCell<Option<PanicPayload>>>,
    stop: StopHandle,
}

impl PanicTrap {
    fn call(&self, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let mut slot = self.payload.borrow_mut();
            if slot.is_none() {
                *slot = Some(payload);
            }
            self.stop.stop();
        }
    }

    fn take(&self) -> Option<PanicPayload> {
        self.payload.borrow_mut().take()
    }
}

/// A single-threaded event loop bound to the thread that created it.
pub struct EventLoop {
    // Field order matters: local tasks are dropped before the runtime.
    local: Rc<LocalSet>,
    runtime: Runtime,
    id: LoopId,
    stop: StopHandle,
    trap: PanicTrap,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.id)
            .field("stopped", &self.stop.is_stopped())
            .finish()
    }
}

impl EventLoop {
    /// Creates a loop and registers it as the calling thread's loop.
    pub fn new() -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let id = LoopId::generate();
        let stop = StopHandle::new();
        let trap = PanicTrap {
            payload: Rc::new(RefCell::new(None)),
            stop: stop.clone(),
        };
        CURRENT_LOOP.set(Arc::new(id));

        Ok(Self {
            local: Rc::new(LocalSet::new()),
            runtime,
            id,
            stop,
            trap,
        })
    }

    pub fn id(&self) -> LoopId {
        self.id
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            id: self.id,
            local: Rc::downgrade(&self.local),
            stop: self.stop.clone(),
            trap: self.trap.clone(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs the loop on the calling thread until it is stopped.
    ///
    /// Returns immediately if the loop was stopped before `run` was called.
    /// If a callback panicked, the panic is resumed here after the loop halts.
    pub fn run(&self) {
        let notify = Arc::clone(&self.stop.notify);
        let stopped = Arc::clone(&self.stop.stopped);

        if !stopped.load(Ordering::SeqCst) {
            self.runtime.block_on(self.local.run_until(async move {
                while !stopped.load(Ordering::SeqCst) {
                    notify.notified().await;
                }
            }));
        }

        if let Some(payload) = self.trap.take() {
            panic::resume_unwind(payload);
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let ours = LoopId::current().is_some_and(|id| id == self.id);
        if ours {
            CURRENT_LOOP.clear();
        }
    }
}

/// Loop-thread handle used to register timers and wake signals.
///
/// Holds the loop weakly: registering on a destroyed loop is a no-op.
#[derive(Clone)]
pub struct LoopHandle {
    id: LoopId,
    local: Weak<LocalSet>,
    stop: StopHandle,
    trap: PanicTrap,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("id", &self.id)
            .field("alive", &(self.local.strong_count() > 0))
            .finish()
    }
}

impl LoopHandle {
    pub fn id(&self) -> LoopId {
        self.id
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Runs `callback` once after `delay`.
    pub fn timer<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        let trap = self.trap.clone();
        let task = self.local.upgrade().map(|local| {
            local.spawn_local(async move {
                tokio::time::sleep(delay).await;
                trap.call(callback);
            })
        });
        TimerHandle { task }
    }

    /// Runs `callback` every `period`, first after one full period.
    pub fn repeating<F>(&self, period: Duration, mut callback: F) -> TimerHandle
    where
        F: FnMut() + 'static,
    {
        let trap = self.trap.clone();
        let task = self.local.upgrade().map(|local| {
            local.spawn_local(async move {
                let start = tokio::time::Instant::now() + period;
                let mut ticker = tokio::time::interval_at(start, period);
                loop {
                    ticker.tick().await;
                    trap.call(&mut callback);
                }
            })
        });
        TimerHandle { task }
    }

    /// Registers `callback` to run on the loop thread whenever the returned
    /// signal is raised.
    ///
    /// Signals raised while a callback is pending coalesce into one call.
    pub fn wake_signal<F>(&self, mut callback: F) -> WakeSignal
    where
        F: FnMut() + 'static,
    {
        let signal = WakeSignal {
            notify: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        };

        if let Some(local) = self.local.upgrade() {
            let notify = Arc::clone(&signal.notify);
            let closed = Arc::clone(&signal.closed);
            let trap = self.trap.clone();
            local.spawn_local(async move {
                loop {
                    notify.notified().await;
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    trap.call(&mut callback);
                }
            });
        }

        signal
    }
}

/// Handle to a registered timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Cancels the timer if it has not fired yet.
    pub fn cancel(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Cross-thread wake object bound to one event loop.
#[derive(Debug, Clone)]
pub struct WakeSignal {
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl WakeSignal {
    /// Schedules the registered callback on the loop thread. Callable from any thread.
    pub fn signal(&self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    /// Unregisters the callback; later signals are ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
