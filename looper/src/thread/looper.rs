//! # Looper
//!
//! A `Looper` owns one worker thread running an event loop. Other threads
//! hand it work in two forms:
//!
//! - **events**: `emit(name, payload)` delivers `payload` to every listener
//!   registered with `on(name, ..)`, in registration order
//! - **deferred calls**: `dispatch(f)` runs `f` on the worker thread
//!
//! Both kinds go through one pending queue. Every entry is stamped from a
//! single sequence counter while the queue lock is held, so queue order is id
//! order and a producer's submissions run in the order it made them.
//!
//! Only the worker thread ever runs listeners, deferred calls and the task's
//! hooks, so user callbacks never race each other.
//!
//! ## Lifecycle
//! ```text
//! new ──► run() ──► [worker: init ─► before ─► drain ─► loop ...] ──► async_stop / sync_stop
//!                                                               │
//!             final drain ─► stopped ─► loop halted ─► after ◄──┘
//! ```
//!
//! ## Stop policy
//! A stop always performs exactly one final drain. Anything submitted after
//! it is rejected with `LooperError::Stopped`; entries that raced past the
//! check are dropped without running, which releases any `wait` on them.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use tracing::{debug, error, trace, warn};

use crate::thread::collections::{ThreadSafeMultiMap, ThreadSafeQueue};
use crate::thread::config::{LooperConfig, ThreadCategory};
use crate::thread::error::{panic_message, LooperError};
use crate::thread::event_loop::{EventLoop, LoopId, StopHandle, WakeSignal};
use crate::thread::finalizer::Finalizer;
use crate::thread::local::LocalSlot;
use crate::thread::seq_item::{SequenceCounter, SequencedItem};
use crate::thread::task::{Task, TaskSlot};
use crate::thread::ticker::TickDriver;

lazy_static! {
    static ref CURRENT_LOOPER: LocalSlot = LocalSlot::named("looper.current");
}

/// Callback invoked for each event emitted under the name it was registered for.
pub type Listener<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Work queued with `dispatch`.
pub type DeferredCall = Box<dyn FnOnce() + Send>;

/// Outcome of a `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The closure ran on the looper thread.
    Completed,
    /// The timeout elapsed first. The closure is still queued and will run.
    TimedOut,
}

enum Pending<P> {
    Event(SequencedItem<P>),
    Call(SequencedItem<DeferredCall>),
}

impl<P> Pending<P> {
    fn id(&self) -> u64 {
        match self {
            Pending::Event(item) => item.id,
            Pending::Call(item) => item.id,
        }
    }
}

/// What the worker publishes once its event loop exists.
struct Binding {
    loop_id: LoopId,
    wake: WakeSignal,
    stop: StopHandle,
}

struct Shared<P> {
    config: LooperConfig,
    pending: ThreadSafeQueue<Pending<P>>,
    listeners: ThreadSafeMultiMap<String, Listener<P>>,
    sequence: SequenceCounter,
    binding: OnceLock<Binding>,
    initialized: AtomicBool,
    stop_requested: AtomicBool,
    finishing: AtomicBool,
    stopped: AtomicBool,
}

impl<P: Send + 'static> Shared<P> {
    fn new(config: LooperConfig) -> Self {
        Self {
            config,
            pending: ThreadSafeQueue::new(),
            listeners: ThreadSafeMultiMap::new(),
            sequence: SequenceCounter::new(),
            binding: OnceLock::new(),
            initialized: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            finishing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_current_thread(&self) -> bool {
        match (self.binding.get(), LoopId::current()) {
            (Some(binding), Some(current)) => binding.loop_id == current,
            _ => false,
        }
    }

    /// Creates the event loop, wake signal and tick driver on the worker thread.
    fn init(shared: &Arc<Self>, task: TaskSlot) -> Result<TickDriver, LooperError> {
        if shared.initialized.load(Ordering::SeqCst) {
            return Err(LooperError::AlreadyRunning);
        }

        let event_loop = EventLoop::new().map_err(|e| LooperError::EventLoop(e.to_string()))?;
        let handle = event_loop.handle();

        let target = Arc::clone(shared);
        let wake = handle.wake_signal(move || target.drain());
        let binding = Binding {
            loop_id: handle.id(),
            wake,
            stop: handle.stop_handle(),
        };
        if shared.binding.set(binding).is_err() {
            return Err(LooperError::AlreadyRunning);
        }

        let driver = TickDriver::new(event_loop, task, shared.config.effective_tick_interval());
        let published: Arc<dyn Any + Send + Sync> = Arc::clone(shared) as Arc<dyn Any + Send + Sync>;
        CURRENT_LOOPER.set(published);
        shared.initialized.store(true, Ordering::SeqCst);
        Ok(driver)
    }

    /// Allocates an id and queues the entry built by `make`.
    fn enqueue(&self, make: impl FnOnce(u64) -> Pending<P>) -> Result<(), LooperError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(LooperError::NotRunning);
        }
        self.pending.push_back_with(|| {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(LooperError::Stopped);
            }
            Ok(make(self.sequence.next()))
        })
    }

    fn notify(&self) {
        if let Some(binding) = self.binding.get() {
            binding.wake.signal();
        }
    }

    /// Processes everything queued, then honors a pending stop request.
    ///
    /// Runs on the looper thread only, either from the wake signal or inline
    /// from a same-thread `dispatch`.
    fn drain(&self) {
        assert!(
            self.is_current_thread(),
            "looper `{}` drained from a foreign thread",
            self.name()
        );
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let processed = self.drain_pending();
        if processed > 0 {
            trace!(looper = self.name(), processed, "drained pending work");
        }

        if self.stop_requested.load(Ordering::SeqCst) {
            self.finish();
        }
    }

    fn drain_pending(&self) -> usize {
        let mut processed = 0;
        while !self.stopped.load(Ordering::SeqCst) {
            let Some(item) = self.pending.try_pop_front() else {
                break;
            };
            self.process(item);
            processed += 1;
        }
        processed
    }

    fn process(&self, item: Pending<P>) {
        let id = item.id();
        match item {
            Pending::Event(event) => {
                let name = event.name().unwrap_or_default();
                // Snapshot so listeners may call `on`/`off` or dispatch inline.
                let listeners = self.listeners.get(name);
                crate::log_dispatch!("event", id, event = name, listeners = listeners.len());
                for listener in &listeners {
                    listener(&event.payload);
                }
            }
            Pending::Call(call) => {
                crate::log_dispatch!("call", id);
                (call.payload)();
            }
        }
    }

    /// Final drain, mark stopped, halt the loop. Runs once, on the looper thread.
    fn finish(&self) {
        if self.stopped.load(Ordering::SeqCst) || self.finishing.swap(true, Ordering::SeqCst) {
            return;
        }

        self.drain_pending();
        self.stopped.store(true, Ordering::SeqCst);

        let dropped = self.pending.drain();
        if !dropped.is_empty() {
            debug!(looper = self.name(), dropped = dropped.len(), "discarding work queued after final drain");
        }
        drop(dropped);

        if let Some(binding) = self.binding.get() {
            binding.stop.stop();
        }
        crate::log_lifecycle!(self.name(), "stopped");
    }

    /// Releases everything still queued when the worker thread exits.
    fn release(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        drop(self.pending.drain());
        if let Some(binding) = self.binding.get() {
            binding.wake.close();
        }
        CURRENT_LOOPER.clear();
    }
}

/// Body of the worker thread.
fn worker_main<P: Send + 'static>(
    shared: Arc<Shared<P>>,
    task: TaskSlot,
    ready: flume::Sender<Result<(), LooperError>>,
) {
    let driver = match Shared::init(&shared, task) {
        Ok(driver) => driver,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    drop(ready);

    // Declared first so it runs last: after `Task::after` and loop teardown.
    let _release = Finalizer::new(|| {
        shared.release();
        crate::log_lifecycle!(shared.name(), "exited");
    });
    let _after = Finalizer::new(|| driver.after_run());

    driver.before_run();
    if shared.stopped.load(Ordering::SeqCst) {
        return;
    }
    // Work queued between init and the loop starting.
    shared.drain();
    if shared.stopped.load(Ordering::SeqCst) {
        return;
    }
    driver.run();
}

/// Cloneable, thread-safe handle to a looper.
///
/// Carries every operation except the thread lifecycle (`run`, `join`,
/// `detach`), which stays with the owning `Looper`.
pub struct LooperHandle<P> {
    shared: Arc<Shared<P>>,
}

impl<P> Clone for LooperHandle<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P> fmt::Debug for LooperHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LooperHandle")
            .field("name", &self.shared.config.name)
            .field("category", &self.shared.config.category)
            .field("initialized", &self.shared.initialized.load(Ordering::SeqCst))
            .field("stopped", &self.shared.stopped.load(Ordering::SeqCst))
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl<P: Send + 'static> LooperHandle<P> {
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn category(&self) -> ThreadCategory {
        self.shared.config.category
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.config.effective_tick_interval()
    }

    /// True between a successful `run` and the stop taking effect.
    pub fn is_running(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst) && !self.is_stopped()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// True if called from this looper's worker thread.
    pub fn is_current_thread(&self) -> bool {
        self.shared.is_current_thread()
    }

    /// Snapshot of queued events and calls.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.len()
    }

    /// Queues an event for the listeners of `name`. Never blocks.
    pub fn emit(&self, name: impl Into<String>, payload: P) -> Result<(), LooperError> {
        let name = name.into();
        self.shared
            .enqueue(|id| Pending::Event(SequencedItem::named(id, name, payload)))?;
        self.shared.notify();
        Ok(())
    }

    /// Registers a listener for `name`. Takes effect for the next drain.
    pub fn on<F>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        self.shared.listeners.add(name.into(), Arc::new(listener));
    }

    /// Removes every listener registered for `name`, returning how many there were.
    pub fn off(&self, name: &str) -> usize {
        self.shared.listeners.clear(name)
    }

    /// Queues `f` to run on the looper thread.
    ///
    /// From the looper thread itself the queue is drained inline, so `f` has
    /// run by the time `dispatch` returns.
    pub fn dispatch<F>(&self, f: F) -> Result<(), LooperError>
    where
        F: FnOnce() + Send + 'static,
    {
        let call: DeferredCall = Box::new(f);
        self.shared.enqueue(|id| Pending::Call(SequencedItem::new(id, call)))?;
        if self.shared.is_current_thread() {
            self.shared.drain();
        } else {
            self.shared.notify();
        }
        Ok(())
    }

    /// Runs `f` on the looper thread and blocks until it has run.
    pub fn wait<F>(&self, f: F) -> Result<WaitStatus, LooperError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.wait_timeout(f, Duration::ZERO)
    }

    /// Like `wait`, giving up after `timeout`. `Duration::ZERO` waits forever,
    /// as does a timeout too large to express as a deadline.
    ///
    /// A timed-out wait does not retract `f`; it still runs later.
    pub fn wait_timeout<F>(&self, f: F, timeout: Duration) -> Result<WaitStatus, LooperError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.is_current_thread() {
            self.dispatch(f)?;
            return Ok(WaitStatus::Completed);
        }

        let (done_tx, done_rx) = flume::bounded::<()>(1);
        self.dispatch(move || {
            f();
            let _ = done_tx.send(());
        })?;

        // A deadline past what `Instant` can represent is as good as forever.
        let deadline = Some(timeout)
            .filter(|timeout| !timeout.is_zero())
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let outcome = match deadline {
            Some(deadline) => done_rx.recv_deadline(deadline),
            None => done_rx.recv().map_err(|_| flume::RecvTimeoutError::Disconnected),
        };

        match outcome {
            Ok(()) => Ok(WaitStatus::Completed),
            Err(flume::RecvTimeoutError::Timeout) => Ok(WaitStatus::TimedOut),
            Err(flume::RecvTimeoutError::Disconnected) => Err(LooperError::CallAbandoned),
        }
    }

    /// Requests a stop and returns without waiting for it.
    pub fn async_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.notify();
    }

    /// Stops the looper and blocks until the final drain has run and the loop
    /// has been halted.
    ///
    /// Returns `false` if the looper was never started, `true` otherwise.
    /// Calling it again after the looper stopped returns `true` immediately.
    pub fn sync_stop(&self) -> bool {
        let shared = &self.shared;
        if !shared.initialized.load(Ordering::SeqCst) {
            return false;
        }
        if shared.stopped.load(Ordering::SeqCst) {
            return true;
        }
        if shared.is_current_thread() {
            shared.finish();
            return true;
        }

        let target = Arc::clone(shared);
        match self.wait(move || target.finish()) {
            Ok(_) => true,
            Err(LooperError::NotRunning) => false,
            // Stopped or abandoned: someone else already brought it down.
            Err(_) => true,
        }
    }
}

/// A per-thread event-loop actor.
///
/// Dereferences to `LooperHandle`, which carries the submission API; the
/// `Looper` itself adds the thread lifecycle. Dropping a running looper
/// forces a `sync_stop` and joins the worker.
pub struct Looper<P: Send + 'static> {
    handle: LooperHandle<P>,
    task: Option<TaskSlot>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Send + 'static> fmt::Debug for Looper<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("handle", &self.handle)
            .field("task", &self.task)
            .finish()
    }
}

impl<P: Send + 'static> Deref for Looper<P> {
    type Target = LooperHandle<P>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<P: Send + 'static> Looper<P> {
    /// Creates a looper that owns `task`.
    pub fn new<T: Task + 'static>(config: LooperConfig, task: T) -> Self {
        Self::with_slot(config, TaskSlot::owned(task))
    }

    /// Creates a looper whose task stays reachable by the caller.
    ///
    /// The worker locks `task` around every hook, so holding the lock for
    /// long on another thread delays ticks.
    pub fn with_shared_task<T: Task + 'static>(config: LooperConfig, task: Arc<Mutex<T>>) -> Self {
        Self::with_slot(config, TaskSlot::shared(task))
    }

    fn with_slot(config: LooperConfig, task: TaskSlot) -> Self {
        Self {
            handle: LooperHandle {
                shared: Arc::new(Shared::new(config)),
            },
            task: Some(task),
            thread: Mutex::new(None),
        }
    }

    /// The looper running on the calling thread, if its payload type is `P`.
    pub fn current() -> Option<LooperHandle<P>> {
        let shared = CURRENT_LOOPER.get()?.downcast::<Shared<P>>().ok()?;
        Some(LooperHandle { shared })
    }

    pub fn handle(&self) -> LooperHandle<P> {
        self.handle.clone()
    }

    /// Spawns the worker thread and blocks until it has finished initializing.
    ///
    /// Can succeed at most once per looper.
    pub fn run(&mut self) -> Result<(), LooperError> {
        let shared = Arc::clone(&self.handle.shared);
        if shared.initialized.load(Ordering::SeqCst) {
            return Err(LooperError::AlreadyRunning);
        }
        let task = self.task.take().ok_or(LooperError::AlreadyRunning)?;

        let (ready_tx, ready_rx) = flume::bounded(1);
        let worker = std::thread::Builder::new()
            .name(shared.config.thread_name())
            .spawn(move || worker_main(shared, task, ready_tx))
            .map_err(|e| LooperError::ThreadSetup(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);
                crate::log_lifecycle!(self.name(), "running", category = self.category().as_str());
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let reason = match worker.join() {
                    Err(payload) => panic_message(payload),
                    Ok(()) => "worker exited during init".to_string(),
                };
                Err(LooperError::ThreadSetup(reason))
            }
        }
    }

    fn take_thread(&self) -> Result<JoinHandle<()>, LooperError> {
        if !self.shared.initialized.load(Ordering::SeqCst) {
            return Err(LooperError::NotRunning);
        }
        if self.is_current_thread() {
            return Err(LooperError::NotJoinable);
        }
        self.thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(LooperError::NotJoinable)
    }

    /// Blocks until the worker thread exits.
    ///
    /// Only returns once the looper has been stopped by someone.
    pub fn join(&self) -> Result<(), LooperError> {
        let worker = self.take_thread()?;
        worker
            .join()
            .map_err(|payload| LooperError::WorkerPanicked(panic_message(payload)))
    }

    /// Lets the worker thread run on without being joined.
    pub fn detach(&self) -> Result<(), LooperError> {
        drop(self.take_thread()?);
        Ok(())
    }
}

impl<P: Send + 'static> Drop for Looper<P> {
    fn drop(&mut self) {
        if self.is_running() {
            if !self.shared.stop_requested.load(Ordering::SeqCst) {
                warn!(looper = self.name(), "looper dropped while running, forcing shutdown");
            }
            self.sync_stop();
        }

        let worker = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if self.is_current_thread() {
                return;
            }
            if let Err(payload) = worker.join() {
                error!(looper = self.name(), panic = %panic_message(payload), "looper worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::task::IdleTask;
    use std::sync::atomic::AtomicUsize;

    fn started(name: &str) -> Looper<i64> {
        let mut looper = Looper::new(LooperConfig::new(name), IdleTask);
        looper.run().unwrap();
        looper
    }

    #[test]
    fn test_operations_before_run() {
        let looper: Looper<i64> = Looper::new(LooperConfig::new("unstarted"), IdleTask);
        assert!(!looper.is_running());
        assert!(!looper.is_current_thread());
        assert_eq!(looper.emit("add", 1), Err(LooperError::NotRunning));
        assert_eq!(looper.dispatch(|| {}), Err(LooperError::NotRunning));
        assert_eq!(looper.join(), Err(LooperError::NotRunning));
        assert!(!looper.sync_stop());
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let mut looper = started("twice");
        assert_eq!(looper.run(), Err(LooperError::AlreadyRunning));
        assert!(looper.sync_stop());
        looper.join().unwrap();
    }

    #[test]
    fn test_ids_follow_queue_order() {
        let looper = started("ids");
        looper.wait(|| {}).unwrap();
        let before = looper.shared.sequence.peek();
        looper.emit("noop", 0).unwrap();
        looper.dispatch(|| {}).unwrap();
        looper.wait(|| {}).unwrap();
        assert_eq!(looper.shared.sequence.peek(), before + 3);
        assert!(looper.sync_stop());
    }

    #[test]
    fn test_current_only_on_worker() {
        let looper = started("current");
        assert!(Looper::<i64>::current().is_none());

        let found = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&found);
        looper
            .wait(move || {
                if let Some(handle) = Looper::<i64>::current() {
                    if handle.is_current_thread() && handle.name() == "current" {
                        seen.store(1, Ordering::SeqCst);
                    }
                }
                // Payload type mismatch never resolves.
                if Looper::<String>::current().is_some() {
                    seen.store(2, Ordering::SeqCst);
                }
            })
            .unwrap();

        assert_eq!(found.load(Ordering::SeqCst), 1);
        assert!(looper.sync_stop());
    }

    #[test]
    fn test_pending_entry_ids() {
        let event: Pending<i64> = Pending::Event(SequencedItem::named(7, "add", 1));
        let call: Pending<i64> = Pending::Call(SequencedItem::new(8, Box::new(|| {})));
        assert_eq!(event.id(), 7);
        assert_eq!(call.id(), 8);
    }
}
