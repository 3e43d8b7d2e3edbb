// Integration tests for the looper thread lifecycle: run, stop, join, detach, drop

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use looper::thread::ThreadCategory;
use looper::{logging, Looper, LooperConfig, LooperError, Task, WaitStatus};

/// Counts hook invocations from the worker thread.
#[derive(Default, Clone)]
struct HookCounter {
    before: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    after: Arc<AtomicUsize>,
}

impl Task for HookCounter {
    fn before(&mut self) {
        self.before.fetch_add(1, Ordering::SeqCst);
    }

    fn update(&mut self, _elapsed: Duration) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }

    fn after(&mut self) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }
}

fn start(name: &str, hooks: &HookCounter) -> Looper<String> {
    logging::init_test();
    let mut looper = Looper::new(LooperConfig::new(name), hooks.clone());
    looper.run().expect("looper should start");
    looper
}

#[test]
fn test_sync_stop_is_idempotent() {
    let hooks = HookCounter::default();
    let looper = start("idempotent", &hooks);
    assert!(looper.is_running());

    assert!(looper.sync_stop());
    assert!(looper.is_stopped());
    assert!(!looper.is_running());
    assert!(looper.sync_stop());

    looper.join().unwrap();
    assert_eq!(hooks.before.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);

    // Already joined.
    assert_eq!(looper.join(), Err(LooperError::NotJoinable));
}

#[test]
fn test_concurrent_sync_stop() {
    let hooks = HookCounter::default();
    let looper = start("concurrent-stop", &hooks);

    let stoppers: Vec<_> = (0..8)
        .map(|_| {
            let handle = looper.handle();
            thread::spawn(move || handle.sync_stop())
        })
        .collect();
    for stopper in stoppers {
        assert!(stopper.join().unwrap());
    }

    looper.join().unwrap();
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_wait_timeout_returns_early() {
    let hooks = HookCounter::default();
    let looper = start("wait-timeout", &hooks);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let started = Instant::now();
    let status = looper
        .wait_timeout(
            move || {
                thread::sleep(Duration::from_millis(100));
                flag.store(true, Ordering::SeqCst);
            },
            Duration::from_millis(1),
        )
        .unwrap();

    assert_eq!(status, WaitStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(!ran.load(Ordering::SeqCst));

    // The timed-out closure was not retracted; FIFO puts it first.
    assert_eq!(looper.wait(|| {}).unwrap(), WaitStatus::Completed);
    assert!(ran.load(Ordering::SeqCst));
    assert!(looper.sync_stop());
}

#[test]
fn test_wait_with_generous_timeout_completes() {
    let hooks = HookCounter::default();
    let looper = start("wait-ok", &hooks);

    let value = Arc::new(Mutex::new(String::new()));
    let slot = Arc::clone(&value);
    let status = looper
        .wait_timeout(
            move || *slot.lock().unwrap() = "done".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

    assert_eq!(status, WaitStatus::Completed);
    assert_eq!(*value.lock().unwrap(), "done");
    assert!(looper.sync_stop());
}

#[test]
fn test_wait_with_unrepresentable_timeout_waits_forever() {
    let hooks = HookCounter::default();
    let looper = start("wait-max", &hooks);

    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let status = looper
        .wait_timeout(
            move || {
                thread::sleep(Duration::from_millis(10));
                flag.store(true, Ordering::SeqCst);
            },
            Duration::MAX,
        )
        .unwrap();

    assert_eq!(status, WaitStatus::Completed);
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(looper.wait_timeout(|| {}, Duration::MAX), Ok(WaitStatus::Completed));
    assert!(looper.sync_stop());
}

#[test]
fn test_drop_while_running_forces_stop() {
    let hooks = HookCounter::default();
    let looper = start("dropped", &hooks);
    let handle = looper.handle();
    assert!(handle.is_running());

    drop(looper);

    assert!(handle.is_stopped());
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
    assert_eq!(handle.emit("late", "x".to_string()), Err(LooperError::Stopped));
}

#[test]
fn test_detach_then_stop() {
    let hooks = HookCounter::default();
    let looper = start("detached", &hooks);

    looper.detach().unwrap();
    assert_eq!(looper.detach(), Err(LooperError::NotJoinable));
    assert_eq!(looper.join(), Err(LooperError::NotJoinable));

    assert!(looper.sync_stop());
    let deadline = Instant::now() + Duration::from_secs(5);
    while hooks.after.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shared_task_stays_reachable() {
    logging::init_test();
    let hooks = Arc::new(Mutex::new(HookCounter::default()));
    let config = LooperConfig::new("shared-task").with_tick_interval(Duration::from_millis(5));
    let mut looper: Looper<String> = Looper::with_shared_task(config, Arc::clone(&hooks));
    looper.run().unwrap();

    let updates = Arc::clone(&hooks.lock().unwrap().updates);
    let deadline = Instant::now() + Duration::from_secs(5);
    while updates.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(updates.load(Ordering::SeqCst) >= 3);

    assert!(looper.sync_stop());
    looper.join().unwrap();

    let hooks = hooks.lock().unwrap();
    assert_eq!(hooks.before.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_worker_panic_surfaces_on_join() {
    let hooks = HookCounter::default();
    let looper = start("panicking", &hooks);

    looper
        .dispatch(|| {
            thread::sleep(Duration::from_millis(50));
            panic!("boom");
        })
        .unwrap();

    // Queued behind the panicking call; released when the worker unwinds.
    assert_eq!(looper.wait(|| {}), Err(LooperError::CallAbandoned));

    match looper.join() {
        Err(LooperError::WorkerPanicked(message)) => assert!(message.contains("boom")),
        other => panic!("expected a worker panic, got {:?}", other),
    }
    assert!(looper.is_stopped());
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
}

#[test]
fn test_worker_thread_identity() {
    logging::init_test();
    let config = LooperConfig::new("render").with_category(ThreadCategory::RenderThread);
    let mut looper: Looper<String> = Looper::new(config, HookCounter::default());
    assert_eq!(looper.category(), ThreadCategory::RenderThread);
    looper.run().unwrap();

    let name = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&name);
    looper
        .wait(move || {
            *slot.lock().unwrap() = thread::current().name().map(str::to_string);
        })
        .unwrap();

    assert_eq!(name.lock().unwrap().as_deref(), Some("looper-render"));
    assert!(!looper.is_current_thread());
    assert!(Looper::<String>::current().is_none());
    assert!(looper.sync_stop());
}

#[test]
fn test_async_stop_before_loop_starts_is_honored() {
    let hooks = HookCounter::default();
    logging::init_test();
    let looper: Looper<String> = Looper::new(LooperConfig::new("early-stop"), hooks.clone());
    looper.async_stop();

    let mut looper = looper;
    looper.run().unwrap();
    looper.join().unwrap();

    assert!(looper.is_stopped());
    assert_eq!(hooks.before.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.after.load(Ordering::SeqCst), 1);
}
