//! # Tick Driver
//!
//! Drives a looper's `Task` from its event loop. The task's `update` hook is
//! fired on a fixed wall-clock grid: tick `n` is due at `start + n * interval`.
//! When the loop falls behind (a slow tick, a long deferred call), every
//! missed tick is fired back to back before the next timer is armed, so the
//! long-run tick count tracks elapsed time instead of drifting.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::thread::config::MIN_TICK_INTERVAL;
use crate::thread::event_loop::{EventLoop, LoopHandle, TimerHandle};
use crate::thread::task::TaskSlot;

/// The catch-up arithmetic of the tick driver, free of any timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSchedule {
    start: Instant,
    interval: Duration,
    ticks: u64,
}

impl TickSchedule {
    /// Starts a schedule at `start`; the first tick is due one interval later.
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval: interval.max(MIN_TICK_INTERVAL),
            ticks: 1,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticks started so far, counting the pending one.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// When the pending tick is due.
    pub fn expected(&self) -> Instant {
        let nanos = self.interval.as_nanos().saturating_mul(u128::from(self.ticks));
        let offset = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.start + offset
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.expected()
    }

    /// Marks the pending tick as fired.
    pub fn advance(&mut self) {
        self.ticks += 1;
    }

    /// Time left until the pending tick, zero if already due.
    pub fn delay_from(&self, now: Instant) -> Duration {
        self.expected().saturating_duration_since(now)
    }

    /// Advances past every tick due at `now` and returns how many that was.
    pub fn catch_up(&mut self, now: Instant) -> u64 {
        let mut fired = 0;
        while self.is_due(now) {
            self.advance();
            fired += 1;
        }
        fired
    }
}

struct TickState {
    handle: LoopHandle,
    task: RefCell<TaskSlot>,
    schedule: RefCell<Option<TickSchedule>>,
    timer: RefCell<Option<TimerHandle>>,
}

impl TickState {
    fn fire(&self) {
        let interval = {
            let mut schedule = self.schedule.borrow_mut();
            let Some(schedule) = schedule.as_mut() else {
                return;
            };
            schedule.advance();
            trace!(tick = schedule.ticks() - 1, "looper tick");
            schedule.interval()
        };
        self.task.borrow_mut().with(|task| task.update(interval));
    }

    /// Fires every overdue tick, then arms a one-shot timer for the next one.
    fn schedule_next(self: &Rc<Self>) {
        if self.handle.is_stopped() {
            return;
        }

        let now = Instant::now();
        loop {
            let due = self
                .schedule
                .borrow()
                .is_some_and(|schedule| schedule.is_due(now));
            if !due {
                break;
            }
            self.fire();
        }

        let Some(delay) = self.schedule.borrow().map(|schedule| schedule.delay_from(now)) else {
            return;
        };
        let this = Rc::clone(self);
        let timer = self.handle.timer(delay, move || {
            if this.handle.is_stopped() {
                return;
            }
            this.fire();
            this.schedule_next();
        });
        *self.timer.borrow_mut() = Some(timer);
    }
}

/// Owns a looper's event loop and fires its task on every tick.
pub struct TickDriver {
    event_loop: RefCell<Option<EventLoop>>,
    state: Rc<TickState>,
    interval: Duration,
}

impl fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickDriver")
            .field("interval", &self.interval)
            .field("ticks", &self.ticks())
            .field("loop_open", &self.event_loop.borrow().is_some())
            .finish()
    }
}

impl TickDriver {
    pub fn new(event_loop: EventLoop, task: TaskSlot, interval: Duration) -> Self {
        let state = Rc::new(TickState {
            handle: event_loop.handle(),
            task: RefCell::new(task),
            schedule: RefCell::new(None),
            timer: RefCell::new(None),
        });
        Self {
            event_loop: RefCell::new(Some(event_loop)),
            state,
            interval: interval.max(MIN_TICK_INTERVAL),
        }
    }

    pub fn handle(&self) -> &LoopHandle {
        &self.state.handle
    }

    /// Ticks fired so far.
    pub fn ticks(&self) -> u64 {
        self.state
            .schedule
            .borrow()
            .map_or(0, |schedule| schedule.ticks() - 1)
    }

    /// Calls `Task::before`, starts the tick grid and arms the first timer.
    pub fn before_run(&self) {
        self.state.task.borrow_mut().with(|task| task.before());
        *self.state.schedule.borrow_mut() = Some(TickSchedule::new(Instant::now(), self.interval));
        self.state.schedule_next();
    }

    /// Runs the event loop until it is stopped.
    pub fn run(&self) {
        let event_loop = self.event_loop.borrow();
        if let Some(event_loop) = event_loop.as_ref() {
            event_loop.run();
        }
    }

    /// Calls `Task::after`, then closes the event loop.
    pub fn after_run(&self) {
        if let Some(timer) = self.state.timer.borrow_mut().take() {
            timer.cancel();
        }
        self.state.task.borrow_mut().with(|task| task.after());

        let event_loop = self.event_loop.borrow_mut().take();
        drop(event_loop);
    }
}
