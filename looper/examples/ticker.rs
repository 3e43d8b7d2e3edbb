//! A looper with a 100ms tick. One deferred call stalls the looper thread for
//! half a second; the tick catches up afterwards so the count keeps pace with
//! wall time.
//!
//! Run with: cargo run --example ticker

use std::thread;
use std::time::{Duration, Instant};

use looper::thread::ThreadCategory;
use looper::{logging, Looper, LooperConfig, Task};
use tracing::info;

struct Heartbeat {
    started: Option<Instant>,
    ticks: u64,
}

impl Task for Heartbeat {
    fn before(&mut self) {
        self.started = Some(Instant::now());
        info!("heartbeat starting");
    }

    fn update(&mut self, interval: Duration) {
        self.ticks += 1;
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        info!(
            tick = self.ticks,
            interval_ms = interval.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "tick"
        );
    }

    fn after(&mut self) {
        info!(ticks = self.ticks, "heartbeat finished");
    }
}

fn main() -> anyhow::Result<()> {
    logging::init_default();

    let config = LooperConfig::new("heartbeat")
        .with_category(ThreadCategory::MainThread)
        .with_tick_interval(Duration::from_millis(100));
    let mut looper: Looper<()> = Looper::new(
        config,
        Heartbeat {
            started: None,
            ticks: 0,
        },
    );
    looper.run()?;

    thread::sleep(Duration::from_millis(350));
    info!("stalling the looper thread for 500ms");
    looper.dispatch(|| thread::sleep(Duration::from_millis(500)))?;
    thread::sleep(Duration::from_millis(800));

    looper.sync_stop();
    looper.join()?;
    Ok(())
}
