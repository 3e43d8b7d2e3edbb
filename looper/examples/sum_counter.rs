//! Twenty producer threads emit `add` events into one looper; the listener
//! sums them on the looper thread without any locking of its own.
//!
//! Run with: cargo run --example sum_counter

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use looper::{logging, Looper, LooperConfig};
use looper::thread::IdleTask;
use tracing::info;

const PRODUCERS: usize = 20;
const EMITS_PER_PRODUCER: usize = 10_000;

fn main() -> anyhow::Result<()> {
    logging::init_default();

    let mut looper: Looper<i64> = Looper::new(LooperConfig::new("sum"), IdleTask);
    looper.run()?;

    let sum = Arc::new(AtomicI64::new(0));
    let total = Arc::clone(&sum);
    looper.on("add", move |value: &i64| {
        total.fetch_add(*value, Ordering::Relaxed);
    });

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let handle = looper.handle();
            thread::spawn(move || -> anyhow::Result<()> {
                for _ in 0..EMITS_PER_PRODUCER {
                    handle.emit("add", 1)?;
                }
                Ok(())
            })
        })
        .collect();

    for producer in producers {
        producer
            .join()
            .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;
    }

    looper.wait(|| {})?;
    info!(sum = sum.load(Ordering::Relaxed), "all events processed");

    looper.sync_stop();
    looper.join()?;
    Ok(())
}
