//! Dropping a running looper forces a synchronous stop: the final drain runs,
//! `Task::after` runs, and the worker thread is joined before `drop` returns.
//!
//! Run with: cargo run --example stop_on_drop

use std::time::Duration;

use looper::thread::TickFn;
use looper::{logging, Looper, LooperConfig, LooperError};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    logging::init_default();

    let config = LooperConfig::new("short-lived").with_tick_interval(Duration::from_millis(50));
    let mut looper: Looper<String> = Looper::new(config, TickFn::new(|_| {}));
    looper.run()?;

    looper.on("greet", |who: &String| info!(who = who.as_str(), "hello"));
    for who in ["alice", "bob", "carol"] {
        looper.emit("greet", who.to_string())?;
    }

    let handle = looper.handle();
    drop(looper);

    info!(stopped = handle.is_stopped(), "looper dropped");
    match handle.emit("greet", "dave".to_string()) {
        Err(LooperError::Stopped) => info!("late emit rejected"),
        other => warn!(?other, "unexpected result for late emit"),
    }
    Ok(())
}
