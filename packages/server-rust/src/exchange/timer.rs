//! Periodic timer driver.
//!
//! A single worker wakes every tick while the subsystem runs and injects a
//! timer event into the dispatcher. It performs no state work itself.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Spawns the tick worker. `on_tick` is invoked once per period until the
/// shutdown signal flips to `true` (or its sender is dropped).
pub(crate) fn spawn_timer(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    on_tick: impl Fn() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => on_tick(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("exchange timer worker exiting");
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);

        let counter = Arc::clone(&ticks);
        let worker = spawn_timer(Duration::from_millis(75), rx, move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        let seen = ticks.load(Ordering::Relaxed);
        assert!(seen >= 5, "expected at least 5 ticks, saw {seen}");

        tx.send(true).expect("receiver alive");
        worker.await.expect("worker exits");
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let worker = spawn_timer(Duration::from_millis(75), rx, || {});
        drop(tx);
        worker.await.expect("worker exits");
    }
}
