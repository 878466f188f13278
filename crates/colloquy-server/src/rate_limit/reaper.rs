use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::store::WindowStore;

/// Background task that evicts expired windows from a set of stores.
pub struct Reaper;

/// Eviction routine run against each store on every tick.
type Evict = fn(&WindowStore, Instant) -> usize;

impl Reaper {
    /// Spawn the sweep loop on the current runtime.
    ///
    /// The first sweep runs one `period` after spawning. The task stops when
    /// [`ReaperHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn(stores: Vec<WindowStore>, period: Duration) -> ReaperHandle {
        Self::spawn_with(stores, period, WindowStore::evict_expired)
    }

    fn spawn_with(stores: Vec<WindowStore>, period: Duration, evict: Evict) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => sweep_with(&stores, evict).await,
                }
            }

            tracing::debug!("rate limit reaper stopped");
        });

        ReaperHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Run `evict` against every store.
///
/// Each store is swept on a blocking task so a panic inside one sweep is
/// contained and logged; the next tick starts over regardless.
async fn sweep_with(stores: &[WindowStore], evict: Evict) {
    for store in stores {
        let store = store.clone();
        let result = tokio::task::spawn_blocking(move || evict(&store, Instant::now())).await;

        match result {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(removed, "evicted expired rate limit windows"),
            Err(e) => tracing::error!(error = %e, "rate limit sweep failed"),
        }
    }
}

/// Owner of a running [`Reaper`].
pub struct ReaperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "rate limit reaper task failed");
            }
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
