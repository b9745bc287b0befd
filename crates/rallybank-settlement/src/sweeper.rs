//! Background lot-expiry sweeper.
//!
//! The only long-running task the engine needs: every tick it closes lots
//! whose deadline has passed. The sweep itself is synchronous and takes
//! per-lot locks, so it runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use rallybank_auction::AuctionEngine;
use rallybank_types::constants::DEFAULT_EXPIRY_SWEEP_MS;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running sweeper. Dropping it stops the task without waiting for it;
/// [`ExpirySweeper::shutdown`] also waits for the current tick to finish.
pub struct ExpirySweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Stop after the current tick and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.handle.await {
            tracing::error!(error = %err, "Expiry sweeper task failed");
        }
    }
}

/// Spawn the sweeper on the current runtime, ticking at the default
/// interval.
#[must_use]
pub fn spawn_default_expiry_sweeper(engine: Arc<AuctionEngine>) -> ExpirySweeper {
    spawn_expiry_sweeper(engine, Duration::from_millis(DEFAULT_EXPIRY_SWEEP_MS))
}

/// Spawn the sweeper on the current runtime.
#[must_use]
pub fn spawn_expiry_sweeper(engine: Arc<AuctionEngine>, every: Duration) -> ExpirySweeper {
    let (stop, mut stopped) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(every_ms = every.as_millis(), "Expiry sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped.changed() => break,
            }
            let engine = Arc::clone(&engine);
            match tokio::task::spawn_blocking(move || engine.sweep_expired()).await {
                Ok(closed) if !closed.is_empty() => {
                    tracing::debug!(closed = closed.len(), "Sweep tick closed lots");
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "Sweep tick panicked"),
            }
        }
        tracing::info!("Expiry sweeper stopped");
    });
    ExpirySweeper { stop, handle }
}
