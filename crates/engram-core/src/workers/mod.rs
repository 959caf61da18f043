//! Scheduled maintenance cycles. Workers share the graph store with the
//! online path and mutate through the same operations, so their changes
//! appear on the event bus and in the audit log identically. Worker
//! failures feed the log, never the agent.

mod clustering;
mod decay;
mod inference;
mod revision;

pub use clustering::ClusteringWorker;
pub use decay::DecayWorker;
pub use inference::InferenceWorker;
pub use revision::{RevisionWorker, Verdict, Verifier};

use log::error;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run a cycle on an interval, logging failures and continuing.
pub fn spawn_cycle<F, Fut>(name: &'static str, interval: Duration, cycle: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = crate::error::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh service
        // does not run every cycle at startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = cycle().await {
                error!("{} cycle failed: {}", name, e);
            }
        }
    })
}
