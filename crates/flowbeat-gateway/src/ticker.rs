use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use flowbeat_scheduler::HeartbeatSweep;

/// Background heartbeat loop. Seeds and sweeps every `interval_secs` until
/// `shutdown` broadcasts `true`.
///
/// Errors are logged and the loop keeps going; a broken database turns into
/// a noisy log stream rather than a silently dead scheduler.
pub async fn run(sweep: Arc<HeartbeatSweep>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    info!(interval_secs, "sweep ticker started");

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                if let Err(e) = sweep.ensure_scheduled(now) {
                    error!("schedule seeding error: {e}");
                    continue;
                }
                if let Err(e) = sweep.run_sweep(now).await {
                    error!("sweep error: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("sweep ticker shutting down");
                    break;
                }
            }
        }
    }
}
