//! # Sync Scheduler
//!
//! In-process replacement for the external cron caller. Every tick drains one embedding
//! batch; the incremental Gmail/Calendar pass runs on its own, jittered, interval so that
//! several instances started together do not hit Google at the same moment.

use rand::Rng;
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument};

use crate::server::AppState;

/// Upper bound of the random delay added to each incremental interval.
const JITTER_PCT_MAX: f64 = 0.1;

pub struct SyncScheduler {
    state: AppState,
}

impl SyncScheduler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        let scheduler = &self.state.config.scheduler;
        let tick_interval = Duration::from_secs(scheduler.tick_interval_seconds.max(1));
        let incremental_interval = scheduler.incremental_interval_seconds.max(1);
        info!(
            tick_interval_seconds = tick_interval.as_secs(),
            incremental_interval_seconds = incremental_interval,
            "Starting sync scheduler"
        );

        let mut next_incremental = Instant::now() + next_interval(incremental_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    self.drain_embeddings().await;

                    if tick_started >= next_incremental {
                        self.run_incremental().await;
                        next_incremental = Instant::now() + next_interval(incremental_interval);
                    }

                    histogram!("sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    async fn drain_embeddings(&self) {
        let batch_size = self.state.config.embedding.batch_size;
        match self.state.embedding_executor().process_batch(batch_size).await {
            Ok(result) => debug!(
                processed = result.processed,
                failed = result.failed,
                skipped = result.skipped,
                "Scheduled embedding batch finished"
            ),
            Err(err) => {
                counter!("sync_scheduler_errors_total", "job" => "embeddings").increment(1);
                error!(error = ?err, "Scheduled embedding batch failed");
            }
        }
    }

    async fn run_incremental(&self) {
        match self.state.orchestrator().run().await {
            Ok(report) => info!(
                users = report.total_users,
                succeeded = report.successful_syncs,
                failed = report.failed_syncs,
                "Scheduled incremental sync finished"
            ),
            Err(err) => {
                counter!("sync_scheduler_errors_total", "job" => "incremental").increment(1);
                error!(error = ?err, "Scheduled incremental sync failed");
            }
        }
    }
}

fn next_interval(base_interval_seconds: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter = compute_jitter_seconds(base_interval_seconds, &mut rng);
    Duration::from_secs(base_interval_seconds + jitter)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(base_interval_seconds: u64, rng: &mut R) -> u64 {
    let jitter_pct = rng.gen_range(0.0..=JITTER_PCT_MAX);
    (base_interval_seconds as f64 * jitter_pct).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn jitter_respects_bounds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let jitter = compute_jitter_seconds(3600, &mut rng);
            assert!(jitter <= 360);
        }
    }

    #[test]
    fn short_intervals_round_to_whole_seconds() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert!(compute_jitter_seconds(1, &mut rng) <= 1);
        assert_eq!(compute_jitter_seconds(0, &mut rng), 0);
    }
}
