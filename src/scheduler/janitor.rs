use std::sync::Arc;
use std::time::Duration;

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::info;

use crate::diversity::DiversityLedger;
use crate::observability::Metrics;
use crate::selection::TrendCache;

/// 台帳とトレンドキャッシュを定期的に掃除するタスクを起動する。
///
/// 最初の掃除は `interval` 経過後に行う。
pub fn spawn_janitor(
    ledger: Arc<DiversityLedger>,
    cache: Arc<TrendCache>,
    metrics: Arc<Metrics>,
    interval: Duration,
    cache_max_age: Duration,
) -> JoinHandle<()> {
    Janitor {
        ledger,
        cache,
        metrics,
        interval,
        cache_max_age,
    }
    .spawn()
}

struct Janitor {
    ledger: Arc<DiversityLedger>,
    cache: Arc<TrendCache>,
    metrics: Arc<Metrics>,
    interval: Duration,
    cache_max_age: Duration,
}

impl Janitor {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        info!(interval_secs = self.interval.as_secs(), "diversity janitor started");

        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        let report = self.ledger.cleanup();
        let evicted_batches = self.cache.evict_expired(self.cache_max_age).await;

        self.metrics.janitor_sweeps.inc();
        #[allow(clippy::cast_precision_loss)]
        let (removed, tracked) = (
            report.usage_removed as f64,
            self.ledger.stats().tracked_topics as f64,
        );
        self.metrics.ledger_evictions.inc_by(removed);
        self.metrics.tracked_topics.set(tracked);

        info!(
            usage_removed = report.usage_removed,
            family_members_removed = report.family_members_removed,
            families_removed = report.families_removed,
            buckets_removed = report.buckets_removed,
            evicted_batches,
            "diversity janitor sweep completed"
        );
    }
}
