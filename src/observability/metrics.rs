/// Prometheusメトリクス定義。
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, Registry, register_counter_vec_with_registry,
    register_counter_with_registry, register_gauge_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub selections_total: CounterVec,
    pub upstream_refreshes: Counter,
    pub upstream_failures: CounterVec,
    pub trend_cache_hits: Counter,
    pub trend_cache_misses: Counter,
    pub trend_cache_stale_served: Counter,
    pub claim_conflicts: Counter,
    pub bulk_relaxations: Counter,
    pub janitor_sweeps: Counter,
    pub ledger_evictions: Counter,

    // ヒストグラム
    pub selection_duration: Histogram,
    pub upstream_fetch_duration: Histogram,

    // ゲージ
    pub tracked_topics: Gauge,
    pub bulk_mode_active: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同名のメトリクスが既にレジストリに登録されている場合はエラーを返す。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            selections_total: register_counter_vec_with_registry!(
                "topic_selections_total",
                "Number of topic selections by escalation tier",
                &["tier"],
                registry
            )?,
            upstream_refreshes: register_counter_with_registry!(
                "topic_trend_refreshes_total",
                "Number of trend batch refreshes attempted against the upstream generator",
                registry
            )?,
            upstream_failures: register_counter_vec_with_registry!(
                "topic_trend_refresh_failures_total",
                "Number of failed trend batch refreshes by reason",
                &["reason"],
                registry
            )?,
            trend_cache_hits: register_counter_with_registry!(
                "topic_trend_cache_hits_total",
                "Number of fresh trend cache hits",
                registry
            )?,
            trend_cache_misses: register_counter_with_registry!(
                "topic_trend_cache_misses_total",
                "Number of trend cache misses or expirations",
                registry
            )?,
            trend_cache_stale_served: register_counter_with_registry!(
                "topic_trend_cache_stale_served_total",
                "Number of times a stale trend batch was served after a refresh failure",
                registry
            )?,
            claim_conflicts: register_counter_with_registry!(
                "topic_claim_conflicts_total",
                "Number of picked candidates lost to a concurrent selection",
                registry
            )?,
            bulk_relaxations: register_counter_with_registry!(
                "topic_bulk_relaxations_total",
                "Number of bulk relaxation passes over the usage ledger",
                registry
            )?,
            janitor_sweeps: register_counter_with_registry!(
                "topic_janitor_sweeps_total",
                "Number of periodic ledger cleanup sweeps",
                registry
            )?,
            ledger_evictions: register_counter_with_registry!(
                "topic_ledger_evictions_total",
                "Number of usage entries evicted by cleanup or bulk relaxation",
                registry
            )?,
            selection_duration: register_histogram_with_registry!(
                "topic_selection_duration_seconds",
                "Duration of a topic selection including upstream refreshes",
                registry
            )?,
            upstream_fetch_duration: register_histogram_with_registry!(
                "topic_trend_fetch_duration_seconds",
                "Duration of trend batch fetches from the upstream generator",
                registry
            )?,
            tracked_topics: register_gauge_with_registry!(
                "topic_ledger_tracked_topics",
                "Number of topics currently tracked by the usage ledger",
                registry
            )?,
            bulk_mode_active: register_gauge_with_registry!(
                "topic_bulk_mode_active",
                "Whether bulk mode is currently active (1) or not (0)",
                registry
            )?,
        })
    }

    /// テスト用に独立したレジストリでメトリクスを作る。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn unregistered() -> Result<Self, prometheus::Error> {
        Self::new(Arc::new(Registry::new()))
    }
}
