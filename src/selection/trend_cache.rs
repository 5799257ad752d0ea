//! Short-lived cache of upstream trend batches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::clients::{TrendRequest, TrendSource, UpstreamUnavailable};
use crate::observability::Metrics;
use crate::topic::TrendBatch;
use crate::util::time::{Clock, elapsed_between};

/// キャッシュのキー。通常モードは `Standard`、バルクモード中は試行回数ごとに分ける。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrendCacheKey {
    Standard,
    Bulk(u32),
}

impl TrendCacheKey {
    #[must_use]
    pub fn is_bulk(self) -> bool {
        matches!(self, TrendCacheKey::Bulk(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendCacheEntry {
    pub batch: TrendBatch,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CachedBatch {
    pub entry: Arc<TrendCacheEntry>,
    /// `false` なら TTL 切れのエントリを最後の手段として返している。
    pub fresh: bool,
}

/// TTL 切れのエントリを読むかどうか。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleRead {
    Deny,
    Allow,
}

pub struct TrendCache {
    source: Arc<dyn TrendSource>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    ttl: Duration,
    fetch_timeout: Duration,
    entries: RwLock<FxHashMap<TrendCacheKey, Arc<TrendCacheEntry>>>,
    refresh_mutex: Mutex<()>, // Serialize upstream refreshes
}

impl TrendCache {
    #[must_use]
    pub fn new(
        source: Arc<dyn TrendSource>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        ttl: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            metrics,
            ttl,
            fetch_timeout,
            entries: RwLock::new(FxHashMap::default()),
            refresh_mutex: Mutex::new(()),
        }
    }

    fn is_fresh(&self, entry: &TrendCacheEntry, now: DateTime<Utc>) -> bool {
        elapsed_between(entry.fetched_at, now) < self.ttl
    }

    pub async fn get(&self, key: TrendCacheKey, stale: StaleRead) -> Option<CachedBatch> {
        let now = self.clock.now();
        let guard = self.entries.read().await;
        let entry = guard.get(&key)?;
        let fresh = self.is_fresh(entry, now);
        if fresh || stale == StaleRead::Allow {
            Some(CachedBatch {
                entry: Arc::clone(entry),
                fresh,
            })
        } else {
            None
        }
    }

    /// 上流から取得してキャッシュを置き換える。
    ///
    /// # Errors
    /// タイムアウトを含む上流の失敗は [`UpstreamUnavailable`] として返す。失敗時に既存エントリは変更しない。
    pub async fn refresh(
        &self,
        key: TrendCacheKey,
        request: &TrendRequest,
    ) -> Result<Arc<TrendCacheEntry>, UpstreamUnavailable> {
        self.metrics.upstream_refreshes.inc();
        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.fetch_timeout, self.source.fetch_trend_batch(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(UpstreamUnavailable::Timeout(self.fetch_timeout)),
            };
        self.metrics
            .upstream_fetch_duration
            .observe(started.elapsed().as_secs_f64());

        let batch = match outcome {
            Ok(batch) => batch,
            Err(error) => {
                self.metrics
                    .upstream_failures
                    .with_label_values(&[error.kind()])
                    .inc();
                warn!(?key, attempt = request.attempt, error = %error, "trend refresh failed");
                return Err(error);
            }
        };

        let entry = Arc::new(TrendCacheEntry {
            batch,
            fetched_at: self.clock.now(),
        });
        debug!(?key, topics = entry.batch.len(), "trend cache refreshed");
        self.entries.write().await.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// 新鮮なエントリを返し、なければ更新する。更新に失敗したら古いエントリで代替する。
    ///
    /// バルク用キーで代替できるエントリがなければ `Standard` のエントリを返す。
    ///
    /// # Errors
    /// 更新に失敗し、かつ代替できるエントリもない場合に [`UpstreamUnavailable`] を返す。
    pub async fn get_or_refresh(
        &self,
        key: TrendCacheKey,
        request: &TrendRequest,
    ) -> Result<CachedBatch, UpstreamUnavailable> {
        // Fast path
        if let Some(hit) = self.get(key, StaleRead::Deny).await {
            self.metrics.trend_cache_hits.inc();
            return Ok(hit);
        }

        let _refresh_guard = self.refresh_mutex.lock().await;

        // Another task may have refreshed while we waited
        if let Some(hit) = self.get(key, StaleRead::Deny).await {
            self.metrics.trend_cache_hits.inc();
            return Ok(hit);
        }
        self.metrics.trend_cache_misses.inc();

        match self.refresh(key, request).await {
            Ok(entry) => Ok(CachedBatch { entry, fresh: true }),
            Err(error) => {
                if let Some(stale) = self.get(key, StaleRead::Allow).await {
                    self.metrics.trend_cache_stale_served.inc();
                    warn!(
                        ?key,
                        fetched_at = %stale.entry.fetched_at,
                        error = %error,
                        "serving stale trend batch after refresh failure"
                    );
                    return Ok(stale);
                }
                if key.is_bulk() {
                    if let Some(standard) =
                        self.get(TrendCacheKey::Standard, StaleRead::Allow).await
                    {
                        self.metrics.trend_cache_stale_served.inc();
                        warn!(
                            ?key,
                            fresh = standard.fresh,
                            error = %error,
                            "serving standard trend batch after bulk refresh failure"
                        );
                        return Ok(standard);
                    }
                }
                Err(error)
            }
        }
    }

    /// `max_age` 以上経過したバルク用エントリを削除する。`Standard` は常に残す。
    pub async fn evict_expired(&self, max_age: Duration) -> usize {
        let now = self.clock.now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|key, entry| {
            !key.is_bulk() || elapsed_between(entry.fetched_at, now) < max_age
        });
        before - guard.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
