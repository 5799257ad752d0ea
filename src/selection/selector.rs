//! Tiered topic selection.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clients::TrendRequest;
use crate::diversity::{BulkModeController, DiversityLedger};
use crate::observability::Metrics;
use crate::selection::fallback::FallbackCatalog;
use crate::selection::filters::passes_content_filters;
use crate::selection::trend_cache::{TrendCache, TrendCacheKey};
use crate::topic::{Audience, ContentContext, Topic, TrendBatch};
use crate::util::time::Clock;

/// 上位の階層で選択を確定するのに必要な最小候補数。
pub const MIN_POOL: usize = 3;

/// 上流へ渡す回避リストの件数。
const AVOID_HINT_LIMIT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SelectionRequest {
    pub audience: Audience,
    #[serde(default)]
    pub context: ContentContext,
    #[serde(default)]
    pub bulk_size_hint: Option<usize>,
}

impl SelectionRequest {
    #[must_use]
    pub fn new(audience: Audience, context: ContentContext) -> Self {
        Self {
            audience,
            context,
            bulk_size_hint: None,
        }
    }

    #[must_use]
    pub fn with_bulk_size_hint(mut self, hint: usize) -> Self {
        self.bulk_size_hint = Some(hint);
        self
    }
}

/// どの階層で選ばれたか。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTier {
    Fresh,
    BulkRelaxed,
    ForcedRefresh,
    StaticFallback,
    StaticUnfiltered,
}

impl SelectionTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionTier::Fresh => "fresh",
            SelectionTier::BulkRelaxed => "bulk_relaxed",
            SelectionTier::ForcedRefresh => "forced_refresh",
            SelectionTier::StaticFallback => "static_fallback",
            SelectionTier::StaticUnfiltered => "static_unfiltered",
        }
    }

    fn is_degraded(self) -> bool {
        matches!(
            self,
            SelectionTier::ForcedRefresh
                | SelectionTier::StaticFallback
                | SelectionTier::StaticUnfiltered
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub topic: Topic,
    pub tier: SelectionTier,
    /// 選択時点の候補数。
    pub pool_size: usize,
    pub bulk_mode: bool,
}

/// 候補から一様に1つのインデックスを選ぶ。空なら `None`。
pub fn pick_uniform<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Option<usize> {
    (len > 0).then(|| rng.random_range(0..len))
}

struct Pool {
    topics: Vec<Topic>,
    tier: SelectionTier,
}

impl Pool {
    fn len(&self) -> usize {
        self.topics.len()
    }
}

/// 最小候補数に届かなかった候補集合のうち最大のものを保持する。
fn keep_largest(best: &mut Option<Pool>, candidate: Pool) {
    if candidate.topics.is_empty() {
        return;
    }
    if best.as_ref().is_none_or(|current| candidate.len() > current.len()) {
        *best = Some(candidate);
    }
}

pub struct TopicSelector {
    ledger: Arc<DiversityLedger>,
    bulk: Arc<BulkModeController>,
    cache: Arc<TrendCache>,
    catalog: FallbackCatalog,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    rng: Mutex<StdRng>,
}

impl TopicSelector {
    #[must_use]
    pub fn new(
        ledger: Arc<DiversityLedger>,
        bulk: Arc<BulkModeController>,
        cache: Arc<TrendCache>,
        catalog: FallbackCatalog,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            ledger,
            bulk,
            cache,
            catalog,
            clock,
            metrics,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// 乱数列を固定する。再現性が必要な場合に使う。
    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &FallbackCatalog {
        &self.catalog
    }

    /// トピックを1件選び、使用履歴に記録して返す。常に成功する。
    pub async fn select_topic(&self, request: &SelectionRequest) -> Selection {
        let started = Instant::now();
        let bulk_mode = self.bulk.observe(request.bulk_size_hint);

        let selection = self.run_tiers(request, bulk_mode).await;

        self.metrics
            .selections_total
            .with_label_values(&[selection.tier.as_str()])
            .inc();
        self.metrics
            .selection_duration
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .bulk_mode_active
            .set(if self.bulk.is_active() { 1.0 } else { 0.0 });
        #[allow(clippy::cast_precision_loss)]
        let tracked = self.ledger.stats().tracked_topics as f64;
        self.metrics.tracked_topics.set(tracked);

        if selection.tier.is_degraded() {
            warn!(
                tier = selection.tier.as_str(),
                audience = %request.audience,
                context = request.context.as_str(),
                pool_size = selection.pool_size,
                topic = %selection.topic.text(),
                "topic selected from a degraded tier"
            );
        } else {
            debug!(
                tier = selection.tier.as_str(),
                pool_size = selection.pool_size,
                topic = %selection.topic.text(),
                "topic selected"
            );
        }
        selection
    }

    async fn run_tiers(&self, request: &SelectionRequest, bulk_mode: bool) -> Selection {
        let trend_request = TrendRequest::new(
            request.context,
            self.clock.now(),
            self.ledger.recent_topics(AVOID_HINT_LIMIT),
        );
        let mut best: Option<Pool> = None;

        // Tier A
        let key = if bulk_mode {
            TrendCacheKey::Bulk(self.bulk.trend_attempts())
        } else {
            TrendCacheKey::Standard
        };
        let cached = match self.cache.get_or_refresh(key, &trend_request).await {
            Ok(cached) => Some(cached),
            Err(error) => {
                warn!(error = %error, "trend batch unavailable, escalating");
                None
            }
        };

        if let Some(cached) = cached {
            let pool = self.eligible(&cached.entry.batch, request, SelectionTier::Fresh);
            if let Some(selection) = self.settle(pool, bulk_mode, &mut best) {
                self.bulk.reset_trend_attempts();
                return selection;
            }

            // Tier B
            if bulk_mode {
                let evicted = self.ledger.enable_bulk_relaxation();
                self.metrics.bulk_relaxations.inc();
                #[allow(clippy::cast_precision_loss)]
                let evicted = evicted as f64;
                self.metrics.ledger_evictions.inc_by(evicted);
                let pool = self.eligible(&cached.entry.batch, request, SelectionTier::BulkRelaxed);
                if let Some(selection) = self.settle(pool, bulk_mode, &mut best) {
                    self.bulk.reset_trend_attempts();
                    return selection;
                }
            }
        }

        // Tier C
        while let Some(attempt) = self.bulk.begin_trend_attempt() {
            let key = if bulk_mode {
                TrendCacheKey::Bulk(attempt)
            } else {
                TrendCacheKey::Standard
            };
            let forced = trend_request.clone().with_attempt(attempt);
            info!(attempt, ?key, "forcing trend refresh");
            match self.cache.refresh(key, &forced).await {
                Ok(entry) => {
                    let pool = self.eligible(&entry.batch, request, SelectionTier::ForcedRefresh);
                    if let Some(selection) = self.settle(pool, bulk_mode, &mut best) {
                        return selection;
                    }
                }
                Err(error) => {
                    warn!(attempt, error = %error, "forced trend refresh failed");
                    break;
                }
            }
        }

        if let Some(pool) = best.take() {
            if let Some(selection) = self.claim(pool, bulk_mode) {
                return selection;
            }
        }

        // Tier D
        self.static_fallback(request.audience, bulk_mode)
    }

    /// 最小候補数を満たせば選択を確定し、満たさなければ最大候補として保持する。
    fn settle(&self, pool: Pool, bulk_mode: bool, best: &mut Option<Pool>) -> Option<Selection> {
        if pool.len() >= MIN_POOL {
            self.claim(pool, bulk_mode)
        } else {
            keep_largest(best, pool);
            None
        }
    }

    fn eligible(
        &self,
        batch: &TrendBatch,
        request: &SelectionRequest,
        tier: SelectionTier,
    ) -> Pool {
        let topics = batch
            .iter()
            .filter(|topic| passes_content_filters(topic, request.audience, request.context))
            .filter(|topic| self.ledger.can_use(topic.text(), topic.category()))
            .cloned()
            .collect();
        Pool { topics, tier }
    }

    /// 一様に選び、台帳への記録で確定する。他の呼び出しに先を越された候補は捨てて選び直す。
    fn claim(&self, mut pool: Pool, bulk_mode: bool) -> Option<Selection> {
        let pool_size = pool.len();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(index) = pick_uniform(pool.topics.len(), &mut *rng) {
            let topic = pool.topics.swap_remove(index);
            if self.ledger.try_record(topic.text(), topic.category()) {
                return Some(Selection {
                    topic,
                    tier: pool.tier,
                    pool_size,
                    bulk_mode,
                });
            }
            self.metrics.claim_conflicts.inc();
        }
        None
    }

    fn static_fallback(&self, audience: Audience, bulk_mode: bool) -> Selection {
        let filtered = Pool {
            topics: self
                .catalog
                .topics(audience)
                .filter(|topic| self.ledger.can_use(topic.text(), topic.category()))
                .cloned()
                .collect(),
            tier: SelectionTier::StaticFallback,
        };
        if let Some(selection) = self.claim(filtered, bulk_mode) {
            return selection;
        }

        let topic = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            self.catalog.pick_any(audience, &mut *rng).clone()
        };
        self.ledger.record(topic.text(), topic.category());
        Selection {
            topic,
            tier: SelectionTier::StaticUnfiltered,
            pool_size: self.catalog.len(audience),
            bulk_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::trend_source::ScriptedTrendSource;
    use crate::diversity::DiversityTunables;
    use crate::topic::{Tone, test_topic};
    use crate::util::time::ManualClock;
    use std::time::Duration;

    const T0: i64 = 1_699_999_200;

    struct Harness {
        clock: Arc<ManualClock>,
        ledger: Arc<DiversityLedger>,
        bulk: Arc<BulkModeController>,
        source: Arc<ScriptedTrendSource>,
        selector: TopicSelector,
    }

    fn harness(source: ScriptedTrendSource) -> Harness {
        let tunables = DiversityTunables::default();
        let clock = Arc::new(ManualClock::at_unix(T0));
        let metrics = Arc::new(Metrics::unregistered().expect("metrics"));
        let ledger = Arc::new(DiversityLedger::new(&tunables, clock.clone()));
        let bulk = Arc::new(BulkModeController::new(&tunables, clock.clone()));
        let source = Arc::new(source);
        let cache = Arc::new(TrendCache::new(
            source.clone(),
            clock.clone(),
            Arc::clone(&metrics),
            tunables.cache_ttl,
            Duration::from_secs(30),
        ));
        let selector = TopicSelector::new(
            Arc::clone(&ledger),
            Arc::clone(&bulk),
            cache,
            FallbackCatalog::builtin().expect("catalog"),
            clock.clone(),
            metrics,
        )
        .with_seed(42);
        Harness {
            clock,
            ledger,
            bulk,
            source,
            selector,
        }
    }

    /// 先頭の単語をカテゴリにしたトピックのバッチ。
    fn batch(topics: &[(&str, Audience)]) -> TrendBatch {
        let topics = topics
            .iter()
            .map(|(text, audience)| {
                let category = text.split_whitespace().next().unwrap_or("misc").to_lowercase();
                test_topic(&category, text, *audience, Tone::Casual)
            })
            .collect();
        TrendBatch {
            current_trends: topics,
            ..TrendBatch::default()
        }
    }

    fn middle_batch() -> TrendBatch {
        batch(&[
            ("Chess club tournament results", Audience::Middle),
            ("Robot building contest entries", Audience::Middle),
            ("Garden harvest festival plans", Audience::Middle),
            ("Drama rehearsal bloopers", Audience::Middle),
            ("Astronomy night telescope tips", Audience::Middle),
        ])
    }

    fn request(audience: Audience) -> SelectionRequest {
        SelectionRequest::new(audience, ContentContext::Free)
    }

    #[tokio::test]
    async fn fresh_tier_selects_and_records() {
        let h = harness(ScriptedTrendSource::always(middle_batch()));

        let selection = h.selector.select_topic(&request(Audience::High)).await;

        assert_eq!(selection.tier, SelectionTier::Fresh);
        assert_eq!(selection.pool_size, 5);
        assert!(!selection.bulk_mode);
        assert!(h.ledger.last_used(selection.topic.text()).is_some());
        assert!(!h.ledger.can_use(selection.topic.text(), selection.topic.category()));
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn repeated_selections_never_repeat_within_cooldown() {
        let h = harness(ScriptedTrendSource::always(middle_batch()));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            let selection = h.selector.select_topic(&request(Audience::Middle)).await;
            assert!(seen.insert(selection.topic.text().to_string()));
        }
    }

    #[tokio::test]
    async fn audience_mismatch_escalates_to_static_fallback() {
        let only_high = batch(&[
            ("Chess club tournament results", Audience::High),
            ("Robot building contest entries", Audience::High),
            ("Garden harvest festival plans", Audience::High),
        ]);
        let h = harness(ScriptedTrendSource::always(only_high));

        let selection = h.selector.select_topic(&request(Audience::Elementary)).await;

        assert_eq!(selection.tier, SelectionTier::StaticFallback);
        assert_eq!(selection.topic.audience(), Audience::Elementary);
        // 1 regular fetch plus the full forced-refresh budget
        assert_eq!(h.source.calls(), 4);
        assert_eq!(h.bulk.trend_attempts(), 3);
    }

    #[tokio::test]
    async fn upstream_failure_goes_straight_to_static_fallback() {
        let h = harness(ScriptedTrendSource::failing());

        let selection = h.selector.select_topic(&request(Audience::High)).await;

        assert_eq!(selection.tier, SelectionTier::StaticFallback);
        // Tier C stops at the first failed refresh
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn forced_refresh_supplies_a_new_pool() {
        let thin = batch(&[
            ("Chess club tournament results", Audience::Middle),
            ("Robot building contest entries", Audience::Middle),
            ("Skateboard park opening", Audience::High),
        ]);
        let h = harness(ScriptedTrendSource::new(
            vec![Some(thin), Some(middle_batch())],
            None,
        ));

        let selection = h.selector.select_topic(&request(Audience::Elementary)).await;

        assert_eq!(selection.tier, SelectionTier::ForcedRefresh);
        assert_eq!(selection.pool_size, 5);
        let requests = h.source.requests();
        assert_eq!(requests[0].attempt, 0);
        assert_eq!(requests[1].attempt, 1);
    }

    #[tokio::test]
    async fn small_pool_beats_static_fallback() {
        let thin = batch(&[
            ("Chess club tournament results", Audience::Middle),
            ("Robot building contest entries", Audience::Middle),
        ]);
        let h = harness(ScriptedTrendSource::always(thin));

        let selection = h.selector.select_topic(&request(Audience::Middle)).await;

        assert_eq!(selection.tier, SelectionTier::Fresh);
        assert_eq!(selection.pool_size, 2);
    }

    #[tokio::test]
    async fn success_from_fresh_tier_resets_attempts() {
        let h = harness(ScriptedTrendSource::always(middle_batch()));
        assert_eq!(h.bulk.begin_trend_attempt(), Some(1));

        h.selector.select_topic(&request(Audience::Middle)).await;

        assert_eq!(h.bulk.trend_attempts(), 0);
    }

    #[tokio::test]
    async fn bulk_relaxation_reopens_recent_topics() {
        let h = harness(ScriptedTrendSource::always(middle_batch()));
        for topic in middle_batch().iter().skip(1) {
            h.ledger.record(topic.text(), topic.category());
        }
        h.clock.advance(Duration::from_secs(45 * 60));

        let selection = h
            .selector
            .select_topic(&request(Audience::Middle).with_bulk_size_hint(80))
            .await;

        assert!(selection.bulk_mode);
        assert_eq!(selection.tier, SelectionTier::BulkRelaxed);
        assert_eq!(selection.pool_size, 5);
    }

    #[tokio::test]
    async fn bulk_mode_reuses_standard_batch_when_bulk_refresh_fails() {
        let h = harness(ScriptedTrendSource::new(vec![Some(middle_batch())], None));
        let first = h.selector.select_topic(&request(Audience::Middle)).await;
        assert_eq!(first.tier, SelectionTier::Fresh);
        h.clock.advance(Duration::from_secs(60));

        let second = h
            .selector
            .select_topic(&request(Audience::Middle).with_bulk_size_hint(80))
            .await;

        assert!(second.bulk_mode);
        assert_eq!(second.tier, SelectionTier::Fresh);
        assert_eq!(second.pool_size, 4);
        assert_ne!(second.topic.text(), first.topic.text());
        // one standard fetch plus the failed Bulk(0) fetch
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn bulk_forced_refreshes_use_per_attempt_keys() {
        let high_only = || {
            batch(&[
                ("Skateboard park opening", Audience::High),
                ("College fair booths", Audience::High),
            ])
        };
        let h = harness(ScriptedTrendSource::new(
            vec![
                Some(high_only()),
                Some(high_only()),
                Some(high_only()),
                Some(middle_batch()),
            ],
            None,
        ));
        let bulk_request = request(Audience::Middle).with_bulk_size_hint(80);

        let first = h.selector.select_topic(&bulk_request).await;

        assert_eq!(first.tier, SelectionTier::ForcedRefresh);
        assert_eq!(first.pool_size, 5);
        let attempts: Vec<u32> = h.source.requests().iter().map(|r| r.attempt).collect();
        assert_eq!(attempts, vec![0, 1, 2, 3]);
        assert_eq!(h.bulk.trend_attempts(), 3);

        let second = h.selector.select_topic(&bulk_request).await;

        // served from Bulk(3) without another upstream call
        assert_eq!(second.tier, SelectionTier::Fresh);
        assert_eq!(second.pool_size, 4);
        assert_eq!(h.source.calls(), 4);
        assert_eq!(h.bulk.trend_attempts(), 0);
    }

    #[tokio::test]
    async fn exhausted_catalog_falls_back_unfiltered() {
        let h = harness(ScriptedTrendSource::failing());
        for topic in h.selector.catalog().topics(Audience::Elementary) {
            h.ledger.record(topic.text(), topic.category());
        }

        let selection = h.selector.select_topic(&request(Audience::Elementary)).await;

        assert_eq!(selection.tier, SelectionTier::StaticUnfiltered);
        assert_eq!(selection.topic.audience(), Audience::Elementary);
    }

    #[tokio::test]
    async fn always_returns_a_topic() {
        let h = harness(ScriptedTrendSource::failing());
        for i in 0..40 {
            let audience = Audience::ALL[i % 3];
            let selection = h.selector.select_topic(&request(audience)).await;
            assert_eq!(selection.topic.audience(), audience);
            h.clock.advance(Duration::from_secs(60));
        }
    }

    #[test]
    fn pick_uniform_is_uniform() {
        const BINS: usize = 10;
        const DRAWS: usize = 10_000;
        let mut rng = StdRng::seed_from_u64(2024);
        let mut counts = [0_usize; BINS];
        for _ in 0..DRAWS {
            counts[pick_uniform(BINS, &mut rng).expect("non-empty")] += 1;
        }

        #[allow(clippy::cast_precision_loss)]
        let expected = (DRAWS / BINS) as f64;
        #[allow(clippy::cast_precision_loss)]
        let chi_squared: f64 = counts
            .iter()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();
        // df = 9, p = 0.001
        assert!(chi_squared < 27.88, "chi-squared {chi_squared}");
    }

    #[tokio::test]
    async fn select_topic_picks_uniformly_from_fixed_pool() {
        const DRAWS: usize = 10_000;
        let texts = [
            "Chess club tournament results",
            "Robot building contest entries",
            "Garden harvest festival plans",
            "Drama rehearsal bloopers",
            "Astronomy night telescope tips",
            "Baking sale fundraiser recipes",
            "Volleyball league standings",
            "Library reading challenge picks",
            "Origami crane folding tricks",
            "Choir spring concert songs",
        ];
        let topics: Vec<_> = texts.iter().map(|text| (*text, Audience::Middle)).collect();
        let h = harness(ScriptedTrendSource::always(batch(&topics)));
        let mut counts = std::collections::HashMap::new();

        for _ in 0..DRAWS {
            let selection = h.selector.select_topic(&request(Audience::Middle)).await;
            assert_eq!(selection.tier, SelectionTier::Fresh);
            assert_eq!(selection.pool_size, texts.len());
            *counts.entry(selection.topic.text().to_string()).or_insert(0_usize) += 1;
            h.ledger.clear();
        }

        assert_eq!(counts.len(), texts.len());
        #[allow(clippy::cast_precision_loss)]
        let expected = (DRAWS / texts.len()) as f64;
        #[allow(clippy::cast_precision_loss)]
        let chi_squared: f64 = counts
            .values()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();
        // df = 9, p = 0.001
        assert!(chi_squared < 27.88, "chi-squared {chi_squared}");
        assert_eq!(h.source.calls(), 1);
    }

    #[test]
    fn pick_uniform_handles_empty_pool() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_uniform(0, &mut rng), None);
    }
}
