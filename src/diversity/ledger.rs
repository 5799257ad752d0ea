//! Process-wide usage ledger for topic diversity.
//!
//! Tracks when each topic text was last used, which texts share a keyword
//! family, and how many times each category was used per hour bucket. All
//! three maps live behind one mutex; every operation is O(1) except cleanup.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::{debug, info};

use super::DiversityTunables;
use super::similarity::{FamilyKey, extract_keywords, keyword_similarity};
use crate::util::time::{Clock, elapsed_between};

const SECONDS_PER_HOUR: i64 = 3600;

/// `floor(unix_seconds / 3600)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HourBucket(i64);

impl HourBucket {
    #[must_use]
    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self(time.timestamp().div_euclid(SECONDS_PER_HOUR))
    }

    #[must_use]
    pub fn get(self) -> i64 {
        self.0
    }

    fn hours_since(self, earlier: HourBucket) -> i64 {
        self.0 - earlier.0
    }
}

/// (カテゴリ, 時間バケット) の複合キー。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryBucketKey {
    pub category: String,
    pub hour: HourBucket,
}

impl CategoryBucketKey {
    #[must_use]
    pub fn new(category: impl Into<String>, hour: HourBucket) -> Self {
        Self {
            category: category.into(),
            hour,
        }
    }
}

/// `can_use` が拒否した理由。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Cooldown { last_used: DateTime<Utc> },
    SimilarSibling { sibling: String },
    RateLimited { category: String, count: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub usage_removed: usize,
    pub family_members_removed: usize,
    pub families_removed: usize,
    pub buckets_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerStats {
    pub tracked_topics: usize,
    pub families: usize,
    pub category_buckets: usize,
    pub categories_this_hour: BTreeMap<String, u32>,
    pub cooldown_secs: u64,
    pub max_per_hour: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    usage: FxHashMap<String, DateTime<Utc>>,
    families: FxHashMap<FamilyKey, FxHashSet<String>>,
    buckets: FxHashMap<CategoryBucketKey, u32>,
}

pub struct DiversityLedger {
    state: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    max_per_hour: u32,
    similarity_threshold: f64,
    relaxation_window: Duration,
    bucket_retention: Duration,
}

impl DiversityLedger {
    #[must_use]
    pub fn new(tunables: &DiversityTunables, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            clock,
            cooldown: tunables.cooldown,
            max_per_hour: tunables.max_per_hour,
            similarity_threshold: tunables.similarity_threshold,
            relaxation_window: tunables.bulk_relaxation_window,
            bucket_retention: tunables.category_bucket_retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // 状態は単純なマップのみなので、パニック後もそのまま使える
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// トピックが現在使用可能かを判定する。
    #[must_use]
    pub fn can_use(&self, text: &str, category: &str) -> bool {
        self.rejection(text, category).is_none()
    }

    /// 使用できない場合はその理由を返す。
    #[must_use]
    pub fn rejection(&self, text: &str, category: &str) -> Option<Rejection> {
        let now = self.clock.now();
        let state = self.lock();
        self.check(&state, text, category, now)
    }

    /// 使用履歴を記録する。カテゴリバケットは上限で飽和する。
    pub fn record(&self, text: &str, category: &str) {
        let now = self.clock.now();
        let mut state = self.lock();
        self.insert(&mut state, text, category, now);
    }

    /// `can_use` と `record` を1回のロックで行う。記録できた場合は true。
    pub fn try_record(&self, text: &str, category: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        if let Some(reason) = self.check(&state, text, category, now) {
            debug!(topic = %text, category = %category, reason = ?reason, "topic claim rejected");
            return false;
        }
        self.insert(&mut state, text, category, now);
        true
    }

    /// 期限切れのエントリを削除する。
    pub fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let current_hour = HourBucket::from_time(now);
        let retention_hours = i64::try_from(self.bucket_retention.as_secs()).unwrap_or(i64::MAX)
            / SECONDS_PER_HOUR;

        let mut guard = self.lock();
        let LedgerState {
            usage,
            families,
            buckets,
        } = &mut *guard;
        let mut report = CleanupReport::default();

        let before = usage.len();
        usage.retain(|_, used| within(*used, now, self.cooldown));
        report.usage_removed = before - usage.len();

        for members in families.values_mut() {
            let before = members.len();
            members.retain(|member| {
                usage
                    .get(member)
                    .is_some_and(|used| within(*used, now, self.cooldown))
            });
            report.family_members_removed += before - members.len();
        }
        let before = families.len();
        families.retain(|_, members| !members.is_empty());
        report.families_removed = before - families.len();

        let before = buckets.len();
        buckets.retain(|key, _| current_hour.hours_since(key.hour) < retention_hours);
        report.buckets_removed = before - buckets.len();

        report
    }

    /// バルク緩和: 緩和ウィンドウより古い使用履歴を一度だけ削除する。
    ///
    /// 時間あたりのカテゴリ上限は変更しない。削除件数を返す。
    pub fn enable_bulk_relaxation(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.usage.len();
        state
            .usage
            .retain(|_, used| within(*used, now, self.relaxation_window));
        let evicted = before - state.usage.len();
        info!(
            evicted,
            remaining = state.usage.len(),
            window_secs = self.relaxation_window.as_secs(),
            "bulk relaxation evicted usage history"
        );
        evicted
    }

    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let current_hour = HourBucket::from_time(self.clock.now());
        let state = self.lock();
        let categories_this_hour = state
            .buckets
            .iter()
            .filter(|(key, _)| key.hour == current_hour)
            .map(|(key, count)| (key.category.clone(), *count))
            .collect();
        LedgerStats {
            tracked_topics: state.usage.len(),
            families: state.families.len(),
            category_buckets: state.buckets.len(),
            categories_this_hour,
            cooldown_secs: self.cooldown.as_secs(),
            max_per_hour: self.max_per_hour,
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        *state = LedgerState::default();
    }

    /// 直近に使用したトピックを新しい順に返す。
    #[must_use]
    pub fn recent_topics(&self, limit: usize) -> Vec<String> {
        let state = self.lock();
        let mut entries: Vec<(&String, &DateTime<Utc>)> = state.usage.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        entries
            .into_iter()
            .take(limit)
            .map(|(text, _)| text.clone())
            .collect()
    }

    #[must_use]
    pub fn last_used(&self, text: &str) -> Option<DateTime<Utc>> {
        self.lock().usage.get(text).copied()
    }

    fn check(
        &self,
        state: &LedgerState,
        text: &str,
        category: &str,
        now: DateTime<Utc>,
    ) -> Option<Rejection> {
        if let Some(last_used) = state.usage.get(text).copied() {
            if within(last_used, now, self.cooldown) {
                return Some(Rejection::Cooldown { last_used });
            }
        }

        let keywords = extract_keywords(text);
        let family = FamilyKey::from_keywords(&keywords);
        if let Some(siblings) = state.families.get(&family) {
            for sibling in siblings.iter().filter(|sibling| sibling.as_str() != text) {
                let recently_used = state
                    .usage
                    .get(sibling)
                    .is_some_and(|used| within(*used, now, self.cooldown));
                if recently_used
                    && keyword_similarity(&keywords, &extract_keywords(sibling))
                        >= self.similarity_threshold
                {
                    return Some(Rejection::SimilarSibling {
                        sibling: sibling.clone(),
                    });
                }
            }
        }

        let key = CategoryBucketKey::new(category, HourBucket::from_time(now));
        let count = state.buckets.get(&key).copied().unwrap_or(0);
        if count >= self.max_per_hour {
            return Some(Rejection::RateLimited {
                category: category.to_string(),
                count,
            });
        }

        None
    }

    fn insert(&self, state: &mut LedgerState, text: &str, category: &str, now: DateTime<Utc>) {
        state.usage.insert(text.to_string(), now);
        state
            .families
            .entry(FamilyKey::from_keywords(&extract_keywords(text)))
            .or_default()
            .insert(text.to_string());

        let count = state
            .buckets
            .entry(CategoryBucketKey::new(category, HourBucket::from_time(now)))
            .or_insert(0);
        if *count < self.max_per_hour {
            *count += 1;
        } else {
            debug!(category = %category, count = *count, "category bucket already saturated");
        }
    }
}

fn within(used: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    elapsed_between(used, now) < window
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::ManualClock;

    // 時間バケットの境界に揃えた基準時刻
    const T0: i64 = 1_699_999_200;

    fn ledger() -> (Arc<ManualClock>, DiversityLedger) {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let ledger = DiversityLedger::new(&DiversityTunables::default(), clock.clone());
        (clock, ledger)
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[test]
    fn cooldown_blocks_until_two_hours_pass() {
        let (clock, ledger) = ledger();
        ledger.record("game season update", "games");

        clock.advance(minutes(60));
        assert!(!ledger.can_use("game season update", "games"));

        clock.advance(minutes(59));
        assert!(!ledger.can_use("game season update", "games"));

        clock.advance(minutes(1));
        assert!(ledger.can_use("game season update", "games"));
    }

    #[test]
    fn scenario_cooldown_and_hourly_rate_limit() {
        let (clock, ledger) = ledger();
        ledger.record("game season update", "games");

        clock.advance(minutes(60));
        assert!(!ledger.can_use("game season update", "games"));
        clock.advance(minutes(61));
        assert!(ledger.can_use("game season update", "games"));

        // 新しい時間バケットで3件記録すると4件目はレート制限で拒否される
        clock.set(DateTime::from_timestamp(T0 + 5 * 3600, 0).unwrap());
        ledger.record("retro console collection", "games");
        ledger.record("speedrun world record", "games");
        ledger.record("board game night", "games");
        assert_eq!(
            ledger.rejection("puzzle app for commuting", "games"),
            Some(Rejection::RateLimited {
                category: "games".into(),
                count: 3
            })
        );
        assert!(ledger.can_use("puzzle app for commuting", "music"));

        clock.advance(minutes(60));
        assert!(ledger.can_use("puzzle app for commuting", "games"));
    }

    #[test]
    fn similar_family_sibling_is_rejected_within_cooldown() {
        let (clock, ledger) = ledger();
        ledger.record("game season update", "games");

        // {game, season, update, news} vs {game, season, update}: 6/7
        assert!(matches!(
            ledger.rejection("game season update news", "anime"),
            Some(Rejection::SimilarSibling { sibling }) if sibling == "game season update"
        ));
        // 同じファミリーでも類似度 0.5 なら許可
        assert!(ledger.can_use("game season tickets sold out", "anime"));

        clock.advance(COOLDOWN_PLUS_MINUTE);
        assert!(ledger.can_use("game season update news", "anime"));
    }

    const COOLDOWN_PLUS_MINUTE: Duration = Duration::from_secs(2 * 3600 + 60);

    #[test]
    fn bucket_count_never_exceeds_limit() {
        let (_clock, ledger) = ledger();
        for i in 0..6 {
            ledger.record(&format!("distinct topic number {i}"), "games");
        }
        let stats = ledger.stats();
        assert_eq!(stats.categories_this_hour.get("games"), Some(&3));
    }

    #[test]
    fn try_record_claims_only_once() {
        let (_clock, ledger) = ledger();
        assert!(ledger.try_record("summer festival plans", "seasonal"));
        assert!(!ledger.try_record("summer festival plans", "seasonal"));
        assert_eq!(ledger.stats().tracked_topics, 1);
    }

    #[test]
    fn cleanup_removes_expired_usage_families_and_old_buckets() {
        let (clock, ledger) = ledger();
        ledger.record("old school trip story", "school");
        clock.advance(Duration::from_secs(3 * 3600));
        ledger.record("fresh exam study tips", "school");

        let report = ledger.cleanup();
        assert_eq!(report.usage_removed, 1);
        assert_eq!(report.family_members_removed, 1);
        assert_eq!(report.families_removed, 1);
        assert_eq!(report.buckets_removed, 0);
        assert!(ledger.last_used("old school trip story").is_none());
        assert!(ledger.last_used("fresh exam study tips").is_some());

        // 24時間後のスイープで古いバケットだけが消える
        clock.advance(Duration::from_secs(21 * 3600));
        ledger.record("newest topic here", "music");
        let report = ledger.cleanup();
        assert_eq!(report.buckets_removed, 1);
        let stats = ledger.stats();
        assert_eq!(stats.category_buckets, 2);
    }

    #[test]
    fn bulk_relaxation_evicts_entries_older_than_window() {
        let (clock, ledger) = ledger();
        ledger.record("early morning topic", "school");
        clock.advance(minutes(45));
        ledger.record("recent lunch topic", "food");

        let evicted = ledger.enable_bulk_relaxation();
        assert_eq!(evicted, 1);
        assert!(ledger.can_use("early morning topic", "school"));
        assert!(!ledger.can_use("recent lunch topic", "food"));
    }

    #[test]
    fn recent_topics_are_newest_first() {
        let (clock, ledger) = ledger();
        ledger.record("first topic words", "a");
        clock.advance(minutes(1));
        ledger.record("second topic words", "b");
        assert_eq!(
            ledger.recent_topics(5),
            vec!["second topic words".to_string(), "first topic words".to_string()]
        );
        assert_eq!(ledger.recent_topics(1).len(), 1);
    }

    #[test]
    fn clear_resets_everything() {
        let (_clock, ledger) = ledger();
        ledger.record("anything at all", "misc");
        ledger.clear();
        let stats = ledger.stats();
        assert_eq!(stats.tracked_topics, 0);
        assert_eq!(stats.families, 0);
        assert_eq!(stats.category_buckets, 0);
    }

    #[test]
    fn hour_bucket_floors_negative_timestamps() {
        let before_epoch = DateTime::from_timestamp(-1, 0).unwrap();
        assert_eq!(HourBucket::from_time(before_epoch).get(), -1);
    }

    #[test]
    fn concurrent_claims_never_double_book() {
        let (_clock, ledger) = ledger();
        let ledger = Arc::new(ledger);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.try_record("contested topic text", "misc"))
            })
            .collect();
        let claimed = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|claimed| *claimed)
            .count();
        assert_eq!(claimed, 1);
    }
}
