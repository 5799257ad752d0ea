//! Topic diversity controls: similarity scoring, the usage ledger and bulk mode.

pub mod bulk;
pub mod ledger;
pub mod similarity;

use std::time::Duration;

pub use bulk::{BulkModeController, BulkModeSnapshot};
pub use ledger::{CategoryBucketKey, CleanupReport, DiversityLedger, HourBucket, LedgerStats};
pub use similarity::{FamilyKey, extract_keywords, family_key, similarity};

/// 同一トピックを再利用できるまでの最短時間。
pub const COOLDOWN: Duration = Duration::from_secs(2 * 60 * 60);
/// カテゴリごとの1時間あたり使用上限。
pub const MAX_PER_HOUR: u32 = 3;
/// これ以上の類似度を持つファミリー内トピックは重複とみなす。
pub const SIMILARITY_THRESHOLD: f64 = 0.7;
/// トレンドバッチの有効期間。
pub const CACHE_TTL: Duration = Duration::from_secs(15 * 60);
/// バルクモードを自動で有効化する件数。
pub const BULK_THRESHOLD: usize = 50;
/// セッションあたりの強制リフレッシュ上限。
pub const MAX_TREND_ATTEMPTS: u32 = 3;
/// バルク緩和時に残す使用履歴の長さ。
pub const BULK_RELAXATION_WINDOW: Duration = Duration::from_secs(30 * 60);
/// 自動バルクモードの持続時間。
pub const BULK_AUTO_EXPIRE: Duration = Duration::from_secs(30 * 60);
/// カテゴリバケットの保持期間。
pub const CATEGORY_BUCKET_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// 起動時に確定する調整値。既定値は上記の定数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityTunables {
    pub cooldown: Duration,
    pub max_per_hour: u32,
    pub similarity_threshold: f64,
    pub cache_ttl: Duration,
    pub bulk_threshold: usize,
    pub max_trend_attempts: u32,
    pub bulk_relaxation_window: Duration,
    pub bulk_auto_expire: Duration,
    pub category_bucket_retention: Duration,
}

impl Default for DiversityTunables {
    fn default() -> Self {
        Self {
            cooldown: COOLDOWN,
            max_per_hour: MAX_PER_HOUR,
            similarity_threshold: SIMILARITY_THRESHOLD,
            cache_ttl: CACHE_TTL,
            bulk_threshold: BULK_THRESHOLD,
            max_trend_attempts: MAX_TREND_ATTEMPTS,
            bulk_relaxation_window: BULK_RELAXATION_WINDOW,
            bulk_auto_expire: BULK_AUTO_EXPIRE,
            category_bucket_retention: CATEGORY_BUCKET_RETENTION,
        }
    }
}
