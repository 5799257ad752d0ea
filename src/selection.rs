pub mod fallback;
pub mod filters;
pub mod selector;
pub mod trend_cache;

pub use fallback::{CatalogError, FallbackCatalog};
pub use selector::{MIN_POOL, Selection, SelectionRequest, SelectionTier, TopicSelector};
pub use trend_cache::{CachedBatch, StaleRead, TrendCache, TrendCacheEntry, TrendCacheKey};
