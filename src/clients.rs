pub mod trend_llm;
pub mod trend_source;

pub use trend_llm::TrendLlmClient;
pub use trend_source::{Season, TrendRequest, TrendSource, UpstreamUnavailable};
