//! Upstream trend source contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::topic::{ContentContext, TrendBatch};

/// 上流のトレンド生成が使えなかった理由。
///
/// 呼び出し側 (セレクター) で吸収され、利用者には返らない。
#[derive(Debug, Error)]
pub enum UpstreamUnavailable {
    #[error("trend source request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("trend source returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("trend source did not answer within {0:?}")]
    Timeout(Duration),
    #[error("trend batch rejected: {0}")]
    Schema(String),
    #[error("failed to decode trend batch: {0}")]
    Decode(#[source] serde_json::Error),
}

impl UpstreamUnavailable {
    /// メトリクスのラベル用の短い分類名。
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamUnavailable::Transport(_) => "transport",
            UpstreamUnavailable::Status { .. } => "status",
            UpstreamUnavailable::Timeout(_) => "timeout",
            UpstreamUnavailable::Schema(_) => "schema",
            UpstreamUnavailable::Decode(_) => "decode",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    #[must_use]
    pub fn from_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Winter => "winter",
        }
    }
}

/// トレンド取得時に渡すヒント。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendRequest {
    pub context: ContentContext,
    pub month: u32,
    pub season: Season,
    /// 直近で使用済みのトピック。生成側で重複を避けるために使う。
    pub avoid_topics: Vec<String>,
    /// 同一セッション内の強制再取得回数 (0 は通常取得)。
    pub attempt: u32,
}

impl TrendRequest {
    #[must_use]
    pub fn new(context: ContentContext, now: DateTime<Utc>, avoid_topics: Vec<String>) -> Self {
        let month = now.month();
        Self {
            context,
            month,
            season: Season::from_month(month),
            avoid_topics,
            attempt: 0,
        }
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    /// 4階層の候補トピックを取得する。
    async fn fetch_trend_batch(
        &self,
        request: &TrendRequest,
    ) -> Result<TrendBatch, UpstreamUnavailable>;
}

/// 応答を順番に返すテスト用ソース。
///
/// キューが空になった後は `fallback` を返し続ける (`None` ならスキーマエラー)。
#[cfg(test)]
pub(crate) struct ScriptedTrendSource {
    responses: std::sync::Mutex<std::collections::VecDeque<Option<TrendBatch>>>,
    fallback: Option<TrendBatch>,
    delay: Option<Duration>,
    requests: std::sync::Mutex<Vec<TrendRequest>>,
}

#[cfg(test)]
impl ScriptedTrendSource {
    pub(crate) fn new(responses: Vec<Option<TrendBatch>>, fallback: Option<TrendBatch>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            fallback,
            delay: None,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(batch: TrendBatch) -> Self {
        Self::new(Vec::new(), Some(batch))
    }

    pub(crate) fn failing() -> Self {
        Self::new(Vec::new(), None)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<TrendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl TrendSource for ScriptedTrendSource {
    async fn fetch_trend_batch(
        &self,
        request: &TrendRequest,
    ) -> Result<TrendBatch, UpstreamUnavailable> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        match next.unwrap_or_else(|| self.fallback.clone()) {
            Some(batch) => Ok(batch),
            None => Err(UpstreamUnavailable::Schema("scripted failure".to_string())),
        }
    }
}
