use serde::{Deserialize, Serialize};

use crate::topic::{Audience, Tone, Topic, TopicError, TrendBatch};

const MAX_ERROR_BODY_LENGTH: usize = 500;

/// エラー応答本文をログ用に切り詰める。
pub(super) fn truncate_error_message(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
    format!("{head}... (truncated)")
}

#[derive(Debug, Serialize)]
pub(super) struct ChatCompletionRequest<'a> {
    pub(super) model: &'a str,
    pub(super) messages: Vec<ChatMessage>,
    pub(super) response_format: ResponseFormat,
    pub(super) temperature: f32,
}

#[derive(Debug, Serialize)]
pub(super) struct ChatMessage {
    pub(super) role: &'static str,
    pub(super) content: String,
}

#[derive(Debug, Serialize)]
pub(super) struct ResponseFormat {
    #[serde(rename = "type")]
    pub(super) kind: &'static str,
}

impl ResponseFormat {
    pub(super) fn json_object() -> Self {
        Self {
            kind: "json_object",
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionResponse {
    pub(super) choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatChoice {
    pub(super) message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatResponseMessage {
    #[serde(default)]
    pub(super) content: Option<String>,
}

/// LLMが返すトレンドバッチ (メッセージ本文のJSON)。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct TrendBatchPayload {
    current_trends: Vec<TrendItem>,
    seasonal_topics: Vec<TrendItem>,
    school_life_topics: Vec<TrendItem>,
    entertainment_topics: Vec<TrendItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TrendItem {
    category: String,
    topic: String,
    keywords: Vec<String>,
    tone: Tone,
    target_age: Audience,
    popularity: u8,
}

impl TrendItem {
    fn into_topic(self) -> Result<Topic, TopicError> {
        Topic::new(
            self.category.to_lowercase(),
            self.topic,
            self.keywords,
            self.tone,
            self.target_age,
            self.popularity,
        )
    }
}

impl TrendBatchPayload {
    /// 1件でも不正なトピックがあればバッチ全体を拒否する。
    pub(super) fn into_batch(self) -> Result<TrendBatch, TopicError> {
        fn convert(items: Vec<TrendItem>) -> Result<Vec<Topic>, TopicError> {
            items.into_iter().map(TrendItem::into_topic).collect()
        }

        Ok(TrendBatch {
            current_trends: convert(self.current_trends)?,
            seasonal_topics: convert(self.seasonal_topics)?,
            school_life_topics: convert(self.school_life_topics)?,
            entertainment_topics: convert(self.entertainment_topics)?,
        })
    }
}
