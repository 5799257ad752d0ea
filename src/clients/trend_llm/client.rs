use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clients::trend_source::{TrendRequest, TrendSource, UpstreamUnavailable};
use crate::schema::{trend_batch::TREND_BATCH_SCHEMA, validate_json};
use crate::topic::TrendBatch;

use super::models::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ResponseFormat,
    TrendBatchPayload, truncate_error_message,
};
use super::prompt::{system_prompt, user_prompt};

const TEMPERATURE: f32 = 0.9;

/// OpenAI互換のチャット補完APIでトレンド候補を生成するクライアント。
#[derive(Debug, Clone)]
pub struct TrendLlmClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    model: String,
    request_timeout: Duration,
}

impl TrendLlmClient {
    /// # Errors
    /// HTTPクライアントの構築やベースURLのパースに失敗した場合はエラーを返す。
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build trend LLM client")?;
        let base_url = Url::parse(&base_url.into()).context("invalid trend LLM base URL")?;
        let endpoint = base_url
            .join("v1/chat/completions")
            .context("failed to build chat completions URL")?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: model.into(),
            request_timeout,
        })
    }

    async fn request_batch(
        &self,
        request: &TrendRequest,
    ) -> Result<TrendBatch, UpstreamUnavailable> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
            response_format: ResponseFormat::json_object(),
            temperature: TEMPERATURE,
        };
        let request_id = Uuid::now_v7();

        debug!(
            %request_id,
            model = %self.model,
            attempt = request.attempt,
            avoid = request.avoid_topics.len(),
            "requesting trend batch"
        );

        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .header("X-Request-ID", request_id.to_string())
            .timeout(self.request_timeout);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                UpstreamUnavailable::Timeout(self.request_timeout)
            } else {
                UpstreamUnavailable::Transport(error)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamUnavailable::Status {
                status: status.as_u16(),
                body: truncate_error_message(&body),
            });
        }

        let raw = response.text().await.map_err(|error| {
            if error.is_timeout() {
                UpstreamUnavailable::Timeout(self.request_timeout)
            } else {
                UpstreamUnavailable::Transport(error)
            }
        })?;
        let completion: ChatCompletionResponse =
            serde_json::from_str(&raw).map_err(UpstreamUnavailable::Decode)?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                UpstreamUnavailable::Schema("completion carried no message content".to_string())
            })?;

        let batch = parse_trend_batch(&content)?;
        debug!(%request_id, topics = batch.len(), "trend batch accepted");
        Ok(batch)
    }
}

/// メッセージ本文をトレンドバッチとして厳密に解釈する。
///
/// JSON Schema検証とserdeの `deny_unknown_fields` の両方を通ったものだけを受け入れる。
pub(crate) fn parse_trend_batch(content: &str) -> Result<TrendBatch, UpstreamUnavailable> {
    let value: Value = serde_json::from_str(content).map_err(UpstreamUnavailable::Decode)?;

    let validation = validate_json(&TREND_BATCH_SCHEMA, &value);
    if !validation.valid {
        warn!(errors = ?validation.errors, "trend batch failed JSON Schema validation");
        return Err(UpstreamUnavailable::Schema(validation.errors.join("; ")));
    }

    let payload: TrendBatchPayload =
        serde_json::from_value(value).map_err(UpstreamUnavailable::Decode)?;
    payload
        .into_batch()
        .map_err(|error| UpstreamUnavailable::Schema(error.to_string()))
}

#[async_trait]
impl TrendSource for TrendLlmClient {
    async fn fetch_trend_batch(
        &self,
        request: &TrendRequest,
    ) -> Result<TrendBatch, UpstreamUnavailable> {
        self.request_batch(request).await
    }
}
