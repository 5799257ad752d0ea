/// トレンド生成LLMのJSON Schema定義。
///
/// 4種類の候補配列からなるオブジェクトのみを受け付けます。
use once_cell::sync::Lazy;
use serde_json::{Value, json};

/// トレンドバッチ応答のJSON Schema。
pub(crate) static TREND_BATCH_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let item = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "category": { "type": "string", "minLength": 1, "maxLength": 64 },
            "topic": { "type": "string", "minLength": 1, "maxLength": 200 },
            "keywords": {
                "type": "array",
                "items": { "type": "string", "minLength": 1 },
                "maxItems": 5
            },
            "tone": { "enum": ["casual", "funny", "excited", "curious"] },
            "targetAge": { "enum": ["elementary", "middle", "high"] },
            "popularity": { "type": "integer", "minimum": 1, "maximum": 10 }
        },
        "required": ["category", "topic", "keywords", "tone", "targetAge", "popularity"]
    });
    let tier = json!({
        "type": "array",
        "items": { "$ref": "#/$defs/trendItem" },
        "maxItems": 20
    });

    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://alt.dev/schemas/topic-diversity/trend-batch.json",
        "title": "Trend Batch",
        "description": "Four tiers of candidate topics returned by the trend generator",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "currentTrends": tier,
            "seasonalTopics": tier,
            "schoolLifeTopics": tier,
            "entertainmentTopics": tier
        },
        "required": ["currentTrends", "seasonalTopics", "schoolLifeTopics", "entertainmentTopics"],
        "$defs": { "trendItem": item }
    })
});
