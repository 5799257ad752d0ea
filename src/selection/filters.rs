//! Candidate filters applied before the ledger check.

use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::topic::{Audience, ContentContext, Tone, Topic};

/// 中身のない定型トピックのパターン (pattern, name)。
const GENERIC_PATTERNS: &[(&str, &str)] = &[
    (r"^something (happened|interesting|fun)\b", "something_happened"),
    (r"\b(random|general) (thoughts?|topics?|stuff)\b", "random_thoughts"),
    (r"^(how|what) (is|was) your day\b", "how_was_your_day"),
    (r"^today'?s? (topic|post|news)$", "todays_topic"),
    (r"^(daily|everyday|school) life$", "daily_life"),
    (r"^(anything|whatever) (goes|you like)$", "anything_goes"),
    (r"^(an? )?(fun|interesting|cool) (fact|topic|thing)s?$", "fun_fact"),
    (r"^(just )?chatting$", "just_chatting"),
    (r"^(今日の|最近の)?(出来事|話題|雑談)$", "ja_generic"),
];

static GENERIC_TOPIC: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(
        GENERIC_PATTERNS
            .iter()
            .map(|(pattern, _)| format!("(?i){pattern}")),
    )
    .expect("compile generic topic patterns")
});

/// `info` 文脈で除外するカテゴリ。
const JOKE_CATEGORIES: &[&str] = &["joke", "jokes", "meme", "memes", "humor", "comedy"];

/// 定型文に一致した場合、そのパターン名を返す。
#[must_use]
pub fn generic_pattern(text: &str) -> Option<&'static str> {
    let trimmed = text.trim();
    GENERIC_TOPIC
        .matches(trimmed)
        .iter()
        .next()
        .map(|index| GENERIC_PATTERNS[index].1)
}

#[must_use]
pub fn is_generic(text: &str) -> bool {
    GENERIC_TOPIC.is_match(text.trim())
}

/// 対象年齢が一致するか、どの年齢にも出せる `middle` なら通す。
#[must_use]
pub fn matches_audience(topic: &Topic, audience: Audience) -> bool {
    topic.audience() == audience || topic.audience() == Audience::Middle
}

#[must_use]
pub fn matches_context(topic: &Topic, context: ContentContext) -> bool {
    match context {
        ContentContext::Free => true,
        ContentContext::Info => {
            topic.tone() != Tone::Funny && !JOKE_CATEGORIES.contains(&topic.category())
        }
        ContentContext::Question => {
            matches!(topic.tone(), Tone::Curious | Tone::Casual)
                || topic.text().ends_with(['?', '？'])
        }
    }
}

/// 台帳を見ない内容フィルタ (定型文・対象年齢・文脈) をまとめて適用する。
#[must_use]
pub fn passes_content_filters(
    topic: &Topic,
    audience: Audience,
    context: ContentContext,
) -> bool {
    !is_generic(topic.text())
        && matches_audience(topic, audience)
        && matches_context(topic, context)
}
