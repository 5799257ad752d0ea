//! Topic domain types shared by the ledger, the trend cache and the selector.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 1トピックあたりのキーワード上限。
pub const MAX_TOPIC_KEYWORDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Casual,
    Funny,
    Excited,
    Curious,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Elementary,
    Middle,
    High,
}

impl Audience {
    pub const ALL: [Audience; 3] = [Audience::Elementary, Audience::Middle, Audience::High];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Audience::Elementary => "elementary",
            Audience::Middle => "middle",
            Audience::High => "high",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成される投稿の種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentContext {
    #[default]
    Free,
    Info,
    Question,
}

impl ContentContext {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ContentContext::Free => "free",
            ContentContext::Info => "info",
            ContentContext::Question => "question",
        }
    }
}

/// 人気度 (1..=10)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Popularity(u8);

impl Popularity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Popularity {
    type Error = TopicError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(TopicError::PopularityOutOfRange(value))
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic text must not be empty")]
    EmptyText,
    #[error("topic category must not be empty")]
    EmptyCategory,
    #[error("topic has {0} keywords, at most {MAX_TOPIC_KEYWORDS} allowed")]
    TooManyKeywords(usize),
    #[error("popularity {0} is outside 1..=10")]
    PopularityOutOfRange(u8),
}

/// 候補トピック。生成後は不変。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    category: String,
    text: String,
    keywords: Vec<String>,
    tone: Tone,
    audience: Audience,
    popularity: Popularity,
}

impl Topic {
    /// 各フィールドを検証してトピックを構築する。
    ///
    /// # Errors
    /// テキストやカテゴリが空、キーワードが多すぎる、人気度が範囲外の場合は [`TopicError`] を返す。
    pub fn new(
        category: impl Into<String>,
        text: impl Into<String>,
        keywords: Vec<String>,
        tone: Tone,
        audience: Audience,
        popularity: u8,
    ) -> Result<Self, TopicError> {
        let category = category.into().trim().to_string();
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(TopicError::EmptyText);
        }
        if category.is_empty() {
            return Err(TopicError::EmptyCategory);
        }
        if keywords.len() > MAX_TOPIC_KEYWORDS {
            return Err(TopicError::TooManyKeywords(keywords.len()));
        }
        let popularity = Popularity::try_from(popularity)?;
        Ok(Self {
            category,
            text,
            keywords,
            tone,
            audience,
            popularity,
        })
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    #[must_use]
    pub fn tone(&self) -> Tone {
        self.tone
    }

    #[must_use]
    pub fn audience(&self) -> Audience {
        self.audience
    }

    #[must_use]
    pub fn popularity(&self) -> Popularity {
        self.popularity
    }
}

/// 上流から取得した4階層の候補バッチ。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrendBatch {
    pub current_trends: Vec<Topic>,
    pub seasonal_topics: Vec<Topic>,
    pub school_life_topics: Vec<Topic>,
    pub entertainment_topics: Vec<Topic>,
}

impl TrendBatch {
    pub fn iter(&self) -> impl Iterator<Item = &Topic> {
        self.current_trends
            .iter()
            .chain(&self.seasonal_topics)
            .chain(&self.school_life_topics)
            .chain(&self.entertainment_topics)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.current_trends.len()
            + self.seasonal_topics.len()
            + self.school_life_topics.len()
            + self.entertainment_topics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// テスト用: 指定テキストのトピックを作る。
#[cfg(test)]
pub(crate) fn test_topic(category: &str, text: &str, audience: Audience, tone: Tone) -> Topic {
    let keywords = crate::diversity::extract_keywords(text);
    Topic::new(category, text, keywords, tone, audience, 5).expect("valid test topic")
}
