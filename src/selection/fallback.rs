//! Built-in topics used when the upstream generator cannot supply enough candidates.

use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::diversity::extract_keywords;
use crate::selection::filters::is_generic;
use crate::topic::{Audience, Tone, Topic, TopicError};

/// 各対象年齢に最低限必要な組み込みトピック数。
pub const MIN_TOPICS_PER_AUDIENCE: usize = 8;

const FALLBACK_POPULARITY: u8 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("fallback catalog has {count} topics for {audience}, at least {min} required")]
    TooFew {
        audience: Audience,
        count: usize,
        min: usize,
    },
    #[error("fallback topic #{index} is malformed: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: TopicError,
    },
    #[error("fallback topic {text:?} is generic boilerplate")]
    Generic { text: String },
    #[error("fallback topic {text:?} is listed twice for {audience}")]
    Duplicate { audience: Audience, text: String },
}

/// 組み込みトピックの元データ。
#[derive(Debug, Clone, Copy)]
pub struct FallbackEntry {
    pub audience: Audience,
    pub category: &'static str,
    pub text: &'static str,
    pub tone: Tone,
}

const fn entry(
    audience: Audience,
    category: &'static str,
    text: &'static str,
    tone: Tone,
) -> FallbackEntry {
    FallbackEntry {
        audience,
        category,
        text,
        tone,
    }
}

const BUILTIN_ENTRIES: &[FallbackEntry] = &[
    entry(
        Audience::Elementary,
        "animals",
        "Which animal would make the best class pet",
        Tone::Curious,
    ),
    entry(Audience::Elementary, "school", "Favorite recess game on the playground", Tone::Casual),
    entry(Audience::Elementary, "food", "Most delicious school lunch menu", Tone::Excited),
    entry(Audience::Elementary, "seasons", "Fun ways to enjoy rainy days indoors", Tone::Casual),
    entry(Audience::Elementary, "hobbies", "Drawing your dream treehouse", Tone::Excited),
    entry(Audience::Elementary, "science", "Why leaves change color in autumn", Tone::Curious),
    entry(Audience::Elementary, "books", "Picture book characters you wish were real", Tone::Funny),
    entry(Audience::Elementary, "sports", "Tips for winning the sports day relay", Tone::Excited),
    entry(Audience::Elementary, "family", "Weekend outings with grandparents", Tone::Casual),
    entry(Audience::Middle, "clubs", "Choosing a club activity to join", Tone::Curious),
    entry(Audience::Middle, "study", "Study tricks before midterm exams", Tone::Casual),
    entry(Audience::Middle, "music", "Songs stuck in everyone's head lately", Tone::Funny),
    entry(Audience::Middle, "friends", "Group chat etiquette among classmates", Tone::Casual),
    entry(
        Audience::Middle,
        "events",
        "Preparing the class stall for the culture festival",
        Tone::Excited,
    ),
    entry(Audience::Middle, "games", "Board games worth playing with friends", Tone::Excited),
    entry(Audience::Middle, "food", "Convenience store snacks ranked honestly", Tone::Funny),
    entry(Audience::Middle, "science", "Strange facts about deep sea creatures", Tone::Curious),
    entry(Audience::Middle, "travel", "Where to go on the school trip", Tone::Curious),
    entry(Audience::High, "career", "Part-time job experiences worth sharing", Tone::Casual),
    entry(Audience::High, "study", "Balancing entrance exam prep with hobbies", Tone::Curious),
    entry(Audience::High, "tech", "Smartphone apps that actually help focus", Tone::Excited),
    entry(Audience::High, "fashion", "Uniform styling rules students debate", Tone::Funny),
    entry(Audience::High, "future", "Dream universities and why they stand out", Tone::Curious),
    entry(Audience::High, "events", "Planning the graduation trip itinerary", Tone::Excited),
    entry(Audience::High, "media", "Drama series everyone binge watched", Tone::Excited),
    entry(Audience::High, "sports", "Underrated sports clubs at high school", Tone::Casual),
    entry(Audience::High, "money", "Saving allowance for concert tickets", Tone::Casual),
];

/// 空でないことが型で保証されたトピック列。
#[derive(Debug, Clone)]
struct TopicList {
    first: Topic,
    rest: Vec<Topic>,
}

impl TopicList {
    fn from_vec(mut topics: Vec<Topic>) -> Option<Self> {
        if topics.is_empty() {
            return None;
        }
        let first = topics.remove(0);
        Some(Self {
            first,
            rest: topics,
        })
    }

    fn len(&self) -> usize {
        1 + self.rest.len()
    }

    fn get(&self, index: usize) -> &Topic {
        match index.checked_sub(1) {
            None => &self.first,
            Some(i) => self.rest.get(i).unwrap_or(&self.first),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Topic> {
        std::iter::once(&self.first).chain(&self.rest)
    }
}

/// 対象年齢ごとの組み込みトピック集。
#[derive(Debug, Clone)]
pub struct FallbackCatalog {
    elementary: TopicList,
    middle: TopicList,
    high: TopicList,
}

impl FallbackCatalog {
    /// 組み込みのトピック集を検証して構築する。
    ///
    /// # Errors
    /// 組み込みデータが不正な場合は [`CatalogError`] を返す。
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_entries(BUILTIN_ENTRIES)
    }

    /// # Errors
    /// いずれかの対象年齢のトピックが不足している、トピックが不正・定型文・重複の場合は
    /// [`CatalogError`] を返す。
    pub fn from_entries(entries: &[FallbackEntry]) -> Result<Self, CatalogError> {
        let mut grouped: FxHashMap<Audience, Vec<Topic>> = FxHashMap::default();
        let mut seen: FxHashSet<(Audience, &str)> = FxHashSet::default();

        for (index, raw) in entries.iter().enumerate() {
            if is_generic(raw.text) {
                return Err(CatalogError::Generic {
                    text: raw.text.to_string(),
                });
            }
            if !seen.insert((raw.audience, raw.text)) {
                return Err(CatalogError::Duplicate {
                    audience: raw.audience,
                    text: raw.text.to_string(),
                });
            }
            let topic = Topic::new(
                raw.category,
                raw.text,
                extract_keywords(raw.text),
                raw.tone,
                raw.audience,
                FALLBACK_POPULARITY,
            )
            .map_err(|source| CatalogError::Malformed { index, source })?;
            grouped.entry(raw.audience).or_default().push(topic);
        }

        let mut take = |audience: Audience| -> Result<TopicList, CatalogError> {
            let topics = grouped.remove(&audience).unwrap_or_default();
            let count = topics.len();
            if count < MIN_TOPICS_PER_AUDIENCE {
                return Err(CatalogError::TooFew {
                    audience,
                    count,
                    min: MIN_TOPICS_PER_AUDIENCE,
                });
            }
            TopicList::from_vec(topics).ok_or(CatalogError::TooFew {
                audience,
                count,
                min: MIN_TOPICS_PER_AUDIENCE,
            })
        };

        Ok(Self {
            elementary: take(Audience::Elementary)?,
            middle: take(Audience::Middle)?,
            high: take(Audience::High)?,
        })
    }

    fn list(&self, audience: Audience) -> &TopicList {
        match audience {
            Audience::Elementary => &self.elementary,
            Audience::Middle => &self.middle,
            Audience::High => &self.high,
        }
    }

    pub fn topics(&self, audience: Audience) -> impl Iterator<Item = &Topic> {
        self.list(audience).iter()
    }

    #[must_use]
    pub fn len(&self, audience: Audience) -> usize {
        self.list(audience).len()
    }

    /// 対象年齢ごとの件数。
    #[must_use]
    pub fn counts(&self) -> Vec<(Audience, usize)> {
        Audience::ALL
            .iter()
            .map(|audience| (*audience, self.len(*audience)))
            .collect()
    }

    /// フィルタなしで一様に1件選ぶ。
    pub fn pick_any<R: Rng + ?Sized>(&self, audience: Audience, rng: &mut R) -> &Topic {
        let list = self.list(audience);
        list.get(rng.random_range(0..list.len()))
    }
}
