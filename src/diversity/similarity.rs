/// キーワード重複によるトピック類似度。
///
/// トピック文字列からキーワードを抽出し、Dice係数で比較します。
use once_cell::sync::Lazy;
use regex::Regex;

/// 抽出するキーワードの最大数。
pub const MAX_KEYWORDS: usize = 5;
const MIN_TOKEN_CHARS: usize = 2;

/// 意味を持たないつなぎ語。
const STOPWORDS: [&str; 12] = [
    "the", "and", "for", "with", "about", "this", "that", "just", "really", "some", "today",
    "what",
];

/// 空白・句読点・記号・笑いマークで分割する。
static TOKEN_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\p{P}\p{S}笑ｗ]+").expect("compile token split regex"));

/// "www" / "lol" / "hahaha" のような笑いだけのトークン。
static LAUGH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:w+|lol+|(?:ha)+h?|(?:he)+h?)$").expect("compile laugh regex"));

/// テキストからキーワードを抽出する。
///
/// 小文字化した上で分割し、短いトークン・ストップワード・笑いマークを除いた
/// 先頭から最大5個の重複しないトークンを元の順序で返す。
#[must_use]
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut keywords: Vec<String> = Vec::with_capacity(MAX_KEYWORDS);
    for token in TOKEN_SPLIT.split(&lowered) {
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
        if token.chars().count() < MIN_TOKEN_CHARS
            || STOPWORDS.contains(&token)
            || LAUGH_TOKEN.is_match(token)
        {
            continue;
        }
        if keywords.iter().any(|existing| existing == token) {
            continue;
        }
        keywords.push(token.to_string());
    }
    keywords
}

/// 2つのテキストのDice係数 (0.0..=1.0)。どちらかのキーワードが空なら 0。
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    keyword_similarity(&extract_keywords(a), &extract_keywords(b))
}

/// 抽出済みキーワード同士のDice係数。
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn keyword_similarity(left: &[String], right: &[String]) -> f64 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.iter().filter(|token| right.contains(token)).count();
    (2 * shared) as f64 / (left.len() + right.len()) as f64
}

/// ファミリーキー: 先頭2キーワードを `_` で連結したもの。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyKey(String);

impl FamilyKey {
    #[must_use]
    pub fn from_keywords(keywords: &[String]) -> Self {
        Self(
            keywords
                .iter()
                .take(2)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("_"),
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[must_use]
pub fn family_key(text: &str) -> FamilyKey {
    FamilyKey::from_keywords(&extract_keywords(text))
}
