use std::fmt::Write as _;

use crate::clients::trend_source::TrendRequest;
use crate::topic::ContentContext;

/// プロンプトに載せる回避リストの上限。
const MAX_AVOID_TOPICS: usize = 30;

pub(super) fn system_prompt() -> String {
    "You suggest conversation topics for a student social feed. \
     Reply with a single JSON object with exactly four arrays: \
     currentTrends, seasonalTopics, schoolLifeTopics, entertainmentTopics. \
     Each array holds 8 to 12 items shaped \
     {\"category\": string, \"topic\": string, \"keywords\": [up to 5 strings], \
     \"tone\": \"casual\"|\"funny\"|\"excited\"|\"curious\", \
     \"targetAge\": \"elementary\"|\"middle\"|\"high\", \"popularity\": 1-10}. \
     Topics must be specific, safe for students and distinct from each other. \
     Never return vague filler such as \"something happened at school today\"."
        .to_string()
}

pub(super) fn user_prompt(request: &TrendRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(
        prompt,
        "Month: {}. Season: {}.",
        request.month,
        request.season.as_str()
    );
    let _ = writeln!(prompt, "Post style: {}.", context_hint(request.context));
    if request.attempt > 0 {
        let _ = writeln!(
            prompt,
            "This is regeneration #{}; earlier suggestions were exhausted, so explore new angles.",
            request.attempt
        );
    }
    if !request.avoid_topics.is_empty() {
        let _ = writeln!(prompt, "Do not repeat or paraphrase these recent topics:");
        for topic in request.avoid_topics.iter().take(MAX_AVOID_TOPICS) {
            let _ = writeln!(prompt, "- {topic}");
        }
    }
    prompt
}

fn context_hint(context: ContentContext) -> &'static str {
    match context {
        ContentContext::Free => "free-form posts about anything students enjoy",
        ContentContext::Info => "informative posts sharing something useful or new",
        ContentContext::Question => "posts that ask the community a question",
    }
}
