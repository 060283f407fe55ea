use once_cell::sync::Lazy;
use regex::Regex;

use super::{AnalysisResult, ConversationTurn, GatewayError, ModelGateway, Tier};

/// Cache checks per question: the initial one plus one after re-analysis.
pub const MAX_ATTEMPTS: usize = 2;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+").unwrap());

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Fast model over the description captured with the screenshot.
    Cache,
    /// Fast model over a description refreshed for this question.
    Reanalyzed,
    /// Fast model without a matching description.
    Direct,
}

#[derive(Debug, Clone)]
pub struct RoutedAnswer {
    pub text: String,
    pub route: Route,
}

/// Lowercased words of a question.
pub fn question_tokens(question: &str) -> Vec<String> {
    let lower = question.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// True when any question word appears somewhere in the description.
///
/// Plain substring overlap: "is" matches "this", and a paraphrase with no
/// shared word misses. Good enough to decide whether to try the cache first.
pub fn can_answer_from_cache(question: &str, cached_description: &str) -> bool {
    let description = cached_description.to_lowercase();
    question_tokens(question)
        .iter()
        .any(|token| description.contains(token.as_str()))
}

fn build_cache_prompt(analysis: &AnalysisResult, question: &str) -> String {
    let mut prompt = String::from("## What's in the Screenshot\n");
    prompt.push_str(&analysis.as_context());
    prompt.push_str("\n\n## Question\n");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer using the screenshot description above.");
    prompt
}

fn build_direct_prompt(analysis: &AnalysisResult, question: &str) -> String {
    let mut prompt = String::from("## Screenshot Notes (may not cover the question)\n");
    prompt.push_str(&analysis.as_context());
    prompt.push_str("\n\n## Question\n");
    prompt.push_str(question);
    prompt.push_str(
        "\n\nAnswer as well as you can. If the screenshot notes don't help, \
         say what you would need to see.",
    );
    prompt
}

/// Answers `question`, re-analyzing `image_png` at most once when the cached
/// description shares no words with it. A re-analysis replaces `analysis`.
pub async fn answer<G: ModelGateway + ?Sized>(
    gateway: &G,
    image_png: &[u8],
    analysis: &mut AnalysisResult,
    history: &[ConversationTurn],
    question: &str,
) -> Result<RoutedAnswer, GatewayError> {
    let mut reanalyzed = false;

    for attempt in 0..MAX_ATTEMPTS {
        if can_answer_from_cache(question, &analysis.description) {
            log::debug!("Answering from cached description (attempt {})", attempt + 1);
            let text = gateway
                .answer_text(&build_cache_prompt(analysis, question), history, Tier::Fast)
                .await?;
            let route = if reanalyzed {
                Route::Reanalyzed
            } else {
                Route::Cache
            };
            return Ok(RoutedAnswer { text, route });
        }

        if attempt + 1 < MAX_ATTEMPTS {
            log::debug!("Cached description has no overlap; re-analyzing screenshot");
            *analysis = gateway.analyze_image(image_png, Some(question)).await?;
            reanalyzed = true;
        }
    }

    log::debug!("Still no overlap after re-analysis; answering directly");
    let text = gateway
        .answer_text(&build_direct_prompt(analysis, question), history, Tier::Fast)
        .await?;
    Ok(RoutedAnswer {
        text,
        route: Route::Direct,
    })
}
