//! Document compression strategies
//!
//! Three paths: fast truncation, keyword-scored line extraction, and LLM
//! summarization with extract-key as the failure fallback. Strategy
//! selection follows the compression ratio.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::llm::{CompletionRequest, LlmClient, Role};
use crate::prompts::PromptLoader;

/// Approximate token count (4 chars ~= 1 token)
pub fn count_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Truncate to a token budget, snapping to a clean boundary
///
/// Prefers a sentence boundary past the midpoint of the slice, then a word
/// boundary, then a hard cut. Appends an ellipsis when anything was lost.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if count_tokens(text) <= max_tokens {
        return text.to_string();
    }

    let max_chars = max_tokens * 4;
    let mut cut = max_chars.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let slice = &text[..cut];

    let half = cut / 2;
    let snapped = slice
        .rfind(['.', '!', '?'])
        .filter(|&p| p > half)
        .map(|p| &slice[..=p])
        .or_else(|| slice.rfind(char::is_whitespace).filter(|&p| p > half).map(|p| &slice[..p]))
        .unwrap_or(slice);

    format!("{}...", snapped.trim_end())
}

/// Which compression path a document took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    Truncate,
    ExtractKey,
    Summarize,
    BulletPoints,
}

/// Score lines by importance and keep the top scorers under budget
///
/// Lines are scored on keyword hits, head/tail position, numbers, currency
/// amounts, and URLs, then reassembled in original order.
pub fn extract_key_lines(text: &str, max_tokens: usize) -> String {
    let lines: Vec<&str> = if text.contains('\n') {
        text.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
    } else {
        // Prose without line structure: split on sentence ends
        text.split_inclusive(['.', '!', '?']).map(str::trim).collect()
    };
    if lines.is_empty() {
        return truncate_to_tokens(text, max_tokens);
    }

    const KEYWORDS: [&str; 16] = [
        "price", "cost", "found", "result", "error", "success", "recommend", "best", "important", "note", "warning",
        "total", "available", "summary", "key", "must",
    ];
    let number_re = Regex::new(r"\d").expect("static regex");
    let currency_re = Regex::new(r"\$[\d,]+").expect("static regex");

    let mut scored: Vec<(i32, usize)> = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        let lower = line.to_lowercase();
        let mut score: i32 = 0;

        // Position bonus: head and tail carry framing
        if idx == 0 {
            score += 5;
        } else if idx == lines.len() - 1 {
            score += 3;
        } else if idx < 3 {
            score += 2;
        }

        score += KEYWORDS.iter().filter(|kw| lower.contains(**kw)).count() as i32 * 2;

        if number_re.is_match(line) {
            score += 2;
        }
        if currency_re.is_match(line) {
            score += 3;
        }
        if lower.contains("http") {
            score += 2;
        }

        let words = line.split_whitespace().count();
        if words < 5 {
            score -= 1;
        } else if words > 20 {
            score += 1;
        }

        scored.push((score, idx));
    }

    scored.sort_by(|(sa, ia), (sb, ib)| sb.cmp(sa).then(ia.cmp(ib)));

    // Account for the joining newlines so the reassembled text stays in budget
    let mut selected: Vec<usize> = Vec::new();
    let mut used_chars = 0usize;
    for (_, idx) in &scored {
        let chars = lines[*idx].chars().count() + 1;
        if (used_chars + chars).div_ceil(4) <= max_tokens {
            selected.push(*idx);
            used_chars += chars;
        }
    }
    selected.sort_unstable();

    let result = selected.iter().map(|&i| lines[i]).collect::<Vec<_>>().join("\n");
    if result.trim().is_empty() {
        return truncate_to_tokens(text, max_tokens);
    }
    result
}

/// Compresses documents to their pack allotments
pub struct Compressor {
    llm: Option<Arc<dyn LlmClient>>,
    prompts: PromptLoader,

    /// Input cap for the compressor endpoint itself
    llm_input_cap: usize,
}

impl Compressor {
    /// Deterministic compressor: no LLM path, summarize degrades to
    /// extract-key (required under test)
    pub fn deterministic() -> Self {
        Self {
            llm: None,
            prompts: PromptLoader::embedded_only(),
            llm_input_cap: 8000,
        }
    }

    /// Compressor with an LLM path for heavy ratios
    pub fn with_llm(llm: Arc<dyn LlmClient>, prompts: PromptLoader) -> Self {
        Self {
            llm: Some(llm),
            prompts,
            llm_input_cap: 8000,
        }
    }

    /// Pick a strategy for the given ratio
    pub fn select_strategy(&self, original_tokens: usize, target_tokens: usize) -> CompressionStrategy {
        let ratio = target_tokens as f64 / original_tokens.max(1) as f64;
        if self.llm.is_none() {
            if ratio > 0.5 {
                return CompressionStrategy::Truncate;
            }
            return CompressionStrategy::ExtractKey;
        }
        if ratio > 0.5 {
            CompressionStrategy::ExtractKey
        } else if ratio > 0.2 {
            CompressionStrategy::Summarize
        } else {
            CompressionStrategy::BulletPoints
        }
    }

    /// Compress `text` to at most `max_tokens`, choosing a strategy
    ///
    /// Critical docs pass `no_truncate=true` and are routed to extract-key
    /// instead of blind truncation.
    pub async fn compress(&self, text: &str, max_tokens: usize, no_truncate: bool) -> (String, CompressionStrategy) {
        let original = count_tokens(text);
        if original <= max_tokens {
            return (text.to_string(), CompressionStrategy::Truncate);
        }

        let mut strategy = self.select_strategy(original, max_tokens);
        if no_truncate && strategy == CompressionStrategy::Truncate {
            strategy = CompressionStrategy::ExtractKey;
        }
        debug!(original, max_tokens, ?strategy, "Compressor::compress: called");

        match strategy {
            CompressionStrategy::Truncate => (truncate_to_tokens(text, max_tokens), strategy),
            CompressionStrategy::ExtractKey => (extract_key_lines(text, max_tokens), strategy),
            CompressionStrategy::Summarize | CompressionStrategy::BulletPoints => {
                match self.llm_compress(text, max_tokens, strategy).await {
                    Some(compressed) => (compressed, strategy),
                    None => (extract_key_lines(text, max_tokens), CompressionStrategy::ExtractKey),
                }
            }
        }
    }

    async fn llm_compress(&self, text: &str, max_tokens: usize, strategy: CompressionStrategy) -> Option<String> {
        let llm = self.llm.as_ref()?;

        let input = truncate_to_tokens(text, self.llm_input_cap);
        let prompt_head = self
            .prompts
            .render(
                "compressor",
                &serde_json::json!({
                    "bullet_points": strategy == CompressionStrategy::BulletPoints,
                    "max_tokens": max_tokens,
                }),
            )
            .ok()?;

        let request = CompletionRequest::new(format!("{}\n---\n{}", prompt_head, input), Role::Voice, max_tokens as u32);

        match llm.complete(request).await {
            Ok(response) if count_tokens(&response.content) <= max_tokens => Some(response.content),
            Ok(response) => {
                warn!("LLM compression overshot budget, truncating");
                Some(truncate_to_tokens(&response.content, max_tokens))
            }
            Err(e) => {
                warn!("LLM compression failed, falling back to extract-key: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens_rounds_up() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abc"), 1);
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
    }

    #[test]
    fn test_truncate_noop_when_under_budget() {
        assert_eq!(truncate_to_tokens("short text", 100), "short text");
    }

    #[test]
    fn test_truncate_snaps_to_sentence() {
        let text = "First sentence here. Second sentence follows. Third one that will be dropped entirely for budget.";
        let out = truncate_to_tokens(text, 12);
        assert!(out.ends_with("..."));
        assert!(count_tokens(&out) <= 13); // ellipsis may add one
        assert!(out.contains("First sentence here."));
    }

    #[test]
    fn test_truncate_respects_budget() {
        let text = "word ".repeat(500);
        let out = truncate_to_tokens(&text, 50);
        assert!(count_tokens(&out) <= 51);
    }

    #[test]
    fn test_extract_key_prefers_currency_and_urls() {
        let mut lines = vec!["filler line without much signal here at all".to_string(); 30];
        lines.push("Price found: $8.99 at https://shop.example/nano".to_string());
        let text = lines.join("\n");

        let out = extract_key_lines(&text, 20);
        assert!(out.contains("$8.99"));
        assert!(out.contains("https://shop.example/nano"));
    }

    #[test]
    fn test_extract_key_preserves_original_order() {
        let text = "alpha result one\nplain middle filler\nomega result $5 two";
        let out = extract_key_lines(text, 100);
        let alpha = out.find("alpha").unwrap();
        let omega = out.find("omega").unwrap();
        assert!(alpha < omega);
    }

    #[tokio::test]
    async fn test_deterministic_compressor_never_uses_llm() {
        let compressor = Compressor::deterministic();
        let text = "data ".repeat(1000);
        let (out, strategy) = compressor.compress(&text, 50, false).await;
        assert!(count_tokens(&out) <= 51);
        assert!(matches!(
            strategy,
            CompressionStrategy::Truncate | CompressionStrategy::ExtractKey
        ));
    }

    #[tokio::test]
    async fn test_no_truncate_routes_to_extract_key() {
        let compressor = Compressor::deterministic();
        let text = "important: $4.20 total\n".repeat(200);
        let (_, strategy) = compressor.compress(&text, 100, true).await;
        assert_eq!(strategy, CompressionStrategy::ExtractKey);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn truncate_never_exceeds_budget_plus_ellipsis(text in ".{0,2000}", budget in 1usize..200) {
                let out = truncate_to_tokens(&text, budget);
                prop_assert!(count_tokens(&out) <= budget + 1);
            }

            #[test]
            fn extract_key_never_exceeds_budget(text in "[a-z $0-9\n.]{0,2000}", budget in 10usize..200) {
                let out = extract_key_lines(&text, budget);
                prop_assert!(count_tokens(&out) <= budget + 1);
            }
        }
    }
}
