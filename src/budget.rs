//! Token counting and prompt budgeting.
//!
//! Aggregation prompts concatenate every child report of a group. To keep
//! them inside the generator's context window the instructional template is
//! left whole and the remaining budget is shared across the children: short
//! children keep their full text, the slack they leave goes to longer ones,
//! and anything still over its share is cut at a char boundary and marked.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Appended to a child body that had to be cut.
pub const TRUNCATION_MARKER: &str = "[truncated]";

/// Fallback estimate when the tokenizer is unavailable (1 token ≈ 4 chars).
const CHARS_PER_TOKEN: usize = 4;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!(error = %e, "cl100k tokenizer unavailable; estimating tokens from length");
        None
    }
});

/// Count tokens in text using the cl100k_base tokenizer.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(CHARS_PER_TOKEN),
    }
}

/// Cut `text` so that it plus [`TRUNCATION_MARKER`] fits in `max_tokens`.
///
/// Text already within budget is returned unchanged.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let total = count_tokens(text);
    if total <= max_tokens {
        return text.to_string();
    }

    let marker_tokens = count_tokens(TRUNCATION_MARKER) + 1;
    let target = max_tokens.saturating_sub(marker_tokens);
    if target == 0 {
        return TRUNCATION_MARKER.to_string();
    }

    // Shrink proportionally until the token count fits; converges in a few passes.
    let char_count = text.chars().count();
    let mut keep = char_count * target / total.max(1);
    loop {
        let cut = char_prefix(text, keep);
        if keep == 0 || count_tokens(cut) <= target {
            let cut = cut.trim_end();
            return if cut.is_empty() {
                TRUNCATION_MARKER.to_string()
            } else {
                format!("{cut}\n{TRUNCATION_MARKER}")
            };
        }
        keep = keep * 9 / 10;
    }
}

fn char_prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// One child report going into an aggregation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub header: String,
    pub body: String,
}

impl Section {
    pub fn new(header: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{}\n{}", self.header, self.body.trim_end())
    }
}

/// Fit `sections` into `available` tokens, keeping every header.
///
/// Returns the sections (same order) and how many bodies were truncated.
pub fn fit_sections(sections: Vec<Section>, available: usize) -> (Vec<Section>, usize) {
    if sections.is_empty() {
        return (sections, 0);
    }

    let header_cost: usize = sections.iter().map(|s| count_tokens(&s.header) + 2).sum();
    let mut remaining = available.saturating_sub(header_cost);
    let costs: Vec<usize> = sections.iter().map(|s| count_tokens(&s.body)).collect();

    // Water-fill: settle the cheapest children first so their slack is shared.
    let mut order: Vec<usize> = (0..sections.len()).collect();
    order.sort_by_key(|&i| costs[i]);
    let mut shares = vec![0usize; sections.len()];
    let mut left = sections.len();
    for i in order {
        let share = remaining / left;
        shares[i] = costs[i].min(share);
        remaining -= shares[i];
        left -= 1;
    }

    let mut truncated = 0;
    let fitted = sections
        .into_iter()
        .enumerate()
        .map(|(i, section)| {
            if costs[i] <= shares[i] {
                section
            } else {
                truncated += 1;
                Section {
                    body: truncate_to_tokens(&section.body, shares[i]),
                    header: section.header,
                }
            }
        })
        .collect();
    (fitted, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_tokens() {
        let count = count_tokens("Hello, world!");
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_to_tokens("small report", 100), "small report");
    }

    #[test]
    fn long_text_is_cut_and_marked() {
        let text = "The cluster moves stablecoins between exchanges. ".repeat(200);
        let cut = truncate_to_tokens(&text, 50);
        assert!(cut.ends_with(TRUNCATION_MARKER));
        assert!(count_tokens(&cut) <= 50);
        assert!(text.starts_with(cut.trim_end_matches(TRUNCATION_MARKER).trim_end()));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "交易集群分析 ".repeat(300);
        let cut = truncate_to_tokens(&text, 20);
        assert!(cut.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn small_sections_donate_slack() {
        let long = "Large transfer volume observed across many wallets. ".repeat(100);
        let sections = vec![
            Section::new("Cluster 0 Summary", "tiny"),
            Section::new("Cluster 1 Summary", long.clone()),
        ];
        let budget = 400;
        let (fitted, truncated) = fit_sections(sections, budget);
        assert_eq!(truncated, 1);
        assert_eq!(fitted[0].body, "tiny");
        assert_eq!(fitted[1].header, "Cluster 1 Summary");
        assert!(fitted[1].body.ends_with(TRUNCATION_MARKER));

        let used: usize = fitted.iter().map(|s| count_tokens(&s.render())).sum();
        assert!(used <= budget + fitted.len() * 2, "used {used} of {budget}");
    }

    #[test]
    fn everything_fits_when_budget_allows() {
        let sections = vec![
            Section::new("Epoch 1 Analysis", "one"),
            Section::new("Epoch 2 Analysis", "two"),
        ];
        let (fitted, truncated) = fit_sections(sections.clone(), 10_000);
        assert_eq!(truncated, 0);
        assert_eq!(fitted, sections);
    }
}
