//! Prompt assembly and output-token budget.

use entity_enrich_core::model::{ClassifiedPage, Question};

const SINGLE_FIELD_MAX_TOKENS: u32 = 512;
const TOKENS_PER_FIELD: u32 = 100;
const MIN_MULTI_FIELD_TOKENS: u32 = 512;
const MAX_MULTI_FIELD_TOKENS: u32 = 4096;
const PAGE_CHAR_BUDGET: usize = 6000;
const AUX_CHAR_BUDGET: usize = 1500;

pub fn max_output_tokens(field_count: usize) -> u32 {
    if field_count <= 1 {
        return SINGLE_FIELD_MAX_TOKENS;
    }
    (TOKENS_PER_FIELD * field_count as u32).clamp(MIN_MULTI_FIELD_TOKENS, MAX_MULTI_FIELD_TOKENS)
}

/// Build the user-message body: primary page content, truncated by
/// relevance, plus auxiliary blocks (external-source snippets, pre-seeded
/// hints, low-confidence T1 context) appended within a shared char budget.
pub fn build_user_prompt(question: &Question, primary_page: &ClassifiedPage, aux_blocks: &[String]) -> String {
    use super::truncation::relevance_truncate;

    let mut body = String::new();
    body.push_str(&format!("Question: {}\n\n", question.text));
    if let Some(instructions) = &question.instructions {
        body.push_str(&format!("Instructions: {instructions}\n\n"));
    }
    body.push_str(&format!("Page ({}):\n{}\n", primary_page.page.url, relevance_truncate(&primary_page.page.markdown, PAGE_CHAR_BUDGET, &question.text)));

    let mut remaining = AUX_CHAR_BUDGET;
    for block in aux_blocks {
        if remaining == 0 {
            break;
        }
        let take = floor_to_char_boundary(block, block.len().min(remaining));
        body.push_str("\n---\n");
        body.push_str(&block[..take]);
        remaining -= take;
    }

    if question.is_multi_field() {
        let keys = question.field_keys().join("\", \"");
        body.push_str(&format!(
            "\n\nRespond with a single JSON object keyed by \"{keys}\" plus \"confidence\", \"reasoning\", and \"source_url\"."
        ));
    } else {
        body.push_str("\n\nRespond with a single JSON object: {\"value\", \"confidence\", \"reasoning\", \"source_url\"}.");
    }

    body
}

/// Largest byte index `<= max_len` that lands on a UTF-8 char boundary in `s`.
fn floor_to_char_boundary(s: &str, max_len: usize) -> usize {
    let mut n = max_len.min(s.len());
    while n > 0 && !s.is_char_boundary(n) {
        n -= 1;
    }
    n
}

pub fn system_prompt() -> &'static str {
    "You are extracting structured facts about a business from its web presence. Answer only from the provided content."
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_core::model::{CrawledPage, PageType, TIER_CHEAP};

    fn question(field_key: &str) -> Question {
        Question {
            id: "q1".to_string(),
            text: "What is the pricing?".to_string(),
            field_key: field_key.to_string(),
            page_types: vec![],
            tier: TIER_CHEAP,
            output_format: "json".to_string(),
            instructions: None,
        }
    }

    fn page() -> ClassifiedPage {
        ClassifiedPage {
            page: CrawledPage { url: "https://acme.com/pricing".to_string(), title: "Pricing".to_string(), markdown: "content".to_string(), status_code: 200, metadata: None },
            page_type: PageType::Pricing,
            confidence: 0.9,
        }
    }

    #[test]
    fn single_field_budget_is_fixed() {
        assert_eq!(max_output_tokens(1), 512);
    }

    #[test]
    fn multi_field_budget_scales_and_clamps() {
        assert_eq!(max_output_tokens(3), 512);
        assert_eq!(max_output_tokens(10), 1000);
        assert_eq!(max_output_tokens(60), 4096);
    }

    #[test]
    fn multi_field_prompt_lists_keys() {
        let q = question("owner_first_name, owner_last_name");
        let prompt = build_user_prompt(&q, &page(), &[]);
        assert!(prompt.contains("owner_first_name"));
        assert!(prompt.contains("owner_last_name"));
    }

    #[test]
    fn floor_to_char_boundary_never_splits_a_multibyte_char() {
        let s = "caf\u{e9} menu"; // "café menu", é is 2 bytes
        assert_eq!(floor_to_char_boundary(s, 4), 3);
        assert_eq!(&s[..floor_to_char_boundary(s, 4)], "caf");
    }

    #[test]
    fn aux_block_truncation_does_not_panic_on_multibyte_boundary() {
        let q = question("industry");
        let aux = "x".repeat(1499) + "\u{e9}\u{e9}\u{e9}";
        let prompt = build_user_prompt(&q, &page(), &[aux]);
        assert!(prompt.contains(&"x".repeat(1499)));
    }
}
