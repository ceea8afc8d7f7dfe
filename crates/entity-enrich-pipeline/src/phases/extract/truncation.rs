//! Relevance-based truncation of overlong page content.

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "does", "this", "that", "with", "have", "has", "your", "you", "from", "which", "their",
];

fn extract_keywords(question_text: &str) -> Vec<String> {
    question_text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn split_sections(content: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let is_heading_start = (i == 0 || bytes[i - 1] == b'\n') && bytes[i] == b'#';
        let is_paragraph_break = i + 1 < bytes.len() && bytes[i] == b'\n' && bytes[i + 1] == b'\n';
        if (is_heading_start && i > start) || (is_paragraph_break && i > start) {
            sections.push(&content[start..i]);
            start = i;
        }
        i += 1;
    }
    if start < content.len() {
        sections.push(&content[start..]);
    }
    if sections.is_empty() {
        sections.push(content);
    }
    sections
}

fn score_section(section: &str, keywords: &[String]) -> usize {
    let lower = section.to_ascii_lowercase();
    keywords.iter().map(|kw| lower.matches(kw.as_str()).count()).sum()
}

/// Truncate `content` to fit `budget` characters, keeping the
/// highest-scoring sections (by question-keyword hit count) and
/// reassembling survivors in their original order.
pub fn relevance_truncate(content: &str, budget: usize, question_text: &str) -> String {
    if content.len() <= budget {
        return content.to_string();
    }

    let keywords = extract_keywords(question_text);
    let sections = split_sections(content);

    if keywords.is_empty() || sections.len() <= 1 {
        return hard_truncate(content, budget);
    }

    let mut scored: Vec<(usize, usize, &str)> = sections.iter().enumerate().map(|(i, s)| (i, score_section(s, &keywords), *s)).collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let mut selected = std::collections::HashSet::new();
    let mut used = 0usize;
    for (index, _score, section) in &scored {
        if used >= budget {
            break;
        }
        selected.insert(*index);
        used += section.len();
    }

    let mut result = String::new();
    for (i, section) in sections.iter().enumerate() {
        if selected.contains(&i) {
            result.push_str(section);
        }
    }

    if result.is_empty() {
        hard_truncate(content, budget)
    } else {
        hard_truncate(&result, budget)
    }
}

fn hard_truncate(content: &str, budget: usize) -> String {
    content.chars().take(budget).collect()
}
