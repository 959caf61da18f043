//! Stage 1: strip code blocks, sanitize extraction-directive injection,
//! normalize whitespace. Falls back to passing the text through with a
//! `preprocess_failed` tag rather than blocking the pipeline.

/// Leading phrases that try to steer extraction directly. Removed so the
/// model scores the content, not the imperative.
const DIRECTIVE_PREFIXES: &[&str] = &[
    "remember that",
    "remember:",
    "store the fact that",
    "store that",
    "note that",
    "make a note that",
    "don't forget that",
    "dont forget that",
    "keep in mind that",
];

#[derive(Debug, Clone)]
pub struct CleanUtterance {
    pub text: String,
    pub tags: Vec<String>,
}

/// Preprocess a raw utterance. Returns None when nothing extractable
/// remains (empty, punctuation only, or entirely code).
pub fn preprocess(raw: &str) -> Option<CleanUtterance> {
    let mut tags = Vec::new();

    let without_code = strip_code(raw);
    if without_code.len() < raw.trim().len() {
        tags.push("code_stripped".to_string());
    }

    let without_directives = strip_directives(&without_code, &mut tags);
    let text = normalize_whitespace(&without_directives);

    if text.is_empty() || !text.chars().any(|c| c.is_alphanumeric()) {
        return None;
    }

    Some(CleanUtterance { text, tags })
}

/// Remove fenced blocks and inline code spans.
fn strip_code(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    // Fenced blocks first.
    while let Some(open) = rest.find("```") {
        out.push_str(&rest[..open]);
        match rest[open + 3..].find("```") {
            Some(close) => rest = &rest[open + 3 + close + 3..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    // Inline spans.
    let mut cleaned = String::with_capacity(out.len());
    let mut remaining = out.as_str();
    while let Some(open) = remaining.find('`') {
        cleaned.push_str(&remaining[..open]);
        match remaining[open + 1..].find('`') {
            Some(close) => remaining = &remaining[open + 1 + close + 1..],
            None => {
                cleaned.push_str(&remaining[open + 1..]);
                remaining = "";
            }
        }
    }
    cleaned.push_str(remaining);
    cleaned
}

fn strip_directives(text: &str, tags: &mut Vec<String>) -> String {
    let trimmed = text.trim();
    let lowered = trimmed.to_lowercase();
    for prefix in DIRECTIVE_PREFIXES {
        if lowered.starts_with(prefix) {
            tags.push("directive_stripped".to_string());
            return trimmed[prefix.len()..].trim_start().to_string();
        }
    }
    trimmed.to_string()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_plain_text_through() {
        let clean = preprocess("My wife Lena loves Malbec").unwrap();
        assert_eq!(clean.text, "My wife Lena loves Malbec");
        assert!(clean.tags.is_empty());
    }

    #[test]
    fn empty_and_punctuation_yield_none() {
        assert!(preprocess("").is_none());
        assert!(preprocess("   ").is_none());
        assert!(preprocess("?!... —").is_none());
    }

    #[test]
    fn code_only_utterance_yields_none() {
        assert!(preprocess("```rust\nfn main() {}\n```").is_none());
    }

    #[test]
    fn strips_code_but_keeps_prose() {
        let clean = preprocess("I fixed it with ```let x = 1;``` yesterday, Lena helped").unwrap();
        assert!(!clean.text.contains("let x"));
        assert!(clean.text.contains("Lena helped"));
        assert!(clean.tags.contains(&"code_stripped".to_string()));
    }

    #[test]
    fn strips_extraction_directives() {
        let clean = preprocess("Remember that Lena loves Malbec").unwrap();
        assert_eq!(clean.text, "Lena loves Malbec");
        assert!(clean.tags.contains(&"directive_stripped".to_string()));
    }

    #[test]
    fn collapses_whitespace() {
        let clean = preprocess("Lena   loves\n\nMalbec").unwrap();
        assert_eq!(clean.text, "Lena loves Malbec");
    }
}
