//! Title keyword extraction used by clustering.

pub const MAX_KEYWORDS: usize = 5;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "been", "be", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "may", "might", "must", "can", "this", "that", "these",
    "those",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// First significant tokens of `title`, in title order (not frequency-ranked).
pub fn extract_keywords(title: &str) -> Vec<String> {
    title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| token.chars().count() > 2 && !is_stop_word(token))
        .take(MAX_KEYWORDS)
        .map(ToString::to_string)
        .collect()
}
