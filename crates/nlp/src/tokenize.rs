use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[[:punct:]]+").expect("valid punctuation regex"));

/// Lowercases, turns ASCII punctuation into spaces and splits on whitespace.
pub fn tokenize(input: &str) -> Vec<String> {
    let lowered = input.to_lowercase();
    PUNCTUATION
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Word count as a reader would see it; used for length-based escalation.
pub fn word_count(input: &str) -> usize {
    input.unicode_words().count()
}
