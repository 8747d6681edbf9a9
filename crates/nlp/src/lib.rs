//! Message normalization: tokens, lemmas, stop-words, keyword categories and
//! literal entities. Deterministic and infallible.

pub mod entities;
pub mod tokenize;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use enquiry_core::{Category, NormalizedInput, Vocabulary};

pub use entities::extract_entities;
pub use tokenize::{tokenize, word_count};

#[derive(Debug, Clone)]
pub struct TextNormalizer {
    stop_words: BTreeSet<String>,
    lemmas: BTreeMap<String, String>,
    categories: Vec<(Category, BTreeSet<String>)>,
}

impl TextNormalizer {
    pub fn new(vocabulary: &Vocabulary) -> Self {
        Self {
            stop_words: vocabulary.stop_words.clone(),
            lemmas: vocabulary.lemmas.clone(),
            categories: vocabulary
                .categories
                .iter()
                .map(|(category, words)| (*category, words.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn lemmatize(&self, token: &str) -> String {
        self.lemmas
            .get(token)
            .cloned()
            .unwrap_or_else(|| token.to_string())
    }

    pub fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    pub fn normalize(&self, text: &str) -> NormalizedInput {
        let tokens: Vec<String> = tokenize(text)
            .iter()
            .map(|token| self.lemmatize(token))
            .collect();

        let mut seen = HashSet::new();
        let clean_tokens: Vec<String> = tokens
            .iter()
            .filter(|token| !self.is_stop_word(token))
            .filter(|token| seen.insert(token.as_str()))
            .cloned()
            .collect();

        let categories = self.categorize(&clean_tokens);

        NormalizedInput {
            original_text: text.to_string(),
            word_count: tokens.len(),
            clean_word_count: clean_tokens.len(),
            entities: extract_entities(text),
            tokens,
            clean_tokens,
            categories,
        }
    }

    /// Jaccard overlap of the stop-word-free token sets; 0.0 when either side is empty.
    pub fn similarity(&self, left: &str, right: &str) -> f32 {
        let left = self.content_words(left);
        let right = self.content_words(right);
        if left.is_empty() || right.is_empty() {
            return 0.0;
        }

        let shared = left.intersection(&right).count();
        let union = left.union(&right).count();
        shared as f32 / union as f32
    }

    fn content_words(&self, text: &str) -> BTreeSet<String> {
        tokenize(text)
            .into_iter()
            .filter(|token| !self.is_stop_word(token))
            .collect()
    }

    fn categorize(&self, clean_tokens: &[String]) -> BTreeMap<Category, Vec<String>> {
        let mut found = BTreeMap::new();
        for (category, words) in &self.categories {
            let hits: Vec<String> = clean_tokens
                .iter()
                .filter(|token| words.contains(*token))
                .cloned()
                .collect();
            if !hits.is_empty() {
                found.insert(*category, hits);
            }
        }
        found
    }
}
