use std::collections::{BTreeMap, BTreeSet};

use enquiry_core::{
    CategoryFallback, ClassificationResult, EnquiryError, Intent, IntentTable, NormalizedInput,
};
use enquiry_nlp::TextNormalizer;

use crate::floor;
use crate::IntentClassifier;

/// Counts declared keywords present in the message; confidence is the winning
/// count over the total count across intents.
#[derive(Default)]
pub struct KeywordOverlapClassifier {
    model: Option<(Vec<(Intent, BTreeSet<String>)>, Vec<CategoryFallback>)>,
}

impl KeywordOverlapClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trained(intents: &IntentTable, normalizer: &TextNormalizer) -> Self {
        let mut classifier = Self::new();
        classifier.train(intents, normalizer);
        classifier
    }
}

impl IntentClassifier for KeywordOverlapClassifier {
    fn model_name(&self) -> &'static str {
        "overlap"
    }

    fn train(&mut self, intents: &IntentTable, normalizer: &TextNormalizer) {
        let keywords = intents
            .trainable()
            .map(|(intent, spec)| {
                let words = spec
                    .keywords
                    .iter()
                    .map(|keyword| normalizer.lemmatize(&keyword.to_lowercase()))
                    .collect();
                (intent, words)
            })
            .collect();
        self.model = Some((keywords, intents.category_fallback.clone()));
    }

    fn classify(&self, input: &NormalizedInput) -> Result<ClassificationResult, EnquiryError> {
        let (keywords, fallback) = self
            .model
            .as_ref()
            .ok_or(EnquiryError::ClassifierNotTrained)?;

        let counts: Vec<(Intent, usize)> = keywords
            .iter()
            .map(|(intent, words)| {
                let hits = input
                    .clean_tokens
                    .iter()
                    .filter(|token| words.contains(*token))
                    .count();
                (*intent, hits)
            })
            .collect();

        let total: usize = counts.iter().map(|(_, hits)| hits).sum();
        let scores: BTreeMap<Intent, f32> = counts
            .iter()
            .map(|(intent, hits)| (*intent, *hits as f32))
            .collect();

        let Some((best, best_hits)) = floor::best_intent(&scores).filter(|(_, hits)| *hits > 0.0) else {
            return Ok(floor::resolve(BTreeMap::new(), fallback, input).with_scores(scores));
        };

        let confidence = best_hits / total as f32;
        let normalized = BTreeMap::from([(best, confidence)]);
        Ok(floor::resolve(normalized, fallback, input).with_scores(scores))
    }
}
