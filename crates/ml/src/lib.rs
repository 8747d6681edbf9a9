mod floor;
mod overlap;
mod weighted;

use std::env;
use std::sync::Arc;

use enquiry_core::{ClassificationResult, EnquiryError, IntentTable, NormalizedInput};
use enquiry_nlp::TextNormalizer;
use serde::{Deserialize, Serialize};

pub use floor::{CONFIDENCE_FLOOR, FALLBACK_CONFIDENCE};
pub use overlap::KeywordOverlapClassifier;
pub use weighted::WeightedIntentClassifier;

pub trait IntentClassifier: Send + Sync {
    fn model_name(&self) -> &'static str;

    /// Builds the per-intent profiles. Calling it again replaces them.
    fn train(&mut self, intents: &IntentTable, normalizer: &TextNormalizer);

    fn classify(&self, input: &NormalizedInput) -> Result<ClassificationResult, EnquiryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    Weighted,
    Overlap,
}

impl ClassifierKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "weighted" => Some(Self::Weighted),
            "overlap" | "keyword" => Some(Self::Overlap),
            _ => None,
        }
    }

    /// `ENQUIRY_CLASSIFIER`, falling back to the weighted scheme.
    pub fn from_env() -> Self {
        env::var("ENQUIRY_CLASSIFIER")
            .ok()
            .and_then(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

/// A trained classifier of the requested kind.
pub fn load_classifier(
    kind: ClassifierKind,
    intents: &IntentTable,
    normalizer: &TextNormalizer,
) -> Arc<dyn IntentClassifier> {
    match kind {
        ClassifierKind::Weighted => {
            Arc::new(WeightedIntentClassifier::trained(intents, normalizer))
        }
        ClassifierKind::Overlap => {
            Arc::new(KeywordOverlapClassifier::trained(intents, normalizer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enquiry_core::{Intent, KnowledgeBase};

    #[test]
    fn parses_kind_names() {
        assert_eq!(ClassifierKind::parse("Weighted"), Some(ClassifierKind::Weighted));
        assert_eq!(ClassifierKind::parse(" overlap "), Some(ClassifierKind::Overlap));
        assert_eq!(ClassifierKind::parse("neural"), None);
    }

    #[test]
    fn both_kinds_agree_on_clear_cases() {
        let knowledge = KnowledgeBase::builtin().unwrap();
        let normalizer = TextNormalizer::new(&knowledge.vocabulary);
        for kind in [ClassifierKind::Weighted, ClassifierKind::Overlap] {
            let classifier = load_classifier(kind, &knowledge.intents, &normalizer);
            let result = classifier
                .classify(&normalizer.normalize("asdf qwer zxcv"))
                .unwrap();
            assert_eq!(result.intent, Intent::Unknown, "{}", classifier.model_name());
            let result = classifier
                .classify(&normalizer.normalize("placement salary"))
                .unwrap();
            assert_eq!(result.intent, Intent::PlacementInfo, "{}", classifier.model_name());
        }
    }
}
