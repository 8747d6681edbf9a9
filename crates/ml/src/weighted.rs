use std::collections::{BTreeMap, BTreeSet};

use enquiry_core::{
    Category, CategoryFallback, ClassificationResult, EnquiryError, Intent, IntentTable,
    NormalizedInput,
};
use enquiry_nlp::TextNormalizer;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::floor;
use crate::IntentClassifier;

const PATTERN_WEIGHT: f32 = 0.35;
const KEYWORD_WEIGHT: f32 = 0.45;
const CATEGORY_WEIGHT: f32 = 0.20;
const DECLARED_KEYWORD_BOOST: u32 = 2;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").expect("valid digits regex"));
static MODALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(can|could|would|will|please|kindly)\b").expect("valid modal regex")
});

struct ExamplePattern {
    regex: Regex,
    /// Length of the pattern source, used as the match-quality numerator.
    chars: usize,
}

struct IntentProfile {
    intent: Intent,
    patterns: Vec<ExamplePattern>,
    keyword_weights: BTreeMap<String, u32>,
    total_weight: u32,
    categories: Vec<Category>,
}

struct TrainedModel {
    profiles: Vec<IntentProfile>,
    fallback: Vec<CategoryFallback>,
}

/// Pattern, keyword and category evidence blended with fixed weights.
#[derive(Default)]
pub struct WeightedIntentClassifier {
    model: Option<TrainedModel>,
}

impl WeightedIntentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trained(intents: &IntentTable, normalizer: &TextNormalizer) -> Self {
        let mut classifier = Self::new();
        classifier.train(intents, normalizer);
        classifier
    }
}

impl IntentClassifier for WeightedIntentClassifier {
    fn model_name(&self) -> &'static str {
        "weighted"
    }

    fn train(&mut self, intents: &IntentTable, normalizer: &TextNormalizer) {
        let profiles = intents
            .trainable()
            .map(|(intent, spec)| {
                let patterns = spec
                    .examples
                    .iter()
                    .filter_map(|example| compile_pattern(example))
                    .collect();

                let mut keyword_weights: BTreeMap<String, u32> = BTreeMap::new();
                for example in &spec.examples {
                    for token in normalizer.normalize(example).clean_tokens {
                        *keyword_weights.entry(token).or_default() += 1;
                    }
                }
                let declared: BTreeSet<String> = spec
                    .keywords
                    .iter()
                    .map(|keyword| normalizer.lemmatize(&keyword.to_lowercase()))
                    .collect();
                for keyword in declared {
                    *keyword_weights.entry(keyword).or_default() += DECLARED_KEYWORD_BOOST;
                }
                let total_weight = keyword_weights.values().sum();

                IntentProfile {
                    intent,
                    patterns,
                    keyword_weights,
                    total_weight,
                    categories: spec.categories.clone(),
                }
            })
            .collect();

        self.model = Some(TrainedModel {
            profiles,
            fallback: intents.category_fallback.clone(),
        });
    }

    fn classify(&self, input: &NormalizedInput) -> Result<ClassificationResult, EnquiryError> {
        let model = self
            .model
            .as_ref()
            .ok_or(EnquiryError::ClassifierNotTrained)?;
        let text = input.original_text.to_lowercase();
        let text_chars = text.chars().count();

        let scores = model
            .profiles
            .iter()
            .map(|profile| {
                let combined = pattern_score(profile, &text, text_chars) * PATTERN_WEIGHT
                    + keyword_score(profile, input) * KEYWORD_WEIGHT
                    + category_score(profile, input) * CATEGORY_WEIGHT;
                (profile.intent, combined)
            })
            .collect();

        Ok(floor::resolve(scores, &model.fallback, input))
    }
}

/// Permissive regex for one example: digits generalized, modal verbs optional,
/// whitespace flexible, anchored nowhere.
fn compile_pattern(example: &str) -> Option<ExamplePattern> {
    let escaped = regex::escape(&example.to_lowercase());
    let digits = DIGITS.replace_all(&escaped, r"\d+");
    let modals = MODALS.replace_all(&digits, r"(?:\w+\s+)?");
    let source = format!(".*{}.*", modals.replace(' ', r"\s+"));
    let chars = source.chars().count();
    Regex::new(&source)
        .ok()
        .map(|regex| ExamplePattern { regex, chars })
}

fn pattern_score(profile: &IntentProfile, text: &str, text_chars: usize) -> f32 {
    profile
        .patterns
        .iter()
        .filter(|pattern| pattern.regex.is_match(text))
        .map(|pattern| (pattern.chars as f32 / (text_chars + 1) as f32).min(1.0))
        .fold(0.0, f32::max)
}

fn keyword_score(profile: &IntentProfile, input: &NormalizedInput) -> f32 {
    if profile.total_weight == 0 {
        return 0.0;
    }
    let matched: u32 = input
        .clean_tokens
        .iter()
        .filter_map(|token| profile.keyword_weights.get(token))
        .sum();
    (matched as f32 / profile.total_weight as f32).min(1.0)
}

fn category_score(profile: &IntentProfile, input: &NormalizedInput) -> f32 {
    if profile.categories.is_empty() {
        return 0.0;
    }
    let present = profile
        .categories
        .iter()
        .filter(|category| input.has_category(**category))
        .count();
    present as f32 / profile.categories.len() as f32
}
