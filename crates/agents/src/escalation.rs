use enquiry_core::{ClassificationResult, Intent};
use enquiry_nlp::word_count;
use serde::Serialize;

pub const DEFAULT_ESCALATION_CONFIDENCE: f32 = 0.35;
pub const DEFAULT_WORD_LIMIT: usize = 20;

/// Phrases that mark a question as open-ended enough for a generative answer.
pub const COMPLEX_TRIGGERS: &[&str] = &[
    "compare",
    "comparison",
    " vs ",
    " vs. ",
    "versus",
    "difference between",
    "advantages",
    "disadvantages",
    "pros and cons",
    "explain",
    "how does",
    "why does",
    "latest",
    "trend",
    "future of",
    "job market",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EscalationReason {
    LowConfidence { confidence: f32 },
    UnknownIntent,
    LongMessage { words: usize },
    ComplexPhrase { phrase: String },
}

#[derive(Debug, Clone)]
pub struct EscalationPolicy {
    pub confidence_threshold: f32,
    pub word_limit: usize,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_ESCALATION_CONFIDENCE,
            word_limit: DEFAULT_WORD_LIMIT,
        }
    }
}

impl EscalationPolicy {
    /// First rule that makes the message eligible for an external answer.
    pub fn assess(&self, message: &str, result: &ClassificationResult) -> Option<EscalationReason> {
        if result.intent == Intent::Unknown {
            return Some(EscalationReason::UnknownIntent);
        }
        if result.confidence < self.confidence_threshold {
            return Some(EscalationReason::LowConfidence {
                confidence: result.confidence,
            });
        }

        let words = word_count(message);
        if words > self.word_limit {
            return Some(EscalationReason::LongMessage { words });
        }

        let padded = format!(" {} ", message.to_lowercase());
        COMPLEX_TRIGGERS
            .iter()
            .find(|phrase| padded.contains(*phrase))
            .map(|phrase| EscalationReason::ComplexPhrase {
                phrase: phrase.trim().to_string(),
            })
    }
}
