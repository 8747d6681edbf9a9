use std::collections::BTreeMap;

use enquiry_core::{CategoryFallback, ClassificationResult, Intent, NormalizedInput};

/// Best scores under this are remapped through the category fallback table.
pub const CONFIDENCE_FLOOR: f32 = 0.3;
/// Confidence assigned when an intent is recovered from a category alone.
pub const FALLBACK_CONFIDENCE: f32 = 0.35;

/// Highest score, ties resolved toward the alphabetically first intent name.
pub(crate) fn best_intent(scores: &BTreeMap<Intent, f32>) -> Option<(Intent, f32)> {
    scores
        .iter()
        .map(|(intent, score)| (*intent, *score))
        .reduce(|best, candidate| {
            let better = candidate.1 > best.1
                || (candidate.1 == best.1 && candidate.0.as_str() < best.0.as_str());
            if better {
                candidate
            } else {
                best
            }
        })
}

pub(crate) fn resolve(
    scores: BTreeMap<Intent, f32>,
    fallback: &[CategoryFallback],
    input: &NormalizedInput,
) -> ClassificationResult {
    let (intent, confidence) = best_intent(&scores).unwrap_or((Intent::Unknown, 0.0));

    if intent != Intent::Unknown && confidence >= CONFIDENCE_FLOOR {
        return ClassificationResult {
            intent,
            confidence: confidence.clamp(0.0, 1.0),
            scores,
        };
    }

    match fallback
        .iter()
        .find(|entry| input.has_category(entry.category))
    {
        Some(entry) => ClassificationResult {
            intent: entry.intent,
            confidence: FALLBACK_CONFIDENCE,
            scores,
        },
        None => ClassificationResult::unknown(scores),
    }
}
