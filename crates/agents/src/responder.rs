use std::collections::BTreeMap;

use enquiry_core::{render, ClassificationResult, Intent, IntentTable, SharedRng};
use tracing::warn;

/// Replaces a reply whose template could not be filled.
pub const TEMPLATE_APOLOGY: &str =
    "Sorry, I'm having trouble retrieving the information right now.";

const FOLLOW_UP_PICKS: usize = 3;

/// Confidence-tiered prefix for a local reply.
pub fn hedge(confidence: f32) -> Option<&'static str> {
    if confidence > 0.8 {
        None
    } else if confidence > 0.5 {
        Some("Here’s what I found: ")
    } else if confidence > 0.3 {
        Some("I believe this relates to your question. ")
    } else {
        None
    }
}

pub struct ResponseSelector {
    intents: IntentTable,
    fields: BTreeMap<String, String>,
    rng: SharedRng,
}

impl ResponseSelector {
    pub fn new(intents: IntentTable, fields: BTreeMap<String, String>, rng: SharedRng) -> Self {
        Self {
            intents,
            fields,
            rng,
        }
    }

    /// A rendered, hedged template for the classified intent.
    pub fn respond(&self, result: &ClassificationResult) -> String {
        let Some(template) = self.pick_template(result.intent) else {
            return TEMPLATE_APOLOGY.to_string();
        };

        let body = match render(template, &self.fields) {
            Ok(body) => body,
            Err(error) => {
                warn!(intent = result.intent.as_str(), error = %error, "template render failed");
                return TEMPLATE_APOLOGY.to_string();
            }
        };

        match hedge(result.confidence) {
            Some(prefix) => format!("{prefix}{body}"),
            None => body,
        }
    }

    /// Up to three follow-ups from the intent's pool. Intents without a pool
    /// borrow the greeting pool; `unknown` gets none.
    pub fn follow_ups(&self, intent: Intent) -> Vec<String> {
        if intent == Intent::Unknown {
            return Vec::new();
        }
        let pool = self
            .intents
            .spec(intent)
            .map(|spec| spec.follow_ups.as_slice())
            .filter(|pool| !pool.is_empty())
            .or_else(|| {
                self.intents
                    .spec(Intent::Greeting)
                    .map(|spec| spec.follow_ups.as_slice())
            })
            .unwrap_or_default();
        self.rng.sample(pool, FOLLOW_UP_PICKS)
    }

    fn pick_template(&self, intent: Intent) -> Option<&String> {
        let pool = self
            .intents
            .spec(intent)
            .filter(|spec| !spec.responses.is_empty())
            .or_else(|| self.intents.spec(Intent::Unknown))?;
        self.rng.choose(&pool.responses)
    }
}
