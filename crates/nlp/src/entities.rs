use std::collections::BTreeMap;

use enquiry_core::EntityKind;
use once_cell::sync::Lazy;
use regex::Regex;

static NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").expect("valid numbers regex"));
static EMAILS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});
static YEARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("valid years regex"));
static PERCENTAGES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?%").expect("valid percentage regex"));

/// Literal matches per entity kind. Kinds with no match are left out.
pub fn extract_entities(text: &str) -> BTreeMap<EntityKind, Vec<String>> {
    let extractors: [(EntityKind, &Regex); 4] = [
        (EntityKind::Numbers, &NUMBERS),
        (EntityKind::Emails, &EMAILS),
        (EntityKind::Years, &YEARS),
        (EntityKind::Percentages, &PERCENTAGES),
    ];

    extractors
        .into_iter()
        .filter_map(|(kind, pattern)| {
            let found: Vec<String> = pattern
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect();
            (!found.is_empty()).then_some((kind, found))
        })
        .collect()
}
