use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EnquiryError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_.]+)\}").expect("valid placeholder regex"));

/// Substitutes every `{field}` in `template`. Fails on the first field absent from `fields`.
pub fn render(template: &str, fields: &BTreeMap<String, String>) -> Result<String, EnquiryError> {
    let mut rendered = String::with_capacity(template.len());
    let mut cursor = 0;

    for captures in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let value = fields
            .get(name.as_str())
            .ok_or_else(|| EnquiryError::MissingTemplateField(name.as_str().to_string()))?;
        rendered.push_str(&template[cursor..whole.start()]);
        rendered.push_str(value);
        cursor = whole.end();
    }

    rendered.push_str(&template[cursor..]);
    Ok(rendered)
}
