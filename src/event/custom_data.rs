use serde_json::json;
use serde_json::Value;

use crate::constants::REDACTED_FIELDS;
use crate::constants::REDACTED_VALUE;

/// Builds an event's custom data from ordered request form fields.
///
/// Produces `[{"name": ..., "value": ...}]` in first-seen order. A name that
/// appears more than once gets an array of values. Sensitive field values are
/// replaced by a fixed mask so secrets never reach the audit log.
pub fn custom_data_from_form(fields: &[(String, String)]) -> Value {
    let mut entries: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in fields {
        let value = if is_redacted(name) {
            REDACTED_VALUE.to_string()
        } else {
            value.clone()
        };
        match entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => entries.push((name.clone(), vec![value])),
        }
    }

    Value::Array(
        entries
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    Value::String(values.remove(0))
                } else {
                    json!(values)
                };
                json!({ "name": name, "value": value })
            })
            .collect(),
    )
}

fn is_redacted(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    REDACTED_FIELDS.iter().any(|f| *f == name)
}
