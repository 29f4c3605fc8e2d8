//! Emotion vocabulary for Net Emotional Value.

use serde::Serialize;
use serde_json::Value;

/// Labels counted as positive.
pub const POSITIVE_EMOTIONS: [&str; 12] = [
    "Feliz",
    "Satisfecho",
    "Confiado",
    "Valorado",
    "Cuidado",
    "Seguro",
    "Enfocado",
    "Indulgente",
    "Estimulado",
    "Exploratorio",
    "Interesado",
    "Enérgico",
];

/// Labels counted as negative.
pub const NEGATIVE_EMOTIONS: [&str; 8] = [
    "Descontento",
    "Frustrado",
    "Irritado",
    "Decepción",
    "Estresado",
    "Infeliz",
    "Desatendido",
    "Apresurado",
];

/// Emotion clusters and the label each one tracks.
pub const CLUSTERS: [(&str, &str); 4] = [
    ("Trust", "Confiado"),
    ("Loyalty", "Valorado"),
    ("Satisfaction", "Satisfecho"),
    ("Engagement", "Interesado"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

/// Every label in vocabulary order: positives, then negatives.
pub fn vocabulary() -> impl Iterator<Item = (&'static str, Polarity)> {
    POSITIVE_EMOTIONS
        .iter()
        .map(|e| (*e, Polarity::Positive))
        .chain(NEGATIVE_EMOTIONS.iter().map(|e| (*e, Polarity::Negative)))
}

/// Match a free-form label against the vocabulary, ignoring case and
/// surrounding whitespace. Returns the canonical label.
pub fn classify(label: &str) -> Option<(&'static str, Polarity)> {
    let wanted = label.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    vocabulary().find(|(name, _)| name.to_lowercase() == wanted)
}

/// Extract selected labels from an answer payload.
///
/// Accepts an array of labels, a comma-separated string, or either one
/// wrapped as `{ "value": ... }`. Anything else selects nothing.
pub fn parse_selections(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::Object(map) => map.get("value").map(parse_selections).unwrap_or_default(),
        _ => Vec::new(),
    }
}
