//! Research metrics.
//!
//! Pure transformations of a research's stored responses into NPS,
//! CSAT/CES/CV, NEV, retention and comment summaries. Malformed answers
//! are skipped, empty input yields zeros, and the output depends only on
//! the multiset of responses: everything order-sensitive is sorted first.
//! [`MetricsAggregator`] is the store-backed loader around these.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::TimeZone;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::ingest::{research_responses, ModuleResponse};
use crate::storage::{EntityStore, Result};

pub mod emotions;
pub mod trust_flow;

pub use emotions::Polarity;
pub use trust_flow::{trust_flow, TrustFlowPoint};

/// Metric a step feeds, derived from its `stepType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Nps,
    Csat,
    Ces,
    Nev,
    Cv,
    Voc,
}

/// Checked in order; the first marker contained in the step type wins.
const STEP_MARKERS: [(&str, StepKind); 6] = [
    ("nps", StepKind::Nps),
    ("csat", StepKind::Csat),
    ("ces", StepKind::Ces),
    ("nev", StepKind::Nev),
    ("cv", StepKind::Cv),
    ("voc", StepKind::Voc),
];

/// Classify a step type, case-insensitively.
pub fn classify_step(step_type: &str) -> Option<StepKind> {
    let lower = step_type.to_lowercase();
    STEP_MARKERS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, kind)| *kind)
}

/// 1-5 scales rescaled to a 0-100 "satisfied" percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Csat,
    /// Lower effort is better, so the rescale is inverted.
    Ces,
    Cv,
}

impl Scale {
    /// Satisfied percentage of a 1-5 score, unrounded.
    pub fn satisfied(self, score: f64) -> f64 {
        match self {
            Scale::Csat | Scale::Cv => (score - 1.0) / 4.0 * 100.0,
            Scale::Ces => (5.0 - score) / 4.0 * 100.0,
        }
    }

    /// Whether a score counts toward the threshold percentage: CSAT of 4
    /// or more, CES of 2 or less. CV has no threshold.
    fn meets_threshold(self, score: f64) -> Option<bool> {
        match self {
            Scale::Csat => Some(score >= 4.0),
            Scale::Ces => Some(score <= 2.0),
            Scale::Cv => None,
        }
    }
}

/// Round half up.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

fn percentage(part: usize, whole: usize) -> i64 {
    if whole == 0 {
        return 0;
    }
    round_half_up(part as f64 / whole as f64 * 100.0)
}

/// Numeric score of an answer: a number, a numeric string, or either
/// wrapped as `{ "value": ... }`.
pub fn parse_score(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Object(map) => map.get("value").and_then(parse_score),
        _ => None,
    }?;
    score.is_finite().then_some(score)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NpsSummary {
    pub count: usize,
    /// Scores of 9-10.
    pub promoters: usize,
    /// Scores of 7-8.
    pub neutrals: usize,
    /// Scores of 0-6.
    pub detractors: usize,
    /// `(promoters - detractors) / count * 100`, rounded.
    pub score: i64,
}

/// Net Promoter Score over 0-10 scores. Out-of-range scores are ignored.
pub fn nps(scores: &[f64]) -> NpsSummary {
    let valid: Vec<f64> = scores
        .iter()
        .copied()
        .filter(|s| (0.0..=10.0).contains(s))
        .collect();
    let promoters = valid.iter().filter(|s| **s >= 9.0).count();
    let detractors = valid.iter().filter(|s| **s <= 6.0).count();
    let neutrals = valid.len() - promoters - detractors;

    let score = if valid.is_empty() {
        0
    } else {
        round_half_up((promoters as f64 - detractors as f64) / valid.len() as f64 * 100.0)
    };

    NpsSummary {
        count: valid.len(),
        promoters,
        neutrals,
        detractors,
        score,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSummary {
    pub count: usize,
    pub mean: f64,
    /// Rescaled mean, rounded.
    pub satisfied: i64,
    /// Complement of the rescaled mean, rounded independently.
    pub dissatisfied: i64,
    /// CSAT: share of scores >= 4. CES: share of scores <= 2. CV: absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold_percentage: Option<i64>,
}

/// Summarize 1-5 scores. Out-of-range scores are ignored.
pub fn scale_summary(scale: Scale, scores: &[f64]) -> ScaleSummary {
    let mut valid: Vec<f64> = scores
        .iter()
        .copied()
        .filter(|s| (1.0..=5.0).contains(s))
        .collect();
    valid.sort_by(f64::total_cmp);

    let threshold_percentage = match scale {
        Scale::Cv => None,
        Scale::Csat | Scale::Ces => {
            let hits = valid
                .iter()
                .filter(|s| scale.meets_threshold(**s) == Some(true))
                .count();
            Some(percentage(hits, valid.len()))
        }
    };

    if valid.is_empty() {
        return ScaleSummary {
            threshold_percentage,
            ..Default::default()
        };
    }

    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    let satisfied = scale.satisfied(mean);
    ScaleSummary {
        count: valid.len(),
        mean,
        satisfied: round_half_up(satisfied),
        dissatisfied: round_half_up(100.0 - satisfied),
        threshold_percentage,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NevSummary {
    pub positive: usize,
    pub negative: usize,
    /// Classified selections. Unknown labels are not counted.
    pub total: usize,
    /// `(positive - negative) / total * 100`, rounded.
    pub score: i64,
}

/// Net Emotional Value over per-response label selections.
///
/// Responses with no classified label contribute nothing, including to
/// the denominator.
pub fn nev<S: AsRef<str>>(selections: &[Vec<S>]) -> NevSummary {
    let mut positive = 0;
    let mut negative = 0;
    for labels in selections {
        for label in labels {
            match emotions::classify(label.as_ref()) {
                Some((_, Polarity::Positive)) => positive += 1,
                Some((_, Polarity::Negative)) => negative += 1,
                None => {}
            }
        }
    }

    let total = positive + negative;
    let score = if total == 0 {
        0
    } else {
        round_half_up((positive as f64 - negative as f64) / total as f64 * 100.0)
    };

    NevSummary {
        positive,
        negative,
        total,
        score,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionShare {
    pub name: &'static str,
    pub polarity: Polarity,
    pub count: usize,
    /// Share of all classified selections, rounded.
    pub percentage: i64,
}

/// Per-label counts in vocabulary order.
pub fn emotion_shares<S: AsRef<str>>(selections: &[Vec<S>]) -> Vec<EmotionShare> {
    let classified: Vec<&'static str> = selections
        .iter()
        .flatten()
        .filter_map(|label| emotions::classify(label.as_ref()))
        .map(|(name, _)| name)
        .collect();

    emotions::vocabulary()
        .map(|(name, polarity)| {
            let count = classified.iter().filter(|c| **c == name).count();
            EmotionShare {
                name,
                polarity,
                count,
                percentage: percentage(count, classified.len()),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterShare {
    pub name: &'static str,
    pub percentage: i64,
}

/// Cluster percentages derived from the per-label shares.
pub fn clusters(shares: &[EmotionShare]) -> Vec<ClusterShare> {
    emotions::CLUSTERS
        .iter()
        .map(|(cluster, label)| ClusterShare {
            name: cluster,
            percentage: shares
                .iter()
                .find(|s| s.name == *label)
                .map(|s| s.percentage)
                .unwrap_or(0),
        })
        .collect()
}

/// Reject empty, repetitive or symbol-only free text.
pub fn is_valid_comment(text: &str) -> bool {
    let text = text.trim();
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < 3 {
        return false;
    }
    if chars.iter().all(|c| *c == chars[0]) {
        return false;
    }
    let has_vowel = chars
        .iter()
        .any(|c| "aeiouáéíóúü".contains(c.to_lowercase().next().unwrap_or(*c)));
    if !has_vowel && chars.len() > 5 {
        return false;
    }
    if chars.iter().all(char::is_ascii_digit) {
        return false;
    }
    if chars
        .iter()
        .all(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace())
    {
        return false;
    }
    true
}

/// Free text of a VOC answer: a string or `{ "value": "..." }`.
fn comment_text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("value").and_then(comment_text),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VocComment {
    pub participant_id: String,
    pub step_id: String,
    pub text: String,
}

/// Everything derived from one research's responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Responses to a metric step.
    pub total_responses: usize,
    pub unique_participants: usize,
    pub nps: NpsSummary,
    pub csat: ScaleSummary,
    pub ces: ScaleSummary,
    pub cv: ScaleSummary,
    /// `(promoters + neutrals) / npsCount * 100`, rounded.
    pub retention: i64,
    pub nev: NevSummary,
    pub emotions: Vec<EmotionShare>,
    pub clusters: Vec<ClusterShare>,
    pub comments: Vec<VocComment>,
}

/// Summarize a research's responses.
pub fn summarize(responses: &[ModuleResponse]) -> MetricsSummary {
    let mut nps_scores = Vec::new();
    let mut csat_scores = Vec::new();
    let mut ces_scores = Vec::new();
    let mut cv_scores = Vec::new();
    let mut selections: Vec<Vec<String>> = Vec::new();
    let mut comments = Vec::new();
    let mut participants = BTreeSet::new();
    let mut total_responses = 0;

    for response in responses {
        let Some(kind) = classify_step(&response.step_type) else {
            continue;
        };
        total_responses += 1;
        participants.insert(response.participant_id.as_str());

        let skipped = match kind {
            StepKind::Nps => push_score(&mut nps_scores, &response.response),
            StepKind::Csat => push_score(&mut csat_scores, &response.response),
            StepKind::Ces => push_score(&mut ces_scores, &response.response),
            StepKind::Cv => push_score(&mut cv_scores, &response.response),
            StepKind::Nev => {
                selections.push(emotions::parse_selections(&response.response));
                false
            }
            StepKind::Voc => {
                if let Some(text) = comment_text(&response.response) {
                    if is_valid_comment(text) {
                        comments.push(VocComment {
                            participant_id: response.participant_id.clone(),
                            step_id: response.step_id.clone(),
                            text: text.trim().to_string(),
                        });
                    }
                }
                false
            }
        };
        if skipped {
            warn!(sk = %response.sk, step_type = %response.step_type, "Skipping unparseable score");
        }
    }

    comments.sort();
    let nps = nps(&nps_scores);
    let emotions = emotion_shares(&selections);

    MetricsSummary {
        total_responses,
        unique_participants: participants.len(),
        retention: percentage(nps.promoters + nps.neutrals, nps.count),
        nps,
        csat: scale_summary(Scale::Csat, &csat_scores),
        ces: scale_summary(Scale::Ces, &ces_scores),
        cv: scale_summary(Scale::Cv, &cv_scores),
        nev: nev(&selections),
        clusters: clusters(&emotions),
        emotions,
        comments,
    }
}

/// Returns true when the answer held no usable score.
fn push_score(scores: &mut Vec<f64>, value: &Value) -> bool {
    match parse_score(value) {
        Some(score) => {
            scores.push(score);
            false
        }
        None => true,
    }
}

/// Loads a research's responses and summarizes them.
pub struct MetricsAggregator {
    store: Arc<dyn EntityStore>,
}

impl MetricsAggregator {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub async fn summary(&self, research_id: &str) -> Result<MetricsSummary> {
        let responses = research_responses(self.store.as_ref(), research_id).await?;
        Ok(summarize(&responses))
    }

    /// Daily NPS/NEV for a research, bucketed in the viewer's time zone.
    pub async fn trust_flow<Tz: TimeZone>(
        &self,
        research_id: &str,
        tz: &Tz,
    ) -> Result<Vec<TrustFlowPoint>> {
        let responses = research_responses(self.store.as_ref(), research_id).await?;
        Ok(trust_flow(&responses, tz))
    }
}
