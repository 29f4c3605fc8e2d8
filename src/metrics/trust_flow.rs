//! Daily NPS/NEV series ("trust flow").
//!
//! Responses are bucketed by calendar day in the viewer's time zone, so a
//! late-evening answer in UTC-6 lands on the day the viewer saw it.

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone};
use serde::Serialize;

use super::{classify_step, emotions, nev, nps, parse_score, StepKind};
use crate::ingest::ModuleResponse;

/// Metrics for one local calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustFlowPoint {
    pub date: NaiveDate,
    pub nps: i64,
    pub nps_responses: usize,
    pub nev: i64,
    pub nev_responses: usize,
}

#[derive(Default)]
struct DayBucket {
    nps_scores: Vec<f64>,
    selections: Vec<Vec<String>>,
}

/// One point per day holding at least one usable NPS or NEV answer,
/// ascending.
///
/// Each answer is dated by when it was first given (`created_at`); a later
/// re-entry that rewrites the row does not move it to the re-entry day.
pub fn trust_flow<Tz: TimeZone>(responses: &[ModuleResponse], tz: &Tz) -> Vec<TrustFlowPoint> {
    let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

    for response in responses {
        let day = response.created_at.with_timezone(tz).date_naive();
        match classify_step(&response.step_type) {
            Some(StepKind::Nps) => {
                if let Some(score) = parse_score(&response.response) {
                    days.entry(day).or_default().nps_scores.push(score);
                }
            }
            Some(StepKind::Nev) => {
                let labels = emotions::parse_selections(&response.response);
                if labels.iter().any(|l| emotions::classify(l).is_some()) {
                    days.entry(day).or_default().selections.push(labels);
                }
            }
            _ => {}
        }
    }

    days.into_iter()
        .filter_map(|(date, bucket)| {
            let nps = nps(&bucket.nps_scores);
            let nev = nev(&bucket.selections);
            (nps.count > 0 || nev.total > 0).then_some(TrustFlowPoint {
                date,
                nps: nps.score,
                nps_responses: nps.count,
                nev: nev.score,
                nev_responses: bucket.selections.len(),
            })
        })
        .collect()
}
