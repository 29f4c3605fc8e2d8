//! Participant environment metadata and its re-entry merge.
//!
//! Every stored answer carries the participant's device, location, timing,
//! session and technical context. On re-entry the incoming metadata is
//! merged onto the stored one instead of replacing it, so fields supplied
//! on an earlier visit survive a later request that omits them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Device class reported by the participant client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub platform: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Time spent in one section of the study, epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTiming {
    pub section_id: String,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_timings: Option<Vec<SectionTiming>>,
}

/// Session counters. Required on every ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Times the participant left and resumed. Counted by the client.
    pub reentry_count: u32,
    /// Epoch milliseconds.
    pub session_start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visit_time: Option<i64>,
    /// Milliseconds.
    pub total_session_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_first_visit: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnicalInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Metadata attached to a module response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_info: Option<LocationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing_info: Option<TimingInfo>,
    pub session_info: SessionInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_info: Option<TechnicalInfo>,
    /// Sub-objects this crate does not model, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResponseMetadata {
    /// Metadata with only the required session block.
    pub fn with_session(session_info: SessionInfo) -> Self {
        Self {
            device_info: None,
            location_info: None,
            timing_info: None,
            session_info,
            technical_info: None,
            extra: Map::new(),
        }
    }
}

/// What to do when a re-entry arrives with a lower `reentryCount` than
/// the one already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReentryPolicy {
    /// Store the incoming value and log the regression.
    #[default]
    Accept,
    /// Keep the stored maximum.
    Clamp,
    /// Fail the ingestion with the conflict.
    Reject,
}

/// A `reentryCount` regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("reentryCount regressed from {stored} to {incoming}")]
pub struct MergeConflict {
    pub stored: u32,
    pub incoming: u32,
}

/// Merged metadata plus the regression it tolerated, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub metadata: ResponseMetadata,
    pub regression: Option<MergeConflict>,
}

/// Merge incoming metadata onto stored metadata.
///
/// Device, location, timing and technical blocks are replaced wholesale
/// when present in `incoming` and kept otherwise. Session counters come
/// from `incoming`; optional session fields it omits keep their stored
/// value. Unmodelled sub-objects are merged key by key.
pub fn merge(
    stored: &ResponseMetadata,
    incoming: ResponseMetadata,
    policy: ReentryPolicy,
) -> Result<Merged, MergeConflict> {
    let previous = stored.session_info.reentry_count;
    let mut session_info = incoming.session_info;

    let regression = (session_info.reentry_count < previous).then_some(MergeConflict {
        stored: previous,
        incoming: session_info.reentry_count,
    });

    if let Some(conflict) = regression {
        match policy {
            ReentryPolicy::Accept => {}
            ReentryPolicy::Clamp => session_info.reentry_count = previous,
            ReentryPolicy::Reject => return Err(conflict),
        }
    }

    session_info.last_visit_time = session_info
        .last_visit_time
        .or(stored.session_info.last_visit_time);
    session_info.is_first_visit = session_info
        .is_first_visit
        .or(stored.session_info.is_first_visit);

    let mut extra = stored.extra.clone();
    extra.extend(incoming.extra);

    Ok(Merged {
        metadata: ResponseMetadata {
            device_info: incoming.device_info.or_else(|| stored.device_info.clone()),
            location_info: incoming
                .location_info
                .or_else(|| stored.location_info.clone()),
            timing_info: incoming.timing_info.or_else(|| stored.timing_info.clone()),
            session_info,
            technical_info: incoming
                .technical_info
                .or_else(|| stored.technical_info.clone()),
            extra,
        },
        regression,
    })
}
