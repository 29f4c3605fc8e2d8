//! Key composition for the single-table layout.
//!
//! `id` is the owning research for everything research-scoped, so one
//! partition holds a research row, its configuration rows, its responses
//! and its participant sessions. `sk` encodes type and relationship.

use super::{Result, StorageError};

/// Separator between sort-key segments.
pub const SK_SEPARATOR: char = '#';

const RESEARCH_PREFIX: &str = "RESEARCH#";
const RESPONSE_PREFIX: &str = "RESPONSE#";
const SESSION_PREFIX: &str = "SESSION#";

/// Primary key of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub id: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(id: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sk: sk.into(),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.id, self.sk)
    }
}

/// Entity types stored in the table, as written to the `EntityType` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Research,
    WelcomeScreen,
    SmartVocForm,
    CognitiveTask,
    EyeTracking,
    ThankYouScreen,
    ModuleResponse,
    ParticipantSession,
}

impl EntityKind {
    pub const fn entity_type(self) -> &'static str {
        match self {
            EntityKind::Research => "RESEARCH",
            EntityKind::WelcomeScreen => "WELCOME_SCREEN",
            EntityKind::SmartVocForm => "SMART_VOC_FORM",
            EntityKind::CognitiveTask => "COGNITIVE_TASK",
            EntityKind::EyeTracking => "EYE_TRACKING_CONFIG",
            EntityKind::ThankYouScreen => "THANK_YOU_SCREEN",
            EntityKind::ModuleResponse => "MODULE_RESPONSE",
            EntityKind::ParticipantSession => "PARTICIPANT_SESSION",
        }
    }
}

/// Research-scoped configuration documents. One row per kind per research.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    WelcomeScreen,
    SmartVocForm,
    CognitiveTask,
    EyeTracking,
    ThankYouScreen,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 5] = [
        ConfigKind::WelcomeScreen,
        ConfigKind::SmartVocForm,
        ConfigKind::CognitiveTask,
        ConfigKind::EyeTracking,
        ConfigKind::ThankYouScreen,
    ];

    pub const fn entity_kind(self) -> EntityKind {
        match self {
            ConfigKind::WelcomeScreen => EntityKind::WelcomeScreen,
            ConfigKind::SmartVocForm => EntityKind::SmartVocForm,
            ConfigKind::CognitiveTask => EntityKind::CognitiveTask,
            ConfigKind::EyeTracking => EntityKind::EyeTracking,
            ConfigKind::ThankYouScreen => EntityKind::ThankYouScreen,
        }
    }

    /// Sort key of the configuration row. Equal to the entity type.
    pub const fn sort_key(self) -> &'static str {
        self.entity_kind().entity_type()
    }
}

/// Reject empty components and components containing the separator.
///
/// A `#` inside a participant or step id would let one participant's
/// prefix query match another participant's rows.
pub fn validate_component(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(StorageError::InvalidKey {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.contains(SK_SEPARATOR) {
        return Err(StorageError::InvalidKey {
            field,
            reason: format!("must not contain '{SK_SEPARATOR}'"),
        });
    }
    Ok(())
}

/// Key of a top-level research row.
pub fn research_key(research_id: &str) -> ItemKey {
    ItemKey::new(research_id, format!("{RESEARCH_PREFIX}{research_id}"))
}

/// Sort-key prefix shared by all research rows (for the type index).
pub fn research_prefix() -> &'static str {
    RESEARCH_PREFIX
}

/// Key of a research-scoped configuration row.
pub fn config_key(research_id: &str, kind: ConfigKind) -> ItemKey {
    ItemKey::new(research_id, kind.sort_key())
}

/// Key of one participant's answer to one step.
pub fn response_key(research_id: &str, participant_id: &str, step_id: &str) -> ItemKey {
    ItemKey::new(
        research_id,
        format!("{RESPONSE_PREFIX}{participant_id}{SK_SEPARATOR}{step_id}"),
    )
}

/// Prefix matching every response row of a research.
pub fn response_prefix() -> &'static str {
    RESPONSE_PREFIX
}

/// Prefix matching every response row of one participant.
pub fn participant_response_prefix(participant_id: &str) -> String {
    format!("{RESPONSE_PREFIX}{participant_id}{SK_SEPARATOR}")
}

/// Key of a participant's session row.
pub fn session_key(research_id: &str, participant_id: &str) -> ItemKey {
    ItemKey::new(research_id, format!("{SESSION_PREFIX}{participant_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_key_layout() {
        let key = response_key("r-1", "p-7", "smartvoc_nps");
        assert_eq!(key.id, "r-1");
        assert_eq!(key.sk, "RESPONSE#p-7#smartvoc_nps");
        assert!(key.sk.starts_with(&participant_response_prefix("p-7")));
        assert!(key.sk.starts_with(response_prefix()));
    }

    #[test]
    fn test_participant_prefix_does_not_match_longer_ids() {
        let other = response_key("r-1", "p-70", "welcome");
        assert!(!other.sk.starts_with(&participant_response_prefix("p-7")));
    }

    #[test]
    fn test_config_key_uses_kind_as_sort_key() {
        let key = config_key("r-1", ConfigKind::WelcomeScreen);
        assert_eq!(key, ItemKey::new("r-1", "WELCOME_SCREEN"));
        assert_eq!(ConfigKind::EyeTracking.sort_key(), "EYE_TRACKING_CONFIG");
    }

    #[test]
    fn test_research_and_session_keys() {
        assert_eq!(research_key("abc").sk, "RESEARCH#abc");
        assert_eq!(session_key("abc", "p1").sk, "SESSION#p1");
    }

    #[test]
    fn test_validate_component() {
        assert!(validate_component("participantId", "p-1").is_ok());
        assert!(matches!(
            validate_component("participantId", ""),
            Err(StorageError::InvalidKey { field: "participantId", .. })
        ));
        assert!(matches!(
            validate_component("stepId", "a#b"),
            Err(StorageError::InvalidKey { field: "stepId", .. })
        ));
    }
}
