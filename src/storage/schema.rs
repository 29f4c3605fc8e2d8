//! Single-table schema definition.
//!
//! Every entity type shares one physical table. The catalog below is the
//! only place access patterns are declared; the provisioner turns it into
//! a `CreateTable` request and compares it against what already exists.
//!
//! ## Table Schema
//!
//! ```text
//! Table: research-store-dev (configurable via DYNAMODB_TABLE)
//!
//! Primary Key:
//!   - id (String, Partition Key)
//!   - sk (String, Sort Key): entity type + relationship, e.g. "WELCOME_SCREEN",
//!     "RESPONSE#<participantId>#<stepId>"
//!
//! Global Secondary Indexes (projection ALL):
//!   - userId-index             userId     / sk
//!   - EntityTypeSkIndex        EntityType / sk
//!   - researchId-index         researchId / sk
//!   - ResearchParticipantIndex researchId / participantId
//! ```

/// Partition key attribute.
pub const ATTR_ID: &str = "id";

/// Sort key attribute.
pub const ATTR_SK: &str = "sk";

/// Owner of top-level research rows.
pub const ATTR_USER_ID: &str = "userId";

/// Entity type discriminator.
pub const ATTR_ENTITY_TYPE: &str = "EntityType";

/// Research scope of sub-entities.
pub const ATTR_RESEARCH_ID: &str = "researchId";

/// Participant owning a response or session row.
pub const ATTR_PARTICIPANT_ID: &str = "participantId";

/// Optimistic concurrency counter (not part of any key).
pub const ATTR_VERSION: &str = "version";

pub const INDEX_USER_ID: &str = "userId-index";
pub const INDEX_ENTITY_TYPE: &str = "EntityTypeSkIndex";
pub const INDEX_RESEARCH_ID: &str = "researchId-index";
pub const INDEX_RESEARCH_PARTICIPANT: &str = "ResearchParticipantIndex";

/// Default table name when no configuration overrides it.
pub const DEFAULT_TABLE_NAME: &str = "research-store-dev";

/// Key schema of the base table or of one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchema {
    /// HASH attribute.
    pub partition_key: &'static str,
    /// RANGE attribute.
    pub sort_key: &'static str,
}

/// A required global secondary index. Projection is always ALL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: &'static str,
    pub key_schema: KeySchema,
}

/// Declarative description of the shared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCatalog {
    /// Attributes used in any key schema. All are string-typed.
    pub attributes: &'static [&'static str],
    pub key_schema: KeySchema,
    pub indexes: &'static [IndexDefinition],
}

/// The catalog every component provisions and queries against.
pub const CATALOG: SchemaCatalog = SchemaCatalog {
    attributes: &[
        ATTR_ID,
        ATTR_SK,
        ATTR_USER_ID,
        ATTR_ENTITY_TYPE,
        ATTR_RESEARCH_ID,
        ATTR_PARTICIPANT_ID,
    ],
    key_schema: KeySchema {
        partition_key: ATTR_ID,
        sort_key: ATTR_SK,
    },
    indexes: &[
        IndexDefinition {
            name: INDEX_USER_ID,
            key_schema: KeySchema {
                partition_key: ATTR_USER_ID,
                sort_key: ATTR_SK,
            },
        },
        IndexDefinition {
            name: INDEX_ENTITY_TYPE,
            key_schema: KeySchema {
                partition_key: ATTR_ENTITY_TYPE,
                sort_key: ATTR_SK,
            },
        },
        IndexDefinition {
            name: INDEX_RESEARCH_ID,
            key_schema: KeySchema {
                partition_key: ATTR_RESEARCH_ID,
                sort_key: ATTR_SK,
            },
        },
        IndexDefinition {
            name: INDEX_RESEARCH_PARTICIPANT,
            key_schema: KeySchema {
                partition_key: ATTR_RESEARCH_ID,
                sort_key: ATTR_PARTICIPANT_ID,
            },
        },
    ],
};

impl SchemaCatalog {
    /// Look up an index definition by name.
    pub fn index(&self, name: &str) -> Option<&'static IndexDefinition> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    /// Names of every required index, in declaration order.
    pub fn required_index_names(&self) -> impl Iterator<Item = &'static str> {
        self.indexes.iter().map(|idx| idx.name)
    }

    /// Required indexes absent from `existing`, in declaration order.
    pub fn missing_indexes<S: AsRef<str>>(&self, existing: &[S]) -> Vec<&'static str> {
        self.required_index_names()
            .filter(|name| !existing.iter().any(|e| e.as_ref() == *name))
            .collect()
    }

    /// Every attribute that appears in some key schema, base table or index.
    pub fn key_attributes(&self) -> impl Iterator<Item = &'static str> {
        let base = [self.key_schema.partition_key, self.key_schema.sort_key];
        base.into_iter().chain(
            self.indexes
                .iter()
                .flat_map(|idx| [idx.key_schema.partition_key, idx.key_schema.sort_key]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_declares_four_indexes() {
        let names: Vec<_> = CATALOG.required_index_names().collect();
        assert_eq!(
            names,
            vec![
                INDEX_USER_ID,
                INDEX_ENTITY_TYPE,
                INDEX_RESEARCH_ID,
                INDEX_RESEARCH_PARTICIPANT
            ]
        );
    }

    #[test]
    fn test_every_key_attribute_is_defined() {
        for attr in CATALOG.key_attributes() {
            assert!(
                CATALOG.attributes.contains(&attr),
                "key attribute {attr} missing from attribute definitions"
            );
        }
    }

    #[test]
    fn test_every_defined_attribute_is_used_by_a_key() {
        let used: Vec<_> = CATALOG.key_attributes().collect();
        for attr in CATALOG.attributes {
            assert!(used.contains(attr), "attribute {attr} is defined but unused");
        }
    }

    #[test]
    fn test_missing_indexes() {
        let existing = vec!["userId-index".to_string(), "researchId-index".to_string()];
        assert_eq!(
            CATALOG.missing_indexes(&existing),
            vec![INDEX_ENTITY_TYPE, INDEX_RESEARCH_PARTICIPANT]
        );

        let all: Vec<_> = CATALOG.required_index_names().collect();
        assert!(CATALOG.missing_indexes(&all).is_empty());
    }

    #[test]
    fn test_index_lookup() {
        let idx = CATALOG.index(INDEX_RESEARCH_PARTICIPANT).unwrap();
        assert_eq!(idx.key_schema.partition_key, ATTR_RESEARCH_ID);
        assert_eq!(idx.key_schema.sort_key, ATTR_PARTICIPANT_ID);
        assert!(CATALOG.index("ResearchIndex").is_none());
    }
}
