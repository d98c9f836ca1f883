use crate::types::{EntityType, Identifier};

pub type Result<T> = std::result::Result<T, RelinkError>;

/// Boxed error from a storage collaborator.
pub type StorageSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Everything that can abort a rewrite pass.
///
/// None of these are retried: the pass stops at the first error and records
/// already persisted stay rewritten.
#[derive(Debug, thiserror::Error)]
pub enum RelinkError {
    #[error("invalid link mapping configuration: {0}")]
    InvalidConfig(String),

    #[error("could not parse link mapping configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("target entity type is required but missing: field {field} is empty in record {entity_type}:{uid}")]
    MissingTargetEntityType {
        entity_type: EntityType,
        field: String,
        uid: Identifier,
    },

    #[error("no mapping for old identifier {old_id} of {entity_type}")]
    UnmappedIdentifier {
        entity_type: EntityType,
        old_id: Identifier,
    },

    #[error("invalid selection expression '{expression}': {reason}")]
    InvalidSelection { expression: String, reason: String },

    #[error("document error in {entity_type}:{uid}.{field}: {reason}")]
    Document {
        entity_type: EntityType,
        uid: Identifier,
        field: String,
        reason: String,
    },

    #[error("record of {entity_type} has no numeric uid")]
    RowWithoutIdentifier { entity_type: EntityType },

    #[error("storage error: {0}")]
    Storage(#[source] StorageSource),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelinkError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    pub fn invalid_selection(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelection {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(source: impl Into<StorageSource>) -> Self {
        Self::Storage(source.into())
    }
}
