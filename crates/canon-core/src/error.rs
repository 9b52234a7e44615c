//! Error types for canon operations.
//!
//! Errors carry a structured [`ErrorCode`] so callers can tell apart the
//! failure classes the engine treats differently: validation problems are
//! rejected outright, collaborator failures degrade resolution, integrity
//! conflicts are absorbed, and store unavailability aborts the operation.

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for canon operations.
pub type CanonResult<T> = Result<T, CanonError>;

/// Main error type for all canon operations.
#[derive(Error, Debug)]
pub enum CanonError {
    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        details: HashMap<String, String>,
    },

    /// A referenced record does not exist.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        code: ErrorCode,
        resource: &'static str,
        id: String,
    },

    /// Embedding generation failed.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Vector index operation failed.
    #[error("Vector index error: {message}")]
    VectorIndex {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Disambiguation oracle failed or returned an unusable answer.
    #[error("Oracle error: {message}")]
    Oracle {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A uniqueness constraint rejected the write.
    #[error("Integrity conflict: {message}")]
    IntegrityConflict { message: String, code: ErrorCode },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The store cannot be reached at all.
    #[error("Store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An operation or collaborator call ran past its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Provider not supported.
    #[error("Provider not supported: {provider}")]
    UnsupportedProvider { provider: String },

    /// Network error talking to a remote provider.
    #[error("Network error: {message}")]
    Network {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValMissingField,
    ValOutOfRange,

    // Not found (NF_xxx)
    NfEntity,
    NfRelation,

    // Collaborators
    EmbGenerationFailed,
    VecOperationFailed,
    OrcDecisionFailed,
    OrcInvalidResponse,

    // Integrity (INT_xxx)
    IntDuplicateTriple,
    IntConstraint,

    // Database (DB_xxx)
    DbOperationFailed,
    DbUnavailable,

    // Network (NET_xxx)
    NetTimeout,
    NetConnectionFailed,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValMissingField => "VAL_002",
            ErrorCode::ValOutOfRange => "VAL_003",
            ErrorCode::NfEntity => "NF_001",
            ErrorCode::NfRelation => "NF_002",
            ErrorCode::EmbGenerationFailed => "EMB_001",
            ErrorCode::VecOperationFailed => "VEC_001",
            ErrorCode::OrcDecisionFailed => "ORC_001",
            ErrorCode::OrcInvalidResponse => "ORC_002",
            ErrorCode::IntDuplicateTriple => "INT_001",
            ErrorCode::IntConstraint => "INT_002",
            ErrorCode::DbOperationFailed => "DB_001",
            ErrorCode::DbUnavailable => "DB_002",
            ErrorCode::NetTimeout => "NET_001",
            ErrorCode::NetConnectionFailed => "NET_002",
            ErrorCode::Internal => "INT_999",
        }
    }
}

impl CanonError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
        }
    }

    /// Create a validation error for a value outside its allowed range.
    pub fn out_of_range(field: &str, value: impl std::fmt::Display, allowed: &str) -> Self {
        let mut details = HashMap::new();
        details.insert("field".to_string(), field.to_string());
        details.insert("value".to_string(), value.to_string());
        details.insert("allowed".to_string(), allowed.to_string());
        Self::Validation {
            message: format!("{} = {} is outside {}", field, value, allowed),
            code: ErrorCode::ValOutOfRange,
            details,
        }
    }

    /// Create a validation error for a missing or empty field.
    pub fn missing_field(field: &str) -> Self {
        let mut details = HashMap::new();
        details.insert("field".to_string(), field.to_string());
        Self::Validation {
            message: format!("'{}' must not be empty", field),
            code: ErrorCode::ValMissingField,
            details,
        }
    }

    /// Create a not found error for an entity.
    pub fn entity_not_found(id: i64) -> Self {
        Self::NotFound {
            message: format!("Entity with id '{}' not found", id),
            code: ErrorCode::NfEntity,
            resource: "entity",
            id: id.to_string(),
        }
    }

    /// Create a not found error for a relation.
    pub fn relation_not_found(id: i64) -> Self {
        Self::NotFound {
            message: format!("Relation with id '{}' not found", id),
            code: ErrorCode::NfRelation,
            resource: "relation",
            id: id.to_string(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbGenerationFailed,
            source: None,
        }
    }

    /// Create a vector index error.
    pub fn vector_index(message: impl Into<String>) -> Self {
        Self::VectorIndex {
            message: message.into(),
            code: ErrorCode::VecOperationFailed,
            source: None,
        }
    }

    /// Create an oracle error.
    pub fn oracle(message: impl Into<String>) -> Self {
        Self::Oracle {
            message: message.into(),
            code: ErrorCode::OrcDecisionFailed,
            source: None,
        }
    }

    /// Create an oracle error for a response that could not be interpreted.
    pub fn oracle_response(message: impl Into<String>) -> Self {
        Self::Oracle {
            message: message.into(),
            code: ErrorCode::OrcInvalidResponse,
            source: None,
        }
    }

    /// Create an integrity conflict for a duplicate relation triple.
    pub fn duplicate_triple(subject_id: i64, predicate: &str, object_id: i64) -> Self {
        Self::IntegrityConflict {
            message: format!(
                "relation ({}, {}, {}) already exists",
                subject_id, predicate, object_id
            ),
            code: ErrorCode::IntDuplicateTriple,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a store-unavailable error.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            code: ErrorCode::DbUnavailable,
            source: None,
        }
    }

    /// Create an API/network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            code: ErrorCode::NetConnectionFailed,
            source: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::NotFound { code, .. } => *code,
            Self::Embedding { code, .. } => *code,
            Self::VectorIndex { code, .. } => *code,
            Self::Oracle { code, .. } => *code,
            Self::IntegrityConflict { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::StoreUnavailable { code, .. } => *code,
            Self::Network { code, .. } => *code,
            Self::Timeout(_) => ErrorCode::NetTimeout,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this is a failure of an external collaborator (embedder,
    /// vector index, oracle) that resolution may degrade around.
    pub fn is_transient_collaborator(&self) -> bool {
        matches!(
            self,
            Self::Embedding { .. }
                | Self::VectorIndex { .. }
                | Self::Oracle { .. }
                | Self::Network { .. }
                | Self::Timeout(_)
        )
    }

    /// Whether this is a uniqueness conflict.
    pub fn is_integrity_conflict(&self) -> bool {
        matches!(self, Self::IntegrityConflict { .. })
    }

    /// Whether the whole enclosing operation must abort.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. } | Self::Cancelled)
    }
}

impl From<rusqlite::Error> for CanonError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode as Sqlite;

        match err.sqlite_error_code() {
            Some(Sqlite::ConstraintViolation) => Self::IntegrityConflict {
                message: err.to_string(),
                code: ErrorCode::IntConstraint,
            },
            Some(
                Sqlite::CannotOpen
                | Sqlite::SystemIoFailure
                | Sqlite::DatabaseBusy
                | Sqlite::DatabaseLocked
                | Sqlite::NotADatabase
                | Sqlite::DatabaseCorrupt,
            ) => Self::StoreUnavailable {
                message: err.to_string(),
                code: ErrorCode::DbUnavailable,
                source: Some(Box::new(err)),
            },
            _ => Self::Database {
                message: err.to_string(),
                code: ErrorCode::DbOperationFailed,
                source: Some(Box::new(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = CanonError::validation("Invalid input");
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert!(err.to_string().contains("Invalid input"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_out_of_range_carries_details() {
        let err = CanonError::out_of_range("depth", 9, "0..=5");
        match err {
            CanonError::Validation { details, code, .. } => {
                assert_eq!(code, ErrorCode::ValOutOfRange);
                assert_eq!(details["field"], "depth");
                assert_eq!(details["value"], "9");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classification() {
        assert!(CanonError::embedding("boom").is_transient_collaborator());
        assert!(CanonError::Timeout("oracle".into()).is_transient_collaborator());
        assert!(CanonError::duplicate_triple(1, "knows", 2).is_integrity_conflict());
        assert!(CanonError::store_unavailable("gone").is_fatal());
        assert!(CanonError::Cancelled.is_fatal());
        assert!(!CanonError::database("syntax").is_fatal());
    }

    #[test]
    fn test_sqlite_constraint_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (k TEXT PRIMARY KEY)", []).unwrap();
        conn.execute("INSERT INTO t (k) VALUES ('a')", []).unwrap();
        let err: CanonError = conn
            .execute("INSERT INTO t (k) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_integrity_conflict());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::ValInvalidInput.as_str(), "VAL_001");
        assert_eq!(ErrorCode::NfEntity.as_str(), "NF_001");
        assert_eq!(ErrorCode::DbUnavailable.as_str(), "DB_002");
    }
}
