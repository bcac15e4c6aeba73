//! Error types for the relationship mapping core
//!
//! Every failure the engine reports is a `ModelError`. The relationship
//! variants are programmer-facing and never retried; storage failures are
//! carried as-is from the query client.

use thiserror::Error;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// A preload, `has` or client lookup named a relation the schema never registered
    #[error("Relationship '{relation}' is not defined on model '{model}'")]
    UndefinedRelationship { model: String, relation: String },

    /// A key slot resolved to an attribute the schema does not declare
    #[error("'{model}.{attribute}' required by {context} is not a declared attribute")]
    UndefinedAttribute {
        model: String,
        attribute: String,
        context: String,
    },

    /// A parent record is missing the value needed to constrain a relation query
    #[error("Cannot query '{model}.{relation}': value for '{attribute}' is undefined")]
    MissingForeignKeyValue {
        model: String,
        relation: String,
        attribute: String,
    },

    /// A related record assigned to a parent does not satisfy the relation keys
    #[error("Cannot set '{model}.{relation}': {reason}")]
    MalformedRelationAssignment {
        model: String,
        relation: String,
        reason: String,
    },

    /// Operation is not available for this relation or client
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A required-result fetch returned nothing
    #[error("Row not found: {0}")]
    RowNotFound(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(String),

    /// Transaction begin/commit/rollback error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Query building error
    #[error("Query error: {0}")]
    Query(String),
}

impl ModelError {
    pub(crate) fn undefined_relationship(model: &str, relation: &str) -> Self {
        ModelError::UndefinedRelationship {
            model: model.to_string(),
            relation: relation.to_string(),
        }
    }

    pub(crate) fn missing_value(model: &str, relation: &str, attribute: &str) -> Self {
        ModelError::MissingForeignKeyValue {
            model: model.to_string(),
            relation: relation.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn malformed(model: &str, relation: &str, reason: impl Into<String>) -> Self {
        ModelError::MalformedRelationAssignment {
            model: model.to_string(),
            relation: relation.to_string(),
            reason: reason.into(),
        }
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ModelError::RowNotFound(err.to_string()),
            other => ModelError::Database(other.to_string()),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
