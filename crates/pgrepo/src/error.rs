//! Error types for pgrepo

use std::fmt;
use thiserror::Error;

/// Result type alias for pgrepo operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Integrity constraint families reported by PostgreSQL (SQLSTATE class 23).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `23505`
    Unique,
    /// `23503`
    ForeignKey,
    /// `23514`
    Check,
    /// `23502`
    NotNull,
}

impl ConstraintKind {
    fn from_sqlstate(code: &str) -> Option<Self> {
        match code {
            "23505" => Some(Self::Unique),
            "23503" => Some(Self::ForeignKey),
            "23514" => Some(Self::Check),
            "23502" => Some(Self::NotNull),
            _ => None,
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unique => "unique",
            Self::ForeignKey => "foreign key",
            Self::Check => "check",
            Self::NotNull => "not-null",
        })
    }
}

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Defect in calling code (e.g. building a statement without a table).
    #[error("Structural error: {0}")]
    Structural(String),

    /// Constraint violation, carrying the executor's native error unmodified.
    #[error("{kind} constraint violation: {source}")]
    Constraint {
        kind: ConstraintKind,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row decode / value encode error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// The entity deserializer rejected a field map
    #[error("Deserialize error: {0}")]
    Deserialize(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a structural error
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a structural (programmer) error
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::Unique)
    }

    /// Check if this is a foreign key violation error
    pub fn is_foreign_key_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::ForeignKey)
    }

    /// The violated constraint family, if this is a constraint error.
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            Self::Constraint { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The native database error behind a `Constraint` or `Query` error.
    pub fn db_error(&self) -> Option<&tokio_postgres::error::DbError> {
        match self {
            Self::Constraint { source, .. } | Self::Query(source) => source.as_db_error(),
            _ => None,
        }
    }

    /// Classify a tokio_postgres error by SQLSTATE without altering it.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        let kind = err
            .as_db_error()
            .and_then(|db_err| ConstraintKind::from_sqlstate(db_err.code().code()));
        match kind {
            Some(kind) => Self::Constraint { kind, source: err },
            None => Self::Query(err),
        }
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialize(err.to_string())
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_classification() {
        assert_eq!(
            ConstraintKind::from_sqlstate("23505"),
            Some(ConstraintKind::Unique)
        );
        assert_eq!(
            ConstraintKind::from_sqlstate("23503"),
            Some(ConstraintKind::ForeignKey)
        );
        assert_eq!(ConstraintKind::from_sqlstate("42P01"), None);
    }

    #[test]
    fn structural_is_not_a_constraint() {
        let err = OrmError::structural("table required");
        assert!(err.is_structural());
        assert!(!err.is_unique_violation());
        assert!(err.db_error().is_none());
        assert_eq!(err.to_string(), "Structural error: table required");
    }
}
