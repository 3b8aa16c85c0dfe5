use thiserror::Error;

use super::Value;

/// Coarse classification of [`SqlError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised before any SQL text is sent; never retried.
    Structural,
    /// The dialect reported a statement failure.
    Execution,
    /// A re-fetch or RETURNING result did not resolve to exactly one row.
    Cardinality,
    /// A field's `from_db` conversion failed.
    Decode,
    /// A statement was attempted through a finished transaction.
    TransactionCompleted,
}

#[derive(Error, Debug)]
pub enum SqlError {
    #[error("Field '{field}' not found in entity '{entity}'")]
    FieldNotFound { entity: String, field: String },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Missing identity field '{field}' for {operation} on entity '{entity}'")]
    MissingIdentity {
        entity: String,
        operation: String,
        field: String,
    },

    #[error("Invalid entity metadata: {0}")]
    InvalidMetadata(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("{message}\n  sql: {sql}")]
    Execution {
        message: String,
        sql: String,
        params: Vec<(String, Value)>,
    },

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Failed to {operation} row in '{entity}' - result contained {actual} rows, expected {expected}")]
    Cardinality {
        entity: String,
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to load from db: {entity}.{field}: {message}")]
    Decode {
        entity: String,
        field: String,
        message: String,
    },

    #[error("can't run a command after the transaction was completed")]
    TransactionCompleted,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, SqlError>;

impl SqlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FieldNotFound { .. }
            | Self::InvalidFilter(_)
            | Self::MissingIdentity { .. }
            | Self::InvalidMetadata(_)
            | Self::Conversion(_)
            | Self::UnsupportedOperation(_)
            | Self::Configuration(_) => ErrorKind::Structural,
            Self::Execution { .. } | Self::Driver(_) => ErrorKind::Execution,
            Self::Cardinality { .. } => ErrorKind::Cardinality,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::TransactionCompleted => ErrorKind::TransactionCompleted,
        }
    }

    pub(crate) fn field_not_found(entity: &str, field: &str) -> Self {
        Self::FieldNotFound {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn cardinality(entity: &str, operation: &str, actual: usize) -> Self {
        Self::Cardinality {
            entity: entity.to_string(),
            operation: operation.to_string(),
            expected: 1,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_message_reports_actual_rows() {
        let err = SqlError::cardinality("tasks", "insert", 2);
        assert_eq!(err.kind(), ErrorKind::Cardinality);
        assert!(err.to_string().contains("contained 2 rows"));
    }

    #[test]
    fn test_driver_errors_are_execution_errors() {
        assert_eq!(SqlError::Driver("disk I/O".into()).kind(), ErrorKind::Execution);
        assert_eq!(SqlError::TransactionCompleted.kind(), ErrorKind::TransactionCompleted);
    }
}
