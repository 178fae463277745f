//! Error types of the query engine.

use std::num::{ParseFloatError, ParseIntError};

/// Rejection of a query, raised before any storage is touched, or failure of
/// a store that is present but unreadable.
#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("invalid chromosome: {0:?}")]
    InvalidChromosome(String),
    #[error("invalid range {start}-{end}: start must be positive and not behind end")]
    InvalidRange { start: u64, end: u64 },
    #[error("unknown data kind: {0:?}")]
    UnknownDataKind(String),
    #[error("study and tissue must be given together for region listings")]
    StudyWithoutTissue,
    #[error("problem accessing {what}: {source}")]
    Storage {
        what: String,
        #[source]
        source: anyhow::Error,
    },
}

impl QueryError {
    pub fn storage<S: Into<String>, E: Into<anyhow::Error>>(what: S, source: E) -> Self {
        QueryError::Storage {
            what: what.into(),
            source: source.into(),
        }
    }
}

/// A stored row that cannot be turned into a record.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("expected {expected} columns but found {actual}")]
    ColumnCount { expected: usize, actual: usize },
    #[error("invalid integer in column {column}: {value:?} ({source})")]
    InvalidInt {
        column: &'static str,
        value: String,
        source: ParseIntError,
    },
    #[error("invalid number in column {column}: {value:?} ({source})")]
    InvalidFloat {
        column: &'static str,
        value: String,
        source: ParseFloatError,
    },
    #[error("invalid p-value: {0:?}")]
    InvalidPValue(String),
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn record_error_display() {
        let err = super::RecordError::ColumnCount {
            expected: 21,
            actual: 3,
        };
        assert_eq!("expected 21 columns but found 3", err.to_string());

        let source = "x".parse::<u64>().unwrap_err();
        let err = super::RecordError::InvalidInt {
            column: "position",
            value: "x".into(),
            source,
        };
        assert!(err.to_string().starts_with("invalid integer in column position: \"x\""));
    }

    #[test]
    fn query_error_storage() {
        let err = super::QueryError::storage("fine-mapping store", anyhow::anyhow!("locked"));
        assert_eq!("problem accessing fine-mapping store: locked", err.to_string());
    }
}
