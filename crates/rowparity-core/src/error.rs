use thiserror::Error;

/// Core error type shared across rowparity crates.
///
/// Only [`Error::Config`] is fatal for a whole run; every other variant is
/// contained by the reconciliation job that raised it.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or incomplete configuration (missing instances, schema list, ...).
    #[error("configuration error: {0}")]
    Config(String),
    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),
    /// A statement failed on an open session.
    #[error("query error: {0}")]
    Query(String),
    /// Untrusted input (snapshot token, identifier) failed validation.
    #[error("validation error: {0}")]
    Validation(String),
    /// Source and destination table sets are not comparable table-for-table.
    #[error(
        "table sets differ for schema {schema}: source has {source_tables} table(s), destination has {destination_tables}"
    )]
    SchemaMismatch {
        schema: String,
        source_tables: usize,
        destination_tables: usize,
        only_source: Vec<String>,
        only_destination: Vec<String>,
    },
    /// Both sides have no table left to verify.
    #[error("schema {0} has no tables on either side, nothing to verify")]
    EmptySchema(String),
    /// Catch-all error for unexpected failures.
    #[error("other error: {0}")]
    Other(String),
}

impl Error {
    /// Short machine-friendly name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "configuration",
            Error::Connection(_) => "connection",
            Error::Query(_) => "query",
            Error::Validation(_) => "validation",
            Error::SchemaMismatch { .. } => "schema_mismatch",
            Error::EmptySchema(_) => "empty_schema",
            Error::Other(_) => "other",
        }
    }

    /// Human description including the tables found on one side only.
    pub fn detailed(&self) -> String {
        match self {
            Error::SchemaMismatch {
                only_source,
                only_destination,
                ..
            } => format!(
                "{self} (source only: {only_source:?}, destination only: {only_destination:?})"
            ),
            other => other.to_string(),
        }
    }
}

/// Convenience alias for results returned by rowparity crates.
pub type Result<T> = std::result::Result<T, Error>;
