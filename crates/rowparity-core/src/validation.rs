use std::collections::BTreeSet;
use std::fmt;

use crate::config::{ReconcileConfig, TargetSelection};
use crate::error::{Error, Result};

/// Historical-read point of one side, validated as an integer.
///
/// Only a validated token may reach a `SET` directive, so arbitrary text from
/// the configuration can never be injected into a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotToken(i64);

impl SnapshotToken {
    /// Parse a signed decimal token; surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        raw.trim().parse::<i64>().map(SnapshotToken).map_err(|err| {
            Error::Validation(format!("invalid snapshot_ts value '{raw}': {err}"))
        })
    }

    /// Parse an optional raw token; blank input counts as absent.
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>> {
        match raw {
            Some(value) if !value.trim().is_empty() => Self::parse(value).map(Some),
            _ => Ok(None),
        }
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SnapshotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build the table set of one side: ignored names removed, sorted, deduplicated.
pub fn table_set(tables: impl IntoIterator<Item = String>, ignore: &BTreeSet<String>) -> Vec<String> {
    let set: BTreeSet<String> = tables
        .into_iter()
        .filter(|table| !ignore.contains(table))
        .collect();
    set.into_iter().collect()
}

/// Split a `db.table` reference from the `tables` option.
pub fn parse_table_ref(value: &str) -> Result<(String, String)> {
    let trimmed = value.trim();
    let mut parts = trimmed.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(schema), Some(table), None)
            if !schema.trim().is_empty() && !table.trim().is_empty() =>
        {
            Ok((schema.trim().to_string(), table.trim().to_string()))
        }
        _ => Err(Error::Config(format!(
            "invalid table reference '{trimmed}', expected db.table"
        ))),
    }
}

/// Validate a run configuration before any job starts.
///
/// This checks:
/// - concurrency and batch size are at least 1
/// - at least one compare item is selected
/// - the target selection is not empty
/// - ignore names and explicit tables are non-blank
pub fn validate_config(config: &ReconcileConfig) -> Result<()> {
    if config.concurrency == 0 {
        return Err(Error::Config("concurrency must be at least 1".to_string()));
    }
    if config.batch_size == 0 {
        return Err(Error::Config("batch_size must be at least 1".to_string()));
    }
    if config.connect_timeout.is_zero() {
        return Err(Error::Config(
            "connect_timeout_secs must be at least 1".to_string(),
        ));
    }
    if config.compare.is_empty() {
        return Err(Error::Config("compare selects nothing".to_string()));
    }

    match &config.targets {
        TargetSelection::Patterns(patterns) => {
            if patterns.iter().all(|pattern| pattern.trim().is_empty()) {
                return Err(Error::Config(
                    "no schema pattern given, set dbs or tables".to_string(),
                ));
            }
        }
        TargetSelection::Tables(tables) => {
            if tables.is_empty() {
                return Err(Error::Config(
                    "no table given, set dbs or tables".to_string(),
                ));
            }
            for (schema, names) in tables {
                if schema.trim().is_empty() || names.iter().any(|name| name.trim().is_empty()) {
                    return Err(Error::Config(format!(
                        "blank schema or table name in tables for '{schema}'"
                    )));
                }
            }
        }
    }

    if config.ignore_tables.iter().any(|name| name.trim().is_empty()) {
        return Err(Error::Config(
            "ignore_tables contains a blank name".to_string(),
        ));
    }

    Ok(())
}
