use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::descriptor::InstanceDescriptor;
use crate::error::{Error, Result};
use crate::model::ObjectKind;

pub const DEFAULT_THRESHOLD: u64 = 0;
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// What a run compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareItem {
    Rows,
    Tables,
    Indexes,
    Views,
}

impl CompareItem {
    pub const ALL: [CompareItem; 4] = [
        CompareItem::Rows,
        CompareItem::Tables,
        CompareItem::Indexes,
        CompareItem::Views,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareItem::Rows => "rows",
            CompareItem::Tables => "tables",
            CompareItem::Indexes => "indexes",
            CompareItem::Views => "views",
        }
    }

    /// Object kind audited for this item, `None` for row counts.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            CompareItem::Rows => None,
            CompareItem::Tables => Some(ObjectKind::Tables),
            CompareItem::Indexes => Some(ObjectKind::Indexes),
            CompareItem::Views => Some(ObjectKind::Views),
        }
    }
}

impl FromStr for CompareItem {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rows" => Ok(CompareItem::Rows),
            "tables" => Ok(CompareItem::Tables),
            "indexes" => Ok(CompareItem::Indexes),
            "views" => Ok(CompareItem::Views),
            other => Err(Error::Config(format!(
                "unknown compare item '{other}', expected rows, tables, indexes or views"
            ))),
        }
    }
}

impl fmt::Display for CompareItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How row counts are obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// `COUNT(1)` per table, batched with `UNION ALL`.
    #[default]
    Exact,
    /// Table statistics kept by the engine; fast but approximate.
    Statistics,
}

impl FromStr for CountMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(CountMode::Exact),
            "statistics" | "stats" => Ok(CountMode::Statistics),
            other => Err(Error::Config(format!(
                "unknown count mode '{other}', expected exact or statistics"
            ))),
        }
    }
}

/// One side of the comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideConfig {
    pub instance: InstanceDescriptor,
    /// Raw historical-read token. Validated by each job, never here.
    pub snapshot_ts: Option<String>,
}

impl SideConfig {
    pub fn new(instance: InstanceDescriptor) -> Self {
        Self {
            instance,
            snapshot_ts: None,
        }
    }

    pub fn with_snapshot(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.snapshot_ts = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }
}

/// Which schemas (and optionally which tables) a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    /// LIKE patterns resolved against the source catalog.
    Patterns(Vec<String>),
    /// Explicit tables grouped by schema; catalogs are not listed.
    Tables(BTreeMap<String, Vec<String>>),
}

/// Validated, immutable run configuration shared by every component.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub threshold: u64,
    pub concurrency: usize,
    pub batch_size: usize,
    pub compare: BTreeSet<CompareItem>,
    pub targets: TargetSelection,
    pub ignore_tables: BTreeSet<String>,
    pub count_mode: CountMode,
    pub connect_timeout: Duration,
    pub src: SideConfig,
    pub dst: SideConfig,
    pub output: Option<PathBuf>,
}

impl ReconcileConfig {
    /// Configuration with every option at its default.
    pub fn new(src: SideConfig, dst: SideConfig, targets: TargetSelection) -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            compare: CompareItem::ALL.into_iter().collect(),
            targets,
            ignore_tables: BTreeSet::new(),
            count_mode: CountMode::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            src,
            dst,
            output: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_config(self)
    }

    pub fn compares(&self, item: CompareItem) -> bool {
        self.compare.contains(&item)
    }

    /// Object kinds selected for the schema-level audit, in report order.
    pub fn object_kinds(&self) -> Vec<ObjectKind> {
        self.compare
            .iter()
            .filter_map(CompareItem::object_kind)
            .collect()
    }

    /// Explicit tables for `schema`, when the run was configured with `tables`.
    pub fn explicit_tables(&self, schema: &str) -> Option<&[String]> {
        match &self.targets {
            TargetSelection::Tables(tables) => tables.get(schema).map(Vec::as_slice),
            TargetSelection::Patterns(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_items_parse_case_insensitively() {
        assert_eq!(" Rows ".parse::<CompareItem>().unwrap(), CompareItem::Rows);
        assert_eq!("INDEXES".parse::<CompareItem>().unwrap(), CompareItem::Indexes);
        assert!(matches!(
            "columns".parse::<CompareItem>().unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn object_kinds_skip_rows() {
        let src = SideConfig::new(InstanceDescriptor::parse("mysql://u@a").unwrap());
        let dst = SideConfig::new(InstanceDescriptor::parse("mysql://u@b").unwrap());
        let mut config = ReconcileConfig::new(src, dst, TargetSelection::Patterns(vec!["%".into()]));
        assert_eq!(
            config.object_kinds(),
            vec![ObjectKind::Tables, ObjectKind::Indexes, ObjectKind::Views]
        );

        config.compare = [CompareItem::Rows, CompareItem::Views].into_iter().collect();
        assert_eq!(config.object_kinds(), vec![ObjectKind::Views]);
    }

    #[test]
    fn blank_snapshot_is_absent() {
        let side = SideConfig::new(InstanceDescriptor::parse("mysql://u@a").unwrap())
            .with_snapshot("   ");
        assert_eq!(side.snapshot_ts, None);
    }
}
