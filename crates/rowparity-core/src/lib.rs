//! Core contracts and helpers for rowparity.
//!
//! This crate defines the reconciliation data model, the validated run
//! configuration, connection descriptors, and the validation helpers shared
//! by the adapters, the reconciliation engine and the CLI.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod model;
pub mod validation;

pub use config::{
    CompareItem, CountMode, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_THRESHOLD, ReconcileConfig, SideConfig, TargetSelection,
};
pub use descriptor::{Engine, InstanceDescriptor, RedactedConnection};
pub use error::{Error, Result};
pub use model::{
    ABSENT_COUNT, JobOutcome, JobStage, JobStatus, ObjectCountComparison, ObjectCountSnapshot,
    ObjectKind, RowCountRecord, RowStatus,
};
pub use validation::{SnapshotToken, parse_table_ref, table_set, validate_config};
