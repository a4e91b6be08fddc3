//! Record-oriented data-store migration engine.
//!
//! Moves records between two instances of a record store: a declarative
//! [`MigrationMap`] says which models and fields correspond, the
//! [`Executor`] reads source records, normalizes their values, recursively
//! resolves relational fields up to a configured depth, deduplicates
//! against the target through search keys and an optional tracking store,
//! and creates (or reuses, or updates) destination records.
//!
//! The transport to an actual store is an external collaborator behind the
//! [`Connection`] / [`ConnectionProvider`] traits; this crate ships the
//! engine, not an RPC client.
//!
//! ```no_run
//! use std::sync::Arc;
//! use record_migrate::{
//!     Executor, ExecutorOptions, FieldMapping, MigrationMap, ModelMapping,
//! };
//! # async fn run(
//! #     source: Arc<dyn record_migrate::Connection>,
//! #     target: Arc<dyn record_migrate::Connection>,
//! # ) -> record_migrate::Result<()> {
//! let mut map = MigrationMap::new();
//! map.register(
//!     "res.partner",
//!     ModelMapping::new("res.partner")
//!         .field(FieldMapping::identity("name"))
//!         .field(FieldMapping::renamed("category_id", "category_ids"))
//!         .with_search_keys(["name"]),
//! )?;
//!
//! let executor = Executor::new(Arc::new(map), source, target, ExecutorOptions::default())?;
//! let outcome = executor.migrate("res.partner", &[42]).await?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod report;
pub mod tracking;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::core::schema::{
    FieldDef, FieldKind, ModelSchema, RelationDescriptor, RelationKind, ScalarType,
};
pub use crate::core::traits::{CompareOp, Connection, ConnectionProvider, SearchCondition};
pub use crate::core::value::{FieldValues, Record, RecordId, Value};
pub use config::{Config, InstanceConfig};
pub use error::{MigrateError, Result};
pub use executor::{
    Action, ActionCounts, ConnectionManager, Executor, ExecutorOptions, Failure, MigrationOutcome,
    RecursionMode, Side, SupportedRelations,
};
pub use mapping::{FieldMapping, MigrationMap, ModelMapping, ModelNode, TransformFn};
pub use report::{Color, LogLevel, Reporter, SilentReporter, TracingReporter};
pub use tracking::{
    FileTrackingStore, MemoryTrackingStore, NoopTrackingStore, TrackedRecord, TrackingStore,
};
