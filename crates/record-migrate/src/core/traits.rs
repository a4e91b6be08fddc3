//! Connection contracts consumed by the migration engine.
//!
//! The transport layer to a remote instance is an external collaborator:
//! the engine only requires an authenticated handle exposing schema
//! introspection and CRUD-like operations. Implementations live outside
//! this crate (an in-memory one backs the test suite).

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::InstanceConfig;
use crate::core::schema::ModelSchema;
use crate::core::value::{FieldValues, Record, RecordId, Value};
use crate::error::Result;

/// Comparison operator for search domains.
///
/// Equality is the only operator the engine needs; dedup lookups compare
/// search-key values exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
}

/// One condition of a search domain.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCondition {
    /// Field to compare.
    pub field: String,
    /// Comparison operator.
    pub op: CompareOp,
    /// Value to compare against.
    pub value: Value,
}

impl SearchCondition {
    /// Equality condition.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: CompareOp::Eq,
            value,
        }
    }
}

/// An authenticated handle to one instance of the record store.
///
/// All methods may block on network I/O; transport timeouts surface as
/// [`MigrateError::Connection`](crate::error::MigrateError::Connection).
#[async_trait]
pub trait Connection: Send + Sync {
    /// Read field metadata for a model.
    async fn read_schema(&self, model: &str) -> Result<ModelSchema>;

    /// Search record ids matching all conditions of the domain.
    async fn search(
        &self,
        model: &str,
        domain: &[SearchCondition],
        limit: Option<usize>,
    ) -> Result<Vec<RecordId>>;

    /// Read the given fields of the given records.
    async fn read(&self, model: &str, ids: &[RecordId], fields: &[String]) -> Result<Vec<Record>>;

    /// Create a record and return its id.
    async fn create(&self, model: &str, values: &FieldValues) -> Result<RecordId>;

    /// Update a record; returns true when the store applied the write.
    async fn write(&self, model: &str, id: RecordId, values: &FieldValues) -> Result<bool>;

    /// Session context of this handle (locale entries such as `lang`, `tz`).
    ///
    /// Transports without a session context keep the default.
    async fn context(&self) -> Result<FieldValues> {
        Ok(FieldValues::new())
    }

    /// Apply session context entries (locale matching, side-effect
    /// suppression flags on create). Default is a no-op.
    async fn set_context(&self, entries: &FieldValues) -> Result<()> {
        let _ = entries;
        Ok(())
    }
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Connection")
    }
}

/// Authenticates against an instance and produces a [`Connection`] handle.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Authenticate and return a usable handle.
    ///
    /// Fails with [`MigrateError::Connection`](crate::error::MigrateError::Connection)
    /// on unreachable host or rejected credentials.
    async fn authenticate(&self, instance: &InstanceConfig) -> Result<Arc<dyn Connection>>;
}
