//! Core types: schema metadata, field values, and connection contracts.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{FieldDef, FieldKind, ModelSchema, RelationDescriptor, RelationKind, ScalarType};
pub use traits::{CompareOp, Connection, ConnectionProvider, SearchCondition};
pub use value::{FieldValues, Record, RecordId, Value};
