//! Schema metadata for models and fields of a record store instance.
//!
//! These types are the database-agnostic view of what `read_schema` returns
//! over the wire: a model is a named record type, a field is either scalar
//! or relational, and relational fields carry the kind of relation plus the
//! related model name. The relation classifier lives here as
//! [`FieldDef::relation`], which derives a [`RelationDescriptor`] per field.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fields maintained by the store itself; never part of a migration payload.
pub const IMPLICIT_FIELDS: &[&str] = &[
    "id",
    "create_uid",
    "create_date",
    "write_uid",
    "write_date",
    "__last_update",
];

/// Kind of a relational field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Single reference to another model's record.
    ManyToOne,
    /// Inverse collection of records pointing back at this one.
    OneToMany,
    /// Symmetric collection relation.
    ManyToMany,
}

impl RelationKind {
    /// Whether the field value is a collection of ids rather than a single id.
    pub fn is_multi(&self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::ManyToOne => "many_to_one",
            RelationKind::OneToMany => "one_to_many",
            RelationKind::ManyToMany => "many_to_many",
        };
        f.write_str(s)
    }
}

/// Scalar field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    Text,
    Date,
    Datetime,
    Selection,
    Binary,
}

/// Field classification: scalar carrying a value, or a reference to records
/// of another model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarType),
    Relation { kind: RelationKind, model: String },
}

/// A relational field resolved to its traversal shape.
///
/// Derived, never stored: computed from the source schema at traversal time
/// and cached for the duration of a migration run via the schema cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Field name on the owning model.
    pub field_name: String,
    /// Relation kind, driving how the executor recurses.
    pub kind: RelationKind,
    /// The model the field points at.
    pub related_model: String,
}

/// Field metadata for one model field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, unique within the model.
    pub name: String,

    /// Scalar or relational classification.
    pub kind: FieldKind,

    /// Whether the store requires a value on create.
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    /// Scalar field constructor.
    pub fn scalar(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar(ty),
            required: false,
        }
    }

    /// Many-to-one field constructor.
    pub fn many_to_one(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::relation_field(name, RelationKind::ManyToOne, model)
    }

    /// One-to-many field constructor.
    pub fn one_to_many(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::relation_field(name, RelationKind::OneToMany, model)
    }

    /// Many-to-many field constructor.
    pub fn many_to_many(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self::relation_field(name, RelationKind::ManyToMany, model)
    }

    fn relation_field(
        name: impl Into<String>,
        kind: RelationKind,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Relation {
                kind,
                model: model.into(),
            },
            required: false,
        }
    }

    /// Mark the field as required on create.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Whether the field references another model.
    pub fn is_relational(&self) -> bool {
        matches!(self.kind, FieldKind::Relation { .. })
    }

    /// Classify the field as a relation, if it is one.
    pub fn relation(&self) -> Option<RelationDescriptor> {
        match &self.kind {
            FieldKind::Relation { kind, model } => Some(RelationDescriptor {
                field_name: self.name.clone(),
                kind: *kind,
                related_model: model.clone(),
            }),
            FieldKind::Scalar(_) => None,
        }
    }
}

/// Schema of one model: its name plus ordered field metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Model name, unique within an instance.
    pub model: String,

    /// Field definitions in schema order.
    pub fields: Vec<FieldDef>,
}

impl ModelSchema {
    /// Create a schema from a field list.
    pub fn new(model: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            model: model.into(),
            fields,
        }
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether the model has a field with this name.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over relational fields as descriptors.
    pub fn relation_fields(&self) -> impl Iterator<Item = RelationDescriptor> + '_ {
        self.fields.iter().filter_map(|f| f.relation())
    }

    /// Whether a field name is store-maintained and excluded from migration.
    pub fn is_implicit(name: &str) -> bool {
        IMPLICIT_FIELDS.contains(&name)
    }
}
