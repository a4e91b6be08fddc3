//! Migration map: the declared correspondence between source and target
//! models/fields, plus transformers and dedup search keys.
//!
//! A map is built manually via [`MigrationMap::register`], loaded from a
//! JSON file, or auto-generated from schema diffing (see
//! [`MigrationMap::generate_full_map`]). It is read-only during a migration
//! run: the executor holds an `Arc` and never mutates it.

mod generate;

pub use generate::ModelNode;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::value::{FieldValues, Value};
use crate::error::{MigrateError, Result};

/// Value transformer: maps the ordered source values of one mapping entry
/// to the destination value. Pure; errors are reported as strings and
/// wrapped into configuration errors at the call site.
pub type TransformFn = dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync;

/// Destination fields probed, in order, when no search keys are configured.
const DEFAULT_SEARCH_KEY_CANDIDATES: &[&str] = &["name", "display_name", "code", "reference"];

/// One field correspondence: one or more source fields feeding a single
/// destination field, optionally through a named transformer.
///
/// A multi-element `source` is many-to-one field folding and requires a
/// transformer to combine the values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Ordered source field names.
    #[serde(with = "one_or_many")]
    pub source: Vec<String>,

    /// Destination field name. Unique per model mapping.
    pub target: String,

    /// Name of a registered transformer, if any. Only the name is
    /// persisted; the function is re-registered programmatically after a
    /// map is loaded from file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<String>,
}

impl FieldMapping {
    /// Identity entry: same field name on both sides.
    pub fn identity(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source: vec![name.clone()],
            target: name,
            transformer: None,
        }
    }

    /// Renamed entry: one source field feeding a differently named
    /// destination field.
    pub fn renamed(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: vec![source.into()],
            target: target.into(),
            transformer: None,
        }
    }

    /// Transformed entry: source fields folded into the destination field
    /// through the named transformer.
    pub fn transformed<S: Into<String>>(
        source: impl IntoIterator<Item = S>,
        target: impl Into<String>,
        transformer: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into_iter().map(Into::into).collect(),
            target: target.into(),
            transformer: Some(transformer.into()),
        }
    }
}

/// Serialize a single-element source as a bare string, a folded source as a
/// list. Keeps the mapping file human-editable.
mod one_or_many {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S: Serializer>(v: &[String], ser: S) -> Result<S::Ok, S::Error> {
        match v {
            [single] => Repr::One(single.clone()).serialize(ser),
            _ => Repr::Many(v.to_vec()).serialize(ser),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
        Ok(match Repr::deserialize(de)? {
            Repr::One(s) => vec![s],
            Repr::Many(v) => v,
        })
    }
}

/// Mapping for one source model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMapping {
    /// Destination model name.
    pub target_model: String,

    /// Ordered field correspondences.
    pub fields: Vec<FieldMapping>,

    /// Destination fields used for dedup lookups, in priority order.
    /// Empty means "use the default heuristic".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_keys: Vec<String>,
}

impl ModelMapping {
    /// Mapping onto the given destination model, with no fields yet.
    pub fn new(target_model: impl Into<String>) -> Self {
        Self {
            target_model: target_model.into(),
            fields: Vec::new(),
            search_keys: Vec::new(),
        }
    }

    /// Append a field entry.
    pub fn field(mut self, entry: FieldMapping) -> Self {
        self.fields.push(entry);
        self
    }

    /// Set the dedup search keys.
    pub fn with_search_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.search_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// All source field names referenced by the mapping, in order, deduplicated.
    pub fn source_fields(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for entry in &self.fields {
            for f in &entry.source {
                if !out.iter().any(|e| e == f) {
                    out.push(f.clone());
                }
            }
        }
        out
    }

    /// Look up the entry feeding a destination field.
    pub fn entry_for_target(&self, target: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|e| e.target == target)
    }

    /// Look up the entry fed by a single source field.
    pub fn entry_for_source(&self, source: &str) -> Option<&FieldMapping> {
        self.fields
            .iter()
            .find(|e| e.source.len() == 1 && e.source[0] == source)
    }

    fn validate(&self, model: &str) -> Result<()> {
        let mut seen: Vec<&str> = Vec::new();
        for entry in &self.fields {
            if entry.source.is_empty() {
                return Err(MigrateError::config(format!(
                    "mapping for '{}': entry '{}' has no source fields",
                    model, entry.target
                )));
            }
            if seen.contains(&entry.target.as_str()) {
                return Err(MigrateError::config(format!(
                    "mapping for '{}': destination field '{}' mapped more than once",
                    model, entry.target
                )));
            }
            if entry.source.len() > 1 && entry.transformer.is_none() {
                return Err(MigrateError::config(format!(
                    "mapping for '{}': folded entry '{}' needs a transformer",
                    model, entry.target
                )));
            }
            seen.push(&entry.target);
        }
        Ok(())
    }
}

/// The migration map: per-source-model mappings plus the transformer
/// registry.
#[derive(Default)]
pub struct MigrationMap {
    models: HashMap<String, ModelMapping>,
    transformers: HashMap<String, Arc<TransformFn>>,
}

impl std::fmt::Debug for MigrationMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationMap")
            .field("models", &self.models)
            .field(
                "transformers",
                &self.transformers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MigrationMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model mapping; fails if the model is already registered.
    pub fn register(&mut self, source_model: impl Into<String>, mapping: ModelMapping) -> Result<()> {
        let source_model = source_model.into();
        if self.models.contains_key(&source_model) {
            return Err(MigrateError::config(format!(
                "model '{}' is already registered; use register_or_replace to overwrite",
                source_model
            )));
        }
        self.register_or_replace(source_model, mapping)
    }

    /// Register a model mapping, replacing any existing entry.
    pub fn register_or_replace(
        &mut self,
        source_model: impl Into<String>,
        mapping: ModelMapping,
    ) -> Result<()> {
        let source_model = source_model.into();
        mapping.validate(&source_model)?;
        self.models.insert(source_model, mapping);
        Ok(())
    }

    /// Register a transformer function under a name.
    pub fn register_transformer(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) {
        self.transformers.insert(name.into(), Arc::new(f));
    }

    /// Attach (or replace) the transformer for one destination field of a
    /// registered model, registering the function under `name`.
    pub fn add_transformer(
        &mut self,
        source_model: &str,
        destination_field: &str,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    ) -> Result<()> {
        let name = name.into();
        let mapping = self
            .models
            .get_mut(source_model)
            .ok_or_else(|| MigrateError::missing_mapping(source_model))?;
        let entry = mapping
            .fields
            .iter_mut()
            .find(|e| e.target == destination_field)
            .ok_or_else(|| {
                MigrateError::config(format!(
                    "mapping for '{}' has no destination field '{}'",
                    source_model, destination_field
                ))
            })?;
        entry.transformer = Some(name.clone());
        self.register_transformer(name, f);
        Ok(())
    }

    /// Registered source models, unordered.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Whether a model is registered.
    pub fn contains(&self, source_model: &str) -> bool {
        self.models.contains_key(source_model)
    }

    /// Get the mapping for a source model.
    pub fn get_mapping(&self, source_model: &str) -> Result<&ModelMapping> {
        self.models
            .get(source_model)
            .ok_or_else(|| MigrateError::missing_mapping(source_model))
    }

    /// Get the destination model name for a source model.
    pub fn get_target_model(&self, source_model: &str) -> Result<&str> {
        Ok(self.get_mapping(source_model)?.target_model.as_str())
    }

    /// Get the dedup search keys for a source model.
    ///
    /// Returns the configured keys, or a deterministic default: the first
    /// of `name`, `display_name`, `code`, `reference` present among the
    /// mapped destination fields, else `name`.
    pub fn get_search_keys(&self, source_model: &str) -> Result<Vec<String>> {
        let mapping = self.get_mapping(source_model)?;
        if !mapping.search_keys.is_empty() {
            return Ok(mapping.search_keys.clone());
        }
        Ok(default_search_keys(&mapping.fields))
    }

    /// Apply the field correspondence and transformers to raw source
    /// values, producing destination field values.
    ///
    /// Source fields absent from the mapping are dropped. Empty values
    /// (null, empty text, empty id list) are dropped; `false` and `0` are
    /// kept. Transformer failures and unregistered transformer names fail
    /// with a configuration error wrapping the cause.
    pub fn normalize_fields(&self, source_model: &str, raw: &FieldValues) -> Result<FieldValues> {
        let mapping = self.get_mapping(source_model)?;
        let mut out = FieldValues::new();

        for entry in &mapping.fields {
            let inputs: Vec<Value> = entry
                .source
                .iter()
                .map(|f| raw.get(f).cloned().unwrap_or(Value::Null))
                .collect();

            let value = match &entry.transformer {
                Some(name) => {
                    let f = self.transformers.get(name).ok_or_else(|| {
                        MigrateError::config(format!(
                            "transformer '{}' for {}.{} is not registered",
                            name, source_model, entry.target
                        ))
                    })?;
                    f(&inputs).map_err(|cause| {
                        MigrateError::config(format!(
                            "transformer '{}' failed for {}.{}: {}",
                            name, source_model, entry.target, cause
                        ))
                    })?
                }
                // validate() guarantees a single source when no transformer
                None => inputs.into_iter().next().unwrap_or(Value::Null),
            };

            if !value.is_empty() {
                out.insert(entry.target.clone(), value);
            }
        }

        Ok(out)
    }

    /// Serialize the map (without transformer functions) to a JSON file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.models)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load model mappings from a JSON file, merging into this map.
    ///
    /// Transformer references are kept by name only; the functions must be
    /// re-registered programmatically after loading. A malformed file fails
    /// with a configuration error naming the offending entry.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let raw: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            MigrateError::config(format!("mapping file {}: {}", path.display(), e))
        })?;

        let entries = raw.as_object().ok_or_else(|| {
            MigrateError::config(format!(
                "mapping file {}: expected an object keyed by source model",
                path.display()
            ))
        })?;

        for (model, value) in entries {
            let mapping: ModelMapping =
                serde_json::from_value(value.clone()).map_err(|e| {
                    MigrateError::config(format!(
                        "mapping file {}: entry '{}': {}",
                        path.display(),
                        model,
                        e
                    ))
                })?;
            self.register_or_replace(model.clone(), mapping)?;
        }
        Ok(())
    }

    /// Structural equality on the serializable part (model mappings).
    /// Transformer functions are not comparable and are ignored.
    pub fn same_mappings(&self, other: &MigrationMap) -> bool {
        self.models == other.models
    }
}

/// Default search keys derived from the mapped destination fields.
fn default_search_keys(fields: &[FieldMapping]) -> Vec<String> {
    for candidate in DEFAULT_SEARCH_KEY_CANDIDATES {
        if fields.iter().any(|e| e.target == *candidate) {
            return vec![candidate.to_string()];
        }
    }
    vec!["name".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partner_mapping() -> ModelMapping {
        ModelMapping::new("res.partner")
            .field(FieldMapping::identity("name"))
            .field(FieldMapping::renamed("category_id", "category_ids"))
            .with_search_keys(["name"])
    }

    #[test]
    fn test_register_roundtrip_identity() {
        let mut map = MigrationMap::new();
        let mapping = partner_mapping();
        map.register("res.partner", mapping.clone()).unwrap();
        assert_eq!(map.get_mapping("res.partner").unwrap(), &mapping);
        assert_eq!(map.get_target_model("res.partner").unwrap(), "res.partner");

        // lookups work from either side of the correspondence
        let entry = mapping.entry_for_source("category_id").unwrap();
        assert_eq!(entry.target, "category_ids");
        assert!(mapping.entry_for_source("category_ids").is_none());
    }

    #[test]
    fn test_register_twice_fails_without_overwrite() {
        let mut map = MigrationMap::new();
        map.register("res.partner", partner_mapping()).unwrap();
        let err = map.register("res.partner", partner_mapping()).unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));

        map.register_or_replace("res.partner", partner_mapping())
            .unwrap();
    }

    #[test]
    fn test_duplicate_destination_rejected() {
        let mut map = MigrationMap::new();
        let mapping = ModelMapping::new("res.partner")
            .field(FieldMapping::identity("name"))
            .field(FieldMapping::renamed("display_name", "name"));
        let err = map.register("res.partner", mapping).unwrap_err();
        assert!(err.to_string().contains("'name' mapped more than once"));
    }

    #[test]
    fn test_folded_entry_requires_transformer() {
        let mut map = MigrationMap::new();
        let mapping = ModelMapping::new("res.partner")
            .field(FieldMapping {
                source: vec!["street".into(), "city".into()],
                target: "address".into(),
                transformer: None,
            });
        let err = map.register("res.partner", mapping).unwrap_err();
        assert!(err.to_string().contains("needs a transformer"));
    }

    #[test]
    fn test_missing_model() {
        let map = MigrationMap::new();
        assert!(matches!(
            map.get_mapping("res.users").unwrap_err(),
            MigrateError::MissingMapping { .. }
        ));
        assert!(matches!(
            map.get_search_keys("res.users").unwrap_err(),
            MigrateError::MissingMapping { .. }
        ));
    }

    #[test]
    fn test_search_key_default_heuristic() {
        let mut map = MigrationMap::new();
        map.register(
            "res.currency",
            ModelMapping::new("res.currency")
                .field(FieldMapping::identity("code"))
                .field(FieldMapping::identity("rate")),
        )
        .unwrap();
        assert_eq!(map.get_search_keys("res.currency").unwrap(), vec!["code"]);

        map.register(
            "res.partner",
            ModelMapping::new("res.partner").field(FieldMapping::identity("email")),
        )
        .unwrap();
        // no candidate mapped: falls back to "name"
        assert_eq!(map.get_search_keys("res.partner").unwrap(), vec!["name"]);
    }

    #[test]
    fn test_normalize_fields_rename_and_drop() {
        let mut map = MigrationMap::new();
        map.register("res.partner", partner_mapping()).unwrap();

        let mut raw = FieldValues::new();
        raw.insert("name".into(), Value::text("Acme"));
        raw.insert("category_id".into(), Value::Ids(vec![7, 9]));
        raw.insert("unmapped".into(), Value::text("dropped"));
        raw.insert("active".into(), Value::Bool(false));

        let normalized = map.normalize_fields("res.partner", &raw).unwrap();
        assert_eq!(normalized.get("name"), Some(&Value::text("Acme")));
        assert_eq!(normalized.get("category_ids"), Some(&Value::Ids(vec![7, 9])));
        assert!(!normalized.contains_key("unmapped"));
        assert!(!normalized.contains_key("category_id"));
    }

    #[test]
    fn test_normalize_keeps_false_and_zero() {
        let mut map = MigrationMap::new();
        map.register(
            "res.partner",
            ModelMapping::new("res.partner")
                .field(FieldMapping::identity("active"))
                .field(FieldMapping::identity("color"))
                .field(FieldMapping::identity("comment")),
        )
        .unwrap();

        let mut raw = FieldValues::new();
        raw.insert("active".into(), Value::Bool(false));
        raw.insert("color".into(), Value::Int(0));
        raw.insert("comment".into(), Value::text(""));

        let normalized = map.normalize_fields("res.partner", &raw).unwrap();
        assert_eq!(normalized.get("active"), Some(&Value::Bool(false)));
        assert_eq!(normalized.get("color"), Some(&Value::Int(0)));
        assert!(!normalized.contains_key("comment"));
    }

    #[test]
    fn test_transformer_folding() {
        let mut map = MigrationMap::new();
        map.register(
            "res.partner",
            ModelMapping::new("res.partner").field(FieldMapping::transformed(
                ["street", "city"],
                "address",
                "join_address",
            )),
        )
        .unwrap();
        map.register_transformer("join_address", |vals| {
            let parts: Vec<&str> = vals
                .iter()
                .filter_map(|v| match v {
                    Value::Text(s) if !s.is_empty() => Some(s.as_str()),
                    _ => None,
                })
                .collect();
            Ok(Value::Text(parts.join(", ")))
        });

        let mut raw = FieldValues::new();
        raw.insert("street".into(), Value::text("5th Ave"));
        raw.insert("city".into(), Value::text("NYC"));

        let normalized = map.normalize_fields("res.partner", &raw).unwrap();
        assert_eq!(normalized.get("address"), Some(&Value::text("5th Ave, NYC")));
    }

    #[test]
    fn test_transformer_failure_wrapped_as_config() {
        let mut map = MigrationMap::new();
        map.register(
            "res.partner",
            ModelMapping::new("res.partner").field(FieldMapping::transformed(
                ["name"],
                "name",
                "explode",
            )),
        )
        .unwrap();
        map.register_transformer("explode", |_| Err("boom".to_string()));

        let mut raw = FieldValues::new();
        raw.insert("name".into(), Value::text("Acme"));

        let err = map.normalize_fields("res.partner", &raw).unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, MigrateError::Config(_)));
        assert!(msg.contains("explode"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_unregistered_transformer_is_config_error() {
        let mut map = MigrationMap::new();
        map.register(
            "res.partner",
            ModelMapping::new("res.partner").field(FieldMapping::transformed(
                ["name"],
                "name",
                "missing_fn",
            )),
        )
        .unwrap();

        let mut raw = FieldValues::new();
        raw.insert("name".into(), Value::text("Acme"));

        let err = map.normalize_fields("res.partner", &raw).unwrap_err();
        assert!(err.to_string().contains("missing_fn"));
    }

    #[test]
    fn test_add_transformer_requires_registered_model_and_field() {
        let mut map = MigrationMap::new();
        let err = map
            .add_transformer("res.partner", "name", "upper", |v| Ok(v[0].clone()))
            .unwrap_err();
        assert!(matches!(err, MigrateError::MissingMapping { .. }));

        map.register("res.partner", partner_mapping()).unwrap();
        let err = map
            .add_transformer("res.partner", "no_such_field", "upper", |v| Ok(v[0].clone()))
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));

        map.add_transformer("res.partner", "name", "upper", |v| match &v[0] {
            Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
            other => Ok(other.clone()),
        })
        .unwrap();

        let mut raw = FieldValues::new();
        raw.insert("name".into(), Value::text("acme"));
        let normalized = map.normalize_fields("res.partner", &raw).unwrap();
        assert_eq!(normalized.get("name"), Some(&Value::text("ACME")));
    }

    #[test]
    fn test_file_roundtrip() {
        let mut map = MigrationMap::new();
        map.register(
            "res.partner",
            partner_mapping().field(FieldMapping::transformed(
                ["street", "city"],
                "address",
                "join_address",
            )),
        )
        .unwrap();
        map.register(
            "res.partner.category",
            ModelMapping::new("res.partner.category").field(FieldMapping::identity("name")),
        )
        .unwrap();

        let file = tempfile::NamedTempFile::new().unwrap();
        map.save_to_file(file.path()).unwrap();

        let mut loaded = MigrationMap::new();
        loaded.load_from_file(file.path()).unwrap();
        assert!(map.same_mappings(&loaded));

        // transformer names survive; functions must be re-registered
        let entry = loaded
            .get_mapping("res.partner")
            .unwrap()
            .entry_for_target("address")
            .unwrap();
        assert_eq!(entry.transformer.as_deref(), Some("join_address"));
    }

    #[test]
    fn test_malformed_file_names_offending_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            r#"{"res.partner": {"fields": [{"source": "name", "target": "name"}]}}"#,
        )
        .unwrap();

        let mut map = MigrationMap::new();
        let err = map.load_from_file(&path).unwrap_err();
        // target_model is mandatory
        assert!(err.to_string().contains("res.partner"));
    }
}
