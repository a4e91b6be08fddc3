//! In-memory record store backing the test suite.
//!
//! `MemoryInstance` implements [`Connection`] over plain maps, so tests can
//! exercise the full executor path (schema introspection, search, read,
//! create, write, context) without any transport.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::InstanceConfig;

/// Install a test subscriber so `tracing` output lands in the captured
/// test output. Idempotent; later calls are no-ops.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
use crate::core::schema::{FieldDef, ModelSchema, ScalarType};
use crate::core::traits::{Connection, ConnectionProvider, SearchCondition};
use crate::core::value::{FieldValues, Record, RecordId, Value};
use crate::error::{MigrateError, Result};

#[derive(Default)]
struct Inner {
    schemas: HashMap<String, ModelSchema>,
    records: HashMap<String, BTreeMap<RecordId, FieldValues>>,
    context: FieldValues,
    failing: bool,
}

/// One fake instance: schemas plus records, everything behind a mutex so
/// tests can share it through an `Arc`.
#[derive(Default)]
pub(crate) struct MemoryInstance {
    inner: Mutex<Inner>,
}

impl MemoryInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_model(&self, schema: ModelSchema) {
        let mut inner = self.inner.lock().unwrap();
        inner.schemas.insert(schema.model.clone(), schema);
    }

    /// Insert a record with an assigned id.
    pub fn insert(&self, model: &str, values: FieldValues) -> RecordId {
        let mut inner = self.inner.lock().unwrap();
        let table = inner.records.entry(model.to_string()).or_default();
        let id = table.keys().max().copied().unwrap_or(0) + 1;
        table.insert(id, values);
        id
    }

    /// Insert a record under an explicit id.
    pub fn insert_with_id(&self, model: &str, id: RecordId, values: FieldValues) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .records
            .entry(model.to_string())
            .or_default()
            .insert(id, values);
    }

    pub fn record(&self, model: &str, id: RecordId) -> Option<FieldValues> {
        let inner = self.inner.lock().unwrap();
        inner.records.get(model).and_then(|t| t.get(&id)).cloned()
    }

    pub fn count(&self, model: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.records.get(model).map(|t| t.len()).unwrap_or(0)
    }

    /// When set, every operation fails with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().unwrap().failing = failing;
    }

    pub fn seed_context(&self, entries: FieldValues) {
        self.inner.lock().unwrap().context = entries;
    }

    pub fn context_entries(&self) -> FieldValues {
        self.inner.lock().unwrap().context.clone()
    }

    fn check_up(&self) -> Result<()> {
        if self.inner.lock().unwrap().failing {
            return Err(MigrateError::connection("simulated outage"));
        }
        Ok(())
    }
}

/// Equality used by search: a stored reference matches a plain id too.
fn values_match(stored: &Value, wanted: &Value) -> bool {
    if stored == wanted {
        return true;
    }
    match (stored.as_reference_id(), wanted.as_reference_id()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[async_trait]
impl Connection for MemoryInstance {
    async fn read_schema(&self, model: &str) -> Result<ModelSchema> {
        self.check_up()?;
        let inner = self.inner.lock().unwrap();
        inner
            .schemas
            .get(model)
            .cloned()
            .ok_or_else(|| MigrateError::connection(format!("no model '{}' on this instance", model)))
    }

    async fn search(
        &self,
        model: &str,
        domain: &[SearchCondition],
        limit: Option<usize>,
    ) -> Result<Vec<RecordId>> {
        self.check_up()?;
        let inner = self.inner.lock().unwrap();
        let Some(table) = inner.records.get(model) else {
            return Ok(Vec::new());
        };
        let mut ids: Vec<RecordId> = table
            .iter()
            .filter(|(_, values)| {
                domain.iter().all(|cond| {
                    values
                        .get(&cond.field)
                        .map(|stored| values_match(stored, &cond.value))
                        .unwrap_or(false)
                })
            })
            .map(|(&id, _)| id)
            .collect();
        if let Some(limit) = limit {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    async fn read(&self, model: &str, ids: &[RecordId], fields: &[String]) -> Result<Vec<Record>> {
        self.check_up()?;
        let inner = self.inner.lock().unwrap();
        let Some(table) = inner.records.get(model) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for &id in ids {
            if let Some(values) = table.get(&id) {
                let projected: FieldValues = fields
                    .iter()
                    .filter_map(|f| values.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                out.push(Record::new(id, projected));
            }
        }
        Ok(out)
    }

    async fn create(&self, model: &str, values: &FieldValues) -> Result<RecordId> {
        self.check_up()?;
        Ok(self.insert(model, values.clone()))
    }

    async fn write(&self, model: &str, id: RecordId, values: &FieldValues) -> Result<bool> {
        self.check_up()?;
        let mut inner = self.inner.lock().unwrap();
        let Some(existing) = inner.records.get_mut(model).and_then(|t| t.get_mut(&id)) else {
            return Ok(false);
        };
        for (k, v) in values {
            existing.insert(k.clone(), v.clone());
        }
        Ok(true)
    }

    async fn context(&self) -> Result<FieldValues> {
        self.check_up()?;
        Ok(self.context_entries())
    }

    async fn set_context(&self, entries: &FieldValues) -> Result<()> {
        self.check_up()?;
        let mut inner = self.inner.lock().unwrap();
        for (k, v) in entries {
            inner.context.insert(k.clone(), v.clone());
        }
        Ok(())
    }
}

/// Provider over named fake instances with one shared password.
pub(crate) struct MemoryProvider {
    instances: HashMap<String, Arc<MemoryInstance>>,
    password: String,
}

impl MemoryProvider {
    pub fn single(host: &str, instance: Arc<MemoryInstance>, password: &str) -> Self {
        let mut instances = HashMap::new();
        instances.insert(host.to_string(), instance);
        Self {
            instances,
            password: password.to_string(),
        }
    }

    pub fn with_instance(mut self, host: &str, instance: Arc<MemoryInstance>) -> Self {
        self.instances.insert(host.to_string(), instance);
        self
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn authenticate(&self, instance: &InstanceConfig) -> Result<Arc<dyn Connection>> {
        let handle = self.instances.get(&instance.host).ok_or_else(|| {
            MigrateError::connection(format!("host '{}' is unreachable", instance.host))
        })?;
        if instance.password != self.password {
            return Err(MigrateError::connection(format!(
                "login rejected for '{}' on [{}:{}]-[{}]",
                instance.user, instance.host, instance.port, instance.database
            )));
        }
        Ok(handle.clone())
    }
}

fn partner_schemas(instance: &MemoryInstance, multi_tag_field: &str) {
    instance.define_model(ModelSchema::new(
        "res.partner",
        vec![
            FieldDef::scalar("name", ScalarType::Text).required(),
            FieldDef::scalar("email", ScalarType::Text),
            FieldDef::scalar("active", ScalarType::Bool),
            FieldDef::many_to_one("country_id", "res.country"),
            FieldDef::many_to_many(multi_tag_field, "res.partner.category"),
            FieldDef::one_to_many("child_ids", "res.partner"),
        ],
    ));
    instance.define_model(ModelSchema::new(
        "res.country",
        vec![
            FieldDef::scalar("name", ScalarType::Text).required(),
            FieldDef::scalar("code", ScalarType::Text),
            FieldDef::many_to_one("currency_id", "res.currency"),
        ],
    ));
    instance.define_model(ModelSchema::new(
        "res.currency",
        vec![FieldDef::scalar("name", ScalarType::Text).required()],
    ));
    instance.define_model(ModelSchema::new(
        "res.partner.category",
        vec![FieldDef::scalar("name", ScalarType::Text).required()],
    ));
}

/// A source/target instance pair sharing the partner schema family
/// (partner, country, currency, category). The target names the partner
/// tag field `category_ids`, mirroring a renamed destination field.
pub(crate) fn partner_pair() -> (Arc<MemoryInstance>, Arc<MemoryInstance>) {
    let source = Arc::new(MemoryInstance::new());
    partner_schemas(&source, "category_id");
    let mut context = FieldValues::new();
    context.insert("lang".to_string(), Value::text("en_US"));
    context.insert("tz".to_string(), Value::text("UTC"));
    source.seed_context(context);

    let target = Arc::new(MemoryInstance::new());
    partner_schemas(&target, "category_ids");
    (source, target)
}

/// Mapping covering the partner schema family, dedup on `name` everywhere.
pub(crate) fn partner_map() -> crate::mapping::MigrationMap {
    use crate::mapping::{FieldMapping, MigrationMap, ModelMapping};

    let mut map = MigrationMap::new();
    map.register(
        "res.partner",
        ModelMapping::new("res.partner")
            .field(FieldMapping::identity("name"))
            .field(FieldMapping::identity("email"))
            .field(FieldMapping::identity("active"))
            .field(FieldMapping::identity("country_id"))
            .field(FieldMapping::renamed("category_id", "category_ids"))
            .field(FieldMapping::identity("child_ids"))
            .with_search_keys(["name"]),
    )
    .unwrap();
    map.register(
        "res.country",
        ModelMapping::new("res.country")
            .field(FieldMapping::identity("name"))
            .field(FieldMapping::identity("code"))
            .field(FieldMapping::identity("currency_id"))
            .with_search_keys(["name"]),
    )
    .unwrap();
    map.register(
        "res.currency",
        ModelMapping::new("res.currency")
            .field(FieldMapping::identity("name"))
            .with_search_keys(["name"]),
    )
    .unwrap();
    map.register(
        "res.partner.category",
        ModelMapping::new("res.partner.category")
            .field(FieldMapping::identity("name"))
            .with_search_keys(["name"]),
    )
    .unwrap();
    map
}
