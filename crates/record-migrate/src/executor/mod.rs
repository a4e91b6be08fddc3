//! Migration executor: reads source records, maps them, recursively
//! resolves relational fields, deduplicates against the target, and writes.
//!
//! Execution is logically sequential: one record at a time, relation
//! recursion on the call stack (boxed futures), bounded by the configured
//! depth ceiling checked before every descent. The only shared state is
//! the outcome accumulator owned by the top-level call and the optional
//! tracking store.

mod connect;
mod outcome;

pub use connect::ConnectionManager;
pub use outcome::{Action, ActionCounts, Failure, MigrationOutcome};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InstanceConfig;
use crate::core::schema::{ModelSchema, RelationKind};
use crate::core::traits::{Connection, ConnectionProvider, SearchCondition};
use crate::core::value::{FieldValues, RecordId, Value};
use crate::error::{MigrateError, Result};
use crate::mapping::MigrationMap;
use crate::report::{LogLevel, Reporter, TracingReporter};
use crate::tracking::TrackingStore;

/// Which side of the migration a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Target,
}

/// What to do when a relation cannot be traversed because of the
/// recursion ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionMode {
    /// Raise: the caller asked for more depth than the configuration
    /// allows, abort the run.
    #[default]
    Halt,
    /// Warn, drop the field from the payload, and keep running.
    Warn,
}

/// Relation kinds the executor traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedRelations {
    #[serde(default = "yes")]
    pub many_to_one: bool,
    #[serde(default = "yes")]
    pub one_to_many: bool,
    #[serde(default)]
    pub many_to_many: bool,
}

fn yes() -> bool {
    true
}

impl Default for SupportedRelations {
    fn default() -> Self {
        Self {
            many_to_one: true,
            one_to_many: true,
            many_to_many: false,
        }
    }
}

impl SupportedRelations {
    /// Every relation kind enabled.
    pub fn all() -> Self {
        Self {
            many_to_one: true,
            one_to_many: true,
            many_to_many: true,
        }
    }

    /// Whether a kind is traversed.
    pub fn supports(&self, kind: RelationKind) -> bool {
        match kind {
            RelationKind::ManyToOne => self.many_to_one,
            RelationKind::OneToMany => self.one_to_many,
            RelationKind::ManyToMany => self.many_to_many,
        }
    }
}

/// Record-creation and traversal options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorOptions {
    /// Recursion-depth ceiling for relation traversal.
    pub max_depth: usize,

    /// Records per processing batch (payload chunking and progress
    /// reporting, not a concurrency primitive).
    pub batch_size: usize,

    /// Reuse a matching target record instead of creating a duplicate.
    /// `false` forces duplication.
    pub skip_if_exists: bool,

    /// Update a matched target record with the normalized values.
    pub update_on_match: bool,

    /// Resolve and count everything, write nothing.
    pub dry_run: bool,

    /// Subscribe followers on created records (store-side side effect).
    pub subscribe_followers: bool,

    /// Let the store emit notifications for created records.
    pub notify_on_create: bool,

    /// Relation kinds to traverse.
    pub relations: SupportedRelations,

    /// Behavior at the recursion ceiling.
    pub recursion_mode: RecursionMode,

    /// Extra per-record reporting.
    pub debug: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_depth: 2,
            batch_size: 100,
            skip_if_exists: true,
            update_on_match: false,
            dry_run: false,
            subscribe_followers: false,
            notify_on_create: false,
            relations: SupportedRelations::default(),
            recursion_mode: RecursionMode::default(),
            debug: false,
        }
    }
}

/// Upper bound on the configurable ceiling; the ceiling is also the de
/// facto stack bound and must stay small.
const MAX_DEPTH_CEILING: usize = 16;

impl ExecutorOptions {
    /// Validate option values.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrateError::config("executor: batch_size must be positive"));
        }
        if self.max_depth > MAX_DEPTH_CEILING {
            return Err(MigrateError::config(format!(
                "executor: max_depth {} exceeds the supported ceiling {}",
                self.max_depth, MAX_DEPTH_CEILING
            )));
        }
        Ok(())
    }
}

/// Ephemeral state of one top-level `migrate` call.
struct RunContext {
    /// `(model, source id)` pairs on the current traversal branch.
    visited: HashSet<(String, RecordId)>,
    /// In-run resolution memo: a source record reached twice resolves to
    /// the same destination record.
    resolved: HashMap<(String, RecordId), RecordId>,
    outcome: MigrationOutcome,
    dry_run_seq: RecordId,
}

impl RunContext {
    fn new(run_id: String) -> Self {
        Self {
            visited: HashSet::new(),
            resolved: HashMap::new(),
            outcome: MigrationOutcome::new(run_id),
            dry_run_seq: 0,
        }
    }

    /// Placeholder destination ids so recursion keeps working without
    /// writes. Negative, so they can never collide with store ids.
    fn next_dry_run_id(&mut self) -> RecordId {
        self.dry_run_seq -= 1;
        self.dry_run_seq
    }
}

/// How one child record resolution ended.
enum Resolution {
    Resolved(RecordId),
    Pruned,
    Failed(MigrateError),
    Fatal(MigrateError),
}

/// The migration executor.
pub struct Executor {
    map: Arc<MigrationMap>,
    source: Arc<dyn Connection>,
    target: Arc<dyn Connection>,
    options: ExecutorOptions,
    tracking: Option<Arc<dyn TrackingStore>>,
    reporter: Arc<dyn Reporter>,
    manager: Option<ConnectionManager>,
    schema_cache: Mutex<HashMap<(Side, String), Arc<ModelSchema>>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Executor over already-authenticated handles.
    pub fn new(
        map: Arc<MigrationMap>,
        source: Arc<dyn Connection>,
        target: Arc<dyn Connection>,
        options: ExecutorOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            map,
            source,
            target,
            options,
            tracking: None,
            reporter: Arc::new(TracingReporter),
            manager: None,
            schema_cache: Mutex::new(HashMap::new()),
            cancel: None,
        })
    }

    /// Authenticate both instances through a provider and build an
    /// executor. The connection manager is kept for [`test_login`] and
    /// [`get_connection`].
    ///
    /// [`test_login`]: Executor::test_login
    /// [`get_connection`]: Executor::get_connection
    pub async fn connect(
        provider: Arc<dyn ConnectionProvider>,
        map: Arc<MigrationMap>,
        source: &InstanceConfig,
        target: &InstanceConfig,
        options: ExecutorOptions,
    ) -> Result<Self> {
        let manager = ConnectionManager::new(provider);
        let source_handle = manager.get_connection(source).await?;
        let target_handle = manager.get_connection(target).await?;
        let mut executor = Self::new(map, source_handle, target_handle, options)?;
        executor.manager = Some(manager);
        Ok(executor)
    }

    /// Enable the tracking store.
    pub fn with_tracking(mut self, store: Arc<dyn TrackingStore>) -> Self {
        info!("Tracking enabled ({} backend)", store.backend_type());
        self.tracking = Some(store);
        self
    }

    /// Replace the reporter (default: tracing-backed).
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Attach a cancellation signal, checked between top-level records.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// The configured options.
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Verify credentials against one instance; never errors.
    pub async fn test_login(&self, instance: &InstanceConfig) -> bool {
        match &self.manager {
            Some(manager) => manager.test_login(instance).await,
            None => {
                warn!("test_login unavailable: executor was built from raw handles");
                false
            }
        }
    }

    /// Authenticated (cached) handle for an arbitrary instance.
    pub async fn get_connection(&self, instance: &InstanceConfig) -> Result<Arc<dyn Connection>> {
        let manager = self.manager.as_ref().ok_or_else(|| {
            MigrateError::config("get_connection unavailable: executor was built from raw handles")
        })?;
        manager.get_connection(instance).await
    }

    /// Field metadata for a model, cached for the life of the executor.
    pub async fn get_fields(&self, side: Side, model: &str) -> Result<Arc<ModelSchema>> {
        let key = (side, model.to_string());
        if let Some(schema) = self.schema_cache.lock().unwrap().get(&key) {
            return Ok(schema.clone());
        }

        let connection = match side {
            Side::Source => &self.source,
            Side::Target => &self.target,
        };
        let schema = Arc::new(connection.read_schema(model).await?);
        self.schema_cache.lock().unwrap().insert(key, schema.clone());
        Ok(schema)
    }

    /// Copy locale context entries from source to target and apply the
    /// record-creation side-effect flags.
    pub async fn match_context(&self) -> Result<()> {
        let source_context = self.source.context().await?;
        let mut entries = FieldValues::new();
        for key in ["lang", "tz"] {
            if let Some(value) = source_context.get(key) {
                entries.insert(key.to_string(), value.clone());
            }
        }
        entries.insert(
            "tracking_disable".to_string(),
            Value::Bool(!self.options.notify_on_create),
        );
        entries.insert(
            "mail_create_nosubscribe".to_string(),
            Value::Bool(!self.options.subscribe_followers),
        );
        self.target.set_context(&entries).await
    }

    /// Persisted source-to-destination correspondence lookup; always
    /// `None` when tracking is disabled.
    pub async fn search_in_tracking_db(
        &self,
        source_model: &str,
        source_id: RecordId,
    ) -> Result<Option<RecordId>> {
        match &self.tracking {
            Some(store) => store.lookup(source_model, source_id).await,
            None => Ok(None),
        }
    }

    /// Look for an existing target record through the configured search
    /// keys, tried in order against the normalized values.
    ///
    /// The first key yielding matches wins; among multiple matches the
    /// smallest record id is returned (stable ordering).
    pub async fn search_in_target(
        &self,
        destination_model: &str,
        search_keys: &[String],
        values: &FieldValues,
    ) -> Result<Option<RecordId>> {
        for key in search_keys {
            let Some(value) = values.get(key) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let mut ids = self
                .target
                .search(
                    destination_model,
                    &[SearchCondition::eq(key, value.clone())],
                    None,
                )
                .await?;
            if !ids.is_empty() {
                ids.sort_unstable();
                return Ok(Some(ids[0]));
            }
        }
        Ok(None)
    }

    /// Migrate a batch of source records at recursion level 0.
    pub async fn migrate(
        &self,
        source_model: &str,
        source_ids: &[RecordId],
    ) -> Result<MigrationOutcome> {
        self.migrate_with_level(source_model, source_ids, 0).await
    }

    /// Migrate a batch starting at an explicit recursion level.
    ///
    /// A starting level above the configured ceiling is a configuration
    /// error and fails immediately. Connection errors are fatal; in
    /// `Halt` mode so is any branch that needs more depth than the
    /// ceiling allows. Everything else is recorded in the outcome without
    /// aborting sibling records.
    pub async fn migrate_with_level(
        &self,
        source_model: &str,
        source_ids: &[RecordId],
        recursion_level: usize,
    ) -> Result<MigrationOutcome> {
        if recursion_level > self.options.max_depth {
            return Err(MigrateError::TooDeep {
                model: source_model.to_string(),
                depth: recursion_level,
                ceiling: self.options.max_depth,
                detail: "starting level is above the configured ceiling".to_string(),
            });
        }

        let run_id = Uuid::new_v4().to_string();
        let mut ctx = RunContext::new(run_id.clone());
        info!(
            "Migration run {}: {} record(s) of '{}' (ceiling {}, dry_run: {})",
            run_id,
            source_ids.len(),
            source_model,
            self.options.max_depth,
            self.options.dry_run
        );

        self.match_context().await?;

        'batches: for batch in source_ids.chunks(self.options.batch_size) {
            for &source_id in batch {
                if self.is_cancelled() {
                    warn!("Cancellation requested; stopping before record {}", source_id);
                    ctx.outcome.cancelled = true;
                    break 'batches;
                }

                match self
                    .migrate_record(source_model, source_id, recursion_level, &mut ctx)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        ctx.outcome.finish();
                        return Err(e);
                    }
                    Err(e) => {
                        self.reporter.log(
                            LogLevel::Warn,
                            &format!("{} #{}: {}", source_model, source_id, e),
                        );
                        ctx.outcome.fail(source_model, Some(source_id), None, e);
                    }
                }
            }
            self.reporter.print(
                &format!("{}: batch of {} processed", source_model, batch.len()),
                None,
            );
        }

        ctx.outcome.finish();
        self.reporter.print(
            &format!("Run {} finished: {}", run_id, ctx.outcome.summary()),
            None,
        );
        Ok(ctx.outcome)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolve one source record to a destination id, recursing into its
    /// relations. Boxed because the recursion depth is data-dependent.
    fn migrate_record<'a>(
        &'a self,
        model: &'a str,
        source_id: RecordId,
        level: usize,
        ctx: &'a mut RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<RecordId>> + Send + 'a>> {
        Box::pin(async move {
            let key = (model.to_string(), source_id);

            // same source record reached earlier in this run
            if let Some(&destination) = ctx.resolved.get(&key) {
                ctx.outcome.count(model, Action::Reused);
                return Ok(destination);
            }

            // migrated in a prior run
            if let Some(destination) = self.search_in_tracking_db(model, source_id).await? {
                debug!(
                    "{} #{}: tracking store hit, reusing destination #{}",
                    model, source_id, destination
                );
                ctx.resolved.insert(key, destination);
                ctx.outcome.count(model, Action::Reused);
                return Ok(destination);
            }

            // cycle guard: never rely on the host stack to detect loops
            if !ctx.visited.insert(key.clone()) {
                return Err(MigrateError::TooDeep {
                    model: model.to_string(),
                    depth: level,
                    ceiling: self.options.max_depth,
                    detail: format!("cycle detected at record #{}", source_id),
                });
            }

            let result = self
                .migrate_record_inner(model, source_id, level, &mut *ctx)
                .await;
            ctx.visited.remove(&(model.to_string(), source_id));
            result
        })
    }

    async fn migrate_record_inner(
        &self,
        model: &str,
        source_id: RecordId,
        level: usize,
        ctx: &mut RunContext,
    ) -> Result<RecordId> {
        let mapping = self.map.get_mapping(model)?;
        let schema = self.get_fields(Side::Source, model).await?;

        // lazy verification: every mapped source field must exist
        let source_fields = mapping.source_fields();
        for field in &source_fields {
            if !schema.has_field(field) && !ModelSchema::is_implicit(field) {
                return Err(MigrateError::config(format!(
                    "mapping for '{}' references unknown source field '{}'",
                    model, field
                )));
            }
        }

        let record = self
            .source
            .read(model, &[source_id], &source_fields)
            .await?
            .into_iter()
            .find(|r| r.id == source_id)
            .ok_or_else(|| {
                MigrateError::config(format!("source record {} #{} not found", model, source_id))
            })?;

        let mut values = self.map.normalize_fields(model, &record.values)?;

        // relation resolution; entries with a transformer are treated as
        // scalar, the transformer owns the value
        for entry in &mapping.fields {
            if entry.transformer.is_some() {
                continue;
            }
            let [source_field] = entry.source.as_slice() else {
                continue;
            };
            let Some(descriptor) = schema.field(source_field).and_then(|f| f.relation()) else {
                continue;
            };
            let Some(raw_value) = record.values.get(source_field) else {
                continue;
            };
            if raw_value.is_empty() || !values.contains_key(&entry.target) {
                continue;
            }

            if !self.options.relations.supports(descriptor.kind) {
                let err = MigrateError::UnsupportedRelation {
                    model: model.to_string(),
                    field: source_field.clone(),
                    kind: descriptor.kind,
                };
                self.reporter.log(LogLevel::Warn, &err.to_string());
                values.remove(&entry.target);
                ctx.outcome
                    .fail(model, Some(source_id), Some(source_field.clone()), err);
                continue;
            }

            // check-before-recurse depth guard
            if level + 1 > self.options.max_depth {
                match self.options.recursion_mode {
                    RecursionMode::Halt => {
                        return Err(MigrateError::TooDeep {
                            model: descriptor.related_model.clone(),
                            depth: level + 1,
                            ceiling: self.options.max_depth,
                            detail: format!("relational field {}.{}", model, source_field),
                        });
                    }
                    RecursionMode::Warn => {
                        warn!(
                            "Pruning {}.{} -> {}: recursion ceiling {} reached",
                            model, source_field, descriptor.related_model, self.options.max_depth
                        );
                        values.remove(&entry.target);
                        ctx.outcome.count(&descriptor.related_model, Action::Skipped);
                        continue;
                    }
                }
            }

            match descriptor.kind {
                RelationKind::ManyToOne => {
                    let Some(related_id) = raw_value.as_reference_id() else {
                        values.remove(&entry.target);
                        ctx.outcome.fail(
                            model,
                            Some(source_id),
                            Some(source_field.clone()),
                            "many_to_one field holds a non-reference value",
                        );
                        continue;
                    };
                    match self
                        .resolve_child(&descriptor.related_model, related_id, level + 1, ctx)
                        .await
                    {
                        Resolution::Resolved(destination) => {
                            values.insert(entry.target.clone(), Value::Int(destination));
                        }
                        Resolution::Pruned => {
                            values.remove(&entry.target);
                            ctx.outcome.count(&descriptor.related_model, Action::Skipped);
                        }
                        Resolution::Failed(e) => {
                            values.remove(&entry.target);
                            ctx.outcome
                                .fail(model, Some(source_id), Some(source_field.clone()), e);
                        }
                        Resolution::Fatal(e) => return Err(e),
                    }
                }
                RelationKind::OneToMany | RelationKind::ManyToMany => {
                    let Some(related_ids) = raw_value.as_id_list() else {
                        values.remove(&entry.target);
                        ctx.outcome.fail(
                            model,
                            Some(source_id),
                            Some(source_field.clone()),
                            format!("{} field holds a non-list value", descriptor.kind),
                        );
                        continue;
                    };
                    let related_ids = related_ids.to_vec();
                    let mut destinations: Vec<RecordId> = Vec::new();
                    for related_id in related_ids {
                        match self
                            .resolve_child(&descriptor.related_model, related_id, level + 1, ctx)
                            .await
                        {
                            Resolution::Resolved(destination) => {
                                // deduplicated by destination id, order kept
                                if !destinations.contains(&destination) {
                                    destinations.push(destination);
                                }
                            }
                            Resolution::Pruned => {
                                ctx.outcome.count(&descriptor.related_model, Action::Skipped);
                            }
                            Resolution::Failed(e) => {
                                ctx.outcome.fail(
                                    model,
                                    Some(source_id),
                                    Some(source_field.clone()),
                                    e,
                                );
                            }
                            Resolution::Fatal(e) => return Err(e),
                        }
                    }
                    if destinations.is_empty() {
                        values.remove(&entry.target);
                    } else {
                        values.insert(entry.target.clone(), Value::Ids(destinations));
                    }
                }
            }
        }

        let destination_model = mapping.target_model.as_str();

        // dedup before writing
        if self.options.skip_if_exists || self.options.update_on_match {
            let search_keys = self.map.get_search_keys(model)?;
            if let Some(found) = self
                .search_in_target(destination_model, &search_keys, &values)
                .await?
            {
                if self.options.update_on_match && !self.options.dry_run {
                    self.target.write(destination_model, found, &values).await?;
                    debug!(
                        "{} #{}: updated matching {} #{}",
                        model, source_id, destination_model, found
                    );
                    ctx.outcome.count(model, Action::Updated);
                } else {
                    debug!(
                        "{} #{}: reusing matching {} #{}",
                        model, source_id, destination_model, found
                    );
                    ctx.outcome.count(model, Action::Reused);
                }
                ctx.resolved.insert((model.to_string(), source_id), found);
                self.track(model, source_id, found, ctx).await;
                return Ok(found);
            }
        }

        let destination = if self.options.dry_run {
            ctx.next_dry_run_id()
        } else {
            self.target.create(destination_model, &values).await?
        };

        // memoize and count before touching the tracking store: the record
        // exists in the target now, whatever happens to the bookkeeping
        ctx.resolved
            .insert((model.to_string(), source_id), destination);
        ctx.outcome.count(model, Action::Created);
        self.track(model, source_id, destination, ctx).await;

        if self.options.debug {
            self.reporter.log(
                LogLevel::Debug,
                &format!(
                    "{} #{} -> {} #{}: {:?}",
                    model, source_id, destination_model, destination, values
                ),
            );
        }
        Ok(destination)
    }

    /// Resolve one related record, classifying the ways it can end.
    async fn resolve_child(
        &self,
        model: &str,
        source_id: RecordId,
        level: usize,
        ctx: &mut RunContext,
    ) -> Resolution {
        match self.migrate_record(model, source_id, level, ctx).await {
            Ok(destination) => Resolution::Resolved(destination),
            Err(e @ MigrateError::TooDeep { .. })
                if self.options.recursion_mode == RecursionMode::Warn =>
            {
                warn!("Pruning branch: {}", e);
                Resolution::Pruned
            }
            Err(e) if e.is_fatal() => Resolution::Fatal(e),
            Err(e) => Resolution::Failed(e),
        }
    }

    /// Record a finished migration in the tracking store.
    ///
    /// Tracking is bookkeeping, not part of the migration itself: a write
    /// failure is logged and recorded as a failure entry, but the record
    /// (already in the target and memoized) stays migrated.
    async fn track(
        &self,
        model: &str,
        source_id: RecordId,
        destination: RecordId,
        ctx: &mut RunContext,
    ) {
        if self.options.dry_run {
            return;
        }
        let Some(store) = &self.tracking else {
            return;
        };
        if let Err(e) = store.record(model, source_id, destination).await {
            warn!("tracking write failed for {} #{}: {}", model, source_id, e);
            ctx.outcome.fail(
                model,
                Some(source_id),
                None,
                format!("tracking write failed: {}", e),
            );
        }
    }
}
