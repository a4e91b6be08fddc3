//! Auto-generation of mappings from schema diffing, and the relation tree
//! used for inspection before running anything.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::core::schema::{FieldKind, ModelSchema, RelationKind};
use crate::core::traits::Connection;
use crate::error::Result;

use super::{FieldMapping, MigrationMap, ModelMapping};

impl MigrationMap {
    /// Introspect the source schema starting at `source_model`, walk
    /// relational fields up to `max_depth`, and populate identity mappings
    /// for every field present in both schemas (exact name match, then
    /// case-insensitive).
    ///
    /// Fields absent from the target schema are logged and omitted, never
    /// errored. Models already registered manually are left untouched:
    /// manual entries take precedence and are never overwritten.
    pub async fn generate_full_map(
        &mut self,
        source_model: &str,
        source: &dyn Connection,
        target: &dyn Connection,
        max_depth: usize,
    ) -> Result<()> {
        let mut pending: Vec<(String, usize)> = vec![(source_model.to_string(), 0)];
        let mut seen: HashSet<String> = HashSet::new();

        while let Some((model, depth)) = pending.pop() {
            if !seen.insert(model.clone()) {
                continue;
            }
            if self.contains(&model) {
                debug!("generate_full_map: '{}' already registered manually, keeping it", model);
                continue;
            }

            let source_schema = source.read_schema(&model).await?;
            let target_schema = match target.read_schema(&model).await {
                Ok(s) => s,
                Err(e) if depth > 0 => {
                    warn!(
                        "generate_full_map: target has no model '{}' ({}); skipping its subtree",
                        model, e
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mapping = self.diff_schemas(
                &source_schema,
                &target_schema,
                depth,
                max_depth,
                &mut pending,
            );
            self.register_or_replace(model, mapping)?;
        }
        Ok(())
    }

    /// Build one model mapping by diffing two schemas; queues related
    /// models for traversal when depth allows.
    fn diff_schemas(
        &self,
        source_schema: &ModelSchema,
        target_schema: &ModelSchema,
        depth: usize,
        max_depth: usize,
        pending: &mut Vec<(String, usize)>,
    ) -> ModelMapping {
        let model = &source_schema.model;
        let mut mapping = ModelMapping::new(target_schema.model.clone());

        for field in &source_schema.fields {
            if ModelSchema::is_implicit(&field.name) {
                continue;
            }

            let target_field = target_schema.field(&field.name).or_else(|| {
                // simple naming heuristic: case-insensitive match
                target_schema
                    .fields
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(&field.name))
            });

            let Some(target_field) = target_field else {
                debug!(
                    "generate_full_map: {}.{} absent from target schema, omitted",
                    model, field.name
                );
                continue;
            };

            match (&field.kind, &target_field.kind) {
                (FieldKind::Scalar(_), FieldKind::Scalar(_)) => {
                    mapping
                        .fields
                        .push(FieldMapping::renamed(&field.name, &target_field.name));
                }
                (
                    FieldKind::Relation { kind, model: related },
                    FieldKind::Relation {
                        kind: target_kind, ..
                    },
                ) => {
                    if kind != target_kind {
                        warn!(
                            "generate_full_map: {}.{} is {} in source but {} in target; omitted, \
                             adjust the map with a transformer if needed",
                            model, field.name, kind, target_kind
                        );
                        continue;
                    }
                    if depth + 1 > max_depth {
                        debug!(
                            "generate_full_map: {}.{} -> {} beyond depth {}, omitted",
                            model, field.name, related, max_depth
                        );
                        continue;
                    }
                    mapping
                        .fields
                        .push(FieldMapping::renamed(&field.name, &target_field.name));
                    pending.push((related.clone(), depth + 1));
                }
                _ => {
                    warn!(
                        "generate_full_map: {}.{} is relational on one side only; omitted",
                        model, field.name
                    );
                }
            }
        }

        mapping.search_keys = super::default_search_keys(&mapping.fields);
        mapping
    }

    /// Produce the relation graph rooted at `source_model` down to
    /// `max_depth`, without executing any migration.
    ///
    /// Never errors on cycles: a model already on the current path becomes
    /// a leaf marked as a cycle, and the depth limit truncates with a
    /// marker.
    pub async fn model_tree(
        &self,
        source_model: &str,
        source: &dyn Connection,
        max_depth: usize,
    ) -> Result<ModelNode> {
        let mut path = Vec::new();
        build_tree(source, source_model.to_string(), None, 0, max_depth, &mut path).await
    }
}

/// One node of the relation tree produced by [`MigrationMap::model_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelNode {
    /// Model name.
    pub model: String,

    /// Field and relation kind this node was reached through (root: none).
    pub via: Option<(String, RelationKind)>,

    /// Child models reached through relational fields.
    pub children: Vec<ModelNode>,

    /// Depth limit reached; children not expanded.
    pub truncated: bool,

    /// The model already appears on the path from the root.
    pub cycle: bool,
}

fn build_tree<'a>(
    source: &'a dyn Connection,
    model: String,
    via: Option<(String, RelationKind)>,
    depth: usize,
    max_depth: usize,
    path: &'a mut Vec<String>,
) -> Pin<Box<dyn Future<Output = Result<ModelNode>> + Send + 'a>> {
    Box::pin(async move {
        if path.contains(&model) {
            return Ok(ModelNode {
                model,
                via,
                children: Vec::new(),
                truncated: false,
                cycle: true,
            });
        }
        if depth >= max_depth {
            return Ok(ModelNode {
                model,
                via,
                children: Vec::new(),
                truncated: true,
                cycle: false,
            });
        }

        let schema = source.read_schema(&model).await?;
        path.push(model.clone());

        let mut children = Vec::new();
        for descriptor in schema.relation_fields() {
            let child = build_tree(
                source,
                descriptor.related_model,
                Some((descriptor.field_name, descriptor.kind)),
                depth + 1,
                max_depth,
                path,
            )
            .await?;
            children.push(child);
        }

        path.pop();
        Ok(ModelNode {
            model,
            via,
            children,
            truncated: false,
            cycle: false,
        })
    })
}

impl ModelNode {
    fn render(&self, indent: usize, out: &mut String) {
        for _ in 0..indent {
            out.push_str("  ");
        }
        match &self.via {
            Some((field, kind)) => {
                out.push_str(&format!("{} -> {} ({})", field, self.model, kind));
            }
            None => out.push_str(&self.model),
        }
        if self.cycle {
            out.push_str(" [cycle]");
        }
        if self.truncated {
            out.push_str(" [depth limit]");
        }
        out.push('\n');
        for child in &self.children {
            child.render(indent + 1, out);
        }
    }
}

impl fmt::Display for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(0, &mut out);
        f.write_str(out.trim_end())
    }
}
