//! Outcome of one top-level migration call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::value::RecordId;

/// What happened to one record during migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A new destination record was created.
    Created,
    /// An equivalent destination record was found and reused.
    Reused,
    /// A matching destination record was updated in place.
    Updated,
    /// The record (or a pruned relation branch) was skipped.
    Skipped,
    /// The record failed to migrate.
    Failed,
}

/// Per-model action counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub created: u64,
    pub reused: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ActionCounts {
    fn bump(&mut self, action: Action) {
        match action {
            Action::Created => self.created += 1,
            Action::Reused => self.reused += 1,
            Action::Updated => self.updated += 1,
            Action::Skipped => self.skipped += 1,
            Action::Failed => self.failed += 1,
        }
    }
}

/// One per-record or per-field failure, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Source model of the failing record.
    pub model: String,

    /// Source record id, when known.
    pub source_id: Option<RecordId>,

    /// Field whose resolution failed, for field-level failures.
    pub field: Option<String>,

    /// Rendered error.
    pub error: String,
}

/// Result of one top-level `migrate` call.
///
/// Fatal failures are returned as errors instead; everything recoverable
/// lands here as counts and failure entries, never a bare silent skip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationOutcome {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: Option<DateTime<Utc>>,

    /// Action counts per source model.
    pub by_model: BTreeMap<String, ActionCounts>,

    /// Failures, in the order they occurred.
    pub failures: Vec<Failure>,

    /// The run was cancelled between records.
    pub cancelled: bool,
}

impl MigrationOutcome {
    pub(crate) fn new(run_id: String) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            completed_at: None,
            by_model: BTreeMap::new(),
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub(crate) fn count(&mut self, model: &str, action: Action) {
        self.by_model.entry(model.to_string()).or_default().bump(action);
    }

    pub(crate) fn fail(
        &mut self,
        model: &str,
        source_id: Option<RecordId>,
        field: Option<String>,
        error: impl std::fmt::Display,
    ) {
        self.count(model, Action::Failed);
        self.failures.push(Failure {
            model: model.to_string(),
            source_id,
            field,
            error: error.to_string(),
        });
    }

    pub(crate) fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Total records created across all models.
    pub fn created(&self) -> u64 {
        self.by_model.values().map(|c| c.created).sum()
    }

    /// Total records found and reused.
    pub fn reused(&self) -> u64 {
        self.by_model.values().map(|c| c.reused).sum()
    }

    /// Total records updated in place.
    pub fn updated(&self) -> u64 {
        self.by_model.values().map(|c| c.updated).sum()
    }

    /// Total records or branches skipped.
    pub fn skipped(&self) -> u64 {
        self.by_model.values().map(|c| c.skipped).sum()
    }

    /// Total failures.
    pub fn failed(&self) -> u64 {
        self.by_model.values().map(|c| c.failed).sum()
    }

    /// One-line summary for reporting.
    pub fn summary(&self) -> String {
        format!(
            "{} created, {} reused, {} updated, {} skipped, {} failed",
            self.created(),
            self.reused(),
            self.updated(),
            self.skipped(),
            self.failed()
        )
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate_per_model() {
        let mut outcome = MigrationOutcome::new("run".into());
        outcome.count("res.partner", Action::Created);
        outcome.count("res.partner", Action::Created);
        outcome.count("res.partner.category", Action::Reused);
        outcome.fail("res.partner", Some(9), Some("category_id".into()), "boom");

        assert_eq!(outcome.created(), 2);
        assert_eq!(outcome.reused(), 1);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.by_model["res.partner"].created, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].field.as_deref(), Some("category_id"));
        assert!(outcome.summary().contains("2 created"));
    }
}
