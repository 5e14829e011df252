//! Folding evaluated changes into the summary attached to a build.

use kiln_core::{BuildReason, Priority};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::change::Change;
use crate::error::{ChangeError, Result};

/// One entry of the serialized changes payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub reason: BuildReason,
    pub old: Json,
    pub new: Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub has_changes: bool,
    /// Reasons joined with `,` in encounter order.
    pub reasons: String,
    /// JSON array of [`ChangeRecord`]; empty when there are no changes.
    pub changes: String,
    pub priority: Priority,
}

impl ChangeSummary {
    /// Fails unless `has_changes`, non-empty `reasons` and non-empty
    /// `changes` all agree.
    pub fn new(has_changes: bool, reasons: String, changes: String, priority: Priority) -> Result<Self> {
        if has_changes != !reasons.is_empty() || has_changes != !changes.is_empty() {
            return Err(ChangeError::InvalidSummary);
        }
        Ok(Self { has_changes, reasons, changes, priority })
    }

    pub fn none() -> Self {
        Self { has_changes: false, reasons: String::new(), changes: String::new(), priority: Priority::NONE }
    }

    pub fn reason_list(&self) -> Vec<&str> {
        self.reasons.split(',').filter(|s| !s.is_empty()).collect()
    }

    pub fn records(&self) -> Result<Vec<ChangeRecord>> {
        parse_changes(&self.changes)
    }
}

/// Decode a changes payload. Unknown reasons are decode errors.
pub fn parse_changes(payload: &str) -> Result<Vec<ChangeRecord>> {
    if payload.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(payload).map_err(ChangeError::Decode)
}

/// Collects changes in reconciliation order and summarizes them.
#[derive(Debug, Default)]
pub struct ChangeProcessor {
    changes: Vec<Change>,
}

impl ChangeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(mut self, change: Change) -> Self {
        self.changes.push(change);
        self
    }

    pub fn process_all(mut self, changes: impl IntoIterator<Item = Change>) -> Self {
        self.changes.extend(changes);
        self
    }

    /// Evaluates every change, drops those that do not require a build and
    /// folds the rest. Any evaluation error fails the whole summary.
    pub fn summarize(&self) -> Result<ChangeSummary> {
        let mut errors = Vec::new();
        let mut reasons: Vec<&str> = Vec::new();
        let mut records = Vec::new();
        let mut priority = Priority::NONE;

        for change in &self.changes {
            match change.is_build_required() {
                Ok(true) => {}
                Ok(false) => {
                    debug!(reason = %change.reason(), "change does not require a build");
                    continue;
                }
                Err(e) => {
                    errors.push(e.to_string());
                    continue;
                }
            }
            reasons.push(change.reason().as_str());
            records.push(ChangeRecord { reason: change.reason(), old: change.old_value()?, new: change.new_value()? });
            priority = priority.max(change.priority());
        }
        if !errors.is_empty() {
            return Err(ChangeError::Evaluation(errors.join("; ")));
        }

        let changes = if records.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&records).map_err(ChangeError::Serialize)?
        };
        let summary = ChangeSummary::new(!records.is_empty(), reasons.join(","), changes, priority)?;
        counter!("change_summaries_total", 1u64);
        if summary.has_changes {
            info!(reasons = %summary.reasons, priority = summary.priority.0, "build required");
        }
        Ok(summary)
    }
}
