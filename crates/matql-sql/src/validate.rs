//! Aggregate/GROUP BY validation
//!
//! Whenever a document aggregates, the grouping list must be exactly the
//! set of selected columns that are not themselves aggregated. The
//! validator only reasons about `aggregate_functions`; columns referenced
//! inside raw `aggregate_expressions` are not decomposed, so an
//! expression-only aggregate still requires every selected column to be
//! grouped.

use matql_ir::{ColumnRef, QueryDocument};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "GROUP BY does not match the selected non-aggregated columns (missing: [{}], unexpected: [{}])",
    join_references(.missing),
    .unexpected.join(", ")
)]
pub struct GroupingError {
    /// Selected, non-aggregated columns absent from `group_by_columns`
    pub missing: Vec<ColumnRef>,
    /// `group_by_columns` entries that name no selected, non-aggregated column
    pub unexpected: Vec<String>,
}

fn join_references(columns: &[ColumnRef]) -> String {
    columns.iter().map(ColumnRef::reference).collect::<Vec<_>>().join(", ")
}

impl GroupingError {
    pub fn missing_references(&self) -> Vec<String> {
        self.missing.iter().map(ColumnRef::reference).collect()
    }
}

/// What the caller wants done with an incomplete grouping list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingPolicy {
    /// Reject; the caller re-submits a corrected document
    #[default]
    Strict,
    /// Append the missing references before validating
    AutoComplete,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Check grouping soundness. Pure; touches nothing outside `doc`.
    pub fn validate(&self, doc: &QueryDocument) -> Result<(), GroupingError> {
        if !doc.has_aggregates() {
            return Ok(());
        }

        let required = required_grouping(doc);

        let missing: Vec<ColumnRef> = required
            .iter()
            .filter(|col| !doc.grouping.group_by_columns.iter().any(|g| col.matches(g)))
            .map(|col| (*col).clone())
            .collect();

        let mut unexpected: Vec<String> = Vec::new();
        for entry in &doc.grouping.group_by_columns {
            if !required.iter().any(|col| col.matches(entry)) && !unexpected.contains(entry) {
                unexpected.push(entry.clone());
            }
        }

        if missing.is_empty() && unexpected.is_empty() {
            Ok(())
        } else {
            Err(GroupingError { missing, unexpected })
        }
    }
}

/// Selected columns not consumed by an aggregate function, deduplicated by
/// reference, in declaration order
pub fn required_grouping(doc: &QueryDocument) -> Vec<&ColumnRef> {
    let mut required: Vec<&ColumnRef> = Vec::new();
    for col in doc.selected_columns() {
        if is_aggregated(doc, col) {
            continue;
        }
        if !required.iter().any(|r| r.reference() == col.reference()) {
            required.push(col);
        }
    }
    required
}

/// True when some aggregate function consumes `col`
pub fn is_aggregated(doc: &QueryDocument, col: &ColumnRef) -> bool {
    doc.grouping
        .aggregate_functions
        .iter()
        .any(|agg| col.matches(&agg.column))
}

/// Opt-in repair: append every missing required reference to the
/// grouping list. Existing entries are kept; documents without aggregates
/// are returned unchanged.
pub fn complete_grouping(doc: &QueryDocument) -> QueryDocument {
    let mut completed = doc.clone();
    if !doc.has_aggregates() {
        return completed;
    }

    for col in required_grouping(doc) {
        if !completed.grouping.group_by_columns.iter().any(|g| col.matches(g)) {
            tracing::warn!(column = %col.reference(), "auto-completing GROUP BY");
            completed.grouping.group_by_columns.push(col.reference());
        }
    }
    completed
}
