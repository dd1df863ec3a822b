//! Tabular import into a branch.
//!
//! The pieces, leaf first:
//! - [`mapping`]: which source header feeds which item field, and whether that is usable.
//! - [`identity`]: the re-import key of a row under the chosen [`IdStrategy`].
//! - [`fingerprint`]: a content hash of the mapped values of a row.
//! - [`reconcile`]: classifies every row as insert / update / unchanged / error.
//!
//! Nothing here touches the disk. An [`ImportRequest`] goes in, a
//! [`ReconciliationPlan`] comes out; committing the plan is the store's job.
pub mod error;
pub mod fingerprint;
pub mod identity;
pub mod mapping;
pub mod reconcile;

pub use error::{IdentityError, ImportError, RowError};
pub use fingerprint::fingerprint;
pub use identity::{IdStrategy, resolve_id};
pub use mapping::{ColumnMapping, MappingReport, TargetField, field_count};
pub use reconcile::{PlanSummary, ReconciliationPlan, RowOutcome, RowResult, plan, plan_at};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One source row: header -> raw cell text. A missing key and an empty value
/// both mean "no value".
pub type Row = HashMap<String, String>;

/// What to do with row errors when committing a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitPolicy {
    /// Any row error blocks the whole commit.
    #[default]
    BlockOnErrors,
    /// Rows with errors are left out; the rest is committed.
    SkipErrorRows,
}

/// Everything the reconciliation needs, as one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub branch_id: String,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub mapping: ColumnMapping,
    pub strategy: IdStrategy,
    #[serde(default)]
    pub policy: CommitPolicy,
    /// Free-form origin (file name) recorded in the import history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ImportRequest {
    pub fn new(
        branch_id: &str,
        headers: Vec<String>,
        rows: Vec<Row>,
        mapping: ColumnMapping,
        strategy: IdStrategy,
    ) -> Self {
        Self {
            branch_id: branch_id.to_string(),
            headers,
            rows,
            mapping,
            strategy,
            policy: CommitPolicy::default(),
            source: None,
        }
    }

    /// Builds a request whose headers are the union of the row keys (sorted).
    pub fn from_rows(
        branch_id: &str,
        rows: Vec<Row>,
        mapping: ColumnMapping,
        strategy: IdStrategy,
    ) -> Self {
        let headers: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();
        let headers = headers.into_iter().cloned().collect();
        Self::new(branch_id, headers, rows, mapping, strategy)
    }

    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}
