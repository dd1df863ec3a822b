/*
 * branchline/src/history.rs
 *
 * Per-branch log of committed imports.
 *
 * Every committed plan appends one entry: when, with which strategy, from
 * which source, and which item ids it inserted or updated. This is what
 * lets an item be traced back to the import that last wrote it.
 */

use crate::context::AppContext;
use crate::import::{ImportRequest, PlanSummary, ReconciliationPlan, RowOutcome};
use crate::storage::LocalStorage;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub branch: String,
    /// `generate`, `match` or `column:<header>`.
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub summary: PlanSummary,
    #[serde(default)]
    pub inserted_ids: Vec<String>,
    #[serde(default)]
    pub updated_ids: Vec<String>,
}

impl HistoryEntry {
    pub fn from_plan(plan: &ReconciliationPlan, request: &ImportRequest) -> Self {
        let mut inserted_ids = Vec::new();
        let mut updated_ids = Vec::new();
        for row in &plan.rows {
            match &row.outcome {
                RowOutcome::Insert { item } => inserted_ids.push(item.id.clone()),
                RowOutcome::Update { item, .. } => {
                    if !updated_ids.contains(&item.id) && !inserted_ids.contains(&item.id) {
                        updated_ids.push(item.id.clone());
                    }
                }
                _ => {}
            }
        }
        Self {
            at: Utc::now(),
            branch: plan.branch_id.clone(),
            strategy: plan.strategy.to_string(),
            source: request.source.clone(),
            summary: plan.summary,
            inserted_ids,
            updated_ids,
        }
    }

    pub fn touches(&self, item_id: &str) -> bool {
        self.inserted_ids.iter().any(|id| id == item_id)
            || self.updated_ids.iter().any(|id| id == item_id)
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ImportHistory {
    pub entries: Vec<HistoryEntry>,
}

impl ImportHistory {
    fn load_internal(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse import history '{}'", path.display()))
    }

    /// Entries of `branch`, oldest first.
    pub fn load(ctx: &dyn AppContext, branch: &str) -> Result<Self> {
        let path = ctx.get_history_path(branch)?;
        if !path.exists() {
            return Ok(Self::default());
        }
        LocalStorage::with_lock(&path, || Self::load_internal(&path))
    }

    pub fn append(ctx: &dyn AppContext, entry: HistoryEntry) -> Result<()> {
        let path = ctx.get_history_path(&entry.branch)?;
        LocalStorage::with_lock(&path, || {
            let mut history = Self::load_internal(&path)?;
            history.entries.push(entry);
            let json = serde_json::to_string_pretty(&history)?;
            LocalStorage::atomic_write(&path, json)?;
            Ok(())
        })
    }

    /// Entries that inserted or updated `item_id`, oldest first.
    pub fn for_item(&self, item_id: &str) -> Vec<&HistoryEntry> {
        self.entries.iter().filter(|e| e.touches(item_id)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;
    use serial_test::serial;

    fn entry(branch: &str, ids: &[&str]) -> HistoryEntry {
        HistoryEntry {
            at: Utc::now(),
            branch: branch.to_string(),
            strategy: "match".to_string(),
            source: Some("plan.csv".to_string()),
            summary: PlanSummary {
                inserted: ids.len(),
                ..Default::default()
            },
            inserted_ids: ids.iter().map(|s| s.to_string()).collect(),
            updated_ids: vec![],
        }
    }

    #[test]
    #[serial]
    fn test_append_and_load_per_branch() {
        let ctx = TestContext::new();
        assert!(ImportHistory::load(&ctx, "main").unwrap().is_empty());

        ImportHistory::append(&ctx, entry("main", &["a"])).unwrap();
        ImportHistory::append(&ctx, entry("main", &["b"])).unwrap();
        ImportHistory::append(&ctx, entry("other", &["c"])).unwrap();

        let main = ImportHistory::load(&ctx, "main").unwrap();
        assert_eq!(main.entries.len(), 2);
        assert_eq!(main.for_item("b").len(), 1);
        assert!(main.for_item("c").is_empty());
        assert_eq!(ImportHistory::load(&ctx, "other").unwrap().entries.len(), 1);
    }
}
