// Reconciliation of imported rows against the current items of one branch.
//
// Per row: resolve identity -> validate values -> look the identity up -> compare
// fingerprints. Rows are processed in input order and later rows see the
// effects of earlier ones, so two rows with the same identity in one file give
// Insert then Update (or Unchanged), never two Inserts.
use crate::import::error::{ImportError, RowError};
use crate::import::fingerprint::fingerprint;
use crate::import::identity::{IdStrategy, resolve_id};
use crate::import::mapping::{ColumnMapping, TargetField, field_count};
use crate::import::{CommitPolicy, ImportRequest, Row};
use crate::model::parser::{parse_date, parse_item_type, split_tags, valid_item_types};
use crate::model::{Item, ItemType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RowOutcome {
    Insert { item: Item },
    /// `previous` is the state the update was computed against: the stored
    /// item, or the result of an earlier row of the same batch.
    Update { previous: Item, item: Item },
    Unchanged { item_id: String },
    Error { error: RowError },
}

impl RowOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RowOutcome::Insert { .. } => "insert",
            RowOutcome::Update { .. } => "update",
            RowOutcome::Unchanged { .. } => "unchanged",
            RowOutcome::Error { .. } => "error",
        }
    }

    /// The item this outcome would write, if any.
    pub fn write(&self) -> Option<&Item> {
        match self {
            RowOutcome::Insert { item } | RowOutcome::Update { item, .. } => Some(item),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResult {
    /// Zero-based position in the input rows.
    pub index: usize,
    /// Resolved identity, when resolution succeeded.
    pub source_id: Option<String>,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
}

impl PlanSummary {
    fn count(&mut self, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Insert { .. } => self.inserted += 1,
            RowOutcome::Update { .. } => self.updated += 1,
            RowOutcome::Unchanged { .. } => self.unchanged += 1,
            RowOutcome::Error { .. } => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged + self.errors
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    pub branch_id: String,
    pub strategy: IdStrategy,
    pub policy: CommitPolicy,
    /// Positionally aligned with the input rows.
    pub rows: Vec<RowResult>,
    pub summary: PlanSummary,
    pub has_blocking_errors: bool,
}

impl ReconciliationPlan {
    /// Items to write, in row order. Several entries may share an `id` when a
    /// batch touches the same item twice; the last one is the final state.
    pub fn writes(&self) -> impl Iterator<Item = &Item> {
        self.rows.iter().filter_map(|r| r.outcome.write())
    }

    pub fn errors(&self) -> impl Iterator<Item = (usize, &RowError)> {
        self.rows.iter().filter_map(|r| match &r.outcome {
            RowOutcome::Error { error } => Some((r.index, error)),
            _ => None,
        })
    }

    pub fn is_noop(&self) -> bool {
        self.summary.inserted == 0 && self.summary.updated == 0
    }
}

/// Typed values of one valid row. Only mapped fields are ever applied.
struct RowValues {
    title: String,
    item_type: ItemType,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    owner: Option<String>,
    lane: Option<String>,
    project: Option<String>,
    tags: Vec<String>,
}

impl RowValues {
    fn parse(row: &Row, mapping: &ColumnMapping) -> Result<Self, RowError> {
        let title = mapping
            .value(row, TargetField::Title)
            .ok_or(RowError::MissingValue(TargetField::Title))?;
        let raw_type = mapping
            .value(row, TargetField::Type)
            .ok_or(RowError::MissingValue(TargetField::Type))?;
        let item_type = parse_item_type(raw_type).ok_or_else(|| RowError::InvalidType {
            value: raw_type.to_string(),
            expected: valid_item_types(),
        })?;

        let date = |field: TargetField| -> Result<Option<NaiveDate>, RowError> {
            match mapping.value(row, field) {
                None => Ok(None),
                Some(raw) => parse_date(raw).map(Some).ok_or_else(|| RowError::InvalidDate {
                    field,
                    value: raw.to_string(),
                }),
            }
        };
        let text = |field: TargetField| mapping.value(row, field).map(str::to_string);

        Ok(Self {
            title: title.to_string(),
            item_type,
            start_date: date(TargetField::StartDate)?,
            end_date: date(TargetField::EndDate)?,
            owner: text(TargetField::Owner),
            lane: text(TargetField::Lane),
            project: text(TargetField::Project),
            tags: mapping
                .value(row, TargetField::Tags)
                .map(|raw| split_tags(raw, mapping.tags_delimiter()))
                .unwrap_or_default(),
        })
    }

    fn apply(self, item: &mut Item, mapping: &ColumnMapping) {
        item.title = self.title;
        item.item_type = self.item_type;
        if mapping.is_mapped(TargetField::StartDate) {
            item.start_date = self.start_date;
        }
        if mapping.is_mapped(TargetField::EndDate) {
            item.end_date = self.end_date;
        }
        if mapping.is_mapped(TargetField::Owner) {
            item.owner = self.owner;
        }
        if mapping.is_mapped(TargetField::Lane) {
            item.lane = self.lane;
        }
        if mapping.is_mapped(TargetField::Project) {
            item.project = self.project;
        }
        if mapping.is_mapped(TargetField::Tags) {
            item.tags = self.tags;
        }
    }
}

/// Builds the reconciliation plan, stamping writes with the current time.
pub fn plan(existing: &[Item], request: &ImportRequest) -> Result<ReconciliationPlan, ImportError> {
    plan_at(existing, request, Utc::now())
}

/// Same as [`plan`] with an explicit write timestamp.
///
/// `existing` is the target branch snapshot and is never modified. An
/// incomplete mapping fails the whole call before any row is looked at.
pub fn plan_at(
    existing: &[Item],
    request: &ImportRequest,
    now: DateTime<Utc>,
) -> Result<ReconciliationPlan, ImportError> {
    let mapping = &request.mapping;
    let report = mapping.validate();
    if !report.valid {
        return Err(ImportError::MappingIncomplete {
            missing: report.missing_required,
        });
    }
    log::debug!(
        "Mapping covers {} of {} fields",
        mapping.mapped_count(),
        field_count()
    );
    for (header, fields) in &report.duplicate_headers {
        let names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
        log::warn!(
            "Header '{}' is mapped to several fields ({}); each reads the same column",
            header,
            names.join(", ")
        );
    }
    for header in mapping.unknown_headers(&request.headers) {
        log::warn!("Mapped header '{}' is not present in the source", header);
    }

    let mut index = index_by_source_id(existing);
    let mut rows = Vec::with_capacity(request.rows.len());
    let mut summary = PlanSummary::default();

    for (i, row) in request.rows.iter().enumerate() {
        let (source_id, outcome) = match resolve_id(&request.strategy, row, mapping, &request.headers)
        {
            Err(e) => (None, RowOutcome::Error { error: e.into() }),
            Ok(source_id) => {
                let outcome = reconcile_row(&mut index, &source_id, row, request, now);
                (Some(source_id), outcome)
            }
        };
        log::debug!(
            "Row {}: {} ({})",
            i + 1,
            outcome.label(),
            source_id.as_deref().unwrap_or("-")
        );
        summary.count(&outcome);
        rows.push(RowResult {
            index: i,
            source_id,
            outcome,
        });
    }

    let has_blocking_errors = match request.policy {
        CommitPolicy::BlockOnErrors => summary.errors > 0,
        CommitPolicy::SkipErrorRows => false,
    };

    log::info!(
        "Planned import into '{}' ({}): {} insert, {} update, {} unchanged, {} error",
        request.branch_id,
        request.strategy,
        summary.inserted,
        summary.updated,
        summary.unchanged,
        summary.errors
    );

    Ok(ReconciliationPlan {
        branch_id: request.branch_id.clone(),
        strategy: request.strategy.clone(),
        policy: request.policy,
        rows,
        summary,
        has_blocking_errors,
    })
}

fn reconcile_row(
    index: &mut HashMap<String, Item>,
    source_id: &str,
    row: &Row,
    request: &ImportRequest,
    now: DateTime<Utc>,
) -> RowOutcome {
    let mapping = &request.mapping;
    let values = match RowValues::parse(row, mapping) {
        Ok(v) => v,
        Err(error) => return RowOutcome::Error { error },
    };
    let hash = fingerprint(row, mapping);

    match index.get(source_id) {
        None => {
            let mut item = Item::new("", values.item_type, &request.branch_id);
            values.apply(&mut item, mapping);
            item.source_id = Some(source_id.to_string());
            item.source_row_hash = Some(hash);
            item.updated_at = now;
            index.insert(source_id.to_string(), item.clone());
            RowOutcome::Insert { item }
        }
        Some(current) if current.source_row_hash.as_deref() == Some(hash.as_str()) => {
            RowOutcome::Unchanged {
                item_id: current.id.clone(),
            }
        }
        Some(current) => {
            let previous = current.clone();
            let mut item = current.clone();
            values.apply(&mut item, mapping);
            item.source_row_hash = Some(hash);
            item.updated_at = now;
            index.insert(source_id.to_string(), item.clone());
            RowOutcome::Update { previous, item }
        }
    }
}

/// Items without a source id can never be matched and are left out.
fn index_by_source_id(existing: &[Item]) -> HashMap<String, Item> {
    let mut index = HashMap::with_capacity(existing.len());
    for item in existing {
        let Some(source_id) = &item.source_id else {
            continue;
        };
        if index.contains_key(source_id) {
            log::warn!(
                "Source id '{}' appears on more than one item in branch '{}'; keeping the first",
                source_id,
                item.branch_id
            );
            continue;
        }
        index.insert(source_id.clone(), item.clone());
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_mapping() -> ColumnMapping {
        ColumnMapping::new()
            .with(TargetField::Title, "Title")
            .with(TargetField::Type, "Type")
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_generate_inserts_one_row() {
        let req = ImportRequest::from_rows(
            "main",
            vec![row(&[("Title", "Task 1"), ("Type", "task")])],
            base_mapping(),
            IdStrategy::Generate,
        );
        let plan = plan_at(&[], &req, fixed_now()).unwrap();
        assert_eq!(plan.summary.inserted, 1);
        assert_eq!(plan.summary.errors, 0);
        assert!(!plan.has_blocking_errors);

        let item = plan.rows[0].outcome.write().unwrap();
        assert_eq!(item.title, "Task 1");
        assert_eq!(item.branch_id, "main");
        assert_eq!(item.updated_at, fixed_now());
        assert!(item.source_id.is_some());
        assert_ne!(item.source_id.as_deref(), Some(item.id.as_str()));
    }

    #[test]
    fn test_incomplete_mapping_is_fatal() {
        let mapping = ColumnMapping::new().with(TargetField::Title, "Title");
        let req = ImportRequest::from_rows(
            "main",
            vec![row(&[("Title", "Task 1"), ("Type", "task")])],
            mapping,
            IdStrategy::Generate,
        );
        assert_eq!(
            plan(&[], &req),
            Err(ImportError::MappingIncomplete {
                missing: vec![TargetField::Type]
            })
        );
    }

    #[test]
    fn test_update_keeps_unmapped_fields() {
        let mut existing = Item::new("Old", ItemType::Task, "main");
        existing.source_id = Some("X1".to_string());
        existing.source_row_hash = Some("H1".to_string());
        existing.owner = Some("Dana".to_string());

        let req = ImportRequest::from_rows(
            "main",
            vec![row(&[("id", "X1"), ("Title", "New"), ("Type", "milestone")])],
            base_mapping(),
            IdStrategy::column("id"),
        );
        let plan = plan_at(std::slice::from_ref(&existing), &req, fixed_now()).unwrap();
        match &plan.rows[0].outcome {
            RowOutcome::Update { previous, item } => {
                assert_eq!(previous, &existing);
                assert_eq!(item.id, existing.id);
                assert_eq!(item.title, "New");
                assert_eq!(item.item_type, ItemType::Milestone);
                assert_eq!(item.owner.as_deref(), Some("Dana"));
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_mapped_but_empty_field_clears_on_update() {
        let mapping = base_mapping().with(TargetField::Owner, "Owner");
        let first = ImportRequest::from_rows(
            "main",
            vec![row(&[("Title", "T"), ("Type", "task"), ("Owner", "Dana")])],
            mapping.clone(),
            IdStrategy::Match,
        );
        let p1 = plan_at(&[], &first, fixed_now()).unwrap();
        let stored: Vec<Item> = p1.writes().cloned().collect();

        let second = ImportRequest::from_rows(
            "main",
            vec![row(&[("Title", "T"), ("Type", "task"), ("Owner", "")])],
            mapping,
            IdStrategy::Match,
        );
        let p2 = plan_at(&stored, &second, fixed_now()).unwrap();
        let item = p2.rows[0].outcome.write().unwrap();
        assert_eq!(item.owner, None);
    }

    #[test]
    fn test_row_validation_errors() {
        let mapping = base_mapping().with(TargetField::StartDate, "Start");
        let req = ImportRequest::from_rows(
            "main",
            vec![
                row(&[("Title", ""), ("Type", "task")]),
                row(&[("Title", "A"), ("Type", "epic")]),
                row(&[("Title", "B"), ("Type", "task"), ("Start", "soon")]),
                row(&[("Title", "C"), ("Type", "task"), ("Start", "6/1/2025")]),
            ],
            mapping,
            IdStrategy::Generate,
        );
        let plan = plan_at(&[], &req, fixed_now()).unwrap();
        assert_eq!(plan.summary.errors, 3);
        assert_eq!(plan.summary.inserted, 1);
        assert!(plan.has_blocking_errors);

        let errors: Vec<&RowError> = plan.errors().map(|(_, e)| e).collect();
        assert_eq!(errors[0], &RowError::MissingValue(TargetField::Title));
        assert!(matches!(errors[1], RowError::InvalidType { value, .. } if value == "epic"));
        assert!(matches!(errors[2], RowError::InvalidDate { field: TargetField::StartDate, .. }));
        assert_eq!(
            plan.rows[3].outcome.write().unwrap().start_date,
            NaiveDate::from_ymd_opt(2025, 6, 1)
        );
    }

    #[test]
    fn test_skip_policy_does_not_block() {
        let req = ImportRequest::from_rows(
            "main",
            vec![row(&[("Title", "A"), ("Type", "nope")])],
            base_mapping(),
            IdStrategy::Generate,
        )
        .with_policy(CommitPolicy::SkipErrorRows);
        let plan = plan(&[], &req).unwrap();
        assert_eq!(plan.summary.errors, 1);
        assert!(!plan.has_blocking_errors);
    }

    #[test]
    fn test_items_without_source_id_are_never_matched() {
        let mut manual = Item::new("Launch", ItemType::Release, "main");
        manual.source_row_hash = Some("whatever".to_string());
        let req = ImportRequest::from_rows(
            "main",
            vec![row(&[("Title", "Launch"), ("Type", "release")])],
            base_mapping(),
            IdStrategy::Match,
        );
        let plan = plan(&[manual], &req).unwrap();
        assert_eq!(plan.summary.inserted, 1);
    }

    #[test]
    fn test_duplicate_source_id_in_snapshot_first_wins() {
        let mut a = Item::new("A", ItemType::Task, "main");
        a.source_id = Some("K".to_string());
        let mut b = Item::new("B", ItemType::Task, "main");
        b.source_id = Some("K".to_string());
        let req = ImportRequest::from_rows(
            "main",
            vec![row(&[("Key", "K"), ("Title", "C"), ("Type", "task")])],
            base_mapping(),
            IdStrategy::column("Key"),
        );
        let plan = plan(&[a.clone(), b], &req).unwrap();
        assert_eq!(plan.rows[0].outcome.write().unwrap().id, a.id);
    }

    #[test]
    fn test_identical_rows_in_one_batch_insert_then_unchanged() {
        let r = row(&[("Title", "Launch"), ("Type", "release")]);
        let req = ImportRequest::from_rows(
            "main",
            vec![r.clone(), r],
            base_mapping(),
            IdStrategy::Match,
        );
        let plan = plan(&[], &req).unwrap();
        assert_eq!(plan.rows[0].outcome.label(), "insert");
        assert_eq!(plan.rows[1].outcome.label(), "unchanged");
        assert!(!plan.is_noop());
    }
}
