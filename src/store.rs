// File: src/store.rs
// In-memory items per branch. Plans computed by `import::plan` are applied here.
use crate::import::ReconciliationPlan;
use crate::model::{Item, ItemType};
use anyhow::{Result, bail};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct BranchStore {
    pub branches: HashMap<String, Vec<Item>>,
    /// item id -> branch id
    pub index: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct FilterOptions<'a> {
    pub item_type: Option<ItemType>,
    pub project: Option<&'a str>,
    pub lane: Option<&'a str>,
    pub tag: Option<&'a str>,
    pub search_term: &'a str,
}

impl BranchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content of a branch.
    pub fn insert(&mut self, branch_id: String, items: Vec<Item>) {
        if let Some(old) = self.branches.get(&branch_id) {
            for item in old {
                self.index.remove(&item.id);
            }
        }
        for item in &items {
            self.index.insert(item.id.clone(), branch_id.clone());
        }
        self.branches.insert(branch_id, items);
    }

    pub fn items(&self, branch_id: &str) -> &[Item] {
        self.branches
            .get(branch_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get_item(&self, id: &str) -> Option<&Item> {
        let branch = self.index.get(id)?;
        self.branches.get(branch)?.iter().find(|i| i.id == id)
    }

    pub fn find_by_source_id(&self, branch_id: &str, source_id: &str) -> Option<&Item> {
        self.items(branch_id)
            .iter()
            .find(|i| i.source_id.as_deref() == Some(source_id))
    }

    /// Updates an existing item (matched by id) or appends it to its branch.
    pub fn upsert_item(&mut self, item: Item) {
        let branch = item.branch_id.clone();
        self.index.insert(item.id.clone(), branch.clone());
        let list = self.branches.entry(branch).or_default();
        if let Some(idx) = list.iter().position(|i| i.id == item.id) {
            list[idx] = item;
        } else {
            list.push(item);
        }
    }

    pub fn delete_item(&mut self, id: &str) -> Option<Item> {
        let branch = self.index.remove(id)?;
        let list = self.branches.get_mut(&branch)?;
        let idx = list.iter().position(|i| i.id == id)?;
        Some(list.remove(idx))
    }

    /// Writes the inserts and updates of `plan` in row order.
    ///
    /// Unchanged and error rows write nothing. Items absent from the import are
    /// never removed. Returns the number of writes.
    pub fn apply_plan(&mut self, plan: &ReconciliationPlan) -> Result<usize> {
        if plan.has_blocking_errors {
            bail!(
                "Import into '{}' has {} row error(s); nothing was committed",
                plan.branch_id,
                plan.summary.errors
            );
        }
        let mut written = 0;
        for item in plan.writes() {
            if item.branch_id != plan.branch_id {
                bail!(
                    "Item {} belongs to branch '{}', not '{}'",
                    item.id,
                    item.branch_id,
                    plan.branch_id
                );
            }
            self.upsert_item(item.clone());
            written += 1;
        }
        log::info!(
            "Committed {} write(s) to branch '{}'",
            written,
            plan.branch_id
        );
        Ok(written)
    }

    pub fn filter(&self, branch_id: &str, options: &FilterOptions) -> Vec<Item> {
        let term = options.search_term.to_lowercase();
        let mut result: Vec<Item> = self
            .items(branch_id)
            .iter()
            .filter(|i| options.item_type.is_none_or(|t| i.item_type == t))
            .filter(|i| options.project.is_none_or(|p| i.project.as_deref() == Some(p)))
            .filter(|i| options.lane.is_none_or(|l| i.lane.as_deref() == Some(l)))
            .filter(|i| options.tag.is_none_or(|t| i.tags.iter().any(|x| x == t)))
            .filter(|i| term.is_empty() || i.title.to_lowercase().contains(&term))
            .cloned()
            .collect();
        result.sort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{ColumnMapping, IdStrategy, ImportRequest, Row, TargetField, plan};

    fn row(title: &str, item_type: &str) -> Row {
        let mut r = Row::new();
        r.insert("Title".to_string(), title.to_string());
        r.insert("Type".to_string(), item_type.to_string());
        r
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::new()
            .with(TargetField::Title, "Title")
            .with(TargetField::Type, "Type")
    }

    #[test]
    fn test_apply_plan_inserts_then_updates_in_place() {
        let mut store = BranchStore::new();
        let req = ImportRequest::from_rows(
            "main",
            vec![row("Launch", "release"), row("Review", "meeting")],
            mapping(),
            IdStrategy::Match,
        );
        let p = plan(store.items("main"), &req).unwrap();
        assert_eq!(store.apply_plan(&p).unwrap(), 2);
        assert_eq!(store.items("main").len(), 2);

        let req = ImportRequest::from_rows(
            "main",
            vec![row("Launch", "milestone")],
            mapping(),
            IdStrategy::Match,
        );
        let p = plan(store.items("main"), &req).unwrap();
        assert_eq!(p.summary.updated, 1);
        store.apply_plan(&p).unwrap();

        assert_eq!(store.items("main").len(), 2);
        let launch = store.find_by_source_id("main", "|launch").unwrap();
        assert_eq!(launch.item_type, ItemType::Milestone);
    }

    #[test]
    fn test_blocking_plan_is_refused() {
        let mut store = BranchStore::new();
        let req = ImportRequest::from_rows(
            "main",
            vec![row("Ok", "task"), row("Bad", "unknown")],
            mapping(),
            IdStrategy::Match,
        );
        let p = plan(&[], &req).unwrap();
        assert!(store.apply_plan(&p).is_err());
        assert!(store.items("main").is_empty());
    }

    #[test]
    fn test_filter_and_delete() {
        let mut store = BranchStore::new();
        let mut a = Item::new("Alpha", ItemType::Task, "main");
        a.lane = Some("Backend".to_string());
        a.tags = vec!["api".to_string()];
        let b = Item::new("Beta", ItemType::Meeting, "main");
        let a_id = a.id.clone();
        store.upsert_item(a);
        store.upsert_item(b);

        let by_lane = store.filter(
            "main",
            &FilterOptions {
                lane: Some("Backend"),
                ..Default::default()
            },
        );
        assert_eq!(by_lane.len(), 1);

        let by_type = store.filter(
            "main",
            &FilterOptions {
                item_type: Some(ItemType::Meeting),
                ..Default::default()
            },
        );
        assert_eq!(by_type[0].title, "Beta");

        let by_term = store.filter(
            "main",
            &FilterOptions {
                search_term: "ALP",
                tag: Some("api"),
                ..Default::default()
            },
        );
        assert_eq!(by_term.len(), 1);

        assert!(store.delete_item(&a_id).is_some());
        assert!(store.get_item(&a_id).is_none());
        assert_eq!(store.items("main").len(), 1);
    }
}
