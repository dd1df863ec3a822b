// File: ./src/model/item.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use strum::{EnumIter, EnumString};
use uuid::Uuid;

pub fn new_item_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Default, Serialize, Deserialize, EnumIter, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ItemType {
    #[default]
    Task,
    Milestone,
    Release,
    Meeting,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Task => "task",
            ItemType::Milestone => "milestone",
            ItemType::Release => "release",
            ItemType::Meeting => "meeting",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub branch_id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    pub owner: Option<String>,
    pub lane: Option<String>,
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,

    /// Re-import matching key. Unique within a branch when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// Fingerprint of the row this item was last imported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_row_hash: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(title: &str, item_type: ItemType, branch_id: &str) -> Self {
        Self {
            id: new_item_id(),
            branch_id: branch_id.to_string(),
            item_type,
            title: title.to_string(),
            start_date: None,
            end_date: None,
            owner: None,
            lane: None,
            project: None,
            tags: Vec::new(),
            source_id: None,
            source_row_hash: None,
            updated_at: Utc::now(),
        }
    }

    /// Date used to place the item on the timeline: start, falling back to end.
    pub fn anchor_date(&self) -> Option<NaiveDate> {
        self.start_date.or(self.end_date)
    }
}

// --- SORTING ---
// Dated items first (chronologically), undated items last, then by title.
impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.anchor_date(), other.anchor_date()) {
            (Some(d1), Some(d2)) if d1 != d2 => return d1.cmp(&d2),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            _ => {}
        }
        self.title
            .cmp(&other.title)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BranchListEntry {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_item_type_parses_case_insensitively() {
        assert_eq!(ItemType::from_str("Milestone").unwrap(), ItemType::Milestone);
        assert_eq!(ItemType::from_str("MEETING").unwrap(), ItemType::Meeting);
        assert!(ItemType::from_str("epic").is_err());
    }

    #[test]
    fn test_sorting_puts_undated_items_last() {
        let mut a = Item::new("B dated", ItemType::Task, "main");
        a.start_date = NaiveDate::from_ymd_opt(2025, 6, 1);
        let b = Item::new("A undated", ItemType::Task, "main");
        let mut c = Item::new("C earlier", ItemType::Milestone, "main");
        c.end_date = NaiveDate::from_ymd_opt(2025, 5, 1);

        let mut items = vec![a, b, c];
        items.sort();
        let titles: Vec<&str> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["C earlier", "B dated", "A undated"]);
    }

    #[test]
    fn test_serde_uses_type_key() {
        let item = Item::new("Launch", ItemType::Release, "main");
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"type\":\"release\""));
        assert!(!json.contains("source_id"));
    }
}
