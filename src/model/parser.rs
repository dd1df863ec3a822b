// File: src/model/parser.rs
// Normalization of raw tabular cell values into typed item attributes.
use crate::model::ItemType;
use chrono::NaiveDate;
use std::str::FromStr;
use strum::IntoEnumIterator;

// Tried in order. chrono accepts unpadded month/day for %m/%d when parsing.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y"];

/// Trims a cell and treats whitespace-only as absent.
pub fn clean(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_item_type(raw: &str) -> Option<ItemType> {
    ItemType::from_str(raw.trim()).ok()
}

pub fn valid_item_types() -> String {
    ItemType::iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Splits a tag cell on `delimiter`. Tokens are trimmed and empty tokens dropped;
/// order and duplicates are kept.
pub fn split_tags(raw: &str, delimiter: char) -> Vec<String> {
    raw.split(delimiter)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-folds and trims, collapsing inner whitespace runs to one space.
pub fn normalize_key_part(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
