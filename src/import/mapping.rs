// Column mapping: which source header feeds which item field.
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use strum::{EnumIter, EnumString, IntoEnumIterator};

use crate::model::parser::clean;

pub const DEFAULT_TAGS_DELIMITER: char = ',';

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TargetField {
    Title,
    Type,
    StartDate,
    EndDate,
    Owner,
    Lane,
    Project,
    Tags,
}

impl TargetField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::Title => "title",
            TargetField::Type => "type",
            TargetField::StartDate => "start_date",
            TargetField::EndDate => "end_date",
            TargetField::Owner => "owner",
            TargetField::Lane => "lane",
            TargetField::Project => "project",
            TargetField::Tags => "tags",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Self::Title | Self::Type)
    }

    pub fn required() -> impl Iterator<Item = TargetField> {
        Self::iter().filter(|f| f.is_required())
    }
}

impl fmt::Display for TargetField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of mappable target fields.
pub fn field_count() -> usize {
    TargetField::iter().count()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    #[serde(default)]
    pub fields: BTreeMap<TargetField, String>,
    /// Only consulted when `tags` is mapped. `None` means `,`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_delimiter: Option<char>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    pub valid: bool,
    pub missing_required: Vec<TargetField>,
    /// Headers assigned to more than one field. Allowed, reported as a warning.
    pub duplicate_headers: Vec<(String, Vec<TargetField>)>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: TargetField, header: &str) -> Self {
        self.set(field, header);
        self
    }

    /// Assigns `header` to `field`. An empty header clears the assignment.
    pub fn set(&mut self, field: TargetField, header: &str) {
        if header.trim().is_empty() {
            self.fields.remove(&field);
        } else {
            self.fields.insert(field, header.to_string());
        }
    }

    /// The header assigned to `field`, if any non-empty one is.
    pub fn header(&self, field: TargetField) -> Option<&str> {
        self.fields
            .get(&field)
            .map(String::as_str)
            .filter(|h| !h.trim().is_empty())
    }

    pub fn is_mapped(&self, field: TargetField) -> bool {
        self.header(field).is_some()
    }

    pub fn tags_delimiter(&self) -> char {
        self.tags_delimiter.unwrap_or(DEFAULT_TAGS_DELIMITER)
    }

    pub fn is_complete(&self) -> bool {
        TargetField::required().all(|f| self.is_mapped(f))
    }

    pub fn mapped_count(&self) -> usize {
        TargetField::iter().filter(|f| self.is_mapped(*f)).count()
    }

    pub fn validate(&self) -> MappingReport {
        let missing_required: Vec<TargetField> =
            TargetField::required().filter(|f| !self.is_mapped(*f)).collect();

        let mut by_header: BTreeMap<&str, Vec<TargetField>> = BTreeMap::new();
        for field in TargetField::iter() {
            if let Some(header) = self.header(field) {
                by_header.entry(header).or_default().push(field);
            }
        }
        let duplicate_headers = by_header
            .into_iter()
            .filter(|(_, fields)| fields.len() > 1)
            .map(|(header, fields)| (header.to_string(), fields))
            .collect();

        MappingReport {
            valid: missing_required.is_empty(),
            missing_required,
            duplicate_headers,
        }
    }

    /// Reads the trimmed, non-empty value of `field` from a row.
    pub fn value<'r>(&self, row: &'r HashMap<String, String>, field: TargetField) -> Option<&'r str> {
        let header = self.header(field)?;
        clean(row.get(header).map(String::as_str))
    }

    /// Headers named by the mapping that are absent from `headers`.
    pub fn unknown_headers<'a>(&'a self, headers: &[String]) -> Vec<&'a str> {
        let mut unknown: Vec<&str> = self
            .fields
            .values()
            .map(String::as_str)
            .filter(|h| !h.trim().is_empty() && !headers.iter().any(|x| x == h))
            .collect();
        unknown.sort_unstable();
        unknown.dedup();
        unknown
    }
}

/// Parses a `field=Header` assignment as typed on the command line.
pub fn parse_assignment(s: &str) -> Result<(TargetField, String), String> {
    let (field, header) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected <field>=<header>, got '{}'", s))?;
    let field = TargetField::from_str(field.trim())
        .map_err(|_| format!("Unknown field '{}'", field.trim()))?;
    Ok((field, header.trim().to_string()))
}
