// Identity resolution: the key used to re-find an imported row among stored items.
use crate::import::error::IdentityError;
use crate::import::mapping::{ColumnMapping, TargetField};
use crate::model::parser::normalize_key_part;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MATCH_KEY_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdStrategy {
    /// Every row gets a fresh identifier and is always inserted.
    Generate,
    /// The raw value of `id_column` is the identity.
    Column { id_column: String },
    /// Identity derived from normalized project + title.
    Match,
}

impl IdStrategy {
    pub fn column(id_column: &str) -> Self {
        Self::Column {
            id_column: id_column.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Column { .. } => "column",
            Self::Match => "match",
        }
    }
}

impl fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column { id_column } => write!(f, "column:{}", id_column),
            other => f.write_str(other.name()),
        }
    }
}

/// `generate`, `match` or `column:<header>`.
impl FromStr for IdStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(column) = s.strip_prefix("column:") {
            return Ok(Self::column(column.trim()));
        }
        match s.to_lowercase().as_str() {
            "generate" => Ok(Self::Generate),
            "match" => Ok(Self::Match),
            "column" => Err("The column strategy needs a header: column:<header>".to_string()),
            _ => Err(format!(
                "Unknown ID strategy '{}' (expected generate, match or column:<header>)",
                s
            )),
        }
    }
}

/// Resolves the identity of one row.
///
/// `headers` are the source headers of the whole table; the `column` strategy
/// fails with `MissingIdColumn` when its column is not one of them. For a fixed
/// strategy and mapping this is deterministic, except `generate` which by
/// definition never repeats.
pub fn resolve_id(
    strategy: &IdStrategy,
    row: &HashMap<String, String>,
    mapping: &ColumnMapping,
    headers: &[String],
) -> Result<String, IdentityError> {
    match strategy {
        IdStrategy::Generate => Ok(Uuid::new_v4().to_string()),
        IdStrategy::Column { id_column } => {
            if id_column.trim().is_empty() || !headers.iter().any(|h| h == id_column) {
                return Err(IdentityError::MissingIdColumn);
            }
            match row.get(id_column) {
                Some(value) if !value.trim().is_empty() => Ok(value.clone()),
                _ => Err(IdentityError::EmptyIdValue {
                    column: id_column.clone(),
                }),
            }
        }
        IdStrategy::Match => {
            let project = mapping
                .value(row, TargetField::Project)
                .map(normalize_key_part)
                .unwrap_or_default();
            let title = mapping
                .value(row, TargetField::Title)
                .map(normalize_key_part)
                .unwrap_or_default();
            if project.is_empty() && title.is_empty() {
                return Err(IdentityError::AmbiguousIdentity);
            }
            Ok(match_key(&project, &title))
        }
    }
}

/// Joins normalized parts so that no two different (project, title) pairs
/// collide: the separator and the escape character are escaped inside parts.
pub fn match_key(project: &str, title: &str) -> String {
    format!(
        "{}{}{}",
        escape_part(project),
        MATCH_KEY_SEPARATOR,
        escape_part(title)
    )
}

fn escape_part(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if c == '\\' || c == MATCH_KEY_SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::new()
            .with(TargetField::Title, "Title")
            .with(TargetField::Type, "Type")
            .with(TargetField::Project, "Project")
    }

    #[test]
    fn test_generate_is_unique() {
        let r = row(&[("Title", "Task 1")]);
        let h = headers(&["Title"]);
        let a = resolve_id(&IdStrategy::Generate, &r, &mapping(), &h).unwrap();
        let b = resolve_id(&IdStrategy::Generate, &r, &mapping(), &h).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_column_uses_raw_value() {
        let r = row(&[("id", " X1 "), ("Title", "Task")]);
        let h = headers(&["id", "Title"]);
        let id = resolve_id(&IdStrategy::column("id"), &r, &mapping(), &h).unwrap();
        assert_eq!(id, " X1 ");
    }

    #[test]
    fn test_column_errors() {
        let h = headers(&["id", "Title"]);
        let r = row(&[("id", ""), ("Title", "Task")]);
        assert_eq!(
            resolve_id(&IdStrategy::column(""), &r, &mapping(), &h),
            Err(IdentityError::MissingIdColumn)
        );
        assert_eq!(
            resolve_id(&IdStrategy::column("key"), &r, &mapping(), &h),
            Err(IdentityError::MissingIdColumn)
        );
        assert_eq!(
            resolve_id(&IdStrategy::column("id"), &r, &mapping(), &h),
            Err(IdentityError::EmptyIdValue {
                column: "id".to_string()
            })
        );
        let r = row(&[("Title", "Task")]);
        assert!(matches!(
            resolve_id(&IdStrategy::column("id"), &r, &mapping(), &h),
            Err(IdentityError::EmptyIdValue { .. })
        ));
    }

    #[test]
    fn test_match_normalizes_case_and_whitespace() {
        let h = headers(&["Title", "Project"]);
        let a = row(&[("Project", "Project A"), ("Title", "Release 1.0")]);
        let b = row(&[("Project", "  project a "), ("Title", "RELEASE 1.0  ")]);
        let id_a = resolve_id(&IdStrategy::Match, &a, &mapping(), &h).unwrap();
        let id_b = resolve_id(&IdStrategy::Match, &b, &mapping(), &h).unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(id_a, "project a|release 1.0");
    }

    #[test]
    fn test_match_title_only_and_ambiguous() {
        let h = headers(&["Title", "Project"]);
        let no_project = row(&[("Title", "Launch")]);
        assert_eq!(
            resolve_id(&IdStrategy::Match, &no_project, &mapping(), &h).unwrap(),
            "|launch"
        );

        let unmapped_project = ColumnMapping::new()
            .with(TargetField::Title, "Title")
            .with(TargetField::Type, "Type");
        let with_project = row(&[("Title", "Launch"), ("Project", "Acme")]);
        assert_eq!(
            resolve_id(&IdStrategy::Match, &with_project, &unmapped_project, &h).unwrap(),
            "|launch"
        );

        let empty = row(&[("Title", " "), ("Project", "")]);
        assert_eq!(
            resolve_id(&IdStrategy::Match, &empty, &mapping(), &h),
            Err(IdentityError::AmbiguousIdentity)
        );
    }

    #[test]
    fn test_match_key_does_not_collide_on_separator() {
        assert_ne!(match_key("a|b", "c"), match_key("a", "b|c"));
        assert_ne!(match_key("a\\", "b"), match_key("a", "\\b"));
        assert_eq!(match_key("acme", "launch"), "acme|launch");
    }

    #[test]
    fn test_strategy_parsing_and_display() {
        assert_eq!("generate".parse::<IdStrategy>().unwrap(), IdStrategy::Generate);
        assert_eq!("Match".parse::<IdStrategy>().unwrap(), IdStrategy::Match);
        let column: IdStrategy = "column:Task ID".parse().unwrap();
        assert_eq!(column, IdStrategy::column("Task ID"));
        assert_eq!(column.to_string(), "column:Task ID");
        assert!("column".parse::<IdStrategy>().is_err());
        assert!("random".parse::<IdStrategy>().is_err());
    }

    #[test]
    fn test_strategy_serde_is_tagged() {
        let json = serde_json::to_string(&IdStrategy::column("id")).unwrap();
        assert_eq!(json, r#"{"kind":"column","id_column":"id"}"#);
        let back: IdStrategy = serde_json::from_str(r#"{"kind":"match"}"#).unwrap();
        assert_eq!(back, IdStrategy::Match);
    }
}
