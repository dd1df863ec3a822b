use crate::import::mapping::TargetField;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal to the whole import: no plan is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("column mapping is incomplete: required field(s) {} not mapped", join_fields(.missing))]
    MappingIncomplete { missing: Vec<TargetField> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum IdentityError {
    #[error("no ID column selected, or it is not among the source headers")]
    MissingIdColumn,
    #[error("ID column '{column}' is empty for this row")]
    EmptyIdValue { column: String },
    #[error("cannot match row: both project and title are empty")]
    AmbiguousIdentity,
}

/// Row-scoped failure. Recorded in the plan, never aborts the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RowError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("required value '{0}' is empty")]
    MissingValue(TargetField),
    #[error("invalid type '{value}' (must be {expected})")]
    InvalidType { value: String, expected: String },
    #[error("invalid date '{value}' in {field}")]
    InvalidDate { field: TargetField, value: String },
}

fn join_fields(fields: &[TargetField]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = ImportError::MappingIncomplete {
            missing: vec![TargetField::Title, TargetField::Type],
        };
        assert_eq!(
            err.to_string(),
            "column mapping is incomplete: required field(s) title, type not mapped"
        );

        let row: RowError = IdentityError::EmptyIdValue {
            column: "Key".to_string(),
        }
        .into();
        assert_eq!(row.to_string(), "ID column 'Key' is empty for this row");
        assert_eq!(
            RowError::MissingValue(TargetField::Title).to_string(),
            "required value 'title' is empty"
        );
    }
}
