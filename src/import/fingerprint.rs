// Content fingerprint of an imported row: detects "same item, nothing changed".
use crate::import::mapping::{ColumnMapping, TargetField};
use crate::model::parser::{parse_date, parse_item_type, split_tags};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// Hashed in this order. Identity metadata (source id, strategy) is never part of it.
const SCALAR_FIELDS: [TargetField; 7] = [
    TargetField::Title,
    TargetField::Type,
    TargetField::StartDate,
    TargetField::EndDate,
    TargetField::Owner,
    TargetField::Lane,
    TargetField::Project,
];

/// SHA-256 (hex) over the normalized mapped values of `row`.
///
/// Header names and column order do not matter, only values. Dates that parse
/// are hashed in ISO form and the type in its canonical spelling, so `6/1/2025`
/// and `2025-06-01` hash the same. Tags are hashed as their token list, making
/// the delimiter itself irrelevant.
pub fn fingerprint(row: &HashMap<String, String>, mapping: &ColumnMapping) -> String {
    let mut hasher = Sha256::new();

    for field in SCALAR_FIELDS {
        let value = mapping
            .value(row, field)
            .map(|raw| normalize_scalar(field, raw));
        write_optional(&mut hasher, value.as_deref());
    }

    let tags = mapping
        .value(row, TargetField::Tags)
        .map(|raw| split_tags(raw, mapping.tags_delimiter()))
        .unwrap_or_default();
    hasher.update((tags.len() as u64).to_le_bytes());
    for tag in &tags {
        write_str(&mut hasher, tag);
    }

    format!("{:x}", hasher.finalize())
}

fn normalize_scalar(field: TargetField, raw: &str) -> String {
    match field {
        TargetField::Type => parse_item_type(raw)
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| raw.to_string()),
        TargetField::StartDate | TargetField::EndDate => parse_date(raw)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| raw.to_string()),
        _ => raw.to_string(),
    }
}

// Length-prefixed so adjacent fields can never run into each other.
fn write_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn write_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            write_str(hasher, v);
        }
        None => hasher.update([0u8]),
    }
}
