//! Type inference over the first rows of a source.

use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;

use crate::{
    error::ImportError,
    names::{process_field_names, synthetic_field_names},
    source::{RawRow, RowSource},
    types::{FieldTypeMap, ValueClass, ValueRules, classify_value, field_type_for},
};

pub const DEFAULT_SAMPLE_ROWS: usize = 500;

#[derive(Debug, Clone)]
pub struct Sample {
    pub field_names: Vec<String>,
    pub field_types: FieldTypeMap,
    /// Sampled data rows, verbatim and in source order.
    pub rows: Vec<RawRow>,
    pub has_header: bool,
    /// Classes observed per field, in field order.
    pub classes: Vec<BTreeSet<ValueClass>>,
}

impl Sample {
    /// Rows a fresh reader of the same source must skip to land on the first
    /// row after the sample.
    pub fn rows_to_skip(&self) -> usize {
        usize::from(self.has_header) + self.rows.len()
    }

    pub fn profile(&self) -> Vec<FieldProfile> {
        self.field_types
            .iter()
            .zip(&self.classes)
            .map(|(spec, classes)| FieldProfile {
                name: spec.name.clone(),
                field_type: spec.field_type.to_string(),
                classes: classes.iter().map(ToString::to_string).collect(),
            })
            .collect()
    }
}

/// One field of a sample as shown to a user.
#[derive(Debug, Clone, Serialize)]
pub struct FieldProfile {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub classes: Vec<String>,
}

/// Reads up to `sample_size` data rows (at least one) and infers one type per
/// field. Rows after the sample are left unread in `source`.
pub fn sample(
    source: &mut dyn RowSource,
    sample_size: usize,
    rules: &ValueRules,
) -> Result<Sample, ImportError> {
    let limit = sample_size.max(1);
    let has_header = source.has_header();
    let header = if has_header {
        match source.next_row()? {
            Some(header) => Some(header),
            None => return Err(ImportError::EmptyData),
        }
    } else {
        None
    };

    let mut rows = Vec::with_capacity(limit.min(1_024));
    while rows.len() < limit {
        match source.next_row()? {
            Some(row) => rows.push(row),
            None => break,
        }
    }
    if rows.is_empty() {
        return Err(ImportError::EmptyData);
    }

    let field_names = match header {
        Some(header) => process_field_names(&header.display_values())?,
        None => synthetic_field_names(rows.iter().map(RawRow::len).max().unwrap_or(0)),
    };
    if field_names.is_empty() {
        return Err(ImportError::InvalidFieldNames(
            "the source has no fields".to_string(),
        ));
    }

    let classes: Vec<BTreeSet<ValueClass>> = (0..field_names.len())
        .map(|idx| {
            rows.iter()
                .map(|row| classify_value(row.get(idx), rules))
                .collect()
        })
        .collect();
    let field_types = FieldTypeMap::new(
        field_names
            .iter()
            .zip(&classes)
            .map(|(name, classes)| (name.clone(), field_type_for(classes))),
    );
    for (spec, classes) in field_types.iter().zip(&classes) {
        debug!(
            "Field '{}' sampled as {:?} -> {}",
            spec.name, classes, spec.field_type
        );
    }

    Ok(Sample {
        field_names,
        field_types,
        rows,
        has_header,
        classes,
    })
}

/// Rows after the first that the header heuristic looks at.
pub const HEADER_WINDOW: usize = 20;

/// Header heuristic: every cell of the first row is non-blank text, and some
/// row in the window that follows holds a number or a date.
pub fn looks_like_header<'a>(
    first: &RawRow,
    following: impl IntoIterator<Item = &'a RawRow>,
    rules: &ValueRules,
) -> bool {
    let first_is_labels = !first.is_empty()
        && first
            .values()
            .iter()
            .all(|value| classify_value(value, rules) == ValueClass::Text);
    first_is_labels
        && following
            .into_iter()
            .take(HEADER_WINDOW)
            .flat_map(|row| row.values())
            .any(|value| {
                matches!(
                    classify_value(value, rules),
                    ValueClass::Numeric | ValueClass::Datetime
                )
            })
}
