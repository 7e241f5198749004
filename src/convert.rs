//! Row validation and conversion into storable cells.
//!
//! Sample rows go through [`Strictness::Lenient`]: the sampler already typed
//! them, so values are only normalized. Rows past the sample go through
//! [`Strictness::Strict`] and must fit their field's type.

use std::collections::BTreeSet;

use crate::{
    datetime,
    error::{ImportError, MismatchError},
    source::{RawRow, RawValue},
    types::{FieldType, FieldTypeMap, NumberToken, ValueRules, is_blank, parse_number},
};

/// Lone full stop used by data entry to mark a missing observation.
pub const MISSING_INDICATOR: &str = ".";

/// A value ready to be bound into an insert statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Null,
    /// Lexical form as read (after decimal-comma normalization); never
    /// round-tripped through a float.
    Number(String),
    /// Canonical `YYYY-MM-DD HH:MM:SS` form.
    DateTime(String),
    Text(String),
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Null => None,
            CellValue::Number(text) | CellValue::DateTime(text) | CellValue::Text(text) => {
                Some(text)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    Lenient,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConvertedRow {
    pub values: Vec<CellValue>,
    /// Missing-indicator values turned into NULL in this row.
    pub nulled_missing: usize,
}

/// Converts rows against one authoritative [`FieldTypeMap`].
#[derive(Debug, Clone, Copy)]
pub struct Converter<'a> {
    types: &'a FieldTypeMap,
    rules: ValueRules,
    null_invalid: &'a BTreeSet<String>,
}

enum Checked {
    Value(CellValue),
    MissingIndicator,
    Invalid,
}

impl<'a> Converter<'a> {
    /// `null_invalid` names fields whose non-conforming values become NULL
    /// instead of raising a mismatch.
    pub fn new(
        types: &'a FieldTypeMap,
        rules: ValueRules,
        null_invalid: &'a BTreeSet<String>,
    ) -> Self {
        Self {
            types,
            rules,
            null_invalid,
        }
    }

    pub fn convert(
        &self,
        row: &RawRow,
        row_number: usize,
        mode: Strictness,
    ) -> Result<ConvertedRow, ImportError> {
        if row.len() > self.types.len() {
            return Err(ImportError::RowShape {
                row: row_number,
                expected: self.types.len(),
                found: row.len(),
            });
        }

        let mut converted = ConvertedRow {
            values: Vec::with_capacity(self.types.len()),
            nulled_missing: 0,
        };
        for (idx, spec) in self.types.iter().enumerate() {
            let raw = row.get(idx);
            let value = match mode {
                Strictness::Lenient => self.lenient(raw, spec.field_type),
                Strictness::Strict => match self.strict(raw, spec.field_type) {
                    Checked::Value(value) => value,
                    Checked::MissingIndicator => {
                        converted.nulled_missing += 1;
                        CellValue::Null
                    }
                    Checked::Invalid if self.null_invalid.contains(&spec.name) => CellValue::Null,
                    Checked::Invalid => {
                        return Err(MismatchError {
                            field_name: spec.name.clone(),
                            row_number,
                            raw_value: raw.display(),
                            expected_type: spec.field_type,
                        }
                        .into());
                    }
                },
            };
            converted.values.push(value);
        }
        Ok(converted)
    }

    fn lenient(&self, raw: &RawValue, field_type: FieldType) -> CellValue {
        let text = match raw {
            RawValue::Missing => return CellValue::Null,
            RawValue::DateTime(dt) => {
                let canonical = datetime::to_canonical(dt);
                return match field_type {
                    FieldType::Text => CellValue::Text(canonical),
                    _ => CellValue::DateTime(canonical),
                };
            }
            RawValue::Text(text) => text,
        };
        match field_type {
            FieldType::Text => CellValue::Text(text.clone()),
            _ if is_blank(text) => CellValue::Null,
            FieldType::Numeric => match parse_number(text, &self.rules) {
                Some(NumberToken::Finite(number)) => CellValue::Number(number),
                Some(NumberToken::NotANumber) => CellValue::Null,
                None => CellValue::Text(text.clone()),
            },
            FieldType::Datetime => datetime::canonicalize(text)
                .map(CellValue::DateTime)
                .unwrap_or_else(|| CellValue::Text(text.clone())),
        }
    }

    fn strict(&self, raw: &RawValue, field_type: FieldType) -> Checked {
        let text = match raw {
            RawValue::Missing => return Checked::Value(CellValue::Null),
            RawValue::DateTime(dt) => {
                let canonical = datetime::to_canonical(dt);
                return match field_type {
                    FieldType::Datetime => Checked::Value(CellValue::DateTime(canonical)),
                    FieldType::Text => Checked::Value(CellValue::Text(canonical)),
                    FieldType::Numeric => Checked::Invalid,
                };
            }
            RawValue::Text(text) => text,
        };
        match field_type {
            FieldType::Text => Checked::Value(CellValue::Text(text.clone())),
            _ if is_blank(text) => Checked::Value(CellValue::Null),
            _ if text.trim() == MISSING_INDICATOR => Checked::MissingIndicator,
            FieldType::Numeric => match parse_number(text, &self.rules) {
                Some(NumberToken::Finite(number)) => Checked::Value(CellValue::Number(number)),
                Some(NumberToken::NotANumber) => Checked::Value(CellValue::Null),
                None => Checked::Invalid,
            },
            FieldType::Datetime => match datetime::canonicalize(text) {
                Some(canonical) => Checked::Value(CellValue::DateTime(canonical)),
                None => Checked::Invalid,
            },
        }
    }
}

/// Converts one row with default value rules and no nulled fields.
pub fn convert_row(
    row: &RawRow,
    types: &FieldTypeMap,
    row_number: usize,
    mode: Strictness,
) -> Result<Vec<CellValue>, ImportError> {
    let no_nulls = BTreeSet::new();
    Converter::new(types, ValueRules::default(), &no_nulls)
        .convert(row, row_number, mode)
        .map(|converted| converted.values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn types() -> FieldTypeMap {
        FieldTypeMap::new([
            ("id", FieldType::Numeric),
            ("seen", FieldType::Datetime),
            ("note", FieldType::Text),
        ])
    }

    #[test]
    fn lenient_nulls_empty_typed_values_and_keeps_text() {
        let row = RawRow::from_strs(&["", "''", ""]);
        let values = convert_row(&row, &types(), 1, Strictness::Lenient).unwrap();
        assert_eq!(
            values,
            vec![CellValue::Null, CellValue::Null, CellValue::Text(String::new())]
        );
    }

    #[test]
    fn native_datetimes_are_canonicalized() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(8, 5, 0)
            .unwrap();
        let row = RawRow::new(vec![
            RawValue::text("7"),
            RawValue::DateTime(dt),
            RawValue::DateTime(dt),
        ]);
        for mode in [Strictness::Lenient, Strictness::Strict] {
            let values = convert_row(&row, &types(), 1, mode).unwrap();
            assert_eq!(values[1], CellValue::DateTime("2024-03-09 08:05:00".into()));
            assert_eq!(values[2], CellValue::Text("2024-03-09 08:05:00".into()));
        }
    }

    #[test]
    fn strict_keeps_number_lexical_form() {
        let row = RawRow::from_strs(&["10.50", "21/12/2009 4pm", "x"]);
        let values = convert_row(&row, &types(), 3, Strictness::Strict).unwrap();
        assert_eq!(values[0], CellValue::Number("10.50".into()));
        assert_eq!(values[1], CellValue::DateTime("2009-12-21 16:00:00".into()));
    }

    #[test]
    fn strict_mismatch_carries_context() {
        let row = RawRow::from_strs(&["abc", "", ""]);
        let err = convert_row(&row, &types(), 42, Strictness::Strict).unwrap_err();
        match err {
            ImportError::Mismatch(mismatch) => {
                assert_eq!(mismatch.field_name, "id");
                assert_eq!(mismatch.row_number, 42);
                assert_eq!(mismatch.raw_value, "abc");
                assert_eq!(mismatch.expected_type, FieldType::Numeric);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_indicator_and_nan_become_null() {
        let map = types();
        let none = BTreeSet::new();
        let converter = Converter::new(&map, ValueRules::default(), &none);
        let row = RawRow::from_strs(&[".", ".", "."]);
        let converted = converter.convert(&row, 9, Strictness::Strict).unwrap();
        assert_eq!(converted.nulled_missing, 2);
        assert_eq!(converted.values[2], CellValue::Text(".".into()));

        let nan = RawRow::from_strs(&["NaN", "", ""]);
        let converted = converter.convert(&nan, 10, Strictness::Strict).unwrap();
        assert_eq!(converted.values[0], CellValue::Null);
    }

    #[test]
    fn null_invalid_fields_swallow_mismatches() {
        let map = types();
        let nulled: BTreeSet<String> = ["id".to_string()].into();
        let converter = Converter::new(&map, ValueRules::default(), &nulled);
        let row = RawRow::from_strs(&["abc", "not a date", ""]);
        let err = converter.convert(&row, 5, Strictness::Strict).unwrap_err();
        assert!(matches!(err, ImportError::Mismatch(ref m) if m.field_name == "seen"));

        let row = RawRow::from_strs(&["abc", "2020-01-01", ""]);
        let converted = converter.convert(&row, 5, Strictness::Strict).unwrap();
        assert_eq!(converted.values[0], CellValue::Null);
    }

    #[test]
    fn decimal_comma_is_normalized() {
        let map = FieldTypeMap::new([("amount", FieldType::Numeric)]);
        let none = BTreeSet::new();
        let converter = Converter::new(&map, ValueRules { decimal_comma: true }, &none);
        let converted = converter
            .convert(&RawRow::from_strs(&["3,25"]), 1, Strictness::Strict)
            .unwrap();
        assert_eq!(converted.values, vec![CellValue::Number("3.25".into())]);
    }

    #[test]
    fn long_rows_are_rejected_short_rows_padded() {
        let map = FieldTypeMap::new([("a", FieldType::Text), ("b", FieldType::Numeric)]);
        let err = convert_row(&RawRow::from_strs(&["1", "2", "3"]), &map, 4, Strictness::Lenient)
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::RowShape {
                row: 4,
                expected: 2,
                found: 3
            }
        ));
        let values = convert_row(&RawRow::from_strs(&["1"]), &map, 5, Strictness::Strict).unwrap();
        assert_eq!(values, vec![CellValue::Text("1".into()), CellValue::Null]);
    }
}
