//! Cell classification and column typing.
//!
//! Every sampled cell gets a [`ValueClass`]; the *set* of classes seen in a
//! field decides its [`FieldType`]. A [`FieldTypeMap`] is the authoritative
//! typing for one import pass and is never mutated: retyping a field builds a
//! new map.

use std::{borrow::Cow, collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::{datetime, source::RawValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ValueClass {
    Numeric,
    Datetime,
    EmptyString,
    Text,
}

impl fmt::Display for ValueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueClass::Numeric => "numeric",
            ValueClass::Datetime => "datetime",
            ValueClass::EmptyString => "empty",
            ValueClass::Text => "text",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Numeric,
    Datetime,
    Text,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldType::Numeric => "Numeric",
            FieldType::Datetime => "Datetime",
            FieldType::Text => "Text",
        };
        f.write_str(label)
    }
}

/// Locale-ish knobs that change how raw text is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueRules {
    /// Accept `,` as the decimal separator (`3,5` reads as `3.5`).
    pub decimal_comma: bool,
}

impl ValueRules {
    /// Comma decimals are only unambiguous when the comma is not the
    /// delimiter.
    pub fn for_delimiter(delimiter: u8) -> Self {
        Self {
            decimal_comma: delimiter != b',',
        }
    }
}

/// Outcome of reading a token as a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumberToken {
    /// Normalized lexical form, precision untouched.
    Finite(String),
    NotANumber,
}

pub fn parse_number(text: &str, rules: &ValueRules) -> Option<NumberToken> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if rules.decimal_comma && trimmed.contains(',') {
        Cow::Owned(trimmed.replace(',', "."))
    } else {
        Cow::Borrowed(trimmed)
    };
    match candidate.parse::<f64>() {
        Ok(value) if value.is_nan() => Some(NumberToken::NotANumber),
        Ok(value) if value.is_finite() => Some(NumberToken::Finite(candidate.into_owned())),
        _ => None,
    }
}

/// Empty text, or the quote pairs left behind by badly escaped CSV (`""`, `''`).
pub fn is_blank(text: &str) -> bool {
    matches!(text, "" | "''" | "\"\"")
}

pub fn classify_value(value: &RawValue, rules: &ValueRules) -> ValueClass {
    match value {
        RawValue::Missing => ValueClass::EmptyString,
        RawValue::DateTime(_) => ValueClass::Datetime,
        RawValue::Text(text) => {
            if parse_number(text, rules).is_some() {
                ValueClass::Numeric
            } else if datetime::is_datetime(text) {
                ValueClass::Datetime
            } else if is_blank(text) {
                ValueClass::EmptyString
            } else {
                ValueClass::Text
            }
        }
    }
}

/// Field type for the set of classes observed in a sample.
///
/// Any mixture (including numeric with datetime) falls back to text. A field
/// that was only ever empty also becomes text.
pub fn field_type_for(classes: &BTreeSet<ValueClass>) -> FieldType {
    let mut substantive = classes
        .iter()
        .filter(|class| **class != ValueClass::EmptyString);
    match (substantive.next(), substantive.next()) {
        (Some(ValueClass::Numeric), None) => FieldType::Numeric,
        (Some(ValueClass::Datetime), None) => FieldType::Datetime,
        _ => FieldType::Text,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Ordered field name to type mapping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldTypeMap {
    fields: Vec<FieldSpec>,
}

impl FieldTypeMap {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, field_type)| FieldSpec {
                    name: name.into(),
                    field_type,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.field_type)
    }

    pub fn type_at(&self, idx: usize) -> Option<FieldType> {
        self.fields.get(idx).map(|spec| spec.field_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|spec| spec.name.clone()).collect()
    }

    pub fn text_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|spec| spec.field_type == FieldType::Text)
            .count()
    }

    /// New map with `name` retyped as text. Returns `None` when the field is
    /// unknown or already text, since text never changes type again.
    pub fn downgraded(&self, name: &str) -> Option<FieldTypeMap> {
        let position = self.fields.iter().position(|spec| spec.name == name)?;
        if self.fields[position].field_type == FieldType::Text {
            return None;
        }
        let mut next = self.clone();
        next.fields[position].field_type = FieldType::Text;
        Some(next)
    }
}
