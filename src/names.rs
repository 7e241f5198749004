//! Field and table naming rules.

use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    error::ImportError,
    store::{LEASE_TABLE, STAGING_PREFIX},
};

/// Surrogate row identifier carried by every staged and imported table.
pub const ROW_ID_COLUMN: &str = "import_row_id";
pub const MAX_NAME_LEN: usize = 90;
const SUFFIX_WIDTH: usize = 3;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^A-Za-z0-9]+").expect("static pattern"));

/// Positional names for sources without a header: `Field_1`, `Field_2`, ...
pub fn synthetic_field_names(count: usize) -> Vec<String> {
    (1..=count).map(synthetic_name).collect()
}

fn synthetic_name(position: usize) -> String {
    format!("Field_{position}")
}

/// Cleans header names so they are usable as column names.
///
/// Spaces and newlines become underscores, overlong names are truncated,
/// blanks get a positional name and duplicates (compared case-insensitively,
/// as SQL identifiers are) get a numeric suffix.
pub fn process_field_names(raw_names: &[String]) -> Result<Vec<String>, ImportError> {
    let cleaned: Vec<String> = raw_names
        .iter()
        .map(|name| {
            let name = name.trim().replace([' ', '\n', '\r'], "_");
            if name.chars().count() > MAX_NAME_LEN {
                name.chars().take(MAX_NAME_LEN - SUFFIX_WIDTH).collect()
            } else {
                name
            }
        })
        .collect();

    if let Some(reserved) = cleaned
        .iter()
        .find(|name| name.eq_ignore_ascii_case(ROW_ID_COLUMN))
    {
        return Err(ImportError::InvalidFieldNames(format!(
            "'{reserved}' is a reserved field name"
        )));
    }

    let lowered: Vec<String> = cleaned.iter().map(|n| n.to_lowercase()).collect();
    let mut taken: HashSet<String> = lowered.iter().cloned().collect();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(cleaned.len());
    for (idx, name) in cleaned.iter().enumerate() {
        if name.is_empty() || name == "None" {
            let mut position = idx + 1;
            let mut candidate = synthetic_name(position);
            while taken.contains(&candidate.to_lowercase()) {
                position += raw_names.len();
                candidate = synthetic_name(position);
            }
            taken.insert(candidate.to_lowercase());
            names.push(candidate);
            continue;
        }
        let key = &lowered[idx];
        let occurrences = lowered.iter().filter(|other| *other == key).count();
        if occurrences == 1 {
            names.push(name.clone());
            continue;
        }
        let stem: String = name.chars().take(MAX_NAME_LEN - SUFFIX_WIDTH).collect();
        let counter = counters.entry(key.clone()).or_insert(0);
        let candidate = loop {
            *counter += 1;
            let candidate = format!("{stem}{:0width$}", *counter, width = SUFFIX_WIDTH);
            if !taken.contains(&candidate.to_lowercase()) {
                break candidate;
            }
        };
        taken.insert(candidate.to_lowercase());
        names.push(candidate);
    }
    Ok(names)
}

/// Collapses anything but ASCII letters and digits into underscores.
pub fn safer_name(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw, "_").into_owned()
}

pub fn validate_table_name(name: &str) -> Result<(), ImportError> {
    let invalid = |reason: &str| {
        Err(ImportError::InvalidTableName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };
    if name.is_empty() {
        return invalid("a table name is required");
    }
    if name.contains(' ') {
        return invalid("table names can't have empty spaces");
    }
    if name.contains('-') {
        return invalid("do not include '-' in table names");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return invalid("table names cannot start with a digit");
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return invalid("only letters, numbers and underscores are allowed");
    }
    if name.chars().count() > MAX_NAME_LEN {
        return invalid("name is too long");
    }
    if name.starts_with(STAGING_PREFIX) {
        return invalid("the name is reserved for staging tables");
    }
    if name.eq_ignore_ascii_case(LEASE_TABLE) {
        return invalid("the name is reserved for import bookkeeping");
    }
    Ok(())
}
