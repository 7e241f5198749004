//! Plain-text rendering of probe and import reports.

use std::borrow::Cow;
use std::fmt::Write as _;

use crate::{driver::ImportReport, sampler::FieldProfile};

/// Left-aligned columns separated by two spaces, with a dashed rule under the
/// header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(flatten(cell).chars().count());
        }
    }

    let mut output = String::new();
    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(3))).collect();
    let _ = writeln!(output, "{}", format_row(&rule, &widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn render_field_profile(fields: &[FieldProfile], sampled_rows: usize) -> String {
    let rows: Vec<Vec<String>> = fields
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            vec![
                (idx + 1).to_string(),
                field.name.clone(),
                field.field_type.clone(),
                field.classes.join(", "),
            ]
        })
        .collect();
    let mut output = render_table(&["#", "field", "type", "sampled classes"], &rows);
    let _ = writeln!(output, "{} field(s) inferred from {sampled_rows} row(s)", fields.len());
    output
}

pub fn render_import_report(report: &ImportReport) -> String {
    let rows: Vec<Vec<String>> = report
        .field_types
        .iter()
        .map(|spec| {
            let note = if report.downgraded.contains(&spec.name) {
                "retyped as Text"
            } else if report.nulled_fields.contains(&spec.name) {
                "non-matching values stored as NULL"
            } else {
                ""
            };
            vec![spec.name.clone(), spec.field_type.to_string(), note.to_string()]
        })
        .collect();
    let mut output = render_table(&["field", "type", "note"], &rows);
    let _ = writeln!(
        output,
        "{} row(s) loaded into '{}' after {} restart(s)",
        report.rows_loaded, report.table, report.restarts
    );
    if report.nulled_missing > 0 {
        let _ = writeln!(
            output,
            "{} missing-value indicator(s) stored as NULL",
            report.nulled_missing
        );
    }
    output
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| format!("{:<width$}", flatten(value), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    let trimmed = line.trim_end().len();
    line.truncate(trimmed);
    line
}

fn flatten(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}
