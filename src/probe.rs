use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;

use crate::{
    build_source,
    cli::ProbeArgs,
    driver,
    sampler::{FieldProfile, Sample},
    table::render_field_profile,
};

/// Probe result as written to YAML.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub source: String,
    pub has_header: bool,
    pub sampled_rows: usize,
    pub fields: Vec<FieldProfile>,
}

impl ProbeReport {
    pub fn from_sample(source: impl Into<String>, sample: &Sample) -> Self {
        Self {
            source: source.into(),
            has_header: sample.has_header,
            sampled_rows: sample.rows.len(),
            fields: sample.profile(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Serializing probe report")?;
        fs::write(path, yaml).with_context(|| format!("Writing probe report to {path:?}"))
    }
}

pub fn execute(args: &ProbeArgs) -> Result<()> {
    let (opener, rules) = build_source(&args.source)?;
    let description = opener.describe();
    let sample = driver::probe(opener.as_ref(), args.source.sample_rows, &rules)
        .with_context(|| format!("Sampling {description}"))?;
    let report = ProbeReport::from_sample(description, &sample);
    print!(
        "{}",
        render_field_profile(&report.fields, report.sampled_rows)
    );
    if let Some(path) = &args.output {
        report.save(path)?;
        info!(
            "Field types for {} field(s) written to {path:?}",
            report.fields.len()
        );
    }
    Ok(())
}
