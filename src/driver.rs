//! Import orchestration and the bounded retype-and-restart loop.

use std::collections::BTreeSet;

use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    committer::{ImportJob, JobLease, PassOutcome, StagedCommitter},
    convert::Converter,
    error::{ImportError, MismatchError},
    names::validate_table_name,
    progress::Controller,
    sampler::{self, DEFAULT_SAMPLE_ROWS, Sample},
    source::{RowSource, SourceOpener},
    store::Store,
    types::{FieldTypeMap, ValueRules},
};

/// What to do when a row past the sample does not fit its field's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Retype the field as text and restart.
    #[default]
    Text,
    /// Keep the type, store non-conforming values as NULL and restart.
    Null,
    /// Stop without importing.
    Abort,
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub sample_size: usize,
    /// Rows per insert batch; derived from the row estimate when unset.
    pub batch_size: Option<usize>,
    pub mismatch_policy: MismatchPolicy,
    pub value_rules: ValueRules,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_ROWS,
            batch_size: None,
            mismatch_policy: MismatchPolicy::default(),
            value_rules: ValueRules::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub job_id: Uuid,
    pub source: String,
    pub table: String,
    pub rows_loaded: u64,
    pub field_types: FieldTypeMap,
    /// Fields retyped as text after a mismatch.
    pub downgraded: Vec<String>,
    /// Fields whose non-conforming values were stored as NULL.
    pub nulled_fields: Vec<String>,
    pub restarts: usize,
    /// Missing-value indicators stored as NULL.
    pub nulled_missing: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Succeeded(ImportReport),
    Cancelled { rows_processed: u64 },
}

/// Imports `opener`'s rows into `target`, replacing any existing table of that
/// name only if the whole load succeeds.
pub fn import(
    opener: &dyn SourceOpener,
    store: &mut dyn Store,
    target: &str,
    options: &ImportOptions,
    controller: &Controller,
) -> Result<ImportOutcome, ImportError> {
    validate_table_name(target)?;
    let lease = JobLease::acquire(store, target)?;
    let result = run_import(opener, store, target, options, controller, &lease);
    lease.release(store);
    result
}

fn run_import(
    opener: &dyn SourceOpener,
    store: &mut dyn Store,
    target: &str,
    options: &ImportOptions,
    controller: &Controller,
    lease: &JobLease,
) -> Result<ImportOutcome, ImportError> {
    if controller.is_cancelled() {
        return Ok(ImportOutcome::Cancelled { rows_processed: 0 });
    }

    let description = opener.describe();
    info!("Sampling up to {} row(s) of {description}", options.sample_size);
    let mut first_pass = opener.open()?;
    let sample = sampler::sample(first_pass.as_mut(), options.sample_size, &options.value_rules)?;
    info!(
        "Inferred {} field(s) from {} sampled row(s)",
        sample.field_types.len(),
        sample.rows.len()
    );

    let mut controller = controller
        .clone()
        .with_total_estimate(first_pass.rows_estimate());
    if let Some(batch_size) = options.batch_size {
        controller = controller.with_batch_size(batch_size);
    }

    let mut retry = RetryState::new(sample.field_types.clone());
    let mut pending_source = Some(first_pass);
    loop {
        let mut rest = match pending_source.take() {
            Some(source) => source,
            None => reopen_after_sample(opener, &sample)?,
        };
        let mut job = ImportJob::new(
            description.clone(),
            target,
            sample.rows.len(),
            retry.field_types.clone(),
        );
        let result = {
            let converter =
                Converter::new(&retry.field_types, options.value_rules, &retry.null_invalid);
            StagedCommitter::new(store, &controller, lease).commit(
                &mut job,
                &sample.rows,
                rest.as_mut(),
                &converter,
            )
        };

        match result {
            Ok(PassOutcome::Succeeded(stats)) => {
                return Ok(ImportOutcome::Succeeded(ImportReport {
                    job_id: job.id,
                    source: description,
                    table: target.to_string(),
                    rows_loaded: stats.rows_loaded,
                    field_types: retry.field_types,
                    downgraded: retry.downgraded,
                    nulled_fields: retry.null_invalid.into_iter().collect(),
                    restarts: retry.restarts,
                    nulled_missing: stats.nulled_missing,
                }));
            }
            Ok(PassOutcome::Cancelled { rows_processed }) => {
                return Ok(ImportOutcome::Cancelled { rows_processed });
            }
            Err(ImportError::Mismatch(mismatch)) => {
                retry.resolve(mismatch, options.mismatch_policy)?;
                if controller.is_cancelled() {
                    return Ok(ImportOutcome::Cancelled {
                        rows_processed: job.rows_processed,
                    });
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Samples a source without touching any store.
pub fn probe(
    opener: &dyn SourceOpener,
    sample_size: usize,
    rules: &ValueRules,
) -> Result<Sample, ImportError> {
    let mut source = opener.open()?;
    sampler::sample(source.as_mut(), sample_size, rules)
}

fn reopen_after_sample(
    opener: &dyn SourceOpener,
    sample: &Sample,
) -> Result<Box<dyn RowSource>, ImportError> {
    let mut source = opener.open()?;
    let wanted = sample.rows_to_skip();
    let skipped = source.skip_rows(wanted)?;
    if skipped < wanted {
        return Err(ImportError::source_read(
            opener.describe(),
            format!("source shrank while importing: expected {wanted} leading row(s), found {skipped}"),
        ));
    }
    Ok(source)
}

/// Typing decisions accumulated across restarts. Each field is resolved at
/// most once, so at most one restart per field can happen.
struct RetryState {
    field_types: FieldTypeMap,
    null_invalid: BTreeSet<String>,
    downgraded: Vec<String>,
    resolved: Vec<String>,
    restarts: usize,
}

impl RetryState {
    fn new(field_types: FieldTypeMap) -> Self {
        Self {
            field_types,
            null_invalid: BTreeSet::new(),
            downgraded: Vec::new(),
            resolved: Vec::new(),
            restarts: 0,
        }
    }

    fn exhausted(&self, last: MismatchError) -> ImportError {
        let mut fields = self.resolved.clone();
        if !fields.contains(&last.field_name) {
            fields.push(last.field_name.clone());
        }
        ImportError::RetriesExhausted { fields, last }
    }

    fn resolve(
        &mut self,
        mismatch: MismatchError,
        policy: MismatchPolicy,
    ) -> Result<(), ImportError> {
        let field = mismatch.field_name.clone();
        if self.resolved.contains(&field) || self.restarts >= self.field_types.len() {
            return Err(self.exhausted(mismatch));
        }
        match policy {
            MismatchPolicy::Abort => return Err(ImportError::MismatchUnresolved(mismatch)),
            MismatchPolicy::Text => match self.field_types.downgraded(&field) {
                Some(next) => {
                    self.field_types = next;
                    self.downgraded.push(field.clone());
                }
                None => return Err(self.exhausted(mismatch)),
            },
            MismatchPolicy::Null => {
                self.null_invalid.insert(field.clone());
            }
        }
        self.resolved.push(field.clone());
        self.restarts += 1;
        let action = match policy {
            MismatchPolicy::Null => "storing non-conforming values as NULL",
            _ => "retyping it as Text",
        };
        warn!(
            "{mismatch}\nField '{field}': {action}; restarting load ({}/{})",
            self.restarts,
            self.field_types.len()
        );
        Ok(())
    }
}
