//! Stage-then-swap loading of one import pass.
//!
//! A pass loads every row into a staging table and only promotes it onto the
//! target with a single atomic rename. Whatever goes wrong before that rename,
//! the staging table is dropped and the target is left as it was.

use std::iter;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::{
    convert::{CellValue, Converter, Strictness},
    error::ImportError,
    progress::{Controller, Tick},
    source::{RawRow, RowSource},
    store::{ColumnDef, Store, staging_name},
    types::FieldTypeMap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Created,
    StagingReady,
    Loading,
    Succeeded,
    Failed,
    Cancelled,
}

/// State of one staged load. A restart builds a fresh job.
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub id: Uuid,
    pub source: String,
    pub target: String,
    pub staging: String,
    pub sample_size: usize,
    pub field_types: FieldTypeMap,
    pub rows_processed: u64,
    pub cancelled: bool,
    state: CommitState,
}

impl ImportJob {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        sample_size: usize,
        field_types: FieldTypeMap,
    ) -> Self {
        let target = target.into();
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            staging: staging_name(&target),
            target,
            sample_size,
            field_types,
            rows_processed: 0,
            cancelled: false,
            state: CommitState::Created,
        }
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    fn transition(&mut self, next: CommitState) {
        debug!(
            "Job {} for '{}': {:?} -> {:?}",
            self.id, self.target, self.state, next
        );
        self.state = next;
    }
}

/// Exclusive claim on a target's staging table. The claim lives in the store,
/// so imports running in other processes against the same database see it.
#[derive(Debug)]
pub struct JobLease {
    target: String,
    key: String,
    owner: String,
}

impl JobLease {
    pub fn acquire(store: &mut dyn Store, target: &str) -> Result<Self, ImportError> {
        // SQL identifiers compare case-insensitively.
        let key = staging_name(target).to_lowercase();
        let owner = Uuid::new_v4().to_string();
        if !store.acquire_lease(&key, &owner)? {
            return Err(ImportError::JobInFlight {
                target: target.to_string(),
            });
        }
        debug!("Claimed '{key}' as {owner}");
        Ok(Self {
            target: target.to_string(),
            key,
            owner,
        })
    }

    /// Fails with [`ImportError::LeaseLost`] once another import has taken
    /// the claim over.
    pub fn renew(&self, store: &mut dyn Store) -> Result<(), ImportError> {
        if store.renew_lease(&self.key, &self.owner)? {
            Ok(())
        } else {
            Err(ImportError::LeaseLost {
                target: self.target.clone(),
            })
        }
    }

    /// An unreleased claim expires after [`crate::store::LEASE_TTL_SECS`].
    pub fn release(self, store: &mut dyn Store) {
        if let Err(err) = store.release_lease(&self.key, &self.owner) {
            warn!("Unable to release the claim on '{}': {err}", self.key);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStats {
    pub rows_loaded: u64,
    pub nulled_missing: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Succeeded(LoadStats),
    Cancelled { rows_processed: u64 },
}

enum LoadEnd {
    Complete(LoadStats),
    Cancelled,
}

struct Batch {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
    capacity: usize,
    first_row: usize,
}

impl Batch {
    fn new(columns: Vec<String>, capacity: usize) -> Self {
        Self {
            columns,
            rows: Vec::with_capacity(capacity),
            capacity,
            first_row: 1,
        }
    }

    /// Returns true once the batch is full.
    fn push(&mut self, values: Vec<CellValue>) -> bool {
        self.rows.push(values);
        self.rows.len() >= self.capacity
    }
}

pub struct StagedCommitter<'a> {
    store: &'a mut dyn Store,
    controller: &'a Controller,
    lease: &'a JobLease,
}

impl<'a> StagedCommitter<'a> {
    /// `lease` must be held on `job.target`; the staging table is only
    /// touched while it is.
    pub fn new(store: &'a mut dyn Store, controller: &'a Controller, lease: &'a JobLease) -> Self {
        Self {
            store,
            controller,
            lease,
        }
    }

    /// Loads `sample_rows` (leniently) then the rest of `rest` (strictly) into
    /// staging and swaps it onto the target. `rest` must be positioned on the
    /// first row after the sample.
    pub fn commit(
        &mut self,
        job: &mut ImportJob,
        sample_rows: &[RawRow],
        rest: &mut dyn RowSource,
        converter: &Converter<'_>,
    ) -> Result<PassOutcome, ImportError> {
        match self.load(job, sample_rows, rest, converter) {
            Ok(LoadEnd::Complete(stats)) => {
                if let Err(err) = self.store.rename_table(&job.staging, &job.target) {
                    self.discard(job, CommitState::Failed);
                    return Err(err.into());
                }
                job.transition(CommitState::Succeeded);
                info!(
                    "Loaded {} row(s) into '{}'",
                    stats.rows_loaded, job.target
                );
                Ok(PassOutcome::Succeeded(stats))
            }
            Ok(LoadEnd::Cancelled) => {
                job.cancelled = true;
                self.discard(job, CommitState::Cancelled);
                info!(
                    "Import into '{}' cancelled after {} row(s); target left unchanged",
                    job.target, job.rows_processed
                );
                Ok(PassOutcome::Cancelled {
                    rows_processed: job.rows_processed,
                })
            }
            Err(err @ ImportError::LeaseLost { .. }) => {
                // The staging table now belongs to whoever took the claim.
                job.transition(CommitState::Failed);
                Err(err)
            }
            Err(err) => {
                self.discard(job, CommitState::Failed);
                Err(err)
            }
        }
    }

    fn load(
        &mut self,
        job: &mut ImportJob,
        sample_rows: &[RawRow],
        rest: &mut dyn RowSource,
        converter: &Converter<'_>,
    ) -> Result<LoadEnd, ImportError> {
        if self.controller.is_cancelled() {
            return Ok(LoadEnd::Cancelled);
        }
        // A leftover staging table under our claim belongs to a dead job.
        self.lease.renew(&mut *self.store)?;
        self.store.drop_table_if_exists(&job.staging)?;
        let columns: Vec<ColumnDef> = iter::once(ColumnDef::row_id())
            .chain(
                job.field_types
                    .iter()
                    .map(|spec| ColumnDef::field(spec.name.clone(), spec.field_type)),
            )
            .collect();
        self.store.create_table(&job.staging, &columns)?;
        job.transition(CommitState::StagingReady);

        job.transition(CommitState::Loading);
        let mut batch = Batch::new(job.field_types.names(), self.controller.batch_size());
        let mut row_number = 0;
        let mut nulled_missing = 0;

        for row in sample_rows {
            row_number += 1;
            let converted = converter.convert(row, row_number, Strictness::Lenient)?;
            if batch.push(converted.values) && self.flush(job, &mut batch)? == Tick::Cancel {
                return Ok(LoadEnd::Cancelled);
            }
        }
        while let Some(row) = rest.next_row()? {
            row_number += 1;
            let converted = converter.convert(&row, row_number, Strictness::Strict)?;
            nulled_missing += converted.nulled_missing as u64;
            if batch.push(converted.values) && self.flush(job, &mut batch)? == Tick::Cancel {
                return Ok(LoadEnd::Cancelled);
            }
        }
        if !batch.rows.is_empty() && self.flush(job, &mut batch)? == Tick::Cancel {
            return Ok(LoadEnd::Cancelled);
        }

        Ok(LoadEnd::Complete(LoadStats {
            rows_loaded: job.rows_processed,
            nulled_missing,
        }))
    }

    fn flush(&mut self, job: &mut ImportJob, batch: &mut Batch) -> Result<Tick, ImportError> {
        self.store
            .bulk_insert(&job.staging, &batch.columns, &batch.rows, batch.first_row)?;
        self.lease.renew(&mut *self.store)?;
        job.rows_processed += batch.rows.len() as u64;
        batch.first_row += batch.rows.len();
        batch.rows.clear();
        Ok(self.controller.tick(job.rows_processed))
    }

    fn discard(&mut self, job: &mut ImportJob, state: CommitState) {
        if let Err(err) = self.store.drop_table_if_exists(&job.staging) {
            warn!("Unable to drop staging table '{}': {err}", job.staging);
        }
        job.transition(state);
    }
}
