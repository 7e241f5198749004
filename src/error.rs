//! Error taxonomy for the import engine.
//!
//! Only [`ImportError::Mismatch`] is recoverable: the driver reacts to it by
//! retyping the offending field and restarting the staged load. Everything
//! else propagates unchanged to the caller. Cancellation is not an error and
//! never appears here; see [`crate::driver::ImportOutcome::Cancelled`].

use std::error::Error as StdError;

use thiserror::Error;

use crate::{store::StoreError, types::FieldType};

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Exit code for fatal errors (I/O, store, bad input).
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when the user or a deadline cancelled the import.
pub const EXIT_CANCELLED: i32 = 2;
/// Exit code when type inference could not be reconciled with the data.
pub const EXIT_INCONSISTENT_TYPES: i32 = 3;

/// A strict-mode value that does not fit its field's inferred type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Found data not matching the expected column type in field '{field_name}'\nRow: {row_number}\nValue: \"{raw_value}\"\nExpected column type: {expected_type}"
)]
pub struct MismatchError {
    pub field_name: String,
    /// 1-based data row number (header excluded).
    pub row_number: usize,
    pub raw_value: String,
    pub expected_type: FieldType,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Unable to read source: {context}")]
    SourceRead {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("No data to import")]
    EmptyData,
    #[error(transparent)]
    Mismatch(#[from] MismatchError),
    #[error("Store operation failed")]
    Store(#[from] StoreError),
    #[error("An import into table '{target}' is already in flight")]
    JobInFlight { target: String },
    #[error("Lost the claim on table '{target}' to another import")]
    LeaseLost { target: String },
    #[error("Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },
    #[error("Unable to use field names: {0}")]
    InvalidFieldNames(String),
    #[error("Incorrect number of fields in row {row}. Expected {expected} but found {found}")]
    RowShape {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("Mismatch between data in column and expected column type was not resolved")]
    MismatchUnresolved(#[source] MismatchError),
    #[error("Data types remained inconsistent after retyping field(s): {}", fields.join(", "))]
    RetriesExhausted {
        fields: Vec<String>,
        #[source]
        last: MismatchError,
    },
}

impl ImportError {
    pub fn source_read<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        ImportError::SourceRead {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ImportError::MismatchUnresolved(_) | ImportError::RetriesExhausted { .. } => {
                EXIT_INCONSISTENT_TYPES
            }
            _ => EXIT_FAILURE,
        }
    }
}

/// Finds the exit code for an error chain produced by the CLI layer.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ImportError>())
        .map(ImportError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}
