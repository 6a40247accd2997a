//! Custom error types for the calibration orchestration core.
//!
//! This module defines `CalError`, the single error type shared by the resolver,
//! the work particles, the dispatcher and the output consolidator.
//!
//! ## Error Taxonomy
//!
//! - **Catalog / configuration** (`AmbiguousCoverage`, `UncoveredInterval`,
//!   `BackgroundTableCount`, `QuarterStraddle`, `CompressionTableCount`,
//!   `MissingConfigMap`, `MissingLongCadenceMapping`, `MissingFfi`): the unit of
//!   work cannot be processed as configured. These always carry the cadence
//!   interval and module/output involved.
//! - **Storage** (`Storage`, `MalformedSeries`): a collaborator returned
//!   something unusable. Retrieval and write failures abort the invocation.
//! - **Engine** (`EngineFailure`): one engine invocation reported failure. This is
//!   the only non-fatal variant; consolidation of the remaining results continues
//!   unless the caller runs in single-artifact mode.
//! - **Ambient** (`Configuration`, `Config`, `Io`, `Serialization`, `Join`,
//!   `WorkerPool`): settings, filesystem and runtime failures.
//!
//! "No covering target table" is not an error: the resolver reports it as
//! data-absent parameters.

use crate::model::{CadenceType, TargetType};
use thiserror::Error;

/// Convenience alias for results using the calibration error type.
pub type CalResult<T> = std::result::Result<T, CalError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum CalError {
    #[error(
        "Found {count} {target_type} target tables covering cadences \
         [{start_cadence},{end_cadence}]; expected exactly one"
    )]
    AmbiguousCoverage {
        target_type: TargetType,
        count: usize,
        start_cadence: i32,
        end_cadence: i32,
    },

    #[error(
        "Specified {cadence_type} cadences [{start_cadence},{end_cadence}] are not associated \
         with pixel logs and no better covering interval was found; the interval likely falls \
         off the edge of the known data"
    )]
    UncoveredInterval {
        cadence_type: CadenceType,
        start_cadence: i32,
        end_cadence: i32,
    },

    #[error(
        "Long cadence target table {table_id} covering cadences [{start_cadence},{end_cadence}] \
         must have exactly one background target table but found {count}"
    )]
    BackgroundTableCount {
        table_id: i64,
        count: usize,
        start_cadence: i32,
        end_cadence: i32,
    },

    #[error(
        "Unit of work for module {module} output {output} cadences [{start_cadence},{end_cadence}] \
         spans quarters: the quarter for mjd {start_mjd} is {start_quarter}, \
         the quarter for mjd {end_mjd} is {end_quarter}"
    )]
    QuarterStraddle {
        module: i32,
        output: i32,
        start_cadence: i32,
        end_cadence: i32,
        start_mjd: f64,
        end_mjd: f64,
        start_quarter: i32,
        end_quarter: i32,
    },

    #[error(
        "Expected exactly one {table} table for module {module} output {output} \
         mjd [{start_mjd},{end_mjd}] but found {count}"
    )]
    CompressionTableCount {
        table: &'static str,
        count: usize,
        module: i32,
        output: i32,
        start_mjd: f64,
        end_mjd: f64,
    },

    #[error(
        "Need at least one spacecraft config map for target table {table_id} \
         (module {module} output {output}), but found none"
    )]
    MissingConfigMap {
        table_id: i64,
        module: i32,
        output: i32,
    },

    #[error("Missing covering long cadences for short cadences [{start_cadence},{end_cadence}]")]
    MissingLongCadenceMapping { start_cadence: i32, end_cadence: i32 },

    #[error(
        "Expected non-empty list of full frame images for module {module} output {output} \
         in mjd [{start_mjd},{end_mjd}]"
    )]
    MissingFfi {
        module: i32,
        output: i32,
        start_mjd: f64,
        end_mjd: f64,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Malformed time series {id}: {reason}")]
    MalformedSeries { id: String, reason: String },

    #[error("Work particle {0} has already been executed")]
    ParticleAlreadyExecuted(usize),

    #[error("Calibration engine failed for invocation {invocation}: {message}")]
    EngineFailure { invocation: usize, message: String },

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl CalError {
    /// Returns true when the error must abort the whole invocation.
    ///
    /// Only per-invocation engine failures are recoverable; the caller decides
    /// whether to skip them based on its result mode.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CalError::EngineFailure { .. })
    }

    pub(crate) fn malformed(id: impl ToString, reason: impl Into<String>) -> Self {
        CalError::MalformedSeries {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failures_are_not_fatal() {
        let err = CalError::EngineFailure {
            invocation: 3,
            message: "engine exited with status 1".into(),
        };
        assert!(!err.is_fatal());
        assert!(CalError::Storage("disk gone".into()).is_fatal());
    }

    #[test]
    fn quarter_straddle_names_both_quarters() {
        let err = CalError::QuarterStraddle {
            module: 7,
            output: 3,
            start_cadence: 100,
            end_cadence: 200,
            start_mjd: 55000.5,
            end_mjd: 55100.5,
            start_quarter: 4,
            end_quarter: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("module 7 output 3"));
        assert!(msg.contains("[100,200]"));
        assert!(msg.contains("is 4"));
        assert!(msg.contains("is 5"));
    }

    #[test]
    fn ambiguous_coverage_reports_table_count() {
        let err = CalError::AmbiguousCoverage {
            target_type: TargetType::LongCadence,
            count: 2,
            start_cadence: 1,
            end_cadence: 10,
        };
        assert!(err.to_string().starts_with("Found 2 long cadence target tables"));
    }
}
