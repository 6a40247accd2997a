//! # Rust CAL Core Library
//!
//! Orchestration core of the pixel calibration stage. For one unit of work
//! (a CCD module/output over a cadence interval) it resolves the shared
//! calibration context, partitions the pixels into row-atomic chunks,
//! schedules and executes the work particles that retrieve and package the
//! data for the external calibration engine, and consolidates the engine's
//! outputs back into the stores.
//!
//! ## Crate Structure
//!
//! - **`error`**: the `CalError` enum and `CalResult` alias shared by every stage.
//! - **`config`**: figment-backed `CalConfig` (TOML file plus `RUST_CAL_` environment overrides).
//! - **`logging`**: tracing subscriber initialisation.
//! - **`model`**: cadences, pixels, collateral kinds, series identifiers and blob metadata.
//! - **`ports`**: async capability traits for the catalog, stores, engine and alert sink.
//! - **`partition`**: row-atomic pixel chunking.
//! - **`resolver`**: common parameters resolution and the cadence clock cache.
//! - **`schedule`**: the three-stage particle schedule.
//! - **`particle`**: the work particle state machine, presence rules and packaged inputs.
//! - **`dispatch`**: sequential or pooled stage execution.
//! - **`consolidate`**: output consolidation, blob supersession and cosmic-ray erasure.
//! - **`pipeline`**: the input generation and output consumption entry points.
//! - **`testing`**: in-memory fakes of every port.

pub mod config;
pub mod consolidate;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod model;
pub mod particle;
pub mod partition;
pub mod pipeline;
pub mod ports;
pub mod resolver;
pub mod schedule;
pub mod testing;

pub use error::{CalError, CalResult};
pub use pipeline::CalPipeline;
