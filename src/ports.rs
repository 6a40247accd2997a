//! Capability traits for the external collaborators of the calibration stage.
//!
//! Every collaborator (catalog, stores, engine, alert sink) is reached through
//! an object-safe `async_trait` injected as `Arc<dyn Trait>`, so tests can
//! substitute the in-memory fakes in [`crate::testing`].

use crate::consolidate::EngineResult;
use crate::error::CalResult;
use crate::model::{
    BlobKind, BlobSeries, CadenceBlobMetadata, CadenceInterval, CadenceTimes, CadenceType,
    CollateralKind, EventSeries, Pixel, SeriesId, TargetType, TimeSeries,
};
use crate::particle::CalInputs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

/// One catalog target table and the cadences it was in effect for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTableLog {
    /// Database identifier.
    pub table_id: i64,
    /// Identifier uplinked to the spacecraft.
    pub external_id: i32,
    /// Table type.
    pub target_type: TargetType,
    /// Observing season the table was built for.
    pub observing_season: i32,
    /// First cadence collected with this table.
    pub cadence_start: i32,
    /// Last cadence collected with this table.
    pub cadence_end: i32,
}

impl TargetTableLog {
    /// Cadences collected with this table.
    pub fn cadences(&self) -> CadenceInterval {
        CadenceInterval::new(self.cadence_start, self.cadence_end)
    }
}

/// Instrument calibration model kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ModelKind {
    Gain,
    FlatField,
    TwoDBlack,
    Linearity,
    Undershoot,
    ReadNoise,
}

impl ModelKind {
    /// Every model the engine needs.
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Gain,
        ModelKind::FlatField,
        ModelKind::TwoDBlack,
        ModelKind::Linearity,
        ModelKind::Undershoot,
        ModelKind::ReadNoise,
    ];
}

/// An instrument calibration model valid over an mjd range.
///
/// The body is opaque to this stage and passed through to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    /// Model kind.
    pub kind: ModelKind,
    /// Module/output the model was retrieved for.
    pub module: i32,
    /// CCD output.
    pub output: i32,
    /// Model contents.
    pub body: serde_json::Value,
}

/// Compression table kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionKind {
    /// Requantization table.
    Requantization,
    /// Huffman coding table.
    Huffman,
}

impl CompressionKind {
    /// Human readable table name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            CompressionKind::Requantization => "requantization",
            CompressionKind::Huffman => "huffman",
        }
    }
}

/// A requantization or huffman table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionTable {
    /// Table kind.
    pub kind: CompressionKind,
    /// Identifier uplinked to the spacecraft.
    pub external_id: i32,
    /// First mjd the table was in effect.
    pub planned_start_mjd: f64,
    /// Table entries.
    pub entries: Vec<i64>,
}

/// A spacecraft configuration map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    /// Map identifier.
    pub id: i32,
    /// Mjd the map was activated.
    pub mjd: f64,
    /// Configuration entries.
    pub entries: BTreeMap<String, String>,
}

/// Catalog label selecting metric targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetLabel {
    /// Targets used to monitor the 2D black model.
    TwoDBlack,
    /// Targets used to monitor LDE undershoot.
    LdeUndershoot,
}

/// Aperture pixels of one labelled metric target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTargetId {
    /// Target key id.
    pub key_id: i32,
    /// Aperture rows, parallel to `columns`.
    pub rows: Vec<i32>,
    /// Aperture columns, parallel to `rows`.
    pub columns: Vec<i32>,
}

/// One collateral location read for a cadence type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollateralLocation {
    /// Collateral kind.
    pub kind: CollateralKind,
    /// Row or column offset.
    pub offset: i32,
}

impl CollateralLocation {
    /// Raw series identifier of this location.
    pub fn raw_id(&self, cadence_type: CadenceType, module: i32, output: i32) -> SeriesId {
        SeriesId::raw_collateral(self.kind, cadence_type, module, output, self.offset)
    }
}

/// A full frame image, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfiImage {
    /// Mid time of the exposure.
    pub mjd: f64,
    /// Pixel values keyed by CCD row.
    pub rows: BTreeMap<i32, Vec<f32>>,
}

impl FfiImage {
    /// Copy of this image holding only `rows`.
    pub fn restrict_rows(&self, rows: &BTreeSet<i32>) -> FfiImage {
        FfiImage {
            mjd: self.mjd,
            rows: self
                .rows
                .iter()
                .filter(|(row, _)| rows.contains(row))
                .map(|(row, values)| (*row, values.clone()))
                .collect(),
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Processing record written once per consolidated result batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingCharacteristics {
    /// Task that produced the outputs.
    pub pipeline_task_id: u64,
    /// CCD module.
    pub module: i32,
    /// CCD output.
    pub output: i32,
    /// Cadence type.
    pub cadence_type: CadenceType,
    /// First cadence.
    pub start_cadence: i32,
    /// Last cadence.
    pub end_cadence: i32,
    /// Black algorithm the engine reports having applied.
    pub black_algorithm: String,
    /// When the record was produced.
    pub recorded_at: DateTime<Utc>,
}

/// Read access to the target management catalog.
#[async_trait]
pub trait TargetCatalog: Send + Sync {
    /// Tables of `target_type` whose cadence range overlaps `interval`.
    async fn target_table_logs(
        &self,
        target_type: TargetType,
        interval: CadenceInterval,
    ) -> CalResult<Vec<TargetTableLog>>;

    /// The nearest cadence interval that is covered by pixel logs, if any.
    async fn closest_cadence_interval(
        &self,
        cadence_type: CadenceType,
        interval: CadenceInterval,
    ) -> CalResult<Option<CadenceInterval>>;

    /// Long cadences covering the short cadence interval, if known.
    async fn short_to_long_cadences(
        &self,
        interval: CadenceInterval,
    ) -> CalResult<Option<CadenceInterval>>;

    /// Mjd range the table was actually observed with.
    async fn table_observation_window(&self, table: &TargetTableLog) -> CalResult<(f64, f64)>;

    /// Labelled metric targets of a table on one module/output.
    async fn labeled_targets(
        &self,
        table_id: i64,
        label: TargetLabel,
        module: i32,
        output: i32,
    ) -> CalResult<Vec<MetricTargetId>>;

    /// Every pixel of a table on one module/output.
    async fn table_pixels(&self, table_id: i64, module: i32, output: i32)
        -> CalResult<Vec<Pixel>>;

    /// Collateral locations read out for a cadence type on one module/output.
    async fn collateral_locations(
        &self,
        cadence_type: CadenceType,
        table_id: i64,
        module: i32,
        output: i32,
    ) -> CalResult<Vec<CollateralLocation>>;
}

/// Per-cadence timestamps for one cadence type.
#[async_trait]
pub trait CadenceClock: Send + Sync {
    /// Timestamps, gaps and pointing state over `interval`.
    async fn cadence_times(&self, interval: CadenceInterval) -> CalResult<CadenceTimes>;
}

/// Creates [`CadenceClock`]s.
pub trait CadenceClockFactory: Send + Sync {
    /// A clock for the given cadence type.
    fn create(&self, cadence_type: CadenceType) -> Arc<dyn CadenceClock>;
}

/// Mapping between timestamps and observing quarters.
#[async_trait]
pub trait QuarterCalendar: Send + Sync {
    /// Quarter in effect at `mjd`.
    async fn mjd_to_quarter(&self, mjd: f64) -> CalResult<i32>;

    /// Last mjd of `quarter`.
    async fn quarter_end_mjd(&self, quarter: i32) -> CalResult<f64>;
}

/// Instrument calibration model repository.
#[async_trait]
pub trait CalibrationModels: Send + Sync {
    /// The model of `kind` valid over `[start_mjd, end_mjd]`.
    async fn model(
        &self,
        kind: ModelKind,
        start_mjd: f64,
        end_mjd: f64,
        module: i32,
        output: i32,
    ) -> CalResult<CalibrationModel>;
}

/// Compression table repository.
#[async_trait]
pub trait CompressionTables: Send + Sync {
    /// Every table of `kind` in effect during `[start_mjd, end_mjd]`.
    async fn tables(
        &self,
        kind: CompressionKind,
        start_mjd: f64,
        end_mjd: f64,
    ) -> CalResult<Vec<CompressionTable>>;
}

/// Spacecraft configuration map repository.
#[async_trait]
pub trait ConfigMaps: Send + Sync {
    /// Maps active while the long cadence `table` was in use.
    async fn config_maps(&self, table: &TargetTableLog) -> CalResult<Vec<ConfigMap>>;
}

/// Lookup of historical blobs by cadence range.
#[async_trait]
pub trait BlobSeriesSource: Send + Sync {
    /// Blobs of `kind` covering the long cadence `interval`.
    async fn blob_series(
        &self,
        kind: BlobKind,
        module: i32,
        output: i32,
        interval: CadenceInterval,
    ) -> CalResult<BlobSeries>;
}

/// Source of full frame images.
#[async_trait]
pub trait FfiSource: Send + Sync {
    /// Images of one module/output taken during `[start_mjd, end_mjd]`.
    async fn ffis(
        &self,
        module: i32,
        output: i32,
        start_mjd: f64,
        end_mjd: f64,
    ) -> CalResult<Vec<FfiImage>>;
}

/// The keyed time-series store.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Reads `ids` over `interval`.
    ///
    /// With `require_existing` unset, unknown ids come back fully gapped.
    async fn read_series(
        &self,
        ids: &[SeriesId],
        interval: CadenceInterval,
        require_existing: bool,
    ) -> CalResult<HashMap<SeriesId, TimeSeries>>;

    /// Writes a batch of cadence series.
    async fn write_series(&self, series: Vec<TimeSeries>) -> CalResult<()>;

    /// Erases every event in `[start_mjd, end_mjd]` of each series, then
    /// stores the series' events.
    async fn replace_event_series(
        &self,
        start_mjd: f64,
        end_mjd: f64,
        series: Vec<EventSeries>,
    ) -> CalResult<()>;
}

/// Binary artifact store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores the file at `path` under `id`, owned by `owner_task_id`.
    async fn write_blob(&self, id: &SeriesId, owner_task_id: u64, path: &Path) -> CalResult<()>;
}

/// Repository of blob metadata.
#[async_trait]
pub trait BlobMetadataRepository: Send + Sync {
    /// Existing metadata of one blob series.
    async fn blobs(
        &self,
        kind: BlobKind,
        module: i32,
        output: i32,
        cadence_type: CadenceType,
    ) -> CalResult<Vec<CadenceBlobMetadata>>;

    /// Deletes a metadata record.
    async fn delete(&self, blob: &CadenceBlobMetadata) -> CalResult<()>;

    /// Inserts a metadata record.
    async fn create(&self, blob: &CadenceBlobMetadata) -> CalResult<()>;
}

/// Repository of processing characteristics.
#[async_trait]
pub trait ProcessingRecords: Send + Sync {
    /// Records which black algorithm was applied.
    async fn record_processing(&self, record: &ProcessingCharacteristics) -> CalResult<()>;
}

/// Operator alert sink.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Publishes one alert.
    async fn publish(
        &self,
        source: &str,
        owner_task_id: u64,
        severity: Severity,
        message: &str,
    ) -> CalResult<()>;
}

/// The external calibration engine.
#[async_trait]
pub trait CalibrationEngine: Send + Sync {
    /// Runs one invocation per packaged input, returning results in order.
    async fn calibrate(&self, inputs: &[CalInputs]) -> CalResult<Vec<EngineResult>>;
}

/// Every collaborator of the calibration stage, shared by reference.
#[derive(Clone)]
pub struct CalServices {
    /// Target management catalog.
    pub catalog: Arc<dyn TargetCatalog>,
    /// Cadence clocks by cadence type.
    pub clocks: Arc<dyn CadenceClockFactory>,
    /// Quarter boundaries.
    pub calendar: Arc<dyn QuarterCalendar>,
    /// Instrument models.
    pub models: Arc<dyn CalibrationModels>,
    /// Compression tables.
    pub compression: Arc<dyn CompressionTables>,
    /// Spacecraft config maps.
    pub config_maps: Arc<dyn ConfigMaps>,
    /// Historical blob lookups.
    pub blob_series: Arc<dyn BlobSeriesSource>,
    /// Full frame images.
    pub ffis: Arc<dyn FfiSource>,
    /// Time-series store.
    pub store: Arc<dyn TimeSeriesStore>,
    /// Blob file store.
    pub blob_store: Arc<dyn BlobStore>,
    /// Blob metadata.
    pub blob_metadata: Arc<dyn BlobMetadataRepository>,
    /// Processing characteristics.
    pub processing: Arc<dyn ProcessingRecords>,
    /// Operator alerts.
    pub alerts: Arc<dyn AlertSink>,
}

impl std::fmt::Debug for CalServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalServices").finish_non_exhaustive()
    }
}
