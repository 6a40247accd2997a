//! In-memory collaborators
//!
//! Fakes of every port in [`crate::ports`], for unit and integration tests and
//! for dry runs without a catalog or store.
//!
//! # Available Fakes
//!
//! - `FakeCatalog` - target tables, pixels and collateral locations from a [`CatalogFixture`]
//! - `FakeClockFactory` - synthetic timestamps with configurable gaps and coarse point
//! - `FakeCalendar` - one quarter boundary at a configurable mjd
//! - `InMemoryStore` - cadence and event series in memory, with read failure injection
//! - `FakeBlobMetadata` / `RecordingBlobStore` - blob bookkeeping
//! - `FakeEngine` - echoes packaged inputs back as calibrated outputs
//!
//! [`FakeServices`] bundles them and seeds consistent data for a unit of work.

use crate::config::ModuleParameters;
use crate::consolidate::{
    CalOutputs, CalibratedCollateral, CalibratedPixel, EngineResult, MetricSeries,
};
use crate::error::{CalError, CalResult};
use crate::model::{
    BlobKind, BlobSeries, CadenceBlobMetadata, CadenceInterval, CadenceTimes, CadenceType,
    CollateralKind, EventSeries, Pixel, SeriesId, SeriesValues, TargetType, TimeSeries,
};
use crate::particle::CalInputs;
use crate::ports::{
    AlertSink, BlobMetadataRepository, BlobSeriesSource, BlobStore, CadenceClock,
    CadenceClockFactory, CalServices, CalibrationEngine, CalibrationModel, CalibrationModels,
    CollateralLocation, CompressionKind, CompressionTable, CompressionTables, ConfigMap,
    ConfigMaps, FfiImage, FfiSource, MetricTargetId, ModelKind, ProcessingCharacteristics,
    ProcessingRecords, QuarterCalendar, Severity, TargetCatalog, TargetLabel, TargetTableLog,
    TimeSeriesStore,
};
use crate::resolver::{
    CadenceClockCache, CommonParameters, CommonParametersResolver, Coverage, PipelineInfo,
    UnitOfWork,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Mjd of long cadence zero.
pub const EPOCH_MJD: f64 = 55_000.0;
/// Duration of one long cadence in days.
pub const LONG_CADENCE_DAYS: f64 = 0.02;
/// Duration of one short cadence in days.
pub const SHORT_CADENCE_DAYS: f64 = LONG_CADENCE_DAYS / 30.0;
/// End of quarter 1 when no boundary is configured.
pub const DEFAULT_QUARTER_END_MJD: f64 = 56_000.0;

/// Start mjd of `cadence`.
pub fn cadence_start_mjd(cadence_type: CadenceType, cadence: i32) -> f64 {
    let step = match cadence_type {
        CadenceType::Long => LONG_CADENCE_DAYS,
        CadenceType::Short => SHORT_CADENCE_DAYS,
    };
    EPOCH_MJD + f64::from(cadence) * step
}

fn cadence_days(cadence_type: CadenceType) -> f64 {
    match cadence_type {
        CadenceType::Long => LONG_CADENCE_DAYS,
        CadenceType::Short => SHORT_CADENCE_DAYS,
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Target tables and cadence mappings served by [`FakeCatalog`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogFixture {
    /// Long cadence table.
    pub lc_table: TargetTableLog,
    /// Background table paired with `lc_table`.
    pub background_table: TargetTableLog,
    /// Short cadence table, for short cadence fixtures.
    pub sc_table: Option<TargetTableLog>,
    /// Additional long cadence tables.
    pub extra_lc_tables: Vec<TargetTableLog>,
    /// Answer of `closest_cadence_interval`.
    pub closest: Option<CadenceInterval>,
    /// Answer of `short_to_long_cadences`.
    pub short_to_long: Option<CadenceInterval>,
}

fn table(table_id: i64, target_type: TargetType, start: i32, end: i32) -> TargetTableLog {
    TargetTableLog {
        table_id,
        external_id: 100 + table_id as i32,
        target_type,
        observing_season: 2,
        cadence_start: start,
        cadence_end: end,
    }
}

impl CatalogFixture {
    /// One long cadence table (id 1) and its background table (id 2).
    pub fn long_cadence(start: i32, end: i32) -> Self {
        Self {
            lc_table: table(1, TargetType::LongCadence, start, end),
            background_table: table(2, TargetType::Background, start, end),
            sc_table: None,
            extra_lc_tables: Vec::new(),
            closest: None,
            short_to_long: None,
        }
    }

    /// A short cadence table (id 3) over `[sc_start, sc_end]` that maps to the
    /// long cadence fixture over `[lc_start, lc_end]`.
    pub fn short_cadence(sc_start: i32, sc_end: i32, lc_start: i32, lc_end: i32) -> Self {
        Self {
            sc_table: Some(table(3, TargetType::ShortCadence, sc_start, sc_end)),
            short_to_long: Some(CadenceInterval::new(lc_start, lc_end)),
            ..Self::long_cadence(lc_start, lc_end)
        }
    }

    /// Sets the closest covered interval reported for uncovered requests.
    pub fn with_closest(mut self, start: i32, end: i32) -> Self {
        self.closest = Some(CadenceInterval::new(start, end));
        self
    }

    /// Adds a second long cadence table (id 4).
    pub fn with_extra_lc_table(mut self, start: i32, end: i32) -> Self {
        self.extra_lc_tables
            .push(table(4, TargetType::LongCadence, start, end));
        self
    }

    fn tables(&self) -> impl Iterator<Item = &TargetTableLog> {
        std::iter::once(&self.lc_table)
            .chain(std::iter::once(&self.background_table))
            .chain(self.sc_table.iter())
            .chain(self.extra_lc_tables.iter())
    }
}

/// Catalog backed by a [`CatalogFixture`].
#[derive(Debug)]
pub struct FakeCatalog {
    fixture: CatalogFixture,
    pixels: Mutex<HashMap<i64, Vec<Pixel>>>,
    collateral: Mutex<HashMap<(CadenceType, i64), Vec<CollateralLocation>>>,
    labeled: Mutex<HashMap<(i64, TargetLabel), Vec<MetricTargetId>>>,
}

impl FakeCatalog {
    /// Creates a catalog with no pixels.
    pub fn new(fixture: CatalogFixture) -> Self {
        Self {
            fixture,
            pixels: Mutex::new(HashMap::new()),
            collateral: Mutex::new(HashMap::new()),
            labeled: Mutex::new(HashMap::new()),
        }
    }

    /// The fixture in use.
    pub fn fixture(&self) -> &CatalogFixture {
        &self.fixture
    }

    /// Adds pixels to a table.
    pub fn add_pixels(&self, table_id: i64, pixels: impl IntoIterator<Item = Pixel>) {
        self.pixels.lock().entry(table_id).or_default().extend(pixels);
    }

    /// Sets the collateral locations of a table.
    pub fn set_collateral(
        &self,
        cadence_type: CadenceType,
        table_id: i64,
        locations: Vec<CollateralLocation>,
    ) {
        self.collateral
            .lock()
            .insert((cadence_type, table_id), locations);
    }

    /// Adds a labelled metric target to a table.
    pub fn add_labeled_target(&self, table_id: i64, label: TargetLabel, target: MetricTargetId) {
        self.labeled
            .lock()
            .entry((table_id, label))
            .or_default()
            .push(target);
    }
}

#[async_trait]
impl TargetCatalog for FakeCatalog {
    async fn target_table_logs(
        &self,
        target_type: TargetType,
        interval: CadenceInterval,
    ) -> CalResult<Vec<TargetTableLog>> {
        Ok(self
            .fixture
            .tables()
            .filter(|t| t.target_type == target_type && t.cadences().overlaps(&interval))
            .cloned()
            .collect())
    }

    async fn closest_cadence_interval(
        &self,
        _cadence_type: CadenceType,
        _interval: CadenceInterval,
    ) -> CalResult<Option<CadenceInterval>> {
        Ok(self.fixture.closest)
    }

    async fn short_to_long_cadences(
        &self,
        _interval: CadenceInterval,
    ) -> CalResult<Option<CadenceInterval>> {
        Ok(self.fixture.short_to_long)
    }

    async fn table_observation_window(&self, table: &TargetTableLog) -> CalResult<(f64, f64)> {
        let cadence_type = match table.target_type {
            TargetType::ShortCadence => CadenceType::Short,
            _ => CadenceType::Long,
        };
        Ok((
            cadence_start_mjd(cadence_type, table.cadence_start),
            cadence_start_mjd(cadence_type, table.cadence_end) + cadence_days(cadence_type),
        ))
    }

    async fn labeled_targets(
        &self,
        table_id: i64,
        label: TargetLabel,
        _module: i32,
        _output: i32,
    ) -> CalResult<Vec<MetricTargetId>> {
        Ok(self
            .labeled
            .lock()
            .get(&(table_id, label))
            .cloned()
            .unwrap_or_default())
    }

    async fn table_pixels(&self, table_id: i64, _module: i32, _output: i32) -> CalResult<Vec<Pixel>> {
        Ok(self.pixels.lock().get(&table_id).cloned().unwrap_or_default())
    }

    async fn collateral_locations(
        &self,
        cadence_type: CadenceType,
        table_id: i64,
        _module: i32,
        _output: i32,
    ) -> CalResult<Vec<CollateralLocation>> {
        Ok(self
            .collateral
            .lock()
            .get(&(cadence_type, table_id))
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Cadence clock and calendar
// =============================================================================

#[derive(Debug, Default)]
struct ClockSettings {
    gaps: BTreeSet<i32>,
    coarse_point: BTreeSet<i32>,
}

/// Creates [`FakeClock`]s sharing one set of gapped and coarse-point cadences.
#[derive(Debug, Default)]
pub struct FakeClockFactory {
    settings: Arc<Mutex<ClockSettings>>,
    created: Mutex<usize>,
}

impl FakeClockFactory {
    /// Marks `cadences` as not collected.
    pub fn gap_cadences(&self, cadences: impl IntoIterator<Item = i32>) {
        self.settings.lock().gaps.extend(cadences);
    }

    /// Marks `cadences` as collected in coarse point.
    pub fn coarse_point_cadences(&self, cadences: impl IntoIterator<Item = i32>) {
        self.settings.lock().coarse_point.extend(cadences);
    }

    /// Number of clocks created.
    pub fn created(&self) -> usize {
        *self.created.lock()
    }
}

impl CadenceClockFactory for FakeClockFactory {
    fn create(&self, cadence_type: CadenceType) -> Arc<dyn CadenceClock> {
        *self.created.lock() += 1;
        Arc::new(FakeClock {
            cadence_type,
            settings: Arc::clone(&self.settings),
        })
    }
}

/// Evenly spaced timestamps starting at [`EPOCH_MJD`].
#[derive(Debug)]
pub struct FakeClock {
    cadence_type: CadenceType,
    settings: Arc<Mutex<ClockSettings>>,
}

impl FakeClock {
    fn times(&self, interval: CadenceInterval) -> CadenceTimes {
        let settings = self.settings.lock();
        let step = cadence_days(self.cadence_type);
        let cadences: Vec<i32> = if interval.is_empty() {
            Vec::new()
        } else {
            (interval.start..=interval.end).collect()
        };
        let start_mjds: Vec<f64> = cadences
            .iter()
            .map(|c| cadence_start_mjd(self.cadence_type, *c))
            .collect();
        CadenceTimes {
            cadence_type: self.cadence_type,
            start_cadence: interval.start,
            end_cadence: interval.end,
            mid_mjds: start_mjds.iter().map(|m| m + step / 2.0).collect(),
            end_mjds: start_mjds.iter().map(|m| m + step).collect(),
            start_mjds,
            gaps: cadences.iter().map(|c| settings.gaps.contains(c)).collect(),
            fine_point: cadences
                .iter()
                .map(|c| !settings.coarse_point.contains(c))
                .collect(),
        }
    }
}

#[async_trait]
impl CadenceClock for FakeClock {
    async fn cadence_times(&self, interval: CadenceInterval) -> CalResult<CadenceTimes> {
        Ok(self.times(interval))
    }
}

/// Quarter 1 up to an optional boundary, quarter 2 after it.
#[derive(Debug, Default)]
pub struct FakeCalendar {
    boundary: Mutex<Option<f64>>,
}

impl FakeCalendar {
    /// Starts quarter 2 at `mjd`.
    pub fn set_boundary(&self, mjd: f64) {
        *self.boundary.lock() = Some(mjd);
    }
}

#[async_trait]
impl QuarterCalendar for FakeCalendar {
    async fn mjd_to_quarter(&self, mjd: f64) -> CalResult<i32> {
        Ok(match *self.boundary.lock() {
            Some(boundary) if mjd >= boundary => 2,
            _ => 1,
        })
    }

    async fn quarter_end_mjd(&self, quarter: i32) -> CalResult<f64> {
        let first_end = self.boundary.lock().unwrap_or(DEFAULT_QUARTER_END_MJD);
        Ok(first_end + 90.0 * f64::from(quarter - 1))
    }
}

// =============================================================================
// Models, tables, config maps, blob series, images
// =============================================================================

/// Returns one model of every kind for any request.
#[derive(Debug, Default)]
pub struct FakeModels;

#[async_trait]
impl CalibrationModels for FakeModels {
    async fn model(
        &self,
        kind: ModelKind,
        start_mjd: f64,
        end_mjd: f64,
        module: i32,
        output: i32,
    ) -> CalResult<CalibrationModel> {
        Ok(CalibrationModel {
            kind,
            module,
            output,
            body: serde_json::json!({ "mjds": [start_mjd, end_mjd] }),
        })
    }
}

/// Compression tables; starts with one table of each kind.
#[derive(Debug)]
pub struct FakeCompressionTables {
    tables: Mutex<Vec<CompressionTable>>,
}

impl Default for FakeCompressionTables {
    fn default() -> Self {
        let table = |kind| CompressionTable {
            kind,
            external_id: 1,
            planned_start_mjd: EPOCH_MJD,
            entries: vec![0, 1, 2, 3],
        };
        Self {
            tables: Mutex::new(vec![
                table(CompressionKind::Requantization),
                table(CompressionKind::Huffman),
            ]),
        }
    }
}

impl FakeCompressionTables {
    /// Adds another table of `kind`.
    pub fn add(&self, kind: CompressionKind, external_id: i32) {
        self.tables.lock().push(CompressionTable {
            kind,
            external_id,
            planned_start_mjd: EPOCH_MJD,
            entries: Vec::new(),
        });
    }
}

#[async_trait]
impl CompressionTables for FakeCompressionTables {
    async fn tables(
        &self,
        kind: CompressionKind,
        _start_mjd: f64,
        _end_mjd: f64,
    ) -> CalResult<Vec<CompressionTable>> {
        Ok(self
            .tables
            .lock()
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect())
    }
}

/// Config maps; starts with one map.
#[derive(Debug)]
pub struct FakeConfigMaps {
    maps: Mutex<Vec<ConfigMap>>,
}

impl Default for FakeConfigMaps {
    fn default() -> Self {
        Self {
            maps: Mutex::new(vec![ConfigMap {
                id: 1,
                mjd: EPOCH_MJD,
                entries: BTreeMap::from([("fdmIntTime".to_string(), "6.0".to_string())]),
            }]),
        }
    }
}

impl FakeConfigMaps {
    /// Removes every map.
    pub fn clear(&self) {
        self.maps.lock().clear();
    }
}

#[async_trait]
impl ConfigMaps for FakeConfigMaps {
    async fn config_maps(&self, _table: &TargetTableLog) -> CalResult<Vec<ConfigMap>> {
        Ok(self.maps.lock().clone())
    }
}

/// Serves one blob file per request and records the requests.
#[derive(Debug, Default)]
pub struct FakeBlobSeries {
    requests: Mutex<Vec<(BlobKind, CadenceInterval)>>,
}

impl FakeBlobSeries {
    /// Requests received, in order.
    pub fn requests(&self) -> Vec<(BlobKind, CadenceInterval)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl BlobSeriesSource for FakeBlobSeries {
    async fn blob_series(
        &self,
        kind: BlobKind,
        _module: i32,
        _output: i32,
        interval: CadenceInterval,
    ) -> CalResult<BlobSeries> {
        self.requests.lock().push((kind, interval));
        let len = interval.len();
        Ok(BlobSeries {
            start_cadence: interval.start,
            end_cadence: interval.end,
            blob_indices: vec![0; len],
            gaps: vec![false; len],
            file_names: vec![format!("{kind}-{}-{}.bin", interval.start, interval.end)],
        })
    }
}

/// Full frame images; starts empty.
#[derive(Debug, Default)]
pub struct FakeFfis {
    images: Mutex<Vec<FfiImage>>,
}

impl FakeFfis {
    /// Adds an image with the given rows.
    pub fn add_image(&self, mjd: f64, rows: &[(i32, Vec<f32>)]) {
        self.images.lock().push(FfiImage {
            mjd,
            rows: rows.iter().cloned().collect(),
        });
    }
}

#[async_trait]
impl FfiSource for FakeFfis {
    async fn ffis(
        &self,
        _module: i32,
        _output: i32,
        start_mjd: f64,
        end_mjd: f64,
    ) -> CalResult<Vec<FfiImage>> {
        Ok(self
            .images
            .lock()
            .iter()
            .filter(|image| image.mjd >= start_mjd && image.mjd <= end_mjd)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Stores
// =============================================================================

/// Time-series store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    series: Mutex<HashMap<SeriesId, TimeSeries>>,
    events: Mutex<BTreeMap<SeriesId, Vec<(f64, f32)>>>,
    read_batches: Mutex<Vec<usize>>,
    write_batches: Mutex<Vec<usize>>,
    event_windows: Mutex<Vec<(f64, f64)>>,
    fail_reads: Mutex<bool>,
}

impl InMemoryStore {
    /// Stores `series`, replacing any series with the same id.
    pub fn put(&self, series: TimeSeries) {
        self.series.lock().insert(series.id.clone(), series);
    }

    /// A stored series.
    pub fn get(&self, id: &SeriesId) -> Option<TimeSeries> {
        self.series.lock().get(id).cloned()
    }

    /// Makes every subsequent read fail.
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    /// Size of each read batch received.
    pub fn read_batch_sizes(&self) -> Vec<usize> {
        self.read_batches.lock().clone()
    }

    /// Size of each write batch received.
    pub fn write_batch_sizes(&self) -> Vec<usize> {
        self.write_batches.lock().clone()
    }

    /// Stores events at one location.
    pub fn put_events(&self, id: SeriesId, events: &[(f64, f32)]) {
        self.events.lock().entry(id).or_default().extend_from_slice(events);
    }

    /// Stored events at one location, by time.
    pub fn events(&self, id: &SeriesId) -> Vec<(f64, f32)> {
        self.events.lock().get(id).cloned().unwrap_or_default()
    }

    /// Windows passed to `replace_event_series`.
    pub fn event_windows(&self) -> Vec<(f64, f64)> {
        self.event_windows.lock().clone()
    }
}

#[async_trait]
impl TimeSeriesStore for InMemoryStore {
    async fn read_series(
        &self,
        ids: &[SeriesId],
        interval: CadenceInterval,
        require_existing: bool,
    ) -> CalResult<HashMap<SeriesId, TimeSeries>> {
        self.read_batches.lock().push(ids.len());
        if *self.fail_reads.lock() {
            return Err(CalError::Storage(format!(
                "read of {} series over cadences {} failed",
                ids.len(),
                interval
            )));
        }
        let stored = self.series.lock();
        let mut found = HashMap::new();
        for id in ids {
            match stored.get(id) {
                Some(series) => {
                    found.insert(id.clone(), series.clone());
                }
                None if require_existing => {
                    return Err(CalError::Storage(format!("series {id} does not exist")));
                }
                None => {}
            }
        }
        Ok(found)
    }

    async fn write_series(&self, series: Vec<TimeSeries>) -> CalResult<()> {
        self.write_batches.lock().push(series.len());
        let mut stored = self.series.lock();
        for s in series {
            stored.insert(s.id.clone(), s);
        }
        Ok(())
    }

    async fn replace_event_series(
        &self,
        start_mjd: f64,
        end_mjd: f64,
        series: Vec<EventSeries>,
    ) -> CalResult<()> {
        self.event_windows.lock().push((start_mjd, end_mjd));
        let mut events = self.events.lock();
        for s in series {
            let stored = events.entry(s.id.clone()).or_default();
            stored.retain(|(mjd, _)| *mjd < start_mjd || *mjd > end_mjd);
            stored.extend(s.mjds.iter().copied().zip(s.values.iter().copied()));
            stored.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        Ok(())
    }
}

/// Blob store recording what it was given.
///
/// The source file must exist.
#[derive(Debug, Default)]
pub struct RecordingBlobStore {
    written: Mutex<Vec<(SeriesId, u64, PathBuf)>>,
}

impl RecordingBlobStore {
    /// Blobs written, in order.
    pub fn written(&self) -> Vec<(SeriesId, u64, PathBuf)> {
        self.written.lock().clone()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn write_blob(&self, id: &SeriesId, owner_task_id: u64, path: &Path) -> CalResult<()> {
        tokio::fs::metadata(path).await?;
        self.written
            .lock()
            .push((id.clone(), owner_task_id, path.to_path_buf()));
        Ok(())
    }
}

/// Blob metadata held in memory.
#[derive(Debug, Default)]
pub struct FakeBlobMetadata {
    records: Mutex<Vec<CadenceBlobMetadata>>,
    deleted: Mutex<Vec<CadenceBlobMetadata>>,
}

impl FakeBlobMetadata {
    /// Adds an existing record.
    pub fn insert(&self, record: CadenceBlobMetadata) {
        self.records.lock().push(record);
    }

    /// Current records.
    pub fn records(&self) -> Vec<CadenceBlobMetadata> {
        self.records.lock().clone()
    }

    /// Deleted records, in order.
    pub fn deleted(&self) -> Vec<CadenceBlobMetadata> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl BlobMetadataRepository for FakeBlobMetadata {
    async fn blobs(
        &self,
        kind: BlobKind,
        module: i32,
        output: i32,
        cadence_type: CadenceType,
    ) -> CalResult<Vec<CadenceBlobMetadata>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| {
                r.kind == kind
                    && r.module == module
                    && r.output == output
                    && r.cadence_type == cadence_type
            })
            .cloned()
            .collect())
    }

    async fn delete(&self, blob: &CadenceBlobMetadata) -> CalResult<()> {
        let mut records = self.records.lock();
        if let Some(i) = records.iter().position(|r| r == blob) {
            records.remove(i);
        }
        self.deleted.lock().push(blob.clone());
        Ok(())
    }

    async fn create(&self, blob: &CadenceBlobMetadata) -> CalResult<()> {
        self.records.lock().push(blob.clone());
        Ok(())
    }
}

/// Records processing characteristics.
#[derive(Debug, Default)]
pub struct RecordingProcessing {
    records: Mutex<Vec<ProcessingCharacteristics>>,
}

impl RecordingProcessing {
    /// Records received, in order.
    pub fn records(&self) -> Vec<ProcessingCharacteristics> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ProcessingRecords for RecordingProcessing {
    async fn record_processing(&self, record: &ProcessingCharacteristics) -> CalResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// One alert received by [`RecordingAlerts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedAlert {
    /// Alert source.
    pub source: String,
    /// Owning task.
    pub owner_task_id: u64,
    /// Severity.
    pub severity: Severity,
    /// Text.
    pub message: String,
}

/// Records published alerts.
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    published: Mutex<Vec<PublishedAlert>>,
}

impl RecordingAlerts {
    /// Alerts received, in order.
    pub fn published(&self) -> Vec<PublishedAlert> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn publish(
        &self,
        source: &str,
        owner_task_id: u64,
        severity: Severity,
        message: &str,
    ) -> CalResult<()> {
        self.published.lock().push(PublishedAlert {
            source: source.to_string(),
            owner_task_id,
            severity,
            message: message.to_string(),
        });
        Ok(())
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Echoes raw samples back as calibrated values.
///
/// Uncertainties are a constant `0.1`. The collateral invocation also reports
/// a black level metric.
#[derive(Debug, Default)]
pub struct FakeEngine {
    failing: Mutex<BTreeSet<usize>>,
    calls: Mutex<usize>,
}

impl FakeEngine {
    /// Makes `invocation` report failure.
    pub fn fail_invocation(&self, invocation: usize) {
        self.failing.lock().insert(invocation);
    }

    /// Number of `calibrate` calls.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    fn outputs(inputs: &CalInputs) -> CalOutputs {
        let mut outputs = CalOutputs::empty(inputs.parameters.pipeline_info());
        outputs.black_algorithm_applied = inputs.parameters.module_parameters.black_algorithm.clone();
        if inputs.empty_inputs {
            return outputs;
        }
        let uncertainties = |n: usize| vec![0.1f32; n];
        outputs.target_and_background_pixels = inputs
            .target_and_background_pixels
            .iter()
            .map(|p| CalibratedPixel {
                row: p.row,
                column: p.column,
                values: as_f32(&p.values),
                uncertainties: uncertainties(p.gaps.len()),
                gaps: p.gaps.clone(),
            })
            .collect();
        outputs.calibrated_collateral = inputs
            .collateral
            .iter()
            .map(|c| CalibratedCollateral {
                kind: c.kind,
                offset: c.offset,
                values: as_f32(&c.values),
                uncertainties: uncertainties(c.gaps.len()),
                gaps: c.gaps.clone(),
            })
            .collect();
        if inputs.first_call {
            let n = inputs.parameters.interval().len();
            outputs.collateral_metrics.black_level = MetricSeries {
                values: vec![700.0; n],
                uncertainties: uncertainties(n),
                gaps: vec![false; n],
            };
        }
        outputs
    }
}

fn as_f32(values: &SeriesValues) -> Vec<f32> {
    match values {
        SeriesValues::Int(v) => v.iter().map(|x| *x as f32).collect(),
        SeriesValues::Float(v) => v.clone(),
    }
}

#[async_trait]
impl CalibrationEngine for FakeEngine {
    async fn calibrate(&self, inputs: &[CalInputs]) -> CalResult<Vec<EngineResult>> {
        *self.calls.lock() += 1;
        let failing = self.failing.lock().clone();
        Ok(inputs
            .iter()
            .map(|input| {
                if failing.contains(&input.invocation) {
                    EngineResult {
                        invocation: input.invocation,
                        success: false,
                        message: format!("invocation {} failed", input.invocation),
                        outputs: None,
                    }
                } else {
                    EngineResult {
                        invocation: input.invocation,
                        success: true,
                        message: String::new(),
                        outputs: Some(Self::outputs(input)),
                    }
                }
            })
            .collect())
    }
}

// =============================================================================
// Bundle
// =============================================================================

/// Every fake, wired together.
#[derive(Debug)]
pub struct FakeServices {
    /// Catalog.
    pub catalog: Arc<FakeCatalog>,
    /// Cadence clocks.
    pub clocks: Arc<FakeClockFactory>,
    /// Quarter calendar.
    pub calendar: Arc<FakeCalendar>,
    /// Calibration models.
    pub models: Arc<FakeModels>,
    /// Compression tables.
    pub compression: Arc<FakeCompressionTables>,
    /// Config maps.
    pub config_maps: Arc<FakeConfigMaps>,
    /// Blob series lookups.
    pub blob_series: Arc<FakeBlobSeries>,
    /// Full frame images.
    pub ffis: Arc<FakeFfis>,
    /// Time-series store.
    pub store: Arc<InMemoryStore>,
    /// Blob files.
    pub blob_store: Arc<RecordingBlobStore>,
    /// Blob metadata.
    pub blob_metadata: Arc<FakeBlobMetadata>,
    /// Processing records.
    pub processing: Arc<RecordingProcessing>,
    /// Alerts.
    pub alerts: Arc<RecordingAlerts>,
}

impl FakeServices {
    /// Fakes serving `fixture`.
    pub fn new(fixture: CatalogFixture) -> Self {
        Self {
            catalog: Arc::new(FakeCatalog::new(fixture)),
            clocks: Arc::default(),
            calendar: Arc::default(),
            models: Arc::default(),
            compression: Arc::default(),
            config_maps: Arc::default(),
            blob_series: Arc::default(),
            ffis: Arc::default(),
            store: Arc::default(),
            blob_store: Arc::default(),
            blob_metadata: Arc::default(),
            processing: Arc::default(),
            alerts: Arc::default(),
        }
    }

    /// The catalog fixture.
    pub fn fixture(&self) -> &CatalogFixture {
        self.catalog.fixture()
    }

    /// The fakes as injected services.
    pub fn services(&self) -> CalServices {
        CalServices {
            catalog: self.catalog.clone(),
            clocks: self.clocks.clone(),
            calendar: self.calendar.clone(),
            models: self.models.clone(),
            compression: self.compression.clone(),
            config_maps: self.config_maps.clone(),
            blob_series: self.blob_series.clone(),
            ffis: self.ffis.clone(),
            store: self.store.clone(),
            blob_store: self.blob_store.clone(),
            blob_metadata: self.blob_metadata.clone(),
            processing: self.processing.clone(),
            alerts: self.alerts.clone(),
        }
    }

    /// A resolver over the fakes.
    pub fn resolver(&self, parameters: ModuleParameters) -> CommonParametersResolver {
        CommonParametersResolver::new(self.services(), parameters)
    }

    /// An empty clock cache over the fake clocks.
    pub fn clock_cache(&self) -> CadenceClockCache {
        CadenceClockCache::new(self.clocks.clone())
    }

    /// Descriptor engine outputs carry for `uow` over the fixture tables.
    pub fn pipeline_info(&self, uow: &UnitOfWork) -> PipelineInfo {
        let fixture = self.fixture();
        let target = match (uow.cadence_type, &fixture.sc_table) {
            (CadenceType::Short, Some(sc)) => sc.table_id,
            _ => fixture.lc_table.table_id,
        };
        PipelineInfo {
            pipeline_task_id: uow.pipeline_task_id,
            cadence_type: uow.cadence_type,
            start_cadence: uow.start_cadence,
            end_cadence: uow.end_cadence,
            module: uow.module,
            output: uow.output,
            target_table_id: target,
            lc_target_table_id: fixture.lc_table.table_id,
            background_table_id: fixture.background_table.table_id,
        }
    }

    /// Registers the collateral locations of the unit of work and stores a
    /// fully valid series for each, produced by `producer`.
    pub fn seed_collateral(&self, params: &CommonParameters, producer: u64) -> Vec<CollateralLocation> {
        let locations: Vec<CollateralLocation> = CollateralKind::required_for(params.cadence_type)
            .iter()
            .map(|kind| CollateralLocation {
                kind: *kind,
                offset: if kind.offset_is_row() { 1040 } else { 20 },
            })
            .collect();
        self.catalog.set_collateral(
            params.cadence_type,
            params.target_table.table_id,
            locations.clone(),
        );
        for location in &locations {
            let id = location.raw_id(params.cadence_type, params.module, params.output);
            self.store.put(valid_series(id, params.interval(), 500, producer));
        }
        locations
    }

    /// Registers pixels in the table of `target_type` and stores a fully
    /// valid raw series for each, produced by `producer`.
    pub fn seed_pixels(
        &self,
        params: &CommonParameters,
        target_type: TargetType,
        coordinates: &[(i32, i32)],
        producer: u64,
    ) -> Vec<Pixel> {
        let pixels: Vec<Pixel> = coordinates
            .iter()
            .map(|(row, column)| Pixel::raw(params.module, params.output, target_type, *row, *column))
            .collect();
        let table_id = match target_type {
            TargetType::Background => params.background_table.table_id,
            _ => params.target_table.table_id,
        };
        self.catalog.add_pixels(table_id, pixels.clone());
        for pixel in &pixels {
            self.store.put(valid_series(
                pixel.series_id().clone(),
                params.interval(),
                1000 + pixel.column(),
                producer,
            ));
        }
        pixels
    }
}

fn valid_series(id: SeriesId, interval: CadenceInterval, value: i32, producer: u64) -> TimeSeries {
    let len = interval.len();
    TimeSeries {
        id,
        start_cadence: interval.start,
        end_cadence: interval.end,
        values: SeriesValues::Int(vec![value; len]),
        gaps: vec![false; len],
        originators: BTreeSet::from([producer]),
    }
}

/// Data-absent long cadence parameters for cadences 100 to 109 on module 2
/// output 1.
pub fn sample_parameters() -> CommonParameters {
    let fixture = CatalogFixture::long_cadence(100, 109);
    let clock = FakeClock {
        cadence_type: CadenceType::Long,
        settings: Arc::default(),
    };
    CommonParameters {
        pipeline_task_id: 42,
        cadence_type: CadenceType::Long,
        start_cadence: 100,
        end_cadence: 109,
        module: 2,
        output: 1,
        season: fixture.lc_table.observing_season,
        quarter: 1,
        target_table: fixture.lc_table.clone(),
        lc_target_table: fixture.lc_table,
        background_table: fixture.background_table,
        cadence_times: clock.times(CadenceInterval::new(100, 109)),
        module_parameters: ModuleParameters::default(),
        coverage: Coverage::Absent,
    }
}
