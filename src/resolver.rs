//! Common parameters resolution.
//!
//! Establishes the cadence and target-table context shared by every work
//! particle of one unit of work: the covering catalog tables, the clipped
//! cadence interval and its timestamps, the observing quarter, and (when a
//! covering table exists) every instrument model, compression table, config
//! map, optional blob series and full frame image the engine needs.
//!
//! No covering table is not an error. The result then carries only the
//! structural fields (taken from the closest covered interval, while the
//! cadence interval stays as requested) and [`Coverage::Absent`], so the
//! particles still run and report "no data".

use crate::config::ModuleParameters;
use crate::error::{CalError, CalResult};
use crate::model::{
    BlobKind, BlobSeries, CadenceInterval, CadenceTimes, CadenceType, PixelIndex, TargetType,
};
use crate::ports::{
    CadenceClock, CadenceClockFactory, CalServices, CalibrationModel, CollateralLocation,
    CompressionKind, CompressionTable, ConfigMap, FfiImage, MetricTargetId, ModelKind,
    TargetLabel, TargetTableLog,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Lazily populated cadence clocks, one per cadence type.
///
/// Entries are never invalidated; callers own the cache and pass it to
/// [`CommonParametersResolver::resolve`].
pub struct CadenceClockCache {
    factory: Arc<dyn CadenceClockFactory>,
    clocks: HashMap<CadenceType, Arc<dyn CadenceClock>>,
}

impl CadenceClockCache {
    /// Creates an empty cache backed by `factory`.
    pub fn new(factory: Arc<dyn CadenceClockFactory>) -> Self {
        Self {
            factory,
            clocks: HashMap::new(),
        }
    }

    /// The clock for `cadence_type`, created on first use.
    pub fn clock(&mut self, cadence_type: CadenceType) -> Arc<dyn CadenceClock> {
        let factory = &self.factory;
        Arc::clone(
            self.clocks
                .entry(cadence_type)
                .or_insert_with(|| factory.create(cadence_type)),
        )
    }

    /// Number of clocks created so far.
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// True when no clock has been created.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }
}

impl std::fmt::Debug for CadenceClockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CadenceClockCache")
            .field("cadence_types", &self.clocks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitOfWork {
    /// Task processing the unit of work.
    pub pipeline_task_id: u64,
    /// Cadence type.
    pub cadence_type: CadenceType,
    /// Requested first cadence.
    pub start_cadence: i32,
    /// Requested last cadence.
    pub end_cadence: i32,
    /// CCD module.
    pub module: i32,
    /// CCD output.
    pub output: i32,
}

impl UnitOfWork {
    /// The requested cadence interval.
    pub fn interval(&self) -> CadenceInterval {
        CadenceInterval::new(self.start_cadence, self.end_cadence)
    }
}

/// Structural descriptor carried by engine outputs back to the consolidator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineInfo {
    /// Task that produced the inputs.
    pub pipeline_task_id: u64,
    /// Cadence type, carried as `LONG` or `SHORT`.
    pub cadence_type: CadenceType,
    /// First cadence after clipping.
    pub start_cadence: i32,
    /// Last cadence after clipping.
    pub end_cadence: i32,
    /// CCD module.
    pub module: i32,
    /// CCD output.
    pub output: i32,
    /// Target table of the unit of work.
    pub target_table_id: i64,
    /// Long cadence target table.
    pub lc_target_table_id: i64,
    /// Background table.
    pub background_table_id: i64,
}

impl PipelineInfo {
    /// The processed cadence interval.
    pub fn interval(&self) -> CadenceInterval {
        CadenceInterval::new(self.start_cadence, self.end_cadence)
    }
}

/// Instrument models, tables and context resolved for covered data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ResolvedInputs {
    pub gain: CalibrationModel,
    pub flat_field: CalibrationModel,
    pub two_d_black: CalibrationModel,
    pub linearity: CalibrationModel,
    pub undershoot: CalibrationModel,
    pub read_noise: CalibrationModel,
    pub requant_table: CompressionTable,
    pub huffman_table: CompressionTable,
    pub config_maps: Vec<ConfigMap>,
    pub two_d_black_ids: Vec<MetricTargetId>,
    pub lde_undershoot_ids: Vec<MetricTargetId>,
    /// Long cadences equivalent to the unit of work.
    pub long_cadences: CadenceInterval,
    pub dynamic_black_blobs: BlobSeries,
    pub one_d_black_blobs: BlobSeries,
    pub smear_blobs: BlobSeries,
    /// Full frame images, restricted per particle before packaging.
    #[serde(skip)]
    pub ffis: Vec<FfiImage>,
}

/// Whether a covering target table was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "coverage", content = "inputs", rename_all = "lowercase")]
pub enum Coverage {
    /// No table covers the requested interval.
    Absent,
    /// A table covers the interval and everything was resolved.
    Present(Box<ResolvedInputs>),
}

/// Read-only context shared by every particle of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonParameters {
    /// Task processing the unit of work.
    pub pipeline_task_id: u64,
    /// Cadence type.
    pub cadence_type: CadenceType,
    /// First cadence after clipping to the target table.
    pub start_cadence: i32,
    /// Last cadence after clipping to the target table.
    pub end_cadence: i32,
    /// CCD module.
    pub module: i32,
    /// CCD output.
    pub output: i32,
    /// Observing season of the target table.
    pub season: i32,
    /// Observing quarter of the whole interval.
    pub quarter: i32,
    /// Target table of the requested cadence type.
    pub target_table: TargetTableLog,
    /// Long cadence target table (same as `target_table` for long cadence).
    pub lc_target_table: TargetTableLog,
    /// Background table paired with the long cadence table.
    pub background_table: TargetTableLog,
    /// Timestamps of the clipped interval.
    pub cadence_times: CadenceTimes,
    /// Module parameters in effect.
    pub module_parameters: ModuleParameters,
    /// Resolved inputs, when covered.
    pub coverage: Coverage,
}

impl CommonParameters {
    /// The clipped cadence interval.
    pub fn interval(&self) -> CadenceInterval {
        CadenceInterval::new(self.start_cadence, self.end_cadence)
    }

    /// True when no covering table was found.
    pub fn is_data_absent(&self) -> bool {
        matches!(self.coverage, Coverage::Absent)
    }

    /// Resolved inputs, when covered.
    pub fn inputs(&self) -> Option<&ResolvedInputs> {
        match &self.coverage {
            Coverage::Absent => None,
            Coverage::Present(inputs) => Some(inputs),
        }
    }

    /// Descriptor embedded in engine outputs.
    pub fn pipeline_info(&self) -> PipelineInfo {
        PipelineInfo {
            pipeline_task_id: self.pipeline_task_id,
            cadence_type: self.cadence_type,
            start_cadence: self.start_cadence,
            end_cadence: self.end_cadence,
            module: self.module,
            output: self.output,
            target_table_id: self.target_table.table_id,
            lc_target_table_id: self.lc_target_table.table_id,
            background_table_id: self.background_table.table_id,
        }
    }
}

/// The target tables covering a cadence interval.
#[derive(Debug, Clone, PartialEq)]
pub struct CoveringTables {
    /// Table of the requested cadence type.
    pub target: TargetTableLog,
    /// Long cadence table.
    pub long_cadence: TargetTableLog,
    /// Background table.
    pub background: TargetTableLog,
}

/// Resolves [`CommonParameters`] from the catalog and model repositories.
#[derive(Debug, Clone)]
pub struct CommonParametersResolver {
    services: CalServices,
    module_parameters: ModuleParameters,
}

impl CommonParametersResolver {
    /// Creates a resolver over `services`.
    pub fn new(services: CalServices, module_parameters: ModuleParameters) -> Self {
        Self {
            services,
            module_parameters,
        }
    }

    /// Resolves the context of one unit of work.
    #[instrument(skip(self, clocks), fields(
        module = uow.module,
        output = uow.output,
        cadence_type = %uow.cadence_type,
        start_cadence = uow.start_cadence,
        end_cadence = uow.end_cadence,
    ))]
    pub async fn resolve(
        &self,
        uow: &UnitOfWork,
        clocks: &mut CadenceClockCache,
    ) -> CalResult<CommonParameters> {
        let requested = uow.interval();
        let (tables, has_data) = match self.covering_tables(uow.cadence_type, requested).await? {
            Some(tables) => (tables, true),
            None => {
                warn!(
                    "Can't find target table for user specified cadence interval {}",
                    requested
                );
                (self.fallback_tables(uow.cadence_type, requested).await?, false)
            }
        };

        let interval = if has_data {
            requested.clip_to(&tables.target.cadences())
        } else {
            requested
        };
        let season = tables.target.observing_season;
        info!(
            start_cadence = interval.start,
            end_cadence = interval.end,
            season,
            "Resolved covering target table {}",
            tables.target.table_id
        );

        let cadence_times = clocks
            .clock(uow.cadence_type)
            .cadence_times(interval)
            .await?;
        let quarter = self.quarter_of(uow, &cadence_times).await?;

        let coverage = if has_data {
            Coverage::Present(Box::new(
                self.resolve_inputs(uow, &tables, &cadence_times).await?,
            ))
        } else {
            Coverage::Absent
        };

        Ok(CommonParameters {
            pipeline_task_id: uow.pipeline_task_id,
            cadence_type: uow.cadence_type,
            start_cadence: interval.start,
            end_cadence: interval.end,
            module: uow.module,
            output: uow.output,
            season,
            quarter,
            target_table: tables.target,
            lc_target_table: tables.long_cadence,
            background_table: tables.background,
            cadence_times,
            module_parameters: self.module_parameters.clone(),
            coverage,
        })
    }

    /// Target and background pixel membership of the unit of work.
    ///
    /// Background pixels only exist for long cadence.
    pub async fn pixel_index(&self, params: &CommonParameters) -> CalResult<PixelIndex> {
        let catalog = &self.services.catalog;
        let target = catalog
            .table_pixels(params.target_table.table_id, params.module, params.output)
            .await?;
        let background = match params.cadence_type {
            CadenceType::Long => {
                catalog
                    .table_pixels(params.background_table.table_id, params.module, params.output)
                    .await?
            }
            CadenceType::Short => Vec::new(),
        };
        Ok(PixelIndex::new(target, background))
    }

    /// Collateral locations read out for the unit of work.
    pub async fn collateral_locations(
        &self,
        params: &CommonParameters,
    ) -> CalResult<Vec<CollateralLocation>> {
        self.services
            .catalog
            .collateral_locations(
                params.cadence_type,
                params.target_table.table_id,
                params.module,
                params.output,
            )
            .await
    }

    /// The tables covering `interval`, or `None` when nothing covers it.
    pub async fn covering_tables(
        &self,
        cadence_type: CadenceType,
        interval: CadenceInterval,
    ) -> CalResult<Option<CoveringTables>> {
        match cadence_type {
            CadenceType::Long => Ok(self
                .long_cadence_tables(interval)
                .await?
                .map(|(long_cadence, background)| CoveringTables {
                    target: long_cadence.clone(),
                    long_cadence,
                    background,
                })),
            CadenceType::Short => {
                let Some(short_cadence) = self
                    .single_table(TargetType::ShortCadence, interval)
                    .await?
                else {
                    return Ok(None);
                };
                let long_interval = self.long_cadences_for(CadenceType::Short, interval).await?;
                Ok(self
                    .long_cadence_tables(long_interval)
                    .await?
                    .map(|(long_cadence, background)| CoveringTables {
                        target: short_cadence,
                        long_cadence,
                        background,
                    }))
            }
        }
    }

    async fn fallback_tables(
        &self,
        cadence_type: CadenceType,
        requested: CadenceInterval,
    ) -> CalResult<CoveringTables> {
        let uncovered = || CalError::UncoveredInterval {
            cadence_type,
            start_cadence: requested.start,
            end_cadence: requested.end,
        };
        let closest = self
            .services
            .catalog
            .closest_cadence_interval(cadence_type, requested)
            .await?
            .ok_or_else(uncovered)?;
        debug!("Falling back to closest covered interval {}", closest);
        self.covering_tables(cadence_type, closest)
            .await?
            .ok_or_else(uncovered)
    }

    async fn long_cadence_tables(
        &self,
        interval: CadenceInterval,
    ) -> CalResult<Option<(TargetTableLog, TargetTableLog)>> {
        let Some(long_cadence) = self.single_table(TargetType::LongCadence, interval).await? else {
            return Ok(None);
        };

        let table_range = long_cadence.cadences();
        let mut backgrounds = self
            .services
            .catalog
            .target_table_logs(TargetType::Background, table_range)
            .await?;
        if backgrounds.len() != 1 {
            return Err(CalError::BackgroundTableCount {
                table_id: long_cadence.table_id,
                count: backgrounds.len(),
                start_cadence: table_range.start,
                end_cadence: table_range.end,
            });
        }
        let background = backgrounds.remove(0);
        Ok(Some((long_cadence, background)))
    }

    async fn single_table(
        &self,
        target_type: TargetType,
        interval: CadenceInterval,
    ) -> CalResult<Option<TargetTableLog>> {
        let mut logs = self
            .services
            .catalog
            .target_table_logs(target_type, interval)
            .await?;
        match logs.len() {
            0 => {
                warn!("{} target tables missing for cadences {}", target_type, interval);
                Ok(None)
            }
            1 => Ok(logs.pop()),
            count => Err(CalError::AmbiguousCoverage {
                target_type,
                count,
                start_cadence: interval.start,
                end_cadence: interval.end,
            }),
        }
    }

    async fn long_cadences_for(
        &self,
        cadence_type: CadenceType,
        interval: CadenceInterval,
    ) -> CalResult<CadenceInterval> {
        match cadence_type {
            CadenceType::Long => Ok(interval),
            CadenceType::Short => self
                .services
                .catalog
                .short_to_long_cadences(interval)
                .await?
                .ok_or(CalError::MissingLongCadenceMapping {
                    start_cadence: interval.start,
                    end_cadence: interval.end,
                }),
        }
    }

    async fn quarter_of(&self, uow: &UnitOfWork, times: &CadenceTimes) -> CalResult<i32> {
        let start_mjd = times.start_mjd();
        let end_mjd = times.end_mjd();
        let calendar = &self.services.calendar;
        let (start_quarter, end_quarter) = futures::try_join!(
            calendar.mjd_to_quarter(start_mjd),
            calendar.mjd_to_quarter(end_mjd)
        )?;
        if start_quarter != end_quarter {
            return Err(CalError::QuarterStraddle {
                module: uow.module,
                output: uow.output,
                start_cadence: times.start_cadence,
                end_cadence: times.end_cadence,
                start_mjd,
                end_mjd,
                start_quarter,
                end_quarter,
            });
        }
        Ok(start_quarter)
    }

    async fn resolve_inputs(
        &self,
        uow: &UnitOfWork,
        tables: &CoveringTables,
        times: &CadenceTimes,
    ) -> CalResult<ResolvedInputs> {
        let (start_mjd, end_mjd) = (times.start_mjd(), times.end_mjd());
        let (module, output) = (uow.module, uow.output);
        let models = &self.services.models;

        let (gain, flat_field, two_d_black, linearity, undershoot, read_noise) = futures::try_join!(
            models.model(ModelKind::Gain, start_mjd, end_mjd, module, output),
            models.model(ModelKind::FlatField, start_mjd, end_mjd, module, output),
            models.model(ModelKind::TwoDBlack, start_mjd, end_mjd, module, output),
            models.model(ModelKind::Linearity, start_mjd, end_mjd, module, output),
            models.model(ModelKind::Undershoot, start_mjd, end_mjd, module, output),
            models.model(ModelKind::ReadNoise, start_mjd, end_mjd, module, output),
        )?;

        let requant_table = self
            .single_compression_table(CompressionKind::Requantization, uow, start_mjd, end_mjd)
            .await?;
        let huffman_table = self
            .single_compression_table(CompressionKind::Huffman, uow, start_mjd, end_mjd)
            .await?;

        let config_maps = self.services.config_maps.config_maps(&tables.long_cadence).await?;
        if config_maps.is_empty() {
            return Err(CalError::MissingConfigMap {
                table_id: tables.long_cadence.table_id,
                module,
                output,
            });
        }

        let two_d_black_ids = self.metric_targets(uow, tables, TargetLabel::TwoDBlack).await?;
        let lde_undershoot_ids = self
            .metric_targets(uow, tables, TargetLabel::LdeUndershoot)
            .await?;

        let long_cadences = self
            .long_cadences_for(uow.cadence_type, times.interval())
            .await?;

        let parameters = &self.module_parameters;
        let dynamic_black_blobs = if parameters.dynablack_enabled {
            self.blob_series(BlobKind::DynamicBlack, uow, long_cadences).await?
        } else {
            BlobSeries::default()
        };
        let (one_d_black_blobs, smear_blobs) = match uow.cadence_type {
            CadenceType::Short => (
                self.blob_series(BlobKind::OneDBlackFit, uow, long_cadences).await?,
                self.blob_series(BlobKind::Smear, uow, long_cadences).await?,
            ),
            CadenceType::Long => (BlobSeries::default(), BlobSeries::default()),
        };

        let ffis = if parameters.enable_ffi_inform {
            self.ffi_context(uow, &tables.long_cadence).await?
        } else {
            Vec::new()
        };

        Ok(ResolvedInputs {
            gain,
            flat_field,
            two_d_black,
            linearity,
            undershoot,
            read_noise,
            requant_table,
            huffman_table,
            config_maps,
            two_d_black_ids,
            lde_undershoot_ids,
            long_cadences,
            dynamic_black_blobs,
            one_d_black_blobs,
            smear_blobs,
            ffis,
        })
    }

    async fn single_compression_table(
        &self,
        kind: CompressionKind,
        uow: &UnitOfWork,
        start_mjd: f64,
        end_mjd: f64,
    ) -> CalResult<CompressionTable> {
        let mut tables = self
            .services
            .compression
            .tables(kind, start_mjd, end_mjd)
            .await?;
        if tables.len() != 1 {
            return Err(CalError::CompressionTableCount {
                table: kind.name(),
                count: tables.len(),
                module: uow.module,
                output: uow.output,
                start_mjd,
                end_mjd,
            });
        }
        Ok(tables.remove(0))
    }

    async fn metric_targets(
        &self,
        uow: &UnitOfWork,
        tables: &CoveringTables,
        label: TargetLabel,
    ) -> CalResult<Vec<MetricTargetId>> {
        let catalog = &self.services.catalog;
        let mut ids = catalog
            .labeled_targets(tables.target.table_id, label, uow.module, uow.output)
            .await?;
        if uow.cadence_type == CadenceType::Long {
            ids.extend(
                catalog
                    .labeled_targets(tables.background.table_id, label, uow.module, uow.output)
                    .await?,
            );
        }
        Ok(ids)
    }

    async fn blob_series(
        &self,
        kind: BlobKind,
        uow: &UnitOfWork,
        long_cadences: CadenceInterval,
    ) -> CalResult<BlobSeries> {
        self.services
            .blob_series
            .blob_series(kind, uow.module, uow.output, long_cadences)
            .await
    }

    async fn ffi_context(
        &self,
        uow: &UnitOfWork,
        long_cadence: &TargetTableLog,
    ) -> CalResult<Vec<FfiImage>> {
        let (table_start_mjd, table_end_mjd) = self
            .services
            .catalog
            .table_observation_window(long_cadence)
            .await?;
        let calendar = &self.services.calendar;
        let quarter = calendar.mjd_to_quarter(table_end_mjd).await?;
        let quarter_end_mjd = calendar.quarter_end_mjd(quarter).await?;

        let ffis = self
            .services
            .ffis
            .ffis(uow.module, uow.output, table_start_mjd, quarter_end_mjd)
            .await?;
        if ffis.is_empty() {
            return Err(CalError::MissingFfi {
                module: uow.module,
                output: uow.output,
                start_mjd: table_start_mjd,
                end_mjd: quarter_end_mjd,
            });
        }
        debug!(count = ffis.len(), "Loaded full frame images");
        Ok(ffis)
    }
}
