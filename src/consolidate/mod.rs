//! Output consolidation.
//!
//! [`OutputsConsumer`] turns the structured outputs of one engine invocation
//! into store writes: calibrated pixel and collateral series, metrics,
//! cadence-range blobs (with supersession), a processing record, operator
//! alerts and cosmic-ray event series.
//!
//! The structural context of a result batch (pixel membership, cadence
//! timestamps, collateral locations) is derived from the embedded
//! [`PipelineInfo`] and memoized per descriptor.

mod blobs;
mod cosmic;
mod outputs;

pub use blobs::{obsolete_blobs, store_blob, BlobTarget};
pub use cosmic::{cosmic_ray_series, erasure_window, ErasureWindow};
pub use outputs::{
    CalOutputs, CalibratedCollateral, CalibratedPixel, CollateralCosmicRayMetrics,
    CollateralMetrics, CompressionMetric, CosmicRayEvent, CosmicRayEvents, CosmicRayMetrics,
    EngineResult, GappedSeries, MetricSeries, ModuleAlert, TargetMetric,
};

use crate::error::CalResult;
use crate::model::{
    BlobKind, CadenceTimes, CadenceType, CalibratedKind, MetricKind, PixelIndex, SeriesId, TargetMetricKind, TargetType, TimeSeries,
};
use crate::ports::{CalServices, CollateralLocation, ProcessingCharacteristics};
use crate::resolver::{CadenceClockCache, PipelineInfo};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Source name used for published alerts.
pub const ALERT_SOURCE: &str = "cal";

/// Structural context of one result descriptor.
#[derive(Debug, Clone)]
pub struct ConsolidationContext {
    /// Target and background membership.
    pub pixels: PixelIndex,
    /// Timestamps of the processed cadences.
    pub cadence_times: CadenceTimes,
    /// Timestamps of the closest covered interval, when the first processed
    /// cadence is a gap.
    pub expanded_times: Option<CadenceTimes>,
    /// Collateral locations read out for the cadence type.
    pub collateral_locations: Vec<CollateralLocation>,
}

/// What one call to [`OutputsConsumer::consolidate`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationSummary {
    /// Cadence series written in the batch.
    pub series_written: usize,
    /// Blobs stored.
    pub blobs_stored: usize,
    /// Alerts published.
    pub alerts_published: usize,
    /// Cosmic-ray event series replaced.
    pub cosmic_ray_series: usize,
}

impl std::ops::AddAssign for ConsolidationSummary {
    fn add_assign(&mut self, other: Self) {
        self.series_written += other.series_written;
        self.blobs_stored += other.blobs_stored;
        self.alerts_published += other.alerts_published;
        self.cosmic_ray_series += other.cosmic_ray_series;
    }
}

/// Consolidates engine outputs into the stores.
pub struct OutputsConsumer {
    services: CalServices,
    clocks: CadenceClockCache,
    contexts: HashMap<PipelineInfo, Arc<ConsolidationContext>>,
}

impl OutputsConsumer {
    /// Creates a consumer writing through `services`.
    pub fn new(services: CalServices) -> Self {
        let clocks = CadenceClockCache::new(Arc::clone(&services.clocks));
        Self {
            services,
            clocks,
            contexts: HashMap::new(),
        }
    }

    /// Number of memoized descriptors.
    pub fn cached_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// The structural context of `info`, resolved on first use.
    pub async fn context(&mut self, info: &PipelineInfo) -> CalResult<Arc<ConsolidationContext>> {
        if let Some(context) = self.contexts.get(info) {
            return Ok(Arc::clone(context));
        }

        let cadence_type = info.cadence_type;
        let interval = info.interval();
        let catalog = Arc::clone(&self.services.catalog);

        let target = catalog
            .table_pixels(info.target_table_id, info.module, info.output)
            .await?;
        let background = match cadence_type {
            CadenceType::Long => {
                catalog
                    .table_pixels(info.background_table_id, info.module, info.output)
                    .await?
            }
            CadenceType::Short => Vec::new(),
        };

        let clock = self.clocks.clock(cadence_type);
        let cadence_times = clock.cadence_times(interval).await?;
        let expanded_times = if cadence_times.first_cadence_gapped() {
            match catalog.closest_cadence_interval(cadence_type, interval).await? {
                Some(closest) => Some(clock.cadence_times(closest).await?),
                None => None,
            }
        } else {
            None
        };

        let collateral_locations = catalog
            .collateral_locations(cadence_type, info.target_table_id, info.module, info.output)
            .await?;

        debug!(
            module = info.module,
            output = info.output,
            target = target.len(),
            background = background.len(),
            "Resolved consolidation context"
        );
        let context = Arc::new(ConsolidationContext {
            pixels: PixelIndex::new(target, background),
            cadence_times,
            expanded_times,
            collateral_locations,
        });
        self.contexts.insert(info.clone(), Arc::clone(&context));
        Ok(context)
    }

    /// Writes everything carried by `outputs`.
    ///
    /// Blob file names are resolved against `blob_dir`.
    #[instrument(skip_all, fields(
        module = outputs.pipeline_info.module,
        output = outputs.pipeline_info.output,
        task = outputs.pipeline_info.pipeline_task_id,
    ))]
    pub async fn consolidate(
        &mut self,
        outputs: &CalOutputs,
        blob_dir: &Path,
    ) -> CalResult<ConsolidationSummary> {
        let info = &outputs.pipeline_info;
        let context = self.context(info).await?;
        let mut summary = ConsolidationSummary::default();

        let series = series_batch(outputs, &context)?;
        summary.series_written = series.len();
        if !series.is_empty() {
            self.services.store.write_series(series).await?;
        }

        let target = BlobTarget {
            pipeline_task_id: info.pipeline_task_id,
            cadence_type: info.cadence_type,
            start_cadence: info.start_cadence,
            end_cadence: info.end_cadence,
            module: info.module,
            output: info.output,
        };
        for (kind, file_name) in [
            (BlobKind::OneDBlackFit, &outputs.one_d_black_fit_blob),
            (BlobKind::UncertaintyTransform, &outputs.uncertainty_blob),
            (BlobKind::Smear, &outputs.smear_blob),
        ] {
            let stored = store_blob(
                self.services.blob_store.as_ref(),
                self.services.blob_metadata.as_ref(),
                kind,
                &target,
                blob_dir,
                file_name,
            )
            .await?;
            if stored {
                summary.blobs_stored += 1;
            }
        }

        self.services
            .processing
            .record_processing(&ProcessingCharacteristics {
                pipeline_task_id: info.pipeline_task_id,
                module: info.module,
                output: info.output,
                cadence_type: info.cadence_type,
                start_cadence: info.start_cadence,
                end_cadence: info.end_cadence,
                black_algorithm: outputs.black_algorithm_applied.clone(),
                recorded_at: Utc::now(),
            })
            .await?;

        for alert in &outputs.alerts {
            self.services
                .alerts
                .publish(
                    ALERT_SOURCE,
                    info.pipeline_task_id,
                    alert.severity,
                    &format!("{}: time={}", alert.message, alert.time),
                )
                .await?;
            summary.alerts_published += 1;
        }

        if !outputs.calibrated_collateral.is_empty() {
            let window = erasure_window(&context.cadence_times, context.expanded_times.as_ref());
            let events = cosmic_ray_series(
                &outputs.cosmic_ray_events,
                &context.collateral_locations,
                info.cadence_type,
                info.module,
                info.output,
                info.pipeline_task_id,
                window,
            );
            summary.cosmic_ray_series = events.len();
            self.services
                .store
                .replace_event_series(window.start_mjd, window.end_mjd, events)
                .await?;
        }

        info!(
            series = summary.series_written,
            blobs = summary.blobs_stored,
            alerts = summary.alerts_published,
            cosmic_ray_series = summary.cosmic_ray_series,
            "Consolidated outputs for cadences {}",
            info.interval()
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for OutputsConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputsConsumer")
            .field("cached_contexts", &self.contexts.len())
            .finish_non_exhaustive()
    }
}

/// Every cadence series carried by `outputs`.
fn series_batch(outputs: &CalOutputs, context: &ConsolidationContext) -> CalResult<Vec<TimeSeries>> {
    let info = &outputs.pipeline_info;
    let cadence_type = info.cadence_type;
    let (module, output) = (info.module, info.output);
    let interval = info.interval();
    let task = info.pipeline_task_id;
    let mut batch = Vec::new();

    let float = |id: SeriesId, values: &[f32], gaps: &[bool]| {
        TimeSeries::float(id, interval, values.to_vec(), gaps.to_vec(), task)
    };

    for pixel in &outputs.target_and_background_pixels {
        for target_type in pixel_roles(&context.pixels, cadence_type, pixel.row, pixel.column) {
            for (kind, values) in [
                (CalibratedKind::Values, &pixel.values),
                (CalibratedKind::Uncertainties, &pixel.uncertainties),
            ] {
                let id = SeriesId::calibrated_pixel(
                    kind,
                    target_type,
                    module,
                    output,
                    pixel.row,
                    pixel.column,
                );
                batch.push(float(id, values, &pixel.gaps)?);
            }
        }
    }

    for collateral in &outputs.calibrated_collateral {
        for (kind, values) in [
            (CalibratedKind::Values, &collateral.values),
            (CalibratedKind::Uncertainties, &collateral.uncertainties),
        ] {
            let id = SeriesId::calibrated_collateral(
                kind,
                collateral.kind,
                cadence_type,
                module,
                output,
                collateral.offset,
            );
            batch.push(float(id, values, &collateral.gaps)?);
        }
    }

    let metrics = &outputs.collateral_metrics;
    for (metric, value_kind, uncertainty_kind) in [
        (
            &metrics.black_level,
            MetricKind::BlackLevel,
            MetricKind::BlackLevelUncertainties,
        ),
        (
            &metrics.smear_level,
            MetricKind::SmearLevel,
            MetricKind::SmearLevelUncertainties,
        ),
        (
            &metrics.dark_current,
            MetricKind::DarkCurrent,
            MetricKind::DarkCurrentUncertainties,
        ),
    ] {
        if metric.is_empty() {
            continue;
        }
        let ids = (
            SeriesId::metric(cadence_type, value_kind, module, output),
            SeriesId::metric(cadence_type, uncertainty_kind, module, output),
        );
        batch.push(float(ids.0, &metric.values, &metric.gaps)?);
        batch.push(float(ids.1, &metric.uncertainties, &metric.gaps)?);
    }

    for (targets, value_kind, uncertainty_kind) in [
        (
            &outputs.two_d_black_metrics,
            TargetMetricKind::TwoDBlack,
            TargetMetricKind::TwoDBlackUncertainties,
        ),
        (
            &outputs.lde_undershoot_metrics,
            TargetMetricKind::Undershoot,
            TargetMetricKind::UndershootUncertainties,
        ),
    ] {
        for target in targets.iter().filter(|t| !t.series.is_empty()) {
            let series = &target.series;
            batch.push(float(
                SeriesId::target_metric(cadence_type, value_kind, module, output, target.key_id),
                &series.values,
                &series.gaps,
            )?);
            batch.push(float(
                SeriesId::target_metric(
                    cadence_type,
                    uncertainty_kind,
                    module,
                    output,
                    target.key_id,
                ),
                &series.uncertainties,
                &series.gaps,
            )?);
        }
    }

    for (compression, value_kind, count_kind) in [
        (
            &outputs.theoretical_compression,
            MetricKind::TheoreticalCompressionEfficiency,
            MetricKind::TheoreticalCompressionEfficiencyCounts,
        ),
        (
            &outputs.achieved_compression,
            MetricKind::AchievedCompressionEfficiency,
            MetricKind::AchievedCompressionEfficiencyCounts,
        ),
    ] {
        if compression.is_empty() {
            continue;
        }
        batch.push(float(
            SeriesId::metric(cadence_type, value_kind, module, output),
            &compression.values,
            &compression.gaps,
        )?);
        batch.push(TimeSeries::int(
            SeriesId::metric(cadence_type, count_kind, module, output),
            interval,
            compression.code_symbol_counts.clone(),
            compression.gaps.clone(),
            task,
        )?);
    }

    for (kind, metrics) in outputs.cosmic_ray_metrics.by_kind() {
        if !metrics.exists {
            continue;
        }
        for (metric, series) in metrics.series() {
            if series.is_empty() {
                continue;
            }
            batch.push(float(
                SeriesId::cosmic_ray_metric(cadence_type, kind, metric, module, output),
                &series.values,
                &series.gaps,
            )?);
        }
    }

    Ok(batch)
}

/// Target types a calibrated pixel is written under.
///
/// A pixel in both sets is written twice. A pixel in neither set is treated
/// as a target pixel.
fn pixel_roles(pixels: &PixelIndex, cadence_type: CadenceType, row: i32, column: i32) -> Vec<TargetType> {
    let background = pixels.is_background(row, column);
    let mut roles = Vec::with_capacity(2);
    if pixels.is_target(row, column) || !background {
        roles.push(cadence_type.target_type());
    }
    if background {
        roles.push(TargetType::Background);
    }
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollateralKind, CosmicRayMetricKind, Pixel};

    #[test]
    fn pixel_roles_follow_membership() {
        let index = PixelIndex::new(
            vec![
                Pixel::raw(2, 1, TargetType::LongCadence, 300, 1),
                Pixel::raw(2, 1, TargetType::LongCadence, 300, 2),
            ],
            vec![
                Pixel::raw(2, 1, TargetType::Background, 300, 2),
                Pixel::raw(2, 1, TargetType::Background, 400, 9),
            ],
        );
        assert_eq!(
            pixel_roles(&index, CadenceType::Long, 300, 1),
            vec![TargetType::LongCadence]
        );
        assert_eq!(
            pixel_roles(&index, CadenceType::Long, 300, 2),
            vec![TargetType::LongCadence, TargetType::Background]
        );
        assert_eq!(
            pixel_roles(&index, CadenceType::Long, 400, 9),
            vec![TargetType::Background]
        );
        assert_eq!(
            pixel_roles(&index, CadenceType::Short, 7, 7),
            vec![TargetType::ShortCadence]
        );
    }

    fn info() -> PipelineInfo {
        PipelineInfo {
            pipeline_task_id: 42,
            cadence_type: CadenceType::Long,
            start_cadence: 100,
            end_cadence: 102,
            module: 2,
            output: 1,
            target_table_id: 1,
            lc_target_table_id: 1,
            background_table_id: 2,
        }
    }

    fn context() -> ConsolidationContext {
        ConsolidationContext {
            pixels: PixelIndex::default(),
            cadence_times: crate::testing::sample_parameters().cadence_times,
            expanded_times: None,
            collateral_locations: Vec::new(),
        }
    }

    #[test]
    fn empty_metrics_are_not_written() {
        let mut outputs = CalOutputs::empty(info());
        outputs.collateral_metrics.black_level = MetricSeries {
            values: vec![1.0; 3],
            uncertainties: vec![0.1; 3],
            gaps: vec![false; 3],
        };
        outputs.calibrated_collateral.push(CalibratedCollateral {
            kind: CollateralKind::BlackLevel,
            offset: 1040,
            values: vec![2.0; 3],
            uncertainties: vec![0.2; 3],
            gaps: vec![false; 3],
        });

        let batch = series_batch(&outputs, &context()).unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|s| s.originators.contains(&42)));
        assert!(batch
            .iter()
            .any(|s| s.id == SeriesId::metric(CadenceType::Long, MetricKind::BlackLevelUncertainties, 2, 1)));
    }

    #[test]
    fn short_engine_series_are_rejected() {
        let mut outputs = CalOutputs::empty(info());
        outputs.target_and_background_pixels.push(CalibratedPixel {
            row: 300,
            column: 1,
            values: vec![1.0; 2],
            uncertainties: vec![0.1; 2],
            gaps: vec![false; 2],
        });
        assert!(series_batch(&outputs, &context()).is_err());
    }

    #[test]
    fn cosmic_ray_metrics_are_written_per_collateral_kind() {
        let series = |value| GappedSeries {
            values: vec![value; 3],
            gaps: vec![false, true, false],
        };
        let mut outputs = CalOutputs::empty(info());
        outputs.cosmic_ray_metrics.masked_smear = CosmicRayMetrics {
            exists: true,
            hit_rates: series(0.5),
            mean_energy: series(120.0),
            ..CosmicRayMetrics::default()
        };
        outputs.cosmic_ray_metrics.black = CosmicRayMetrics {
            exists: false,
            hit_rates: series(0.1),
            ..CosmicRayMetrics::default()
        };

        let batch = series_batch(&outputs, &context()).unwrap();
        let ids: Vec<_> = batch.iter().map(|s| s.id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                SeriesId::cosmic_ray_metric(
                    CadenceType::Long,
                    CollateralKind::MaskedSmear,
                    CosmicRayMetricKind::HitRates,
                    2,
                    1
                ),
                SeriesId::cosmic_ray_metric(
                    CadenceType::Long,
                    CollateralKind::MaskedSmear,
                    CosmicRayMetricKind::MeanEnergy,
                    2,
                    1
                ),
            ]
        );
        assert!(batch.iter().all(|s| s.originators.contains(&42)));
    }
}
