//! Structured engine outputs.

use crate::model::{CollateralKind, CosmicRayMetricKind};
use crate::ports::Severity;
use crate::resolver::PipelineInfo;
use serde::{Deserialize, Serialize};

/// Calibrated values of one photometric pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedPixel {
    /// CCD row.
    pub row: i32,
    /// CCD column.
    pub column: i32,
    /// Calibrated values.
    pub values: Vec<f32>,
    /// Propagated uncertainties.
    pub uncertainties: Vec<f32>,
    /// Gap indicators shared by values and uncertainties.
    pub gaps: Vec<bool>,
}

/// Calibrated values of one collateral location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedCollateral {
    /// Collateral kind.
    pub kind: CollateralKind,
    /// Row or column offset.
    pub offset: i32,
    /// Calibrated values.
    pub values: Vec<f32>,
    /// Propagated uncertainties.
    pub uncertainties: Vec<f32>,
    /// Gap indicators.
    pub gaps: Vec<bool>,
}

/// A metric with uncertainties; empty when not computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    /// Metric values.
    pub values: Vec<f32>,
    /// Metric uncertainties.
    pub uncertainties: Vec<f32>,
    /// Gap indicators.
    pub gaps: Vec<bool>,
}

impl MetricSeries {
    /// True when the engine did not compute the metric.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per module/output collateral metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollateralMetrics {
    /// Black level.
    pub black_level: MetricSeries,
    /// Smear level.
    pub smear_level: MetricSeries,
    /// Dark current.
    pub dark_current: MetricSeries,
}

/// A metric computed over one labelled target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMetric {
    /// Target key id.
    pub key_id: i32,
    /// Metric values and uncertainties.
    #[serde(flatten)]
    pub series: MetricSeries,
}

/// Compression efficiency and code-symbol counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetric {
    /// Efficiency values.
    pub values: Vec<f32>,
    /// Number of code symbols per cadence.
    pub code_symbol_counts: Vec<i32>,
    /// Gap indicators.
    pub gaps: Vec<bool>,
}

impl CompressionMetric {
    /// True when the engine did not compute the metric.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One cosmic ray hit on a collateral location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CosmicRayEvent {
    /// Row (black kinds) or column (smear kinds).
    pub row_or_column: i32,
    /// Time of the hit.
    pub mjd: f64,
    /// Removed signal.
    pub delta: f32,
}

/// Cosmic ray hits by collateral kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct CosmicRayEvents {
    pub black: Vec<CosmicRayEvent>,
    pub masked_black: Vec<CosmicRayEvent>,
    pub virtual_black: Vec<CosmicRayEvent>,
    pub masked_smear: Vec<CosmicRayEvent>,
    pub virtual_smear: Vec<CosmicRayEvent>,
}

impl CosmicRayEvents {
    /// Every event tagged with its collateral kind.
    pub fn iter(&self) -> impl Iterator<Item = (CollateralKind, &CosmicRayEvent)> {
        fn tagged(
            kind: CollateralKind,
            events: &[CosmicRayEvent],
        ) -> impl Iterator<Item = (CollateralKind, &CosmicRayEvent)> {
            events.iter().map(move |event| (kind, event))
        }
        tagged(CollateralKind::BlackLevel, &self.black)
            .chain(tagged(CollateralKind::MaskedBlack, &self.masked_black))
            .chain(tagged(CollateralKind::VirtualBlack, &self.virtual_black))
            .chain(tagged(CollateralKind::MaskedSmear, &self.masked_smear))
            .chain(tagged(CollateralKind::VirtualSmear, &self.virtual_smear))
    }

    /// Total number of events.
    pub fn len(&self) -> usize {
        self.black.len()
            + self.masked_black.len()
            + self.virtual_black.len()
            + self.masked_smear.len()
            + self.virtual_smear.len()
    }

    /// True when no events were reported.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A float series with gaps; empty when not computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GappedSeries {
    /// Values.
    pub values: Vec<f32>,
    /// Gap indicators.
    pub gaps: Vec<bool>,
}

impl GappedSeries {
    /// True when the engine did not compute the series.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Cosmic-ray statistics of one collateral kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmicRayMetrics {
    /// Cleared when the engine computed nothing for this kind.
    pub exists: bool,
    /// Hits per cadence.
    pub hit_rates: GappedSeries,
    /// Mean removed energy.
    pub mean_energy: GappedSeries,
    /// Variance of the removed energy.
    pub energy_variance: GappedSeries,
    /// Skewness of the removed energy.
    pub energy_skewness: GappedSeries,
    /// Kurtosis of the removed energy.
    pub energy_kurtosis: GappedSeries,
}

impl CosmicRayMetrics {
    /// Every statistic tagged with its metric kind.
    pub fn series(&self) -> [(CosmicRayMetricKind, &GappedSeries); 5] {
        [
            (CosmicRayMetricKind::HitRates, &self.hit_rates),
            (CosmicRayMetricKind::MeanEnergy, &self.mean_energy),
            (CosmicRayMetricKind::EnergyVariance, &self.energy_variance),
            (CosmicRayMetricKind::EnergySkewness, &self.energy_skewness),
            (CosmicRayMetricKind::EnergyKurtosis, &self.energy_kurtosis),
        ]
    }
}

/// Cosmic-ray statistics by collateral kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct CollateralCosmicRayMetrics {
    pub black: CosmicRayMetrics,
    pub masked_black: CosmicRayMetrics,
    pub virtual_black: CosmicRayMetrics,
    pub masked_smear: CosmicRayMetrics,
    pub virtual_smear: CosmicRayMetrics,
}

impl CollateralCosmicRayMetrics {
    /// Statistics tagged with their collateral kind.
    pub fn by_kind(&self) -> [(CollateralKind, &CosmicRayMetrics); 5] {
        [
            (CollateralKind::BlackLevel, &self.black),
            (CollateralKind::MaskedBlack, &self.masked_black),
            (CollateralKind::VirtualBlack, &self.virtual_black),
            (CollateralKind::MaskedSmear, &self.masked_smear),
            (CollateralKind::VirtualSmear, &self.virtual_smear),
        ]
    }
}

/// An operator alert raised by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAlert {
    /// Mjd the alert refers to.
    pub time: f64,
    /// Severity.
    pub severity: Severity,
    /// Alert text.
    pub message: String,
}

/// Outputs of one engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalOutputs {
    /// Descriptor copied from the inputs.
    pub pipeline_info: PipelineInfo,
    /// Calibrated photometric pixels.
    #[serde(default)]
    pub target_and_background_pixels: Vec<CalibratedPixel>,
    /// Calibrated collateral locations.
    #[serde(default)]
    pub calibrated_collateral: Vec<CalibratedCollateral>,
    /// Collateral metrics.
    #[serde(default)]
    pub collateral_metrics: CollateralMetrics,
    /// 2D black metrics.
    #[serde(default)]
    pub two_d_black_metrics: Vec<TargetMetric>,
    /// LDE undershoot metrics.
    #[serde(default)]
    pub lde_undershoot_metrics: Vec<TargetMetric>,
    /// Theoretical compression efficiency.
    #[serde(default)]
    pub theoretical_compression: CompressionMetric,
    /// Achieved compression efficiency.
    #[serde(default)]
    pub achieved_compression: CompressionMetric,
    /// Cosmic ray hits on collateral.
    #[serde(default)]
    pub cosmic_ray_events: CosmicRayEvents,
    /// Cosmic-ray statistics by collateral kind.
    #[serde(default)]
    pub cosmic_ray_metrics: CollateralCosmicRayMetrics,
    /// Operator alerts.
    #[serde(default)]
    pub alerts: Vec<ModuleAlert>,
    /// Black algorithm actually applied.
    #[serde(default)]
    pub black_algorithm_applied: String,
    /// 1D black fit blob file in the blob directory; empty when absent.
    #[serde(default)]
    pub one_d_black_fit_blob: String,
    /// Uncertainty transformation blob file; empty when absent.
    #[serde(default)]
    pub uncertainty_blob: String,
    /// Smear blob file; empty when absent.
    #[serde(default)]
    pub smear_blob: String,
}

impl CalOutputs {
    /// Outputs carrying only the descriptor.
    pub fn empty(pipeline_info: PipelineInfo) -> Self {
        Self {
            pipeline_info,
            target_and_background_pixels: Vec::new(),
            calibrated_collateral: Vec::new(),
            collateral_metrics: CollateralMetrics::default(),
            two_d_black_metrics: Vec::new(),
            lde_undershoot_metrics: Vec::new(),
            theoretical_compression: CompressionMetric::default(),
            achieved_compression: CompressionMetric::default(),
            cosmic_ray_events: CosmicRayEvents::default(),
            cosmic_ray_metrics: CollateralCosmicRayMetrics::default(),
            alerts: Vec::new(),
            black_algorithm_applied: String::new(),
            one_d_black_fit_blob: String::new(),
            uncertainty_blob: String::new(),
            smear_blob: String::new(),
        }
    }
}

/// Result of one engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResult {
    /// Invocation (particle sequence number).
    pub invocation: usize,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Failure reason or diagnostic text.
    #[serde(default)]
    pub message: String,
    /// Outputs, when produced.
    #[serde(default)]
    pub outputs: Option<CalOutputs>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CadenceType;

    #[test]
    fn events_are_tagged_by_kind() {
        let event = |row_or_column| CosmicRayEvent {
            row_or_column,
            mjd: 10.0,
            delta: 1.5,
        };
        let events = CosmicRayEvents {
            black: vec![event(1040)],
            virtual_smear: vec![event(20), event(21)],
            ..CosmicRayEvents::default()
        };
        let kinds: Vec<CollateralKind> = events.iter().map(|(kind, _)| kind).collect();
        assert_eq!(
            kinds,
            vec![
                CollateralKind::BlackLevel,
                CollateralKind::VirtualSmear,
                CollateralKind::VirtualSmear
            ]
        );
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn missing_sections_deserialize_as_empty() {
        let json = r#"{
            "pipeline_info": {
                "pipeline_task_id": 9, "cadence_type": "LONG",
                "start_cadence": 1, "end_cadence": 2, "module": 2, "output": 1,
                "target_table_id": 1, "lc_target_table_id": 1, "background_table_id": 2
            }
        }"#;
        let outputs: CalOutputs = serde_json::from_str(json).unwrap();
        assert!(outputs.target_and_background_pixels.is_empty());
        assert!(outputs.collateral_metrics.black_level.is_empty());
        assert!(outputs.one_d_black_fit_blob.is_empty());
        assert!(!outputs.cosmic_ray_metrics.virtual_smear.exists);
        assert_eq!(outputs.pipeline_info.cadence_type, CadenceType::Long);
    }

    #[test]
    fn unknown_cadence_type_is_rejected() {
        let json = r#"{
            "pipeline_info": {
                "pipeline_task_id": 9, "cadence_type": "FFI",
                "start_cadence": 1, "end_cadence": 2, "module": 2, "output": 1,
                "target_table_id": 1, "lc_target_table_id": 1, "background_table_id": 2
            }
        }"#;
        assert!(serde_json::from_str::<CalOutputs>(json).is_err());
    }
}
