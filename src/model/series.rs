//! Time-series records and the storage identifier scheme.

use super::blob::BlobKind;
use super::cadence::{CadenceInterval, CadenceType, TargetType};
use super::pixel::CollateralKind;
use crate::error::{CalError, CalResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a series in the time-series store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(String);

/// Calibrated value or its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibratedKind {
    /// Calibrated values.
    Values,
    /// Propagated uncertainties.
    Uncertainties,
}

impl CalibratedKind {
    fn id_segment(&self) -> &'static str {
        match self {
            CalibratedKind::Values => "SocCal",
            CalibratedKind::Uncertainties => "SocCalUncertainties",
        }
    }
}

/// Per module/output metric series written by the consolidator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MetricKind {
    BlackLevel,
    BlackLevelUncertainties,
    SmearLevel,
    SmearLevelUncertainties,
    DarkCurrent,
    DarkCurrentUncertainties,
    TheoreticalCompressionEfficiency,
    TheoreticalCompressionEfficiencyCounts,
    AchievedCompressionEfficiency,
    AchievedCompressionEfficiencyCounts,
}

impl MetricKind {
    fn id_segment(&self) -> &'static str {
        match self {
            MetricKind::BlackLevel => "BlackLevel",
            MetricKind::BlackLevelUncertainties => "BlackLevelUncertainties",
            MetricKind::SmearLevel => "SmearLevel",
            MetricKind::SmearLevelUncertainties => "SmearLevelUncertainties",
            MetricKind::DarkCurrent => "DarkCurrent",
            MetricKind::DarkCurrentUncertainties => "DarkCurrentUncertainties",
            MetricKind::TheoreticalCompressionEfficiency => "TheoreticalCompressionEfficiency",
            MetricKind::TheoreticalCompressionEfficiencyCounts => {
                "TheoreticalCompressionEfficiencyCounts"
            }
            MetricKind::AchievedCompressionEfficiency => "AchievedCompressionEfficiency",
            MetricKind::AchievedCompressionEfficiencyCounts => {
                "AchievedCompressionEfficiencyCounts"
            }
        }
    }
}

/// Per-target metric series written by the consolidator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TargetMetricKind {
    TwoDBlack,
    TwoDBlackUncertainties,
    Undershoot,
    UndershootUncertainties,
}

impl TargetMetricKind {
    fn id_segment(&self) -> &'static str {
        match self {
            TargetMetricKind::TwoDBlack => "TwoDBlack",
            TargetMetricKind::TwoDBlackUncertainties => "TwoDBlackUncertainties",
            TargetMetricKind::Undershoot => "Undershoot",
            TargetMetricKind::UndershootUncertainties => "UndershootUncertainties",
        }
    }
}

/// Cosmic-ray statistics written per collateral kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CosmicRayMetricKind {
    HitRates,
    MeanEnergy,
    EnergyVariance,
    EnergySkewness,
    EnergyKurtosis,
}

impl CosmicRayMetricKind {
    fn id_segment(&self) -> &'static str {
        match self {
            CosmicRayMetricKind::HitRates => "hitRates",
            CosmicRayMetricKind::MeanEnergy => "meanEnergy",
            CosmicRayMetricKind::EnergyVariance => "energyVariance",
            CosmicRayMetricKind::EnergySkewness => "energySkewness",
            CosmicRayMetricKind::EnergyKurtosis => "energyKurtosis",
        }
    }
}

impl SeriesId {
    /// Wraps an arbitrary identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw photometric pixel series.
    pub fn raw_pixel(target_type: TargetType, module: i32, output: i32, row: i32, column: i32) -> Self {
        Self(format!(
            "/dr/pixel/sci/{}/{module}/{output}/{row}:{column}",
            target_type.id_segment()
        ))
    }

    /// Raw collateral series at `offset` (a row or a column depending on kind).
    pub fn raw_collateral(
        kind: CollateralKind,
        cadence_type: CadenceType,
        module: i32,
        output: i32,
        offset: i32,
    ) -> Self {
        Self(format!(
            "/dr/pixel/col/{}/{}/{module}/{output}/{offset}",
            cadence_type.id_segment(),
            kind.id_segment()
        ))
    }

    /// Calibrated photometric pixel series.
    pub fn calibrated_pixel(
        kind: CalibratedKind,
        target_type: TargetType,
        module: i32,
        output: i32,
        row: i32,
        column: i32,
    ) -> Self {
        Self(format!(
            "/cal/pixels/{}/{}/{module}/{output}/{row}:{column}",
            kind.id_segment(),
            target_type.id_segment()
        ))
    }

    /// Calibrated collateral series.
    pub fn calibrated_collateral(
        kind: CalibratedKind,
        collateral: CollateralKind,
        cadence_type: CadenceType,
        module: i32,
        output: i32,
        offset: i32,
    ) -> Self {
        Self(format!(
            "/cal/pixels/{}/collateral/{}/{}/{module}/{output}/{offset}",
            kind.id_segment(),
            cadence_type.id_segment(),
            collateral.id_segment()
        ))
    }

    /// Per module/output metric series.
    pub fn metric(cadence_type: CadenceType, metric: MetricKind, module: i32, output: i32) -> Self {
        Self(format!(
            "/cal/metrics/{}/{}/{module}/{output}",
            cadence_type.id_segment(),
            metric.id_segment()
        ))
    }

    /// Per-target metric series.
    pub fn target_metric(
        cadence_type: CadenceType,
        metric: TargetMetricKind,
        module: i32,
        output: i32,
        key_id: i32,
    ) -> Self {
        Self(format!(
            "/cal/targetMetrics/{}/{}/{module}/{output}/{key_id}",
            cadence_type.id_segment(),
            metric.id_segment()
        ))
    }

    /// Cosmic-ray event series at one collateral location.
    pub fn cosmic_ray(
        kind: CollateralKind,
        cadence_type: CadenceType,
        module: i32,
        output: i32,
        offset: i32,
    ) -> Self {
        Self(format!(
            "/cal/CosmicRaySeries/collateral/{}/{}/{module}/{output}/{offset}",
            cadence_type.id_segment(),
            kind.id_segment()
        ))
    }

    /// Cosmic-ray statistic of one collateral kind.
    pub fn cosmic_ray_metric(
        cadence_type: CadenceType,
        kind: CollateralKind,
        metric: CosmicRayMetricKind,
        module: i32,
        output: i32,
    ) -> Self {
        Self(format!(
            "/cal/CosmicRayMetrics/{}/{}/{}/{module}/{output}",
            cadence_type.id_segment(),
            kind.id_segment(),
            metric.id_segment()
        ))
    }

    /// Binary artifact written by one pipeline task.
    pub fn blob(
        kind: BlobKind,
        cadence_type: CadenceType,
        module: i32,
        output: i32,
        pipeline_task_id: u64,
    ) -> Self {
        Self(format!(
            "/cal/blob/{}/{}/{module}/{output}/{pipeline_task_id}",
            kind.id_segment(),
            cadence_type.id_segment()
        ))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sample values of a cadence series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "lowercase")]
pub enum SeriesValues {
    /// Integer samples (raw pixels, symbol counts).
    Int(Vec<i32>),
    /// Floating point samples (calibrated values, metrics).
    Float(Vec<f32>),
}

impl SeriesValues {
    /// Number of samples.
    pub fn len(&self) -> usize {
        match self {
            SeriesValues::Int(v) => v.len(),
            SeriesValues::Float(v) => v.len(),
        }
    }

    /// True when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A cadence-indexed series covering `[start_cadence, end_cadence]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Storage identifier.
    pub id: SeriesId,
    /// First cadence.
    pub start_cadence: i32,
    /// Last cadence.
    pub end_cadence: i32,
    /// One sample per cadence.
    pub values: SeriesValues,
    /// True where the sample is not valid.
    pub gaps: Vec<bool>,
    /// Pipeline tasks that produced the valid samples.
    pub originators: BTreeSet<u64>,
}

impl TimeSeries {
    /// Builds a floating point series written by `originator`.
    pub fn float(
        id: SeriesId,
        interval: CadenceInterval,
        values: Vec<f32>,
        gaps: Vec<bool>,
        originator: u64,
    ) -> CalResult<Self> {
        Self::build(id, interval, SeriesValues::Float(values), gaps, originator)
    }

    /// Builds an integer series written by `originator`.
    pub fn int(
        id: SeriesId,
        interval: CadenceInterval,
        values: Vec<i32>,
        gaps: Vec<bool>,
        originator: u64,
    ) -> CalResult<Self> {
        Self::build(id, interval, SeriesValues::Int(values), gaps, originator)
    }

    /// A series with every cadence gapped and no originators.
    pub fn empty(id: SeriesId, interval: CadenceInterval) -> Self {
        let len = interval.len();
        Self {
            id,
            start_cadence: interval.start,
            end_cadence: interval.end,
            values: SeriesValues::Int(vec![0; len]),
            gaps: vec![true; len],
            originators: BTreeSet::new(),
        }
    }

    fn build(
        id: SeriesId,
        interval: CadenceInterval,
        values: SeriesValues,
        gaps: Vec<bool>,
        originator: u64,
    ) -> CalResult<Self> {
        let series = Self {
            id,
            start_cadence: interval.start,
            end_cadence: interval.end,
            values,
            gaps,
            originators: BTreeSet::from([originator]),
        };
        series.validate()?;
        Ok(series)
    }

    /// The covered interval.
    pub fn interval(&self) -> CadenceInterval {
        CadenceInterval::new(self.start_cadence, self.end_cadence)
    }

    /// Checks that values and gap indicators both span the interval.
    pub fn validate(&self) -> CalResult<()> {
        let expected = self.interval().len();
        if self.values.len() != expected {
            return Err(CalError::malformed(
                &self.id,
                format!(
                    "expected {expected} samples for cadences {} but found {}",
                    self.interval(),
                    self.values.len()
                ),
            ));
        }
        if self.gaps.len() != expected {
            return Err(CalError::malformed(
                &self.id,
                format!(
                    "expected {expected} gap indicators for cadences {} but found {}",
                    self.interval(),
                    self.gaps.len()
                ),
            ));
        }
        Ok(())
    }

    /// True when no cadence carries a valid sample.
    pub fn is_fully_gapped(&self) -> bool {
        self.gaps.iter().all(|gap| *gap)
    }

    /// Cadences carrying valid samples.
    pub fn valid_cadences(&self) -> impl Iterator<Item = i32> + '_ {
        self.gaps
            .iter()
            .enumerate()
            .filter(|(_, gap)| !**gap)
            .map(move |(i, _)| self.start_cadence + i as i32)
    }
}

/// Point events (e.g. cosmic rays) at one location, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSeries {
    /// Location identifier.
    pub id: SeriesId,
    /// Start of the window this series replaces.
    pub start_mjd: f64,
    /// End of the window this series replaces.
    pub end_mjd: f64,
    /// Event times, ascending.
    pub mjds: Vec<f64>,
    /// Event magnitudes, parallel to `mjds`.
    pub values: Vec<f32>,
    /// Pipeline task that produced the events.
    pub originator: u64,
}

impl EventSeries {
    /// Number of events.
    pub fn len(&self) -> usize {
        self.mjds.len()
    }

    /// True when the series erases the window without adding events.
    pub fn is_empty(&self) -> bool {
        self.mjds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_series_rejects_short_values() {
        let err = TimeSeries::float(
            SeriesId::new("/x"),
            CadenceInterval::new(10, 14),
            vec![1.0; 4],
            vec![false; 5],
            7,
        )
        .unwrap_err();
        assert!(matches!(err, CalError::MalformedSeries { .. }));
        assert!(err.to_string().contains("expected 5 samples"));
    }

    #[test]
    fn valid_cadences_skip_gaps() {
        let series = TimeSeries::int(
            SeriesId::new("/x"),
            CadenceInterval::new(10, 13),
            vec![1, 2, 3, 4],
            vec![true, false, true, false],
            1,
        )
        .unwrap();
        assert_eq!(series.valid_cadences().collect::<Vec<_>>(), vec![11, 13]);
        assert!(!series.is_fully_gapped());
        assert!(TimeSeries::empty(SeriesId::new("/y"), CadenceInterval::new(1, 3)).is_fully_gapped());
    }

    #[test]
    fn identifiers_encode_location() {
        let id = SeriesId::cosmic_ray(CollateralKind::BlackLevel, CadenceType::Long, 2, 1, 1040);
        assert_eq!(
            id.as_str(),
            "/cal/CosmicRaySeries/collateral/long/BlackLevel/2/1/1040"
        );
        let pixel = SeriesId::raw_pixel(TargetType::Background, 2, 1, 400, 20);
        assert_eq!(pixel.as_str(), "/dr/pixel/sci/bgp/2/1/400:20");
    }
}
