//! Cadence types, cadence intervals and cadence timestamps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sampling cadence of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CadenceType {
    /// Long cadence (about 30 minutes).
    Long,
    /// Short cadence (about 1 minute).
    Short,
}

impl CadenceType {
    /// Descriptor string used in engine inputs and outputs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceType::Long => "LONG",
            CadenceType::Short => "SHORT",
        }
    }

    /// The science target table type matching this cadence.
    pub fn target_type(&self) -> TargetType {
        match self {
            CadenceType::Long => TargetType::LongCadence,
            CadenceType::Short => TargetType::ShortCadence,
        }
    }

    pub(crate) fn id_segment(&self) -> &'static str {
        match self {
            CadenceType::Long => "long",
            CadenceType::Short => "short",
        }
    }
}

impl fmt::Display for CadenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog target table type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// Long cadence science targets.
    LongCadence,
    /// Short cadence science targets.
    ShortCadence,
    /// Background pixels (long cadence only).
    Background,
}

impl TargetType {
    pub(crate) fn id_segment(&self) -> &'static str {
        match self {
            TargetType::LongCadence => "lct",
            TargetType::ShortCadence => "sct",
            TargetType::Background => "bgp",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::LongCadence => write!(f, "long cadence"),
            TargetType::ShortCadence => write!(f, "short cadence"),
            TargetType::Background => write!(f, "background"),
        }
    }
}

/// Cadence interval, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CadenceInterval {
    /// First cadence in the interval.
    pub start: i32,
    /// Last cadence in the interval.
    pub end: i32,
}

impl CadenceInterval {
    /// Creates an interval `[start, end]`.
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    /// Number of cadences covered; zero for an inverted interval.
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// True when the interval covers no cadences.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the two intervals share at least one cadence.
    pub fn overlaps(&self, other: &CadenceInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Clips this interval to `bounds`.
    pub fn clip_to(&self, bounds: &CadenceInterval) -> CadenceInterval {
        CadenceInterval {
            start: self.start.max(bounds.start),
            end: self.end.min(bounds.end),
        }
    }

    /// True when `cadence` lies inside the interval.
    pub fn contains(&self, cadence: i32) -> bool {
        cadence >= self.start && cadence <= self.end
    }
}

impl fmt::Display for CadenceInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.start, self.end)
    }
}

/// Per-cadence timestamps for a cadence interval.
///
/// Every vector has one entry per cadence in `[start_cadence, end_cadence]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceTimes {
    /// Cadence type of the timestamps.
    pub cadence_type: CadenceType,
    /// First cadence.
    pub start_cadence: i32,
    /// Last cadence.
    pub end_cadence: i32,
    /// Start of each cadence (mjd).
    pub start_mjds: Vec<f64>,
    /// Middle of each cadence (mjd).
    pub mid_mjds: Vec<f64>,
    /// End of each cadence (mjd).
    pub end_mjds: Vec<f64>,
    /// True where the cadence was not collected.
    pub gaps: Vec<bool>,
    /// True where the spacecraft was in fine point.
    pub fine_point: Vec<bool>,
}

impl CadenceTimes {
    /// The covered interval.
    pub fn interval(&self) -> CadenceInterval {
        CadenceInterval::new(self.start_cadence, self.end_cadence)
    }

    /// Number of cadences.
    pub fn len(&self) -> usize {
        self.start_mjds.len()
    }

    /// True when there are no cadences.
    pub fn is_empty(&self) -> bool {
        self.start_mjds.is_empty()
    }

    /// Start time of the first cadence.
    pub fn start_mjd(&self) -> f64 {
        self.start_mjds.first().copied().unwrap_or_default()
    }

    /// End time of the last cadence.
    pub fn end_mjd(&self) -> f64 {
        self.end_mjds.last().copied().unwrap_or_default()
    }

    /// True when the first cadence of the interval is a gap.
    pub fn first_cadence_gapped(&self) -> bool {
        self.gaps.first().copied().unwrap_or(true)
    }

    /// True when `cadence` was collected in fine point.
    ///
    /// Cadences outside the interval are treated as coarse point.
    pub fn is_fine_point(&self, cadence: i32) -> bool {
        if !self.interval().contains(cadence) {
            return false;
        }
        let offset = (cadence - self.start_cadence) as usize;
        self.fine_point.get(offset).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_overlap_is_inclusive() {
        let a = CadenceInterval::new(100, 200);
        assert!(a.overlaps(&CadenceInterval::new(200, 300)));
        assert!(!a.overlaps(&CadenceInterval::new(201, 300)));
        assert!(a.overlaps(&CadenceInterval::new(150, 160)));
        assert!(CadenceInterval::new(150, 160).overlaps(&a));
    }

    #[test]
    fn clip_takes_inner_bounds() {
        let requested = CadenceInterval::new(90, 250);
        let table = CadenceInterval::new(100, 200);
        assert_eq!(requested.clip_to(&table), CadenceInterval::new(100, 200));
        assert_eq!(CadenceInterval::new(120, 130).clip_to(&table).len(), 11);
    }
}
