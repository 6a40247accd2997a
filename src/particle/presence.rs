//! Data presence rules.

use super::DataPresence;
use crate::model::{CadenceTimes, CadenceType, CollateralKind, SeriesId, TimeSeries};
use crate::ports::CollateralLocation;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// True when `series` carries usable data.
///
/// A fully gapped series is absent. With coarse-point processing disabled a
/// series whose valid samples all fall on coarse-point cadences is absent too.
pub fn series_present(series: &TimeSeries, times: &CadenceTimes, coarse_point_enabled: bool) -> bool {
    if series.is_fully_gapped() {
        return false;
    }
    coarse_point_enabled || series.valid_cadences().any(|c| times.is_fine_point(c))
}

/// Verdict of the collateral particle.
///
/// Every collateral kind required for the cadence type needs at least one
/// present location.
pub(crate) fn collateral_verdict(
    cadence_type: CadenceType,
    module: i32,
    output: i32,
    locations: &[CollateralLocation],
    series: &HashMap<SeriesId, TimeSeries>,
    times: &CadenceTimes,
    coarse_point_enabled: bool,
) -> DataPresence {
    let present_kinds: BTreeSet<CollateralKind> = locations
        .iter()
        .filter(|location| {
            series
                .get(&location.raw_id(cadence_type, module, output))
                .is_some_and(|s| series_present(s, times, coarse_point_enabled))
        })
        .map(|location| location.kind)
        .collect();

    let missing: Vec<String> = CollateralKind::required_for(cadence_type)
        .iter()
        .filter(|kind| !present_kinds.contains(kind))
        .map(ToString::to_string)
        .collect();

    if missing.is_empty() {
        DataPresence::Present
    } else {
        warn!(
            module,
            output,
            cadence_type = %cadence_type,
            "Collateral data missing for: {}",
            missing.join(", ")
        );
        DataPresence::Missing
    }
}

/// Verdict of a target/background particle.
///
/// Missing collateral data always downgrades the particle to missing.
pub(crate) fn target_verdict(
    collateral: DataPresence,
    series: &HashMap<SeriesId, TimeSeries>,
    times: &CadenceTimes,
    coarse_point_enabled: bool,
) -> DataPresence {
    if collateral == DataPresence::Missing {
        debug!("Collateral data missing; target and background data treated as missing");
        return DataPresence::Missing;
    }
    if series
        .values()
        .any(|s| series_present(s, times, coarse_point_enabled))
    {
        DataPresence::Present
    } else {
        DataPresence::Missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CadenceInterval;
    use tracing_test::traced_test;

    fn times(fine_point: Vec<bool>) -> CadenceTimes {
        let n = fine_point.len();
        CadenceTimes {
            cadence_type: CadenceType::Long,
            start_cadence: 0,
            end_cadence: n as i32 - 1,
            start_mjds: (0..n).map(|i| i as f64).collect(),
            mid_mjds: (0..n).map(|i| i as f64 + 0.5).collect(),
            end_mjds: (0..n).map(|i| i as f64 + 1.0).collect(),
            gaps: vec![false; n],
            fine_point,
        }
    }

    fn series(id: SeriesId, gaps: Vec<bool>) -> TimeSeries {
        let n = gaps.len();
        TimeSeries::int(
            id,
            CadenceInterval::new(0, n as i32 - 1),
            vec![1; n],
            gaps,
            9,
        )
        .unwrap()
    }

    fn location(kind: CollateralKind, offset: i32) -> CollateralLocation {
        CollateralLocation { kind, offset }
    }

    #[test]
    fn coarse_point_only_samples_are_absent_unless_enabled() {
        let t = times(vec![true, false, false]);
        let s = series(SeriesId::new("/a"), vec![true, false, false]);
        assert!(!series_present(&s, &t, false));
        assert!(series_present(&s, &t, true));

        let fine = series(SeriesId::new("/b"), vec![false, true, true]);
        assert!(series_present(&fine, &t, false));
    }

    #[traced_test]
    #[test]
    fn short_cadence_collateral_needs_all_five_kinds() {
        let t = times(vec![true; 4]);
        let locations: Vec<CollateralLocation> = CollateralKind::ALL
            .iter()
            .map(|kind| location(*kind, 3))
            .collect();
        let mut data: HashMap<SeriesId, TimeSeries> = locations
            .iter()
            .map(|l| {
                let id = l.raw_id(CadenceType::Short, 2, 1);
                (id.clone(), series(id, vec![false; 4]))
            })
            .collect();

        assert_eq!(
            collateral_verdict(CadenceType::Short, 2, 1, &locations, &data, &t, false),
            DataPresence::Present
        );

        let virtual_black = location(CollateralKind::VirtualBlack, 3).raw_id(CadenceType::Short, 2, 1);
        data.insert(virtual_black.clone(), series(virtual_black, vec![true; 4]));
        assert_eq!(
            collateral_verdict(CadenceType::Short, 2, 1, &locations, &data, &t, false),
            DataPresence::Missing
        );
        assert!(logs_contain("Collateral data missing for: virtual black"));
    }

    #[test]
    fn long_cadence_ignores_short_only_kinds() {
        let t = times(vec![true; 2]);
        let locations = vec![
            location(CollateralKind::MaskedSmear, 20),
            location(CollateralKind::VirtualSmear, 20),
            location(CollateralKind::BlackLevel, 500),
        ];
        let data = locations
            .iter()
            .map(|l| {
                let id = l.raw_id(CadenceType::Long, 2, 1);
                (id.clone(), series(id, vec![false, true]))
            })
            .collect();
        assert_eq!(
            collateral_verdict(CadenceType::Long, 2, 1, &locations, &data, &t, false),
            DataPresence::Present
        );
    }

    #[test]
    fn target_inherits_missing_collateral() {
        let t = times(vec![true; 2]);
        let id = SeriesId::new("/p");
        let data = HashMap::from([(id.clone(), series(id, vec![false, false]))]);
        assert_eq!(
            target_verdict(DataPresence::Missing, &data, &t, false),
            DataPresence::Missing
        );
        assert_eq!(
            target_verdict(DataPresence::Present, &data, &t, false),
            DataPresence::Present
        );
        assert_eq!(
            target_verdict(DataPresence::Present, &HashMap::new(), &t, false),
            DataPresence::Missing
        );
    }
}
