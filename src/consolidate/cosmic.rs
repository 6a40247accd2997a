//! Cosmic-ray event erasure and replacement.

use super::outputs::CosmicRayEvents;
use crate::model::{CadenceTimes, CadenceType, EventSeries, SeriesId};
use crate::ports::CollateralLocation;
use std::collections::BTreeMap;
use tracing::warn;

/// Mjd window whose stored events are replaced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErasureWindow {
    /// First erased mjd.
    pub start_mjd: f64,
    /// Last erased mjd.
    pub end_mjd: f64,
}

impl ErasureWindow {
    /// True when `mjd` lies inside the window.
    pub fn contains(&self, mjd: f64) -> bool {
        mjd >= self.start_mjd && mjd <= self.end_mjd
    }
}

/// The erasure window of a result batch.
///
/// Normally the window spans the processed cadences. When their first
/// cadence is a gap and `expanded` (the timestamps of the closest covered
/// interval) is known, the window is that interval shrunk by one ulp on
/// each side, so events of the neighbouring covered data survive.
pub fn erasure_window(times: &CadenceTimes, expanded: Option<&CadenceTimes>) -> ErasureWindow {
    match expanded {
        Some(expanded) if times.first_cadence_gapped() => {
            let window = ErasureWindow {
                start_mjd: expanded.start_mjd().next_up(),
                end_mjd: expanded.end_mjd().next_down(),
            };
            warn!(
                start_mjd = window.start_mjd,
                end_mjd = window.end_mjd,
                "Erasing cosmic rays for gapped mjd interval"
            );
            window
        }
        _ => ErasureWindow {
            start_mjd: times.start_mjd(),
            end_mjd: times.end_mjd(),
        },
    }
}

/// Event series to store for one result batch.
///
/// Events are grouped by location and sorted by time; events outside
/// `window` are dropped. Every known location without events gets an empty
/// series so its stale events in the window are erased too.
pub fn cosmic_ray_series(
    events: &CosmicRayEvents,
    locations: &[CollateralLocation],
    cadence_type: CadenceType,
    module: i32,
    output: i32,
    originator: u64,
    window: ErasureWindow,
) -> Vec<EventSeries> {
    let mut grouped: BTreeMap<SeriesId, Vec<(f64, f32)>> = BTreeMap::new();
    for location in locations {
        grouped
            .entry(SeriesId::cosmic_ray(
                location.kind,
                cadence_type,
                module,
                output,
                location.offset,
            ))
            .or_default();
    }
    for (kind, event) in events.iter() {
        if !window.contains(event.mjd) {
            continue;
        }
        grouped
            .entry(SeriesId::cosmic_ray(
                kind,
                cadence_type,
                module,
                output,
                event.row_or_column,
            ))
            .or_default()
            .push((event.mjd, event.delta));
    }

    grouped
        .into_iter()
        .map(|(id, mut hits)| {
            hits.sort_by(|a, b| a.0.total_cmp(&b.0));
            EventSeries {
                id,
                start_mjd: window.start_mjd,
                end_mjd: window.end_mjd,
                mjds: hits.iter().map(|(mjd, _)| *mjd).collect(),
                values: hits.iter().map(|(_, delta)| *delta).collect(),
                originator,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::outputs::CosmicRayEvent;
    use crate::model::CollateralKind;
    use tracing_test::traced_test;

    fn times(start_mjd: f64, end_mjd: f64, first_gapped: bool) -> CadenceTimes {
        CadenceTimes {
            cadence_type: CadenceType::Long,
            start_cadence: 0,
            end_cadence: 1,
            start_mjds: vec![start_mjd, (start_mjd + end_mjd) / 2.0],
            mid_mjds: vec![start_mjd, end_mjd],
            end_mjds: vec![(start_mjd + end_mjd) / 2.0, end_mjd],
            gaps: vec![first_gapped, false],
            fine_point: vec![true, true],
        }
    }

    fn event(row_or_column: i32, mjd: f64) -> CosmicRayEvent {
        CosmicRayEvent {
            row_or_column,
            mjd,
            delta: 2.0,
        }
    }

    #[test]
    fn ungapped_interval_uses_own_window() {
        let window = erasure_window(&times(10.0, 20.0, false), Some(&times(9.5, 20.5, false)));
        assert_eq!(
            window,
            ErasureWindow {
                start_mjd: 10.0,
                end_mjd: 20.0
            }
        );
        assert!(window.contains(10.0));
        assert!(window.contains(20.0));
    }

    #[traced_test]
    #[test]
    fn gapped_first_cadence_uses_open_expanded_window() {
        let window = erasure_window(&times(10.0, 20.0, true), Some(&times(9.5, 20.5, false)));
        assert!(window.start_mjd > 9.5);
        assert!(window.end_mjd < 20.5);
        assert!(!window.contains(9.5));
        assert!(!window.contains(20.5));
        assert!(window.contains(9.5 + 1e-9));
        assert_eq!(window.start_mjd, f64::from_bits(9.5f64.to_bits() + 1));
        assert_eq!(window.end_mjd, f64::from_bits(20.5f64.to_bits() - 1));
        assert!(window.contains(20.5f64.next_down()));
        assert!(logs_contain("Erasing cosmic rays for gapped mjd interval"));
    }

    #[test]
    fn gapped_first_cadence_without_expansion_keeps_own_window() {
        let window = erasure_window(&times(10.0, 20.0, true), None);
        assert_eq!(window.start_mjd, 10.0);
        assert_eq!(window.end_mjd, 20.0);
    }

    #[test]
    fn events_are_grouped_sorted_and_windowed() {
        let events = CosmicRayEvents {
            black: vec![event(1040, 15.0), event(1040, 11.0), event(1040, 25.0)],
            masked_smear: vec![event(20, 12.0)],
            ..CosmicRayEvents::default()
        };
        let locations = vec![
            CollateralLocation {
                kind: CollateralKind::BlackLevel,
                offset: 1040,
            },
            CollateralLocation {
                kind: CollateralKind::VirtualSmear,
                offset: 20,
            },
        ];
        let window = ErasureWindow {
            start_mjd: 10.0,
            end_mjd: 20.0,
        };
        let series = cosmic_ray_series(&events, &locations, CadenceType::Long, 2, 1, 42, window);
        assert_eq!(series.len(), 3);

        let black = series
            .iter()
            .find(|s| s.id == SeriesId::cosmic_ray(CollateralKind::BlackLevel, CadenceType::Long, 2, 1, 1040))
            .unwrap();
        assert_eq!(black.mjds, vec![11.0, 15.0]);
        assert_eq!(black.originator, 42);

        let virtual_smear = series
            .iter()
            .find(|s| s.id == SeriesId::cosmic_ray(CollateralKind::VirtualSmear, CadenceType::Long, 2, 1, 20))
            .unwrap();
        assert!(virtual_smear.is_empty());
        assert_eq!(virtual_smear.start_mjd, 10.0);
    }
}
