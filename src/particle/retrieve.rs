//! Batched, validated reads from the time-series store.

use crate::error::{CalError, CalResult};
use crate::model::{CadenceInterval, SeriesId, TimeSeries};
use crate::ports::TimeSeriesStore;
use std::collections::HashMap;
use tracing::debug;

/// Reads `ids` over `interval` in batches of at most `max_read_ids` ids.
///
/// Ids the store does not return come back fully gapped. A returned series
/// that does not span `interval` is malformed.
pub(crate) async fn read_batched(
    store: &dyn TimeSeriesStore,
    ids: &[SeriesId],
    interval: CadenceInterval,
    max_read_ids: usize,
) -> CalResult<HashMap<SeriesId, TimeSeries>> {
    let batch_size = if max_read_ids == 0 {
        ids.len().max(1)
    } else {
        max_read_ids
    };

    let mut all = HashMap::with_capacity(ids.len());
    for batch in ids.chunks(batch_size) {
        debug!(count = batch.len(), "Reading time series batch");
        let read = store.read_series(batch, interval, false).await?;
        for (id, series) in read {
            series.validate()?;
            if series.interval() != interval {
                return Err(CalError::malformed(
                    &id,
                    format!(
                        "covers cadences {} but {} was requested",
                        series.interval(),
                        interval
                    ),
                ));
            }
            all.insert(id, series);
        }
    }

    for id in ids {
        if !all.contains_key(id) {
            all.insert(id.clone(), TimeSeries::empty(id.clone(), interval));
        }
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;

    #[tokio::test]
    async fn reads_in_bounded_batches() {
        let store = InMemoryStore::default();
        let interval = CadenceInterval::new(0, 3);
        let ids: Vec<SeriesId> = (0..7).map(|i| SeriesId::new(format!("/p/{i}"))).collect();
        for id in &ids[..3] {
            store.put(
                TimeSeries::int(id.clone(), interval, vec![5; 4], vec![false; 4], 11).unwrap(),
            );
        }

        let read = read_batched(&store, &ids, interval, 3).await.unwrap();
        assert_eq!(read.len(), 7);
        assert_eq!(store.read_batch_sizes(), vec![3, 3, 1]);
        assert!(read[&ids[6]].is_fully_gapped());
        assert!(!read[&ids[0]].is_fully_gapped());
    }

    #[tokio::test]
    async fn mismatched_interval_is_malformed() {
        let store = InMemoryStore::default();
        let id = SeriesId::new("/p/0");
        store.put(
            TimeSeries::int(id.clone(), CadenceInterval::new(0, 1), vec![1, 2], vec![false; 2], 1)
                .unwrap(),
        );
        let err = read_batched(&store, &[id], CadenceInterval::new(0, 3), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CalError::MalformedSeries { .. }));
    }
}
