//! Domain data model shared by every stage.
//!
//! - [`cadence`]: cadence types, inclusive cadence intervals and per-cadence timestamps
//! - [`pixel`]: pixels, target/background membership and collateral kinds
//! - [`series`]: cadence series, point-event series and the storage identifier scheme
//! - [`blob`]: cadence-range blob metadata

pub mod blob;
pub mod cadence;
pub mod pixel;
pub mod series;

pub use blob::{BlobKind, BlobSeries, CadenceBlobMetadata};
pub use cadence::{CadenceInterval, CadenceTimes, CadenceType, TargetType};
pub use pixel::{CollateralKind, Pixel, PixelIndex};
pub use series::{
    CalibratedKind, CosmicRayMetricKind, EventSeries, MetricKind, SeriesId, SeriesValues,
    TargetMetricKind, TimeSeries,
};
