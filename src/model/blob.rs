//! Versioned binary artifacts keyed by module/output and cadence range.

use super::cadence::{CadenceInterval, CadenceType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of cadence-range blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlobKind {
    /// Dynamic 2D black model (produced upstream, consumed here).
    DynamicBlack,
    /// One-dimensional black fit.
    OneDBlackFit,
    /// Uncertainty transformation.
    UncertaintyTransform,
    /// Smear correction.
    Smear,
}

impl BlobKind {
    pub(crate) fn id_segment(&self) -> &'static str {
        match self {
            BlobKind::DynamicBlack => "DynamicBlack",
            BlobKind::OneDBlackFit => "OneDBlackFit",
            BlobKind::UncertaintyTransform => "UncertaintyTransform",
            BlobKind::Smear => "Smear",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_segment())
    }
}

/// Metadata record of one stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CadenceBlobMetadata {
    /// Blob kind.
    pub kind: BlobKind,
    /// Task that wrote the blob.
    pub pipeline_task_id: u64,
    /// First covered cadence.
    pub start_cadence: i32,
    /// Last covered cadence.
    pub end_cadence: i32,
    /// Cadence type of the covered range.
    pub cadence_type: CadenceType,
    /// CCD module.
    pub module: i32,
    /// CCD output.
    pub output: i32,
    /// Extension of the original file, without the dot.
    pub file_extension: String,
}

impl CadenceBlobMetadata {
    /// The covered cadence range.
    pub fn interval(&self) -> CadenceInterval {
        CadenceInterval::new(self.start_cadence, self.end_cadence)
    }

    /// True when both records describe the same kind, module/output and cadence type.
    pub fn same_series(&self, other: &CadenceBlobMetadata) -> bool {
        self.kind == other.kind
            && self.module == other.module
            && self.output == other.output
            && self.cadence_type == other.cadence_type
    }
}

/// Blobs available over a cadence interval, as handed to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobSeries {
    /// First cadence.
    pub start_cadence: i32,
    /// Last cadence.
    pub end_cadence: i32,
    /// Per cadence index into `file_names`.
    pub blob_indices: Vec<i32>,
    /// True where no blob covers the cadence.
    pub gaps: Vec<bool>,
    /// Blob files referenced by `blob_indices`.
    pub file_names: Vec<String>,
}

impl BlobSeries {
    /// True when no blob is referenced.
    pub fn is_empty(&self) -> bool {
        self.file_names.is_empty()
    }
}
