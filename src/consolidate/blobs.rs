//! Blob supersession.

use crate::error::CalResult;
use crate::model::{BlobKind, CadenceBlobMetadata, CadenceType, SeriesId};
use crate::ports::{BlobMetadataRepository, BlobStore};
use std::path::Path;
use tracing::{debug, info};

/// Existing records made obsolete by `new`.
///
/// A record is obsolete when it belongs to the same series and its cadence
/// range overlaps the new one. Records with the same range as `new` are
/// always obsolete, so one range never holds two records.
pub fn obsolete_blobs<'a>(
    existing: &'a [CadenceBlobMetadata],
    new: &CadenceBlobMetadata,
) -> Vec<&'a CadenceBlobMetadata> {
    let range = new.interval();
    existing
        .iter()
        .filter(|blob| blob.same_series(new) && blob.interval().overlaps(&range))
        .collect()
}

/// Where a new blob belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobTarget {
    /// Task that produced the blob.
    pub pipeline_task_id: u64,
    /// Cadence type of the covered range.
    pub cadence_type: CadenceType,
    /// First covered cadence.
    pub start_cadence: i32,
    /// Last covered cadence.
    pub end_cadence: i32,
    /// CCD module.
    pub module: i32,
    /// CCD output.
    pub output: i32,
}

/// Stores the blob `file_name` from `blob_dir` and supersedes older records.
///
/// An empty file name means the engine produced no blob of this kind.
/// Returns whether a blob was stored.
pub async fn store_blob(
    blob_store: &dyn BlobStore,
    metadata: &dyn BlobMetadataRepository,
    kind: BlobKind,
    target: &BlobTarget,
    blob_dir: &Path,
    file_name: &str,
) -> CalResult<bool> {
    if file_name.is_empty() {
        debug!(kind = %kind, "No blob returned");
        return Ok(false);
    }

    let path = blob_dir.join(file_name);
    let id = SeriesId::blob(
        kind,
        target.cadence_type,
        target.module,
        target.output,
        target.pipeline_task_id,
    );
    blob_store
        .write_blob(&id, target.pipeline_task_id, &path)
        .await?;

    let new = CadenceBlobMetadata {
        kind,
        pipeline_task_id: target.pipeline_task_id,
        start_cadence: target.start_cadence,
        end_cadence: target.end_cadence,
        cadence_type: target.cadence_type,
        module: target.module,
        output: target.output,
        file_extension: path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let existing = metadata
        .blobs(kind, target.module, target.output, target.cadence_type)
        .await?;
    let obsolete = obsolete_blobs(&existing, &new);
    for blob in &obsolete {
        metadata.delete(blob).await?;
    }
    metadata.create(&new).await?;

    info!(
        kind = %kind,
        id = %id,
        superseded = obsolete.len(),
        "Stored blob for cadences {}",
        new.interval()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(start: i32, end: i32) -> CadenceBlobMetadata {
        CadenceBlobMetadata {
            kind: BlobKind::OneDBlackFit,
            pipeline_task_id: 1,
            start_cadence: start,
            end_cadence: end,
            cadence_type: CadenceType::Long,
            module: 2,
            output: 1,
            file_extension: "mat".to_string(),
        }
    }

    #[test]
    fn overlapping_ranges_are_obsolete() {
        let existing = vec![blob(100, 200), blob(300, 400)];
        assert_eq!(obsolete_blobs(&existing, &blob(150, 350)).len(), 2);
        assert!(obsolete_blobs(&existing, &blob(500, 600)).is_empty());
        assert_eq!(obsolete_blobs(&existing, &blob(400, 450)), vec![&existing[1]]);
    }

    #[test]
    fn identical_ranges_are_all_obsolete() {
        let existing = vec![blob(100, 200), blob(100, 200)];
        assert_eq!(obsolete_blobs(&existing, &blob(100, 200)).len(), 2);
    }

    #[test]
    fn other_series_are_kept() {
        let mut smear = blob(100, 200);
        smear.kind = BlobKind::Smear;
        let mut other_output = blob(100, 200);
        other_output.output = 2;
        let mut short = blob(100, 200);
        short.cadence_type = CadenceType::Short;

        let existing = vec![smear, other_output, short];
        assert!(obsolete_blobs(&existing, &blob(100, 200)).is_empty());
    }
}
