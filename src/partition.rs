//! Pixel chunk partitioning.
//!
//! Pixels are grouped by CCD row and whole rows are packed greedily into
//! chunks of at most `max_chunk_size` pixels. A row is never split, so a
//! single row wider than the bound becomes a chunk of its own.

use crate::model::Pixel;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Ordered chunks of pixels, each made of whole rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    chunks: Vec<Vec<Pixel>>,
}

impl Partition {
    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when there are no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks in row order.
    pub fn iter(&self) -> impl Iterator<Item = &[Pixel]> {
        self.chunks.iter().map(Vec::as_slice)
    }

    /// Consumes the partition.
    pub fn into_chunks(self) -> Vec<Vec<Pixel>> {
        self.chunks
    }

    /// Rows spanned by chunk `index`.
    pub fn row_span(&self, index: usize) -> Option<RangeInclusive<i32>> {
        let chunk = self.chunks.get(index)?;
        Some(chunk.first()?.row()..=chunk.last()?.row())
    }
}

/// Splits `pixels` into row-atomic chunks of at most `max_chunk_size` pixels.
///
/// `max_chunk_size == 0` yields one chunk per row.
pub fn partition(pixels: &BTreeSet<Pixel>, max_chunk_size: usize) -> Partition {
    let mut chunks = Vec::new();
    let mut current: Vec<Pixel> = Vec::new();

    for row in rows(pixels) {
        if !current.is_empty() && current.len() + row.len() > max_chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        current.extend(row.into_iter().cloned());
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    Partition { chunks }
}

/// Pixels grouped into consecutive runs of equal row.
fn rows(pixels: &BTreeSet<Pixel>) -> Vec<Vec<&Pixel>> {
    let mut rows: Vec<Vec<&Pixel>> = Vec::new();
    for pixel in pixels {
        match rows.last_mut() {
            Some(row) if row[0].row() == pixel.row() => row.push(pixel),
            _ => rows.push(vec![pixel]),
        }
    }
    rows
}
