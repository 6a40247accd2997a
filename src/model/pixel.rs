//! Pixel coordinates, pixel membership and collateral pixel kinds.

use super::cadence::{CadenceType, TargetType};
use super::series::SeriesId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A photometric pixel on one CCD module/output.
///
/// Equality, hashing and ordering only consider `(row, column)`; the storage
/// identifier is derived data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pixel {
    row: i32,
    column: i32,
    series_id: SeriesId,
}

impl Pixel {
    /// Creates a pixel with an explicit storage identifier.
    pub fn new(row: i32, column: i32, series_id: SeriesId) -> Self {
        Self {
            row,
            column,
            series_id,
        }
    }

    /// Creates a pixel whose storage identifier is its raw (uncalibrated)
    /// series for the given target type.
    pub fn raw(module: i32, output: i32, target_type: TargetType, row: i32, column: i32) -> Self {
        Self::new(
            row,
            column,
            SeriesId::raw_pixel(target_type, module, output, row, column),
        )
    }

    /// CCD row.
    pub fn row(&self) -> i32 {
        self.row
    }

    /// CCD column.
    pub fn column(&self) -> i32 {
        self.column
    }

    /// Identifier of the raw series read for this pixel.
    pub fn series_id(&self) -> &SeriesId {
        &self.series_id
    }
}

impl PartialEq for Pixel {
    fn eq(&self, other: &Self) -> bool {
        self.row == other.row && self.column == other.column
    }
}

impl Eq for Pixel {}

impl Hash for Pixel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.row.hash(state);
        self.column.hash(state);
    }
}

impl PartialOrd for Pixel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pixel {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.row, self.column).cmp(&(other.row, other.column))
    }
}

impl fmt::Display for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// Target and background membership of the pixels in one unit of work.
///
/// A pixel may belong to both sets.
#[derive(Debug, Clone, Default)]
pub struct PixelIndex {
    target: HashSet<Pixel>,
    background: HashSet<Pixel>,
}

impl PixelIndex {
    /// Creates an index from the two membership sets.
    pub fn new(
        target: impl IntoIterator<Item = Pixel>,
        background: impl IntoIterator<Item = Pixel>,
    ) -> Self {
        Self {
            target: target.into_iter().collect(),
            background: background.into_iter().collect(),
        }
    }

    /// Pixels belonging to science targets.
    pub fn target_pixels(&self) -> &HashSet<Pixel> {
        &self.target
    }

    /// Pixels belonging to the background table.
    pub fn background_pixels(&self) -> &HashSet<Pixel> {
        &self.background
    }

    /// True when `(row, column)` is a target pixel.
    pub fn is_target(&self, row: i32, column: i32) -> bool {
        self.target.contains(&Pixel::new(row, column, SeriesId::default()))
    }

    /// True when `(row, column)` is a background pixel.
    pub fn is_background(&self, row: i32, column: i32) -> bool {
        self.background
            .contains(&Pixel::new(row, column, SeriesId::default()))
    }

    /// The union of both sets in `(row, column)` order.
    ///
    /// A pixel present in both keeps its target storage identifier.
    pub fn all_pixels(&self) -> BTreeSet<Pixel> {
        let mut all: BTreeSet<Pixel> = self.target.iter().cloned().collect();
        for pixel in &self.background {
            if !all.contains(pixel) {
                all.insert(pixel.clone());
            }
        }
        all
    }

    /// Number of distinct pixels.
    pub fn len(&self) -> usize {
        self.target.len() + self.background.difference(&self.target).count()
    }

    /// True when the index holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.target.is_empty() && self.background.is_empty()
    }
}

/// Collateral (non-photometric) pixel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollateralKind {
    /// Masked smear columns.
    MaskedSmear,
    /// Virtual smear columns.
    VirtualSmear,
    /// Trailing black rows.
    BlackLevel,
    /// Black pixel in the masked smear rows (short cadence).
    MaskedBlack,
    /// Black pixel in the virtual smear rows (short cadence).
    VirtualBlack,
}

impl CollateralKind {
    /// Every collateral kind.
    pub const ALL: [CollateralKind; 5] = [
        CollateralKind::MaskedSmear,
        CollateralKind::VirtualSmear,
        CollateralKind::BlackLevel,
        CollateralKind::MaskedBlack,
        CollateralKind::VirtualBlack,
    ];

    const LONG_CADENCE: [CollateralKind; 3] = [
        CollateralKind::MaskedSmear,
        CollateralKind::VirtualSmear,
        CollateralKind::BlackLevel,
    ];

    /// Kinds that must all be present for collateral data to count as present.
    pub fn required_for(cadence_type: CadenceType) -> &'static [CollateralKind] {
        match cadence_type {
            CadenceType::Long => &Self::LONG_CADENCE,
            CadenceType::Short => &Self::ALL,
        }
    }

    /// True when the offset of this kind is a row (otherwise a column).
    pub fn offset_is_row(&self) -> bool {
        matches!(
            self,
            CollateralKind::BlackLevel | CollateralKind::MaskedBlack | CollateralKind::VirtualBlack
        )
    }

    pub(crate) fn id_segment(&self) -> &'static str {
        match self {
            CollateralKind::MaskedSmear => "MaskedSmear",
            CollateralKind::VirtualSmear => "VirtualSmear",
            CollateralKind::BlackLevel => "BlackLevel",
            CollateralKind::MaskedBlack => "MaskedBlack",
            CollateralKind::VirtualBlack => "VirtualBlack",
        }
    }
}

impl fmt::Display for CollateralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollateralKind::MaskedSmear => "masked smear",
            CollateralKind::VirtualSmear => "virtual smear",
            CollateralKind::BlackLevel => "black level",
            CollateralKind::MaskedBlack => "masked black",
            CollateralKind::VirtualBlack => "virtual black",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_identity_ignores_storage_id() {
        let a = Pixel::raw(2, 1, TargetType::LongCadence, 10, 20);
        let b = Pixel::raw(2, 1, TargetType::Background, 10, 20);
        assert_eq!(a, b);
        assert_ne!(a.series_id(), b.series_id());
    }

    #[test]
    fn index_union_prefers_target_identifier() {
        let target = Pixel::raw(2, 1, TargetType::LongCadence, 10, 20);
        let background = Pixel::raw(2, 1, TargetType::Background, 10, 20);
        let only_bkg = Pixel::raw(2, 1, TargetType::Background, 11, 5);
        let index = PixelIndex::new(vec![target.clone()], vec![background, only_bkg]);

        let all: Vec<Pixel> = index.all_pixels().into_iter().collect();
        assert_eq!(all.len(), 2);
        assert_eq!(index.len(), 2);
        assert_eq!(all[0].series_id(), target.series_id());
        assert!(index.is_target(10, 20));
        assert!(index.is_background(10, 20));
        assert!(!index.is_target(11, 5));
    }

    #[test]
    fn short_cadence_requires_all_collateral_kinds() {
        assert_eq!(CollateralKind::required_for(CadenceType::Short).len(), 5);
        assert_eq!(CollateralKind::required_for(CadenceType::Long).len(), 3);
        assert!(!CollateralKind::required_for(CadenceType::Long)
            .contains(&CollateralKind::MaskedBlack));
    }
}
