//! Self-contained engine inputs packaged by one particle.

use super::DataPresence;
use crate::error::CalResult;
use crate::model::{CollateralKind, SeriesValues};
use crate::ports::FfiImage;
use crate::resolver::CommonParameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Time series of one photometric pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelInput {
    /// CCD row.
    pub row: i32,
    /// CCD column.
    pub column: i32,
    /// Raw values.
    pub values: SeriesValues,
    /// Gap indicators.
    pub gaps: Vec<bool>,
}

/// Time series of one collateral location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralInput {
    /// Collateral kind.
    pub kind: CollateralKind,
    /// Row or column offset.
    pub offset: i32,
    /// Raw values.
    pub values: SeriesValues,
    /// Gap indicators.
    pub gaps: Vec<bool>,
}

/// Everything the engine needs for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalInputs {
    /// Sequence number of the producing particle.
    pub invocation: usize,
    /// Number of invocations in the unit of work.
    pub total_invocations: usize,
    /// Set on the collateral invocation.
    pub first_call: bool,
    /// Set on the final invocation.
    pub last_call: bool,
    /// Set when there is nothing to calibrate.
    pub empty_inputs: bool,
    /// Presence verdict of the producing particle.
    pub presence: DataPresence,
    /// Shared context.
    pub parameters: Arc<CommonParameters>,
    /// Photometric pixels (target/background invocations).
    pub target_and_background_pixels: Vec<PixelInput>,
    /// Collateral locations (collateral invocation).
    pub collateral: Vec<CollateralInput>,
    /// Full frame image rows touched by this invocation.
    pub ffis: Vec<FfiImage>,
    /// Tasks that produced the retrieved data.
    pub producer_ids: BTreeSet<u64>,
    #[serde(default)]
    released: bool,
}

impl CalInputs {
    pub(crate) fn new(
        invocation: usize,
        total_invocations: usize,
        last_call: bool,
        presence: DataPresence,
        parameters: Arc<CommonParameters>,
    ) -> Self {
        let empty_inputs = parameters.is_data_absent() || presence == DataPresence::Missing;
        Self {
            invocation,
            total_invocations,
            first_call: invocation == 0,
            last_call,
            empty_inputs,
            presence,
            parameters,
            target_and_background_pixels: Vec::new(),
            collateral: Vec::new(),
            ffis: Vec::new(),
            producer_ids: BTreeSet::new(),
            released: false,
        }
    }

    /// Attaches the full frame image rows in `rows`, only for present data.
    pub(crate) fn attach_ffis(&mut self, rows: &BTreeSet<i32>) {
        if self.presence != DataPresence::Present {
            return;
        }
        if let Some(inputs) = self.parameters.inputs() {
            self.ffis = inputs.ffis.iter().map(|ffi| ffi.restrict_rows(rows)).collect();
        }
    }

    /// File name used by [`CalInputs::write_to`].
    pub fn file_name(&self) -> String {
        format!("cal-inputs-{}.json", self.invocation)
    }

    /// Persists the inputs as JSON under `dir`, returning the file path.
    pub async fn write_to(&self, dir: &Path) -> CalResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(self.file_name());
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Reads inputs persisted by [`CalInputs::write_to`].
    pub async fn read_from(path: &Path) -> CalResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Drops retrieved sample data, keeping metadata and flags.
    pub fn release_series(&mut self) {
        for pixel in &mut self.target_and_background_pixels {
            pixel.values = SeriesValues::Int(Vec::new());
            pixel.gaps = Vec::new();
        }
        for collateral in &mut self.collateral {
            collateral.values = SeriesValues::Int(Vec::new());
            collateral.gaps = Vec::new();
        }
        self.ffis = Vec::new();
        self.released = true;
    }

    /// True once [`CalInputs::release_series`] has run.
    pub fn is_released(&self) -> bool {
        self.released
    }
}
