//! Core phenology curve analysis library implemented in Rust.
//!
//! Turns an irregular vegetation-index series into season markers
//! (start/peak/end/valley of season), inflection and acceleration points,
//! growth rate and plateaus, and stages a co-located temperature series into
//! growing degree days.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod derivatives;
pub mod features;
pub mod filter;
pub mod gdd;
pub mod growth;
pub mod markers;
pub mod pipeline;
pub mod series;
pub mod windows;

pub use derivatives::{derivatives, DerivativePoint, DerivativeSet, PointKind};
pub use features::{
    season_summary, vegetation_stage_stats, SeasonSummary, SummaryStats, WindowStats,
};
pub use filter::SmoothingFilter;
pub use gdd::{
    corridor_from_dense, gdd_corridor, staged_gdd, CropKey, CropProfile, GddDay, GddSeries,
    GddTable, StageBand,
};
pub use growth::{growth_rate, growth_rate_per_day, plateaus, Plateau};
pub use markers::{
    find_markers, find_peaks, season_markers, MarkerPoint, PeakSet, SeasonBounds, SeasonMarkers,
};
pub use pipeline::{analyze_batch, analyze_parcel, ParcelInput, ParcelOutcome, ParcelReport};
pub use series::{smooth, DenseSeries, Sample, TimeSeries};
pub use windows::{StageValue, StageWindow, WindowEnd};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhenoError {
    #[error("insufficient data for curve analysis")]
    InsufficientData,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("no candidate peak resolved both start and end of season ({candidates} tried)")]
    UnresolvedMarkers { candidates: usize },
    #[error("no reference entry for country '{country}', crop '{crop}', variety '{variety}'")]
    UnknownCrop {
        country: String,
        crop: String,
        variety: String,
    },
    #[error("malformed GDD band '{band}' for stage '{stage}'")]
    MalformedBand { stage: String, band: String },
    #[error("failed to read reference table: {0}")]
    ReferenceTable(String),
}

/// What a branch of the marker detector reports when its gradient never
/// crosses the threshold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeFallback {
    /// SOS falls back to the first day of the left branch, EOS to the last
    /// day of the right branch.
    BranchEdge,
    /// The branch stays unresolved and the next candidate peak is tried.
    Unresolved,
}

impl Default for EdgeFallback {
    fn default() -> Self {
        EdgeFallback::BranchEdge
    }
}

/// Pipeline policy applied when no candidate peak yields both SOS and EOS.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Use the first and last filtered samples of the series.
    SeriesEndpoints,
    /// Fail the parcel with [`PhenoError::UnresolvedMarkers`].
    Fail,
}

impl Default for UnresolvedPolicy {
    fn default() -> Self {
        UnresolvedPolicy::SeriesEndpoints
    }
}

/// Column of the daily temperature series that feeds the heat-unit transform.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeatSignal {
    Interpolated,
    Filtered,
}

impl Default for HeatSignal {
    fn default() -> Self {
        HeatSignal::Interpolated
    }
}

/// Kelvin to Celsius.
pub const KELVIN_OFFSET: f64 = 273.15;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub filter: SmoothingFilter,
    pub gradient_threshold: f64,
    pub peak_floor: f64,
    pub edge_fallback: EdgeFallback,
    pub unresolved_policy: UnresolvedPolicy,
    pub plateau_threshold: f64,
    /// Subtracted from raw temperatures before clipping to `[Tbase, Tmax]`.
    /// 273.15 converts Kelvin; some land-surface products were calibrated
    /// against 270.0 instead.
    pub temperature_offset: f64,
    pub heat_signal: HeatSignal,
    pub stage_windows: Vec<StageWindow>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            filter: SmoothingFilter::default(),
            gradient_threshold: 0.001,
            peak_floor: 0.0,
            edge_fallback: EdgeFallback::BranchEdge,
            unresolved_policy: UnresolvedPolicy::SeriesEndpoints,
            plateau_threshold: 0.002,
            temperature_offset: KELVIN_OFFSET,
            heat_signal: HeatSignal::Interpolated,
            stage_windows: StageWindow::default_set(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), PhenoError> {
        self.filter.validate()?;
        if !self.gradient_threshold.is_finite() || self.gradient_threshold < 0.0 {
            return Err(PhenoError::InvalidParameter(format!(
                "gradient_threshold must be a non-negative number, got {}",
                self.gradient_threshold
            )));
        }
        if !self.plateau_threshold.is_finite() || self.plateau_threshold < 0.0 {
            return Err(PhenoError::InvalidParameter(format!(
                "plateau_threshold must be a non-negative number, got {}",
                self.plateau_threshold
            )));
        }
        if !self.peak_floor.is_finite() {
            return Err(PhenoError::InvalidParameter("peak_floor must be finite".into()));
        }
        if !self.temperature_offset.is_finite() {
            return Err(PhenoError::InvalidParameter(
                "temperature_offset must be finite".into(),
            ));
        }
        if let Some(window) = self.stage_windows.iter().find(|w| w.name.trim().is_empty()) {
            return Err(PhenoError::InvalidParameter(format!(
                "stage window ending at {:?} has an empty name",
                window.end
            )));
        }
        Ok(())
    }

    /// Parameters as a JSON value, for debug dumps.
    pub fn params_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Lowercase hex SHA-256 of the JSON-serialized parameters. Stamped on
    /// every parcel report so runs with identical settings can be matched.
    pub fn params_hash_sha256(&self) -> Result<String, PhenoError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| PhenoError::InvalidParameter(e.to_string()))?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}
