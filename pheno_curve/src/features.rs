//! Descriptive statistics over stage windows and the whole season.

use std::ops::Bound;

use chrono::NaiveDate;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::derivatives::DerivativeSet;
use crate::markers::SeasonMarkers;
use crate::series::DenseSeries;
use crate::windows::{over_stage_windows, StageValue};
use crate::Params;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    /// Sample standard deviation; needs two values.
    pub std: Option<f64>,
    pub max: f64,
    pub min: f64,
}

impl WindowStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let view = ArrayView1::from(values);
        let mean = view.mean()?;
        let std = (values.len() > 1).then(|| view.std(1.0));
        Some(Self {
            count: values.len(),
            sum: view.sum(),
            mean,
            std,
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
        })
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SummaryStats {
    #[serde(flatten)]
    pub stats: WindowStats,
    /// Biased Fisher-Pearson skewness.
    pub skewness: Option<f64>,
    /// Biased excess kurtosis (normal = 0).
    pub kurtosis: Option<f64>,
}

impl SummaryStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let stats = WindowStats::from_values(values)?;
        let n = values.len() as f64;
        let moment = |p: i32| values.iter().map(|v| (v - stats.mean).powi(p)).sum::<f64>() / n;
        let m2 = moment(2);
        // Shape is undefined for a (numerically) constant sample.
        let degenerate = m2 <= (f64::EPSILON * stats.mean).powi(2);
        let (skewness, kurtosis) = if degenerate {
            (None, None)
        } else {
            (
                Some(moment(3) / m2.powf(1.5)),
                Some(moment(4) / (m2 * m2) - 3.0),
            )
        };
        Some(Self {
            stats,
            skewness,
            kurtosis,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SeasonSummary {
    /// Filtered vegetation index between SOS and EOS.
    pub vegetation: Option<SummaryStats>,
    /// Observed (non-gap) temperatures between SOS and EOS.
    pub temperature: Option<SummaryStats>,
}

/// Interpolated vegetation statistics for each configured stage window.
pub fn vegetation_stage_stats(
    series: &DenseSeries,
    markers: &SeasonMarkers,
    points: &DerivativeSet,
    params: &Params,
) -> Vec<StageValue<WindowStats>> {
    let values = series.interpolated();
    over_stage_windows(&params.stage_windows, markers, points, |from, to| {
        let range = series.window(Bound::Included(from), Bound::Included(to));
        let window: Vec<f64> = values.slice(ndarray::s![range]).to_vec();
        WindowStats::from_values(&window)
    })
}

pub fn season_summary(
    vegetation: &DenseSeries,
    temperature: Option<&DenseSeries>,
    markers: &SeasonMarkers,
) -> SeasonSummary {
    let (sos, eos) = (markers.sos.date, markers.eos.date);
    let veg_range = season_range(vegetation, sos, eos);
    let veg: Vec<f64> = vegetation
        .filtered()
        .slice(ndarray::s![veg_range])
        .to_vec();

    let temperature = temperature.and_then(|temps| {
        let observed: Vec<f64> = temps.raw()[season_range(temps, sos, eos)]
            .iter()
            .flatten()
            .copied()
            .collect();
        SummaryStats::from_values(&observed)
    });

    SeasonSummary {
        vegetation: SummaryStats::from_values(&veg),
        temperature,
    }
}

fn season_range(series: &DenseSeries, sos: NaiveDate, eos: NaiveDate) -> std::ops::Range<usize> {
    series.window(Bound::Included(sos), Bound::Included(eos))
}
