//! Early-season growth speed and low-variation plateaus.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::derivatives::{diff, gradient};
use crate::markers::SeasonMarkers;
use crate::series::DenseSeries;
use crate::Params;

/// Slope of the two-point sequence `[sos_value, pos_value]` under the
/// gradient definition; equals `pos_value - sos_value`.
pub fn growth_rate(sos_value: f64, pos_value: f64) -> f64 {
    gradient(&[sos_value, pos_value])[0]
}

/// Growth rate spread over the days between SOS and POS; zero when the two
/// coincide.
pub fn growth_rate_per_day(markers: &SeasonMarkers) -> f64 {
    let days = (markers.pos.date - markers.sos.date).num_days();
    if days <= 0 {
        return 0.0;
    }
    growth_rate(markers.sos.value, markers.pos.value) / days as f64
}

/// Run of consecutive indices `i` where `|filtered[i + 1] - filtered[i]|`
/// stays below the plateau threshold.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plateau {
    pub start: usize,
    pub end: usize,
}

impl Plateau {
    /// Number of flat steps in the run.
    pub fn steps(&self) -> usize {
        self.end - self.start + 1
    }

    /// First and last date of the run, `None` when it lies outside `series`.
    pub fn dates(&self, series: &DenseSeries) -> Option<(NaiveDate, NaiveDate)> {
        Some((series.date_of(self.start)?, series.date_of(self.end)?))
    }
}

/// Runs of at least two consecutive near-flat steps of the filtered curve.
pub fn plateaus(series: &DenseSeries, params: &Params) -> Vec<Plateau> {
    let Some(values) = series.filtered().to_slice().map(diff) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut current: Option<Plateau> = None;
    for (i, d) in values.iter().enumerate() {
        if d.abs() >= params.plateau_threshold {
            continue;
        }
        current = match current {
            Some(run) if run.end + 1 == i => Some(Plateau { end: i, ..run }),
            Some(run) => {
                if run.steps() > 1 {
                    out.push(run);
                }
                Some(Plateau { start: i, end: i })
            }
            None => Some(Plateau { start: i, end: i }),
        };
    }
    if let Some(run) = current {
        if run.steps() > 1 {
            out.push(run);
        }
    }
    out
}
