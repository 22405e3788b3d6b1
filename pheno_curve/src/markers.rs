//! Peak, valley and season-boundary detection on the filtered curve.

use std::cmp::Reverse;
use std::ops::Bound;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::derivatives::gradient;
use crate::series::DenseSeries;
use crate::{EdgeFallback, Params, PhenoError, UnresolvedPolicy};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MarkerPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl MarkerPoint {
    fn at(series: &DenseSeries, index: usize) -> Self {
        Self {
            date: series.date(index),
            value: series.filtered()[index],
        }
    }
}

/// Local maxima plus the absolute peak (POS) and the pre-peak valley (VOS).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PeakSet {
    pub peaks: Vec<MarkerPoint>,
    pub pos: MarkerPoint,
    pub vos: Option<MarkerPoint>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SeasonBounds {
    pub sos: MarkerPoint,
    pub eos: MarkerPoint,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct SeasonMarkers {
    pub sos: MarkerPoint,
    pub pos: MarkerPoint,
    pub eos: MarkerPoint,
    pub vos: Option<MarkerPoint>,
    /// True when SOS/EOS came from the unresolved-marker fallback rather than
    /// from gradient detection.
    pub fallback: bool,
}

/// Find every local maximum at or above `params.peak_floor`, the global
/// maximum and the minimum strictly before it. `None` for an empty series.
///
/// Flat-topped maxima report their middle day (rounded towards the start).
pub fn find_peaks(series: &DenseSeries, params: &Params) -> Option<PeakSet> {
    if series.is_empty() {
        return None;
    }
    let values = series.filtered();
    let n = values.len();

    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < n {
        if values[i - 1] < values[i] {
            let mut ahead = i + 1;
            while ahead + 1 < n && values[ahead] == values[i] {
                ahead += 1;
            }
            if values[ahead] < values[i] {
                let mid = (i + ahead - 1) / 2;
                if values[mid] >= params.peak_floor {
                    peaks.push(MarkerPoint::at(series, mid));
                }
                i = ahead;
            }
        }
        i += 1;
    }

    // First occurrence wins on ties for both extremes.
    let pos_idx = values
        .iter()
        .enumerate()
        .min_by_key(|(_, v)| Reverse(OrderedFloat(**v)))
        .map(|(i, _)| i)?;
    let vos = values
        .iter()
        .take(pos_idx)
        .enumerate()
        .min_by_key(|(_, v)| OrderedFloat(**v))
        .map(|(i, _)| MarkerPoint::at(series, i));

    Some(PeakSet {
        peaks,
        pos: MarkerPoint::at(series, pos_idx),
        vos,
    })
}

/// Derive start and end of season around candidate peaks.
///
/// Candidates are tried in ascending date order; the first one whose left
/// branch yields a SOS and whose right branch yields an EOS wins. With no
/// candidates the global maximum is used. Fails with
/// [`PhenoError::UnresolvedMarkers`] when no candidate resolves.
pub fn find_markers(
    series: &DenseSeries,
    candidates: &[NaiveDate],
    params: &Params,
) -> Result<SeasonBounds, PhenoError> {
    let mut ordered: Vec<NaiveDate> = candidates.to_vec();
    if ordered.is_empty() {
        if let Some(peaks) = find_peaks(series, params) {
            ordered.push(peaks.pos.date);
        }
    }
    ordered.sort();

    for &peak in &ordered {
        let sos = start_of_season(series, peak, params);
        let eos = end_of_season(series, peak, params);
        if let (Some(sos), Some(eos)) = (sos, eos) {
            return Ok(SeasonBounds {
                sos: MarkerPoint::at(series, sos),
                eos: MarkerPoint::at(series, eos),
            });
        }
    }
    Err(PhenoError::UnresolvedMarkers {
        candidates: ordered.len(),
    })
}

/// Full marker set for the global peak, applying `params.unresolved_policy`
/// when gradient detection cannot place SOS and EOS.
pub fn season_markers(
    series: &DenseSeries,
    peaks: &PeakSet,
    params: &Params,
) -> Result<SeasonMarkers, PhenoError> {
    let (bounds, fallback) = match find_markers(series, &[peaks.pos.date], params) {
        Ok(bounds) => (bounds, false),
        Err(PhenoError::UnresolvedMarkers { .. })
            if params.unresolved_policy == UnresolvedPolicy::SeriesEndpoints =>
        {
            let last = series.len().checked_sub(1).ok_or(PhenoError::InsufficientData)?;
            let bounds = SeasonBounds {
                sos: MarkerPoint::at(series, 0),
                eos: MarkerPoint::at(series, last),
            };
            (bounds, true)
        }
        Err(err) => return Err(err),
    };
    Ok(SeasonMarkers {
        sos: bounds.sos,
        pos: peaks.pos,
        eos: bounds.eos,
        vos: peaks.vos,
        fallback,
    })
}

fn start_of_season(series: &DenseSeries, peak: NaiveDate, params: &Params) -> Option<usize> {
    let range = series.window(Bound::Unbounded, Bound::Included(peak));
    if range.len() <= 2 {
        return None;
    }
    let branch = series.filtered();
    let grad = gradient(&branch.as_slice()?[range.clone()]);
    match grad.iter().position(|g| *g > params.gradient_threshold) {
        Some(i) => Some(range.start + i),
        None => match params.edge_fallback {
            EdgeFallback::BranchEdge => Some(range.start),
            EdgeFallback::Unresolved => None,
        },
    }
}

fn end_of_season(series: &DenseSeries, peak: NaiveDate, params: &Params) -> Option<usize> {
    let range = series.window(Bound::Included(peak), Bound::Unbounded);
    if range.len() <= 2 {
        return None;
    }
    let branch = series.filtered();
    let grad = gradient(&branch.as_slice()?[range.clone()]);
    match grad.iter().rposition(|g| *g < -params.gradient_threshold) {
        Some(i) => Some(range.start + i),
        None => match params.edge_fallback {
            EdgeFallback::BranchEdge => Some(range.end - 1),
            EdgeFallback::Unresolved => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 3, 1).unwrap() + Days::new(n)
    }

    fn dense(values: &[f64]) -> DenseSeries {
        DenseSeries::from_daily(day(0), values.to_vec())
    }

    const SEASON: [f64; 14] = [
        0.2, 0.2, 0.2, 0.3, 0.4, 0.5, 0.6, 0.6, 0.5, 0.4, 0.3, 0.2, 0.2, 0.2,
    ];

    #[test]
    fn finds_multiple_peaks_and_global_extremes() {
        let series = dense(&[0.0, 1.0, 3.0, 2.0, 1.0, 4.0, 5.0, 4.0, 0.0]);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        let dates: Vec<_> = peaks.peaks.iter().map(|p| p.date).collect();
        assert_eq!(dates, vec![day(2), day(6)]);
        assert_eq!(peaks.pos.date, day(6));
        assert_eq!(peaks.pos.value, 5.0);
        assert_eq!(peaks.vos.unwrap().date, day(0));
    }

    #[test]
    fn flat_top_reports_middle_day() {
        let series = dense(&[0.0, 2.0, 2.0, 2.0, 0.0]);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        assert_eq!(peaks.peaks.len(), 1);
        assert_eq!(peaks.peaks[0].date, day(2));
        // Global maximum takes the first of the tied days.
        assert_eq!(peaks.pos.date, day(1));

        let series = dense(&[0.0, 2.0, 2.0, 0.0]);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        assert_eq!(peaks.peaks[0].date, day(1));
    }

    #[test]
    fn peaks_below_floor_are_ignored_but_pos_is_kept() {
        let series = dense(&[-3.0, -1.0, -2.0]);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        assert!(peaks.peaks.is_empty());
        assert_eq!(peaks.pos.date, day(1));
        assert_eq!(peaks.vos.unwrap().date, day(0));
    }

    #[test]
    fn valley_is_absent_when_peak_is_first_day() {
        let series = dense(&[0.9, 0.5, 0.1]);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        assert_eq!(peaks.pos.date, day(0));
        assert!(peaks.vos.is_none());
        assert!(find_peaks(&DenseSeries::empty(), &Params::default()).is_none());
    }

    #[test]
    fn markers_follow_gradient_threshold() {
        let series = dense(&SEASON);
        let bounds = find_markers(&series, &[day(6)], &Params::default()).unwrap();
        assert_eq!(bounds.sos.date, day(2));
        assert_eq!(bounds.eos.date, day(11));
        assert_eq!(bounds.eos.value, 0.2);
    }

    #[test]
    fn empty_candidates_use_global_peak() {
        let series = dense(&SEASON);
        let bounds = find_markers(&series, &[], &Params::default()).unwrap();
        assert_eq!(bounds.sos.date, day(2));
        assert_eq!(bounds.eos.date, day(11));
    }

    #[test]
    fn short_branch_moves_on_to_next_candidate() {
        let series = dense(&SEASON);
        let bounds = find_markers(&series, &[day(6), day(1)], &Params::default()).unwrap();
        assert_eq!(bounds.sos.date, day(2));
        assert_eq!(bounds.eos.date, day(11));
    }

    #[test]
    fn edge_fallback_controls_flat_branches() {
        let series = dense(&[0.5, 0.5, 0.5, 0.4, 0.3, 0.2]);
        let bounds = find_markers(&series, &[day(2)], &Params::default()).unwrap();
        assert_eq!(bounds.sos.date, day(0));
        assert_eq!(bounds.eos.date, day(5));

        let strict = Params {
            edge_fallback: EdgeFallback::Unresolved,
            ..Params::default()
        };
        assert_eq!(
            find_markers(&series, &[day(2)], &strict),
            Err(PhenoError::UnresolvedMarkers { candidates: 1 })
        );
    }

    #[test]
    fn unresolved_policy_selects_endpoints_or_fails() {
        let series = dense(&[0.1, 0.2, 0.3, 0.4]);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        assert_eq!(peaks.pos.date, day(3));

        let markers = season_markers(&series, &peaks, &Params::default()).unwrap();
        assert!(markers.fallback);
        assert_eq!(markers.sos.date, day(0));
        assert_eq!(markers.eos.date, day(3));

        let strict = Params {
            unresolved_policy: UnresolvedPolicy::Fail,
            ..Params::default()
        };
        assert!(matches!(
            season_markers(&series, &peaks, &strict),
            Err(PhenoError::UnresolvedMarkers { .. })
        ));
    }

    #[test]
    fn markers_are_ordered_around_peak() {
        let series = dense(&SEASON);
        let peaks = find_peaks(&series, &Params::default()).unwrap();
        let markers = season_markers(&series, &peaks, &Params::default()).unwrap();
        assert!(!markers.fallback);
        assert!(markers.sos.date <= markers.pos.date);
        assert!(markers.pos.date <= markers.eos.date);
        assert!(markers.vos.unwrap().date <= markers.pos.date);
    }
}
