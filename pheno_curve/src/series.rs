//! Dated samples, their daily resampling and the smoothed dense series every
//! detector reads from.

use std::ops::{Bound, Range};

use chrono::{Days, NaiveDate};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::{Params, PhenoError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub date: NaiveDate,
    pub value: f64,
}

impl Sample {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Date-ordered samples with at most one value per date.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeSeries {
    samples: Vec<Sample>,
}

impl TimeSeries {
    /// Sorts by date and collapses duplicate dates, keeping the first
    /// occurrence in input order. A first occurrence with a non-finite value
    /// turns its date into a gap; later duplicates do not replace it.
    pub fn new<I: IntoIterator<Item = Sample>>(samples: I) -> Self {
        let mut samples: Vec<Sample> = samples.into_iter().collect();
        samples.sort_by_key(|s| s.date);
        samples.dedup_by(|later, kept| later.date == kept.date);
        samples.retain(|s| s.value.is_finite());
        Self { samples }
    }

    pub fn from_pairs<I: IntoIterator<Item = (NaiveDate, f64)>>(pairs: I) -> Self {
        Self::new(pairs.into_iter().map(|(date, value)| Sample { date, value }))
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<&Sample> {
        self.samples.first()
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// One row per calendar day between the first and last input date.
///
/// `raw` keeps the observed value of each day (gaps are `None`),
/// `interpolated` is the linearly gap-filled signal and `filtered` the
/// smoothed curve all detectors operate on. An empty series has no start
/// date and zero rows.
#[derive(Clone, Debug, PartialEq)]
pub struct DenseSeries {
    start: Option<NaiveDate>,
    raw: Vec<Option<f64>>,
    interpolated: Array1<f64>,
    filtered: Array1<f64>,
}

impl DenseSeries {
    pub fn empty() -> Self {
        Self {
            start: None,
            raw: Vec::new(),
            interpolated: Array1::zeros(0),
            filtered: Array1::zeros(0),
        }
    }

    /// Wraps values that are already one-per-day and need no smoothing; the
    /// values serve as raw, interpolated and filtered columns alike.
    pub fn from_daily(start: NaiveDate, values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let raw = values.iter().copied().map(Some).collect();
        let arr = Array1::from_vec(values);
        Self {
            start: Some(start),
            raw,
            interpolated: arr.clone(),
            filtered: arr,
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        match self.len() {
            0 => None,
            n => Some(self.date(n - 1)),
        }
    }

    /// Date of row `index`, `None` past the end.
    pub fn date_of(&self, index: usize) -> Option<NaiveDate> {
        if index >= self.len() {
            return None;
        }
        self.start.map(|start| start + Days::new(index as u64))
    }

    /// Unchecked variant for row indices already known to be in range.
    pub(crate) fn date(&self, index: usize) -> NaiveDate {
        let start = self.start.expect("date() called on an empty DenseSeries");
        start + Days::new(index as u64)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        (0..self.len()).map(move |i| self.date(i))
    }

    pub fn raw(&self) -> &[Option<f64>] {
        &self.raw
    }

    pub fn interpolated(&self) -> ArrayView1<'_, f64> {
        self.interpolated.view()
    }

    pub fn filtered(&self) -> ArrayView1<'_, f64> {
        self.filtered.view()
    }

    /// Row index of `date`, if it lies inside the series.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        let start = self.start?;
        let offset = (date - start).num_days();
        if offset < 0 || offset as usize >= self.len() {
            None
        } else {
            Some(offset as usize)
        }
    }

    /// Row range covering the dates between `from` and `to`, clamped to the
    /// series. Returns an empty range when nothing qualifies.
    pub fn window(&self, from: Bound<NaiveDate>, to: Bound<NaiveDate>) -> Range<usize> {
        let Some(start) = self.start else {
            return 0..0;
        };
        let n = self.len() as i64;
        let offset = |d: NaiveDate| (d - start).num_days();
        let lo = match from {
            Bound::Included(d) => offset(d),
            Bound::Excluded(d) => offset(d) + 1,
            Bound::Unbounded => 0,
        }
        .clamp(0, n);
        let hi = match to {
            Bound::Included(d) => offset(d) + 1,
            Bound::Excluded(d) => offset(d),
            Bound::Unbounded => n,
        }
        .clamp(0, n);
        if lo >= hi {
            0..0
        } else {
            lo as usize..hi as usize
        }
    }
}

/// Resample to one row per day, fill gaps linearly and apply the configured
/// smoothing filter.
///
/// Fewer than two distinct dates produce an empty series.
pub fn smooth(series: &TimeSeries, params: &Params) -> Result<DenseSeries, PhenoError> {
    if series.len() < 2 {
        return Ok(DenseSeries::empty());
    }
    let (start, raw, interpolated) = resample_daily(series.samples());
    let filtered = params.filter.apply(&interpolated)?;
    Ok(DenseSeries {
        start: Some(start),
        raw,
        interpolated: Array1::from_vec(interpolated),
        filtered,
    })
}

fn resample_daily(points: &[Sample]) -> (NaiveDate, Vec<Option<f64>>, Vec<f64>) {
    let start = points[0].date;
    let end = points[points.len() - 1].date;
    let len = (end - start).num_days() as usize + 1;
    let mut raw = vec![None; len];
    for p in points {
        raw[(p.date - start).num_days() as usize] = Some(p.value);
    }

    let mut interpolated = Vec::with_capacity(len);
    let mut idx = 0;
    for step in 0..len {
        while idx + 1 < points.len() && ((points[idx + 1].date - start).num_days() as usize) <= step
        {
            idx += 1;
        }
        let d0 = (points[idx].date - start).num_days() as f64;
        let a0 = points[idx].value;
        if idx + 1 < points.len() && d0 < step as f64 {
            let d1 = (points[idx + 1].date - start).num_days() as f64;
            let a1 = points[idx + 1].value;
            let frac = (step as f64 - d0) / (d1 - d0);
            interpolated.push(a0 + (a1 - a0) * frac);
        } else {
            interpolated.push(a0);
        }
    }
    (start, raw, interpolated)
}
