//! Inflection and acceleration points from discrete differences of the
//! filtered curve.

use std::ops::Bound;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::series::DenseSeries;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    /// Sign change of the second difference.
    Inflection,
    /// Sign change of the third difference.
    Acceleration,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct DerivativePoint {
    pub date: NaiveDate,
    pub value: f64,
    pub kind: PointKind,
}

/// Date-ordered inflection and acceleration points strictly between SOS and
/// EOS. Consumers read the first and last entries positionally.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DerivativeSet {
    pub inflections: Vec<DerivativePoint>,
    pub accelerations: Vec<DerivativePoint>,
}

impl DerivativeSet {
    pub fn is_empty(&self) -> bool {
        self.inflections.is_empty() && self.accelerations.is_empty()
    }

    pub fn first_inflection(&self) -> Option<&DerivativePoint> {
        self.inflections.first()
    }

    pub fn last_inflection(&self) -> Option<&DerivativePoint> {
        self.inflections.last()
    }

    pub fn first_acceleration(&self) -> Option<&DerivativePoint> {
        self.accelerations.first()
    }

    pub fn last_acceleration(&self) -> Option<&DerivativePoint> {
        self.accelerations.last()
    }
}

/// Flag inflection and acceleration days over the open interval `(sos, eos)`.
///
/// Needs at least three days inside the interval, otherwise the set is
/// empty. A day is flagged when the sign of its difference differs from the
/// previous day's; days whose difference (or predecessor's) is undefined are
/// never flagged.
pub fn derivatives(series: &DenseSeries, sos: NaiveDate, eos: NaiveDate) -> DerivativeSet {
    let range = series.window(Bound::Excluded(sos), Bound::Excluded(eos));
    if range.len() < 3 {
        return DerivativeSet::default();
    }
    let filtered = series.filtered();
    let values: Vec<Option<f64>> = filtered
        .slice(ndarray::s![range.clone()])
        .iter()
        .map(|v| Some(*v))
        .collect();

    let dy = lagged_diff(&values);
    let ddy = lagged_diff(&dy);
    let dddy = lagged_diff(&ddy);

    let point = |offset: usize, kind: PointKind| {
        let index = range.start + offset;
        DerivativePoint {
            date: series.date(index),
            value: filtered[index],
            kind,
        }
    };

    DerivativeSet {
        inflections: sign_changes(&ddy)
            .map(|i| point(i, PointKind::Inflection))
            .collect(),
        accelerations: sign_changes(&dddy)
            .map(|i| point(i, PointKind::Acceleration))
            .collect(),
    }
}

/// `out[i] = v[i] - v[i-1]`; the first entry is undefined.
fn lagged_diff(values: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() {
        return out;
    }
    out.push(None);
    for pair in values.windows(2) {
        out.push(match (pair[0], pair[1]) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        });
    }
    out
}

fn sign_changes(values: &[Option<f64>]) -> impl Iterator<Item = usize> + '_ {
    (1..values.len()).filter(move |&i| match (values[i - 1], values[i]) {
        (Some(prev), Some(cur)) => sign(prev) != sign(cur),
        _ => false,
    })
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Plain successive differences, one shorter than the input.
pub fn diff(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Second-order central differences in the interior and one-sided
/// differences at both ends, unit spacing. Inputs shorter than two samples
/// have a zero gradient.
pub fn gradient(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = Vec::with_capacity(n);
    out.push(values[1] - values[0]);
    for i in 1..n - 1 {
        out.push((values[i + 1] - values[i - 1]) / 2.0);
    }
    out.push(values[n - 1] - values[n - 2]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 6, 1).unwrap() + Days::new(n)
    }

    #[test]
    fn gradient_matches_central_and_edge_differences() {
        assert_eq!(gradient(&[1.0, 2.0, 4.0, 7.0]), vec![1.0, 1.5, 2.5, 3.0]);
        let two = gradient(&[0.2, 0.8]);
        assert_eq!(two.len(), 2);
        assert_eq!(two[0], two[1]);
        assert!((two[0] - 0.6).abs() < 1e-12);
        assert_eq!(gradient(&[5.0]), vec![0.0]);
        assert_eq!(diff(&[1.0, 4.0, 2.0]), vec![3.0, -2.0]);
    }

    #[test]
    fn flags_curvature_and_jerk_sign_changes() {
        // Interior (days 1..=8): 0 1 3 6 8 9 9 8
        let series = DenseSeries::from_daily(
            day(0),
            vec![-1.0, 0.0, 1.0, 3.0, 6.0, 8.0, 9.0, 9.0, 8.0, 7.0],
        );
        let set = derivatives(&series, day(0), day(9));

        let inflections: Vec<_> = set.inflections.iter().map(|p| (p.date, p.value)).collect();
        assert_eq!(inflections, vec![(day(5), 8.0)]);

        let accelerations: Vec<_> = set.accelerations.iter().map(|p| p.date).collect();
        assert_eq!(accelerations, vec![day(5), day(6)]);
        assert!(set
            .accelerations
            .iter()
            .all(|p| p.kind == PointKind::Acceleration));

        assert_eq!(set.first_inflection(), set.last_inflection());
        assert_eq!(set.first_acceleration().unwrap().date, day(5));
        assert_eq!(set.last_acceleration().unwrap().date, day(6));
    }

    #[test]
    fn too_few_interior_days_give_empty_set() {
        let series = DenseSeries::from_daily(day(0), vec![0.0, 1.0, 4.0, 9.0, 16.0]);
        assert!(derivatives(&series, day(0), day(3)).is_empty());
        assert!(derivatives(&series, day(3), day(1)).is_empty());
        assert!(derivatives(&DenseSeries::empty(), day(0), day(3)).is_empty());
    }

    #[test]
    fn points_lie_strictly_inside_and_are_ordered() {
        let values: Vec<f64> = (0..60)
            .map(|i| (i as f64 / 6.0).sin() + 0.01 * i as f64)
            .collect();
        let series = DenseSeries::from_daily(day(0), values);
        let (sos, eos) = (day(5), day(50));
        let set = derivatives(&series, sos, eos);
        assert!(!set.inflections.is_empty());
        for points in [&set.inflections, &set.accelerations] {
            for p in points.iter() {
                assert!(p.date > sos && p.date < eos);
            }
            for pair in points.windows(2) {
                assert!(pair[0].date < pair[1].date);
            }
        }
    }
}
