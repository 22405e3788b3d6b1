//! Cumulative stage windows: every window starts at SOS and ends at a
//! named marker or derivative point.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::derivatives::DerivativeSet;
use crate::markers::SeasonMarkers;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WindowEnd {
    FirstInflection,
    LastInflection,
    FirstAcceleration,
    LastAcceleration,
    PeakOfSeason,
    EndOfSeason,
}

impl WindowEnd {
    /// Date the window closes on, if that point exists for the parcel.
    pub fn resolve(self, markers: &SeasonMarkers, points: &DerivativeSet) -> Option<NaiveDate> {
        match self {
            WindowEnd::FirstInflection => points.first_inflection().map(|p| p.date),
            WindowEnd::LastInflection => points.last_inflection().map(|p| p.date),
            WindowEnd::FirstAcceleration => points.first_acceleration().map(|p| p.date),
            WindowEnd::LastAcceleration => points.last_acceleration().map(|p| p.date),
            WindowEnd::PeakOfSeason => Some(markers.pos.date),
            WindowEnd::EndOfSeason => Some(markers.eos.date),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageWindow {
    pub name: String,
    pub end: WindowEnd,
}

impl StageWindow {
    pub fn new(name: impl Into<String>, end: WindowEnd) -> Self {
        Self {
            name: name.into(),
            end,
        }
    }

    /// Germination, tillering, grand growth and maturity.
    pub fn default_set() -> Vec<StageWindow> {
        vec![
            StageWindow::new("germination", WindowEnd::FirstAcceleration),
            StageWindow::new("tillering", WindowEnd::PeakOfSeason),
            StageWindow::new("grand_growth", WindowEnd::LastInflection),
            StageWindow::new("maturity", WindowEnd::EndOfSeason),
        ]
    }
}

/// Per-window result. `end` is `None` when the closing point does not exist;
/// `value` is `None` when the window could not be evaluated.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageValue<T> {
    pub name: String,
    pub end: Option<NaiveDate>,
    pub value: Option<T>,
}

/// Evaluate `eval(sos, end)` for every window in order.
pub fn over_stage_windows<T, F>(
    windows: &[StageWindow],
    markers: &SeasonMarkers,
    points: &DerivativeSet,
    mut eval: F,
) -> Vec<StageValue<T>>
where
    F: FnMut(NaiveDate, NaiveDate) -> Option<T>,
{
    windows
        .iter()
        .map(|window| {
            let end = window.end.resolve(markers, points);
            StageValue {
                name: window.name.clone(),
                end,
                value: end.and_then(|end| eval(markers.sos.date, end)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivatives::{DerivativePoint, PointKind};
    use crate::markers::MarkerPoint;
    use chrono::Days;

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap() + Days::new(n)
    }

    fn markers() -> SeasonMarkers {
        let point = |d| MarkerPoint {
            date: day(d),
            value: 0.5,
        };
        SeasonMarkers {
            sos: point(10),
            pos: point(40),
            eos: point(90),
            vos: None,
            fallback: false,
        }
    }

    #[test]
    fn windows_resolve_their_end_points() {
        let points = DerivativeSet {
            inflections: vec![
                DerivativePoint {
                    date: day(25),
                    value: 0.4,
                    kind: PointKind::Inflection,
                },
                DerivativePoint {
                    date: day(70),
                    value: 0.4,
                    kind: PointKind::Inflection,
                },
            ],
            accelerations: Vec::new(),
        };
        let spans = over_stage_windows(&StageWindow::default_set(), &markers(), &points, |s, e| {
            Some((e - s).num_days())
        });
        let names: Vec<_> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["germination", "tillering", "grand_growth", "maturity"]);
        assert_eq!(spans[0].end, None);
        assert_eq!(spans[0].value, None);
        assert_eq!(spans[1].value, Some(30));
        assert_eq!(spans[2].end, Some(day(70)));
        assert_eq!(spans[2].value, Some(60));
        assert_eq!(spans[3].value, Some(80));
    }
}
