//! Per-parcel analysis and the parallel batch driver.

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use crate::derivatives::{derivatives, DerivativePoint, DerivativeSet};
use crate::features::{season_summary, vegetation_stage_stats, SeasonSummary, WindowStats};
use crate::gdd::{corridor_from_dense, staged_gdd, CropProfile, GddSeries};
use crate::growth::{growth_rate, growth_rate_per_day, plateaus, Plateau};
use crate::markers::{find_peaks, season_markers, PeakSet, SeasonMarkers};
use crate::series::{smooth, DenseSeries, TimeSeries};
use crate::windows::StageValue;
use crate::{Params, PhenoError};

#[derive(Clone, Debug, Default)]
pub struct ParcelInput {
    pub id: String,
    pub vegetation: TimeSeries,
    /// Daily land-surface temperature co-located with the parcel.
    pub temperature: Option<TimeSeries>,
}

impl ParcelInput {
    pub fn new(id: impl Into<String>, vegetation: TimeSeries) -> Self {
        Self {
            id: id.into(),
            vegetation,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: TimeSeries) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ParcelReport {
    pub id: String,
    pub params_hash: String,
    #[serde(skip)]
    pub vegetation: DenseSeries,
    #[serde(skip)]
    pub temperature: Option<DenseSeries>,
    pub peaks: PeakSet,
    pub markers: SeasonMarkers,
    pub derivatives: DerivativeSet,
    pub growth_rate: f64,
    pub growth_rate_per_day: f64,
    pub plateaus: Vec<Plateau>,
    /// Present when both a temperature series and a crop profile were given.
    pub gdd: Option<GddSeries>,
    pub stage_gdd: Vec<StageValue<f64>>,
    pub vegetation_stages: Vec<StageValue<WindowStats>>,
    pub summary: SeasonSummary,
}

impl ParcelReport {
    pub fn first_inflection(&self) -> Option<&DerivativePoint> {
        self.derivatives.first_inflection()
    }

    pub fn last_inflection(&self) -> Option<&DerivativePoint> {
        self.derivatives.last_inflection()
    }

    pub fn first_acceleration(&self) -> Option<&DerivativePoint> {
        self.derivatives.first_acceleration()
    }

    pub fn last_acceleration(&self) -> Option<&DerivativePoint> {
        self.derivatives.last_acceleration()
    }
}

pub type ParcelOutcome = Result<ParcelReport, PhenoError>;

/// Run the full curve analysis for one parcel.
///
/// GDD staging is skipped unless the parcel carries a temperature series
/// and a crop profile is supplied.
pub fn analyze_parcel(
    input: &ParcelInput,
    profile: Option<&CropProfile>,
    params: &Params,
) -> ParcelOutcome {
    params.validate()?;
    let params_hash = params.params_hash_sha256()?;

    let vegetation = smooth(&input.vegetation, params)?;
    let peaks = find_peaks(&vegetation, params).ok_or(PhenoError::InsufficientData)?;
    let markers = season_markers(&vegetation, &peaks, params)?;
    if markers.fallback {
        debug!(parcel = %input.id, "season bounds fell back to series endpoints");
    }

    let points = derivatives(&vegetation, markers.sos.date, markers.eos.date);
    let plateaus = plateaus(&vegetation, params);

    let temperature = input
        .temperature
        .as_ref()
        .map(|t| smooth(t, params))
        .transpose()?
        .filter(|t| !t.is_empty());
    let (gdd, stage_gdd) = match (temperature.as_ref(), profile) {
        (Some(temps), Some(profile)) => (
            Some(corridor_from_dense(
                temps,
                markers.sos.date,
                markers.eos.date,
                profile,
                params,
            )),
            staged_gdd(temps, &markers, &points, profile, params),
        ),
        _ => (None, Vec::new()),
    };

    let vegetation_stages = vegetation_stage_stats(&vegetation, &markers, &points, params);
    let summary = season_summary(&vegetation, temperature.as_ref(), &markers);

    debug!(
        parcel = %input.id,
        sos = %markers.sos.date,
        pos = %markers.pos.date,
        eos = %markers.eos.date,
        inflections = points.inflections.len(),
        accelerations = points.accelerations.len(),
        "parcel analyzed"
    );

    Ok(ParcelReport {
        id: input.id.clone(),
        params_hash,
        growth_rate: growth_rate(markers.sos.value, markers.pos.value),
        growth_rate_per_day: growth_rate_per_day(&markers),
        vegetation,
        temperature,
        peaks,
        markers,
        derivatives: points,
        plateaus,
        gdd,
        stage_gdd,
        vegetation_stages,
        summary,
    })
}

/// Analyze every parcel in parallel. Results are sorted by parcel id; a
/// failing parcel does not affect the others.
pub fn analyze_batch(
    parcels: &[ParcelInput],
    profile: Option<&CropProfile>,
    params: &Params,
) -> Result<Vec<(String, ParcelOutcome)>, PhenoError> {
    params.validate()?;
    let mut outcomes: Vec<(String, ParcelOutcome)> = parcels
        .par_iter()
        .map(|parcel| (parcel.id.clone(), analyze_parcel(parcel, profile, params)))
        .collect();
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, NaiveDate};

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, 1).unwrap() + Days::new(n)
    }

    #[test]
    fn single_observation_is_insufficient() {
        let input = ParcelInput::new("p1", TimeSeries::from_pairs([(day(0), 0.4)]));
        assert_eq!(
            analyze_parcel(&input, None, &Params::default()).unwrap_err(),
            PhenoError::InsufficientData
        );
    }

    #[test]
    fn invalid_params_fail_the_batch() {
        let params = Params {
            plateau_threshold: f64::NAN,
            ..Params::default()
        };
        assert!(matches!(
            analyze_batch(&[], None, &params),
            Err(PhenoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn temperature_without_profile_skips_gdd() {
        let vegetation = TimeSeries::from_pairs((0..12u64).map(|i| {
            let x = i as f64 - 6.0;
            (day(i * 5), 0.2 + 0.5 * (-x * x / 8.0).exp())
        }));
        let temperature = TimeSeries::from_pairs((0..60u64).map(|d| (day(d), 295.0)));
        let input = ParcelInput::new("p1", vegetation).with_temperature(temperature);
        let report = analyze_parcel(&input, None, &Params::default()).unwrap();
        assert!(report.gdd.is_none());
        assert!(report.stage_gdd.is_empty());
        assert!(report.summary.temperature.is_some());
        assert_eq!(report.vegetation_stages.len(), 4);
        assert!(report.markers.sos.date <= report.markers.pos.date);
        assert!(report.markers.pos.date <= report.markers.eos.date);
    }
}
