//! Integration tests for the parcel analysis pipeline.
//!
//! Coverage
//! --------
//! - Sparse vegetation samples through daily resampling, Gaussian smoothing,
//!   peak and season-marker detection and derivative points.
//! - GDD staging against a reference table loaded from `;`-delimited text.
//! - Batch driver ordering and per-parcel failure isolation.
//!
//! Exclusions
//! ----------
//! - Filter kernels, band parsing and window statistics in isolation; those
//!   are covered by the unit tests next to each module.
use approx::assert_abs_diff_eq;
use chrono::{Days, NaiveDate};
use pheno_curve::{
    analyze_batch, analyze_parcel, find_markers, find_peaks, smooth, CropKey, GddTable,
    ParcelInput, Params, PhenoError, SmoothingFilter, TimeSeries,
};

const TABLE: &str = "\
country;crop;variety;stage;Tbase;Tmax;GDD
Spain;wheat;generic;early;10;30;0-500
Spain;wheat;generic;mid;10;30;500-1200
Spain;wheat;generic;late;10;30;1200-3000
";

fn day(n: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 1).unwrap() + Days::new(n)
}

/// One bell-shaped season peaking on day 180, sampled every 8 days.
fn season() -> TimeSeries {
    TimeSeries::from_pairs((0..=45u64).map(|k| {
        let d = (k * 8) as f64;
        (day(k * 8), 0.2 + 0.6 * (-((d - 180.0) / 40.0).powi(2)).exp())
    }))
}

fn warm_days(len: u64) -> TimeSeries {
    TimeSeries::from_pairs((0..len).map(|d| (day(d), 293.15)))
}

#[test]
fn sparse_example_yields_single_peak_with_inflection() {
    let series = TimeSeries::from_pairs([
        (day(1), 0.2),
        (day(5), 0.3),
        (day(10), 0.8),
        (day(15), 0.75),
        (day(20), 0.3),
    ]);
    let params = Params {
        filter: SmoothingFilter::Gaussian {
            sigma: 2.0,
            truncate: 4.0,
        },
        ..Params::default()
    };
    let dense = smooth(&series, &params).unwrap();
    assert_eq!(dense.len(), 20);

    let peaks = find_peaks(&dense, &params).unwrap();
    assert_eq!(peaks.peaks.len(), 1);
    assert_eq!(peaks.pos.date, day(12));

    let bounds = find_markers(&dense, &[peaks.pos.date], &params).unwrap();
    assert_eq!(bounds.sos.date, day(1));
    assert_eq!(bounds.eos.date, day(20));

    let report = analyze_parcel(&ParcelInput::new("example", series), None, &params).unwrap();
    let inflections: Vec<_> = report.derivatives.inflections.iter().map(|p| p.date).collect();
    assert_eq!(inflections, vec![day(9), day(19)]);
    let accelerations: Vec<_> = report
        .derivatives
        .accelerations
        .iter()
        .map(|p| p.date)
        .collect();
    assert_eq!(accelerations, vec![day(6), day(12), day(15), day(16)]);
    assert_abs_diff_eq!(
        report.growth_rate,
        report.markers.pos.value - report.markers.sos.value,
        epsilon = 1e-12
    );
}

#[test]
fn full_season_markers_bracket_the_peak() {
    let report =
        analyze_parcel(&ParcelInput::new("p", season()), None, &Params::default()).unwrap();
    let m = &report.markers;
    assert!(!m.fallback);
    assert_eq!(m.pos.date, day(180));
    assert!(m.sos.date >= day(85) && m.sos.date <= day(100));
    assert!(m.eos.date >= day(260) && m.eos.date <= day(275));
    assert_eq!(m.vos.unwrap().date, day(0));

    assert_eq!(report.derivatives.inflections.len(), 2);
    let first = report.first_inflection().unwrap().date;
    let last = report.last_inflection().unwrap().date;
    assert!(first > day(140) && first < day(160));
    assert!(last > day(205) && last < day(225));
    for points in [&report.derivatives.inflections, &report.derivatives.accelerations] {
        for p in points.iter() {
            assert!(p.date > m.sos.date && p.date < m.eos.date);
        }
        for pair in points.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
    }

    assert!(report.growth_rate > 0.4);
    let span = (m.pos.date - m.sos.date).num_days() as f64;
    assert_abs_diff_eq!(report.growth_rate_per_day, report.growth_rate / span, epsilon = 1e-12);
    assert_eq!(report.params_hash, Params::default().params_hash_sha256().unwrap());
}

#[test]
fn gdd_corridor_accumulates_from_sos() {
    let table = GddTable::from_reader(TABLE.as_bytes()).unwrap();
    let profile = table
        .lookup(&CropKey::new("Spain", "wheat", "generic"))
        .unwrap();
    let input = ParcelInput::new("p", season()).with_temperature(warm_days(361));
    let report = analyze_parcel(&input, Some(&profile), &Params::default()).unwrap();

    let gdd = report.gdd.as_ref().unwrap();
    let m = &report.markers;
    assert_eq!(gdd.days.first().unwrap().date, m.sos.date);
    assert_eq!(gdd.days.last().unwrap().date, m.eos.date);
    for d in &gdd.days {
        assert_abs_diff_eq!(d.heat_unit, 10.0, epsilon = 1e-6);
    }
    for pair in gdd.days.windows(2) {
        assert!(pair[1].cumulative >= pair[0].cumulative);
    }
    assert_abs_diff_eq!(gdd.total(), 10.0 * gdd.len() as f64, epsilon = 1e-6);
    assert_eq!(gdd.days[0].stage.as_deref(), Some("early"));
    assert_eq!(gdd.days.last().unwrap().stage.as_deref(), Some("late"));

    let names: Vec<_> = report.stage_gdd.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["germination", "tillering", "grand_growth", "maturity"]);
    let germination_end = report.first_acceleration().unwrap().date;
    let days = (germination_end - m.sos.date).num_days() as f64 + 1.0;
    assert_eq!(report.stage_gdd[0].end, Some(germination_end));
    assert_abs_diff_eq!(report.stage_gdd[0].value.unwrap(), 10.0 * days, epsilon = 1e-6);
    assert_abs_diff_eq!(report.stage_gdd[3].value.unwrap(), gdd.total(), epsilon = 1e-6);

    let temperature = report.summary.temperature.unwrap();
    assert_eq!(temperature.stats.count, gdd.len());
}

#[test]
fn repeated_runs_are_identical() {
    let table = GddTable::from_reader(TABLE.as_bytes()).unwrap();
    let profile = table
        .lookup(&CropKey::new("Spain", "wheat", "generic"))
        .unwrap();
    let input = ParcelInput::new("p", season()).with_temperature(warm_days(361));
    let a = analyze_parcel(&input, Some(&profile), &Params::default()).unwrap();
    let b = analyze_parcel(&input, Some(&profile), &Params::default()).unwrap();
    assert_eq!(a.vegetation, b.vegetation);
    assert_eq!(a.markers, b.markers);
    assert_eq!(a.derivatives, b.derivatives);
    assert_eq!(a.gdd, b.gdd);
    assert_eq!(a.stage_gdd, b.stage_gdd);
}

#[test]
fn batch_is_sorted_and_isolates_failures() {
    let parcels = vec![
        ParcelInput::new("c", season()),
        ParcelInput::new("a", TimeSeries::from_pairs([(day(3), 0.5)])),
        ParcelInput::new("b", season()),
    ];
    let outcomes = analyze_batch(&parcels, None, &Params::default()).unwrap();
    let ids: Vec<_> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);
    assert_eq!(outcomes[0].1.as_ref().unwrap_err(), &PhenoError::InsufficientData);
    let b = outcomes[1].1.as_ref().unwrap();
    let c = outcomes[2].1.as_ref().unwrap();
    assert_eq!(b.markers, c.markers);
}
