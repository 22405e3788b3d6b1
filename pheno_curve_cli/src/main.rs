use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use pheno_curve::{
    analyze_batch, CropKey, CropProfile, DerivativePoint, EdgeFallback, GddTable, MarkerPoint,
    ParcelInput, ParcelReport, Params, Sample, SmoothingFilter, TimeSeries, UnresolvedPolicy,
};
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Crop phenology curve analysis CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive season markers, derivative points and GDD stages per parcel
    Analyze(AnalyzeArgs),
    /// List the crops and stage bands of a GDD reference table
    Stages(StagesArgs),
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// Vegetation index series (`id;date;value`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    vegetation: PathBuf,

    /// Land-surface temperature series (`id;date;value`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    temperature: Option<PathBuf>,

    /// Crop stage reference table (`country;crop;variety;stage;Tbase;Tmax;GDD`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    gdd_table: Option<PathBuf>,

    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    crop: Option<String>,

    #[arg(long)]
    variety: Option<String>,

    /// Parameter JSON; flags below override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Smoothing filter
    #[arg(long, value_enum)]
    filter: Option<FilterOpt>,

    /// Gaussian smoothing width in days
    #[arg(long)]
    sigma: Option<f64>,

    /// Subtracted from temperatures before clipping (273.15 for Kelvin input)
    #[arg(long)]
    temperature_offset: Option<f64>,

    /// Behavior when a branch never crosses the gradient threshold
    #[arg(long, value_enum)]
    edge_fallback: Option<EdgeFallbackOpt>,

    /// Skip parcels whose season bounds cannot be resolved instead of
    /// falling back to the series endpoints
    #[arg(long, action = ArgAction::SetTrue)]
    strict_markers: bool,

    /// Feature table path (`-` for stdout)
    #[arg(short, long, default_value = "features.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional per-day time-series table
    #[arg(long, value_hint = ValueHint::FilePath)]
    timeseries_output: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct StagesArgs {
    /// Crop stage reference table
    #[arg(long, value_hint = ValueHint::FilePath)]
    gdd_table: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FilterOpt {
    Gaussian,
    SavitzkyGolay,
}

impl From<FilterOpt> for SmoothingFilter {
    fn from(value: FilterOpt) -> Self {
        match value {
            FilterOpt::Gaussian => SmoothingFilter::default(),
            FilterOpt::SavitzkyGolay => SmoothingFilter::SavitzkyGolay {
                window: 9,
                order: 2,
            },
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum EdgeFallbackOpt {
    BranchEdge,
    Unresolved,
}

impl From<EdgeFallbackOpt> for EdgeFallback {
    fn from(value: EdgeFallbackOpt) -> Self {
        match value {
            EdgeFallbackOpt::BranchEdge => EdgeFallback::BranchEdge,
            EdgeFallbackOpt::Unresolved => EdgeFallback::Unresolved,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Analyze(args) => args.verbose,
        Command::Stages(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
        Command::Stages(args) => handle_stages(args),
    }
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let mut params = match args.params.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(filter) = args.filter {
        params.filter = filter.into();
    }
    if let Some(value) = args.sigma {
        match &mut params.filter {
            SmoothingFilter::Gaussian { sigma, .. } => *sigma = value,
            SmoothingFilter::SavitzkyGolay { .. } => {
                warn!("--sigma ignored for Savitzky-Golay smoothing")
            }
        }
    }
    if let Some(offset) = args.temperature_offset {
        params.temperature_offset = offset;
    }
    if let Some(fallback) = args.edge_fallback {
        params.edge_fallback = fallback.into();
    }
    if args.strict_markers {
        params.unresolved_policy = UnresolvedPolicy::Fail;
    }
    params.validate()?;
    debug!("Params: {}", params.params_json());

    let profile = match args.gdd_table.as_ref() {
        Some(path) => Some(load_profile(path, &args)?),
        None => None,
    };

    let t_read = Instant::now();
    let vegetation = read_series(&args.vegetation)?;
    let mut temperature = match args.temperature.as_ref() {
        Some(path) => read_series(path)?,
        None => BTreeMap::new(),
    };
    if vegetation.is_empty() {
        return Err(anyhow!(
            "no parcels found in {}",
            args.vegetation.display()
        ));
    }
    if profile.is_none() && !temperature.is_empty() {
        warn!("Temperature series supplied without --gdd-table; GDD staging skipped");
    }

    let parcels: Vec<ParcelInput> = vegetation
        .into_iter()
        .map(|(id, series)| {
            let mut input = ParcelInput::new(id, series);
            match temperature.remove(&input.id) {
                Some(temps) => input.temperature = Some(temps),
                None if args.temperature.is_some() => {
                    warn!("Parcel {} has no temperature series", input.id)
                }
                None => {}
            }
            input
        })
        .collect();
    if args.profile || args.verbose {
        info!(
            "Read stage: {:.1} ms ({} parcels)",
            t_read.elapsed().as_secs_f64() * 1000.0,
            parcels.len()
        );
    }

    let t_compute = Instant::now();
    let outcomes = analyze_batch(&parcels, profile.as_ref(), &params)?;
    let mut reports = Vec::with_capacity(outcomes.len());
    for (id, outcome) in outcomes {
        match outcome {
            Ok(report) => reports.push(report),
            Err(err) => warn!("Skipping parcel {}: {}", id, err),
        }
    }
    if args.profile || args.verbose {
        info!(
            "Compute stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }
    info!(
        "Analyzed {} of {} parcels ({} filter)",
        reports.len(),
        parcels.len(),
        params.filter.id()
    );

    let t_csv = Instant::now();
    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        write_features(&reports, &params, stdout.lock())?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        write_features(&reports, &params, file)?;
        info!("Wrote feature table: {}", args.output.display());
    }
    if let Some(path) = args.timeseries_output.as_ref() {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let rows = write_timeseries(&reports, file)?;
        info!("Wrote time-series table: {} ({} rows)", path.display(), rows);
    }
    if args.profile || args.verbose {
        info!(
            "CSV stage: {:.1} ms",
            t_csv.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

fn handle_stages(args: StagesArgs) -> Result<()> {
    let table = GddTable::from_path(&args.gdd_table)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for key in table.crops() {
        match table.lookup(&key) {
            Ok(profile) => {
                writeln!(
                    out,
                    "{} (Tbase {}, Tmax {})",
                    key, profile.tbase, profile.tmax
                )?;
                for band in &profile.stages {
                    writeln!(out, "  {:<32} {:>8} - {:<8}", band.name, band.min, band.max)?;
                }
            }
            Err(err) => warn!("{}: {}", key, err),
        }
    }
    Ok(())
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read params {}", path.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid params JSON", path.display()))?;
    Ok(params)
}

fn load_profile(path: &Path, args: &AnalyzeArgs) -> Result<CropProfile> {
    let (Some(country), Some(crop), Some(variety)) =
        (args.country.as_ref(), args.crop.as_ref(), args.variety.as_ref())
    else {
        return Err(anyhow!(
            "--gdd-table requires --country, --crop and --variety"
        ));
    };
    let table = GddTable::from_path(path)?;
    let key = CropKey::new(country, crop, variety);
    let profile = table
        .lookup(&key)
        .with_context(|| format!("looking up {} in {}", key, path.display()))?;
    info!(
        "Crop {}: Tbase {}, Tmax {}, {} stages",
        key,
        profile.tbase,
        profile.tmax,
        profile.stages.len()
    );
    Ok(profile)
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    id: String,
    date: String,
    value: Option<f64>,
}

fn read_series(path: &Path) -> Result<BTreeMap<String, TimeSeries>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_series(file).with_context(|| format!("failed to parse {}", path.display()))
}

/// Group `id;date;value` rows by id. An empty value still claims its date,
/// so a later row for the same date cannot fill the gap.
fn parse_series<R: Read>(reader: R) -> Result<BTreeMap<String, TimeSeries>> {
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut grouped: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for row in csv.deserialize() {
        let row: SeriesRow = row?;
        let date = parse_date(&row.date)?;
        grouped
            .entry(row.id)
            .or_default()
            .push(Sample::new(date, row.value.unwrap_or(f64::NAN)));
    }
    Ok(grouped
        .into_iter()
        .map(|(id, samples)| (id, TimeSeries::new(samples)))
        .collect())
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y%m%d"))
        .with_context(|| format!("invalid date '{}': expected YYYY-MM-DD or YYYYMMDD", text))
}

fn write_features<W: Write>(reports: &[ParcelReport], params: &Params, sink: W) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(sink);

    let mut header: Vec<String> = [
        "id",
        "sos_date",
        "sos_value",
        "pos_date",
        "pos_value",
        "eos_date",
        "eos_value",
        "vos_date",
        "vos_value",
        "marker_fallback",
        "peaks",
        "growth_rate",
        "growth_rate_per_day",
        "plateaus",
        "first_inflection_date",
        "first_inflection_value",
        "last_inflection_date",
        "last_inflection_value",
        "first_acceleration_date",
        "first_acceleration_value",
        "last_acceleration_date",
        "last_acceleration_value",
        "gdd_total",
        "gdd_stage_at_eos",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for window in &params.stage_windows {
        header.push(format!("gdd_{}", window.name));
    }
    for window in &params.stage_windows {
        for stat in ["sum", "std", "mean", "max", "min"] {
            header.push(format!("vi_{}_{}", window.name, stat));
        }
    }
    for prefix in ["vi_season", "lst_season"] {
        for stat in ["sum", "std", "mean", "max", "min", "skew", "kurtosis"] {
            header.push(format!("{}_{}", prefix, stat));
        }
    }
    header.push("params_hash".into());
    writer.write_record(&header)?;

    for report in reports {
        let m = &report.markers;
        let mut row = vec![report.id.clone()];
        push_marker(&mut row, Some(&m.sos));
        push_marker(&mut row, Some(&m.pos));
        push_marker(&mut row, Some(&m.eos));
        push_marker(&mut row, m.vos.as_ref());
        row.push(m.fallback.to_string());
        row.push(report.peaks.peaks.len().to_string());
        row.push(format!("{:.6}", report.growth_rate));
        row.push(format!("{:.6}", report.growth_rate_per_day));
        row.push(report.plateaus.len().to_string());
        push_point(&mut row, report.first_inflection());
        push_point(&mut row, report.last_inflection());
        push_point(&mut row, report.first_acceleration());
        push_point(&mut row, report.last_acceleration());

        let gdd = report.gdd.as_ref();
        row.push(fmt_opt(gdd.map(|g| g.total())));
        row.push(
            gdd.and_then(|g| g.days.last())
                .and_then(|d| d.stage.clone())
                .unwrap_or_default(),
        );
        // Stage sums are only computed alongside the corridor.
        for (i, _) in params.stage_windows.iter().enumerate() {
            row.push(fmt_opt(report.stage_gdd.get(i).and_then(|s| s.value)));
        }
        for stage in &report.vegetation_stages {
            let stats = stage.value.as_ref();
            row.push(fmt_opt(stats.map(|s| s.sum)));
            row.push(fmt_opt(stats.and_then(|s| s.std)));
            row.push(fmt_opt(stats.map(|s| s.mean)));
            row.push(fmt_opt(stats.map(|s| s.max)));
            row.push(fmt_opt(stats.map(|s| s.min)));
        }
        for summary in [report.summary.vegetation, report.summary.temperature] {
            let summary = summary.as_ref();
            row.push(fmt_opt(summary.map(|s| s.stats.sum)));
            row.push(fmt_opt(summary.and_then(|s| s.stats.std)));
            row.push(fmt_opt(summary.map(|s| s.stats.mean)));
            row.push(fmt_opt(summary.map(|s| s.stats.max)));
            row.push(fmt_opt(summary.map(|s| s.stats.min)));
            row.push(fmt_opt(summary.and_then(|s| s.skewness)));
            row.push(fmt_opt(summary.and_then(|s| s.kurtosis)));
        }
        row.push(report.params_hash.clone());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn write_timeseries<W: Write>(reports: &[ParcelReport], sink: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(sink);
    writer.write_record([
        "id",
        "date",
        "vi_raw",
        "vi_interpolated",
        "vi_filtered",
        "lst_raw",
        "lst_interpolated",
        "lst_filtered",
        "heat_unit",
        "cumulative_gdd",
        "stage",
    ])?;

    let mut rows = 0;
    for report in reports {
        let veg = &report.vegetation;
        let interpolated = veg.interpolated();
        let filtered = veg.filtered();
        for (i, date) in veg.dates().enumerate() {
            let temps = report
                .temperature
                .as_ref()
                .and_then(|t| t.index_of(date).map(|j| (t, j)));
            let gdd_day = report.gdd.as_ref().and_then(|g| g.get(date));
            writer.write_record([
                report.id.clone(),
                date.to_string(),
                fmt_opt(veg.raw()[i]),
                format!("{:.6}", interpolated[i]),
                format!("{:.6}", filtered[i]),
                fmt_opt(temps.and_then(|(t, j)| t.raw()[j])),
                fmt_opt(temps.map(|(t, j)| t.interpolated()[j])),
                fmt_opt(temps.map(|(t, j)| t.filtered()[j])),
                fmt_opt(gdd_day.map(|d| d.heat_unit)),
                fmt_opt(gdd_day.map(|d| d.cumulative)),
                gdd_day.and_then(|d| d.stage.clone()).unwrap_or_default(),
            ])?;
            rows += 1;
        }
    }

    writer.flush()?;
    Ok(rows)
}

fn push_marker(row: &mut Vec<String>, marker: Option<&MarkerPoint>) {
    row.push(marker.map(|m| m.date.to_string()).unwrap_or_default());
    row.push(fmt_opt(marker.map(|m| m.value)));
}

fn push_point(row: &mut Vec<String>, point: Option<&DerivativePoint>) {
    row.push(point.map(|p| p.date.to_string()).unwrap_or_default());
    row.push(fmt_opt(point.map(|p| p.value)));
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.6}", v)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_series_groups_rows_by_id() {
        let text = "\
id;date;value
b;2023-05-03;0.4
a;20230501;0.2
a;2023-05-09;
a;2023-05-11;0.6
";
        let grouped = parse_series(text.as_bytes()).unwrap();
        let ids: Vec<_> = grouped.keys().map(String::as_str).collect();
        assert_eq!(ids, ["a", "b"]);
        let a = &grouped["a"];
        assert_eq!(a.len(), 2);
        assert_eq!(a.first().unwrap().date, NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
        assert_eq!(a.last().unwrap().value, 0.6);
    }

    #[test]
    fn empty_first_duplicate_keeps_its_gap() {
        let text = "\
id;date;value
a;2023-05-01;0.2
a;2023-05-05;
a;2023-05-05;0.9
a;2023-05-09;0.6
";
        let grouped = parse_series(text.as_bytes()).unwrap();
        let dates: Vec<_> = grouped["a"].samples().iter().map(|s| s.date).collect();
        assert_eq!(
            dates,
            [
                NaiveDate::from_ymd_opt(2023, 5, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 5, 9).unwrap(),
            ]
        );
    }

    #[test]
    fn invalid_dates_are_rejected() {
        assert!(parse_date("2023/05/01").is_err());
        assert_eq!(
            parse_date("20240229").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
    }
}
