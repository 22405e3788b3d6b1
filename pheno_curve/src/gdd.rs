//! Growing degree days: crop reference table, daily heat units, cumulative
//! corridor with stage labels and fixed-window stage sums.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::ops::Bound;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::derivatives::DerivativeSet;
use crate::markers::SeasonMarkers;
use crate::series::{smooth, DenseSeries, TimeSeries};
use crate::windows::{over_stage_windows, StageValue};
use crate::{HeatSignal, Params, PhenoError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CropKey {
    pub country: String,
    pub crop: String,
    pub variety: String,
}

impl CropKey {
    pub fn new(
        country: impl Into<String>,
        crop: impl Into<String>,
        variety: impl Into<String>,
    ) -> Self {
        Self {
            country: country.into(),
            crop: crop.into(),
            variety: variety.into(),
        }
    }
}

impl fmt::Display for CropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.country, self.crop, self.variety)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct ReferenceRow {
    country: String,
    crop: String,
    variety: String,
    stage: String,
    #[serde(rename = "Tbase")]
    tbase: f64,
    #[serde(rename = "Tmax")]
    tmax: f64,
    #[serde(rename = "GDD")]
    gdd: String,
}

impl ReferenceRow {
    fn matches(&self, key: &CropKey) -> bool {
        self.country == key.country && self.crop == key.crop && self.variety == key.variety
    }

    fn key(&self) -> CropKey {
        CropKey::new(&self.country, &self.crop, &self.variety)
    }
}

/// Crop stage reference table, one row per (country, crop, variety, stage).
#[derive(Clone, Debug, Default)]
pub struct GddTable {
    rows: Vec<ReferenceRow>,
}

impl GddTable {
    /// Parse `;`-delimited text with header
    /// `country;crop;variety;stage;Tbase;Tmax;GDD`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, PhenoError> {
        let mut csv = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let rows = csv
            .deserialize()
            .collect::<Result<Vec<ReferenceRow>, _>>()
            .map_err(|e| PhenoError::ReferenceTable(e.to_string()))?;
        Ok(Self { rows })
    }

    pub fn from_path(path: &Path) -> Result<Self, PhenoError> {
        let file = File::open(path)
            .map_err(|e| PhenoError::ReferenceTable(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct keys in first-seen order.
    pub fn crops(&self) -> Vec<CropKey> {
        let mut keys: Vec<CropKey> = Vec::new();
        for row in &self.rows {
            if !keys.iter().any(|k| row.matches(k)) {
                keys.push(row.key());
            }
        }
        keys
    }

    /// Temperature limits and ordered stage bands for `key`. `Tbase`/`Tmax`
    /// come from the first matching row.
    pub fn lookup(&self, key: &CropKey) -> Result<CropProfile, PhenoError> {
        let rows: Vec<&ReferenceRow> = self.rows.iter().filter(|r| r.matches(key)).collect();
        let first = rows.first().ok_or_else(|| PhenoError::UnknownCrop {
            country: key.country.clone(),
            crop: key.crop.clone(),
            variety: key.variety.clone(),
        })?;
        if !(first.tbase <= first.tmax) {
            return Err(PhenoError::ReferenceTable(format!(
                "Tbase {} exceeds Tmax {} for {}",
                first.tbase, first.tmax, key
            )));
        }
        let stages = rows
            .iter()
            .map(|r| StageBand::parse(&r.stage, &r.gdd))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CropProfile {
            key: key.clone(),
            tbase: first.tbase,
            tmax: first.tmax,
            stages,
        })
    }
}

/// Named stage with an inclusive cumulative-GDD band.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageBand {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl StageBand {
    /// Parse a `min-max` band such as `"400-1200"`.
    pub fn parse(stage: &str, band: &str) -> Result<Self, PhenoError> {
        let malformed = || PhenoError::MalformedBand {
            stage: stage.to_string(),
            band: band.to_string(),
        };
        let (lo, hi) = band.split_once('-').ok_or_else(malformed)?;
        let min: f64 = lo.trim().parse().map_err(|_| malformed())?;
        let max: f64 = hi.trim().parse().map_err(|_| malformed())?;
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(malformed());
        }
        Ok(Self {
            name: stage.to_string(),
            min,
            max,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CropProfile {
    pub key: CropKey,
    pub tbase: f64,
    pub tmax: f64,
    pub stages: Vec<StageBand>,
}

impl CropProfile {
    /// Heat unit of one day: shift by `offset`, clip to `[tbase, tmax]`,
    /// subtract `tbase`. Never negative.
    pub fn heat_unit(&self, temperature: f64, offset: f64) -> f64 {
        let clipped = (temperature - offset).min(self.tmax).max(self.tbase);
        (clipped - self.tbase).max(0.0)
    }

    /// First band containing `cumulative`. The first band is closed on both
    /// sides, later bands are open at their minimum so a shared boundary
    /// belongs to the earlier stage.
    pub fn classify(&self, cumulative: f64) -> Option<&StageBand> {
        self.stages.iter().enumerate().find_map(|(i, band)| {
            let above = if i == 0 {
                cumulative >= band.min
            } else {
                cumulative > band.min
            };
            (above && cumulative <= band.max).then_some(band)
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GddDay {
    pub date: NaiveDate,
    pub raw: Option<f64>,
    pub interpolated: f64,
    pub filtered: f64,
    pub heat_unit: f64,
    pub cumulative: f64,
    pub stage: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct GddSeries {
    pub days: Vec<GddDay>,
}

impl GddSeries {
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.days.last().map(|d| d.cumulative).unwrap_or(0.0)
    }

    pub fn get(&self, date: NaiveDate) -> Option<&GddDay> {
        self.days
            .binary_search_by_key(&date, |d| d.date)
            .ok()
            .map(|i| &self.days[i])
    }
}

/// Daily heat units, running GDD total and stage label over `[sos, eos]`.
pub fn gdd_corridor(
    temperature: &TimeSeries,
    sos: NaiveDate,
    eos: NaiveDate,
    profile: &CropProfile,
    params: &Params,
) -> Result<GddSeries, PhenoError> {
    let dense = smooth(temperature, params)?;
    Ok(corridor_from_dense(&dense, sos, eos, profile, params))
}

/// [`gdd_corridor`] for a temperature series that is already daily.
pub fn corridor_from_dense(
    temperature: &DenseSeries,
    sos: NaiveDate,
    eos: NaiveDate,
    profile: &CropProfile,
    params: &Params,
) -> GddSeries {
    let range = temperature.window(Bound::Included(sos), Bound::Included(eos));
    let heat = heat_units(temperature, profile, params);
    let interpolated = temperature.interpolated();
    let filtered = temperature.filtered();

    let mut cumulative = 0.0;
    let days = range
        .map(|i| {
            cumulative += heat[i];
            GddDay {
                date: temperature.date(i),
                raw: temperature.raw()[i],
                interpolated: interpolated[i],
                filtered: filtered[i],
                heat_unit: heat[i],
                cumulative,
                stage: profile.classify(cumulative).map(|b| b.name.clone()),
            }
        })
        .collect();
    GddSeries { days }
}

/// Heat-unit sums over each configured stage window `[sos, end]`.
pub fn staged_gdd(
    temperature: &DenseSeries,
    markers: &SeasonMarkers,
    points: &DerivativeSet,
    profile: &CropProfile,
    params: &Params,
) -> Vec<StageValue<f64>> {
    let heat = heat_units(temperature, profile, params);
    over_stage_windows(&params.stage_windows, markers, points, |from, to| {
        let range = temperature.window(Bound::Included(from), Bound::Included(to));
        Some(heat[range].iter().sum())
    })
}

fn heat_units(temperature: &DenseSeries, profile: &CropProfile, params: &Params) -> Vec<f64> {
    let signal = match params.heat_signal {
        HeatSignal::Interpolated => temperature.interpolated(),
        HeatSignal::Filtered => temperature.filtered(),
    };
    signal
        .iter()
        .map(|t| profile.heat_unit(*t, params.temperature_offset))
        .collect()
}
