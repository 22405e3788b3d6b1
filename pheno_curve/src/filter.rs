//! Noise-reduction filters applied to the gap-filled daily signal.

use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::PhenoError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmoothingFilter {
    /// Gaussian kernel of standard deviation `sigma` days, truncated at
    /// `truncate` standard deviations. Edges are mirrored.
    Gaussian { sigma: f64, truncate: f64 },
    /// Least-squares polynomial of degree `order` over an odd `window`.
    SavitzkyGolay { window: usize, order: usize },
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        SmoothingFilter::Gaussian {
            sigma: 15.0,
            truncate: 4.0,
        }
    }
}

impl SmoothingFilter {
    pub fn id(&self) -> &'static str {
        match self {
            SmoothingFilter::Gaussian { .. } => "gaussian",
            SmoothingFilter::SavitzkyGolay { .. } => "savitzky_golay",
        }
    }

    pub fn validate(&self) -> Result<(), PhenoError> {
        match *self {
            SmoothingFilter::Gaussian { sigma, truncate } => {
                if !(sigma.is_finite() && sigma > 0.0) {
                    return Err(PhenoError::InvalidParameter(format!(
                        "gaussian sigma must be positive, got {}",
                        sigma
                    )));
                }
                if !(truncate.is_finite() && truncate > 0.0) {
                    return Err(PhenoError::InvalidParameter(format!(
                        "gaussian truncate must be positive, got {}",
                        truncate
                    )));
                }
            }
            SmoothingFilter::SavitzkyGolay { window, order } => {
                if window % 2 == 0 {
                    return Err(PhenoError::InvalidParameter(format!(
                        "savitzky-golay window must be odd, got {}",
                        window
                    )));
                }
                if order >= window {
                    return Err(PhenoError::InvalidParameter(format!(
                        "savitzky-golay order {} must be less than window {}",
                        order, window
                    )));
                }
            }
        }
        Ok(())
    }

    /// Smooth `data`. Only a Savitzky-Golay fit that cannot be solved fails.
    pub fn apply(&self, data: &[f64]) -> Result<Array1<f64>, PhenoError> {
        match *self {
            SmoothingFilter::Gaussian { sigma, truncate } => {
                Ok(gaussian_smooth(data, sigma, truncate))
            }
            SmoothingFilter::SavitzkyGolay { window, order } => savgol_smooth(data, window, order),
        }
    }
}

/// Normalized Gaussian weights for offsets `-r..=r`, `r = round(truncate * sigma)`.
pub fn gaussian_kernel(sigma: f64, truncate: f64) -> Vec<f64> {
    let radius = (truncate * sigma + 0.5) as isize;
    let denom = sigma * sigma;
    let mut weights: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (x * x) as f64 / denom).exp())
        .collect();
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    weights
}

fn gaussian_smooth(data: &[f64], sigma: f64, truncate: f64) -> Array1<f64> {
    let n = data.len();
    if n == 0 {
        return Array1::zeros(0);
    }
    let weights = gaussian_kernel(sigma, truncate);
    let radius = (weights.len() / 2) as isize;
    let mut out = Vec::with_capacity(n);
    for i in 0..n as isize {
        let mut acc = 0.0;
        for (k, w) in weights.iter().enumerate() {
            acc += w * data[reflect_index(i + k as isize - radius, n)];
        }
        out.push(acc);
    }
    Array1::from_vec(out)
}

/// Half-sample symmetric reflection (`d c b a | a b c d | d c b a`),
/// repeated for offsets further out than the series length.
fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = i.rem_euclid(period) as usize;
    if m < n {
        m
    } else {
        2 * n - 1 - m
    }
}

fn savgol_smooth(data: &[f64], window: usize, order: usize) -> Result<Array1<f64>, PhenoError> {
    let n = data.len();
    if n == 0 {
        return Ok(Array1::zeros(0));
    }
    if n < window {
        let positions: Vec<f64> = (0..n).map(|i| i as f64).collect();
        return polyfit_eval(data, order.min(n - 1), &positions).map(Array1::from_vec);
    }

    let half = window / 2;
    let coeffs = savgol_coefficients(window, order)?;
    let mut out = data.to_vec();
    for i in half..n - half {
        out[i] = coeffs
            .iter()
            .zip(&data[i - half..=i + half])
            .map(|(c, v)| c * v)
            .sum();
    }

    // Edges: evaluate the polynomial fitted to the first/last full window.
    let head: Vec<f64> = (0..half).map(|i| i as f64).collect();
    out[..half].copy_from_slice(&polyfit_eval(&data[..window], order, &head)?);
    let tail: Vec<f64> = (window - half..window).map(|i| i as f64).collect();
    out[n - half..].copy_from_slice(&polyfit_eval(&data[n - window..], order, &tail)?);
    Ok(Array1::from_vec(out))
}

/// Convolution weights that evaluate the local least-squares polynomial at
/// the window center: row 0 of the pseudo-inverse of the window's
/// Vandermonde matrix.
fn savgol_coefficients(window: usize, order: usize) -> Result<Vec<f64>, PhenoError> {
    let basis = PolyBasis::new(window);
    let pinv = pseudo_inverse(basis.vandermonde(order))?;
    Ok(pinv.row(0).iter().copied().collect())
}

/// Fit a degree-`order` polynomial to `ys` sampled at `0..len` and evaluate
/// it at `at`.
fn polyfit_eval(ys: &[f64], order: usize, at: &[f64]) -> Result<Vec<f64>, PhenoError> {
    let basis = PolyBasis::new(ys.len());
    let coeffs = pseudo_inverse(basis.vandermonde(order))? * DVector::from_column_slice(ys);
    Ok(at.iter().map(|&t| basis.eval(coeffs.as_slice(), t)).collect())
}

/// Sample positions `0..len` mapped onto `[-1, 1]` for conditioning.
struct PolyBasis {
    len: usize,
    center: f64,
    scale: f64,
}

impl PolyBasis {
    fn new(len: usize) -> Self {
        let center = (len as f64 - 1.0) / 2.0;
        Self {
            len,
            center,
            scale: center.max(1.0),
        }
    }

    fn x(&self, t: f64) -> f64 {
        (t - self.center) / self.scale
    }

    fn vandermonde(&self, order: usize) -> DMatrix<f64> {
        DMatrix::from_fn(self.len, order + 1, |r, c| self.x(r as f64).powi(c as i32))
    }

    fn eval(&self, coeffs: &[f64], t: f64) -> f64 {
        let x = self.x(t);
        coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

const RANK_EPS: f64 = 1e-10;

/// Least-squares pseudo-inverse; fails when the design matrix does not have
/// full column rank.
fn pseudo_inverse(design: DMatrix<f64>) -> Result<DMatrix<f64>, PhenoError> {
    let (rows, cols) = design.shape();
    let svd = design.svd(true, true);
    if svd.rank(RANK_EPS) < cols {
        return Err(PhenoError::InvalidParameter(format!(
            "polynomial of degree {} cannot be fitted to {} samples",
            cols - 1,
            rows
        )));
    }
    svd.pseudo_inverse(RANK_EPS)
        .map_err(|e| PhenoError::InvalidParameter(e.to_string()))
}
