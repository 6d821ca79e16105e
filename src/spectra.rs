use anyhow::{Context, Result};
use nalgebra::{DMatrix, DVector};
use std::path::Path;

use crate::curve_fit::{Gaussian1D, LevenbergMarquardt};
use crate::fits::{read_bintable, read_image_data, scan_hdus, HduKind};
use crate::image_analysis::median_in_place;

/// Savitzky-Golay window used for the continuum
pub const SMOOTH_WINDOW: usize = 5;
pub const SMOOTH_ORDER: usize = 3;
/// Minimum residual SNR (and prominence) for a line
pub const LINE_SNR_THRESHOLD: f64 = 3.0;
/// Minimum separation between lines, in samples
pub const LINE_MIN_DISTANCE: usize = 5;
/// Samples either side of a peak used for the Gaussian fit
const FIT_HALF_WINDOW: usize = 20;
const FIT_MAX_EVALUATIONS: usize = 1000;
const INITIAL_LINE_SIGMA: f64 = 0.01;

/// A 1-D spectrum with only finite samples
#[derive(Debug, Clone)]
pub struct Spectrum {
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
    pub error: Vec<f64>,
}

impl Spectrum {
    /// Build from raw arrays, synthesising an error of 0.1 x std(flux) when
    /// none is given and dropping samples where any array is non-finite
    pub fn new(wavelength: Vec<f64>, flux: Vec<f64>, error: Option<Vec<f64>>) -> Result<Self> {
        if wavelength.len() != flux.len() {
            anyhow::bail!(
                "wavelength ({}) and flux ({}) lengths differ",
                wavelength.len(),
                flux.len()
            );
        }
        let error = match error {
            Some(e) if e.len() == flux.len() => e,
            Some(e) => anyhow::bail!(
                "error ({}) and flux ({}) lengths differ",
                e.len(),
                flux.len()
            ),
            None => vec![0.1 * nanstd(&flux); flux.len()],
        };

        let mut spectrum = Spectrum {
            wavelength: Vec::with_capacity(flux.len()),
            flux: Vec::with_capacity(flux.len()),
            error: Vec::with_capacity(flux.len()),
        };
        for ((w, f), e) in wavelength.into_iter().zip(flux).zip(error) {
            if w.is_finite() && f.is_finite() && e.is_finite() {
                spectrum.wavelength.push(w);
                spectrum.flux.push(f);
                spectrum.error.push(e);
            }
        }
        Ok(spectrum)
    }

    /// Extract wavelength, flux and error from a FITS product.
    ///
    /// 1-D image HDUs supply the arrays in order. When that does not give
    /// both wavelength and flux, binary-table columns are used instead: a
    /// table must have columns named WAVELENGTH, FLUX or ERROR for that
    /// array to be taken from it (see `BinTable::find_column`).
    pub fn from_file(path: &Path) -> Result<Self> {
        let hdus = scan_hdus(path)?;

        let mut arrays: Vec<Vec<f64>> = Vec::new();
        for hdu in hdus.iter().filter(|h| h.image_1d_len().is_some()) {
            if arrays.len() == 3 {
                break;
            }
            arrays.push(read_image_data(path, hdu)?);
        }
        let mut arrays = arrays.into_iter();
        let mut wavelength = arrays.next();
        let mut flux = arrays.next();
        let mut error = arrays.next();

        if wavelength.is_none() || flux.is_none() {
            for hdu in hdus.iter().filter(|h| h.kind == HduKind::BinTable) {
                let table = read_bintable(path, hdu)
                    .with_context(|| format!("Failed to read table HDU {}", hdu.index))?;
                if let Some(col) = table.find_column("WAVELENGTH") {
                    wavelength = Some(col.values.clone());
                }
                if let Some(col) = table.find_column("FLUX") {
                    flux = Some(col.values.clone());
                }
                if let Some(col) = table.find_column("ERROR") {
                    error = Some(col.values.clone());
                }
            }
        }

        match (wavelength, flux) {
            (Some(w), Some(f)) => Spectrum::new(w, f, error),
            _ => anyhow::bail!(
                "Could not extract wavelength/flux from {}",
                path.display()
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    pub fn wavelength_bounds(&self) -> (f64, f64) {
        self.wavelength
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &w| {
                (lo.min(w), hi.max(w))
            })
    }

    /// Continuum estimate: the Savitzky-Golay smoothed flux
    pub fn continuum(&self) -> Result<Vec<f64>> {
        savgol_smooth(&self.flux, SMOOTH_WINDOW, SMOOTH_ORDER)
    }

    /// Continuum-subtracted flux divided by the error
    pub fn snr_spectrum(&self, continuum: &[f64]) -> Vec<f64> {
        self.flux
            .iter()
            .zip(continuum)
            .zip(&self.error)
            .map(|((f, c), e)| (f - c) / (e + 1e-10))
            .collect()
    }
}

fn nanstd(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / finite.len() as f64).sqrt()
}

/// Least-squares polynomial coefficients (lowest order first)
fn polyfit(x: &[f64], y: &[f64], order: usize) -> Option<Vec<f64>> {
    let n = x.len();
    let a = DMatrix::from_fn(n, order + 1, |i, j| x[i].powi(j as i32));
    let b = DVector::from_column_slice(y);
    let solution = a.svd(true, true).solve(&b, 1e-14).ok()?;
    Some(solution.iter().copied().collect())
}

fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Savitzky-Golay smoothing. The window is forced odd; the first and last
/// half-windows are evaluated from a polynomial fitted to the edge window.
pub fn savgol_smooth(y: &[f64], window: usize, order: usize) -> Result<Vec<f64>> {
    let window = if window % 2 == 0 { window + 1 } else { window };
    if order >= window {
        anyhow::bail!("polynomial order {} must be less than window {}", order, window);
    }
    let n = y.len();
    if n < window {
        anyhow::bail!("spectrum has {} samples, need at least {}", n, window);
    }
    let half = window / 2;

    // Convolution weights: the row of the pseudo-inverse that evaluates the
    // fitted polynomial at the window centre
    let offsets: Vec<f64> = (0..window).map(|k| k as f64 - half as f64).collect();
    let vander = DMatrix::from_fn(window, order + 1, |i, j| offsets[i].powi(j as i32));
    let normal = (vander.transpose() * &vander)
        .try_inverse()
        .context("singular Savitzky-Golay system")?;
    let pinv = normal * vander.transpose();
    let weights: Vec<f64> = pinv.row(0).iter().copied().collect();

    let mut out = vec![0.0; n];
    for i in half..n - half {
        out[i] = weights
            .iter()
            .enumerate()
            .map(|(k, w)| w * y[i + k - half])
            .sum();
    }

    let positions: Vec<f64> = (0..window).map(|k| k as f64).collect();
    let head = polyfit(&positions, &y[..window], order).context("edge fit failed")?;
    for (i, v) in out.iter_mut().enumerate().take(half) {
        *v = polyval(&head, i as f64);
    }
    let tail = polyfit(&positions, &y[n - window..], order).context("edge fit failed")?;
    for i in n - half..n {
        out[i] = polyval(&tail, (i + window - n) as f64);
    }

    Ok(out)
}

/// Local maxima with plateau handling, then height, distance and
/// prominence selection
pub fn find_peaks(x: &[f64], height: f64, distance: usize, prominence: f64) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    let mut i = 1;
    while n >= 3 && i < n - 1 {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < n - 1 && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                // Middle of a flat top
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }

    peaks.retain(|&p| x[p] >= height);

    if distance > 1 && peaks.len() > 1 {
        let mut keep = vec![true; peaks.len()];
        let mut by_height: Vec<usize> = (0..peaks.len()).collect();
        by_height.sort_by(|&a, &b| x[peaks[a]].total_cmp(&x[peaks[b]]));
        for &idx in by_height.iter().rev() {
            if !keep[idx] {
                continue;
            }
            let mut j = idx;
            while j > 0 && peaks[idx] - peaks[j - 1] < distance {
                keep[j - 1] = false;
                j -= 1;
            }
            let mut j = idx + 1;
            while j < peaks.len() && peaks[j] - peaks[idx] < distance {
                keep[j] = false;
                j += 1;
            }
        }
        peaks = peaks
            .into_iter()
            .zip(keep)
            .filter_map(|(p, k)| k.then_some(p))
            .collect();
    }

    peaks.retain(|&p| peak_prominence(x, p) >= prominence);
    peaks
}

/// Height of a peak above the higher of its two surrounding minima
pub fn peak_prominence(x: &[f64], peak: usize) -> f64 {
    let value = x[peak];

    let mut left_min = value;
    for i in (0..peak).rev() {
        if x[i] > value {
            break;
        }
        left_min = left_min.min(x[i]);
    }
    let mut right_min = value;
    for &v in &x[peak + 1..] {
        if v > value {
            break;
        }
        right_min = right_min.min(v);
    }

    value - left_min.max(right_min)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectralLine {
    pub wavelength: f64,
    pub amplitude: f64,
    pub width: f64,
    pub snr: f64,
    pub equivalent_width: f64,
    pub peak_index: usize,
}

fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| (xw[1] - xw[0]) * (yw[0] + yw[1]) / 2.0)
        .sum()
}

/// Find emission lines in the continuum-subtracted SNR spectrum and fit
/// each with a Gaussian
pub fn detect_lines(spectrum: &Spectrum) -> Result<Vec<SpectralLine>> {
    let continuum = spectrum.continuum()?;
    let residual: Vec<f64> = spectrum
        .flux
        .iter()
        .zip(&continuum)
        .map(|(f, c)| f - c)
        .collect();
    let snr = spectrum.snr_spectrum(&continuum);
    let peaks = find_peaks(&snr, LINE_SNR_THRESHOLD, LINE_MIN_DISTANCE, LINE_SNR_THRESHOLD);

    let fitter = LevenbergMarquardt::with_max_evaluations(FIT_MAX_EVALUATIONS);
    let wavelength = &spectrum.wavelength;
    let mut lines = Vec::with_capacity(peaks.len());

    for peak in peaks {
        let start = peak.saturating_sub(FIT_HALF_WINDOW);
        let end = (peak + FIT_HALF_WINDOW).min(wavelength.len());
        let wl_fit = &wavelength[start..end];
        let flux_fit = &residual[start..end];
        if wl_fit.len() < 5 {
            continue;
        }

        let initial = [residual[peak], wavelength[peak], INITIAL_LINE_SIGMA];
        match fitter.fit(&Gaussian1D, wl_fit, flux_fit, &initial) {
            Ok(fit) => {
                let line_flux = trapezoid(wl_fit, flux_fit);
                let mut window_continuum = continuum[start..end].to_vec();
                let continuum_level = median_in_place(&mut window_continuum);
                let equivalent_width = if continuum_level > 0.0 {
                    line_flux / continuum_level
                } else {
                    0.0
                };
                lines.push(SpectralLine {
                    wavelength: fit.params[1],
                    amplitude: fit.params[0],
                    width: fit.params[2].abs(),
                    snr: snr[peak],
                    equivalent_width,
                    peak_index: peak,
                });
            }
            Err(e) => {
                tracing::debug!("Line fit at index {} failed: {}", peak, e);
                lines.push(SpectralLine {
                    wavelength: wavelength[peak],
                    amplitude: residual[peak],
                    width: INITIAL_LINE_SIGMA,
                    snr: snr[peak],
                    equivalent_width: 0.0,
                    peak_index: peak,
                });
            }
        }
    }

    Ok(lines)
}

/// Spectrum-level summary used for outlier scoring
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFeatures {
    pub continuum_slope: f64,
    pub mean_flux: f64,
    pub flux_variance: f64,
    pub n_lines: usize,
    pub mean_line_snr: f64,
    pub max_line_snr: f64,
    pub total_line_flux: f64,
    pub wavelength_range: f64,
}

pub fn compute_features(spectrum: &Spectrum, lines: &[SpectralLine]) -> SpectrumFeatures {
    let continuum_slope = if spectrum.len() > 10 {
        polyfit(&spectrum.wavelength, &spectrum.flux, 1)
            .map(|c| c[1])
            .unwrap_or(0.0)
    } else {
        0.0
    };

    let n = spectrum.len().max(1) as f64;
    let mean_flux = spectrum.flux.iter().sum::<f64>() / n;
    let flux_variance = spectrum
        .flux
        .iter()
        .map(|f| (f - mean_flux).powi(2))
        .sum::<f64>()
        / n;

    let (mean_line_snr, max_line_snr, total_line_flux) = if lines.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            lines.iter().map(|l| l.snr).sum::<f64>() / lines.len() as f64,
            lines.iter().map(|l| l.snr).fold(f64::NEG_INFINITY, f64::max),
            lines.iter().map(|l| l.amplitude).sum(),
        )
    };

    let (lo, hi) = spectrum.wavelength_bounds();
    SpectrumFeatures {
        continuum_slope,
        mean_flux,
        flux_variance,
        n_lines: lines.len(),
        mean_line_snr,
        max_line_snr,
        total_line_flux,
        wavelength_range: hi - lo,
    }
}
