use anyhow::{Context, Result};
use bumpalo::Bump;
use fitrs::{Fits, FitsData};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::path::Path;

use crate::config::AnalysisConfig;
use crate::fits::{scan_hdus, HduInfo};
use crate::wcs::Wcs;

/// Images larger than this are background-estimated from a random sample
const BACKGROUND_SAMPLE_THRESHOLD: usize = 10_000_000;
const BACKGROUND_SAMPLE_SIZE: usize = 1_000_000;
/// MAD to Gaussian sigma
const MAD_TO_SIGMA: f64 = 1.4826;

/// The 2-D science array of an image product, in `f64` with scaling applied
#[derive(Debug, Clone)]
pub struct ScienceImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
    pub wcs: Option<Wcs>,
    /// HDU the array was read from
    pub hdu_index: usize,
}

impl ScienceImage {
    /// Load the largest 2-D image HDU of a FITS file
    pub fn from_file(path: &Path) -> Result<Self> {
        let hdus = scan_hdus(path)?;
        let science = select_science_hdu(&hdus)
            .with_context(|| format!("No 2-D image data in {}", path.display()))?;
        let axes = science.axes();
        let (width, height) = (axes[0], axes[1]);

        let fits = Fits::open(path)
            .with_context(|| format!("Failed to open FITS file: {}", path.display()))?;
        let hdu = fits
            .get(science.index)
            .ok_or_else(|| anyhow::anyhow!("HDU {} not readable", science.index))?;

        let bscale = header_f64(&hdu, "BSCALE").unwrap_or(1.0);
        let bzero = header_f64(&hdu, "BZERO").unwrap_or(0.0);
        let scale = |raw: f64| raw * bscale + bzero;

        let data: Vec<f64> = match hdu.read_data() {
            FitsData::Characters(_) => {
                anyhow::bail!("HDU {} contains character data", science.index);
            }
            FitsData::IntegersI32(array) => array
                .data
                .iter()
                .map(|v| match v {
                    Some(raw) => scale(*raw as f64),
                    None => f64::NAN,
                })
                .collect(),
            FitsData::IntegersU32(array) => array
                .data
                .iter()
                .map(|v| match v {
                    Some(raw) => scale(*raw as f64),
                    None => f64::NAN,
                })
                .collect(),
            FitsData::FloatingPoint32(array) => {
                array.data.iter().map(|v| scale(*v as f64)).collect()
            }
            FitsData::FloatingPoint64(array) => array.data.iter().map(|v| scale(*v)).collect(),
        };

        if data.len() != width * height {
            anyhow::bail!(
                "Data size mismatch: expected {} pixels, got {}",
                width * height,
                data.len()
            );
        }

        Ok(Self {
            width,
            height,
            data,
            wcs: Wcs::from_header(&science.header),
            hdu_index: science.index,
        })
    }

    #[cfg(test)]
    pub(crate) fn from_data(width: usize, height: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), width * height, "image data size mismatch");
        Self {
            width,
            height,
            data,
            wcs: None,
            hdu_index: 0,
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.data[y * self.width + x]
    }

    /// Pixels of the half-open window [x0, x1) × [y0, y1), clipped to the image
    pub fn window(&self, x0: i64, x1: i64, y0: i64, y1: i64) -> Window {
        let clip = |v: i64, max: usize| v.clamp(0, max as i64) as usize;
        Window {
            x0: clip(x0, self.width),
            x1: clip(x1, self.width),
            y0: clip(y0, self.height),
            y1: clip(y1, self.height),
        }
    }

    /// Window of `half` pixels either side of the rounded position
    pub fn window_around(&self, x: f64, y: f64, half: usize) -> Window {
        let xi = x.round_ties_even() as i64;
        let yi = y.round_ties_even() as i64;
        let half = half as i64;
        self.window(xi - half, xi + half, yi - half, yi + half)
    }

    /// Copy out a window as a row-major array
    pub fn extract(&self, window: &Window) -> Vec<f64> {
        let mut out = Vec::with_capacity(window.width() * window.height());
        for y in window.y0..window.y1 {
            let row = y * self.width;
            out.extend_from_slice(&self.data[row + window.x0..row + window.x1]);
        }
        out
    }

    /// Median of the finite pixels, NaN when there are none
    pub fn median(&self) -> f64 {
        let arena = Bump::new();
        let mut finite = bumpalo::vec![in &arena];
        finite.extend(self.data.iter().copied().filter(|v| v.is_finite()));
        median_in_place(&mut finite)
    }

    pub fn sky_position(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.wcs.as_ref().map(|wcs| wcs.pixel_to_sky(x, y))
    }
}

/// Clipped rectangular region of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
}

impl Window {
    pub fn width(&self) -> usize {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> usize {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Largest 2-D array among the primary and IMAGE extensions
pub fn select_science_hdu(hdus: &[HduInfo]) -> Option<&HduInfo> {
    hdus.iter()
        .filter_map(|hdu| hdu.image_2d_size().map(|size| (size, hdu)))
        // First of equally sized arrays wins
        .fold(None, |best: Option<(usize, &HduInfo)>, (size, hdu)| match best {
            Some((best_size, _)) if best_size >= size => best,
            _ => Some((size, hdu)),
        })
        .map(|(_, hdu)| hdu)
}

fn header_f64(hdu: &fitrs::Hdu, key: &str) -> Option<f64> {
    match hdu.value(key)? {
        fitrs::HeaderValue::IntegerNumber(n) => Some(*n as f64),
        fitrs::HeaderValue::RealFloatingNumber(f) => Some(*f),
        _ => None,
    }
}

/// Median of a slice, reordering it. Even lengths average the middle pair.
pub fn median_in_place(values: &mut [f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let upper = *upper;
    if n % 2 == 1 {
        upper
    } else {
        let lower_max = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (lower_max + upper) / 2.0
    }
}

/// Sky level and noise of an image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Background {
    pub level: f64,
    pub rms: f64,
}

/// Median background and MAD-based rms over the finite pixels.
/// Very large images are subsampled with a seeded generator.
pub fn robust_background(data: &[f64], seed: u64) -> Background {
    let arena = Bump::new();
    let mut sample = bumpalo::vec![in &arena];

    if data.len() > BACKGROUND_SAMPLE_THRESHOLD {
        let mut rng = StdRng::seed_from_u64(seed);
        let picks = rand::seq::index::sample(&mut rng, data.len(), BACKGROUND_SAMPLE_SIZE);
        sample.extend(picks.into_iter().map(|i| data[i]).filter(|v| v.is_finite()));
    } else {
        sample.extend(data.iter().copied().filter(|v| v.is_finite()));
    }

    if sample.is_empty() {
        return Background {
            level: 0.0,
            rms: 1.0,
        };
    }

    let level = median_in_place(&mut sample);
    for v in sample.iter_mut() {
        *v = (*v - level).abs();
    }
    let mad = median_in_place(&mut sample);

    Background {
        level,
        rms: mad * MAD_TO_SIGMA,
    }
}

/// A connected region above the detection threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Flux-weighted centroid
    pub x: f64,
    pub y: f64,
    pub flux: f64,
    pub flux_err: f64,
    pub peak: f64,
    pub area: usize,
    /// Semi-major and semi-minor axes of the second-moment ellipse
    pub a: f64,
    pub b: f64,
    pub theta: f64,
}

/// Normalised 3x3 binomial smoothing. Non-finite pixels count as zero.
fn smooth_3x3(data: &[f64], width: usize, height: usize) -> Vec<f64> {
    const KERNEL: [[f64; 3]; 3] = [[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]];
    let mut smoothed = vec![0.0; data.len()];

    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            let mut weight = 0.0;
            for (ky, row) in KERNEL.iter().enumerate() {
                let py = y as i64 + ky as i64 - 1;
                if py < 0 || py >= height as i64 {
                    continue;
                }
                for (kx, &k) in row.iter().enumerate() {
                    let px = x as i64 + kx as i64 - 1;
                    if px < 0 || px >= width as i64 {
                        continue;
                    }
                    let v = data[py as usize * width + px as usize];
                    if v.is_finite() {
                        sum += v * k;
                    }
                    weight += k;
                }
            }
            smoothed[y * width + x] = sum / weight;
        }
    }

    smoothed
}

/// 8-connected components of a mask, as lists of pixel coordinates
fn find_components(mask: &[bool], width: usize, height: usize) -> Vec<Vec<(usize, usize)>> {
    let mut visited = vec![false; mask.len()];
    let mut components = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if !mask[idx] || visited[idx] {
                continue;
            }

            let mut pixels = Vec::new();
            let mut queue = VecDeque::new();
            queue.push_back((x, y));
            visited[idx] = true;

            while let Some((cx, cy)) = queue.pop_front() {
                pixels.push((cx, cy));
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let nx = cx as i64 + dx;
                        let ny = cy as i64 + dy;
                        if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                            continue;
                        }
                        let nidx = ny as usize * width + nx as usize;
                        if mask[nidx] && !visited[nidx] {
                            visited[nidx] = true;
                            queue.push_back((nx as usize, ny as usize));
                        }
                    }
                }
            }

            components.push(pixels);
        }
    }

    components
}

/// Threshold-and-label source extraction on the background-subtracted image
pub fn detect_sources(
    image: &ScienceImage,
    background: &Background,
    threshold_sigma: f64,
    min_area: usize,
) -> Vec<Detection> {
    let (width, height) = (image.width, image.height);
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let subtracted: Vec<f64> = image.data.iter().map(|v| v - background.level).collect();
    let smoothed = smooth_3x3(&subtracted, width, height);
    let threshold = threshold_sigma * background.rms;
    let mask: Vec<bool> = smoothed
        .iter()
        .zip(&subtracted)
        .map(|(s, raw)| raw.is_finite() && *s > threshold)
        .collect();

    find_components(&mask, width, height)
        .into_iter()
        .filter(|pixels| pixels.len() >= min_area)
        .map(|pixels| measure(&subtracted, width, &pixels, background.rms))
        .collect()
}

fn measure(data: &[f64], width: usize, pixels: &[(usize, usize)], rms: f64) -> Detection {
    let mut flux = 0.0;
    let mut weight = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut peak = f64::NEG_INFINITY;

    for &(x, y) in pixels {
        let v = data[y * width + x];
        flux += v;
        peak = peak.max(v);
        let w = v.max(0.0);
        weight += w;
        sx += w * x as f64;
        sy += w * y as f64;
    }

    let (cx, cy) = if weight > 0.0 {
        (sx / weight, sy / weight)
    } else {
        let n = pixels.len() as f64;
        (
            pixels.iter().map(|p| p.0 as f64).sum::<f64>() / n,
            pixels.iter().map(|p| p.1 as f64).sum::<f64>() / n,
        )
    };

    let (mut x2, mut y2, mut xy) = (0.0, 0.0, 0.0);
    if weight > 0.0 {
        for &(x, y) in pixels {
            let w = data[y * width + x].max(0.0);
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            x2 += w * dx * dx;
            y2 += w * dy * dy;
            xy += w * dx * dy;
        }
        x2 /= weight;
        y2 /= weight;
        xy /= weight;
    }

    let mean = (x2 + y2) / 2.0;
    let spread = (((x2 - y2) / 2.0).powi(2) + xy * xy).sqrt();

    Detection {
        x: cx,
        y: cy,
        flux,
        flux_err: (pixels.len() as f64).sqrt() * rms,
        peak,
        area: pixels.len(),
        a: (mean + spread).max(0.0).sqrt(),
        b: (mean - spread).max(0.0).sqrt(),
        theta: 0.5 * (2.0 * xy).atan2(x2 - y2),
    }
}

/// Per-source morphology measured on a background-subtracted cutout
#[derive(Debug, Clone, PartialEq)]
pub struct Morphology {
    pub peak: f64,
    pub total_flux: f64,
    pub mean_flux: f64,
    pub snr: f64,
    pub concentration: f64,
    pub asymmetry: f64,
    pub edge_density: f64,
    pub eccentricity: f64,
    pub has_nan: bool,
}

fn nansum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    values.into_iter().filter(|v| !v.is_nan()).sum()
}

fn nanmean<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

pub fn compute_morphology(
    image: &ScienceImage,
    x: f64,
    y: f64,
    background: &Background,
    cutout_size: usize,
) -> Morphology {
    let window = image.window_around(x, y, cutout_size);
    let cutout: Vec<f64> = image
        .extract(&window)
        .into_iter()
        .map(|v| v - background.level)
        .collect();
    let cw = window.width();
    let local_x = x - window.x0 as f64;
    let local_y = y - window.y0 as f64;

    let radius = |i: usize| {
        let (row, col) = (i / cw.max(1), i % cw.max(1));
        ((row as f64 - local_y).powi(2) + (col as f64 - local_x).powi(2)).sqrt()
    };

    let peak = cutout
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f64::NAN, f64::max);
    let total_flux = nansum(cutout.iter().copied());
    let mean_flux = nanmean(cutout.iter().copied());
    let snr = if background.rms > 0.0 {
        peak / background.rms
    } else {
        0.0
    };

    let concentration = if total_flux > 0.0 {
        let within = |r: f64| {
            nansum(
                cutout
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| radius(*i) <= r)
                    .map(|(_, v)| *v),
            )
        };
        let flux_r10 = within(10.0);
        if flux_r10 > 0.0 {
            within(5.0) / flux_r10
        } else {
            0.0
        }
    } else {
        0.0
    };

    let asymmetry = if cutout.is_empty() {
        0.0
    } else {
        let n = cutout.len();
        let diff = nansum((0..n).map(|i| (cutout[i] - cutout[n - 1 - i]).abs()));
        let abs = nansum(cutout.iter().map(|v| v.abs()));
        diff / (2.0 * abs + 1e-10)
    };

    let (r_in, r_out) = (cutout_size as f64 * 0.7, cutout_size as f64 * 0.9);
    let ring: Vec<f64> = cutout
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let r = radius(*i);
            r > r_in && r < r_out
        })
        .map(|(_, v)| *v)
        .collect();
    let edge_density = if ring.is_empty() { 0.0 } else { nanmean(ring) };

    let eccentricity = if total_flux > 0.0 {
        let moment = |f: &dyn Fn(f64, f64) -> f64| {
            nansum(cutout.iter().enumerate().map(|(i, v)| {
                let dx = (i % cw) as f64 - local_x;
                let dy = (i / cw) as f64 - local_y;
                f(dx, dy) * v
            }))
        };
        let m00 = moment(&|_, _| 1.0);
        let cx = moment(&|dx, _| dx) / m00;
        let cy = moment(&|_, dy| dy) / m00;
        let mu20 = moment(&|dx, _| dx * dx) / m00 - cx * cx;
        let mu02 = moment(&|_, dy| dy * dy) / m00 - cy * cy;
        let mu11 = moment(&|dx, dy| dx * dy) / m00 - cx * cy;
        if mu20 + mu02 > 0.0 {
            (1.0 - 4.0 * (mu20 * mu02 - mu11 * mu11) / (mu20 + mu02).powi(2))
                .max(0.0)
                .sqrt()
        } else {
            0.0
        }
    } else {
        0.0
    };

    Morphology {
        peak,
        total_flux,
        mean_flux,
        snr,
        concentration,
        asymmetry,
        edge_density,
        eccentricity,
        has_nan: cutout.iter().any(|v| !v.is_finite()),
    }
}

/// Artifact flags joined by `;`, or `none`
pub fn flag_artifacts(
    x: f64,
    y: f64,
    width: usize,
    height: usize,
    morphology: &Morphology,
    config: &AnalysisConfig,
) -> String {
    let border = config.border_pixels;
    let mut flags = Vec::new();

    if x < border || x > width as f64 - border || y < border || y > height as f64 - border {
        flags.push("border");
    }
    if morphology.eccentricity > config.max_ellipticity {
        flags.push("high_ellipticity");
    }
    if morphology.has_nan {
        flags.push("has_nan");
    }
    if morphology.snr < config.min_snr {
        flags.push("low_snr");
    }

    if flags.is_empty() {
        "none".to_string()
    } else {
        flags.join(";")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::Rng;
    use rand_distr::{Distribution, Normal};

    /// Flat noisy image with circular Gaussian sources at the given
    /// (x, y, amplitude, sigma)
    pub(crate) fn synthetic_image(
        width: usize,
        height: usize,
        sources: &[(f64, f64, f64, f64)],
        seed: u64,
    ) -> ScienceImage {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(100.0, 2.0).unwrap();
        let mut data: Vec<f64> = (0..width * height).map(|_| noise.sample(&mut rng)).collect();
        for &(sx, sy, amp, sigma) in sources {
            for y in 0..height {
                for x in 0..width {
                    let r2 = (x as f64 - sx).powi(2) + (y as f64 - sy).powi(2);
                    data[y * width + x] += amp * (-r2 / (2.0 * sigma * sigma)).exp();
                }
            }
        }
        ScienceImage::from_data(width, height, data)
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median_in_place(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median_in_place(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median_in_place(&mut []).is_nan());
    }

    #[test]
    fn test_background_of_noise() {
        let image = synthetic_image(200, 200, &[], 7);
        let bg = robust_background(&image.data, 42);
        assert!((bg.level - 100.0).abs() < 0.1, "level {}", bg.level);
        assert!((bg.rms - 2.0).abs() < 0.1, "rms {}", bg.rms);
    }

    #[test]
    fn test_background_ignores_nan_and_handles_empty() {
        let mut data = vec![5.0; 100];
        data[3] = f64::NAN;
        data[7] = f64::INFINITY;
        let bg = robust_background(&data, 1);
        assert_eq!(bg.level, 5.0);
        assert_eq!(bg.rms, 0.0);

        let empty = robust_background(&[f64::NAN, f64::NAN], 1);
        assert_eq!(empty, Background { level: 0.0, rms: 1.0 });
    }

    #[test]
    fn test_detects_injected_sources() {
        let sources = [(40.0, 50.0, 200.0, 2.0), (120.0, 90.0, 150.0, 3.0)];
        let image = synthetic_image(160, 140, &sources, 3);
        let bg = robust_background(&image.data, 42);
        let mut found = detect_sources(&image, &bg, 5.0, 5);
        assert_eq!(found.len(), 2, "{:?}", found);
        found.sort_by(|a, b| a.x.total_cmp(&b.x));

        assert!((found[0].x - 40.0).abs() < 0.3);
        assert!((found[0].y - 50.0).abs() < 0.3);
        assert!((found[1].x - 120.0).abs() < 0.3);
        assert!(found[1].area > found[0].area);
        assert!(found[0].flux > 0.0);
        assert!((found[0].flux_err - (found[0].area as f64).sqrt() * bg.rms).abs() < 1e-9);
        assert!(found[0].a >= found[0].b);
    }

    #[test]
    fn test_min_area_rejects_single_pixels() {
        let mut image = synthetic_image(64, 64, &[], 5);
        image.data[32 * 64 + 32] = 10_000.0;
        let bg = robust_background(&image.data, 42);
        // A lone hot pixel smooths to a small blob of at most 9 pixels
        assert!(detect_sources(&image, &bg, 3.0, 10).is_empty());
    }

    #[test]
    fn test_morphology_of_round_source() {
        let image = synthetic_image(101, 101, &[(50.0, 50.0, 2000.0, 2.5)], 11);
        let bg = robust_background(&image.data, 42);
        let m = compute_morphology(&image, 50.0, 50.0, &bg, 25);
        assert!(m.snr > 100.0);
        assert!(m.eccentricity < 0.5, "ecc {}", m.eccentricity);
        assert!(m.asymmetry < 0.3, "asym {}", m.asymmetry);
        assert!(m.concentration > 0.8 && m.concentration <= 1.2);
        assert!(!m.has_nan);
    }

    #[test]
    fn test_morphology_of_elongated_source() {
        let (w, h) = (101, 101);
        let mut rng = StdRng::seed_from_u64(2);
        let mut data = vec![0.0; w * h];
        for y in 0..h {
            for x in 0..w {
                let dx = x as f64 - 50.0;
                let dy = y as f64 - 50.0;
                data[y * w + x] = 100.0
                    + rng.gen_range(-0.1..0.1)
                    + 400.0 * (-(dx * dx) / (2.0 * 36.0) - (dy * dy) / (2.0 * 1.0)).exp();
            }
        }
        let image = ScienceImage::from_data(w, h, data);
        let bg = robust_background(&image.data, 42);
        let m = compute_morphology(&image, 50.0, 50.0, &bg, 20);
        assert!(m.eccentricity > 0.9, "ecc {}", m.eccentricity);
    }

    #[test]
    fn test_nan_in_cutout_is_flagged() {
        let mut image = synthetic_image(80, 80, &[(40.0, 40.0, 300.0, 2.0)], 4);
        image.data[41 * 80 + 45] = f64::NAN;
        let bg = robust_background(&image.data, 42);
        let m = compute_morphology(&image, 40.0, 40.0, &bg, 10);
        assert!(m.has_nan);
        assert!(m.peak.is_finite());

        let flags = flag_artifacts(40.0, 40.0, 80, 80, &m, &AnalysisConfig::default());
        assert_eq!(flags, "border;has_nan");
    }

    #[test]
    fn test_flag_artifacts_none_and_all() {
        let config = AnalysisConfig::default();
        let clean = Morphology {
            peak: 100.0,
            total_flux: 1000.0,
            mean_flux: 1.0,
            snr: 20.0,
            concentration: 0.9,
            asymmetry: 0.1,
            edge_density: 0.0,
            eccentricity: 0.2,
            has_nan: false,
        };
        assert_eq!(flag_artifacts(500.0, 500.0, 1000, 1000, &clean, &config), "none");

        let bad = Morphology {
            snr: 2.0,
            eccentricity: 0.95,
            has_nan: true,
            ..clean
        };
        assert_eq!(
            flag_artifacts(10.0, 500.0, 1000, 1000, &bad, &config),
            "border;high_ellipticity;has_nan;low_snr"
        );
    }

    #[test]
    fn test_window_clipping() {
        let image = ScienceImage::from_data(10, 8, vec![0.0; 80]);
        let w = image.window_around(1.0, 7.0, 3);
        assert_eq!(w, Window { x0: 0, x1: 4, y0: 4, y1: 8 });
        assert_eq!(image.extract(&w).len(), 16);
        assert!(image.window(20, 30, 0, 5).is_empty());
    }

    #[test]
    fn test_select_largest_image_hdu() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.fits");
        crate::fits::write_image(&path, 6, 4, &[1.0; 24], &[]).unwrap();
        let hdus = scan_hdus(&path).unwrap();
        assert_eq!(select_science_hdu(&hdus).unwrap().index, 0);

        let image = ScienceImage::from_file(&path).unwrap();
        assert_eq!((image.width, image.height), (6, 4));
        assert!(image.wcs.is_none());
        assert_eq!(image.median(), 1.0);
    }
}
