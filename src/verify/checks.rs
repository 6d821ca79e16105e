//! Pixel-level verification checks on science images.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::image_analysis::{median_in_place, ScienceImage};

/// Half-size of the box searched for a counterpart in another filter
pub const CROSS_FILTER_HALF: i64 = 5;
/// A counterpart must exceed this multiple of the image median
pub const CROSS_FILTER_CONTRAST: f64 = 1.5;
/// Half-size of the photometric aperture box
pub const APERTURE_HALF: i64 = 5;
/// Flux ratios at or above this are inconsistent
pub const MAX_FLUX_RATIO: f64 = 10.0;
/// Half-size of the PSF cutout
pub const PSF_HALF: i64 = 20;
/// Profile samples this close to the centre belong to the core
pub const PSF_CORE_EXCLUSION: usize = 3;
/// Profile level, relative to the peak, that marks a diffraction spike
pub const SPIKE_FRACTION: f64 = 0.3;

/// A science image and its finite-pixel median
pub struct LoadedImage {
    pub image: ScienceImage,
    pub median: f64,
}

/// Science images by path, each read at most once per verification run
#[derive(Default)]
pub struct ImageCache {
    images: HashMap<PathBuf, Result<LoadedImage, String>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &Path) -> Result<&LoadedImage, &str> {
        self.images
            .entry(path.to_path_buf())
            .or_insert_with(|| match ScienceImage::from_file(path) {
                Ok(image) => {
                    let median = image.median();
                    Ok(LoadedImage { image, median })
                }
                Err(e) => {
                    tracing::debug!("Could not read {}: {:#}", path.display(), e);
                    Err(format!("{:#}", e))
                }
            })
            .as_ref()
            .map_err(|e| e.as_str())
    }
}

/// Integer pixel containing a sky position, if it falls inside the image
pub fn pixel_of(image: &ScienceImage, ra: f64, dec: f64) -> Option<(i64, i64)> {
    let (x, y) = image.wcs.as_ref()?.sky_to_pixel(ra, dec)?;
    inside(image, x, y)
}

fn inside(image: &ScienceImage, x: f64, y: f64) -> Option<(i64, i64)> {
    if x >= 0.0 && y >= 0.0 && x < image.width as f64 && y < image.height as f64 {
        Some((x.floor() as i64, y.floor() as i64))
    } else {
        None
    }
}

fn box_values(image: &ScienceImage, x: i64, y: i64, half: i64) -> Vec<f64> {
    image.extract(&image.window(x - half, x + half, y - half, y + half))
}

/// Whether another exposure shows a source at the sky position: the box
/// maximum exceeds 1.5 × the image median.
pub fn has_counterpart(loaded: &LoadedImage, ra: f64, dec: f64) -> bool {
    let Some((x, y)) = pixel_of(&loaded.image, ra, dec) else {
        return false;
    };
    let peak = box_values(&loaded.image, x, y, CROSS_FILTER_HALF)
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(f64::NAN, f64::max);
    peak > loaded.median * CROSS_FILTER_CONTRAST
}

/// NaN-ignoring box sum at the sky position
pub fn aperture_flux(image: &ScienceImage, ra: f64, dec: f64) -> Option<f64> {
    let (x, y) = pixel_of(image, ra, dec)?;
    Some(
        box_values(image, x, y, APERTURE_HALF)
            .into_iter()
            .filter(|v| !v.is_nan())
            .sum(),
    )
}

/// Classify a set of per-filter fluxes. Returns (status, max/min ratio).
pub fn flux_consistency(fluxes: &[f64]) -> (&'static str, Option<f64>) {
    if fluxes.len() < 2 {
        return ("single_filter", None);
    }
    let min = fluxes.iter().copied().fold(f64::INFINITY, f64::min);
    let max = fluxes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min > 0.0 {
        let ratio = max / min;
        let status = if ratio < MAX_FLUX_RATIO { "consistent" } else { "inconsistent" };
        (status, Some(ratio))
    } else {
        // Undefined ratio
        ("inconsistent", None)
    }
}

fn max_abs(values: impl Iterator<Item = f64>) -> f64 {
    values
        .filter(|v| v.is_finite())
        .map(f64::abs)
        .fold(f64::NAN, f64::max)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpikeCheck {
    pub is_spike: bool,
    pub peak: f64,
}

/// Look for diffraction-spike structure: the horizontal or vertical profile
/// through the centre of a median-subtracted cutout, outside the core,
/// reaching 30% of the cutout peak. `None` when the position is off the image.
pub fn spike_check(image: &ScienceImage, x: f64, y: f64) -> Option<SpikeCheck> {
    let (xi, yi) = inside(image, x, y)?;
    let window = image.window(xi - PSF_HALF, xi + PSF_HALF, yi - PSF_HALF, yi + PSF_HALF);
    let (w, h) = (window.width(), window.height());
    let mut cutout = image.extract(&window);

    let mut finite: Vec<f64> = cutout.iter().copied().filter(|v| v.is_finite()).collect();
    let median = median_in_place(&mut finite);
    if median.is_finite() {
        for v in cutout.iter_mut() {
            *v -= median;
        }
    }

    let (cx, cy) = (w / 2, h / 2);
    let peak = cutout
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NAN, f64::max);

    let off_core = |i: usize, c: usize| i.abs_diff(c) > PSF_CORE_EXCLUSION;
    let horizontal = max_abs(
        (0..w)
            .filter(|&i| off_core(i, cx))
            .map(|i| cutout[cy * w + i]),
    );
    let vertical = max_abs(
        (0..h)
            .filter(|&j| off_core(j, cy))
            .map(|j| cutout[j * w + cx]),
    );

    let threshold = peak * SPIKE_FRACTION;
    Some(SpikeCheck {
        is_spike: horizontal > threshold || vertical > threshold,
        peak,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_analysis::tests::synthetic_image;
    use crate::wcs::Wcs;

    fn with_wcs(mut image: ScienceImage) -> ScienceImage {
        image.wcs = Some(Wcs {
            crpix1: 50.0,
            crpix2: 50.0,
            crval1: 148.968458,
            crval2: 69.679694,
            cd1_1: -0.0001,
            cd1_2: 0.0,
            cd2_1: 0.0,
            cd2_2: 0.0001,
        });
        image
    }

    fn loaded(image: ScienceImage) -> LoadedImage {
        let median = image.median();
        LoadedImage { image, median }
    }

    #[test]
    fn test_counterpart_found_on_source() {
        let image = with_wcs(synthetic_image(100, 100, &[(30.0, 60.0, 400.0, 2.0)], 1));
        let (ra, dec) = image.sky_position(30.0, 60.0).unwrap();
        let (ra_empty, dec_empty) = image.sky_position(80.0, 20.0).unwrap();
        let loaded = loaded(image);

        assert!(has_counterpart(&loaded, ra, dec));
        assert!(!has_counterpart(&loaded, ra_empty, dec_empty));
        // Off the image
        assert!(!has_counterpart(&loaded, ra + 1.0, dec));
    }

    #[test]
    fn test_counterpart_needs_wcs() {
        let loaded = loaded(synthetic_image(50, 50, &[(25.0, 25.0, 400.0, 2.0)], 1));
        assert!(!has_counterpart(&loaded, 148.968458, 69.679694));
    }

    #[test]
    fn test_aperture_flux() {
        let image = with_wcs(ScienceImage {
            data: vec![1.0; 100 * 100],
            ..synthetic_image(100, 100, &[], 1)
        });
        let (ra, dec) = image.sky_position(40.2, 40.7).unwrap();
        // 10 × 10 box of ones
        assert!((aperture_flux(&image, ra, dec).unwrap() - 100.0).abs() < 1e-9);

        // Box clipped at the corner: [0, 6) × [0, 5)
        let (ra, dec) = image.sky_position(1.5, 0.5).unwrap();
        let flux = aperture_flux(&image, ra, dec).unwrap();
        assert!((flux - 30.0).abs() < 1e-9, "{}", flux);
    }

    #[test]
    fn test_flux_consistency() {
        assert_eq!(flux_consistency(&[5.0]), ("single_filter", None));
        assert_eq!(flux_consistency(&[10.0, 20.0]), ("consistent", Some(2.0)));
        assert_eq!(flux_consistency(&[1.0, 10.0]), ("inconsistent", Some(10.0)));
        assert_eq!(flux_consistency(&[-1.0, 10.0]), ("inconsistent", None));
    }

    #[test]
    fn test_spike_check_isolated_star() {
        let image = synthetic_image(100, 100, &[(50.0, 50.0, 1000.0, 1.5)], 2);
        let check = spike_check(&image, 50.0, 50.0).unwrap();
        assert!(!check.is_spike);
        assert!(check.peak > 900.0);
    }

    #[test]
    fn test_spike_check_detects_cross() {
        let mut image = synthetic_image(100, 100, &[(50.0, 50.0, 1000.0, 1.5)], 2);
        for i in 30..70 {
            image.data[50 * 100 + i] += 500.0;
        }
        let check = spike_check(&image, 50.0, 50.0).unwrap();
        assert!(check.is_spike);
    }

    #[test]
    fn test_spike_check_off_image() {
        let image = synthetic_image(20, 20, &[], 2);
        assert!(spike_check(&image, -1.0, 5.0).is_none());
        assert!(spike_check(&image, 5.0, 20.0).is_none());
    }
}
