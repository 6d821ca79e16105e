//! Synthetic NIRCam-like images for running the pipeline offline.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::path::PathBuf;

use crate::fits::{write_image, CardValue};
use crate::layout::{ensure_dir, ProjectLayout};
use crate::models::ManifestRow;

/// M82
pub const FIELD_RA: f64 = 148.968458;
pub const FIELD_DEC: f64 = 69.679694;
/// Degrees per pixel
pub const PIXEL_SCALE: f64 = 0.0001;
pub const FILTERS: [&str; 3] = ["F115W", "F200W", "F444W"];

const BACKGROUND_LEVEL: f64 = 100.0;
const BACKGROUND_NOISE: f64 = 10.0;
const ANOMALOUS_SOURCES: usize = 3;
/// Sources are rendered out to this many sigma
const RENDER_SIGMAS: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    pub n_images: usize,
    pub size: usize,
    pub seed: u64,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            n_images: 3,
            size: 1024,
            seed: 42,
        }
    }
}

/// A Gaussian source injected into a synthetic field
#[derive(Debug, Clone, PartialEq)]
pub struct InjectedSource {
    pub x: f64,
    pub y: f64,
    pub amplitude: f64,
    pub sigma: f64,
    pub anomalous: bool,
}

fn add_gaussian(data: &mut [f32], size: usize, source: &InjectedSource) {
    let reach = (source.sigma * RENDER_SIGMAS).ceil();
    let x0 = (source.x - reach).floor().max(0.0) as usize;
    let y0 = (source.y - reach).floor().max(0.0) as usize;
    let x1 = ((source.x + reach).ceil() as usize).min(size - 1);
    let y1 = ((source.y + reach).ceil() as usize).min(size - 1);
    let two_sigma2 = 2.0 * source.sigma * source.sigma;

    for y in y0..=y1 {
        let dy = y as f64 - source.y;
        for x in x0..=x1 {
            let dx = x as f64 - source.x;
            let r2 = dx * dx + dy * dy;
            data[y * size + x] += (source.amplitude * (-r2 / two_sigma2).exp()) as f32;
        }
    }
}

/// Square noisy field with `n_sources` ordinary sources plus three bright
/// compact ones. Returns the pixels (row-major) and what was injected.
pub fn synthetic_field(
    size: usize,
    n_sources: usize,
    rng: &mut StdRng,
) -> Result<(Vec<f32>, Vec<InjectedSource>)> {
    if size < 16 {
        anyhow::bail!("Synthetic images must be at least 16 pixels across (got {})", size);
    }
    let noise = Normal::new(BACKGROUND_LEVEL, BACKGROUND_NOISE)?;
    let mut data: Vec<f32> = (0..size * size).map(|_| noise.sample(rng) as f32).collect();

    let extent = size as f64;
    let margin = (extent / 8.0).min(100.0);
    let anomaly_margin = (extent / 4.0).min(200.0);

    let mut sources = Vec::with_capacity(n_sources + ANOMALOUS_SOURCES);
    for _ in 0..n_sources {
        sources.push(InjectedSource {
            x: rng.gen_range(margin..extent - margin),
            y: rng.gen_range(margin..extent - margin),
            amplitude: rng.gen_range(100.0..1000.0),
            sigma: rng.gen_range(2.0..5.0),
            anomalous: false,
        });
    }
    for _ in 0..ANOMALOUS_SOURCES {
        sources.push(InjectedSource {
            x: rng.gen_range(anomaly_margin..extent - anomaly_margin),
            y: rng.gen_range(anomaly_margin..extent - anomaly_margin),
            amplitude: rng.gen_range(2000.0..5000.0),
            sigma: rng.gen_range(1.0..2.0),
            anomalous: true,
        });
    }

    for source in &sources {
        add_gaussian(&mut data, size, source);
    }
    Ok((data, sources))
}

fn header_cards(size: usize, filter: &str) -> Vec<(&'static str, CardValue)> {
    let centre = size as f64 / 2.0;
    vec![
        ("CTYPE1", CardValue::Text("RA---TAN".into())),
        ("CTYPE2", CardValue::Text("DEC--TAN".into())),
        ("CRPIX1", CardValue::Float(centre)),
        ("CRPIX2", CardValue::Float(centre)),
        ("CRVAL1", CardValue::Float(FIELD_RA)),
        ("CRVAL2", CardValue::Float(FIELD_DEC)),
        ("CDELT1", CardValue::Float(-PIXEL_SCALE)),
        ("CDELT2", CardValue::Float(PIXEL_SCALE)),
        ("INSTRUME", CardValue::Text("NIRCAM".into())),
        ("FILTER", CardValue::Text(filter.into())),
        ("CALIBLVL", CardValue::Int(2)),
    ]
}

/// Write synthetic I2D images under `data/products` and the matching
/// download manifest
pub fn generate_test_data(
    layout: &ProjectLayout,
    options: &SyntheticOptions,
) -> Result<Vec<ManifestRow>> {
    let products_dir = layout.products_dir();
    ensure_dir(&products_dir)?;

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut manifest = Vec::with_capacity(options.n_images);
    for i in 0..options.n_images {
        let filter = FILTERS[i % FILTERS.len()];
        let path: PathBuf = products_dir.join(format!("test_jwst_image_{}_i2d.fits", i + 1));
        let n_sources = 30 + i * 10;

        let (data, sources) = synthetic_field(options.size, n_sources, &mut rng)?;
        write_image(&path, options.size, options.size, &data, &header_cards(options.size, filter))?;
        tracing::debug!(
            "{}: {} sources ({} anomalous)",
            path.display(),
            sources.len(),
            sources.iter().filter(|s| s.anomalous).count()
        );

        let bytes = std::fs::metadata(&path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        manifest.push(ManifestRow {
            file: layout.relative(&path).to_string_lossy().into_owned(),
            obs_id: format!("test_obs_{}", i + 1),
            instrument: "NIRCAM".to_string(),
            filter: filter.to_string(),
            product_type: "I2D".to_string(),
            calib_level: 2,
            size_gb: bytes as f64 / (1024.0 * 1024.0 * 1024.0),
        });
    }

    crate::tables::write_table(&layout.manifest_path(), &manifest)?;
    Ok(manifest)
}
