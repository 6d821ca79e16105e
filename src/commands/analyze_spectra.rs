use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::isolation_forest::{sanitize_features, IsolationForest};
use crate::layout::ProjectLayout;
use crate::models::{LineRow, ManifestRow, SpectrumRow};
use crate::render::render_spectrum;
use crate::spectra::{compute_features, detect_lines, Spectrum};
use crate::tables::{read_table, write_table};
use crate::utils::file_stem;

/// Lines, features and plot for one spectrum product
pub fn analyze_spectrum(
    path: &Path,
    row: &ManifestRow,
    layout: &ProjectLayout,
) -> Result<(SpectrumRow, Vec<LineRow>)> {
    let spectrum = Spectrum::from_file(path)?;
    if spectrum.is_empty() {
        anyhow::bail!("No valid samples in {}", path.display());
    }
    let (lo, hi) = spectrum.wavelength_bounds();
    tracing::info!("Processing {} ({:.2} - {:.2})", path.display(), lo, hi);

    let lines = detect_lines(&spectrum)?;
    tracing::info!("  Detected {} emission lines", lines.len());
    let features = compute_features(&spectrum, &lines);

    let plot = layout
        .spectra_plots_dir()
        .join(format!("{}_spectrum.png", file_stem(&row.file)));
    let continuum = spectrum.continuum()?;
    let snr = spectrum.snr_spectrum(&continuum);
    let plot_path = match render_spectrum(&spectrum, &snr, &lines, &plot) {
        Ok(()) => Some(layout.relative(&plot).to_string_lossy().into_owned()),
        Err(e) => {
            tracing::warn!("  Spectrum plot failed: {:#}", e);
            None
        }
    };

    let spectrum_row = SpectrumRow {
        file: row.file.clone(),
        obs_id: row.obs_id.clone(),
        instrument: row.instrument.clone(),
        filter: row.filter.clone(),
        wavelength_min: lo,
        wavelength_max: hi,
        plot_path,
        continuum_slope: features.continuum_slope,
        mean_flux: features.mean_flux,
        flux_variance: features.flux_variance,
        n_lines: features.n_lines,
        mean_line_snr: features.mean_line_snr,
        max_line_snr: features.max_line_snr,
        total_line_flux: features.total_line_flux,
        wavelength_range: features.wavelength_range,
        anomaly_score: None,
    };
    let line_rows = lines
        .iter()
        .map(|line| LineRow {
            file: row.file.clone(),
            obs_id: row.obs_id.clone(),
            wavelength: line.wavelength,
            amplitude: line.amplitude,
            width: line.width,
            snr: line.snr,
            equivalent_width: line.equivalent_width,
        })
        .collect();
    Ok((spectrum_row, line_rows))
}

/// Score spectra and return the most anomalous, highest score first.
/// Returns nothing when there are too few spectra to score.
pub fn score_spectra(
    spectra: &mut [SpectrumRow],
    config: &PipelineConfig,
) -> Result<Vec<SpectrumRow>> {
    let analysis = &config.analysis;
    if spectra.len() <= analysis.min_spectra_for_scoring {
        return Ok(Vec::new());
    }

    let mut features: Vec<Vec<f64>> = spectra.iter().map(SpectrumRow::features).collect();
    sanitize_features(&mut features);
    let forest = IsolationForest::new(analysis.spectra_contamination, config.random_seed)
        .fit(&features)?;
    let scores = forest.score_samples(&features)?;
    for (row, score) in spectra.iter_mut().zip(&scores) {
        row.anomaly_score = Some(-score);
    }

    let mut candidates = spectra.to_vec();
    candidates.sort_by(|a, b| {
        b.anomaly_score
            .unwrap_or(0.0)
            .total_cmp(&a.anomaly_score.unwrap_or(0.0))
    });
    candidates.truncate(analysis.top_spectral_candidates);
    Ok(candidates)
}

pub fn analyze_spectra(config: &PipelineConfig, layout: &ProjectLayout) -> Result<()> {
    if config.product_types_spectra.is_empty() {
        println!("Spectra analysis disabled in config");
        return Ok(());
    }

    let manifest_path = layout.manifest_path();
    if !manifest_path.exists() {
        anyhow::bail!(
            "No download manifest found at {}. Run `download` or `test-data` first",
            manifest_path.display()
        );
    }
    let manifest: Vec<ManifestRow> = read_table(&manifest_path)?;
    let products: Vec<&ManifestRow> = manifest
        .iter()
        .filter(|row| config.is_spectrum_product(&row.product_type))
        .collect();
    if products.is_empty() {
        println!("No spectra products found in manifest");
        return Ok(());
    }
    tracing::info!("Analyzing {} spectra files", products.len());

    let mut spectra = Vec::new();
    let mut lines = Vec::new();
    for row in products {
        let path = layout.resolve(&row.file);
        if !path.exists() {
            tracing::warn!("File not found: {}", path.display());
            continue;
        }
        match analyze_spectrum(&path, row, layout)
            .with_context(|| format!("Error processing {}", path.display()))
        {
            Ok((spectrum, spectrum_lines)) => {
                spectra.push(spectrum);
                lines.extend(spectrum_lines);
            }
            Err(e) => tracing::error!("{:#}", e),
        }
    }

    let candidates = score_spectra(&mut spectra, config)?;

    if !spectra.is_empty() {
        let path = layout.spectra_features_path();
        write_table(&path, &spectra)?;
        println!("Saved {} spectra to {}", spectra.len(), path.display());
    }
    if !lines.is_empty() {
        let path = layout.spectra_lines_path();
        write_table(&path, &lines)?;
        println!("Saved {} emission lines to {}", lines.len(), path.display());
    }
    if !candidates.is_empty() {
        let path = layout.spectra_candidates_path();
        write_table(&path, &candidates)?;
        println!(
            "Saved {} spectral anomaly candidates to {}",
            candidates.len(),
            path.display()
        );
    }
    Ok(())
}
