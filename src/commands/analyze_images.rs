use anyhow::{Context, Result};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::image_analysis::{
    compute_morphology, detect_sources, flag_artifacts, robust_background, ScienceImage,
};
use crate::isolation_forest::{sanitize_features, IsolationForest};
use crate::layout::ProjectLayout;
use crate::models::{ManifestRow, SourceRow};
use crate::render::render_cutout;
use crate::tables::{read_table, write_table};
use crate::utils::file_stem;

/// Sources measured in one image, before scoring
pub fn measure_sources(
    image: &ScienceImage,
    row: &ManifestRow,
    config: &PipelineConfig,
) -> Vec<SourceRow> {
    let analysis = &config.analysis;
    let background = robust_background(&image.data, config.random_seed);
    tracing::info!(
        "  Background: {:.2} ± {:.2}",
        background.level,
        background.rms
    );

    let detections = detect_sources(
        image,
        &background,
        analysis.detection_threshold,
        analysis.min_area,
    );
    tracing::info!("  Detected {} sources", detections.len());

    detections
        .iter()
        .map(|det| {
            let morphology =
                compute_morphology(image, det.x, det.y, &background, analysis.cutout_size);
            let flags =
                flag_artifacts(det.x, det.y, image.width, image.height, &morphology, analysis);
            let sky = image.sky_position(det.x, det.y);
            SourceRow {
                file: row.file.clone(),
                obs_id: row.obs_id.clone(),
                instrument: row.instrument.clone(),
                filter: row.filter.clone(),
                x: det.x,
                y: det.y,
                ra: sky.map(|(ra, _)| ra),
                dec: sky.map(|(_, dec)| dec),
                flux: Some(det.flux).filter(|v| v.is_finite()),
                flux_err: Some(det.flux_err).filter(|v| v.is_finite()),
                peak: morphology.peak,
                snr: morphology.snr,
                concentration: morphology.concentration,
                asymmetry: morphology.asymmetry,
                edge_density: morphology.edge_density,
                eccentricity: morphology.eccentricity,
                has_nan: morphology.has_nan,
                flags,
                anomaly_score: None,
                is_anomaly: None,
                cutout_path: None,
                key_features: None,
            }
        })
        .collect()
}

/// Fill anomaly scores and return the indices of the `top_n` most anomalous
/// sources, most anomalous first. Nothing is scored for small samples.
pub fn score_sources(sources: &mut [SourceRow], config: &PipelineConfig) -> Result<Vec<usize>> {
    let analysis = &config.analysis;
    if sources.len() <= analysis.min_sources_for_scoring {
        return Ok(Vec::new());
    }

    let mut features: Vec<Vec<f64>> = sources.iter().map(SourceRow::features).collect();
    sanitize_features(&mut features);
    let forest = IsolationForest::new(analysis.isolation_forest_contamination, config.random_seed);
    let (scores, labels) = forest.fit_predict(&features)?;

    for ((source, score), label) in sources.iter_mut().zip(&scores).zip(&labels) {
        source.anomaly_score = Some(-score);
        source.is_anomaly = Some(*label == -1);
    }

    let mut order: Vec<usize> = (0..sources.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    order.truncate(analysis.top_anomalies_per_image);
    Ok(order)
}

/// Detect, measure and score the sources of one image product. Returns all
/// sources plus the candidates with their cutouts rendered.
pub fn analyze_image(
    path: &Path,
    row: &ManifestRow,
    config: &PipelineConfig,
    layout: &ProjectLayout,
) -> Result<(Vec<SourceRow>, Vec<SourceRow>)> {
    let image = ScienceImage::from_file(path)?;
    tracing::info!(
        "Processing {} ({} x {}, HDU {})",
        path.display(),
        image.width,
        image.height,
        image.hdu_index
    );
    if image.wcs.is_none() {
        tracing::warn!("  No usable WCS, RA/Dec left empty");
    }

    let mut sources = measure_sources(&image, row, config);
    let top = score_sources(&mut sources, config)?;

    let stem = file_stem(&row.file);
    let mut candidates = Vec::with_capacity(top.len());
    for index in top {
        let mut candidate = sources[index].clone();
        let cutout = layout.cutouts_dir().join(format!("{}_anomaly_{}.png", stem, index));
        let size = config.analysis.cutout_size;
        match render_cutout(&image, candidate.x, candidate.y, size, &cutout) {
            Ok(()) => {
                let relative = layout.relative(&cutout).to_string_lossy().into_owned();
                candidate.cutout_path = Some(relative);
            }
            Err(e) => tracing::warn!("  Cutout for source {} failed: {:#}", index, e),
        }
        candidate.key_features = Some(candidate.describe_features());
        candidates.push(candidate);
    }
    Ok((sources, candidates))
}

pub fn analyze_images(config: &PipelineConfig, layout: &ProjectLayout) -> Result<()> {
    let manifest_path = layout.manifest_path();
    if !manifest_path.exists() {
        anyhow::bail!(
            "No download manifest found at {}. Run `download` or `test-data` first",
            manifest_path.display()
        );
    }
    let manifest: Vec<ManifestRow> = read_table(&manifest_path)?;
    let images: Vec<&ManifestRow> = manifest
        .iter()
        .filter(|row| config.is_image_product(&row.product_type))
        .collect();
    if images.is_empty() {
        anyhow::bail!("No image products found in manifest");
    }
    tracing::info!("Analyzing {} image files", images.len());

    let mut all_sources = Vec::new();
    let mut all_candidates = Vec::new();
    for row in images {
        let path = layout.resolve(&row.file);
        if !path.exists() {
            tracing::warn!("File not found: {}", path.display());
            continue;
        }
        match analyze_image(&path, row, config, layout)
            .with_context(|| format!("Error processing {}", path.display()))
        {
            Ok((sources, candidates)) => {
                all_sources.extend(sources);
                all_candidates.extend(candidates);
            }
            Err(e) => tracing::error!("{:#}", e),
        }
    }

    if !all_sources.is_empty() {
        let path = layout.all_sources_path();
        write_table(&path, &all_sources)?;
        println!("Saved {} total sources to {}", all_sources.len(), path.display());
    }
    if all_candidates.is_empty() {
        println!("No anomaly candidates found");
    } else {
        let path = layout.image_candidates_path();
        write_table(&path, &all_candidates)?;
        println!("Saved {} anomaly candidates to {}", all_candidates.len(), path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_analysis::tests::synthetic_image;

    fn manifest_row() -> ManifestRow {
        ManifestRow {
            file: "data/products/field_i2d.fits".into(),
            obs_id: "obs1".into(),
            instrument: "NIRCAM".into(),
            filter: "F200W".into(),
            product_type: "I2D".into(),
            calib_level: 3,
            size_gb: 0.01,
        }
    }

    fn crowded_field() -> ScienceImage {
        let mut sources = Vec::new();
        for i in 0..16 {
            let (col, row) = ((i % 4) as f64, (i / 4) as f64);
            sources.push((40.0 + 40.0 * col, 40.0 + 40.0 * row, 300.0, 2.5));
        }
        // Compact and bright, unlike the rest
        sources.push((100.0, 180.0, 4000.0, 1.0));
        synthetic_image(200, 200, &sources, 11)
    }

    #[test]
    fn test_measure_sources_finds_injected_sources() {
        let config = PipelineConfig::default();
        let sources = measure_sources(&crowded_field(), &manifest_row(), &config);
        assert_eq!(sources.len(), 17);
        assert!(sources.iter().all(|s| s.obs_id == "obs1" && s.ra.is_none()));
        // Corner sources sit inside the 50 px border
        assert!(sources.iter().any(|s| s.flags.contains("border")));
    }

    #[test]
    fn test_scoring_needs_enough_sources() {
        let config = PipelineConfig::default();
        let mut sources = measure_sources(&crowded_field(), &manifest_row(), &config);
        sources.truncate(10);
        assert!(score_sources(&mut sources, &config).unwrap().is_empty());
        assert!(sources.iter().all(|s| s.anomaly_score.is_none()));
    }

    #[test]
    fn test_scoring_ranks_the_odd_source_first() {
        let config = PipelineConfig::default();
        let mut sources = measure_sources(&crowded_field(), &manifest_row(), &config);
        let top = score_sources(&mut sources, &config).unwrap();
        assert_eq!(top.len(), config.analysis.top_anomalies_per_image);
        assert!(sources.iter().all(|s| s.anomaly_score.is_some()));

        let best = &sources[top[0]];
        assert!(best.peak > 2000.0, "peak {}", best.peak);
        let scores: Vec<f64> = top.iter().map(|&i| sources[i].anomaly_score.unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }
}
