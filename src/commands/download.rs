use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::archive::{
    filter_products, plan_downloads, select_observations, Archive, DownloadBudget, MastClient,
    PlannedDownload,
};
use crate::config::{PipelineConfig, TargetMode};
use crate::layout::ProjectLayout;
use crate::models::ManifestRow;
use crate::tables::write_table;
use crate::utils::truncate_string;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn download(config: &PipelineConfig, layout: &ProjectLayout) -> Result<()> {
    let client = MastClient::new(&config.archive).context("Failed to create archive client")?;
    let manifest = download_with(config, layout, &client)?;
    print_download_summary(&manifest);
    Ok(())
}

fn resolve_target(config: &PipelineConfig, archive: &dyn Archive) -> Result<(f64, f64)> {
    match config.target_mode {
        TargetMode::Region => config
            .coordinates()
            .context("target_mode 'region' requires ra_deg and dec_deg"),
        TargetMode::Object => match archive.resolve_name(&config.target_name) {
            Ok(coords) => Ok(coords),
            Err(e) => match config.coordinates() {
                Some(coords) => {
                    tracing::warn!(
                        "Could not resolve '{}' ({}), using configured coordinates",
                        config.target_name,
                        e
                    );
                    Ok(coords)
                }
                None => Err(e).with_context(|| {
                    format!("Failed to resolve target name '{}'", config.target_name)
                }),
            },
        },
    }
}

fn product_path(layout: &ProjectLayout, planned: &PlannedDownload) -> Option<PathBuf> {
    let name = std::path::Path::new(&planned.product.filename).file_name()?;
    Some(
        layout
            .products_dir()
            .join("mastDownload")
            .join("JWST")
            .join(&planned.obs_id)
            .join(name),
    )
}

/// Search, select and fetch products, then write the download manifest
pub fn download_with(
    config: &PipelineConfig,
    layout: &ProjectLayout,
    archive: &dyn Archive,
) -> Result<Vec<ManifestRow>> {
    let (ra, dec) = resolve_target(config, archive)?;
    tracing::info!(
        "Searching JWST observations within {}° of RA={:.6}, Dec={:.6}",
        config.radius_deg,
        ra,
        dec
    );

    let observations = archive
        .query_region(ra, dec, config.radius_deg)
        .context("Observation query failed")?;
    tracing::info!("Found {} observations", observations.len());

    let selected = select_observations(observations, config.max_obs, &config.instruments_allowlist);
    if selected.is_empty() {
        anyhow::bail!("No JWST observations match the target and instrument filter");
    }
    tracing::info!("Selected {} observations", selected.len());

    let mut budget = DownloadBudget::new(config.max_total_gb, config.max_files);
    let mut planned = Vec::new();
    for observation in &selected {
        if budget.is_full() {
            break;
        }
        let products = match archive.products(observation) {
            Ok(products) => products,
            Err(e) => {
                tracing::warn!("Skipping observation {}: {}", observation.obs_id, e);
                continue;
            }
        };
        let wanted = filter_products(products, config);
        tracing::debug!("{}: {} matching products", observation.obs_id, wanted.len());
        planned.extend(plan_downloads(&mut budget, observation, wanted));
    }

    if planned.is_empty() {
        anyhow::bail!("No products found matching the configured types and calibration level");
    }
    tracing::info!(
        "Planned {} products, estimated {:.2} GB",
        planned.len(),
        budget.total_gb()
    );

    let mut manifest = Vec::new();
    for item in &planned {
        let Some(dest) = product_path(layout, item) else {
            tracing::warn!("Skipping product with unusable filename {:?}", item.product.filename);
            continue;
        };

        let existing = std::fs::metadata(&dest)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if existing {
            tracing::debug!("Reusing {}", dest.display());
        } else {
            tracing::info!("Downloading {}", item.product.filename);
            if let Err(e) = archive.download(&item.product, &dest) {
                tracing::warn!("Failed to download {}: {}", item.product.filename, e);
                continue;
            }
        }

        let bytes = match std::fs::metadata(&dest) {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!("File not found after download: {} ({})", dest.display(), e);
                continue;
            }
        };
        manifest.push(ManifestRow {
            file: layout.relative(&dest).to_string_lossy().into_owned(),
            obs_id: item.obs_id.clone(),
            instrument: item.instrument.clone(),
            filter: item.filter.clone(),
            product_type: item.product.product_type.trim().to_string(),
            calib_level: item.product.calib_level().unwrap_or_default(),
            size_gb: bytes as f64 / BYTES_PER_GB,
        });
    }

    if manifest.is_empty() {
        anyhow::bail!("No files were successfully downloaded");
    }

    let path = layout.manifest_path();
    write_table(&path, &manifest)?;
    tracing::info!("Downloaded {} files, manifest saved to {}", manifest.len(), path.display());
    Ok(manifest)
}

pub fn print_download_summary(manifest: &[ManifestRow]) {
    let mut groups: BTreeMap<(&str, &str), (usize, f64)> = BTreeMap::new();
    for row in manifest {
        let entry = groups
            .entry((row.instrument.as_str(), row.product_type.as_str()))
            .or_default();
        entry.0 += 1;
        entry.1 += row.size_gb;
    }

    println!("\nDownload Summary");
    println!(
        "{:<20} {:<15} {:>8} {:>16}",
        "Instrument", "Product Type", "Count", "Total Size (GB)"
    );
    println!("{:-<62}", "");
    for ((instrument, product_type), (count, size)) in groups {
        println!(
            "{:<20} {:<15} {:>8} {:>16.2}",
            truncate_string(instrument, 20),
            truncate_string(product_type, 15),
            count,
            size
        );
    }
}
