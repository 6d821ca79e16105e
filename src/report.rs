/// Markdown rendering of the research report
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::layout::ProjectLayout;
use crate::models::{ManifestRow, RankedCandidate};

pub const REPORT_TOP_N: usize = 20;

pub const VERIFICATION_CHECKLIST: [(&str, &str); 10] = [
    ("Cross-filter verification", "Check if candidate appears in other filters"),
    ("Multi-epoch consistency", "Verify candidate persists across different observations"),
    ("Catalog cross-match", "Check against known catalogs (e.g., SIMBAD, Gaia)"),
    ("PSF analysis", "Verify candidate is not a diffraction spike or PSF artifact"),
    ("Cosmic ray check", "Examine multiple exposures to rule out cosmic rays"),
    ("Detection threshold sensitivity", "Re-run with different detection thresholds"),
    ("Independent method", "Verify using different source detection algorithms"),
    ("Photometric consistency", "Check if photometry is consistent across filters"),
    ("Morphology validation", "Verify unusual morphology is not due to blending"),
    ("WCS accuracy", "Verify astrometric solution is accurate for this region"),
];

/// (count, total GiB) per key, in key order
fn summarize<'a, K: Ord>(
    manifest: &'a [ManifestRow],
    key: impl Fn(&'a ManifestRow) -> K,
) -> BTreeMap<K, (usize, f64)> {
    let mut groups = BTreeMap::new();
    for row in manifest {
        let entry = groups.entry(key(row)).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += row.size_gb;
    }
    groups
}

fn link(layout: &ProjectLayout, path: &str) -> String {
    layout.relative(Path::new(path)).display().to_string()
}

fn write_candidate(
    out: &mut String,
    layout: &ProjectLayout,
    c: &RankedCandidate,
) -> std::fmt::Result {
    writeln!(out, "### Candidate #{}", c.rank)?;
    writeln!(out)?;
    writeln!(out, "- **Type:** {}", c.source_type)?;
    if !c.instrument.is_empty() {
        writeln!(out, "- **Instrument:** {}", c.instrument)?;
    }
    if !c.filter.is_empty() {
        writeln!(out, "- **Filter:** {}", c.filter)?;
    }
    if !c.obs_id.is_empty() {
        writeln!(out, "- **Observation ID:** {}", c.obs_id)?;
    }
    if let Some((ra, dec)) = c.coordinates() {
        writeln!(out, "- **Coordinates:** RA={:.6}°, Dec={:.6}°", ra, dec)?;
    }
    if let Some((x, y)) = c.pixel_position() {
        writeln!(out, "- **Pixel Position:** x={:.1}, y={:.1}", x, y)?;
    }
    match (c.snr, c.max_line_snr) {
        (Some(snr), _) if snr.is_finite() => writeln!(out, "- **SNR:** {:.1}", snr)?,
        (_, Some(snr)) if snr.is_finite() => writeln!(out, "- **Max Line SNR:** {:.1}", snr)?,
        _ => {}
    }
    writeln!(out, "- **Composite Score:** {:.3}", c.composite_score)?;
    writeln!(out, "- **Anomaly Score:** {:.3}", c.anomaly_score)?;
    if let Some(features) = c.key_features.as_deref().filter(|f| !f.is_empty()) {
        writeln!(out, "- **Key Features:** {}", features)?;
    }
    if let Some(flags) = c.active_flags() {
        writeln!(out, "- **Flags:** {}", flags)?;
    }
    if let Some(cutout) = c.cutout_path.as_deref().filter(|p| !p.is_empty()) {
        writeln!(out, "- **Cutout:** ![Candidate #{}]({})", c.rank, link(layout, cutout))?;
    }
    if let Some(plot) = c.plot_path.as_deref().filter(|p| !p.is_empty()) {
        writeln!(out, "- **Spectrum Plot:** ![Spectrum #{}]({})", c.rank, link(layout, plot))?;
    }
    writeln!(out)
}

fn write_report(
    out: &mut String,
    config: &PipelineConfig,
    layout: &ProjectLayout,
    manifest: &[ManifestRow],
    ranked: &[RankedCandidate],
    generated: DateTime<Local>,
) -> std::fmt::Result {
    writeln!(out, "# JWST Anomaly Candidate Research Report")?;
    writeln!(out)?;
    writeln!(out, "**Generated:** {}", generated.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out)?;
    writeln!(out, "---")?;
    writeln!(out)?;

    writeln!(out, "## Executive Summary")?;
    writeln!(out)?;
    writeln!(out, "This report presents candidate anomalies identified in JWST public data.")?;
    writeln!(out, "**Important:** These are candidate anomalies requiring verification.")?;
    writeln!(out, "They should not be interpreted as 'never discovered before' without")?;
    writeln!(out, "further cross-validation with other datasets and analysis methods.")?;
    writeln!(out)?;

    writeln!(out, "## Data Summary")?;
    writeln!(out)?;
    writeln!(out, "**Target:** {}", config.target_name)?;
    writeln!(out, "**Mode:** {}", config.target_mode)?;
    writeln!(out)?;
    writeln!(out, "### Observations Downloaded")?;
    writeln!(out)?;
    writeln!(out, "| Observation ID | Instrument | Files | Size (GB) |")?;
    writeln!(out, "|----------------|------------|-------|-----------|")?;
    for ((obs_id, instrument), (count, size)) in
        summarize(manifest, |r| (r.obs_id.as_str(), r.instrument.as_str()))
    {
        writeln!(out, "| {} | {} | {} | {:.2} |", obs_id, instrument, count, size)?;
    }
    writeln!(out)?;
    writeln!(out, "### Product Types")?;
    writeln!(out)?;
    writeln!(out, "| Product Type | Count | Total Size (GB) |")?;
    writeln!(out, "|-------------|-------|-----------------|")?;
    for (product_type, (count, size)) in summarize(manifest, |r| r.product_type.as_str()) {
        writeln!(out, "| {} | {} | {:.2} |", product_type, count, size)?;
    }
    writeln!(out)?;

    writeln!(out, "## Pipeline Steps")?;
    writeln!(out)?;
    writeln!(
        out,
        "1. **Data Download:** Queried MAST for JWST observations matching target criteria"
    )?;
    writeln!(
        out,
        "2. **Source Detection:** Thresholded, smoothed, connected-component source extraction on I2D images"
    )?;
    writeln!(
        out,
        "3. **Morphology Analysis:** Computed metrics: SNR, concentration, asymmetry, eccentricity, edge density"
    )?;
    writeln!(out, "4. **Anomaly Detection:** Applied Isolation Forest on morphology features")?;
    writeln!(
        out,
        "5. **Spectral Analysis:** Continuum fit, emission line detection and Gaussian line fits on 1-D spectra"
    )?;
    writeln!(
        out,
        "6. **Ranking:** Composite score based on anomaly score, SNR, artifact flags, cross-frame consistency"
    )?;
    writeln!(out)?;

    writeln!(out, "## Top {} Anomaly Candidates", REPORT_TOP_N)?;
    writeln!(out)?;
    if ranked.is_empty() {
        writeln!(out, "No candidates found in this analysis.")?;
        writeln!(out)?;
    } else {
        writeln!(out, "Candidates are ranked by composite score combining anomaly score, SNR,")?;
        writeln!(out, "artifact flags, and cross-frame consistency.")?;
        writeln!(out)?;
        for candidate in ranked.iter().take(REPORT_TOP_N) {
            write_candidate(out, layout, candidate)?;
        }
    }

    writeln!(out, "## Verification Checklist")?;
    writeln!(out)?;
    writeln!(out, "Before claiming any discovery, verify candidates using:")?;
    writeln!(out)?;
    for (i, (title, detail)) in VERIFICATION_CHECKLIST.iter().enumerate() {
        writeln!(out, "{}. **{}:** {}", i + 1, title, detail)?;
    }
    writeln!(out)?;

    writeln!(out, "## Reproducibility")?;
    writeln!(out)?;
    writeln!(out, "This analysis can be reproduced by:")?;
    writeln!(out)?;
    writeln!(out, "1. Building the tool: `cargo build --release`")?;
    writeln!(out, "2. Configuring target in `config.yaml`")?;
    writeln!(out, "3. Running: `jwst-lab run`")?;
    writeln!(out)?;
    writeln!(out, "**Configuration used:**")?;
    writeln!(out, "- Random seed: {}", config.random_seed)?;
    writeln!(out, "- Detection threshold: {} sigma", config.analysis.detection_threshold)?;
    writeln!(out, "- Max observations: {}", config.max_obs)?;
    writeln!(out, "- Max total size: {} GB", config.max_total_gb)?;
    writeln!(out)?;

    writeln!(out, "## Output Files")?;
    writeln!(out)?;
    writeln!(out, "All outputs are saved in the `outputs/` directory:")?;
    writeln!(out)?;
    for (file, description) in [
        ("outputs/tables/download_manifest.csv", "List of downloaded files"),
        ("outputs/tables/all_sources.csv", "All detected sources"),
        ("outputs/tables/anomaly_candidates_images.csv", "Image anomaly candidates"),
        ("outputs/tables/spectra_features.csv", "Per-spectrum features (if spectra analyzed)"),
        ("outputs/tables/spectra_lines.csv", "Detected spectral lines (if spectra analyzed)"),
        ("outputs/tables/ranked_candidates.csv", "Ranked candidates (this report)"),
        ("outputs/figures/cutouts/", "Source cutout images"),
        ("outputs/figures/spectra/", "Spectrum plots (if spectra analyzed)"),
    ] {
        writeln!(out, "- `{}` - {}", file, description)?;
    }
    Ok(())
}

/// Build the full `REPORT.md` text
pub fn render_report(
    config: &PipelineConfig,
    layout: &ProjectLayout,
    manifest: &[ManifestRow],
    ranked: &[RankedCandidate],
    generated: DateTime<Local>,
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    write_report(&mut out, config, layout, manifest, ranked, generated).ok();
    out
}
