use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::layout::{ensure_dir, ProjectLayout};
use crate::models::{ManifestRow, RankedCandidate};
use crate::report::render_report;
use crate::tables::{read_optional_table, read_table};

pub fn make_report(config: &PipelineConfig, layout: &ProjectLayout) -> Result<PathBuf> {
    let manifest_path = layout.manifest_path();
    if !manifest_path.exists() {
        anyhow::bail!("No download manifest found at {}", manifest_path.display());
    }
    let manifest: Vec<ManifestRow> = read_table(&manifest_path)?;
    let ranked: Vec<RankedCandidate> = read_optional_table(&layout.ranked_path())?
        .unwrap_or_else(|| {
            tracing::warn!("No ranked candidates found, report will have no candidate entries");
            Vec::new()
        });

    let text = render_report(config, layout, &manifest, &ranked, chrono::Local::now());
    let path = layout.report_path();
    ensure_dir(&path)?;
    std::fs::write(&path, text)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    println!("Report saved to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::write_table;

    #[test]
    fn test_report_requires_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert!(make_report(&PipelineConfig::default(), &layout).is_err());
    }

    #[test]
    fn test_report_without_ranked_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let manifest = vec![ManifestRow {
            file: "data/products/a_i2d.fits".into(),
            obs_id: "jw01".into(),
            instrument: "NIRCAM".into(),
            filter: "F200W".into(),
            product_type: "I2D".into(),
            calib_level: 3,
            size_gb: 0.25,
        }];
        write_table(&layout.manifest_path(), &manifest).unwrap();

        let path = make_report(&PipelineConfig::default(), &layout).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("jw01"));
        assert!(text.contains("M82"));
    }
}
