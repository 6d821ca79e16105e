use anyhow::{Context, Result};

use crate::config::{CatalogKind, PipelineConfig};
use crate::layout::{ensure_dir, ProjectLayout};
use crate::models::{ManifestRow, RankedCandidate, VerifiedCandidate};
use crate::tables::{read_table, write_table};
use crate::utils::truncate_string;
use crate::verify::catalog::{CatalogMatcher, GaiaCatalog, SimulatedCatalog};
use crate::verify::{render_verification_report, verify_candidates};

fn catalog_matcher(config: &PipelineConfig) -> Result<Box<dyn CatalogMatcher>> {
    Ok(match config.verification.catalog {
        CatalogKind::Simulated => {
            tracing::warn!(
                "Using simulated catalog matches; set `verification.catalog: gaia` for a real cross-match"
            );
            Box::new(SimulatedCatalog::default())
        }
        CatalogKind::Gaia => Box::new(GaiaCatalog::new(
            config.verification.catalog_radius_arcsec,
            config.archive.timeout_secs,
        )?),
    })
}

pub fn verify(config: &PipelineConfig, layout: &ProjectLayout) -> Result<Vec<VerifiedCandidate>> {
    let mut matcher = catalog_matcher(config)?;
    verify_with(config, layout, matcher.as_mut())
}

pub fn verify_with(
    config: &PipelineConfig,
    layout: &ProjectLayout,
    matcher: &mut dyn CatalogMatcher,
) -> Result<Vec<VerifiedCandidate>> {
    let ranked_path = layout.ranked_path();
    if !ranked_path.exists() {
        anyhow::bail!("No ranked candidates found at {}. Run `rank` first", ranked_path.display());
    }
    let ranked: Vec<RankedCandidate> = read_table(&ranked_path)?;
    tracing::info!("Loaded {} ranked candidates", ranked.len());

    let manifest_path = layout.manifest_path();
    if !manifest_path.exists() {
        anyhow::bail!("No download manifest found at {}", manifest_path.display());
    }
    let manifest: Vec<ManifestRow> = read_table(&manifest_path)?;

    let top_n = config.verification.top_n;
    let verified = verify_candidates(&ranked, &manifest, layout, matcher, top_n);

    let report_path = layout.verification_report_path();
    ensure_dir(&report_path)?;
    std::fs::write(&report_path, render_verification_report(&verified))
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    println!("Verification report saved to {}", report_path.display());

    let verified_path = layout.verified_path();
    write_table(&verified_path, &verified)?;
    println!("Verified candidates saved to {}", verified_path.display());

    print_verification_summary(&verified);
    Ok(verified)
}

pub fn print_verification_summary(verified: &[VerifiedCandidate]) {
    println!("\nVerification Summary - Top 10");
    println!(
        "{:>6} {:>8} {:<15} {:<10} {:<12} {:<8}",
        "Rank", "V-Score", "Cross-Filter", "Catalog", "Photometry", "Status"
    );
    println!("{:-<64}", "");
    for c in verified.iter().take(10) {
        println!(
            "{:>6} {:>8.2} {:<15} {:<10} {:<12} {:<8}",
            c.rank,
            c.verification_score,
            truncate_string(&c.cross_filter, 15),
            truncate_string(&c.catalog_match, 10),
            truncate_string(&c.photometric_consistency, 12),
            if c.is_artifact { "Flagged" } else { "Clean" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_requires_ranked_table() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        let mut matcher = SimulatedCatalog::default();
        let err = verify_with(&PipelineConfig::default(), &layout, &mut matcher).unwrap_err();
        assert!(err.to_string().contains("ranked"));
    }

    #[test]
    fn test_matcher_follows_config() {
        let mut config = PipelineConfig::default();
        assert_eq!(catalog_matcher(&config).unwrap().name(), "simulated");
        config.verification.catalog = CatalogKind::Gaia;
        assert_eq!(catalog_matcher(&config).unwrap().name(), "gaia");
    }
}
