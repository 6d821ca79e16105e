use anyhow::{Context, Result};
use std::path::Path;

use super::{
    analyze_images, analyze_spectra, create_test_data, download, make_report, rank, setup_check,
    verify,
};
use crate::layout::ProjectLayout;
use crate::synthetic::SyntheticOptions;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Generate synthetic images instead of downloading
    pub test_mode: bool,
    /// Reuse the manifest from an earlier download
    pub skip_download: bool,
    pub synthetic: SyntheticOptions,
}

fn step(description: &str) {
    println!("\nStep: {}", description);
    println!("{:-<60}", "");
}

fn stage<T>(description: &str, result: Result<T>) -> Result<T> {
    let value = result.with_context(|| format!("{} failed", description))?;
    println!("✓ {} completed", description);
    Ok(value)
}

/// Run every stage in order, stopping at the first failure except for the
/// optional spectra stage
pub fn run_pipeline(
    config_path: &Path,
    layout: &ProjectLayout,
    options: &RunOptions,
) -> Result<()> {
    println!("JWST Research Pipeline");
    println!("Anomaly Candidate Detection System");

    step("Environment Check");
    let config = stage("Environment Check", setup_check(config_path, layout, false))?;

    if options.skip_download {
        step("Download JWST Data (skipped)");
        if !layout.manifest_path().exists() {
            anyhow::bail!(
                "--skip-download needs an existing manifest at {}",
                layout.manifest_path().display()
            );
        }
    } else if options.test_mode {
        step("Create Test Data");
        let synthetic = SyntheticOptions {
            seed: config.random_seed,
            ..options.synthetic.clone()
        };
        stage("Create Test Data", create_test_data(layout, &synthetic))?;
    } else {
        step("Download JWST Data");
        stage("Download JWST Data", download(&config, layout))?;
    }

    step("Analyze Images");
    stage("Analyze Images", analyze_images(&config, layout))?;

    step("Analyze Spectra");
    if let Err(e) = analyze_spectra(&config, layout) {
        tracing::warn!("Analyze Spectra failed: {:#}", e);
        println!("Continuing (spectra analysis is optional)");
    } else {
        println!("✓ Analyze Spectra completed");
    }

    step("Rank Candidates");
    stage("Rank Candidates", rank(layout))?;

    step("Generate Report");
    let report = stage("Generate Report", make_report(&config, layout))?;

    step("Verify Candidates");
    stage("Verify Candidates", verify(&config, layout))?;

    println!("\nPipeline complete!");
    println!("Report: {}", report.display());
    println!("Verification: {}", layout.verification_report_path().display());
    Ok(())
}
