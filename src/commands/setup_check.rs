use anyhow::{Context, Result};
use std::path::Path;

use crate::archive::MastClient;
use crate::config::PipelineConfig;
use crate::layout::{ProjectLayout, REQUIRED_DIRS};

/// Environment check. Fails only when the configuration cannot be used.
pub fn setup_check(
    config_path: &Path,
    layout: &ProjectLayout,
    probe_archive: bool,
) -> Result<PipelineConfig> {
    println!("{:=<60}", "");
    println!("JWST Research Pipeline - Environment Check");
    println!("{:=<60}", "");

    println!(
        "\n{} {} ({} build, {}-{})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) { "debug" } else { "release" },
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    println!("\nChecking configuration...");
    let config = PipelineConfig::load(config_path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;
    println!(
        "  ✓ {} (target {}, mode {})",
        config_path.display(),
        config.target_name,
        config.target_mode
    );

    println!("\nChecking directory structure...");
    let created = layout.ensure_all()?;
    for dir in REQUIRED_DIRS {
        if created.contains(dir) {
            println!("  ✗ {} - MISSING, created", dir);
        } else {
            println!("  ✓ {}", dir);
        }
    }

    if probe_archive {
        println!("\nChecking archive connectivity...");
        let reachable = MastClient::new(&config.archive).and_then(|client| {
            let status = client.probe()?;
            Ok((client.base_url().to_string(), status))
        });
        match reachable {
            Ok((url, status)) => println!("  ✓ {} answered with HTTP {}", url, status),
            Err(e) => println!("  ✗ {} unreachable: {}", config.archive.base_url, e),
        }
    }

    println!("\n{:=<60}", "");
    println!("Environment is ready for the JWST pipeline.");
    Ok(config)
}
