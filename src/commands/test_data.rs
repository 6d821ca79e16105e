use anyhow::Result;

use crate::layout::ProjectLayout;
use crate::models::ManifestRow;
use crate::synthetic::{generate_test_data, SyntheticOptions};

pub fn create_test_data(
    layout: &ProjectLayout,
    options: &SyntheticOptions,
) -> Result<Vec<ManifestRow>> {
    println!("TEST MODE: creating {} synthetic FITS images", options.n_images);
    println!("{:=<60}", "");

    let manifest = generate_test_data(layout, options)?;
    for row in &manifest {
        println!(
            "Created: {} ({:.1} MB, {})",
            row.file,
            row.size_gb * 1024.0,
            row.filter
        );
    }
    println!("\nManifest saved to {}", layout.manifest_path().display());
    println!("Note: this is synthetic data. Real JWST data needs the MAST archive.");
    Ok(manifest)
}
