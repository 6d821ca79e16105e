use anyhow::Result;

use crate::layout::ProjectLayout;
use crate::models::{RankedCandidate, SourceRow, SourceType, SpectrumRow};
use crate::ranking::rank_candidates;
use crate::tables::{read_optional_table, write_table};
use crate::utils::{format_optional, truncate_string};

/// Combine image and spectrum candidates into one ranked table
pub fn rank(layout: &ProjectLayout) -> Result<Vec<RankedCandidate>> {
    let images: Option<Vec<SourceRow>> = read_optional_table(&layout.image_candidates_path())?;
    let spectra: Option<Vec<SpectrumRow>> = read_optional_table(&layout.spectra_candidates_path())?;

    let mut candidates = Vec::new();
    if let Some(rows) = &images {
        tracing::info!("Loaded {} image candidates", rows.len());
        candidates.extend(rows.iter().map(RankedCandidate::from_source));
    }
    if let Some(rows) = &spectra {
        tracing::info!("Loaded {} spectral candidates", rows.len());
        candidates.extend(rows.iter().map(RankedCandidate::from_spectrum));
    }
    if candidates.is_empty() {
        anyhow::bail!("No candidates to rank. Run `analyze-images` or `analyze-spectra` first");
    }

    let ranked = rank_candidates(candidates);
    let path = layout.ranked_path();
    write_table(&path, &ranked)?;
    println!("Ranked {} candidates, saved to {}", ranked.len(), path.display());
    print_top_candidates(&ranked, 10);
    Ok(ranked)
}

pub fn print_top_candidates(ranked: &[RankedCandidate], limit: usize) {
    println!(
        "\n{:<6} {:<10} {:<10} {:<12} {:>10} {:>10} {:>8} {:<30}",
        "Rank", "Type", "Filter", "RA", "Dec", "Score", "SNR", "Features"
    );
    println!("{:-<100}", "");

    for c in ranked.iter().take(limit) {
        let snr = match c.source_type {
            SourceType::Image => c.snr,
            SourceType::Spectrum => c.max_line_snr,
        };
        println!(
            "{:<6} {:<10} {:<10} {:<12} {:>10} {:>10.3} {:>8} {:<30}",
            c.rank,
            c.source_type.as_str(),
            truncate_string(&c.filter, 10),
            format_optional(c.ra, 5),
            format_optional(c.dec, 5),
            c.composite_score,
            format_optional(snr, 1),
            truncate_string(c.key_features.as_deref().unwrap_or(""), 30)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::read_table;

    fn source(obs_id: &str, snr: f64, score: f64, flags: &str) -> SourceRow {
        SourceRow {
            file: "data/products/a_i2d.fits".into(),
            obs_id: obs_id.into(),
            instrument: "NIRCAM".into(),
            filter: "F200W".into(),
            x: 10.0,
            y: 20.0,
            ra: Some(148.97),
            dec: Some(69.68),
            flux: Some(100.0),
            flux_err: Some(2.0),
            peak: 50.0,
            snr,
            concentration: 0.5,
            asymmetry: 0.1,
            edge_density: 0.0,
            eccentricity: 0.2,
            has_nan: false,
            flags: flags.into(),
            anomaly_score: Some(score),
            is_anomaly: Some(true),
            cutout_path: None,
            key_features: Some(format!("SNR={:.1}", snr)),
        }
    }

    #[test]
    fn test_rank_requires_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        assert!(rank(&layout).is_err());
    }

    #[test]
    fn test_rank_images_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ProjectLayout::new(dir.path());
        write_table(
            &layout.image_candidates_path(),
            &[
                source("o1", 10.0, 0.50, "none"),
                source("o1", 80.0, 0.70, "border"),
                source("o2", 40.0, 0.60, "none"),
            ],
        )
        .unwrap();

        let ranked = rank(&layout).unwrap();
        assert_eq!(ranked.len(), 3);
        assert!(ranked.iter().all(|c| c.source_type == SourceType::Image));
        let from_disk: Vec<RankedCandidate> = read_table(&layout.ranked_path()).unwrap();
        assert_eq!(from_disk, ranked);
        assert_eq!(
            ranked.iter().map(|c| c.rank).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }
}
