use jwst_lab::commands::{analyze_images, make_report, rank, run_pipeline, verify_with, RunOptions};
use jwst_lab::config::PipelineConfig;
use jwst_lab::layout::ProjectLayout;
use jwst_lab::models::{RankedCandidate, SourceRow};
use jwst_lab::synthetic::{generate_test_data, SyntheticOptions};
use jwst_lab::tables::read_table;
use jwst_lab::verify::catalog::SimulatedCatalog;

fn small_options() -> SyntheticOptions {
    SyntheticOptions {
        n_images: 2,
        size: 512,
        seed: 7,
    }
}

#[test]
fn test_offline_stages_produce_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    layout.ensure_all().unwrap();
    let config = PipelineConfig::default();

    let manifest = generate_test_data(&layout, &small_options()).unwrap();
    assert_eq!(manifest.len(), 2);

    analyze_images(&config, &layout).unwrap();
    let sources: Vec<SourceRow> = read_table(&layout.all_sources_path()).unwrap();
    assert!(sources.len() > config.analysis.min_sources_for_scoring);
    let candidates: Vec<SourceRow> = read_table(&layout.image_candidates_path()).unwrap();
    assert!(!candidates.is_empty());
    assert!(candidates.len() <= 2 * config.analysis.top_anomalies_per_image);
    let cutouts: Vec<&str> = candidates.iter().filter_map(|c| c.cutout_path.as_deref()).collect();
    assert!(!cutouts.is_empty());
    for cutout in cutouts {
        assert!(layout.resolve(cutout).exists());
    }

    let ranked = rank(&layout).unwrap();
    assert_eq!(ranked.len(), candidates.len());
    assert_eq!(ranked[0].rank, 1);
    for pair in ranked.windows(2) {
        assert!(pair[0].composite_score >= pair[1].composite_score);
    }

    let report = make_report(&config, &layout).unwrap();
    let text = std::fs::read_to_string(report).unwrap();
    assert!(text.contains("test_obs_1"));

    let mut matcher = SimulatedCatalog::new(config.random_seed);
    let verified = verify_with(&config, &layout, &mut matcher).unwrap();
    assert_eq!(verified.len(), ranked.len().min(config.verification.top_n));
    assert!(layout.verification_report_path().exists());
    assert!(layout.verified_path().exists());
}

#[test]
fn test_run_in_test_mode() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let options = RunOptions {
        test_mode: true,
        skip_download: false,
        synthetic: small_options(),
    };

    run_pipeline(&dir.path().join("config.yaml"), &layout, &options).unwrap();

    assert!(layout.manifest_path().exists());
    assert!(layout.report_path().exists());
    let ranked: Vec<RankedCandidate> = read_table(&layout.ranked_path()).unwrap();
    assert!(!ranked.is_empty());
}

#[test]
fn test_skip_download_needs_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let options = RunOptions {
        skip_download: true,
        ..RunOptions::default()
    };
    assert!(run_pipeline(&dir.path().join("config.yaml"), &layout, &options).is_err());
}
