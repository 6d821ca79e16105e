use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::models::{RankedCandidate, SourceType};

pub const ANOMALY_WEIGHT: f64 = 0.4;
pub const SNR_WEIGHT: f64 = 0.3;
pub const CLEAN_WEIGHT: f64 = 0.2;
pub const CONSISTENCY_WEIGHT: f64 = 0.1;

static ARTIFACT_FLAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)border|high_ellipticity|has_nan|low_snr").unwrap());

/// Whether a flag string names any artifact condition
pub fn is_flagged_artifact(flags: Option<&str>) -> bool {
    flags.is_some_and(|f| ARTIFACT_FLAGS.is_match(f))
}

/// Min-max normalisation; `constant` is used when every value is equal
fn normalize(values: &[f64], constant: f64) -> Vec<f64> {
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi > lo {
        values.iter().map(|v| (v - lo) / (hi - lo)).collect()
    } else {
        vec![constant; values.len()]
    }
}

/// Score, sort and number the combined image and spectrum candidates.
///
/// Ties keep their input order, so image candidates precede spectrum
/// candidates of equal score.
pub fn rank_candidates(mut candidates: Vec<RankedCandidate>) -> Vec<RankedCandidate> {
    if candidates.is_empty() {
        return candidates;
    }

    for c in candidates.iter_mut() {
        if !c.anomaly_score.is_finite() {
            c.anomaly_score = 0.0;
        }
    }
    let anomaly: Vec<f64> = candidates.iter().map(|c| c.anomaly_score).collect();
    let anomaly_norm = normalize(&anomaly, 0.5);
    let spectra_only = candidates.iter().all(|c| c.source_type == SourceType::Spectrum);
    let snr: Vec<f64> = candidates.iter().map(|c| c.ranking_snr(spectra_only)).collect();
    let snr_norm = normalize(&snr, 0.0);

    let mut obs_counts: HashMap<&str, usize> = HashMap::new();
    for c in &candidates {
        *obs_counts.entry(c.obs_id.as_str()).or_default() += 1;
    }
    let max_count = obs_counts.values().copied().max().unwrap_or(1) as f64;
    let consistency: Vec<f64> = candidates
        .iter()
        .map(|c| obs_counts.get(c.obs_id.as_str()).copied().unwrap_or(0) as f64 / max_count)
        .collect();

    for (i, c) in candidates.iter_mut().enumerate() {
        let clean = if is_flagged_artifact(c.flags.as_deref()) { 0.0 } else { 1.0 };
        c.anomaly_score_norm = anomaly_norm[i];
        c.composite_score = ANOMALY_WEIGHT * anomaly_norm[i]
            + SNR_WEIGHT * snr_norm[i]
            + CLEAN_WEIGHT * clean
            + CONSISTENCY_WEIGHT * consistency[i];
    }

    candidates.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
    for (i, c) in candidates.iter_mut().enumerate() {
        c.rank = i + 1;
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(obs_id: &str, score: f64, snr: f64, flags: &str) -> RankedCandidate {
        RankedCandidate {
            rank: 0,
            composite_score: 0.0,
            anomaly_score: score,
            anomaly_score_norm: 0.0,
            source_type: SourceType::Image,
            file: format!("{}_i2d.fits", obs_id),
            obs_id: obs_id.to_string(),
            instrument: "NIRCAM".to_string(),
            filter: "F200W".to_string(),
            ra: None,
            dec: None,
            x: Some(1.0),
            y: Some(1.0),
            snr: Some(snr),
            max_line_snr: None,
            flags: Some(flags.to_string()),
            key_features: None,
            cutout_path: None,
            plot_path: None,
            eccentricity: None,
            asymmetry: None,
            concentration: None,
            n_lines: None,
        }
    }

    #[test]
    fn test_artifact_pattern() {
        assert!(is_flagged_artifact(Some("border;low_snr")));
        assert!(is_flagged_artifact(Some("HIGH_ELLIPTICITY")));
        assert!(!is_flagged_artifact(Some("none")));
        assert!(!is_flagged_artifact(None));
    }

    #[test]
    fn test_composite_score_weights() {
        let ranked = rank_candidates(vec![
            candidate("a", 0.7, 10.0, "none"),
            candidate("a", 0.5, 50.0, "border"),
            candidate("b", 0.6, 30.0, "none"),
        ]);

        let by_score = |s: f64| ranked.iter().find(|c| c.anomaly_score == s).unwrap();
        // anomaly 1.0, snr 0.0, clean, obs "a" appears twice of max 2
        assert!((by_score(0.7).composite_score - (0.4 + 0.0 + 0.2 + 0.1)).abs() < 1e-12);
        // anomaly 0.0, snr 1.0, flagged
        assert!((by_score(0.5).composite_score - (0.0 + 0.3 + 0.0 + 0.1)).abs() < 1e-12);
        // anomaly 0.5, snr 0.5, clean, obs "b" once of max 2
        assert!((by_score(0.6).composite_score - (0.2 + 0.15 + 0.2 + 0.05)).abs() < 1e-12);

        let ranks: Vec<(usize, f64)> = ranked.iter().map(|c| (c.rank, c.anomaly_score)).collect();
        assert_eq!(ranks, vec![(1, 0.7), (2, 0.6), (3, 0.5)]);
    }

    #[test]
    fn test_equal_scores_normalise_to_constants() {
        let ranked = rank_candidates(vec![
            candidate("a", 0.3, 5.0, "none"),
            candidate("a", 0.3, 5.0, "none"),
        ]);
        for c in &ranked {
            assert_eq!(c.anomaly_score_norm, 0.5);
            assert!((c.composite_score - (0.2 + 0.0 + 0.2 + 0.1)).abs() < 1e-12);
        }
        // Stable order for ties
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
    }

    fn spectrum(obs_id: &str, score: f64, max_line_snr: f64) -> RankedCandidate {
        let mut c = candidate(obs_id, score, 0.0, "none");
        c.source_type = SourceType::Spectrum;
        c.snr = None;
        c.flags = None;
        c.max_line_snr = Some(max_line_snr);
        c
    }

    #[test]
    fn test_mixed_input_scores_spectra_with_zero_snr() {
        let ranked = rank_candidates(vec![
            candidate("a", 0.0, 10.0, "none"),
            spectrum("s", f64::NAN, 40.0),
        ]);

        assert_eq!(ranked[0].source_type, SourceType::Image);
        // anomaly 0.5 each, image snr 1.0 vs spectrum 0.0
        assert!((ranked[0].composite_score - (0.2 + 0.3 + 0.2 + 0.1)).abs() < 1e-12);
        assert_eq!(ranked[1].source_type, SourceType::Spectrum);
        assert_eq!(ranked[1].anomaly_score, 0.0);
        assert!((ranked[1].composite_score - (0.2 + 0.0 + 0.2 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_spectrum_only_uses_line_snr() {
        let ranked = rank_candidates(vec![spectrum("s", 0.2, 5.0), spectrum("s", 0.2, 40.0)]);

        assert_eq!(ranked[0].max_line_snr, Some(40.0));
        assert!((ranked[0].composite_score - (0.2 + 0.3 + 0.2 + 0.1)).abs() < 1e-12);
        assert!((ranked[1].composite_score - (0.2 + 0.0 + 0.2 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        assert!(rank_candidates(Vec::new()).is_empty());
    }
}
