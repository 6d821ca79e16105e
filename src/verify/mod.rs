//! Follow-up checks on the top ranked candidates.

pub mod catalog;
pub mod checks;

use std::fmt::Write;

use crate::layout::ProjectLayout;
use crate::models::{ManifestRow, RankedCandidate, VerifiedCandidate};
use crate::utils::format_optional;

pub use catalog::{CatalogMatch, CatalogMatcher, GaiaCatalog, SimulatedCatalog};
use checks::{aperture_flux, flux_consistency, has_counterpart, spike_check, ImageCache};

pub const HIGH_PRIORITY: f64 = 0.75;
pub const MEDIUM_PRIORITY: f64 = 0.5;
const ARTIFACT_ECCENTRICITY: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct CrossFilterResult {
    pub status: String,
    pub matches: usize,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotometryResult {
    pub status: String,
    pub flux_ratio: Option<f64>,
    pub n_filters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PsfResult {
    pub status: String,
    pub is_spike: bool,
    pub is_artifact: bool,
    pub peak: Option<f64>,
}

/// Look for the candidate in the other filters of its observation
pub fn check_cross_filter(
    candidate: &RankedCandidate,
    manifest: &[ManifestRow],
    layout: &ProjectLayout,
    cache: &mut ImageCache,
) -> CrossFilterResult {
    let Some((ra, dec)) = candidate.coordinates() else {
        return CrossFilterResult {
            status: "no_coords".to_string(),
            matches: 0,
            filters: Vec::new(),
        };
    };

    let mut filters = Vec::new();
    for row in manifest
        .iter()
        .filter(|r| r.obs_id == candidate.obs_id && r.filter != candidate.filter)
    {
        let path = layout.resolve(&row.file);
        if !path.exists() {
            continue;
        }
        if let Ok(loaded) = cache.get(&path) {
            if has_counterpart(loaded, ra, dec) {
                filters.push(row.filter.clone());
            }
        }
    }

    let matches = filters.len();
    CrossFilterResult {
        status: if matches > 0 {
            format!("{} filter(s)", matches)
        } else {
            "single filter".to_string()
        },
        matches,
        filters,
    }
}

/// Compare aperture fluxes across every file of the candidate's observation
pub fn check_photometry(
    candidate: &RankedCandidate,
    manifest: &[ManifestRow],
    layout: &ProjectLayout,
    cache: &mut ImageCache,
) -> PhotometryResult {
    let Some((ra, dec)) = candidate.coordinates() else {
        return PhotometryResult {
            status: "no_coords".to_string(),
            flux_ratio: None,
            n_filters: 0,
        };
    };

    let mut fluxes = Vec::new();
    for row in manifest.iter().filter(|r| r.obs_id == candidate.obs_id) {
        let path = layout.resolve(&row.file);
        if !path.exists() {
            continue;
        }
        if let Some(flux) = cache
            .get(&path)
            .ok()
            .and_then(|loaded| aperture_flux(&loaded.image, ra, dec))
        {
            fluxes.push(flux);
        }
    }

    let (status, flux_ratio) = flux_consistency(&fluxes);
    PhotometryResult {
        status: status.to_string(),
        flux_ratio,
        n_filters: fluxes.len(),
    }
}

/// Diffraction-spike and artifact screening in the candidate's own image
pub fn check_psf(
    candidate: &RankedCandidate,
    layout: &ProjectLayout,
    cache: &mut ImageCache,
) -> PsfResult {
    let result = |status: &str| PsfResult {
        status: status.to_string(),
        is_spike: false,
        is_artifact: false,
        peak: None,
    };

    let path = layout.resolve(&candidate.file);
    if !path.exists() {
        return result("file_not_found");
    }
    let Some((x, y)) = candidate.pixel_position() else {
        return result("no_position");
    };
    let loaded = match cache.get(&path) {
        Ok(loaded) => loaded,
        Err(e) => return result(&format!("error: {}", e.chars().take(30).collect::<String>())),
    };
    let Some(spike) = spike_check(&loaded.image, x, y) else {
        return result("out_of_bounds");
    };

    let eccentric = candidate
        .eccentricity
        .is_some_and(|e| e > ARTIFACT_ECCENTRICITY);
    PsfResult {
        status: "analyzed".to_string(),
        is_spike: spike.is_spike,
        is_artifact: eccentric || candidate.active_flags().is_some(),
        peak: spike.peak.is_finite().then_some(spike.peak),
    }
}

/// Fraction of the four checks passed
pub fn verification_score(
    cross_filter: &CrossFilterResult,
    catalog: &CatalogMatch,
    photometry: &PhotometryResult,
    psf: &PsfResult,
) -> f64 {
    let passed = [
        cross_filter.matches >= 1,
        !catalog.is_known_object,
        photometry.status == "consistent",
        !psf.is_artifact && !psf.is_spike,
    ];
    passed.iter().filter(|&&p| p).count() as f64 / passed.len() as f64
}

/// Run every check on the first `top_n` candidates, best verified first
pub fn verify_candidates(
    ranked: &[RankedCandidate],
    manifest: &[ManifestRow],
    layout: &ProjectLayout,
    matcher: &mut dyn CatalogMatcher,
    top_n: usize,
) -> Vec<VerifiedCandidate> {
    let candidates = &ranked[..ranked.len().min(top_n)];
    let mut cache = ImageCache::new();

    tracing::info!("Step 1: cross-filter verification");
    let cross: Vec<CrossFilterResult> = candidates
        .iter()
        .map(|c| check_cross_filter(c, manifest, layout, &mut cache))
        .collect();

    tracing::info!("Step 2: catalog cross-match ({})", matcher.name());
    let catalog: Vec<CatalogMatch> = candidates
        .iter()
        .map(|c| {
            matcher.match_position(c.coordinates()).unwrap_or_else(|e| {
                tracing::warn!("Catalog match failed for candidate #{}: {:#}", c.rank, e);
                CatalogMatch {
                    kind: "error".to_string(),
                    separation_arcsec: None,
                    is_known_object: false,
                }
            })
        })
        .collect();

    tracing::info!("Step 3: photometric consistency");
    let photometry: Vec<PhotometryResult> = candidates
        .iter()
        .map(|c| check_photometry(c, manifest, layout, &mut cache))
        .collect();

    tracing::info!("Step 4: PSF/artifact analysis");
    let psf: Vec<PsfResult> = candidates
        .iter()
        .map(|c| check_psf(c, layout, &mut cache))
        .collect();

    let mut verified: Vec<VerifiedCandidate> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| VerifiedCandidate {
            rank: c.rank,
            verification_score: verification_score(&cross[i], &catalog[i], &photometry[i], &psf[i]),
            composite_score: c.composite_score,
            anomaly_score: c.anomaly_score,
            source_type: c.source_type,
            file: c.file.clone(),
            obs_id: c.obs_id.clone(),
            filter: c.filter.clone(),
            ra: c.ra,
            dec: c.dec,
            snr: c.snr,
            cross_filter: cross[i].status.clone(),
            cross_filter_matches: cross[i].matches,
            match_filters: if cross[i].filters.is_empty() {
                "none".to_string()
            } else {
                cross[i].filters.join(",")
            },
            catalog_match: catalog[i].kind.clone(),
            separation_arcsec: catalog[i].separation_arcsec,
            is_known_object: catalog[i].is_known_object,
            photometric_consistency: photometry[i].status.clone(),
            flux_ratio: photometry[i].flux_ratio,
            n_filters: photometry[i].n_filters,
            psf_analysis: psf[i].status.clone(),
            is_psf_spike: psf[i].is_spike,
            is_artifact: psf[i].is_artifact,
            peak_flux: psf[i].peak,
        })
        .collect();

    verified.sort_by(|a, b| b.verification_score.total_cmp(&a.verification_score));
    verified
}

fn status_label(candidate: &VerifiedCandidate) -> &'static str {
    if candidate.is_clean() {
        "Clean"
    } else {
        "Flagged"
    }
}

fn write_verification_report(out: &mut String, verified: &[VerifiedCandidate]) -> std::fmt::Result {
    writeln!(out, "# Candidate Verification Report")?;
    writeln!(out)?;
    writeln!(out, "This report provides verification analysis for top anomaly candidates.")?;
    writeln!(out)?;
    writeln!(out, "## Verification Criteria")?;
    writeln!(out)?;
    writeln!(out, "1. **Cross-Filter Presence**: Candidate appears in multiple filters")?;
    writeln!(out, "2. **Catalog Cross-Match**: Check against known catalogs (SIMBAD, Gaia)")?;
    writeln!(out, "3. **Photometric Consistency**: Flux scales reasonably across filters")?;
    writeln!(out, "4. **PSF/Artifact Check**: Not a diffraction spike or known artifact")?;
    writeln!(out)?;

    writeln!(out, "## Verification Results")?;
    writeln!(out)?;
    writeln!(
        out,
        "| Rank | Verification Score | Cross-Filter | Catalog Match | Photometry | Artifact Check |"
    )?;
    writeln!(
        out,
        "|------|-------------------|--------------|---------------|------------|----------------|"
    )?;
    for c in verified {
        writeln!(
            out,
            "| {} | {:.2} | {} | {} | {} | {} |",
            c.rank,
            c.verification_score,
            c.cross_filter,
            c.catalog_match,
            c.photometric_consistency,
            status_label(c)
        )?;
    }
    writeln!(out)?;

    writeln!(out, "## Top Verified Candidates")?;
    writeln!(out)?;
    for c in verified.iter().take(10) {
        writeln!(out, "### Candidate #{}", c.rank)?;
        writeln!(out)?;
        writeln!(out, "- **Verification Score**: {:.2}/1.00", c.verification_score)?;
        writeln!(out, "- **SNR**: {}", format_optional(c.snr, 1))?;
        writeln!(out, "- **Composite Score**: {:.3}", c.composite_score)?;
        match (c.ra, c.dec) {
            (Some(ra), Some(dec)) => {
                writeln!(out, "- **Coordinates**: RA={:.6}°, Dec={:.6}°", ra, dec)?
            }
            _ => writeln!(out, "- **Coordinates**: N/A")?,
        }
        writeln!(out, "- **Cross-Filter**: {}", c.cross_filter)?;
        writeln!(out, "- **Catalog Match**: {}", c.catalog_match)?;
        writeln!(out, "- **Photometry**: {}", c.photometric_consistency)?;
        writeln!(out, "- **Artifact Status**: {}", status_label(c))?;
        writeln!(out)?;
    }

    writeln!(out, "## Recommendations")?;
    writeln!(out)?;
    writeln!(out, "### High Priority (Verification Score > 0.75)")?;
    let high: Vec<&VerifiedCandidate> = verified
        .iter()
        .filter(|c| c.verification_score > HIGH_PRIORITY)
        .collect();
    if high.is_empty() {
        writeln!(out, "- No candidates meet high priority threshold")?;
    }
    for c in high {
        writeln!(out, "- **Candidate #{}**: Strong candidate for follow-up observation", c.rank)?;
    }
    writeln!(out)?;

    writeln!(out, "### Medium Priority (Verification Score 0.5-0.75)")?;
    let medium = verified
        .iter()
        .filter(|c| (MEDIUM_PRIORITY..=HIGH_PRIORITY).contains(&c.verification_score))
        .count();
    if medium > 0 {
        writeln!(out, "- {} candidates require additional verification", medium)?;
    }
    writeln!(out)?;

    writeln!(out, "### Low Priority (Verification Score < 0.5)")?;
    let low = verified
        .iter()
        .filter(|c| c.verification_score < MEDIUM_PRIORITY)
        .count();
    if low > 0 {
        writeln!(out, "- {} candidates likely artifacts or need more data", low)?;
    }
    Ok(())
}

/// Build the `VERIFICATION.md` text
pub fn render_verification_report(verified: &[VerifiedCandidate]) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    write_verification_report(&mut out, verified).ok();
    out
}
