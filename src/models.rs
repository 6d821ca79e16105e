use serde::{Deserialize, Serialize};

/// One downloaded file, as recorded in `download_manifest.csv`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestRow {
    pub file: String,
    pub obs_id: String,
    pub instrument: String,
    pub filter: String,
    pub product_type: String,
    pub calib_level: i32,
    pub size_gb: f64,
}

/// A detected image source with its morphology features.
///
/// The same row shape is used for `all_sources.csv` and for the image
/// candidate table; scoring and cutout columns are empty until filled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRow {
    pub file: String,
    pub obs_id: String,
    pub instrument: String,
    pub filter: String,
    pub x: f64,
    pub y: f64,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub flux: Option<f64>,
    pub flux_err: Option<f64>,
    pub peak: f64,
    pub snr: f64,
    pub concentration: f64,
    pub asymmetry: f64,
    pub edge_density: f64,
    pub eccentricity: f64,
    pub has_nan: bool,
    pub flags: String,
    pub anomaly_score: Option<f64>,
    pub is_anomaly: Option<bool>,
    pub cutout_path: Option<String>,
    pub key_features: Option<String>,
}

impl SourceRow {
    /// Feature vector fed to the outlier model
    pub fn features(&self) -> Vec<f64> {
        vec![
            self.snr,
            self.concentration,
            self.asymmetry,
            self.edge_density,
            self.eccentricity,
        ]
    }

    pub fn describe_features(&self) -> String {
        format!(
            "SNR={:.1}, ecc={:.2}, asym={:.2}",
            self.snr, self.eccentricity, self.asymmetry
        )
    }
}

/// Spectrum-level features, one row per analyzed spectrum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpectrumRow {
    pub file: String,
    pub obs_id: String,
    pub instrument: String,
    pub filter: String,
    pub wavelength_min: f64,
    pub wavelength_max: f64,
    pub plot_path: Option<String>,
    pub continuum_slope: f64,
    pub mean_flux: f64,
    pub flux_variance: f64,
    pub n_lines: usize,
    pub mean_line_snr: f64,
    pub max_line_snr: f64,
    pub total_line_flux: f64,
    pub wavelength_range: f64,
    pub anomaly_score: Option<f64>,
}

impl SpectrumRow {
    pub fn features(&self) -> Vec<f64> {
        vec![
            self.continuum_slope,
            self.mean_flux,
            self.n_lines as f64,
            self.mean_line_snr,
            self.wavelength_range,
        ]
    }
}

/// One fitted emission line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineRow {
    pub file: String,
    pub obs_id: String,
    pub wavelength: f64,
    pub amplitude: f64,
    pub width: f64,
    pub snr: f64,
    pub equivalent_width: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Image,
    Spectrum,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Image => "image",
            SourceType::Spectrum => "spectrum",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate from either analyzer after ranking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedCandidate {
    pub rank: usize,
    pub composite_score: f64,
    pub anomaly_score: f64,
    pub anomaly_score_norm: f64,
    pub source_type: SourceType,
    pub file: String,
    pub obs_id: String,
    pub instrument: String,
    pub filter: String,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub snr: Option<f64>,
    pub max_line_snr: Option<f64>,
    pub flags: Option<String>,
    pub key_features: Option<String>,
    pub cutout_path: Option<String>,
    pub plot_path: Option<String>,
    pub eccentricity: Option<f64>,
    pub asymmetry: Option<f64>,
    pub concentration: Option<f64>,
    pub n_lines: Option<usize>,
}

impl RankedCandidate {
    pub fn from_source(row: &SourceRow) -> Self {
        Self {
            rank: 0,
            composite_score: 0.0,
            anomaly_score: row.anomaly_score.unwrap_or(0.0),
            anomaly_score_norm: 0.0,
            source_type: SourceType::Image,
            file: row.file.clone(),
            obs_id: row.obs_id.clone(),
            instrument: row.instrument.clone(),
            filter: row.filter.clone(),
            ra: row.ra,
            dec: row.dec,
            x: Some(row.x),
            y: Some(row.y),
            snr: Some(row.snr),
            max_line_snr: None,
            flags: Some(row.flags.clone()),
            key_features: row.key_features.clone(),
            cutout_path: row.cutout_path.clone(),
            plot_path: None,
            eccentricity: Some(row.eccentricity),
            asymmetry: Some(row.asymmetry),
            concentration: Some(row.concentration),
            n_lines: None,
        }
    }

    pub fn from_spectrum(row: &SpectrumRow) -> Self {
        Self {
            rank: 0,
            composite_score: 0.0,
            anomaly_score: row.anomaly_score.unwrap_or(0.0),
            anomaly_score_norm: 0.0,
            source_type: SourceType::Spectrum,
            file: row.file.clone(),
            obs_id: row.obs_id.clone(),
            instrument: row.instrument.clone(),
            filter: row.filter.clone(),
            ra: None,
            dec: None,
            x: None,
            y: None,
            snr: None,
            max_line_snr: Some(row.max_line_snr),
            flags: None,
            key_features: Some(format!(
                "lines={}, max_line_snr={:.1}, slope={:.3e}",
                row.n_lines, row.max_line_snr, row.continuum_slope
            )),
            cutout_path: None,
            plot_path: row.plot_path.clone(),
            eccentricity: None,
            asymmetry: None,
            concentration: None,
            n_lines: Some(row.n_lines),
        }
    }

    /// Signal-to-noise used for ranking. Source SNR is the measure whenever
    /// image candidates are present, so spectra score 0 there; the strongest
    /// line SNR is only used for spectrum-only rankings.
    pub fn ranking_snr(&self, spectra_only: bool) -> f64 {
        let value = if spectra_only { self.max_line_snr } else { self.snr };
        value.filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    /// Non-trivial flag string, if any
    pub fn active_flags(&self) -> Option<&str> {
        self.flags
            .as_deref()
            .filter(|f| !f.is_empty() && *f != "none")
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.ra, self.dec) {
            (Some(ra), Some(dec)) if ra.is_finite() && dec.is_finite() => Some((ra, dec)),
            _ => None,
        }
    }

    pub fn pixel_position(&self) -> Option<(f64, f64)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Some((x, y)),
            _ => None,
        }
    }
}

/// Result of the verification checks for one ranked candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifiedCandidate {
    pub rank: usize,
    pub verification_score: f64,
    pub composite_score: f64,
    pub anomaly_score: f64,
    pub source_type: SourceType,
    pub file: String,
    pub obs_id: String,
    pub filter: String,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub snr: Option<f64>,
    pub cross_filter: String,
    pub cross_filter_matches: usize,
    pub match_filters: String,
    pub catalog_match: String,
    pub separation_arcsec: Option<f64>,
    pub is_known_object: bool,
    pub photometric_consistency: String,
    pub flux_ratio: Option<f64>,
    pub n_filters: usize,
    pub psf_analysis: String,
    pub is_psf_spike: bool,
    pub is_artifact: bool,
    pub peak_flux: Option<f64>,
}

impl VerifiedCandidate {
    pub fn is_clean(&self) -> bool {
        !self.is_artifact && !self.is_psf_spike
    }
}
