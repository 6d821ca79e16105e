use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the observation search is anchored on the sky
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// Resolve `target_name` through the archive name lookup
    Object,
    /// Use `ra_deg` / `dec_deg` directly
    Region,
}

impl std::fmt::Display for TargetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetMode::Object => write!(f, "object"),
            TargetMode::Region => write!(f, "region"),
        }
    }
}

/// Which catalog the verifier cross-matches candidates against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Simulated,
    Gaia,
}

/// Top-level pipeline configuration, normally read from `config.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub target_name: String,
    pub target_mode: TargetMode,
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,
    pub radius_deg: f64,
    pub max_obs: usize,
    pub instruments_allowlist: Vec<String>,
    pub product_types_image: Vec<String>,
    pub product_types_spectra: Vec<String>,
    pub max_total_gb: f64,
    pub max_files: usize,
    pub random_seed: u64,
    pub analysis: AnalysisConfig,
    pub archive: ArchiveConfig,
    pub verification: VerificationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_name: "M82".to_string(),
            target_mode: TargetMode::Object,
            ra_deg: Some(148.968458),
            dec_deg: Some(69.679694),
            radius_deg: 0.05,
            max_obs: 5,
            instruments_allowlist: vec!["NIRCAM".to_string(), "MIRI".to_string()],
            product_types_image: vec!["I2D".to_string()],
            product_types_spectra: vec!["X1D".to_string()],
            max_total_gb: 5.0,
            max_files: 20,
            random_seed: 42,
            analysis: AnalysisConfig::default(),
            archive: ArchiveConfig::default(),
            verification: VerificationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Detection threshold in units of background rms
    pub detection_threshold: f64,
    /// Minimum connected pixels for a detection
    pub min_area: usize,
    pub border_pixels: f64,
    pub max_ellipticity: f64,
    pub min_snr: f64,
    /// Half-size of the morphology cutout in pixels
    pub cutout_size: usize,
    pub isolation_forest_contamination: f64,
    pub top_anomalies_per_image: usize,
    /// Images with this many sources or fewer are not scored
    pub min_sources_for_scoring: usize,
    pub spectra_contamination: f64,
    pub min_spectra_for_scoring: usize,
    pub top_spectral_candidates: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 3.0,
            min_area: 5,
            border_pixels: 50.0,
            max_ellipticity: 0.9,
            min_snr: 5.0,
            cutout_size: 25,
            isolation_forest_contamination: 0.05,
            top_anomalies_per_image: 10,
            min_sources_for_scoring: 10,
            spectra_contamination: 0.2,
            min_spectra_for_scoring: 5,
            top_spectral_candidates: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub download_url: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub page_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://mast.stsci.edu/api/v0".to_string(),
            download_url: "https://mast.stsci.edu/api/v0.1/Download/file".to_string(),
            timeout_secs: 120,
            max_retries: 2,
            retry_delay_ms: 1000,
            page_size: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Number of ranked candidates that go through verification
    pub top_n: usize,
    pub catalog: CatalogKind,
    pub catalog_radius_arcsec: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            top_n: 20,
            catalog: CatalogKind::Simulated,
            catalog_radius_arcsec: 2.0,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_yaml(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a mapping
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.radius_deg <= 0.0 {
            anyhow::bail!("radius_deg must be positive (got {})", self.radius_deg);
        }
        if self.max_total_gb <= 0.0 {
            anyhow::bail!("max_total_gb must be positive (got {})", self.max_total_gb);
        }
        if self.max_files == 0 || self.max_obs == 0 {
            anyhow::bail!("max_files and max_obs must be at least 1");
        }
        if self.target_mode == TargetMode::Region && self.coordinates().is_none() {
            anyhow::bail!("target_mode 'region' requires ra_deg and dec_deg");
        }
        if self.target_mode == TargetMode::Object && self.target_name.trim().is_empty() {
            anyhow::bail!("target_mode 'object' requires target_name");
        }

        let a = &self.analysis;
        for (name, value) in [
            ("isolation_forest_contamination", a.isolation_forest_contamination),
            ("spectra_contamination", a.spectra_contamination),
        ] {
            if !(value > 0.0 && value <= 0.5) {
                anyhow::bail!("{} must be in (0, 0.5] (got {})", name, value);
            }
        }
        if a.detection_threshold <= 0.0 {
            anyhow::bail!("analysis.detection_threshold must be positive");
        }
        if a.cutout_size < 3 {
            anyhow::bail!("analysis.cutout_size must be at least 3 pixels");
        }
        if a.min_area == 0 {
            anyhow::bail!("analysis.min_area must be at least 1 pixel");
        }

        Ok(())
    }

    /// Configured RA/Dec pair, if both are present
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.ra_deg, self.dec_deg) {
            (Some(ra), Some(dec)) => Some((ra, dec)),
            _ => None,
        }
    }

    pub fn is_image_product(&self, product_type: &str) -> bool {
        matches_product_type(&self.product_types_image, product_type)
    }

    pub fn is_spectrum_product(&self, product_type: &str) -> bool {
        matches_product_type(&self.product_types_spectra, product_type)
    }
}

/// Case-insensitive, whitespace-tolerant product type match
pub fn matches_product_type(types: &[String], product_type: &str) -> bool {
    let wanted = product_type.trim();
    types.iter().any(|t| t.trim().eq_ignore_ascii_case(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analysis.cutout_size, 25);
        assert_eq!(config.verification.catalog, CatalogKind::Simulated);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
target_name: "NGC 628"
target_mode: region
ra_deg: 24.174
dec_deg: 15.783
analysis:
  detection_threshold: 5.0
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.target_name, "NGC 628");
        assert_eq!(config.target_mode, TargetMode::Region);
        assert_eq!(config.coordinates(), Some((24.174, 15.783)));
        assert_eq!(config.analysis.detection_threshold, 5.0);
        // Untouched nested fields keep their defaults
        assert_eq!(config.analysis.min_area, 5);
        assert_eq!(config.max_files, 20);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = PipelineConfig::from_yaml("  \n").unwrap();
        assert_eq!(config.target_name, "M82");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = PipelineConfig::default();
        let text = config.to_yaml().unwrap();
        let back = PipelineConfig::from_yaml(&text).unwrap();
        assert_eq!(back.random_seed, config.random_seed);
        assert_eq!(back.product_types_image, config.product_types_image);
    }

    #[test]
    fn test_region_mode_requires_coordinates() {
        let config = PipelineConfig {
            target_mode: TargetMode::Region,
            ra_deg: None,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_contamination_bounds() {
        let mut config = PipelineConfig::default();
        config.analysis.isolation_forest_contamination = 0.7;
        assert!(config.validate().is_err());
        config.analysis.isolation_forest_contamination = 0.0;
        assert!(config.validate().is_err());
        config.analysis.isolation_forest_contamination = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_product_type_matching() {
        let config = PipelineConfig::default();
        assert!(config.is_image_product("I2D"));
        assert!(config.is_image_product(" i2d "));
        assert!(!config.is_image_product("CAL"));
        assert!(config.is_spectrum_product("x1d"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = PipelineConfig::load(Path::new("/nonexistent/config.yaml")).unwrap();
        assert_eq!(config.random_seed, 42);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "max_obs: [not, a, number]\n").unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = PipelineConfig::from_yaml(include_str!("../config.yaml")).unwrap();
        shipped.validate().unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(shipped.to_yaml().unwrap(), defaults.to_yaml().unwrap());
    }
}
