//! Access to the MAST archive: observation search, product lists, downloads.

pub mod mast;
pub mod retry;
pub mod selection;

use serde::{Deserialize, Deserializer};
use std::path::Path;

pub use mast::MastClient;
pub use retry::with_retry;
pub use selection::{
    estimate_size_gb, filter_products, plan_downloads, select_observations, DownloadBudget,
};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Archive service error: {0}")]
    Service(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiveError::Connection(_) | ArchiveError::Timeout | ArchiveError::Http(_) => true,
            ArchiveError::Status { status, .. } => *status >= 500 || *status == 429,
            ArchiveError::Service(_) | ArchiveError::Parse(_) | ArchiveError::Io(_) => false,
        }
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ArchiveError::Timeout
        } else if err.is_connect() {
            ArchiveError::Connection(err.to_string())
        } else if err.is_decode() {
            ArchiveError::Parse(err.to_string())
        } else {
            ArchiveError::Http(err.to_string())
        }
    }
}

/// One row of a CAOM observation search
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Observation {
    /// Numeric archive key used for product queries
    #[serde(default, deserialize_with = "lenient_string")]
    pub obsid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub obs_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub obs_collection: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub instrument_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filters: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub t_exptime: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub t_min: Option<f64>,
}

impl Observation {
    pub fn is_jwst(&self) -> bool {
        self.obs_collection.trim().eq_ignore_ascii_case("JWST")
    }
}

/// One downloadable file belonging to an observation
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Product {
    #[serde(rename = "obsID", default, deserialize_with = "lenient_string")]
    pub obsid: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub obs_id: String,
    #[serde(rename = "productFilename", default, deserialize_with = "lenient_string")]
    pub filename: String,
    #[serde(rename = "dataURI", default, deserialize_with = "lenient_string")]
    pub data_uri: String,
    #[serde(rename = "productSubGroupDescription", default, deserialize_with = "lenient_string")]
    pub product_type: String,
    /// Kept raw: the archive sends numbers, strings or nulls here
    #[serde(default, deserialize_with = "lenient_string")]
    pub calib_level: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub instrument_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filters: String,
}

impl Product {
    pub fn calib_level(&self) -> Option<i32> {
        let text = self.calib_level.trim();
        text.parse::<i32>()
            .ok()
            .or_else(|| text.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i32))
    }
}

/// A product accepted for download, with the observation context the
/// manifest needs
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedDownload {
    pub obs_id: String,
    pub instrument: String,
    pub filter: String,
    pub product: Product,
    pub estimated_gb: f64,
}

/// Archive operations used by the downloader
pub trait Archive {
    /// Resolve an object name to (ra, dec) in degrees
    fn resolve_name(&self, name: &str) -> Result<(f64, f64), ArchiveError>;

    /// JWST observations within `radius_deg` of a position
    fn query_region(&self, ra: f64, dec: f64, radius_deg: f64)
        -> Result<Vec<Observation>, ArchiveError>;

    fn products(&self, observation: &Observation) -> Result<Vec<Product>, ArchiveError>;

    /// Fetch one product to `dest`, returning the bytes on disk
    fn download(&self, product: &Product, dest: &Path) -> Result<u64, ArchiveError>;
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|v: &f64| v.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_from_mixed_json() {
        let obs: Observation = serde_json::from_str(
            r#"{"obsid": 87602009, "obs_id": "jw01234-o001_t001_nircam_clear-f200w",
                "obs_collection": "JWST", "instrument_name": "NIRCAM/IMAGE",
                "filters": "F200W", "t_exptime": "1503.2", "t_min": null}"#,
        )
        .unwrap();
        assert_eq!(obs.obsid, "87602009");
        assert_eq!(obs.t_exptime, Some(1503.2));
        assert_eq!(obs.t_min, None);
        assert!(obs.is_jwst());
    }

    #[test]
    fn test_product_calib_level_parsing() {
        let mut product: Product = serde_json::from_str(
            r#"{"obsID": "1", "productFilename": "a_i2d.fits", "calib_level": 3, "size": 0}"#,
        )
        .unwrap();
        assert_eq!(product.calib_level(), Some(3));
        assert_eq!(product.size, Some(0.0));

        product.calib_level = "2.0".to_string();
        assert_eq!(product.calib_level(), Some(2));
        product.calib_level = "n/a".to_string();
        assert_eq!(product.calib_level(), None);
        product.calib_level = String::new();
        assert_eq!(product.calib_level(), None);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ArchiveError::Timeout.is_retryable());
        assert!(ArchiveError::Status {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!ArchiveError::Status {
            status: 404,
            message: String::new()
        }
        .is_retryable());
        assert!(!ArchiveError::Parse("bad".into()).is_retryable());
    }
}
