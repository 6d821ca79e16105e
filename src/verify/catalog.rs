//! Catalog cross-matching of candidate positions.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::time::Duration;

use crate::wcs::angular_distance;

const GAIA_TAP_URL: &str = "https://gea.esac.esa.int/tap-server/tap/sync";

/// Outcome of matching one position against a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMatch {
    /// Object class of the match, or `no_match` / `no_coords`
    pub kind: String,
    pub separation_arcsec: Option<f64>,
    pub is_known_object: bool,
}

impl CatalogMatch {
    pub fn no_match() -> Self {
        Self {
            kind: "no_match".to_string(),
            separation_arcsec: None,
            is_known_object: false,
        }
    }

    pub fn no_coords() -> Self {
        Self {
            kind: "no_coords".to_string(),
            separation_arcsec: None,
            is_known_object: false,
        }
    }
}

/// Source of known-object matches for candidate positions
pub trait CatalogMatcher {
    fn name(&self) -> &str;

    /// Match a candidate. Called once per candidate in rank order.
    fn match_position(&mut self, coordinates: Option<(f64, f64)>) -> Result<CatalogMatch>;
}

/// Stand-in catalog that declares a random 10% of candidates known.
///
/// One draw sequence per candidate regardless of coordinates, so results
/// depend only on the seed and candidate order.
pub struct SimulatedCatalog {
    rng: StdRng,
}

impl SimulatedCatalog {
    pub const DEFAULT_SEED: u64 = 42;
    pub const MATCH_PROBABILITY: f64 = 0.1;

    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedCatalog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SEED)
    }
}

impl CatalogMatcher for SimulatedCatalog {
    fn name(&self) -> &str {
        "simulated"
    }

    fn match_position(&mut self, _coordinates: Option<(f64, f64)>) -> Result<CatalogMatch> {
        if self.rng.gen::<f64>() >= Self::MATCH_PROBABILITY {
            return Ok(CatalogMatch::no_match());
        }
        let u: f64 = self.rng.gen();
        let kind = if u < 0.6 {
            "star"
        } else if u < 0.9 {
            "galaxy"
        } else {
            "unknown"
        };
        Ok(CatalogMatch {
            kind: kind.to_string(),
            separation_arcsec: Some(self.rng.gen_range(0.1..2.0)),
            is_known_object: true,
        })
    }
}

/// Nearest Gaia DR3 source within a search radius, via the ESA TAP service
pub struct GaiaCatalog {
    client: reqwest::blocking::Client,
    radius_arcsec: f64,
}

impl GaiaCatalog {
    pub fn new(radius_arcsec: f64, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            radius_arcsec,
        })
    }

    fn query(&self, ra: f64, dec: f64) -> Result<Vec<(f64, f64)>> {
        let adql = format!(
            r#"
            SELECT ra, dec
            FROM gaiadr3.gaia_source
            WHERE 1 = CONTAINS(
                POINT('ICRS', ra, dec),
                CIRCLE('ICRS', {}, {}, {})
            )
            "#,
            ra,
            dec,
            self.radius_arcsec / 3600.0
        );

        let response = self
            .client
            .post(GAIA_TAP_URL)
            .form(&[
                ("REQUEST", "doQuery"),
                ("LANG", "ADQL"),
                ("FORMAT", "json"),
                ("QUERY", &adql),
            ])
            .send()
            .context("Failed to query Gaia")?;

        if !response.status().is_success() {
            anyhow::bail!("Gaia query failed: {}", response.status());
        }

        let data: GaiaResponse = response.json().context("Failed to parse Gaia response")?;
        Ok(data
            .data
            .into_iter()
            .filter_map(|row| match row.as_slice() {
                [Some(ra), Some(dec), ..] => Some((*ra, *dec)),
                _ => None,
            })
            .collect())
    }
}

impl CatalogMatcher for GaiaCatalog {
    fn name(&self) -> &str {
        "gaia"
    }

    fn match_position(&mut self, coordinates: Option<(f64, f64)>) -> Result<CatalogMatch> {
        let Some((ra, dec)) = coordinates else {
            return Ok(CatalogMatch::no_coords());
        };
        let sources = self.query(ra, dec)?;
        Ok(nearest_match(ra, dec, &sources, self.radius_arcsec, "gaia_source"))
    }
}

/// Closest catalog source within `radius_arcsec` of (ra, dec)
pub fn nearest_match(
    ra: f64,
    dec: f64,
    sources: &[(f64, f64)],
    radius_arcsec: f64,
    kind: &str,
) -> CatalogMatch {
    sources
        .iter()
        .map(|&(sra, sdec)| angular_distance(ra, dec, sra, sdec) * 3600.0)
        .filter(|sep| *sep <= radius_arcsec)
        .min_by(|a, b| a.total_cmp(b))
        .map(|sep| CatalogMatch {
            kind: kind.to_string(),
            separation_arcsec: Some(sep),
            is_known_object: true,
        })
        .unwrap_or_else(CatalogMatch::no_match)
}

#[derive(Debug, Deserialize)]
struct GaiaResponse {
    data: Vec<Vec<Option<f64>>>,
}
