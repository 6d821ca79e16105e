//! Choosing which observations and products to fetch.

use std::cmp::Ordering;

use super::{Observation, PlannedDownload, Product};
use crate::config::PipelineConfig;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const I2D_SIZE_GUESS: f64 = 100.0 * 1024.0 * 1024.0;
const OTHER_SIZE_GUESS: f64 = 10.0 * 1024.0 * 1024.0;

fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn instrument_allowed(instrument: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    // Archive names carry a mode suffix, e.g. NIRCAM/IMAGE
    let base = instrument.split('/').next().unwrap_or(instrument).trim();
    allowlist.iter().any(|allowed| {
        let allowed = allowed.trim();
        allowed.eq_ignore_ascii_case(instrument.trim()) || allowed.eq_ignore_ascii_case(base)
    })
}

/// Keep JWST observations, longest exposures first (start time when no
/// exposure times are present), truncated to `max_obs`, then restricted
/// to the instrument allowlist.
pub fn select_observations(
    observations: Vec<Observation>,
    max_obs: usize,
    allowlist: &[String],
) -> Vec<Observation> {
    let mut jwst: Vec<Observation> = observations.into_iter().filter(|o| o.is_jwst()).collect();

    if jwst.iter().any(|o| o.t_exptime.is_some()) {
        jwst.sort_by(|a, b| descending(a.t_exptime, b.t_exptime));
    } else if jwst.iter().any(|o| o.t_min.is_some()) {
        jwst.sort_by(|a, b| descending(a.t_min, b.t_min));
    }
    jwst.truncate(max_obs);

    jwst.into_iter()
        .filter(|o| instrument_allowed(&o.instrument_name, allowlist))
        .collect()
}

/// Products of a configured image/spectrum type at calibration level 2 or
/// higher. Products with an unreadable level are dropped.
pub fn filter_products(products: Vec<Product>, config: &PipelineConfig) -> Vec<Product> {
    products
        .into_iter()
        .filter(|p| {
            config.is_image_product(&p.product_type) || config.is_spectrum_product(&p.product_type)
        })
        .filter(|p| p.calib_level().is_some_and(|level| level >= 2))
        .collect()
}

/// Size of a product in GiB, guessed from its type when the archive does
/// not report one
pub fn estimate_size_gb(product: &Product) -> f64 {
    let bytes = match product.size {
        Some(size) if size > 0.0 => size,
        _ if product.product_type.to_ascii_uppercase().contains("I2D") => I2D_SIZE_GUESS,
        _ => OTHER_SIZE_GUESS,
    };
    bytes / BYTES_PER_GB
}

/// Running limits on how much is downloaded
#[derive(Debug, Clone)]
pub struct DownloadBudget {
    max_total_gb: f64,
    max_files: usize,
    total_gb: f64,
    files: usize,
}

impl DownloadBudget {
    pub fn new(max_total_gb: f64, max_files: usize) -> Self {
        Self {
            max_total_gb,
            max_files,
            total_gb: 0.0,
            files: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.files >= self.max_files
    }

    pub fn total_gb(&self) -> f64 {
        self.total_gb
    }

    pub fn files(&self) -> usize {
        self.files
    }

    /// Reserve room for one product; false when it does not fit
    pub fn try_reserve(&mut self, size_gb: f64) -> bool {
        if self.is_full() || self.total_gb + size_gb > self.max_total_gb {
            return false;
        }
        self.total_gb += size_gb;
        self.files += 1;
        true
    }
}

/// Accept an observation's products while the budget allows. A product too
/// large for the remaining space is skipped; later smaller ones may still fit.
pub fn plan_downloads(
    budget: &mut DownloadBudget,
    observation: &Observation,
    products: Vec<Product>,
) -> Vec<PlannedDownload> {
    let mut planned = Vec::new();
    for product in products {
        if budget.is_full() {
            break;
        }
        let estimated_gb = estimate_size_gb(&product);
        if !budget.try_reserve(estimated_gb) {
            tracing::debug!(
                "Skipping {} ({:.3} GB): over budget",
                product.filename,
                estimated_gb
            );
            continue;
        }
        let pick = |own: &str, fallback: &str| {
            if own.trim().is_empty() {
                fallback.to_string()
            } else {
                own.to_string()
            }
        };
        planned.push(PlannedDownload {
            obs_id: pick(&observation.obs_id, &product.obs_id),
            instrument: pick(&product.instrument_name, &observation.instrument_name),
            filter: pick(&product.filters, &observation.filters),
            estimated_gb,
            product,
        });
    }
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(
        obs_id: &str,
        instrument: &str,
        exptime: Option<f64>,
        t_min: Option<f64>,
    ) -> Observation {
        Observation {
            obsid: format!("{}-key", obs_id),
            obs_id: obs_id.to_string(),
            obs_collection: "JWST".to_string(),
            instrument_name: instrument.to_string(),
            filters: "F200W".to_string(),
            t_exptime: exptime,
            t_min,
        }
    }

    fn product(name: &str, kind: &str, calib: &str, size: Option<f64>) -> Product {
        Product {
            filename: name.to_string(),
            data_uri: format!("mast:JWST/product/{}", name),
            product_type: kind.to_string(),
            calib_level: calib.to_string(),
            size,
            ..Default::default()
        }
    }

    #[test]
    fn test_select_sorts_by_exposure_and_truncates() {
        let mut hst = obs("hst", "WFC3/IR", Some(9999.0), None);
        hst.obs_collection = "HST".to_string();
        let selected = select_observations(
            vec![
                obs("a", "NIRCAM/IMAGE", Some(100.0), None),
                hst,
                obs("b", "MIRI/IMAGE", Some(500.0), None),
                obs("c", "NIRSPEC/IFU", None, None),
                obs("d", "NIRCAM/IMAGE", Some(300.0), None),
            ],
            3,
            &[],
        );
        let ids: Vec<&str> = selected.iter().map(|o| o.obs_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a"]);
    }

    #[test]
    fn test_select_falls_back_to_start_time() {
        let selected = select_observations(
            vec![
                obs("early", "NIRCAM", None, Some(59000.0)),
                obs("late", "NIRCAM", None, Some(59800.0)),
            ],
            5,
            &[],
        );
        assert_eq!(selected[0].obs_id, "late");
    }

    #[test]
    fn test_allowlist_is_case_insensitive_and_applied_after_truncation() {
        let observations = vec![
            obs("miri", "MIRI/IMAGE", Some(900.0), None),
            obs("nircam", "NIRCAM/IMAGE", Some(800.0), None),
            obs("nircam2", "NIRCAM/IMAGE", Some(100.0), None),
        ];
        let allow = vec!["NIRCam".to_string()];
        let selected = select_observations(observations, 2, &allow);
        let ids: Vec<&str> = selected.iter().map(|o| o.obs_id.as_str()).collect();
        assert_eq!(ids, vec!["nircam"]);
    }

    #[test]
    fn test_filter_products_by_type_and_level() {
        let config = PipelineConfig::default();
        let kept = filter_products(
            vec![
                product("a_i2d.fits", " i2d ", "3", None),
                product("b_x1d.fits", "X1D", "2", None),
                product("c_cal.fits", "CAL", "2", None),
                product("d_i2d.fits", "I2D", "1", None),
                product("e_i2d.fits", "I2D", "", None),
            ],
            &config,
        );
        let names: Vec<&str> = kept.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a_i2d.fits", "b_x1d.fits"]);
    }

    #[test]
    fn test_size_estimates() {
        let gib = 1024.0 * 1024.0 * 1024.0;
        assert_eq!(estimate_size_gb(&product("a", "I2D", "2", Some(gib))), 1.0);
        let i2d = estimate_size_gb(&product("a", "I2D", "2", Some(0.0)));
        assert!((i2d - 100.0 / 1024.0).abs() < 1e-12);
        assert!((estimate_size_gb(&product("a", "X1D", "2", None)) - 10.0 / 1024.0).abs() < 1e-12);
    }

    #[test]
    fn test_plan_respects_budget() {
        let gib = 1024.0 * 1024.0 * 1024.0;
        let observation = obs("o1", "NIRCAM/IMAGE", Some(1.0), None);
        let mut budget = DownloadBudget::new(1.0, 3);
        let planned = plan_downloads(
            &mut budget,
            &observation,
            vec![
                product("big.fits", "I2D", "3", Some(0.6 * gib)),
                product("too_big.fits", "I2D", "3", Some(0.6 * gib)),
                product("small.fits", "X1D", "3", Some(0.1 * gib)),
                product("small2.fits", "X1D", "3", Some(0.1 * gib)),
                product("small3.fits", "X1D", "3", Some(0.1 * gib)),
            ],
        );
        let names: Vec<&str> = planned.iter().map(|p| p.product.filename.as_str()).collect();
        assert_eq!(names, vec!["big.fits", "small.fits", "small2.fits"]);
        assert!(budget.is_full());
        assert!((budget.total_gb() - 0.8).abs() < 1e-9);
        assert_eq!(planned[0].obs_id, "o1");
        assert_eq!(planned[0].instrument, "NIRCAM/IMAGE");
        assert_eq!(planned[0].filter, "F200W");
    }
}
