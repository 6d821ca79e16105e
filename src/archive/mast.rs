//! Blocking client for the MAST `invoke` JSON API.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use super::{with_retry, Archive, ArchiveError, Observation, Product};
use crate::config::ArchiveConfig;

/// Polls of a request the service reports as still executing
const MAX_POLLS: usize = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct MastResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct NameLookupResponse {
    #[serde(rename = "resolvedCoordinate", default)]
    resolved: Vec<ResolvedCoordinate>,
}

#[derive(Debug, Deserialize)]
struct ResolvedCoordinate {
    ra: f64,
    decl: f64,
}

#[derive(Debug, Clone)]
pub struct MastClient {
    client: reqwest::blocking::Client,
    base_url: String,
    download_url: String,
    page_size: usize,
    max_retries: usize,
    retry_delay: Duration,
}

impl MastClient {
    pub fn new(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("jwst-lab/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            download_url: config.download_url.clone(),
            page_size: config.page_size,
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lightweight reachability check; any HTTP answer counts as reachable
    pub fn probe(&self) -> Result<u16, ArchiveError> {
        let response = self.client.get(&self.base_url).send()?;
        Ok(response.status().as_u16())
    }

    fn invoke_raw(&self, request: &Value) -> Result<Value, ArchiveError> {
        let url = format!("{}/invoke", self.base_url);
        let body = request.to_string();

        for poll in 0..MAX_POLLS {
            let response = self
                .client
                .post(&url)
                .form(&[("request", body.as_str())])
                .send()?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ArchiveError::Status {
                    status: status.as_u16(),
                    message,
                });
            }

            let value: Value = response
                .json()
                .map_err(|e| ArchiveError::Parse(e.to_string()))?;
            let state = value.get("status").and_then(Value::as_str).unwrap_or("");
            if state.eq_ignore_ascii_case("EXECUTING") {
                tracing::debug!("MAST request still executing (poll {})", poll + 1);
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            if state.eq_ignore_ascii_case("ERROR") {
                let msg = value.get("msg").and_then(Value::as_str).unwrap_or("unknown");
                return Err(ArchiveError::Service(msg.to_string()));
            }
            return Ok(value);
        }

        Err(ArchiveError::Service(format!(
            "request did not complete after {} polls",
            MAX_POLLS
        )))
    }

    fn invoke<T: DeserializeOwned>(&self, request: &Value) -> Result<Vec<T>, ArchiveError> {
        let value = self.invoke_raw(request)?;
        let response: MastResponse =
            serde_json::from_value(value).map_err(|e| ArchiveError::Parse(e.to_string()))?;
        tracing::debug!(
            "MAST returned {} rows (status {:?}{})",
            response.data.len(),
            response.status,
            if response.msg.is_empty() {
                String::new()
            } else {
                format!(", {}", response.msg)
            }
        );
        response
            .data
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| ArchiveError::Parse(e.to_string())))
            .collect()
    }

    fn filtered_position(
        &self,
        ra: f64,
        dec: f64,
        radius_deg: f64,
    ) -> Result<Vec<Observation>, ArchiveError> {
        let request = json!({
            "service": "Mast.Caom.Filtered.Position",
            "format": "json",
            "pagesize": self.page_size,
            "page": 1,
            "params": {
                "columns": "*",
                "filters": [{"paramName": "obs_collection", "values": ["JWST"]}],
                "position": format!("{}, {}, {}", ra, dec, radius_deg),
            },
        });
        self.invoke(&request)
    }

    fn cone(&self, ra: f64, dec: f64, radius_deg: f64) -> Result<Vec<Observation>, ArchiveError> {
        let request = json!({
            "service": "Mast.Caom.Cone",
            "format": "json",
            "pagesize": self.page_size,
            "page": 1,
            "params": {"ra": ra, "dec": dec, "radius": radius_deg},
        });
        let observations: Vec<Observation> = self.invoke(&request)?;
        Ok(observations.into_iter().filter(|o| o.is_jwst()).collect())
    }
}

impl Archive for MastClient {
    fn resolve_name(&self, name: &str) -> Result<(f64, f64), ArchiveError> {
        let request = json!({
            "service": "Mast.Name.Lookup",
            "format": "json",
            "params": {"input": name, "format": "json"},
        });
        let value = with_retry("Name lookup", self.max_retries, self.retry_delay, || {
            self.invoke_raw(&request)
        })?;
        let lookup: NameLookupResponse =
            serde_json::from_value(value).map_err(|e| ArchiveError::Parse(e.to_string()))?;
        lookup
            .resolved
            .first()
            .map(|c| (c.ra, c.decl))
            .ok_or_else(|| ArchiveError::Service(format!("could not resolve '{}'", name)))
    }

    fn query_region(
        &self,
        ra: f64,
        dec: f64,
        radius_deg: f64,
    ) -> Result<Vec<Observation>, ArchiveError> {
        let filtered = with_retry(
            "Filtered position query",
            self.max_retries,
            self.retry_delay,
            || self.filtered_position(ra, dec, radius_deg),
        );
        match filtered {
            Ok(observations) if !observations.is_empty() => return Ok(observations),
            Ok(_) => tracing::warn!("Filtered query returned nothing, trying cone search"),
            Err(e) => tracing::warn!("Filtered query failed ({}), trying cone search", e),
        }
        with_retry("Cone query", self.max_retries, self.retry_delay, || {
            self.cone(ra, dec, radius_deg)
        })
    }

    fn products(&self, observation: &Observation) -> Result<Vec<Product>, ArchiveError> {
        let request = json!({
            "service": "Mast.Caom.Products",
            "format": "json",
            "pagesize": self.page_size,
            "page": 1,
            "params": {"obsid": observation.obsid},
        });
        with_retry("Product query", self.max_retries, self.retry_delay, || {
            self.invoke(&request)
        })
    }

    fn download(&self, product: &Product, dest: &Path) -> Result<u64, ArchiveError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        // Partial downloads never appear under the final name
        let temp_path = dest.with_extension("tmp");
        let result = with_retry("Download", self.max_retries, self.retry_delay, || {
            let mut response = self
                .client
                .get(&self.download_url)
                .query(&[("uri", product.data_uri.as_str())])
                .send()?;

            let status = response.status();
            if !status.is_success() {
                return Err(ArchiveError::Status {
                    status: status.as_u16(),
                    message: format!("download of {} failed", product.filename),
                });
            }

            let mut file = BufWriter::new(File::create(&temp_path)?);
            let bytes = response.copy_to(&mut file)?;
            file.flush()?;
            Ok(bytes)
        });

        match result {
            Ok(bytes) => {
                fs::rename(&temp_path, dest)?;
                Ok(bytes)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }
}
