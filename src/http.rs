//! HTTP client for Nominatim-style reverse geocoding.
//!
//! One GET per lookup with `format=json`, `lat`, `lon` and the caller's contact
//! address as `email`. Pacing, retries and deduplication live in
//! [`GeocodeQueue`](crate::GeocodeQueue); this client only performs a single
//! request and classifies the outcome.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, warn};
use reqwest::Client;
use serde_json::Value;

use crate::geocode::{GeocodeError, LookupRequest, ReverseGeocoder};

const USER_AGENT: &str = concat!("stay-timeline/", env!("CARGO_PKG_VERSION"));

/// reqwest-backed [`ReverseGeocoder`].
#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: Client,
}

impl NominatimClient {
    pub fn new() -> Result<Self, String> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client })
    }

    async fn fetch(&self, request: &LookupRequest) -> Result<Value, GeocodeError> {
        let req_start = Instant::now();
        let response = self
            .client
            .get(&request.endpoint)
            .header("Accept", "application/json")
            .query(&[
                ("format", "json".to_string()),
                ("lat", request.latitude.to_string()),
                ("lon", request.longitude.to_string()),
                ("email", request.contact.clone()),
            ])
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "[Nominatim] HTTP {} for {:.5},{:.5} after {:?}",
                status,
                request.latitude,
                request.longitude,
                req_start.elapsed()
            );
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GeocodeError::Transport(format!("Body download error: {}", e)))?;
        let payload: Value =
            serde_json::from_slice(&bytes).map_err(|e| GeocodeError::Decode(e.to_string()))?;

        debug!(
            "[Nominatim] {:.5},{:.5} resolved in {:?} ({:.1}KB)",
            request.latitude,
            request.longitude,
            req_start.elapsed(),
            bytes.len() as f64 / 1024.0
        );
        Ok(payload)
    }
}

impl ReverseGeocoder for NominatimClient {
    fn reverse<'a>(&'a self, request: &'a LookupRequest) -> BoxFuture<'a, Result<Value, GeocodeError>> {
        self.fetch(request).boxed()
    }
}
