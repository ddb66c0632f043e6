//! Runtime configuration.
//!
//! Two documents are understood:
//! - [`TimelineOptions`]: the card options (entity, stay radius, minimum stay)
//! - [`GeocodeSettings`]: reverse-geocoding endpoint parameters, read from an
//!   optional JSON file and falling back to built-in defaults when the file is
//!   absent or malformed

use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::segmentation::SegmentConfig;

const DEFAULT_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Reverse-geocoding endpoint and queue parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeSettings {
    /// Reverse-geocoding endpoint.
    /// Default: public Nominatim
    #[serde(rename = "nominatim_reverse_url")]
    pub reverse_url: String,

    /// Minimum spacing between the end of one request and the start of the next.
    /// Default: 1000 ms (Nominatim usage policy)
    pub request_interval_ms: u64,

    /// Per-request timeout. A timed-out request counts as a failed attempt.
    /// Default: 10 000 ms
    pub request_timeout_ms: u64,

    /// Attempts per lookup before giving up.
    /// Default: 3
    pub max_attempts: u32,

    /// Maximum number of cached places.
    /// Default: 300
    pub cache_capacity: usize,
}

impl Default for GeocodeSettings {
    fn default() -> Self {
        Self {
            reverse_url: DEFAULT_REVERSE_URL.to_string(),
            request_interval_ms: 1_000,
            request_timeout_ms: 10_000,
            max_attempts: 3,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl GeocodeSettings {
    /// Parse settings from JSON. Keys present override the defaults; malformed
    /// input yields the defaults.
    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str::<Self>(json) {
            Ok(settings) => settings.sanitized(),
            Err(e) => {
                warn!("[Config] Reverse geocoding config fallback: {}", e);
                Self::default()
            }
        }
    }

    /// Read settings from `path`, falling back to defaults if it cannot be read.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) => {
                debug!("[Config] No reverse geocoding config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn sanitized(mut self) -> Self {
        if self.reverse_url.trim().is_empty() {
            self.reverse_url = DEFAULT_REVERSE_URL.to_string();
        }
        self.max_attempts = self.max_attempts.max(1);
        self.cache_capacity = self.cache_capacity.max(1);
        self
    }
}

/// Card options as configured by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineOptions {
    /// GPS tracker entity whose history is segmented
    pub entity: Option<String>,
    pub stay_radius_m: f64,
    pub min_stay_minutes: f64,
    /// Companion place-history sensor
    pub places_entity: Option<String>,
    /// Contact identifier sent to the geocoding service; no lookups without it
    pub osm_api_key: Option<String>,
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            entity: None,
            stay_radius_m: 75.0,
            min_stay_minutes: 10.0,
            places_entity: None,
            osm_api_key: None,
        }
    }
}

impl TimelineOptions {
    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig::from_minutes(self.stay_radius_m, self.min_stay_minutes)
    }

    /// The contact key, if set to something non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.osm_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
