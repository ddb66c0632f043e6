//! # Stay Timeline
//!
//! Turns a day of raw GPS fixes into a readable timeline of stays and moves.
//!
//! This library provides:
//! - Stay/move segmentation with single-outlier tolerance
//! - Zone matching for stay centers
//! - Place attribution from a companion place-history sensor
//! - A rate-limited, deduplicated, retrying reverse-geocoding queue backed by a
//!   persisted cache
//!
//! ## Features
//!
//! - **`http`** (default) - reqwest-backed Nominatim client
//! - **`cli`** - `timeline-cli` debug binary
//!
//! ## Quick Start
//!
//! ```rust
//! use stay_timeline::{segment_timeline, Segment, SegmentConfig, TrackPoint};
//!
//! let points: Vec<TrackPoint> = (0..12)
//!     .map(|i| TrackPoint::new(51.5074, -0.1278, i * 60_000))
//!     .collect();
//!
//! let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
//! assert_eq!(segments.len(), 1);
//! assert!(matches!(segments[0], Segment::Stay(_)));
//! ```

use serde::{Deserialize, Serialize};

pub mod cache;
pub mod config;
pub mod format;
pub mod geo_utils;
pub mod geocode;
pub mod history;
pub mod places;
pub mod segmentation;
pub mod zones;

// HTTP transport for reverse geocoding
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::NominatimClient;

pub use cache::{CacheEntry, CacheStore, FileStore, GeocodeCache, MemoryStore};
pub use config::{GeocodeSettings, TimelineOptions};
pub use geocode::{
    apply_update, cache_key, mark_cancelled, parse_place_name, GeocodeError, GeocodeQueue,
    GeocodeUpdate, LookupRequest, ResolveOptions, ReverseGeocoder, UpdateCallback,
    LOADING_LOCATION, UNKNOWN_LOCATION,
};
pub use places::{build_place_intervals, pick_place_name, PlaceInterval, PlaceState};
pub use segmentation::{segment_timeline, SegmentConfig};
pub use zones::resolve_zone;

// ============================================================================
// Core Types
// ============================================================================

/// A latitude/longitude pair. Also used as the center of a stay cluster.
///
/// # Example
/// ```
/// use stay_timeline::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// A single location fix from the history collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Unix epoch milliseconds
    pub timestamp: i64,
}

impl TrackPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self { latitude, longitude, timestamp }
    }

    /// The coordinate part of this fix.
    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    pub fn is_valid(&self) -> bool {
        self.position().is_valid()
    }
}

/// A named circular geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "radius")]
    pub radius_meters: f64,
}

impl Zone {
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// A dwell location: the subject stayed within `radius_meters` of `center`
/// for at least the configured minimum duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaySegment {
    pub start: i64,
    pub end: i64,
    pub duration_ms: i64,
    pub center: GpsPoint,
    pub radius_meters: f64,
    /// First and last index into the timestamp-sorted input
    pub start_index: usize,
    pub end_index: usize,
    pub zone_name: Option<String>,
    pub zone_icon: Option<String>,
    pub place_name: Option<String>,
    pub reverse_geocoding: Option<serde_json::Value>,
}

impl StaySegment {
    /// Key used for the persisted geocode cache and lookup deduplication.
    pub fn cache_key(&self) -> String {
        geocode::cache_key(&self.center)
    }

    /// Best label available for display, zone first.
    pub fn label(&self) -> Option<&str> {
        self.zone_name.as_deref().or(self.place_name.as_deref())
    }
}

/// Transit between stays (or sequence boundaries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveSegment {
    pub start: i64,
    pub end: i64,
    pub duration_ms: i64,
    pub distance_meters: f64,
    pub start_index: usize,
    pub end_index: usize,
    /// The fixes making up this move, for drawing polylines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<TrackPoint>,
}

/// One entry of a day's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Segment {
    Stay(StaySegment),
    Move(MoveSegment),
}

impl Segment {
    pub fn start(&self) -> i64 {
        match self {
            Segment::Stay(s) => s.start,
            Segment::Move(m) => m.start,
        }
    }

    pub fn end(&self) -> i64 {
        match self {
            Segment::Stay(s) => s.end,
            Segment::Move(m) => m.end,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        match self {
            Segment::Stay(s) => s.duration_ms,
            Segment::Move(m) => m.duration_ms,
        }
    }

    /// Inclusive index range into the sorted input points.
    pub fn index_range(&self) -> (usize, usize) {
        match self {
            Segment::Stay(s) => (s.start_index, s.end_index),
            Segment::Move(m) => (m.start_index, m.end_index),
        }
    }

    pub fn as_stay(&self) -> Option<&StaySegment> {
        match self {
            Segment::Stay(s) => Some(s),
            Segment::Move(_) => None,
        }
    }

    pub fn as_move(&self) -> Option<&MoveSegment> {
        match self {
            Segment::Move(m) => Some(m),
            Segment::Stay(_) => None,
        }
    }

    pub fn is_stay(&self) -> bool {
        matches!(self, Segment::Stay(_))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(51.5074, -0.1278).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!TrackPoint::new(0.0, f64::INFINITY, 0).is_valid());
    }

    #[test]
    fn test_segment_serializes_with_type_tag() {
        let segment = Segment::Move(MoveSegment {
            start: 0,
            end: 1_000,
            duration_ms: 1_000,
            distance_meters: 12.5,
            start_index: 0,
            end_index: 1,
            points: Vec::new(),
        });
        let json = serde_json::to_value(&segment).unwrap();
        assert_eq!(json["type"], "move");
        assert_eq!(json["distance_meters"], 12.5);
        assert!(json.get("points").is_none());
    }

    #[test]
    fn test_stay_label_prefers_zone() {
        let stay = StaySegment {
            start: 0,
            end: 600_000,
            duration_ms: 600_000,
            center: GpsPoint::new(1.0, 2.0),
            radius_meters: 10.0,
            start_index: 0,
            end_index: 5,
            zone_name: Some("Home".to_string()),
            zone_icon: None,
            place_name: Some("Somewhere".to_string()),
            reverse_geocoding: None,
        };
        assert_eq!(stay.label(), Some("Home"));
        assert_eq!(stay.cache_key(), "1.00000,2.00000");
    }

    #[test]
    fn test_zone_deserializes_from_config_shape() {
        let zone: Zone = serde_json::from_str(
            r#"{"name":"Home","lat":51.5,"lon":-0.12,"radius":100}"#,
        )
        .unwrap();
        assert_eq!(zone.name, "Home");
        assert_eq!(zone.icon, None);
        assert_eq!(zone.radius_meters, 100.0);
    }
}
