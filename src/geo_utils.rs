//! # Geographic Utilities
//!
//! Core geographic computation used by stay detection and zone matching.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`centroid`] | Arithmetic mean of a point cluster |
//! | [`max_distance`] | Largest distance from a center to any cluster member |
//! | [`polyline_length`] | Total length of a track in meters |
//!
//! ## Example
//!
//! ```rust
//! use stay_timeline::{GpsPoint, geo_utils};
//!
//! let london = GpsPoint::new(51.5074, -0.1278);
//! let paris = GpsPoint::new(48.8566, 2.3522);
//!
//! let distance = geo_utils::haversine_distance(&london, &paris);
//! assert!((distance - 343_560.0).abs() < 1000.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! Distances use the haversine formula on a sphere of radius 6,371,000 m. The
//! intermediate term is clamped to `[0, 1]` so coincident and antipodal inputs
//! never produce NaN.
//!
//! The centroid is a plain mean of latitudes and longitudes. It is not
//! geodesically correct but is stable for the small clusters a stay produces.

use geo::{Centroid, MultiPoint, Point};

use crate::{GpsPoint, TrackPoint};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface.
///
/// # Example
///
/// ```rust
/// use stay_timeline::{GpsPoint, geo_utils};
///
/// let p = GpsPoint::new(0.0, 0.0);
/// let antipode = GpsPoint::new(0.0, 180.0);
/// let half_circumference = std::f64::consts::PI * geo_utils::EARTH_RADIUS_METERS;
/// assert!((geo_utils::haversine_distance(&p, &antipode) - half_circumference).abs() < 1.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();

    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let a = (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon).clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_METERS * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Calculate the total length of a track in meters.
///
/// Sums the haversine distance between consecutive fixes. Empty or single-point
/// tracks return 0.0.
pub fn polyline_length(points: &[TrackPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0].position(), &w[1].position()))
        .sum()
}

// =============================================================================
// Cluster Functions
// =============================================================================

/// Compute the centroid of a cluster as the mean latitude and mean longitude.
///
/// Returns `None` for an empty cluster.
///
/// # Example
///
/// ```rust
/// use stay_timeline::{GpsPoint, geo_utils};
///
/// let cluster = vec![GpsPoint::new(51.50, -0.10), GpsPoint::new(51.52, -0.12)];
/// let center = geo_utils::centroid(&cluster).unwrap();
/// assert!((center.latitude - 51.51).abs() < 1e-9);
/// assert!((center.longitude + 0.11).abs() < 1e-9);
/// ```
pub fn centroid(points: &[GpsPoint]) -> Option<GpsPoint> {
    if points.is_empty() {
        return None;
    }

    let multi: MultiPoint<f64> = points
        .iter()
        .map(|p| Point::new(p.longitude, p.latitude))
        .collect::<Vec<_>>()
        .into();

    multi.centroid().map(|c| GpsPoint::new(c.y(), c.x()))
}

/// Largest haversine distance from `center` to any point of the cluster.
///
/// Returns 0.0 for an empty cluster.
pub fn max_distance(center: &GpsPoint, points: &[GpsPoint]) -> f64 {
    points
        .iter()
        .map(|p| haversine_distance(center, p))
        .fold(0.0, f64::max)
}

// =============================================================================
// Unit Tests
// =============================================================================
