//! # Stay/Move Segmentation
//!
//! Partitions a day's GPS fixes into an ordered list of stays and moves.
//!
//! ## Algorithm
//! 1. Sort fixes by timestamp
//! 2. Greedy forward clustering from each cursor position: a fix within the
//!    stay radius of the running centroid joins the cluster and the centroid is
//!    recomputed
//! 3. A single fix within twice the radius is skipped once per cluster without
//!    joining it, so one noisy fix neither ends the stay nor drags the centroid
//! 4. A cluster lasting at least the minimum stay duration becomes a stay and
//!    the cursor jumps past it; otherwise the cursor advances by one
//! 5. Gaps between stays become moves (at least two fixes each)

use log::debug;
use serde::{Deserialize, Serialize};

use crate::geo_utils::{centroid, haversine_distance, max_distance, polyline_length};
use crate::zones::resolve_zone;
use crate::{GpsPoint, MoveSegment, Segment, StaySegment, TrackPoint, Zone};

/// Smallest accepted stay radius in meters.
pub const MIN_STAY_RADIUS_METERS: f64 = 10.0;
/// Smallest accepted minimum stay duration (one minute).
pub const MIN_STAY_DURATION_MS: i64 = 60_000;

const DEFAULT_STAY_RADIUS_METERS: f64 = 75.0;
const DEFAULT_MIN_STAY_DURATION_MS: i64 = 10 * 60_000;

/// Multiplier on the stay radius inside which a single outlier is tolerated.
const OUTLIER_RADIUS_FACTOR: f64 = 2.0;

/// Configuration for stay detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Maximum distance from the running centroid for a fix to join a stay.
    /// Default: 75.0 meters, floor 10.0
    pub stay_radius_meters: f64,

    /// Minimum time between the first and last fix of a stay.
    /// Default: 10 minutes, floor 1 minute
    pub min_stay_duration_ms: i64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            stay_radius_meters: DEFAULT_STAY_RADIUS_METERS,
            min_stay_duration_ms: DEFAULT_MIN_STAY_DURATION_MS,
        }
    }
}

impl SegmentConfig {
    /// Build a config from the card-style options (radius in meters, duration in minutes).
    pub fn from_minutes(stay_radius_meters: f64, min_stay_minutes: f64) -> Self {
        let minutes = if min_stay_minutes.is_finite() { min_stay_minutes } else { 0.0 };
        Self {
            stay_radius_meters,
            min_stay_duration_ms: (minutes * 60_000.0).round() as i64,
        }
        .normalized()
    }

    /// Clamp values below their floors instead of rejecting them.
    pub fn normalized(&self) -> Self {
        let radius = if self.stay_radius_meters.is_finite() {
            self.stay_radius_meters
        } else {
            DEFAULT_STAY_RADIUS_METERS
        };
        Self {
            stay_radius_meters: radius.max(MIN_STAY_RADIUS_METERS),
            min_stay_duration_ms: self.min_stay_duration_ms.max(MIN_STAY_DURATION_MS),
        }
    }
}

/// A detected stay as an inclusive index range into the sorted fixes.
#[derive(Debug, Clone, PartialEq)]
struct StayCluster {
    start_index: usize,
    end_index: usize,
    center: GpsPoint,
    radius_meters: f64,
}

/// Segment a day of GPS fixes into stays and moves.
///
/// Fixes may arrive in any order; they are sorted by timestamp first. Stays are
/// matched against `zones` (nearest containing zone wins). Returns an empty list
/// for empty input.
///
/// # Example
/// ```
/// use stay_timeline::{segment_timeline, SegmentConfig, TrackPoint};
///
/// // Two fixes 200 m apart and 5 minutes apart: too short for a stay
/// let points = vec![
///     TrackPoint::new(0.0, 0.0, 0),
///     TrackPoint::new(0.0, 0.0018, 300_000),
/// ];
/// let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
/// assert_eq!(segments.len(), 1);
/// assert!(segments[0].as_move().is_some());
/// ```
pub fn segment_timeline(points: &[TrackPoint], config: &SegmentConfig, zones: &[Zone]) -> Vec<Segment> {
    if points.is_empty() {
        return Vec::new();
    }

    let config = config.normalized();
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.timestamp);

    let stays = detect_stays(&sorted, config.stay_radius_meters, config.min_stay_duration_ms);

    let mut segments = Vec::with_capacity(stays.len() * 2 + 1);
    let mut cursor = 0;
    for stay in &stays {
        if cursor < stay.start_index {
            // The move ends on the stay's first fix so the trip reaches the stay
            if let Some(segment) = build_move(&sorted, cursor, stay.start_index) {
                segments.push(Segment::Move(segment));
            }
        }
        segments.push(Segment::Stay(build_stay(&sorted, stay, zones)));
        cursor = stay.end_index + 1;
    }

    if cursor < sorted.len() {
        if let Some(segment) = build_move(&sorted, cursor, sorted.len() - 1) {
            segments.push(Segment::Move(segment));
        }
    }

    debug!(
        "[Segmentation] {} points -> {} stays, {} segments (radius {}m, min stay {}ms)",
        sorted.len(),
        stays.len(),
        segments.len(),
        config.stay_radius_meters,
        config.min_stay_duration_ms
    );

    segments
}

fn detect_stays(points: &[TrackPoint], stay_radius: f64, min_stay_ms: i64) -> Vec<StayCluster> {
    let mut stays = Vec::new();
    let mut i = 0;

    while i + 1 < points.len() {
        let mut cluster = vec![points[i].position()];
        let mut center = points[i].position();
        let mut last_in_index = i;
        let mut outlier_used = false;

        for (j, candidate) in points.iter().enumerate().skip(i + 1) {
            let position = candidate.position();
            let distance = haversine_distance(&center, &position);

            if distance <= stay_radius {
                cluster.push(position);
                center = centroid(&cluster).unwrap_or(center);
                last_in_index = j;
                outlier_used = false;
                continue;
            }

            if !outlier_used && distance <= stay_radius * OUTLIER_RADIUS_FACTOR {
                outlier_used = true;
                continue;
            }

            break;
        }

        let duration = points[last_in_index].timestamp - points[i].timestamp;
        if duration >= min_stay_ms {
            stays.push(StayCluster {
                start_index: i,
                end_index: last_in_index,
                center,
                radius_meters: max_distance(&center, &cluster),
            });
            i = last_in_index + 1;
        } else {
            i += 1;
        }
    }

    stays
}

fn build_stay(points: &[TrackPoint], stay: &StayCluster, zones: &[Zone]) -> StaySegment {
    let start = points[stay.start_index].timestamp;
    let end = points[stay.end_index].timestamp;
    let zone = resolve_zone(&stay.center, zones);

    StaySegment {
        start,
        end,
        duration_ms: end - start,
        center: stay.center,
        radius_meters: stay.radius_meters,
        start_index: stay.start_index,
        end_index: stay.end_index,
        zone_name: zone.map(|z| z.name.clone()),
        zone_icon: zone.and_then(|z| z.icon.clone()),
        place_name: None,
        reverse_geocoding: None,
    }
}

/// Build a move over the inclusive range `[start_index, end_index]`.
/// Returns `None` when the range holds fewer than two fixes.
fn build_move(points: &[TrackPoint], start_index: usize, end_index: usize) -> Option<MoveSegment> {
    if end_index <= start_index || end_index >= points.len() {
        return None;
    }

    let slice = &points[start_index..=end_index];
    let start = slice[0].timestamp;
    let end = slice[slice.len() - 1].timestamp;

    Some(MoveSegment {
        start,
        end,
        duration_ms: end - start,
        distance_meters: polyline_length(slice),
        start_index,
        end_index,
        points: slice.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: i64 = 60_000;

    /// Degrees of longitude per meter at the equator.
    const DEG_PER_M: f64 = 1.0 / 111_195.0;

    fn at(meters_east: f64, minute: i64) -> TrackPoint {
        TrackPoint::new(0.0, meters_east * DEG_PER_M, minute * MINUTE)
    }

    #[test]
    fn test_config_clamps_to_floors() {
        let config = SegmentConfig { stay_radius_meters: 2.0, min_stay_duration_ms: 5 }.normalized();
        assert_eq!(config.stay_radius_meters, MIN_STAY_RADIUS_METERS);
        assert_eq!(config.min_stay_duration_ms, MIN_STAY_DURATION_MS);

        let config = SegmentConfig::from_minutes(f64::NAN, 0.0);
        assert_eq!(config.stay_radius_meters, 75.0);
        assert_eq!(config.min_stay_duration_ms, MIN_STAY_DURATION_MS);

        let config = SegmentConfig::from_minutes(120.0, 15.0);
        assert_eq!(config.stay_radius_meters, 120.0);
        assert_eq!(config.min_stay_duration_ms, 15 * MINUTE);
    }

    #[test]
    fn test_empty_input() {
        assert!(segment_timeline(&[], &SegmentConfig::default(), &[]).is_empty());
    }

    #[test]
    fn test_single_point_produces_nothing() {
        let segments = segment_timeline(&[at(0.0, 0)], &SegmentConfig::default(), &[]);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_stationary_day_collapses_to_one_stay() {
        let points: Vec<_> = (0..30).map(|m| at((m % 3) as f64 * 5.0, m)).collect();
        let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
        assert_eq!(segments.len(), 1);
        let stay = segments[0].as_stay().unwrap();
        assert_eq!((stay.start_index, stay.end_index), (0, 29));
        assert_eq!(stay.duration_ms, 29 * MINUTE);
    }

    #[test]
    fn test_duration_boundary_is_inclusive() {
        let exact: Vec<_> = (0..=10).map(|m| at(0.0, m)).collect();
        let segments = segment_timeline(&exact, &SegmentConfig::default(), &[]);
        assert!(segments[0].is_stay());

        let short: Vec<_> = (0..10).map(|m| at(0.0, m)).collect();
        let segments = segment_timeline(&short, &SegmentConfig::default(), &[]);
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].is_stay());
    }

    #[test]
    fn test_single_outlier_is_tolerated_and_not_admitted() {
        let mut points: Vec<_> = (0..=12).map(|m| at(0.0, m)).collect();
        // 120 m away: beyond the radius but within twice the radius
        points[6] = at(120.0, 6);
        let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
        assert_eq!(segments.len(), 1);
        let stay = segments[0].as_stay().unwrap();
        assert_eq!((stay.start_index, stay.end_index), (0, 12));
        // Outlier never joins the cluster, so the centroid stays put
        assert!(stay.radius_meters < 1e-6);
        assert!(stay.center.longitude.abs() < 1e-12);
    }

    #[test]
    fn test_two_consecutive_outliers_close_the_cluster() {
        let mut points: Vec<_> = (0..=20).map(|m| at(0.0, m)).collect();
        points[5] = at(120.0, 5);
        points[6] = at(120.0, 6);
        let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
        // First cluster spans minutes 0..4 only (too short), later fixes form the stay
        let stays: Vec<_> = segments.iter().filter_map(Segment::as_stay).collect();
        assert_eq!(stays.len(), 1);
        assert!(stays[0].start_index > 0);
    }

    #[test]
    fn test_far_jump_is_not_tolerated() {
        let mut points: Vec<_> = (0..=12).map(|m| at(0.0, m)).collect();
        points[6] = at(500.0, 6);
        let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
        assert!(segments.iter().all(|s| !s.is_stay()));
    }

    #[test]
    fn test_move_between_stays_ends_on_stay_start() {
        let mut points: Vec<_> = (0..=10).map(|m| at(0.0, m)).collect();
        points.extend((11..=13).map(|m| at((m - 10) as f64 * 1_000.0, m)));
        points.extend((14..=25).map(|m| at(4_000.0, m)));

        let segments = segment_timeline(&points, &SegmentConfig::default(), &[]);
        assert_eq!(segments.len(), 3);
        let first = segments[0].as_stay().unwrap();
        let travel = segments[1].as_move().unwrap();
        let second = segments[2].as_stay().unwrap();

        assert_eq!((first.start_index, first.end_index), (0, 10));
        assert_eq!((travel.start_index, travel.end_index), (11, 14));
        assert_eq!(second.start_index, 14);
        assert_eq!(travel.points.len(), 4);
        assert!((travel.distance_meters - 3_000.0).abs() < 5.0);
    }

    #[test]
    fn test_zone_is_attached_to_stay() {
        let points: Vec<_> = (0..=10).map(|m| at(0.0, m)).collect();
        let zones = vec![Zone {
            name: "Home".to_string(),
            icon: Some("mdi:home".to_string()),
            latitude: 0.0005,
            longitude: 0.0,
            radius_meters: 100.0,
        }];
        let segments = segment_timeline(&points, &SegmentConfig::default(), &zones);
        let stay = segments[0].as_stay().unwrap();
        assert_eq!(stay.zone_name.as_deref(), Some("Home"));
        assert_eq!(stay.zone_icon.as_deref(), Some("mdi:home"));
    }
}
