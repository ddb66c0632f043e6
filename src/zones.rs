//! Zone matching for stay centers.

use crate::geo_utils::haversine_distance;
use crate::{GpsPoint, Zone};

/// Find the zone containing `center`.
///
/// A zone contains the center when the haversine distance to the zone center is
/// within its radius. When several zones match, the one whose center is nearest
/// wins; on an exact distance tie the earlier zone in the list is kept.
///
/// # Example
/// ```
/// use stay_timeline::{resolve_zone, GpsPoint, Zone};
///
/// let zones = vec![Zone {
///     name: "Home".to_string(),
///     icon: None,
///     latitude: 0.0,
///     longitude: 0.0,
///     radius_meters: 100.0,
/// }];
/// let zone = resolve_zone(&GpsPoint::new(0.0005, 0.0), &zones);
/// assert_eq!(zone.map(|z| z.name.as_str()), Some("Home"));
/// ```
pub fn resolve_zone<'a>(center: &GpsPoint, zones: &'a [Zone]) -> Option<&'a Zone> {
    let mut best: Option<(&Zone, f64)> = None;

    for zone in zones {
        let distance = haversine_distance(center, &zone.center());
        if distance > zone.radius_meters {
            continue;
        }
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((zone, distance)),
        }
    }

    best.map(|(zone, _)| zone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str, latitude: f64, longitude: f64, radius_meters: f64) -> Zone {
        Zone {
            name: name.to_string(),
            icon: None,
            latitude,
            longitude,
            radius_meters,
        }
    }

    #[test]
    fn test_no_zones() {
        assert!(resolve_zone(&GpsPoint::new(0.0, 0.0), &[]).is_none());
    }

    #[test]
    fn test_outside_radius() {
        let zones = vec![zone("Work", 0.01, 0.0, 100.0)];
        assert!(resolve_zone(&GpsPoint::new(0.0, 0.0), &zones).is_none());
    }

    #[test]
    fn test_nearest_containing_zone_wins() {
        let zones = vec![
            zone("Neighbourhood", 0.002, 0.0, 1_000.0),
            zone("Home", 0.0005, 0.0, 100.0),
            zone("Street", 0.0008, 0.0, 150.0),
        ];
        let found = resolve_zone(&GpsPoint::new(0.0, 0.0), &zones).unwrap();
        assert_eq!(found.name, "Home");
    }

    #[test]
    fn test_equal_distance_keeps_first() {
        let zones = vec![zone("A", 0.0005, 0.0, 100.0), zone("B", -0.0005, 0.0, 100.0)];
        let found = resolve_zone(&GpsPoint::new(0.0, 0.0), &zones).unwrap();
        assert_eq!(found.name, "A");
    }
}
