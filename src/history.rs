//! Adapters from host state-history JSON to the crate's input types.
//!
//! History entries look like
//! `{"entity_id": "...", "state": "...", "attributes": {...}, "last_changed": "..."}`.
//! Compressed entries use `a` for attributes and `lu` (seconds) for the time.

use chrono::DateTime;
use log::debug;
use serde_json::Value;

use crate::places::PlaceState;
use crate::{TrackPoint, Zone};

const DEFAULT_ZONE_RADIUS_METERS: f64 = 100.0;

fn attributes(state: &Value) -> Option<&Value> {
    state.get("attributes").or_else(|| state.get("a"))
}

fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn text<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Timestamp of a history entry in Unix epoch milliseconds.
pub fn state_timestamp(state: &Value) -> Option<i64> {
    for key in ["last_changed", "last_updated", "timestamp"] {
        if let Some(ts) = text(state.get(key)).and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
            return Some(ts.timestamp_millis());
        }
    }
    for key in ["lu", "lc"] {
        if let Some(seconds) = number(state.get(key)) {
            return Some((seconds * 1000.0).round() as i64);
        }
    }
    None
}

/// Extract GPS fixes, dropping entries without usable coordinates or time.
pub fn points_from_states(states: &[Value]) -> Vec<TrackPoint> {
    let points: Vec<TrackPoint> = states
        .iter()
        .filter_map(|state| {
            let attrs = attributes(state)?;
            let (latitude, longitude) =
                match (number(attrs.get("latitude")), number(attrs.get("longitude"))) {
                    (Some(lat), Some(lon)) => (lat, lon),
                    _ => {
                        let gps = attrs.get("gps")?.as_array()?;
                        (number(gps.first())?, number(gps.get(1))?)
                    }
                };
            let point = TrackPoint::new(latitude, longitude, state_timestamp(state)?);
            point.is_valid().then_some(point)
        })
        .collect();

    debug!("[History] {} of {} states carry a GPS fix", points.len(), states.len());
    points
}

/// Collect `zone.*` entities from a state snapshot.
pub fn zones_from_states(states: &[Value]) -> Vec<Zone> {
    states
        .iter()
        .filter_map(|state| {
            let entity_id = text(state.get("entity_id"))?;
            if !entity_id.starts_with("zone.") {
                return None;
            }
            let attrs = attributes(state)?;
            let latitude = number(attrs.get("latitude"))?;
            let longitude = number(attrs.get("longitude"))?;
            let radius_meters = number(attrs.get("radius"))
                .filter(|r| *r > 0.0)
                .unwrap_or(DEFAULT_ZONE_RADIUS_METERS);

            Some(Zone {
                name: text(attrs.get("friendly_name")).unwrap_or(entity_id).to_string(),
                icon: text(attrs.get("icon")).map(str::to_string),
                latitude,
                longitude,
                radius_meters,
            })
        })
        .collect()
}

/// Read the place sensor's history: formatted place, then formatted address,
/// then the raw state.
pub fn place_states_from_states(states: &[Value]) -> Vec<PlaceState> {
    states
        .iter()
        .filter_map(|state| {
            let timestamp = state_timestamp(state)?;
            let attrs = attributes(state);
            let name = text(attrs.and_then(|a| a.get("formatted_place")))
                .or_else(|| text(attrs.and_then(|a| a.get("formatted_address"))))
                .or_else(|| text(state.get("state")).or_else(|| text(state.get("s"))))
                .filter(|s| !matches!(*s, "unknown" | "unavailable"));
            Some(PlaceState::new(timestamp, name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_points_from_states() {
        let states = vec![
            json!({"attributes": {"latitude": 51.5, "longitude": -0.12}, "last_changed": "2024-03-05T10:00:00+00:00"}),
            json!({"attributes": {"gps": [51.6, "-0.13"]}, "last_updated": "2024-03-05T10:01:00Z"}),
            json!({"a": {"latitude": "51.7", "longitude": -0.14}, "lu": 1709632920.5}),
            json!({"attributes": {"latitude": null, "longitude": -0.12}, "last_changed": "2024-03-05T10:03:00Z"}),
            json!({"attributes": {"latitude": 95.0, "longitude": 0.0}, "last_changed": "2024-03-05T10:04:00Z"}),
            json!({"attributes": {"latitude": 51.5, "longitude": -0.12}}),
        ];
        let points = points_from_states(&states);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp, 1_709_632_800_000);
        assert_eq!(points[1].latitude, 51.6);
        assert_eq!(points[1].longitude, -0.13);
        assert_eq!(points[2].timestamp, 1_709_632_920_500);
    }

    #[test]
    fn test_zones_from_states() {
        let states = vec![
            json!({"entity_id": "zone.home", "attributes": {"friendly_name": "Home", "latitude": 51.5, "longitude": -0.1, "radius": 50, "icon": "mdi:home"}}),
            json!({"entity_id": "zone.work", "attributes": {"latitude": 51.6, "longitude": -0.2}}),
            json!({"entity_id": "person.me", "attributes": {"latitude": 51.6, "longitude": -0.2}}),
            json!({"entity_id": "zone.broken", "attributes": {"latitude": "x", "longitude": -0.2}}),
        ];
        let zones = zones_from_states(&states);
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].name, "Home");
        assert_eq!(zones[0].icon.as_deref(), Some("mdi:home"));
        assert_eq!(zones[0].radius_meters, 50.0);
        assert_eq!(zones[1].name, "zone.work");
        assert_eq!(zones[1].radius_meters, DEFAULT_ZONE_RADIUS_METERS);
    }

    #[test]
    fn test_place_states_from_states() {
        let states = vec![
            json!({"state": "raw", "attributes": {"formatted_place": "Cafe"}, "last_changed": "2024-03-05T10:00:00Z"}),
            json!({"state": "raw", "attributes": {"formatted_address": "1 High St"}, "last_changed": "2024-03-05T11:00:00Z"}),
            json!({"state": "Park", "last_changed": "2024-03-05T12:00:00Z"}),
            json!({"state": "unavailable", "last_changed": "2024-03-05T13:00:00Z"}),
        ];
        let places = place_states_from_states(&states);
        let names: Vec<_> = places.iter().map(|p| p.name.as_deref()).collect();
        assert_eq!(names, vec![Some("Cafe"), Some("1 High St"), Some("Park"), None]);
    }
}
