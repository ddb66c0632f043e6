//! Human-readable formatting for timeline entries.

use crate::GpsPoint;

/// Format a duration as `"2h 5m"` or `"12m"`, rounded to whole minutes.
pub fn format_duration(ms: i64) -> String {
    let total_minutes = ((ms.max(0) as f64) / 60_000.0).round() as i64;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Format a distance as `"1.2 km"` from one kilometer up, otherwise `"350 m"`.
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() {
        return "0 m".to_string();
    }
    if meters >= 1000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        format!("{} m", meters.round() as i64)
    }
}

/// Format a center as `"lat, lon"` with five decimals.
pub fn format_coords(center: &GpsPoint) -> String {
    format!("{:.5}, {:.5}", center.latitude, center.longitude)
}
