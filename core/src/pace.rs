use crate::models::RunType;

/// Distance in km for a run-type label. Unknown labels map to 0.0.
#[must_use]
pub fn distance_for(run_type: &str) -> f64 {
    RunType::from_label(run_type).map_or(0.0, RunType::distance_km)
}

/// Seconds per km as `m:ss`, or `"0:00"` when there is no distance.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn pace(duration_seconds: i64, distance_km: f64) -> String {
    if distance_km <= 0.0 {
        return "0:00".to_string();
    }
    let per_km = duration_seconds as f64 / distance_km;
    let minutes = (per_km / 60.0).floor() as i64;
    let seconds = (per_km % 60.0).floor() as i64;
    format!("{minutes}:{seconds:02}")
}

/// Whole seconds as `m:ss`. Minutes are not rolled into hours.
#[must_use]
pub fn format_duration(duration_seconds: i64) -> String {
    let minutes = duration_seconds / 60;
    let seconds = duration_seconds % 60;
    format!("{minutes}:{seconds:02}")
}

/// Round to `decimals` places, half away from zero.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
