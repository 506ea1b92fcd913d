// Shared formatting and numeric helpers used by both controllers and the UI.

/// Clamps a volume level into [0, 1]. NaN counts as silence.
pub fn clamp_volume(level: f64) -> f64 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

/// Clamps a playback position into [0, duration].
///
/// With an unknown duration only the lower bound applies.
pub fn clamp_position(position: f64, duration: Option<f64>) -> f64 {
    let position = if position.is_nan() { 0.0 } else { position.max(0.0) };
    match known_duration(duration) {
        Some(duration) => position.min(duration),
        None => position,
    }
}

/// Filters out durations the media subsystem reports before metadata is ready.
pub fn known_duration(duration: Option<f64>) -> Option<f64> {
    duration.filter(|d| d.is_finite() && *d > 0.0)
}

// Formats seconds as MM:SS, or H:MM:SS for long episodes
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

pub fn format_volume(volume: f64, muted: bool) -> String {
    if muted {
        "muted".to_string()
    } else {
        format!("{}%", (clamp_volume(volume) * 100.0).round() as u32)
    }
}
