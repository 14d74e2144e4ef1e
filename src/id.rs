//! ID generation utilities for stageloop
//!
//! Provides functions for generating unique identifiers for loop invocations.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a unique loop ID for a stage invocation
///
/// Format: `{stage}-{timestamp_ms}-{random_hex}`
/// Example: `scrape-1738300800123-a1b2c3d4`
pub fn generate_loop_id(stage_name: &str) -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("{}-{}-{:08x}", sanitize(stage_name), timestamp, random)
}

/// Replace anything that is not alphanumeric, `_` or `.` so ids stay splittable on `-`
fn sanitize(stage_name: &str) -> String {
    let cleaned: String = stage_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "stage".to_string() } else { cleaned }
}
