//! Common utility functions used across reportflow components

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a unique ID for messages and jobs
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short ID for display purposes (8 characters)
pub fn generate_short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Generate a timestamped ID with optional prefix
pub fn generate_timestamped_id(prefix: Option<&str>) -> String {
    let timestamp = Utc::now().timestamp();
    let short_uuid = generate_short_id();

    match prefix {
        Some(p) => format!("{}_{}_{}", p, timestamp, short_uuid),
        None => format!("{}_{}", timestamp, short_uuid),
    }
}

/// Current UTC time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format duration in milliseconds to human-readable string
pub fn format_duration_millis(millis: u128) -> String {
    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        format!("{:.1}m", millis as f64 / 60_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
        assert_eq!(generate_short_id().len(), 8);
        assert!(generate_timestamped_id(Some("job")).starts_with("job_"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_millis(250), "250ms");
        assert_eq!(format_duration_millis(1_500), "1.5s");
        assert_eq!(format_duration_millis(90_000), "1.5m");
    }
}
