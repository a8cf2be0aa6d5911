//! Path descriptors appended to published topics
//!
//! A descriptor reads `agg/<reducer>/<interval>[/<span>]`, e.g.
//! `agg/avg/in-1hrs-30min/recent-96`.

use std::time::Duration;

pub const AGGREGATOR_KIND: &str = "agg";

const SECS_PER_MIN: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MIN;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Interval descriptor, listing only the non-zero components.
pub fn interval_name(window: Duration) -> String {
    let total = window.as_secs();
    let days = total / SECS_PER_DAY;
    let hours = (total % SECS_PER_DAY) / SECS_PER_HOUR;
    let minutes = (total % SECS_PER_HOUR) / SECS_PER_MIN;
    let seconds = total % SECS_PER_MIN;

    let mut name = String::from("in");
    if days > 0 {
        name.push_str(&format!("-{}days", days));
    }
    if hours > 0 {
        name.push_str(&format!("-{}hrs", hours));
    }
    if minutes > 0 {
        name.push_str(&format!("-{}min", minutes));
    }
    if seconds > 0 {
        name.push_str(&format!("-{}sec", seconds));
    }
    name
}

/// Span descriptor, absent when only a single reduction is retained.
pub fn span_name(capacity: usize) -> Option<String> {
    if capacity <= 1 {
        None
    } else {
        Some(format!("recent-{}", capacity))
    }
}

pub fn path_descriptor(reducer: &str, window: Duration, capacity: usize) -> String {
    let mut parts = vec![
        AGGREGATOR_KIND.to_string(),
        reducer.to_string(),
        interval_name(window),
    ];
    parts.extend(span_name(capacity));
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_skips_zero_components() {
        assert_eq!(interval_name(Duration::from_secs(90 * 60)), "in-1hrs-30min");
        assert_eq!(interval_name(Duration::from_secs(15 * 60)), "in-15min");
        assert_eq!(interval_name(Duration::from_secs(SECS_PER_DAY + 60)), "in-1days-1min");
        assert_eq!(interval_name(Duration::from_secs(1)), "in-1sec");
    }

    #[test]
    fn test_span_omitted_for_single_entry() {
        assert_eq!(span_name(1), None);
        assert_eq!(span_name(0), None);
        assert_eq!(span_name(96).as_deref(), Some("recent-96"));
    }

    #[test]
    fn test_path_descriptor() {
        assert_eq!(
            path_descriptor("avg", Duration::from_secs(15 * 60), 96),
            "agg/avg/in-15min/recent-96"
        );
        assert_eq!(
            path_descriptor("max", Duration::from_secs(2 * SECS_PER_HOUR), 1),
            "agg/max/in-2hrs"
        );
    }
}
