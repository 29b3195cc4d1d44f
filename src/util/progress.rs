//! Progress rendering for plot job logs.

/// Render `streamed` out of `total` bytes as `"<streamed>/<total> (<pct>%)"`.
///
/// The percentage is clamped to 100 and shown with one decimal. A zero total
/// counts as complete.
pub fn format_progress(streamed: u64, total: u64) -> String {
    let percent = if total == 0 {
        100.0
    } else {
        (streamed as f64 / total as f64 * 100.0).min(100.0)
    };
    format!("{streamed}/{total} ({percent:.1}%)")
}

#[cfg(test)]
mod tests {
    use super::format_progress;

    #[test]
    fn reports_fraction_of_snapshot() {
        assert_eq!(format_progress(0, 200), "0/200 (0.0%)");
        assert_eq!(format_progress(37, 200), "37/200 (18.5%)");
        assert_eq!(format_progress(200, 200), "200/200 (100.0%)");
    }

    #[test]
    fn sentinel_and_empty_totals_stay_bounded() {
        // The fallback total of 1 must not produce percentages above 100.
        assert_eq!(format_progress(4096, 1), "4096/1 (100.0%)");
        assert_eq!(format_progress(0, 0), "0/0 (100.0%)");
    }
}
