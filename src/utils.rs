//! Small shared helpers: progress rendering, filename hygiene, timestamps.

use std::path::Path;

/// Width of the textual progress bar in blocks
const BAR_BLOCKS: u32 = 20;

/// Renders a download as a filled/empty block bar, emitting an update only
/// when progress crosses the next 5% step. Reported percentages are clamped
/// and never decrease, so edits of the status message are monotonic and
/// never spam "message is not modified" errors.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_step: Option<u32>,
}

impl ProgressTracker {
    /// New tracker with no progress reported yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current byte counts; returns a rendered bar when the
    /// display should be updated.
    pub fn update(&mut self, transferred: u64, total: u64) -> Option<String> {
        let percent = if total == 0 {
            100
        } else {
            u32::try_from(transferred.saturating_mul(100) / total)
                .unwrap_or(100)
                .min(100)
        };
        let step = percent / 5;
        if self.last_step.is_some_and(|last| step <= last) {
            return None;
        }
        self.last_step = Some(step);
        Some(render_bar(percent))
    }
}

/// `▰▰▰▱…▱ 35%` style bar line
#[must_use]
pub fn render_bar(percent: u32) -> String {
    let filled = (percent.min(100) * BAR_BLOCKS) / 100;
    let bar: String = "▰".repeat(filled as usize) + &"▱".repeat((BAR_BLOCKS - filled) as usize);
    format!("{bar} <code>{percent}%</code>")
}

/// Reduce a user-supplied filename to a safe base name.
///
/// Strips path components (so `../../etc/passwd` becomes `passwd`) and falls
/// back when nothing usable remains.
///
/// # Examples
///
/// ```
/// use filevalet::utils::sanitize_file_name;
/// assert_eq!(sanitize_file_name("../foo/bar.txt", "file"), "bar.txt");
/// assert_eq!(sanitize_file_name("..", "file"), "file");
/// ```
#[must_use]
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// Format an epoch timestamp as a human-readable UTC time
#[must_use]
pub fn format_expiry(epoch_secs: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs, 0).map_or_else(
        || "lifetime".to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_updates_only_on_new_steps() {
        let mut tracker = ProgressTracker::new();

        let first = tracker.update(0, 1000).expect("0% is reported");
        assert!(first.contains("0%"));

        assert!(tracker.update(10, 1000).is_none(), "1% is the same step");
        assert!(tracker.update(49, 1000).is_none(), "4.9% still step 0");

        let second = tracker.update(500, 1000).expect("50% is a new step");
        assert!(second.contains("50%"));
        assert!(second.contains("▰▰▰▰▰▰▰▰▰▰▱"));
    }

    #[test]
    fn progress_never_regresses() {
        let mut tracker = ProgressTracker::new();
        tracker.update(900, 1000);
        assert!(tracker.update(100, 1000).is_none());
        assert!(tracker.update(1000, 1000).expect("100%").contains("100%"));
    }

    #[test]
    fn unknown_total_reports_complete() {
        let mut tracker = ProgressTracker::new();
        assert!(tracker.update(123, 0).expect("degenerate total").contains("100%"));
    }

    #[test]
    fn bar_is_full_at_completion() {
        let bar = render_bar(100);
        assert!(bar.starts_with(&"▰".repeat(20)));
        assert!(!bar.contains('▱'));
    }

    #[test]
    fn sanitize_rejects_traversal_and_empties() {
        assert_eq!(sanitize_file_name("../../etc/passwd", "fb"), "passwd");
        assert_eq!(sanitize_file_name("report.pdf", "fb"), "report.pdf");
        assert_eq!(sanitize_file_name("  spaced.txt  ", "fb"), "spaced.txt");
        assert_eq!(sanitize_file_name("", "fb"), "fb");
        assert_eq!(sanitize_file_name(".", "fb"), "fb");
    }

    #[test]
    fn expiry_formats_as_utc() {
        assert_eq!(format_expiry(0), "1970-01-01 00:00:00 UTC");
    }
}
