//! Bracketed usage deltas.
//!
//! A watch section remembers the tracked byte count when it begins. On end,
//! the change is reported only if it exceeds the configured fraction of the
//! tracked bytes at that point. Blocks allocated while tracking was
//! suspended are invisible to both sides.

use serde::Serialize;
use serde_json::json;

use crate::bulk::BulkAllocator;
use crate::journal::LogLevel;
use crate::tracker::Tracker;

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a watch section reports nothing until passed to watch_end"]
pub struct WatchMark {
    label: String,
    before: u64,
}

impl WatchMark {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn before(&self) -> u64 {
        self.before
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchDelta {
    pub label: String,
    pub before: u64,
    pub after: u64,
    pub delta: i64,
    pub threshold: f64,
}

impl<B: BulkAllocator> Tracker<B> {
    pub fn watch_begin(&self, label: &str) -> WatchMark {
        WatchMark {
            label: label.to_owned(),
            before: self.registry.live_bytes(),
        }
    }

    /// Close a section. Returns the delta when it crossed the threshold.
    pub fn watch_end(&mut self, mark: WatchMark) -> Option<WatchDelta> {
        let after = self.registry.live_bytes();
        let delta = signed(after) - signed(mark.before);
        let threshold = self.config.watch_ratio * after as f64;
        if delta == 0 || (delta.unsigned_abs() as f64) <= threshold {
            return None;
        }
        let report = WatchDelta {
            label: mark.label,
            before: mark.before,
            after,
            delta,
            threshold,
        };
        self.journal.emit_with(
            LogLevel::Info,
            "watch",
            &format!(
                "{}: {:+} byte(s) ({} -> {})",
                report.label, report.delta, report.before, report.after
            ),
            json!({ "label": report.label, "delta": report.delta, "threshold": report.threshold }),
        );
        Some(report)
    }
}

fn signed(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use crate::bulk::LibcBulk;
    use crate::config::TrackerConfig;
    use crate::fatal::FatalPolicy;
    use crate::journal::{Journal, JournalFormat};
    use crate::site::Tag;
    use crate::tracker::Tracker;

    fn tracker(ratio: f64) -> Tracker {
        Tracker::with_parts(
            TrackerConfig::default()
                .with_fatal(FatalPolicy::Return)
                .with_watch_ratio(ratio),
            LibcBulk,
            Journal::buffer("watch", JournalFormat::Jsonl),
        )
    }

    #[test]
    fn large_growth_is_reported() {
        let mut t = tracker(0.05);
        let tag = Tag::new(crate::site!()).with_type("u8");
        let base = t.alloc_vec(1, 1000, &tag).unwrap();
        let mark = t.watch_begin("step");
        let extra = t.alloc_vec(1, 500, &tag).unwrap();
        let delta = t.watch_end(mark).unwrap();
        assert_eq!(delta.delta, 500);
        assert_eq!(delta.before, 1000);
        assert_eq!(delta.after, 1500);
        assert!(t.journal().entries().iter().any(|e| e.event == "watch"));
        let _ = t.release(extra).unwrap();
        let _ = t.release(base).unwrap();
    }

    #[test]
    fn untracked_bytes_do_not_dilute_the_threshold() {
        let mut t = tracker(0.05);
        let tag = Tag::new(crate::site!()).with_type("u8");
        t.set_enabled(false);
        let bulk = t.alloc_vec(1, 100_000, &tag).unwrap();
        t.set_enabled(true);
        let base = t.alloc_vec(1, 1000, &tag).unwrap();
        let mark = t.watch_begin("step");
        assert_eq!(mark.before(), 1000);
        let extra = t.alloc_vec(1, 500, &tag).unwrap();
        assert_eq!(t.current_bytes(), 101_500);
        let delta = t.watch_end(mark).unwrap();
        assert_eq!((delta.before, delta.after, delta.delta), (1000, 1500, 500));
        assert!((delta.threshold - 75.0).abs() < 1e-9);
        let _ = t.release(extra).unwrap();
        let _ = t.release(base).unwrap();
        let _ = t.release(bulk).unwrap();
    }

    #[test]
    fn small_growth_is_quiet() {
        let mut t = tracker(0.5);
        let tag = Tag::new(crate::site!()).with_type("u8");
        let base = t.alloc_vec(1, 1000, &tag).unwrap();
        let mark = t.watch_begin("step");
        let extra = t.alloc_vec(1, 100, &tag).unwrap();
        assert!(t.watch_end(mark).is_none());
        let mark = t.watch_begin("idle");
        assert!(t.watch_end(mark).is_none());
        let _ = t.release(extra).unwrap();
        let _ = t.release(base).unwrap();
    }

    #[test]
    fn shrink_reports_negative_delta() {
        let mut t = tracker(0.05);
        let tag = Tag::new(crate::site!()).with_type("u8");
        let a = t.alloc_vec(1, 100, &tag).unwrap();
        let b = t.alloc_vec(1, 900, &tag).unwrap();
        let mark = t.watch_begin("free");
        let _ = t.release(b).unwrap();
        let delta = t.watch_end(mark).unwrap();
        assert_eq!(delta.delta, -900);
        let _ = t.release(a).unwrap();
    }
}
