//! Tracker configuration.
//!
//! Read from the environment by [`TrackerConfig::from_env`]:
//! - `MEMLEDGER_TRACKING`: `on` (default) or `off`. `off` starts the tracker
//!   with bookkeeping suspended.
//! - `MEMLEDGER_WATCH_RATIO`: fraction of current bytes a watch section must
//!   move before it is reported. `0 < r <= 1`, default `0.05`.
//! - `MEMLEDGER_JOURNAL`: `text` (default) or `jsonl`.
//! - `MEMLEDGER_LOG`: minimum journal level, default `info`.
//!
//! Unparseable values fall back to the defaults. The fatal policy is never
//! read from the environment.

use serde::Serialize;

use crate::fatal::FatalPolicy;
use crate::journal::{JournalFormat, LogLevel};

pub const DEFAULT_WATCH_RATIO: f64 = 0.05;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    #[default]
    On,
    Off,
}

impl TrackingMode {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "disabled" | "0" | "false" => Self::Off,
            _ => Self::On,
        }
    }

    #[must_use]
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackerConfig {
    pub tracking: TrackingMode,
    pub watch_ratio: f64,
    pub journal_format: JournalFormat,
    pub log_level: LogLevel,
    pub fatal: FatalPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tracking: TrackingMode::On,
            watch_ratio: DEFAULT_WATCH_RATIO,
            journal_format: JournalFormat::Text,
            log_level: LogLevel::Info,
            fatal: FatalPolicy::Abort,
        }
    }
}

impl TrackerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            tracking: lookup("MEMLEDGER_TRACKING")
                .map(|v| TrackingMode::from_str_loose(&v))
                .unwrap_or(defaults.tracking),
            watch_ratio: lookup("MEMLEDGER_WATCH_RATIO")
                .and_then(|v| parse_ratio(&v))
                .unwrap_or(defaults.watch_ratio),
            journal_format: lookup("MEMLEDGER_JOURNAL")
                .map(|v| JournalFormat::from_str_loose(&v))
                .unwrap_or(defaults.journal_format),
            log_level: lookup("MEMLEDGER_LOG")
                .and_then(|v| LogLevel::from_str_loose(&v))
                .unwrap_or(defaults.log_level),
            fatal: defaults.fatal,
        }
    }

    #[must_use]
    pub fn with_fatal(mut self, fatal: FatalPolicy) -> Self {
        self.fatal = fatal;
        self
    }

    #[must_use]
    pub fn with_tracking(mut self, tracking: TrackingMode) -> Self {
        self.tracking = tracking;
        self
    }

    /// Set the watch ratio; out-of-range values keep the current one.
    #[must_use]
    pub fn with_watch_ratio(mut self, ratio: f64) -> Self {
        if valid_ratio(ratio) {
            self.watch_ratio = ratio;
        }
        self
    }
}

fn valid_ratio(r: f64) -> bool {
    r > 0.0 && r <= 1.0
}

fn parse_ratio(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|&r| valid_ratio(r))
}
