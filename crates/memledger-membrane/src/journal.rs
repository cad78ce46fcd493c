//! Structured diagnostic journal.
//!
//! Every report, warning and fatal diagnostic produced by the tracker goes
//! through a [`Journal`]. Entries are canonical JSONL records:
//!
//! - required: `seq`, `timestamp`, `run_id`, `level`, `event`, `message`
//! - optional: `details` (free-form JSON)
//!
//! Sinks:
//! - [`Journal::buffer`]: in-memory, for tests and the harness
//! - [`Journal::writer`]: any `Write` (stderr, files) as JSONL or text
//! - [`Journal::discard`]: counts entries and drops them
//!
//! Write failures are counted and never propagated; a broken diagnostic
//! sink must not fail an allocation.

use std::fmt;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Parse from string (case-insensitive). Unknown values yield `None`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "fatal" => Self::Fatal,
            _ => return None,
        };
        Some(level)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Line format of a writer sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalFormat {
    /// Human-readable `[seq] level event: message`.
    #[default]
    Text,
    Jsonl,
}

impl JournalFormat {
    /// Parse from string (case-insensitive), falling back to `Text`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "json" | "structured" => Self::Jsonl,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp: String,
    pub run_id: String,
    pub level: LogLevel,
    pub event: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JournalEntry {
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            timestamp: now_utc(),
            run_id: String::new(),
            level,
            event: event.into(),
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn to_text(&self) -> String {
        let mut line = format!(
            "[{:04}] {:<5} {}: {}",
            self.seq, self.level, self.event, self.message
        );
        if let Some(details) = &self.details {
            line.push(' ');
            line.push_str(&details.to_string());
        }
        line
    }
}

enum Sink {
    Buffer(Vec<u8>),
    Writer(Box<dyn Write + Send>),
    Discard,
}

pub struct Journal {
    sink: Sink,
    format: JournalFormat,
    min_level: LogLevel,
    run_id: String,
    seq: u64,
    warnings: u64,
    write_failures: u64,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match self.sink {
            Sink::Buffer(_) => "buffer",
            Sink::Writer(_) => "writer",
            Sink::Discard => "discard",
        };
        f.debug_struct("Journal")
            .field("sink", &sink)
            .field("format", &self.format)
            .field("min_level", &self.min_level)
            .field("run_id", &self.run_id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl Journal {
    fn with_sink(sink: Sink, run_id: &str, format: JournalFormat) -> Self {
        Self {
            sink,
            format,
            min_level: LogLevel::Info,
            run_id: run_id.to_string(),
            seq: 0,
            warnings: 0,
            write_failures: 0,
        }
    }

    /// In-memory sink (for testing).
    #[must_use]
    pub fn buffer(run_id: &str, format: JournalFormat) -> Self {
        Self::with_sink(Sink::Buffer(Vec::new()), run_id, format)
    }

    #[must_use]
    pub fn writer(writer: Box<dyn Write + Send>, run_id: &str, format: JournalFormat) -> Self {
        Self::with_sink(Sink::Writer(writer), run_id, format)
    }

    #[must_use]
    pub fn stderr(run_id: &str, format: JournalFormat) -> Self {
        Self::writer(Box::new(std::io::stderr()), run_id, format)
    }

    /// Create a journal that writes to a file.
    pub fn to_file(path: &Path, run_id: &str, format: JournalFormat) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::writer(
            Box::new(std::io::BufWriter::new(file)),
            run_id,
            format,
        ))
    }

    #[must_use]
    pub fn discard() -> Self {
        Self::with_sink(Sink::Discard, "discard", JournalFormat::Jsonl)
    }

    /// Drop entries below `level`. Fatal entries are never dropped.
    #[must_use]
    pub fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn format(&self) -> JournalFormat {
        self.format
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level == LogLevel::Fatal || level >= self.min_level
    }

    /// Entries written so far.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Entries at `warn` or above.
    #[must_use]
    pub fn warnings(&self) -> u64 {
        self.warnings
    }

    #[must_use]
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Emit an entry with no details. Returns its sequence number, or
    /// `None` when filtered out by level.
    pub fn emit(&mut self, level: LogLevel, event: &str, message: &str) -> Option<u64> {
        if !self.enabled(level) {
            return None;
        }
        self.emit_entry(JournalEntry::new(level, event, message))
    }

    pub fn emit_with(
        &mut self,
        level: LogLevel,
        event: &str,
        message: &str,
        details: serde_json::Value,
    ) -> Option<u64> {
        if !self.enabled(level) {
            return None;
        }
        self.emit_entry(JournalEntry::new(level, event, message).with_details(details))
    }

    /// Emit a fully populated entry; `seq` and `run_id` are assigned here.
    pub fn emit_entry(&mut self, mut entry: JournalEntry) -> Option<u64> {
        if !self.enabled(entry.level) {
            return None;
        }
        self.seq += 1;
        entry.seq = self.seq;
        entry.run_id.clone_from(&self.run_id);
        if entry.level >= LogLevel::Warn {
            self.warnings += 1;
        }
        if self.write_line(&entry).is_err() {
            self.write_failures += 1;
        }
        Some(entry.seq)
    }

    fn write_line(&mut self, entry: &JournalEntry) -> std::io::Result<()> {
        let line = match self.format {
            JournalFormat::Jsonl => entry.to_jsonl().map_err(std::io::Error::other)?,
            JournalFormat::Text => entry.to_text(),
        };
        match &mut self.sink {
            Sink::Buffer(buf) => writeln!(buf, "{line}"),
            Sink::Writer(w) => writeln!(w, "{line}"),
            Sink::Discard => Ok(()),
        }
    }

    /// Buffered lines of an in-memory journal; empty for other sinks.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        match &self.sink {
            Sink::Buffer(buf) => String::from_utf8_lossy(buf)
                .lines()
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Parsed entries of an in-memory JSONL journal.
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.sink {
            Sink::Writer(w) => w.flush(),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl fmt::Display for JournalValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the journal schema.
pub fn validate_journal_line(
    line: &str,
    line_number: usize,
) -> Result<JournalEntry, Vec<JournalValidationError>> {
    let err = |field: &str, message: String| JournalValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![err("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![err("<root>", "expected JSON object".to_string())]);
    };

    let mut errors = Vec::new();
    for field in ["seq", "timestamp", "run_id", "level", "event", "message"] {
        if !obj.contains_key(field) {
            errors.push(err(field, "required field missing".to_string()));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && LogLevel::from_str_loose(level).is_none_or(|l| l.as_str() != level)
    {
        errors.push(err("level", format!("invalid level: '{level}'")));
    }

    if let Some(seq) = obj.get("seq")
        && !seq.as_u64().is_some_and(|s| s > 0)
    {
        errors.push(err("seq", format!("seq must be a positive integer, got {seq}")));
    }

    if let Some(event) = obj.get("event").and_then(|v| v.as_str())
        && event.trim().is_empty()
    {
        errors.push(err("event", "event must be non-empty".to_string()));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<JournalEntry>(value)
        .map_err(|e| vec![err("<deserialization>", format!("failed to deserialize: {e}"))])
}

/// Validate every non-empty line of a JSONL file. Returns the line count
/// and any errors found.
pub fn validate_journal_file(
    path: &Path,
) -> Result<(usize, Vec<JournalValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;
    let mut last_seq = 0u64;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        match validate_journal_line(line, i + 1) {
            Ok(entry) => {
                if entry.seq <= last_seq {
                    all_errors.push(JournalValidationError {
                        line_number: i + 1,
                        field: "seq".to_string(),
                        message: format!("seq {} does not follow {last_seq}", entry.seq),
                    });
                }
                last_seq = entry.seq;
            }
            Err(errs) => all_errors.extend(errs),
        }
    }

    Ok((line_count, all_errors))
}

/// UTC timestamp with millisecond precision.
pub fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    // Approximate calendar; entries are ordered by `seq`, not by timestamp.
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis,
    )
}
