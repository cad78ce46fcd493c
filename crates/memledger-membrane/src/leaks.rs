//! Leak walk, point queries and teardown.

use memledger_core::{AllocationRecord, render};
use serde::Serialize;
use serde_json::json;

use crate::bulk::BulkAllocator;
use crate::journal::{Journal, LogLevel};
use crate::raw::HeapSnapshot;
use crate::tracker::Tracker;

/// Final accounting of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownSummary {
    pub leaks: usize,
    pub leaked_bytes: u64,
    pub records: usize,
    pub heap: HeapSnapshot,
    pub warnings: u64,
}

impl<B: BulkAllocator> Tracker<B> {
    /// Emit one warning per live record, in registration order, then a
    /// summary line. Returns the number of leaks.
    pub fn report_leaks(&mut self) -> usize {
        let mut count = 0usize;
        for record in self.registry.iter() {
            if !record.is_live() || record.address().is_none() {
                continue;
            }
            count += 1;
            let detail = render::record_detail(record, &self.hierarchies);
            self.journal.emit_with(
                LogLevel::Warn,
                "leak",
                &detail,
                json!({ "address": record.last_address(), "bytes": record.total_size() }),
            );
        }
        self.journal.emit_with(
            LogLevel::Info,
            "leak_summary",
            &format!("{count} leaked block(s), {} byte(s)", self.registry.live_bytes()),
            json!({ "leaks": count, "bytes": self.registry.live_bytes() }),
        );
        count
    }

    /// Look up the live record at `addr` and journal its detail.
    pub fn describe(&mut self, addr: usize) -> Option<AllocationRecord> {
        match self.registry.lookup(addr).cloned() {
            Some(record) => {
                let detail = render::record_detail(&record, &self.hierarchies);
                self.journal.emit(LogLevel::Info, "describe", &detail);
                Some(record)
            }
            None => {
                self.journal
                    .emit(LogLevel::Info, "describe", &format!("no entry for ptr={addr:#x}"));
                None
            }
        }
    }

    /// Run the leak walk, flush the journal and drop every record.
    ///
    /// Leaked blocks stay allocated. Any other tracker refuses their
    /// handles.
    pub fn teardown(self) -> TeardownSummary {
        self.finish().0
    }

    /// [`Tracker::teardown`], keeping the journal.
    pub fn finish(mut self) -> (TeardownSummary, Journal) {
        let leaks = self.report_leaks();
        let summary = TeardownSummary {
            leaks,
            leaked_bytes: self.registry.live_bytes(),
            records: self.registry.len(),
            heap: self.heap.snapshot(),
            warnings: self.journal.warnings(),
        };
        self.journal.emit_with(
            LogLevel::Info,
            "teardown",
            "tracker torn down",
            serde_json::to_value(summary).unwrap_or_default(),
        );
        if let Err(e) = self.journal.flush() {
            eprintln!("memledger: journal flush failed: {e}");
        }
        (summary, self.journal)
    }
}
