//! # memledger-membrane
//!
//! The instrumented allocator. Every block handed out goes through a
//! [`Tracker`], which owns the raw heap, the allocation registry, both
//! classification hierarchies and the journal.
//!
//! # Architecture
//!
//! - **Bulk seam** (`bulk`): the system allocator behind a trait, plus a
//!   fault injector
//! - **Raw heap** (`raw`): 16-byte headers, byte counters, one retry on
//!   allocation failure
//! - **Blocks** (`block`): owned handles with typed element access
//! - **Materialization** (`materialize`): pointer tables written into real
//!   blocks
//! - **Dispatch** (`tracker`): fast path and bookkeeping slow path
//! - **Leak walk** (`leaks`): leak reports, point queries, teardown
//! - **Watch sections** (`watch`): bracketed delta reports
//! - **Journal** (`journal`): structured text/JSONL log sink
//! - **Configuration** (`config`): environment-driven settings
//! - **Fatal errors** (`fatal`): out-of-memory and invariant violations
//! - **Shared handles** (`global`): coarse-locked and process-wide trackers
//!
//! ```no_run
//! use memledger_membrane::{Tag, Tracker, TrackerConfig, site};
//!
//! let mut tracker = Tracker::new(TrackerConfig::from_env());
//! let tag = Tag::new(site!()).with_type("f64").with_name("pressure");
//! let mut grid = tracker.alloc_rect(8, &[64, 64], &tag)?;
//! grid.set::<f64>(&[3, 7], 1.25).expect("in bounds");
//! let _ = tracker.release(grid)?;
//! tracker.teardown();
//! # Ok::<(), memledger_membrane::FatalError>(())
//! ```

#![deny(unsafe_code)]

pub mod block;
pub mod bulk;
pub mod config;
pub mod fatal;
pub mod global;
pub mod journal;
pub mod leaks;
pub mod materialize;
pub mod raw;
pub mod site;
pub mod tracker;
pub mod watch;

pub use block::{AccessError, Block, Item, JaggedSetup};
pub use bulk::{BulkAllocator, FaultInjector, LibcBulk};
pub use config::{DEFAULT_WATCH_RATIO, TrackerConfig, TrackingMode};
pub use fatal::{FatalError, FatalPolicy};
pub use global::{SharedError, SharedTracker};
pub use journal::{
    Journal, JournalEntry, JournalFormat, JournalValidationError, LogLevel, now_utc,
    validate_journal_file, validate_journal_line,
};
pub use leaks::TeardownSummary;
pub use raw::{HEADER_SIZE, HeapId, HeapSnapshot};
pub use site::{Site, Tag};
pub use tracker::{Released, TRACKING_COMPILED, Tracker, TrackerSnapshot};
pub use watch::{WatchDelta, WatchMark};
