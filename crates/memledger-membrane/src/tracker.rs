//! Allocation dispatch.
//!
//! Every allocate, resize and release enters a [`Tracker`]. The fast path
//! only touches the raw heap. The slow path additionally registers the
//! block, keeps its record current and moves the leaf counters of both
//! classification hierarchies. Which path runs is decided per call:
//!
//! - at build time by the `tracking` cargo feature;
//! - at run time by [`Tracker::set_enabled`].
//!
//! Blocks created on the fast path carry no tracked flag and are released
//! through the raw heap only. A block created on the slow path keeps its
//! bookkeeping up to date for its whole life, even if tracking is suspended
//! in between, so its record can never dangle.

use std::ptr::NonNull;

use memledger_core::{
    ArrayLayout, Dimension, Hierarchies, Registry, RelocationPlan, ReportSpec, ReportTree, Shape,
    render,
};
use serde::Serialize;
use serde_json::json;

use crate::block::{Block, JaggedSetup};
use crate::bulk::{BulkAllocator, LibcBulk};
use crate::config::TrackerConfig;
use crate::fatal::{FatalError, FatalPolicy};
use crate::journal::{Journal, LogLevel};
use crate::materialize;
use crate::raw::{FLAG_TRACKED, HeapId, HeapSnapshot, RawHeap, ReleaseOutcome};
use crate::site::{Site, Tag};

/// Whether the bookkeeping slow path is compiled in.
pub const TRACKING_COMPILED: bool = cfg!(feature = "tracking");

/// Result of releasing a block.
#[derive(Debug)]
#[must_use]
pub enum Released {
    /// Other owners remain; the handle comes back.
    Retained(Block),
    /// The block was freed.
    Freed { bytes: usize },
}

/// Point-in-time counters of one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackerSnapshot {
    pub heap: HeapSnapshot,
    pub tracking: bool,
    pub records: usize,
    pub live_records: usize,
    pub tracked_bytes: u64,
    pub registry_mru_hits: u64,
    pub registry_mru_misses: u64,
}

pub struct Tracker<B: BulkAllocator = LibcBulk> {
    pub(crate) heap: RawHeap<B>,
    pub(crate) config: TrackerConfig,
    pub(crate) enabled: bool,
    pub(crate) registry: Registry,
    pub(crate) hierarchies: Hierarchies,
    pub(crate) journal: Journal,
}

impl Tracker<LibcBulk> {
    /// Tracker over the C allocator, journaling to stderr.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        let journal = Journal::stderr("memledger", config.journal_format)
            .with_min_level(config.log_level);
        Self::with_parts(config, LibcBulk, journal)
    }

    /// [`Tracker::new`] with configuration read from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(TrackerConfig::from_env())
    }
}

impl<B: BulkAllocator> Tracker<B> {
    #[must_use]
    pub fn with_parts(config: TrackerConfig, bulk: B, journal: Journal) -> Self {
        Self {
            heap: RawHeap::new(bulk),
            enabled: config.tracking.is_on(),
            config,
            registry: Registry::new(),
            hierarchies: Hierarchies::new(),
            journal,
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn journal_mut(&mut self) -> &mut Journal {
        &mut self.journal
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn hierarchies(&self) -> &Hierarchies {
        &self.hierarchies
    }

    /// Identity of the heap behind this tracker; see [`Block::heap_id`].
    #[must_use]
    pub fn heap_id(&self) -> HeapId {
        self.heap.id()
    }

    pub fn bulk_mut(&mut self) -> &mut B {
        self.heap.bulk_mut()
    }

    /// Suspend or resume bookkeeping for new blocks.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.journal.emit(
                LogLevel::Debug,
                "tracking",
                if enabled { "resumed" } else { "suspended" },
            );
        }
        self.enabled = enabled;
    }

    /// True when new blocks take the slow path.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        TRACKING_COMPILED && self.enabled
    }

    /// Bytes outstanding at the raw heap.
    #[must_use]
    pub fn current_bytes(&self) -> usize {
        self.heap.current()
    }

    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.heap.peak()
    }

    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let (hits, misses) = self.registry.mru_stats();
        TrackerSnapshot {
            heap: self.heap.snapshot(),
            tracking: self.is_tracking(),
            records: self.registry.len(),
            live_records: self.registry.live_count(),
            tracked_bytes: self.registry.live_bytes(),
            registry_mru_hits: hits,
            registry_mru_misses: misses,
        }
    }

    /// Log a fatal error, then abort or hand it back per the policy.
    pub(crate) fn fatal(&mut self, err: FatalError) -> FatalError {
        let site = err.site();
        self.journal.emit_with(
            LogLevel::Fatal,
            err.event(),
            &err.to_string(),
            json!({
                "file": site.file,
                "function": site.function,
                "line": site.line,
                "current_bytes": self.heap.current(),
                "peak_bytes": self.heap.peak(),
            }),
        );
        match self.config.fatal {
            FatalPolicy::Abort => {
                eprintln!("memledger: fatal: {err}");
                let _ = self.journal.flush();
                std::process::abort();
            }
            FatalPolicy::Return => err,
        }
    }

    fn invariant(&mut self, site: Site, what: impl Into<String>) -> FatalError {
        self.fatal(FatalError::invariant(site, what))
    }

    /// A block may only come back to the heap that allocated it.
    fn check_owner(&mut self, block: &Block, site: Site) -> Result<(), FatalError> {
        let ours = self.heap.id();
        if block.heap_id() == ours {
            return Ok(());
        }
        let what = format!(
            "block {:#x} belongs to {} but was handed to {ours}",
            block.addr(),
            block.heap_id()
        );
        Err(self.invariant(site, what))
    }

    // -----------------------------------------------------------------------
    // Allocation entry points
    // -----------------------------------------------------------------------

    /// Allocate any shape.
    ///
    /// Jagged shapes with no data cells log a warning and yield `None`;
    /// every other shape yields a block.
    pub fn allocate(
        &mut self,
        item_size: usize,
        shape: &Shape,
        tag: &Tag<'_>,
    ) -> Result<Option<Block>, FatalError> {
        let layout = match ArrayLayout::compute(item_size, shape) {
            Ok(layout) => layout,
            Err(e) => return Err(self.invariant(tag.site, e.to_string())),
        };
        if shape.kind().is_jagged() && shape.cell_count() == Some(0) {
            self.journal.emit_with(
                LogLevel::Warn,
                "empty_jagged",
                &format!("{} request {shape} holds no cells; nothing allocated", shape.kind()),
                json!({ "file": tag.site.file, "line": tag.site.line }),
            );
            return Ok(None);
        }
        self.allocate_layout(layout, tag).map(Some)
    }

    fn allocate_layout(&mut self, layout: ArrayLayout, tag: &Tag<'_>) -> Result<Block, FatalError> {
        let tracked = self.is_tracking();
        let flags = if tracked { FLAG_TRACKED } else { 0 };
        let ptr = match self.heap.allocate(layout.total_bytes(), flags, tag.site) {
            Ok(ptr) => ptr,
            Err(e) => return Err(self.fatal(e)),
        };
        // SAFETY: the heap returned a fresh, zeroed block of exactly
        // `total_bytes` user bytes.
        #[allow(unsafe_code)]
        let mut block = unsafe { Block::from_raw(ptr, layout, self.heap.id()) };
        let base = block.addr();
        let layout = block.layout().clone();
        materialize::write_pointer_tables(block.bytes_mut(), base, &layout);

        if tracked {
            let class = self.hierarchies.classify(&tag.labels());
            let bytes = layout.total_bytes() as u64;
            if let Err(e) = self.registry.register(base, class, layout) {
                return Err(self.invariant(tag.site, e.to_string()));
            }
            self.hierarchies.record_alloc(&class, bytes);
            if self.journal.enabled(LogLevel::Trace) {
                self.journal.emit(
                    LogLevel::Trace,
                    "alloc",
                    &format!("ptr={base:#x} shape={} bytes={bytes}", block.shape()),
                );
            }
        }
        Ok(block)
    }

    fn expect_block(&mut self, block: Option<Block>, site: Site) -> Result<Block, FatalError> {
        match block {
            Some(block) => Ok(block),
            None => Err(self.invariant(site, "allocation produced no block")),
        }
    }

    pub fn alloc_scalar(&mut self, item_size: usize, tag: &Tag<'_>) -> Result<Block, FatalError> {
        let block = self.allocate(item_size, &Shape::Scalar, tag)?;
        self.expect_block(block, tag.site)
    }

    pub fn alloc_vec(
        &mut self,
        item_size: usize,
        len: usize,
        tag: &Tag<'_>,
    ) -> Result<Block, FatalError> {
        let block = self.allocate(item_size, &Shape::Vector(len), tag)?;
        self.expect_block(block, tag.site)
    }

    /// Pointer-chain array of rank 2 to 4.
    pub fn alloc_rect(
        &mut self,
        item_size: usize,
        dims: &[usize],
        tag: &Tag<'_>,
    ) -> Result<Block, FatalError> {
        let block = self.allocate(item_size, &Shape::Rect(dims.to_vec()), tag)?;
        self.expect_block(block, tag.site)
    }

    /// Contiguous N-dimensional array addressed by the row-major formula.
    pub fn alloc_flat(
        &mut self,
        item_size: usize,
        dims: &[usize],
        tag: &Tag<'_>,
    ) -> Result<Block, FatalError> {
        let block = self.allocate(item_size, &Shape::Flat(dims.to_vec()), tag)?;
        self.expect_block(block, tag.site)
    }

    pub fn alloc_jagged2(
        &mut self,
        item_size: usize,
        rows: &[usize],
        tag: &Tag<'_>,
    ) -> Result<Option<Block>, FatalError> {
        self.allocate(item_size, &Shape::Jagged2 { rows: rows.to_vec() }, tag)
    }

    /// Cell-count table for a later [`Tracker::alloc_jagged3_from_setup`].
    /// `rows[i]` is the number of cells in row `i`.
    pub fn alloc_jagged_setup(
        &mut self,
        rows: &[usize],
        tag: &Tag<'_>,
    ) -> Result<Option<JaggedSetup>, FatalError> {
        let shape = Shape::JaggedSetup {
            rows: rows.to_vec(),
        };
        Ok(self
            .allocate(std::mem::size_of::<usize>(), &shape, tag)?
            .map(JaggedSetup::new))
    }

    pub fn alloc_jagged3(
        &mut self,
        item_size: usize,
        cells: &[Vec<usize>],
        tag: &Tag<'_>,
    ) -> Result<Option<Block>, FatalError> {
        self.allocate(
            item_size,
            &Shape::Jagged3 {
                cells: cells.to_vec(),
            },
            tag,
        )
    }

    /// Three-level jagged array shaped by a filled-in setup table. The setup
    /// block is left alive for the caller to release.
    pub fn alloc_jagged3_from_setup(
        &mut self,
        item_size: usize,
        setup: &JaggedSetup,
        tag: &Tag<'_>,
    ) -> Result<Option<Block>, FatalError> {
        self.alloc_jagged3(item_size, &setup.cells(), tag)
    }

    // -----------------------------------------------------------------------
    // Resize
    // -----------------------------------------------------------------------

    /// Grow or shrink a vector, keeping the common prefix.
    pub fn realloc_vec(&mut self, block: Block, new_len: usize, site: Site) -> Result<Block, FatalError> {
        if !matches!(block.shape(), Shape::Vector(_)) {
            let what = format!("realloc_vec on {} block {}", block.shape().kind(), block.shape());
            return Err(self.invariant(site, what));
        }
        self.resize(block, &Shape::Vector(new_len), site)
    }

    /// Enlarge a rectangular array, keeping every existing cell at its index.
    /// Rank changes and shrinking are invariant violations.
    pub fn resize_rect(&mut self, block: Block, new_dims: &[usize], site: Site) -> Result<Block, FatalError> {
        self.resize(block, &Shape::Rect(new_dims.to_vec()), site)
    }

    fn resize(&mut self, mut block: Block, new_shape: &Shape, site: Site) -> Result<Block, FatalError> {
        self.check_owner(&block, site)?;
        let new_layout = match ArrayLayout::compute(block.item_size(), new_shape) {
            Ok(layout) => layout,
            Err(e) => return Err(self.invariant(site, e.to_string())),
        };
        let plan = match RelocationPlan::between(block.layout(), &new_layout) {
            Ok(plan) => plan,
            Err(e) => return Err(self.invariant(site, e.to_string())),
        };

        let old_addr = block.addr();
        // SAFETY: block is a live allocation of this heap.
        #[allow(unsafe_code)]
        let header = unsafe { self.heap.header(block.ptr()) };
        let record = if TRACKING_COMPILED && header.is_tracked() {
            let Some(record) = self.registry.lookup(old_addr) else {
                let what = format!("tracked block {old_addr:#x} has no live record");
                return Err(self.invariant(site, what));
            };
            if record.layout() != block.layout() {
                let what = format!(
                    "caller shape {} disagrees with recorded shape {} at {old_addr:#x}",
                    block.shape(),
                    record.shape()
                );
                return Err(self.invariant(site, what));
            }
            Some((record.id(), *record.classification()))
        } else {
            None
        };

        let old_total = block.len();
        let new_total = new_layout.total_bytes();
        if new_total < old_total {
            // Shrinking vector: the kept prefix is already in place.
            if let Err(e) = plan.apply(block.bytes_mut()) {
                return Err(self.invariant(site, e.to_string()));
            }
        }
        // SAFETY: block is live; on success its old pointer is dead and
        // only the returned one is used.
        #[allow(unsafe_code)]
        let moved = unsafe { self.heap.reallocate(block.ptr(), new_total, site) };
        let ptr: NonNull<u8> = match moved {
            Ok(ptr) => ptr,
            Err(e) => return Err(self.fatal(e)),
        };
        // SAFETY: the heap resized the block to exactly `new_total`
        // initialized bytes; the old handle is consumed here.
        #[allow(unsafe_code)]
        let mut block = unsafe { Block::from_raw(ptr, new_layout.clone(), self.heap.id()) };
        let new_addr = block.addr();
        let relocated = if new_total >= old_total {
            materialize::relocate(block.bytes_mut(), new_addr, &plan)
        } else {
            materialize::write_pointer_tables(block.bytes_mut(), new_addr, &new_layout);
            Ok(())
        };
        if let Err(e) = relocated {
            return Err(self.invariant(site, e.to_string()));
        }

        if let Some((id, class)) = record {
            if let Err(e) = self.registry.relocate(id, new_addr, new_layout) {
                return Err(self.invariant(site, e.to_string()));
            }
            self.hierarchies
                .record_resize(&class, old_total as u64, new_total as u64);
            if self.journal.enabled(LogLevel::Trace) {
                self.journal.emit(
                    LogLevel::Trace,
                    "realloc",
                    &format!(
                        "ptr={old_addr:#x}->{new_addr:#x} shape={} bytes={old_total}->{new_total}",
                        block.shape()
                    ),
                );
            }
        }
        Ok(block)
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    /// Add one owner to `block`; returns the extra-owner count.
    pub fn retain(&mut self, block: &Block) -> Result<u32, FatalError> {
        self.check_owner(block, Site::unknown())?;
        // SAFETY: block is a live allocation of this heap.
        #[allow(unsafe_code)]
        let instances = unsafe { self.heap.retain(block.ptr()) };
        Ok(instances)
    }

    /// Drop one owner. The block is freed, and its record released, once no
    /// extra owners remain. A block from another tracker is refused and
    /// stays allocated in its own heap.
    pub fn release(&mut self, block: Block) -> Result<Released, FatalError> {
        self.check_owner(&block, Site::unknown())?;
        let addr = block.addr();
        // SAFETY: block is a live allocation of this heap and is consumed
        // unless handed back as Retained.
        #[allow(unsafe_code)]
        let outcome = unsafe { self.heap.release(block.ptr()) };
        match outcome {
            ReleaseOutcome::Retained { .. } => Ok(Released::Retained(block)),
            ReleaseOutcome::Freed { size, tracked } => {
                if TRACKING_COMPILED && tracked {
                    let id = match self.registry.retire(addr) {
                        Ok(id) => id,
                        Err(e) => return Err(self.invariant(Site::unknown(), e.to_string())),
                    };
                    if let Some(record) = self.registry.get(id) {
                        let class = *record.classification();
                        self.hierarchies.record_free(&class, size as u64);
                    }
                    if self.journal.enabled(LogLevel::Trace) {
                        self.journal
                            .emit(LogLevel::Trace, "release", &format!("ptr={addr:#x} bytes={size}"));
                    }
                }
                Ok(Released::Freed { bytes: size })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Summaries and reports
    // -----------------------------------------------------------------------

    /// Refresh internal-node totals of both hierarchies.
    pub fn summarize(&mut self) {
        self.hierarchies.summarize();
    }

    /// Exclude a declared type from its hierarchy's totals and listings.
    /// Returns false if the type has never been seen.
    pub fn set_type_ignored(&mut self, type_name: Option<&str>, ignored: bool) -> bool {
        let types = &mut self.hierarchies.types;
        match types.find(types.root(), type_name) {
            Some(node) => {
                types.set_ignored(node, ignored);
                true
            }
            None => false,
        }
    }

    /// Summarize and journal the types hierarchy; returns the rendered table.
    pub fn print_types(&mut self, max_depth: Option<usize>) -> String {
        self.summarize();
        self.hierarchies.types.sort_recursive(self.hierarchies.types.root());
        let table = render::tree_table(&self.hierarchies.types, max_depth);
        self.journal.emit(LogLevel::Info, "summary_types", &table);
        table
    }

    /// Summarize and journal the files hierarchy; returns the rendered table.
    pub fn print_files(&mut self, max_depth: Option<usize>) -> String {
        self.summarize();
        self.hierarchies.files.sort_recursive(self.hierarchies.files.root());
        let table = render::tree_table(&self.hierarchies.files, max_depth);
        self.journal.emit(LogLevel::Info, "summary_files", &table);
        table
    }

    /// Run an ad-hoc report and journal it. The tree is not kept.
    pub fn report(&mut self, spec: &ReportSpec) -> ReportTree {
        let tree = spec.run(&self.registry, &self.hierarchies);
        let group_by: Vec<&str> = spec.group_by.iter().map(|d| Dimension::as_str(*d)).collect();
        let filters: Vec<String> = spec
            .filters
            .iter()
            .map(|f| format!("{}={}", f.dimension, f.value.as_deref().unwrap_or("")))
            .collect();
        self.journal.emit_with(
            LogLevel::Info,
            "report",
            &render::summary_table(&tree.rows()),
            json!({
                "group_by": group_by,
                "filters": filters,
                "matched": tree.matched(),
            }),
        );
        tree
    }
}
