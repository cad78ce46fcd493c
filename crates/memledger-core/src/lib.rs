//! # memledger-core
//!
//! Safe bookkeeping behind the memledger instrumented allocator.
//!
//! Nothing in this crate touches memory it does not own. It computes array
//! layouts, keeps allocation records, aggregates statistics and renders
//! reports; the membrane crate owns the raw bytes and drives these types.
//!
//! - **Shapes** (`shape`): tagged descriptors for scalar, vector, rectangular,
//!   flat and jagged arrays
//! - **Layout** (`layout`): exact byte layout, pointer-table entries and
//!   resize plans
//! - **Statistics** (`stats`): arena-backed labelled trees with lazy summaries
//! - **Records** (`record`, `registry`): live index plus append-only history
//! - **Classification** (`classify`): the types and files hierarchies
//! - **Reports** (`report`, `render`): ad-hoc grouping and text output

#![deny(unsafe_code)]

pub mod classify;
pub mod layout;
pub mod record;
pub mod registry;
pub mod render;
pub mod report;
pub mod shape;
pub mod stats;

pub use classify::{Hierarchies, Labels};
pub use layout::{ArrayLayout, LayoutError, POINTER_SIZE, PointerEntry, RelocationPlan, RowMove};
pub use record::{AllocationRecord, Classification, RecordId, RecordStatus, Stamp};
pub use registry::{Registry, RegistryError};
pub use report::{Dimension, Filter, ParseError, ReportSpec, ReportTree};
pub use shape::{AllocKind, MAX_RECT_RANK, Shape, ShapeError, flat_index};
pub use stats::{Counters, NodeId, StatsNode, StatsTree, SummaryRow};
