//! The two permanent classification hierarchies.
//!
//! - **types**: declared type, then variable name.
//! - **files**: source file, then function.
//!
//! Every tracked block is accounted at the leaf of both.

use std::borrow::Cow;

use crate::record::{AllocationRecord, Classification};
use crate::report::Dimension;
use crate::stats::StatsTree;

/// Labels supplied at an allocation call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Labels<'a> {
    pub type_name: Option<&'a str>,
    pub name: Option<&'a str>,
    pub file: Option<&'a str>,
    pub function: Option<&'a str>,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct Hierarchies {
    pub types: StatsTree,
    pub files: StatsTree,
}

impl Default for Hierarchies {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchies {
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: StatsTree::new("types"),
            files: StatsTree::new("files"),
        }
    }

    /// Resolve (creating as needed) the four nodes for `labels`.
    pub fn classify(&mut self, labels: &Labels<'_>) -> Classification {
        let type_node = self.types.resolve(self.types.root(), labels.type_name);
        let name_node = self.types.resolve(type_node, labels.name);
        let file_node = self.files.resolve(self.files.root(), labels.file);
        let function_node = self.files.resolve(file_node, labels.function);
        Classification {
            type_node,
            name_node,
            file_node,
            function_node,
            line: labels.line,
        }
    }

    pub fn record_alloc(&mut self, class: &Classification, bytes: u64) {
        self.types.record_alloc(class.name_node, bytes);
        self.files.record_alloc(class.function_node, bytes);
    }

    pub fn record_free(&mut self, class: &Classification, bytes: u64) {
        self.types.record_free(class.name_node, bytes);
        self.files.record_free(class.function_node, bytes);
    }

    /// Resize of a live block that keeps its record.
    pub fn record_resize(&mut self, class: &Classification, old_bytes: u64, new_bytes: u64) {
        let delta = i64::try_from(new_bytes).unwrap_or(i64::MAX)
            - i64::try_from(old_bytes).unwrap_or(i64::MAX);
        self.types.update_leaf(class.name_node, delta);
        self.files.update_leaf(class.function_node, delta);
    }

    /// Refresh internal-node totals in both trees.
    pub fn summarize(&mut self) {
        let root = self.types.root();
        self.types.summarize(root);
        let root = self.files.root();
        self.files.summarize(root);
    }

    /// Value of one report dimension for `record`; `None` when unset.
    #[must_use]
    pub fn value<'a>(&'a self, record: &'a AllocationRecord, dim: Dimension) -> Option<Cow<'a, str>> {
        let class = record.classification();
        match dim {
            Dimension::Type => self.types.label(class.type_node).map(Cow::Borrowed),
            Dimension::Name => self.types.label(class.name_node).map(Cow::Borrowed),
            Dimension::File => self.files.label(class.file_node).map(Cow::Borrowed),
            Dimension::Function => self.files.label(class.function_node).map(Cow::Borrowed),
            Dimension::Line => (class.line != 0).then(|| Cow::Owned(class.line.to_string())),
            Dimension::Kind => Some(Cow::Borrowed(record.kind().as_str())),
        }
    }
}
