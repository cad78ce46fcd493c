//! Ad-hoc reports over the registry.
//!
//! A [`ReportSpec`] drives one full scan of the registry. Records that pass
//! every filter are folded into a transient [`StatsTree`] by walking the
//! group-by dimensions in order. Because released records stay in the
//! registry, a report reconstructs historical alloc/free activity, not just
//! the live snapshot. The resulting [`ReportTree`] is owned by the caller and
//! never stored by the registry.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::classify::Hierarchies;
use crate::registry::Registry;
use crate::stats::{Counters, StatsTree, SummaryRow};

/// Classification axis a report can group or filter by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Type,
    Name,
    File,
    Function,
    Line,
    Kind,
}

impl Dimension {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Name => "name",
            Self::File => "file",
            Self::Function => "function",
            Self::Line => "line",
            Self::Kind => "kind",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let dim = match s.trim().to_ascii_lowercase().as_str() {
            "type" => Self::Type,
            "name" | "var" => Self::Name,
            "file" => Self::File,
            "function" | "func" => Self::Function,
            "line" => Self::Line,
            "kind" => Self::Kind,
            other => return Err(ParseError::UnknownDimension(other.to_owned())),
        };
        Ok(dim)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown report dimension '{0}'")]
    UnknownDimension(String),
    #[error("filter '{0}' is not of the form dimension=value")]
    MalformedFilter(String),
}

/// Exact-match condition. A `None` value matches only unset labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub dimension: Dimension,
    pub value: Option<String>,
}

impl Filter {
    /// Parse `dimension=value`; an empty value selects unset labels.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (dim, value) = s
            .split_once('=')
            .ok_or_else(|| ParseError::MalformedFilter(s.to_owned()))?;
        let value = value.trim();
        Ok(Self {
            dimension: Dimension::parse(dim)?,
            value: (!value.is_empty()).then(|| value.to_owned()),
        })
    }
}

/// Group-by dimensions plus filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSpec {
    pub group_by: Vec<Dimension>,
    pub filters: Vec<Filter>,
}

impl ReportSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn group_by(mut self, dim: Dimension) -> Self {
        self.group_by.push(dim);
        self
    }

    #[must_use]
    pub fn filter(mut self, dim: Dimension, value: Option<&str>) -> Self {
        self.filters.push(Filter {
            dimension: dim,
            value: value.map(str::to_owned),
        });
        self
    }

    /// Parse a comma-separated group-by list such as `type,name`.
    pub fn parse_group_by(list: &str) -> Result<Vec<Dimension>, ParseError> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Dimension::parse)
            .collect()
    }

    /// Scan `registry` once and fold matching records into a fresh tree.
    #[must_use]
    pub fn run(&self, registry: &Registry, hierarchies: &Hierarchies) -> ReportTree {
        let mut tree = StatsTree::new("report");
        let mut matched = 0usize;

        'records: for record in registry.iter() {
            for filter in &self.filters {
                let value = hierarchies.value(record, filter.dimension);
                if value.as_deref() != filter.value.as_deref() {
                    continue 'records;
                }
            }
            matched += 1;

            let mut node = tree.root();
            for &dim in &self.group_by {
                let value = hierarchies.value(record, dim);
                node = tree.resolve(node, value.as_deref());
            }

            let bytes = record.total_size() as u64;
            let counters = Counters {
                allocs: 1,
                frees: u64::from(record.address().is_none()),
                current: if record.is_live() { bytes } else { 0 },
                peak: 0,
                total: bytes,
            };
            tree.fold(node, &counters);
        }

        let root = tree.root();
        tree.sort_recursive(root);
        tree.summarize(root);
        ReportTree {
            spec: self.clone(),
            tree,
            matched,
        }
    }
}

/// Transient result of one report run.
#[derive(Debug, Clone)]
pub struct ReportTree {
    spec: ReportSpec,
    tree: StatsTree,
    matched: usize,
}

impl ReportTree {
    #[must_use]
    pub fn spec(&self) -> &ReportSpec {
        &self.spec
    }

    /// Records that passed every filter.
    #[must_use]
    pub fn matched(&self) -> usize {
        self.matched
    }

    #[must_use]
    pub fn tree(&self) -> &StatsTree {
        &self.tree
    }

    /// Totals over every matched record.
    #[must_use]
    pub fn totals(&self) -> Counters {
        self.tree.counters(self.tree.root())
    }

    /// Counters of one group, addressed by its label path.
    #[must_use]
    pub fn group(&self, path: &[Option<&str>]) -> Option<Counters> {
        self.tree.find_path(path).map(|id| self.tree.counters(id))
    }

    /// Top-level groups in sorted order.
    #[must_use]
    pub fn groups(&self) -> Vec<(Option<&str>, Counters)> {
        let root = self.tree.root();
        self.tree
            .children(root)
            .iter()
            .map(|&c| (self.tree.label(c), self.tree.counters(c)))
            .collect()
    }

    #[must_use]
    pub fn rows(&self) -> Vec<SummaryRow> {
        self.tree.rows(self.tree.root(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Labels;
    use crate::layout::ArrayLayout;
    use crate::shape::Shape;

    fn fixture() -> (Registry, Hierarchies) {
        let mut reg = Registry::new();
        let mut h = Hierarchies::new();
        let entries = [
            ("A", "a0", 0x10, 1),
            ("A", "a1", 0x20, 2),
            ("A", "a0", 0x30, 3),
            ("B", "b0", 0x40, 4),
            ("B", "b1", 0x50, 5),
        ];
        for (ty, name, addr, len) in entries {
            let class = h.classify(&Labels {
                type_name: Some(ty),
                name: Some(name),
                file: Some("mesh.rs"),
                function: Some("build"),
                line: 0,
            });
            let layout = ArrayLayout::compute(8, &Shape::Vector(len)).unwrap();
            h.record_alloc(&class, layout.total_bytes() as u64);
            reg.register(addr, class, layout).unwrap();
        }
        (reg, h)
    }

    #[test]
    fn group_by_type_counts_each_group() {
        let (reg, h) = fixture();
        let report = ReportSpec::new().group_by(Dimension::Type).run(&reg, &h);
        assert_eq!(report.matched(), 5);
        let groups = report.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, Some("A"));
        assert_eq!(groups[0].1.allocs, 3);
        assert_eq!(groups[0].1.current, 8 * (1 + 2 + 3));
        assert_eq!(groups[1].0, Some("B"));
        assert_eq!(groups[1].1.allocs, 2);
        assert_eq!(groups[1].1.current, 8 * (4 + 5));
        assert_eq!(report.totals().allocs, 5);
    }

    #[test]
    fn released_records_count_as_frees() {
        let (mut reg, h) = fixture();
        reg.retire(0x20).unwrap();
        let report = ReportSpec::new().group_by(Dimension::Type).run(&reg, &h);
        let a = report.group(&[Some("A")]).unwrap();
        assert_eq!(a.allocs, 3);
        assert_eq!(a.frees, 1);
        assert_eq!(a.current, 8 * (1 + 3));
        assert_eq!(a.total, 8 * (1 + 2 + 3));
    }

    #[test]
    fn filters_match_exactly() {
        let (reg, h) = fixture();
        let report = ReportSpec::new()
            .group_by(Dimension::Name)
            .filter(Dimension::Type, Some("A"))
            .run(&reg, &h);
        assert_eq!(report.matched(), 3);
        assert_eq!(report.group(&[Some("a0")]).unwrap().allocs, 2);
        assert!(report.group(&[Some("b0")]).is_none());

        let none = ReportSpec::new()
            .filter(Dimension::Type, Some("a"))
            .run(&reg, &h);
        assert_eq!(none.matched(), 0);
    }

    #[test]
    fn null_filter_matches_unset_labels_only() {
        let (reg, h) = fixture();
        let report = ReportSpec::new()
            .filter(Dimension::Line, None)
            .run(&reg, &h);
        assert_eq!(report.matched(), 5);
        let report = ReportSpec::new()
            .filter(Dimension::Type, None)
            .run(&reg, &h);
        assert_eq!(report.matched(), 0);
    }

    #[test]
    fn nested_grouping_builds_paths() {
        let (reg, h) = fixture();
        let report = ReportSpec::new()
            .group_by(Dimension::Type)
            .group_by(Dimension::Name)
            .run(&reg, &h);
        assert_eq!(report.group(&[Some("A"), Some("a0")]).unwrap().allocs, 2);
        assert_eq!(report.group(&[Some("B"), Some("b1")]).unwrap().current, 40);
        // root + 2 types + 4 names
        assert_eq!(report.rows().len(), 7);
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(
            ReportSpec::parse_group_by("type, name"),
            Ok(vec![Dimension::Type, Dimension::Name])
        );
        assert!(ReportSpec::parse_group_by("type,colour").is_err());
        assert_eq!(
            Filter::parse("file=mesh.rs"),
            Ok(Filter {
                dimension: Dimension::File,
                value: Some("mesh.rs".to_owned())
            })
        );
        assert_eq!(Filter::parse("type=").unwrap().value, None);
        assert!(Filter::parse("type").is_err());
    }
}
