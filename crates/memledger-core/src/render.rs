//! Text rendering for summaries and point queries.
//!
//! Summary rows are fixed-width columns with the label indented two spaces
//! per depth level. Point queries are a single line of `key=value` pairs so
//! they stay greppable in a journal.

use std::fmt::Write as _;

use crate::classify::Hierarchies;
use crate::record::AllocationRecord;
use crate::report::Dimension;
use crate::stats::{StatsTree, SummaryRow};

/// Printed for a node or field whose label was never supplied.
pub const UNSET_LABEL: &str = "(unset)";

const LABEL_WIDTH: usize = 36;

#[must_use]
pub fn summary_header() -> String {
    format!(
        "{:<LABEL_WIDTH$} {:>8} {:>8} {:>12} {:>12} {:>12}",
        "label", "allocs", "frees", "current", "peak", "total"
    )
}

#[must_use]
pub fn summary_line(row: &SummaryRow) -> String {
    let label = format!(
        "{}{}",
        "  ".repeat(row.depth),
        row.label.as_deref().unwrap_or(UNSET_LABEL)
    );
    let c = &row.counters;
    format!(
        "{label:<LABEL_WIDTH$} {:>8} {:>8} {:>12} {:>12} {:>12}",
        c.allocs, c.frees, c.current, c.peak, c.total
    )
}

/// Header plus one line per row.
#[must_use]
pub fn summary_table(rows: &[SummaryRow]) -> String {
    let mut out = summary_header();
    for row in rows {
        out.push('\n');
        out.push_str(&summary_line(row));
    }
    out
}

/// Render `tree` from its root. The tree must have been summarized.
#[must_use]
pub fn tree_table(tree: &StatsTree, max_depth: Option<usize>) -> String {
    summary_table(&tree.rows(tree.root(), max_depth))
}

/// One-line description of a record.
///
/// Released records print the address they last occupied.
#[must_use]
pub fn record_detail(record: &AllocationRecord, hierarchies: &Hierarchies) -> String {
    let field = |dim| {
        hierarchies
            .value(record, dim)
            .map_or_else(|| UNSET_LABEL.to_owned(), |v| v.into_owned())
    };
    let mut out = format!("ptr={:#x}", record.last_address());
    for dim in [
        Dimension::Type,
        Dimension::Name,
        Dimension::File,
        Dimension::Function,
    ] {
        let _ = write!(out, " {dim}={}", field(dim));
    }
    let _ = write!(
        out,
        " line={} kind={} item_size={} total_size={} shape={}",
        record.classification().line,
        record.kind(),
        record.item_size(),
        record.total_size(),
        record.shape()
    );
    if !record.is_live() {
        out.push_str(" status=released");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Labels;
    use crate::layout::ArrayLayout;
    use crate::registry::Registry;
    use crate::shape::Shape;

    #[test]
    fn summary_line_indents_by_depth() {
        let row = SummaryRow {
            depth: 2,
            label: Some("pressure".to_owned()),
            counters: crate::stats::Counters {
                allocs: 3,
                frees: 1,
                current: 64,
                peak: 96,
                total: 128,
            },
        };
        let line = summary_line(&row);
        assert!(line.starts_with("    pressure "));
        let cols: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(cols, vec!["pressure", "3", "1", "64", "96", "128"]);
        assert_eq!(summary_header().split_whitespace().count(), 6);
    }

    #[test]
    fn unset_label_renders_placeholder() {
        let row = SummaryRow {
            depth: 0,
            label: None,
            counters: crate::stats::Counters::default(),
        };
        assert!(summary_line(&row).starts_with(UNSET_LABEL));
    }

    #[test]
    fn record_detail_lists_every_field() {
        let mut reg = Registry::new();
        let mut h = Hierarchies::new();
        let class = h.classify(&Labels {
            type_name: Some("f64"),
            name: Some("field"),
            file: Some("grid.rs"),
            function: None,
            line: 7,
        });
        let layout = ArrayLayout::compute(8, &Shape::Rect(vec![2, 3])).unwrap();
        let id = reg.register(0x1000, class, layout).unwrap();
        let line = record_detail(reg.get(id).unwrap(), &h);
        assert_eq!(
            line,
            format!(
                "ptr=0x1000 type=f64 name=field file=grid.rs function=(unset) line=7 \
                 kind=2d item_size=8 total_size={} shape=[2x3]",
                2 * crate::layout::POINTER_SIZE + 48
            )
        );
        reg.retire(0x1000).unwrap();
        assert!(record_detail(reg.get(id).unwrap(), &h).ends_with("status=released"));
    }
}
