//! Statistics aggregation trees.
//!
//! A [`StatsTree`] is an arena of labelled nodes. Leaves are updated
//! incrementally as blocks are allocated, resized and released; internal
//! nodes hold derived sums that are only refreshed by [`StatsTree::summarize`]
//! and are stale until then.
//!
//! Nodes are addressed by [`NodeId`]. Ids are stable for the life of the tree,
//! so comparing ids is comparing nodes.

use std::collections::HashMap;

use serde::Serialize;

/// Stable handle to a node inside one [`StatsTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Usage counters carried by every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Blocks allocated.
    pub allocs: u64,
    /// Blocks released.
    pub frees: u64,
    /// Bytes currently outstanding.
    pub current: u64,
    /// Running maximum of `current`.
    pub peak: u64,
    /// Bytes ever allocated (positive deltas only).
    pub total: u64,
}

impl Counters {
    /// Blocks still live.
    #[must_use]
    pub const fn live(&self) -> u64 {
        self.allocs.saturating_sub(self.frees)
    }

    /// Apply a signed byte delta.
    pub fn apply_delta(&mut self, delta: i64) {
        self.current = self.current.saturating_add_signed(delta);
        if delta > 0 {
            self.total = self.total.saturating_add(delta.unsigned_abs());
        }
        self.peak = self.peak.max(self.current);
    }

    fn absorb(&mut self, other: &Self) {
        self.allocs += other.allocs;
        self.frees += other.frees;
        self.current += other.current;
        self.peak += other.peak;
        self.total += other.total;
    }
}

/// One node of a statistics tree.
#[derive(Debug, Clone)]
pub struct StatsNode {
    label: Option<String>,
    parent: Option<NodeId>,
    depth: usize,
    counters: Counters,
    children: Vec<NodeId>,
    by_label: HashMap<String, NodeId>,
    unlabeled: Option<NodeId>,
    mru: Option<NodeId>,
    ignored: bool,
}

impl StatsNode {
    fn new(label: Option<&str>, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            label: label.map(str::to_owned),
            parent,
            depth,
            counters: Counters::default(),
            children: Vec::new(),
            by_label: HashMap::new(),
            unlabeled: None,
            mru: None,
            ignored: false,
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Distance from the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn is_ignored(&self) -> bool {
        self.ignored
    }

    fn child(&self, label: Option<&str>) -> Option<NodeId> {
        match label {
            Some(l) => self.by_label.get(l).copied(),
            None => self.unlabeled,
        }
    }
}

/// One rendered line of a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRow {
    pub depth: usize,
    pub label: Option<String>,
    pub counters: Counters,
}

/// Arena-backed labelled tree.
#[derive(Debug, Clone)]
pub struct StatsTree {
    nodes: Vec<StatsNode>,
    mru_hits: u64,
    mru_misses: u64,
}

impl StatsTree {
    /// Create a tree holding only its root.
    #[must_use]
    pub fn new(root_label: &str) -> Self {
        Self {
            nodes: vec![StatsNode::new(Some(root_label), None, 0)],
            mru_hits: 0,
            mru_misses: 0,
        }
    }

    #[must_use]
    pub const fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes including the root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &StatsNode {
        &self.nodes[id.index()]
    }

    #[must_use]
    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.node(id).label()
    }

    #[must_use]
    pub fn counters(&self, id: NodeId) -> Counters {
        self.node(id).counters
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    /// `(hits, misses)` of the per-node most-recently-used child caches.
    #[must_use]
    pub fn mru_stats(&self) -> (u64, u64) {
        (self.mru_hits, self.mru_misses)
    }

    /// Find a child without creating it.
    #[must_use]
    pub fn find(&self, parent: NodeId, label: Option<&str>) -> Option<NodeId> {
        self.node(parent).child(label)
    }

    /// Find a descendant by label path.
    #[must_use]
    pub fn find_path(&self, path: &[Option<&str>]) -> Option<NodeId> {
        path.iter()
            .try_fold(self.root(), |node, &label| self.find(node, label))
    }

    /// Find or create the child of `parent` labelled `label`.
    pub fn resolve(&mut self, parent: NodeId, label: Option<&str>) -> NodeId {
        if let Some(cached) = self.nodes[parent.index()].mru
            && self.nodes[cached.index()].label.as_deref() == label
        {
            self.mru_hits += 1;
            return cached;
        }
        self.mru_misses += 1;

        let id = match self.nodes[parent.index()].child(label) {
            Some(existing) => existing,
            None => {
                let id = NodeId(
                    u32::try_from(self.nodes.len()).unwrap_or(u32::MAX),
                );
                let depth = self.nodes[parent.index()].depth + 1;
                self.nodes.push(StatsNode::new(label, Some(parent), depth));
                let p = &mut self.nodes[parent.index()];
                p.children.push(id);
                match label {
                    Some(l) => {
                        p.by_label.insert(l.to_owned(), id);
                    }
                    None => p.unlabeled = Some(id),
                }
                id
            }
        };
        self.nodes[parent.index()].mru = Some(id);
        id
    }

    /// Add a signed byte delta to a leaf.
    pub fn update_leaf(&mut self, node: NodeId, delta: i64) {
        self.nodes[node.index()].counters.apply_delta(delta);
    }

    /// Count one allocation of `bytes` at a leaf.
    pub fn record_alloc(&mut self, node: NodeId, bytes: u64) {
        self.nodes[node.index()].counters.allocs += 1;
        self.update_leaf(node, to_delta(bytes));
    }

    /// Count one release of `bytes` at a leaf.
    pub fn record_free(&mut self, node: NodeId, bytes: u64) {
        self.nodes[node.index()].counters.frees += 1;
        self.update_leaf(node, -to_delta(bytes));
    }

    /// Add externally computed counters to a leaf; `peak` follows the new
    /// `current`.
    pub fn fold(&mut self, node: NodeId, c: &Counters) {
        let n = &mut self.nodes[node.index()].counters;
        n.allocs += c.allocs;
        n.frees += c.frees;
        n.current += c.current;
        n.total += c.total;
        n.peak = n.peak.max(n.current).max(c.peak);
    }

    /// Exclude `node` from its parent's sums and listings.
    pub fn set_ignored(&mut self, node: NodeId, ignored: bool) {
        self.nodes[node.index()].ignored = ignored;
    }

    /// Recompute every internal node below (and including) `node`.
    ///
    /// Leaves keep their incremental counters. Ignored children are still
    /// summarized themselves but do not contribute to their parent.
    pub fn summarize(&mut self, node: NodeId) -> Counters {
        let children = self.nodes[node.index()].children.clone();
        if children.is_empty() {
            return self.nodes[node.index()].counters;
        }
        let mut sum = Counters::default();
        for child in children {
            let c = self.summarize(child);
            if !self.nodes[child.index()].ignored {
                sum.absorb(&c);
            }
        }
        self.nodes[node.index()].counters = sum;
        sum
    }

    /// Order the children of `node` by label: case-sensitive, unset first.
    pub fn sort_children(&mut self, node: NodeId) {
        let mut children = std::mem::take(&mut self.nodes[node.index()].children);
        children.sort_by(|a, b| self.nodes[a.index()].label.cmp(&self.nodes[b.index()].label));
        self.nodes[node.index()].children = children;
    }

    /// [`Self::sort_children`] applied to the whole subtree.
    pub fn sort_recursive(&mut self, node: NodeId) {
        self.sort_children(node);
        let children = self.nodes[node.index()].children.clone();
        for child in children {
            self.sort_recursive(child);
        }
    }

    /// Pre-order rows for `node` and its non-ignored descendants.
    ///
    /// `max_depth` counts levels below `node`; `None` renders everything.
    #[must_use]
    pub fn rows(&self, node: NodeId, max_depth: Option<usize>) -> Vec<SummaryRow> {
        let mut rows = Vec::new();
        self.collect_rows(node, 0, max_depth, &mut rows);
        rows
    }

    fn collect_rows(
        &self,
        node: NodeId,
        depth: usize,
        max_depth: Option<usize>,
        rows: &mut Vec<SummaryRow>,
    ) {
        let n = self.node(node);
        rows.push(SummaryRow {
            depth,
            label: n.label.clone(),
            counters: n.counters,
        });
        if max_depth.is_some_and(|max| depth >= max) {
            return;
        }
        for &child in &n.children {
            if !self.node(child).ignored {
                self.collect_rows(child, depth + 1, max_depth, rows);
            }
        }
    }

    /// Leaves (nodes without children) under `node`.
    #[must_use]
    pub fn leaves(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let children = self.children(id);
            if children.is_empty() {
                out.push(id);
            } else {
                stack.extend(children.iter().rev());
            }
        }
        out
    }
}

fn to_delta(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
