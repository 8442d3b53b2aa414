use std::cmp::Ordering;
use std::collections::HashMap;

use nohash::BuildNoHashHasher;
use thiserror::Error;

use crate::flags::NodeFlags;
use crate::GenomicInterval;
use crate::Node;
use crate::NodeHash;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum TablesError {
    #[error("sequence length must be positive, got {0}")]
    BadSequenceLength(f64),
    #[error("bad genomic interval [{left}, {right})")]
    BadInterval { left: f64, right: f64 },
    #[error("node {0} is not in the node table")]
    NodeOutOfRange(usize),
    #[error("parent time {parent_time} does not exceed child time {child_time}")]
    TimeOrder { parent_time: f64, child_time: f64 },
    #[error("edges are not in canonical sort order")]
    UnsortedEdges,
    #[error("node {0} requested as a sample more than once")]
    DuplicateSample(usize),
}

/// Columnar node table. One row per individual; rows are never
/// mutated or deleted once added.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct NodeTable {
    time: Vec<f64>,
    flags: Vec<NodeFlags>,
    population: Vec<i32>,
}

impl NodeTable {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.time.len(), self.flags.len());
        debug_assert_eq!(self.time.len(), self.population.len());
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn time(&self, node: Node) -> f64 {
        self.time[node.as_index()]
    }

    pub fn flags(&self, node: Node) -> NodeFlags {
        self.flags[node.as_index()]
    }

    pub fn population(&self, node: Node) -> i32 {
        self.population[node.as_index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = Node> + '_ {
        (0..self.len()).map(Node::from)
    }

    /// Sample-flagged nodes, in id order.
    pub fn samples(&self) -> Vec<Node> {
        self.iter().filter(|&n| self.flags(n).is_sample()).collect()
    }
}

/// "child inherited [left, right) from parent".
/// Edges point strictly backward in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub left: f64,
    pub right: f64,
    pub parent: Node,
    pub child: Node,
}

impl GenomicInterval for Edge {
    fn left(&self) -> f64 {
        self.left
    }
    fn right(&self) -> f64 {
        self.right
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub position: f64,
    pub ancestral_state: u8,
}

/// A state change at a site, on the branch above `node`.
/// `derived_state` is the resulting state, `parent` the index of the
/// mutation whose state this one replaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mutation {
    pub site: usize,
    pub node: Node,
    pub parent: Option<usize>,
    pub time: f64,
    pub derived_state: u8,
}

/// An ancestry record: append-only node and edge tables, plus the
/// site/mutation overlay tables when variants have been generated.
#[derive(Debug, Clone, PartialEq)]
pub struct Tables {
    sequence_length: f64,
    pub nodes: NodeTable,
    pub edges: Vec<Edge>,
    pub sites: Vec<Site>,
    pub mutations: Vec<Mutation>,
}

impl Tables {
    pub fn new(sequence_length: f64) -> Result<Self, TablesError> {
        if !(sequence_length > 0.0) {
            return Err(TablesError::BadSequenceLength(sequence_length));
        }
        Ok(Self {
            sequence_length,
            nodes: NodeTable::default(),
            edges: vec![],
            sites: vec![],
            mutations: vec![],
        })
    }

    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn add_node(&mut self, flags: NodeFlags, time: f64, population: i32) -> Node {
        self.nodes.time.push(time);
        self.nodes.flags.push(flags);
        self.nodes.population.push(population);
        Node::from(self.nodes.len() - 1)
    }

    pub fn add_edge(
        &mut self,
        left: f64,
        right: f64,
        parent: Node,
        child: Node,
    ) -> Result<(), TablesError> {
        if !(0.0 <= left && left < right && right <= self.sequence_length) {
            return Err(TablesError::BadInterval { left, right });
        }
        for node in [parent, child] {
            if node.as_index() >= self.nodes.len() {
                return Err(TablesError::NodeOutOfRange(node.as_index()));
            }
        }
        let parent_time = self.nodes.time(parent);
        let child_time = self.nodes.time(child);
        if parent_time <= child_time {
            return Err(TablesError::TimeOrder {
                parent_time,
                child_time,
            });
        }
        self.edges.push(Edge {
            left,
            right,
            parent,
            child,
        });
        Ok(())
    }

    pub fn add_site(&mut self, position: f64, ancestral_state: u8) -> usize {
        self.sites.push(Site {
            position,
            ancestral_state,
        });
        self.sites.len() - 1
    }

    pub fn add_mutation(
        &mut self,
        site: usize,
        node: Node,
        parent: Option<usize>,
        time: f64,
        derived_state: u8,
    ) -> usize {
        self.mutations.push(Mutation {
            site,
            node,
            parent,
            time,
            derived_state,
        });
        self.mutations.len() - 1
    }

    /// Canonical sort: edges by (parent time ascending, parent, child,
    /// left), sites by position, mutations by (site, time descending).
    /// Ascending parent time means the most recent parents come first,
    /// which is the order tree building and simplification require.
    pub fn sort(&mut self) {
        let nodes = &self.nodes;
        self.edges.sort_by(|a, b| edge_cmp(nodes, a, b));
        if !self.sites.is_empty() {
            let mut order: Vec<usize> = (0..self.sites.len()).collect();
            order.sort_by(|&i, &j| self.sites[i].position.total_cmp(&self.sites[j].position));
            let mut site_map = vec![0_usize; self.sites.len()];
            for (new_id, &old_id) in order.iter().enumerate() {
                site_map[old_id] = new_id;
            }
            self.sites = order.iter().map(|&i| self.sites[i]).collect();
            for mutation in &mut self.mutations {
                mutation.site = site_map[mutation.site];
            }
        }
        if !self.mutations.is_empty() {
            let mut order: Vec<usize> = (0..self.mutations.len()).collect();
            order.sort_by(|&i, &j| {
                self.mutations[i]
                    .site
                    .cmp(&self.mutations[j].site)
                    .then_with(|| self.mutations[j].time.total_cmp(&self.mutations[i].time))
            });
            let mut mutation_map = vec![0_usize; self.mutations.len()];
            for (new_id, &old_id) in order.iter().enumerate() {
                mutation_map[old_id] = new_id;
            }
            self.mutations = order.iter().map(|&i| self.mutations[i]).collect();
            for mutation in &mut self.mutations {
                mutation.parent = mutation.parent.map(|p| mutation_map[p]);
            }
        }
    }

    pub fn edges_sorted(&self) -> bool {
        self.edges
            .windows(2)
            .all(|w| edge_cmp(&self.nodes, &w[0], &w[1]) != Ordering::Greater)
    }

    /// Weaker than full canonical order: parent times nondecreasing
    /// and each parent's edges contiguous. This is the precondition
    /// tree building and simplification actually rely on.
    pub fn edges_grouped_by_parent(&self) -> bool {
        if !self
            .edges
            .windows(2)
            .all(|w| self.nodes.time(w[0].parent) <= self.nodes.time(w[1].parent))
        {
            return false;
        }
        let mut seen = NodeHash::default();
        let mut current: Option<Node> = None;
        for edge in &self.edges {
            if current != Some(edge.parent) {
                if !seen.insert(edge.parent) {
                    return false;
                }
                current = Some(edge.parent);
            }
        }
        true
    }

    /// Distinct tree boundaries: 0, every edge coordinate, and the
    /// sequence length, ascending.
    pub fn breakpoints(&self) -> Vec<f64> {
        let mut out = vec![0.0, self.sequence_length];
        for edge in &self.edges {
            out.push(edge.left);
            out.push(edge.right);
        }
        out.sort_by(f64::total_cmp);
        out.dedup();
        out
    }
}

fn edge_cmp(nodes: &NodeTable, a: &Edge, b: &Edge) -> Ordering {
    nodes
        .time(a.parent)
        .total_cmp(&nodes.time(b.parent))
        .then_with(|| a.parent.cmp(&b.parent))
        .then_with(|| a.child.cmp(&b.child))
        .then_with(|| a.left.total_cmp(&b.left))
}

/// Buffers output edges for one parent at a time, keyed by child.
/// Contiguous intervals for a child are squashed as they arrive;
/// flushing emits children in id order.
#[derive(Default)]
pub(crate) struct EdgeBuffer {
    buffer: HashMap<Node, Vec<(f64, f64)>, BuildNoHashHasher<usize>>,
}

impl EdgeBuffer {
    // Intervals for a given child must arrive left to right.
    pub(crate) fn record(&mut self, left: f64, right: f64, child: Node) {
        let intervals = self.buffer.entry(child).or_default();
        match intervals.last_mut() {
            Some(last) if last.1 == left => last.1 = right,
            _ => intervals.push((left, right)),
        }
    }

    pub(crate) fn flush(
        &mut self,
        parent: Node,
        tables: &mut Tables,
    ) -> Result<usize, TablesError> {
        let mut children: Vec<Node> = self.buffer.keys().copied().collect();
        children.sort_unstable();
        let mut num_edges = 0;
        for child in children {
            for (left, right) in self.buffer.remove(&child).unwrap() {
                tables.add_edge(left, right, parent, child)?;
                num_edges += 1;
            }
        }
        Ok(num_edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_generation_tables() -> Tables {
        let mut tables = Tables::new(1.0).unwrap();
        let ancestor = tables.add_node(NodeFlags::default(), 2.0, 0);
        let parent = tables.add_node(NodeFlags::default(), 1.0, 0);
        let child = tables.add_node(NodeFlags::sample(), 0.0, 0);
        tables.add_edge(0.0, 1.0, ancestor, parent).unwrap();
        tables.add_edge(0.0, 0.5, parent, child).unwrap();
        tables.add_edge(0.5, 1.0, ancestor, child).unwrap();
        tables
    }

    #[test]
    fn test_add_edge_validation() {
        let mut tables = Tables::new(1.0).unwrap();
        let parent = tables.add_node(NodeFlags::default(), 1.0, 0);
        let child = tables.add_node(NodeFlags::default(), 0.0, 0);
        assert!(matches!(
            tables.add_edge(0.5, 0.5, parent, child),
            Err(TablesError::BadInterval { .. })
        ));
        assert!(matches!(
            tables.add_edge(0.0, 2.0, parent, child),
            Err(TablesError::BadInterval { .. })
        ));
        assert!(matches!(
            tables.add_edge(0.0, 1.0, child, parent),
            Err(TablesError::TimeOrder { .. })
        ));
        assert!(matches!(
            tables.add_edge(0.0, 1.0, parent, Node::from(7)),
            Err(TablesError::NodeOutOfRange(7))
        ));
        tables.add_edge(0.0, 1.0, parent, child).unwrap();
    }

    #[test]
    fn test_bad_sequence_length() {
        assert!(Tables::new(0.0).is_err());
        assert!(Tables::new(-1.0).is_err());
    }

    #[test]
    fn test_sort_edges() {
        let mut tables = two_generation_tables();
        assert!(!tables.edges_sorted());
        tables.sort();
        assert!(tables.edges_sorted());
        // Most recent parent first, then by (parent, child, left).
        assert_eq!(tables.edges[0].parent, Node::from(1));
        assert_eq!(tables.edges[1].parent, Node::from(0));
        assert_eq!(tables.edges[1].child, Node::from(1));
        assert_eq!(tables.edges[2].child, Node::from(2));
    }

    #[test]
    fn test_sort_sites_and_mutations() {
        let mut tables = two_generation_tables();
        let late = tables.add_site(0.75, b'0');
        let early = tables.add_site(0.25, b'0');
        let older = tables.add_mutation(late, Node::from(1), None, 0.5, b'1');
        tables.add_mutation(late, Node::from(2), Some(older), 0.25, b'2');
        tables.add_mutation(early, Node::from(2), None, 0.1, b'1');
        tables.sort();
        assert_eq!(tables.sites[0].position, 0.25);
        assert_eq!(tables.sites[1].position, 0.75);
        assert_eq!(tables.mutations[0].site, 0);
        assert_eq!(tables.mutations[1].site, 1);
        assert_eq!(tables.mutations[1].time, 0.5);
        assert_eq!(tables.mutations[2].time, 0.25);
        assert_eq!(tables.mutations[2].parent, Some(1));
    }

    #[test]
    fn test_breakpoints() {
        let tables = two_generation_tables();
        assert_eq!(tables.breakpoints(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_samples() {
        let tables = two_generation_tables();
        assert_eq!(tables.nodes.samples(), vec![Node::from(2)]);
    }

    #[test]
    fn test_edge_buffer_squashes() {
        let mut tables = Tables::new(1.0).unwrap();
        let parent = tables.add_node(NodeFlags::default(), 1.0, 0);
        let a = tables.add_node(NodeFlags::default(), 0.0, 0);
        let b = tables.add_node(NodeFlags::default(), 0.0, 0);
        let mut buffer = EdgeBuffer::default();
        buffer.record(0.0, 0.25, b);
        buffer.record(0.25, 0.5, b);
        buffer.record(0.75, 1.0, b);
        buffer.record(0.0, 1.0, a);
        let num_edges = buffer.flush(parent, &mut tables).unwrap();
        assert_eq!(num_edges, 3);
        // Children come out in id order, contiguous spans merged.
        assert_eq!(
            tables.edges,
            vec![
                Edge {
                    left: 0.0,
                    right: 1.0,
                    parent,
                    child: a
                },
                Edge {
                    left: 0.0,
                    right: 0.5,
                    parent,
                    child: b
                },
                Edge {
                    left: 0.75,
                    right: 1.0,
                    parent,
                    child: b
                },
            ]
        );
    }
}
