use std::collections::HashMap;

use crate::tables::Tables;
use crate::Node;

/// Position-indexed view of a record. The input does not need to be
/// sorted; inbound edges are indexed per child once, up front.
///
/// At any single position the record is a proper forest: each node has
/// at most one parent there, even though the multi-interval structure
/// as a whole is a DAG.
pub struct TreeIndex<'a> {
    tables: &'a Tables,
    inbound: Vec<Vec<usize>>,
    // (site, node) -> derived state of the most recent mutation there
    site_states: HashMap<(usize, usize), (f64, u8)>,
}

impl<'a> TreeIndex<'a> {
    pub fn new(tables: &'a Tables) -> Self {
        let mut inbound = vec![vec![]; tables.nodes.len()];
        for (index, edge) in tables.edges.iter().enumerate() {
            inbound[edge.child.as_index()].push(index);
        }
        let mut site_states: HashMap<(usize, usize), (f64, u8)> = HashMap::new();
        for mutation in &tables.mutations {
            let key = (mutation.site, mutation.node.as_index());
            let entry = site_states
                .entry(key)
                .or_insert((mutation.time, mutation.derived_state));
            if mutation.time < entry.0 {
                *entry = (mutation.time, mutation.derived_state);
            }
        }
        Self {
            tables,
            inbound,
            site_states,
        }
    }

    /// The unique parent of `node` at `position`, or `None` if no
    /// inbound edge covers it. Interval boundaries are half-open, so a
    /// query exactly on a breakpoint belongs to the right-hand edge.
    pub fn parent_at(&self, node: Node, position: f64) -> Option<Node> {
        let mut covering = self.inbound[node.as_index()]
            .iter()
            .map(|&index| &self.tables.edges[index])
            .filter(|edge| edge.left <= position && position < edge.right);
        let found = covering.next();
        debug_assert!(covering.next().is_none());
        found.map(|edge| edge.parent)
    }

    /// Most recent common ancestor of `u` and `v` at `position`, or
    /// `None` if their ancestor chains never meet.
    ///
    /// Walks both chains as a time-ordered frontier: the node with the
    /// smaller time steps to its parent, so each step strictly
    /// increases time and the walk terminates at the first shared node.
    pub fn mrca_at(&self, u: Node, v: Node, position: f64) -> Option<Node> {
        let mut a = Some(u);
        let mut b = Some(v);
        while a != b {
            match (a, b) {
                (Some(x), Some(y)) => {
                    let x_time = self.tables.nodes.time(x);
                    let y_time = self.tables.nodes.time(y);
                    if x_time < y_time {
                        a = self.parent_at(x, position);
                    } else if y_time < x_time {
                        b = self.parent_at(y, position);
                    } else {
                        // Distinct nodes at the same time: neither can
                        // be an ancestor of the other.
                        a = self.parent_at(x, position);
                        b = self.parent_at(y, position);
                    }
                }
                (Some(x), None) => a = self.parent_at(x, position),
                (None, Some(y)) => b = self.parent_at(y, position),
                (None, None) => unreachable!(),
            }
        }
        a
    }

    /// Last node on the parent chain of `node` at `position`.
    pub fn root_at(&self, mut node: Node, position: f64) -> Node {
        while let Some(parent) = self.parent_at(node, position) {
            node = parent;
        }
        node
    }

    /// Derived state of `node` at site `site`: the state of the most
    /// recent mutation on the upward chain through the site's position,
    /// falling back to the ancestral state.
    pub fn state_at(&self, node: Node, site: usize) -> u8 {
        let position = self.tables.sites[site].position;
        let mut current = Some(node);
        while let Some(n) = current {
            if let Some(&(_, derived)) = self.site_states.get(&(site, n.as_index())) {
                return derived;
            }
            current = self.parent_at(n, position);
        }
        self.tables.sites[site].ancestral_state
    }

    /// Observed states of `node` at every recorded site, in site order.
    pub fn haplotype(&self, node: Node) -> String {
        (0..self.tables.sites.len())
            .map(|site| char::from(self.state_at(node, site)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::NodeFlags;

    // Tree [0, 0.5):     Tree [0.5, 1):
    //
    //      4                  4
    //      |                  |
    //      2                 -----
    //    -----              |   3
    //    0   1              0   |
    //                           1
    fn recombinant_tables() -> Tables {
        let mut tables = Tables::new(1.0).unwrap();
        let n0 = tables.add_node(NodeFlags::sample(), 0.0, 0);
        let n1 = tables.add_node(NodeFlags::sample(), 0.0, 0);
        let n2 = tables.add_node(NodeFlags::default(), 1.0, 0);
        let n3 = tables.add_node(NodeFlags::default(), 1.0, 0);
        let n4 = tables.add_node(NodeFlags::default(), 2.0, 0);
        tables.add_edge(0.0, 0.5, n2, n0).unwrap();
        tables.add_edge(0.0, 0.5, n2, n1).unwrap();
        tables.add_edge(0.5, 1.0, n3, n1).unwrap();
        tables.add_edge(0.0, 0.5, n4, n2).unwrap();
        tables.add_edge(0.5, 1.0, n4, n0).unwrap();
        tables.add_edge(0.5, 1.0, n4, n3).unwrap();
        tables
    }

    #[test]
    fn test_parent_at() {
        let tables = recombinant_tables();
        let index = TreeIndex::new(&tables);
        assert_eq!(index.parent_at(Node::from(0), 0.25), Some(Node::from(2)));
        // Half-open intervals: a breakpoint belongs to the right tree.
        assert_eq!(index.parent_at(Node::from(0), 0.5), Some(Node::from(4)));
        assert_eq!(index.parent_at(Node::from(4), 0.25), None);
        assert_eq!(index.parent_at(Node::from(1), 0.75), Some(Node::from(3)));
    }

    #[test]
    fn test_mrca_at() {
        let tables = recombinant_tables();
        let index = TreeIndex::new(&tables);
        let (n0, n1) = (Node::from(0), Node::from(1));
        assert_eq!(index.mrca_at(n0, n1, 0.25), Some(Node::from(2)));
        assert_eq!(index.mrca_at(n0, n1, 0.5), Some(Node::from(4)));
        assert_eq!(index.mrca_at(n1, n0, 0.5), Some(Node::from(4)));
        // A node is its own MRCA.
        assert_eq!(index.mrca_at(n0, n0, 0.9), Some(n0));
        // An ancestor pairs with its own descendant.
        assert_eq!(index.mrca_at(n0, Node::from(2), 0.25), Some(Node::from(2)));
    }

    #[test]
    fn test_mrca_none_for_disjoint_forests() {
        let mut tables = Tables::new(1.0).unwrap();
        let n0 = tables.add_node(NodeFlags::sample(), 0.0, 0);
        let n1 = tables.add_node(NodeFlags::sample(), 0.0, 0);
        let n2 = tables.add_node(NodeFlags::default(), 1.0, 0);
        tables.add_edge(0.0, 1.0, n2, n0).unwrap();
        let index = TreeIndex::new(&tables);
        assert_eq!(index.mrca_at(n0, n1, 0.5), None);
        assert_eq!(index.root_at(n0, 0.5), n2);
        assert_eq!(index.root_at(n1, 0.5), n1);
    }

    #[test]
    fn test_roots_follow_recombination() {
        let tables = recombinant_tables();
        let index = TreeIndex::new(&tables);
        for node in tables.nodes.iter() {
            assert_eq!(index.root_at(node, 0.25), Node::from(4));
            assert_eq!(index.root_at(node, 0.75), Node::from(4));
        }
    }

    #[test]
    fn test_haplotypes() {
        let mut tables = recombinant_tables();
        let site0 = tables.add_site(0.25, b'0');
        let site1 = tables.add_site(0.75, b'0');
        // A mutation on the internal node 2 reaches both leaves on the
        // left tree.
        tables.add_mutation(site0, Node::from(2), None, 1.5, b'1');
        // Two mutations on the same branch: the more recent one wins.
        let older = tables.add_mutation(site1, Node::from(1), None, 0.8, b'2');
        tables.add_mutation(site1, Node::from(1), Some(older), 0.2, b'3');
        let index = TreeIndex::new(&tables);
        assert_eq!(index.haplotype(Node::from(0)), "10");
        assert_eq!(index.haplotype(Node::from(1)), "13");
        assert_eq!(index.haplotype(Node::from(4)), "00");
    }
}
