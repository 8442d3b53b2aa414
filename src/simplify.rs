//! Reduce a record to the ancestry of a chosen set of samples.
//!
//! Parents are visited youngest first (the canonical edge sort order),
//! so a node's children are always fully resolved before the node
//! itself. For each parent, its edges are intersected with the current
//! ancestry of its children and the intersections swept left to right;
//! spans where at least two child lineages meet coalesce in the parent
//! and produce output edges, spans carried by one lineage pass through
//! it unrecorded. Mutations are then re-hung on whichever output node
//! carries their position.

use crate::flags::NodeFlags;
use crate::flags::SimplifyOptions;
use crate::tables::Edge;
use crate::tables::EdgeBuffer;
use crate::tables::Tables;
use crate::tables::TablesError;
use crate::GenomicInterval;
use crate::Node;
use crate::NodeHash;
use crate::NodeMap;

// Maps [left, right) of an input node's genome onto an output node.
#[derive(Debug, Clone, Copy, PartialEq)]
struct AncestrySegment {
    left: f64,
    right: f64,
    node: Node,
}

impl GenomicInterval for AncestrySegment {
    fn left(&self) -> f64 {
        self.left
    }
    fn right(&self) -> f64 {
        self.right
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AncestryIntersection {
    left: f64,
    right: f64,
    mapped_node: Node,
}

struct AncestryOverlapper<'q> {
    queue: &'q [AncestryIntersection],
    num_overlaps: usize,
    current_overlap: usize,
    left: f64,
    right: f64,
    overlaps: Vec<AncestryIntersection>,
}

impl<'q> AncestryOverlapper<'q> {
    fn new(queue: &'q [AncestryIntersection]) -> Self {
        // The queue carries a sentinel, which num_overlaps excludes.
        let num_overlaps = if queue.is_empty() { 0 } else { queue.len() - 1 };
        let right = if num_overlaps > 0 {
            queue[0].right
        } else {
            f64::MAX
        };
        Self {
            queue,
            num_overlaps,
            current_overlap: 0,
            left: f64::MAX,
            right,
            overlaps: vec![],
        }
    }

    fn calculate_next_overlap_set(&mut self) -> Option<(f64, f64, &[AncestryIntersection])> {
        if self.current_overlap < self.num_overlaps {
            self.left = self.right;
            self.overlaps.retain(|o| o.right > self.left);
            if self.overlaps.is_empty() {
                self.left = self.queue[self.current_overlap].left;
            }
            self.right = self
                .overlaps
                .iter()
                .map(|o| o.right)
                .fold(f64::MAX, f64::min);
            for segment in &self.queue[self.current_overlap..] {
                if segment.left == self.left {
                    self.current_overlap += 1;
                    self.right = self.right.min(segment.right);
                    self.overlaps.push(*segment);
                } else {
                    break;
                }
            }
            // The sentinel keeps this index in bounds.
            self.right = self.right.min(self.queue[self.current_overlap].left);
            Some((self.left, self.right, &self.overlaps))
        } else {
            if !self.overlaps.is_empty() {
                self.left = self.right;
                self.overlaps.retain(|o| o.right > self.left);
            }
            if !self.overlaps.is_empty() {
                self.right = self
                    .overlaps
                    .iter()
                    .map(|o| o.right)
                    .fold(f64::MAX, f64::min);
                Some((self.left, self.right, &self.overlaps))
            } else {
                None
            }
        }
    }
}

fn ancestry_intersection(
    edges: &[Edge],
    ancestry: &[Vec<AncestrySegment>],
    queue: &mut Vec<AncestryIntersection>,
) {
    queue.clear();
    for edge in edges {
        for segment in &ancestry[edge.child.as_index()] {
            if edge.overlaps(segment) {
                queue.push(AncestryIntersection {
                    left: edge.left().max(segment.left()),
                    right: edge.right().min(segment.right()),
                    mapped_node: segment.node,
                });
            }
        }
    }
    queue.sort_unstable_by(|a, b| a.left.total_cmp(&b.left));
    if !queue.is_empty() {
        // Sentinel
        queue.push(AncestryIntersection {
            left: f64::MAX,
            right: f64::MAX,
            mapped_node: Node::from(usize::MAX),
        });
    }
}

fn push_ancestry(ancestry: &mut Vec<AncestrySegment>, left: f64, right: f64, node: Node) {
    match ancestry.last_mut() {
        Some(last) if last.right == left && last.node == node => last.right = right,
        _ => ancestry.push(AncestrySegment { left, right, node }),
    }
}

struct Simplifier<'a> {
    input: &'a Tables,
    output: Tables,
    node_map: NodeMap,
    ancestry: Vec<Vec<AncestrySegment>>,
    is_sample: NodeHash,
    queue: Vec<AncestryIntersection>,
    buffer: EdgeBuffer,
}

impl<'a> Simplifier<'a> {
    fn new(input: &'a Tables, samples: &[Node]) -> Result<Self, TablesError> {
        if !input.edges_grouped_by_parent() {
            return Err(TablesError::UnsortedEdges);
        }
        let mut output = Tables::new(input.sequence_length())?;
        let mut node_map: NodeMap = vec![None; input.nodes.len()];
        let mut ancestry = vec![vec![]; input.nodes.len()];
        let mut is_sample = NodeHash::default();
        for &sample in samples {
            if sample.as_index() >= input.nodes.len() {
                return Err(TablesError::NodeOutOfRange(sample.as_index()));
            }
            if node_map[sample.as_index()].is_some() {
                return Err(TablesError::DuplicateSample(sample.as_index()));
            }
            let mapped = output.add_node(
                NodeFlags::sample(),
                input.nodes.time(sample),
                input.nodes.population(sample),
            );
            node_map[sample.as_index()] = Some(mapped);
            is_sample.insert(sample);
            ancestry[sample.as_index()].push(AncestrySegment {
                left: 0.0,
                right: input.sequence_length(),
                node: mapped,
            });
        }
        Ok(Self {
            input,
            output,
            node_map,
            ancestry,
            is_sample,
            queue: vec![],
            buffer: EdgeBuffer::default(),
        })
    }

    fn merge_ancestors(&mut self, parent: Node) -> Result<(), TablesError> {
        let sequence_length = self.input.sequence_length();
        let parent_is_sample = self.is_sample.contains(&parent);
        let mut output_id = self.node_map[parent.as_index()];
        let mut new_ancestry: Vec<AncestrySegment> = vec![];
        let mut previous_right = 0.0;
        let mut overlapper = AncestryOverlapper::new(&self.queue);
        while let Some((left, right, overlaps)) = overlapper.calculate_next_overlap_set() {
            let mapped_node;
            if overlaps.len() == 1 {
                if parent_is_sample {
                    // A sample's own spans are never mapped away; the
                    // unary relationship becomes a real edge.
                    let sample_id = output_id.unwrap();
                    self.buffer.record(left, right, overlaps[0].mapped_node);
                    mapped_node = sample_id;
                } else {
                    mapped_node = overlaps[0].mapped_node;
                }
            } else {
                let id = match output_id {
                    Some(id) => id,
                    None => {
                        let id = self.output.add_node(
                            self.input.nodes.flags(parent).without_sample(),
                            self.input.nodes.time(parent),
                            self.input.nodes.population(parent),
                        );
                        output_id = Some(id);
                        id
                    }
                };
                for overlap in overlaps {
                    self.buffer.record(left, right, overlap.mapped_node);
                }
                mapped_node = id;
            }
            if parent_is_sample && left > previous_right {
                // Keep a sample's ancestry gap-free over its own id.
                push_ancestry(&mut new_ancestry, previous_right, left, output_id.unwrap());
            }
            push_ancestry(&mut new_ancestry, left, right, mapped_node);
            previous_right = right;
        }
        if parent_is_sample && previous_right < sequence_length {
            push_ancestry(
                &mut new_ancestry,
                previous_right,
                sequence_length,
                output_id.unwrap(),
            );
        }
        self.ancestry[parent.as_index()] = new_ancestry;
        self.node_map[parent.as_index()] = output_id;
        if let Some(id) = output_id {
            self.buffer.flush(id, &mut self.output)?;
        }
        Ok(())
    }

    fn process_parents(&mut self) -> Result<(), TablesError> {
        let input = self.input;
        let edges = &input.edges;
        let mut start = 0;
        while start < edges.len() {
            let parent = edges[start].parent;
            let mut stop = start;
            while stop < edges.len() && edges[stop].parent == parent {
                stop += 1;
            }
            ancestry_intersection(&edges[start..stop], &self.ancestry, &mut self.queue);
            if !self.queue.is_empty() {
                self.merge_ancestors(parent)?;
            }
            start = stop;
        }
        Ok(())
    }

    // Re-hang each mutation on the output node that carries its
    // position in the final ancestry of its input node; drop it if
    // nothing does. Sites keep their input (position) order.
    fn output_sites(&mut self, options: SimplifyOptions) {
        let mut site_mutations: Vec<Vec<usize>> = vec![vec![]; self.input.sites.len()];
        for (index, mutation) in self.input.mutations.iter().enumerate() {
            site_mutations[mutation.site].push(index);
        }
        let mut mutation_id_map: Vec<Option<usize>> = vec![None; self.input.mutations.len()];
        for (site_id, site) in self.input.sites.iter().enumerate() {
            let mapped: Vec<(usize, Node)> = site_mutations[site_id]
                .iter()
                .filter_map(|&index| {
                    let mutation = &self.input.mutations[index];
                    self.ancestry[mutation.node.as_index()]
                        .iter()
                        .find(|seg| seg.left <= site.position && site.position < seg.right)
                        .map(|seg| (index, seg.node))
                })
                .collect();
            if mapped.is_empty() && options.filter_sites() {
                continue;
            }
            let new_site = self.output.add_site(site.position, site.ancestral_state);
            for (index, node) in mapped {
                let mutation = &self.input.mutations[index];
                let new_id = self.output.add_mutation(
                    new_site,
                    node,
                    None,
                    mutation.time,
                    mutation.derived_state,
                );
                mutation_id_map[index] = Some(new_id);
            }
        }
        // Parents follow the nearest retained ancestor mutation.
        for (index, mutation) in self.input.mutations.iter().enumerate() {
            let Some(new_id) = mutation_id_map[index] else {
                continue;
            };
            let mut parent = mutation.parent;
            while let Some(parent_index) = parent {
                if mutation_id_map[parent_index].is_some() {
                    break;
                }
                parent = self.input.mutations[parent_index].parent;
            }
            self.output.mutations[new_id].parent = parent.and_then(|p| mutation_id_map[p]);
        }
    }
}

/// Simplify `tables` down to the ancestry of `samples`. Edges must be
/// grouped by parent with the most recent parents first (the canonical
/// sort satisfies this). Returns the reduced record and the node
/// relabeling map; `samples` occupy output ids `0..samples.len()` in
/// the order given.
pub fn simplify(
    tables: &Tables,
    samples: &[Node],
    options: SimplifyOptions,
) -> Result<(Tables, NodeMap), TablesError> {
    let mut simplifier = Simplifier::new(tables, samples)?;
    simplifier.process_parents()?;
    simplifier.output_sites(options);
    Ok((simplifier.output, simplifier.node_map))
}
