//! Property checks relating a record to a simplified relabeling of
//! itself. Violations are bugs in the producer, never recoverable
//! conditions, so every check here panics on failure.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::tables::Tables;
use crate::trees::TreeIndex;
use crate::Node;
use crate::NodeHash;
use crate::NodeMap;

const NUM_RANDOM_POSITIONS: usize = 20;
const MAX_BREAKPOINT_POSITIONS: usize = 20;
const MAX_SAMPLE_PAIRS: usize = 500;

/// Every individual born during the simulated generations (time at
/// most `ngens`) must have parentage recorded for its entire genome:
/// sorted inbound intervals tile `[0, sequence_length)` with no gap or
/// overlap.
pub fn verify_ancestral_coverage(tables: &Tables, ngens: u32) {
    for node in tables.nodes.iter() {
        if tables.nodes.time(node) > f64::from(ngens) {
            continue;
        }
        let mut intervals: Vec<(f64, f64)> = tables
            .edges
            .iter()
            .filter(|edge| edge.child == node)
            .map(|edge| (edge.left, edge.right))
            .collect();
        intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert!(!intervals.is_empty(), "{node:?} has no recorded parents");
        assert_eq!(intervals[0].0, 0.0, "{node:?} ancestry does not reach 0");
        assert_eq!(
            intervals[intervals.len() - 1].1,
            tables.sequence_length(),
            "{node:?} ancestry does not reach the end of the sequence"
        );
        for w in intervals.windows(2) {
            assert_eq!(
                w[0].1, w[1].0,
                "{node:?} ancestry has a gap or overlap at {}",
                w[0].1
            );
        }
    }
}

/// The relabeling must cover every requested sample, stay in range,
/// and be injective over the nodes it retains.
pub fn verify_node_map(node_map: &NodeMap, samples: &[Node], simplified: &Tables) {
    for &sample in samples {
        assert!(
            node_map[sample.as_index()].is_some(),
            "sample {sample:?} was pruned by simplification"
        );
    }
    let mut seen = vec![false; simplified.nodes.len()];
    for mapped in node_map.iter().flatten() {
        assert!(
            mapped.as_index() < simplified.nodes.len(),
            "{mapped:?} is out of range for the simplified record"
        );
        assert!(
            !seen[mapped.as_index()],
            "{mapped:?} is the image of two different nodes"
        );
        seen[mapped.as_index()] = true;
    }
}

// Positions to compare trees at: some uniform draws plus a sample of
// the record's own breakpoints (the final one, at sequence length, is
// not part of any tree).
fn query_positions<R: Rng>(tables: &Tables, rng: &mut R) -> Vec<f64> {
    let mut positions: Vec<f64> = (0..NUM_RANDOM_POSITIONS)
        .map(|_| rng.gen::<f64>() * tables.sequence_length())
        .collect();
    let breakpoints = tables.breakpoints();
    let interior = &breakpoints[..breakpoints.len() - 1];
    positions.extend(
        interior
            .choose_multiple(rng, MAX_BREAKPOINT_POSITIONS.min(interior.len()))
            .copied(),
    );
    positions.sort_by(f64::total_cmp);
    positions
}

/// At sampled genomic positions and sample pairs, the MRCA computed on
/// the full record must translate, through the relabeling, to the MRCA
/// computed on the simplified record. Existence must agree: an MRCA
/// found on one side and missing on the other is a failure.
pub fn verify_mrca_correspondence<R: Rng>(
    full: &Tables,
    simplified: &Tables,
    samples: &[Node],
    node_map: &NodeMap,
    rng: &mut R,
) {
    let full_index = TreeIndex::new(full);
    let simplified_index = TreeIndex::new(simplified);
    for position in query_positions(full, rng) {
        let mut pairs = 0;
        'pairs: for (i, &u) in samples.iter().enumerate() {
            for &v in &samples[i + 1..] {
                if pairs == MAX_SAMPLE_PAIRS {
                    break 'pairs;
                }
                pairs += 1;
                let mapped_u = node_map[u.as_index()].unwrap();
                let mapped_v = node_map[v.as_index()].unwrap();
                let full_mrca = full_index.mrca_at(u, v, position);
                let simplified_mrca = simplified_index.mrca_at(mapped_u, mapped_v, position);
                match (full_mrca, simplified_mrca) {
                    (Some(mrca), Some(mapped_mrca)) => {
                        assert_eq!(
                            node_map[mrca.as_index()],
                            Some(mapped_mrca),
                            "MRCA of ({u:?}, {v:?}) at {position} does not correspond"
                        );
                    }
                    (None, None) => {}
                    (full_mrca, simplified_mrca) => panic!(
                        "MRCA existence of ({u:?}, {v:?}) at {position} disagrees: \
                         {full_mrca:?} vs {simplified_mrca:?}"
                    ),
                }
            }
        }
    }
}

/// Haplotypes of every sample retained on both sides must be
/// byte-identical, the mapped retained samples must be exactly the
/// simplified record's samples, and the site tables must agree.
pub fn verify_haplotype_invariance(full: &Tables, simplified: &Tables, node_map: &NodeMap) {
    assert_eq!(full.sites, simplified.sites, "site tables differ");
    let full_index = TreeIndex::new(full);
    let simplified_index = TreeIndex::new(simplified);
    let simplified_samples = simplified.nodes.samples();
    let sample_set: NodeHash = simplified_samples.iter().copied().collect();
    let mut mapped_samples = vec![];
    for sample in full.nodes.samples() {
        let Some(mapped) = node_map[sample.as_index()] else {
            continue;
        };
        if !sample_set.contains(&mapped) {
            continue;
        }
        assert_eq!(
            full_index.haplotype(sample),
            simplified_index.haplotype(mapped),
            "haplotype of {sample:?} changed under simplification"
        );
        mapped_samples.push(mapped);
    }
    mapped_samples.sort_unstable();
    let mut expected = simplified_samples;
    expected.sort_unstable();
    assert_eq!(
        mapped_samples, expected,
        "retained samples do not match the simplified record"
    );
}

/// Recompute every mutation's parent by walking up the tree at its
/// site, independently of the stored column.
pub fn compute_mutation_parents(tables: &Tables) -> Vec<Option<usize>> {
    let index = TreeIndex::new(tables);
    // (site, node) -> mutations there, youngest first
    let mut mutations_at: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (id, mutation) in tables.mutations.iter().enumerate() {
        mutations_at
            .entry((mutation.site, mutation.node.as_index()))
            .or_default()
            .push(id);
    }
    for list in mutations_at.values_mut() {
        list.sort_by(|&a, &b| {
            tables.mutations[a]
                .time
                .total_cmp(&tables.mutations[b].time)
        });
    }
    let mut parents = vec![None; tables.mutations.len()];
    for (id, mutation) in tables.mutations.iter().enumerate() {
        let position = tables.sites[mutation.site].position;
        // The next-older mutation on the same node wins, then the
        // youngest mutation on the nearest ancestor that has any.
        let same_node = &mutations_at[&(mutation.site, mutation.node.as_index())];
        let next_older = same_node
            .iter()
            .copied()
            .filter(|&other| tables.mutations[other].time > mutation.time)
            .min_by(|&a, &b| {
                tables.mutations[a]
                    .time
                    .total_cmp(&tables.mutations[b].time)
            });
        if let Some(parent) = next_older {
            parents[id] = Some(parent);
            continue;
        }
        let mut current = index.parent_at(mutation.node, position);
        while let Some(node) = current {
            if let Some(list) = mutations_at.get(&(mutation.site, node.as_index())) {
                parents[id] = Some(list[0]);
                break;
            }
            current = index.parent_at(node, position);
        }
    }
    parents
}

/// The stored mutation parent column must match an independent
/// recomputation.
pub fn verify_mutation_parents(tables: &Tables) {
    let recomputed = compute_mutation_parents(tables);
    for (id, mutation) in tables.mutations.iter().enumerate() {
        assert_eq!(
            mutation.parent, recomputed[id],
            "stored parent of mutation {id} disagrees with the tree walk"
        );
    }
}

/// Structural equality of two records, table by table.
pub fn assert_tables_equal(a: &Tables, b: &Tables) {
    assert_eq!(
        a.sequence_length(),
        b.sequence_length(),
        "sequence lengths differ"
    );
    assert_eq!(a.nodes, b.nodes, "node tables differ");
    assert_eq!(a.edges, b.edges, "edge tables differ");
    assert_eq!(a.sites, b.sites, "site tables differ");
    assert_eq!(a.mutations, b.mutations, "mutation tables differ");
}
