//! Backward-time coalescent ancestry generator with recombination,
//! used to seed deep history before the forward simulation starts.
//!
//! The output is an ordinary ancestry record: nodes `0..num_samples`
//! are sample nodes at time 0.0, common ancestors are appended as they
//! arise, and every sampled position coalesces fully, so each sample's
//! inbound edges tile the whole sequence.

use rand::Rng;
use rand_distr::Distribution;
use rand_distr::Exp;

use crate::flags::NodeFlags;
use crate::tables::EdgeBuffer;
use crate::tables::Tables;
use crate::tables::TablesError;
use crate::GenomicInterval;
use crate::Node;

// A stretch of genome still ancestral to the sample set, carried by
// one extant lineage. `node` is the record node currently representing
// it; `samples` counts how many of the initial samples it subtends.
#[derive(Debug, Clone, Copy)]
struct AncestralSegment {
    left: f64,
    right: f64,
    node: Node,
    samples: usize,
}

impl GenomicInterval for AncestralSegment {
    fn left(&self) -> f64 {
        self.left
    }
    fn right(&self) -> f64 {
        self.right
    }
}

// Segments sorted by left coordinate, non-overlapping.
type Lineage = Vec<AncestralSegment>;

fn extent(lineage: &Lineage) -> (f64, f64) {
    (lineage[0].left, lineage[lineage.len() - 1].right)
}

fn push_segment(lineage: &mut Lineage, segment: AncestralSegment) {
    match lineage.last_mut() {
        Some(last)
            if last.right == segment.left
                && last.node == segment.node
                && last.samples == segment.samples =>
        {
            last.right = segment.right
        }
        _ => lineage.push(segment),
    }
}

fn split(lineage: &Lineage, breakpoint: f64) -> (Lineage, Lineage) {
    let mut left_side = vec![];
    let mut right_side = vec![];
    for &segment in lineage {
        if segment.right <= breakpoint {
            left_side.push(segment);
        } else if segment.left >= breakpoint {
            right_side.push(segment);
        } else {
            left_side.push(AncestralSegment {
                right: breakpoint,
                ..segment
            });
            right_side.push(AncestralSegment {
                left: breakpoint,
                ..segment
            });
        }
    }
    (left_side, right_side)
}

// Merge two lineages drawn into a common ancestor at `time`. Intervals
// carried by both coalesce into a new node (allocated lazily, once per
// event) and produce edges; intervals carried by one pass through
// unchanged. Intervals where the full sample set has now coalesced are
// dropped from further ancestry.
fn common_ancestor(
    a: Lineage,
    b: Lineage,
    time: f64,
    num_samples: usize,
    tables: &mut Tables,
    buffer: &mut EdgeBuffer,
) -> Result<Lineage, TablesError> {
    let mut boundaries: Vec<f64> = a
        .iter()
        .chain(b.iter())
        .flat_map(|s| [s.left, s.right])
        .collect();
    boundaries.sort_by(f64::total_cmp);
    boundaries.dedup();

    let covering = |lineage: &Lineage, left: f64, right: f64| {
        lineage
            .iter()
            .find(|s| s.left <= left && s.right >= right)
            .copied()
    };

    let mut merged = vec![];
    let mut ancestor: Option<Node> = None;
    for window in boundaries.windows(2) {
        let (left, right) = (window[0], window[1]);
        match (covering(&a, left, right), covering(&b, left, right)) {
            (Some(x), None) | (None, Some(x)) => push_segment(
                &mut merged,
                AncestralSegment {
                    left,
                    right,
                    ..x
                },
            ),
            (Some(x), Some(y)) => {
                let parent = match ancestor {
                    Some(parent) => parent,
                    None => {
                        let parent = tables.add_node(NodeFlags::default(), time, 0);
                        ancestor = Some(parent);
                        parent
                    }
                };
                buffer.record(left, right, x.node);
                buffer.record(left, right, y.node);
                let samples = x.samples + y.samples;
                if samples < num_samples {
                    push_segment(
                        &mut merged,
                        AncestralSegment {
                            left,
                            right,
                            node: parent,
                            samples,
                        },
                    );
                }
            }
            (None, None) => {}
        }
    }
    if let Some(parent) = ancestor {
        buffer.flush(parent, tables)?;
    }
    Ok(merged)
}

/// Simulate the ancestry of `num_samples` haploid genomes under the
/// Hudson coalescent with recombination. Time is in coalescent units
/// and increases into the past; the caller rescales as needed.
pub fn simulate<R: Rng>(
    num_samples: usize,
    sequence_length: f64,
    recombination_rate: f64,
    rng: &mut R,
) -> Result<Tables, TablesError> {
    let mut tables = Tables::new(sequence_length)?;
    let mut lineages: Vec<Lineage> = (0..num_samples)
        .map(|_| {
            let node = tables.add_node(NodeFlags::sample(), 0.0, 0);
            vec![AncestralSegment {
                left: 0.0,
                right: sequence_length,
                node,
                samples: 1,
            }]
        })
        .collect();
    let mut buffer = EdgeBuffer::default();
    let mut time = 0.0;
    while lineages.len() > 1 {
        let k = lineages.len() as f64;
        let coalescence_rate = k * (k - 1.0) / 2.0;
        let spans: Vec<f64> = lineages
            .iter()
            .map(|lineage| {
                let (low, high) = extent(lineage);
                recombination_rate * (high - low)
            })
            .collect();
        let total_recombination_rate: f64 = spans.iter().sum();
        let total_rate = coalescence_rate + total_recombination_rate;
        // total_rate > 0 while at least two lineages remain
        time += Exp::new(total_rate).unwrap().sample(rng);

        if rng.gen::<f64>() * total_rate < total_recombination_rate {
            // Recombination: split one lineage, chosen in proportion to
            // the span of genome it can break within.
            let mut draw = rng.gen::<f64>() * total_recombination_rate;
            let mut chosen = lineages.len() - 1;
            for (index, span) in spans.iter().enumerate() {
                if draw < *span {
                    chosen = index;
                    break;
                }
                draw -= span;
            }
            let (low, high) = extent(&lineages[chosen]);
            let breakpoint = low + rng.gen::<f64>() * (high - low);
            let (left_side, right_side) = split(&lineages[chosen], breakpoint);
            if left_side.is_empty() || right_side.is_empty() {
                // Degenerate draw at the extent boundary; skip.
                continue;
            }
            lineages[chosen] = left_side;
            lineages.push(right_side);
        } else {
            let i = rng.gen_range(0..lineages.len());
            let mut j = rng.gen_range(0..lineages.len() - 1);
            if j >= i {
                j += 1;
            }
            let second = lineages.swap_remove(i.max(j));
            let first = lineages.swap_remove(i.min(j));
            let merged = common_ancestor(
                first,
                second,
                time,
                num_samples,
                &mut tables,
                &mut buffer,
            )?;
            if !merged.is_empty() {
                lineages.push(merged);
            }
        }
    }
    Ok(tables)
}
