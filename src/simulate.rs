use log::debug;
use log::trace;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::coalescent;
use crate::flags::NodeFlags;
use crate::tables::Edge;
use crate::tables::Tables;
use crate::tables::TablesError;
use crate::Node;
use crate::NodeHash;

/// Simulation of a bisexual, haploid Wright-Fisher population of size
/// `popsize`, in which each individual survives a generation with
/// probability `survival` and only those who die are replaced.
///
/// With `num_loci` unset the chromosome is 1.0 long with continuous
/// breakpoints; otherwise breakpoints are drawn uniformly from the
/// integers in `[1, num_loci - 1]`.
///
/// The generator is owned and seeded at construction, so a given seed
/// and parameter set reproduces the record exactly.
pub struct WrightFisherSimulator {
    popsize: usize,
    survival: f64,
    deep_history: bool,
    initial_generation_samples: bool,
    num_loci: Option<u32>,
    seed: u64,
    rng: StdRng,
}

impl WrightFisherSimulator {
    pub fn new(popsize: usize, seed: u64) -> Self {
        Self {
            popsize,
            survival: 0.0,
            deep_history: true,
            initial_generation_samples: false,
            num_loci: None,
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Per-generation survival probability. 0.0 gives strictly
    /// non-overlapping generations.
    pub fn with_survival(mut self, survival: f64) -> Self {
        self.survival = survival;
        self
    }

    /// Seed the founder generation from the coalescent bootstrap
    /// instead of creating founders with no history.
    pub fn with_deep_history(mut self, deep_history: bool) -> Self {
        self.deep_history = deep_history;
        self
    }

    /// Keep sample flags on the founder generation.
    pub fn with_initial_generation_samples(mut self, initial_generation_samples: bool) -> Self {
        self.initial_generation_samples = initial_generation_samples;
        self
    }

    /// Switch to the discrete model with `num_loci` loci.
    pub fn with_num_loci(mut self, num_loci: u32) -> Self {
        self.num_loci = Some(num_loci);
        self
    }

    // The continuous draw deliberately piles breakpoints up against
    // both ends of the sequence; downstream checks depend on the exact
    // distribution, so do not "fix" it to a uniform one.
    fn random_breakpoint(&mut self) -> f64 {
        match self.num_loci {
            None => (2.0 * self.rng.gen::<f64>() - 0.5).clamp(0.0, 1.0),
            Some(num_loci) => f64::from(self.rng.gen_range(1..num_loci)),
        }
    }

    /// Run `ngens` generations and return the record. The individuals
    /// alive at generation 0 are the record's samples.
    pub fn run(&mut self, ngens: u32) -> Result<Tables, TablesError> {
        let genome_length = self.num_loci.map_or(1.0, f64::from);

        // Node attributes are accumulated here and materialized in one
        // pass at the end, once the final sample set is known.
        let mut times: Vec<f64> = vec![];
        let mut founder_flags: Vec<NodeFlags> = vec![];
        let mut edges: Vec<Edge> = vec![];

        if self.deep_history {
            let mut bootstrap_rng = StdRng::seed_from_u64(self.seed);
            let init = coalescent::simulate(self.popsize, genome_length, 1.0, &mut bootstrap_rng)?;
            for node in init.nodes.iter() {
                times.push(init.nodes.time(node) + f64::from(ngens));
                founder_flags.push(if self.initial_generation_samples {
                    init.nodes.flags(node)
                } else {
                    NodeFlags::default()
                });
            }
            edges.extend(init.edges.iter().copied());
        } else {
            let flags = if self.initial_generation_samples {
                NodeFlags::sample()
            } else {
                NodeFlags::default()
            };
            for _ in 0..self.popsize {
                times.push(f64::from(ngens));
                founder_flags.push(flags);
            }
        }

        let mut pop: Vec<Node> = (0..self.popsize).map(Node::from).collect();
        for t in (0..ngens).rev() {
            let dead: Vec<bool> = (0..self.popsize)
                .map(|_| self.rng.gen::<f64>() > self.survival)
                .collect();
            let num_dead = dead.iter().filter(|&&d| d).count();
            // Draw these first so that all parents come from the
            // previous generation, even though slots are replaced one
            // at a time below.
            let new_parents: Vec<(Node, Node)> = (0..num_dead)
                .map(|_| {
                    (
                        pop[self.rng.gen_range(0..self.popsize)],
                        pop[self.rng.gen_range(0..self.popsize)],
                    )
                })
                .collect();
            debug!(
                "generation {t}: replacing {num_dead} of {} individuals",
                self.popsize
            );
            let mut next_pair = 0;
            for slot in 0..self.popsize {
                if !dead[slot] {
                    continue;
                }
                let offspring = Node::from(times.len());
                times.push(f64::from(t));
                let (left_parent, right_parent) = new_parents[next_pair];
                next_pair += 1;
                let breakpoint = self.random_breakpoint();
                trace!(
                    "slot {slot}: {offspring:?} from ({left_parent:?}, {right_parent:?}) at {breakpoint}"
                );
                pop[slot] = offspring;
                if breakpoint > 0.0 {
                    edges.push(Edge {
                        left: 0.0,
                        right: breakpoint,
                        parent: left_parent,
                        child: offspring,
                    });
                }
                if breakpoint < genome_length {
                    edges.push(Edge {
                        left: breakpoint,
                        right: genome_length,
                        parent: right_parent,
                        child: offspring,
                    });
                }
            }
        }

        let final_population: NodeHash = pop.iter().copied().collect();
        let mut tables = Tables::new(genome_length)?;
        for (index, &time) in times.iter().enumerate() {
            let mut flags = founder_flags.get(index).copied().unwrap_or_default();
            if final_population.contains(&Node::from(index)) {
                flags = flags.with_sample();
            }
            tables.add_node(flags, time, 0);
        }
        for edge in edges {
            tables.add_edge(edge.left, edge.right, edge.parent, edge.child)?;
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simplify::simplify;
    use crate::trees::TreeIndex;
    use crate::verify::assert_tables_equal;
    use crate::verify::verify_ancestral_coverage;
    use crate::SimplifyOptions;
    use proptest::prelude::*;

    const SEED: u64 = 5678;

    // Midpoints of the intervals between consecutive tree boundaries.
    fn tree_midpoints(tables: &Tables) -> Vec<f64> {
        tables
            .breakpoints()
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect()
    }

    fn simplified_to_samples(tables: &Tables) -> Tables {
        let mut sorted = tables.clone();
        sorted.sort();
        let samples = sorted.nodes.samples();
        simplify(&sorted, &samples, SimplifyOptions::default())
            .unwrap()
            .0
    }

    #[test]
    fn test_non_overlapping_generations() {
        let mut sim = WrightFisherSimulator::new(10, SEED);
        let tables = sim.run(10).unwrap();
        assert!(tables.nodes.len() > 0);
        assert!(!tables.edges.is_empty());
        assert!(tables.sites.is_empty());
        assert!(tables.mutations.is_empty());
        let simplified = simplified_to_samples(&tables);
        let samples = simplified.nodes.samples();
        assert_eq!(samples.len(), 10);
        let index = TreeIndex::new(&simplified);
        for position in tree_midpoints(&simplified) {
            // Deep history guarantees full coalescence: one root whose
            // descendants are the whole sample set.
            let root = index.root_at(samples[0], position);
            for &sample in &samples {
                assert_eq!(index.root_at(sample, position), root);
            }
            // All generations die each step, so no sample is internal
            // and every retained interior node has at least two
            // children.
            for node in simplified.nodes.iter() {
                let arity = simplified
                    .edges
                    .iter()
                    .filter(|e| e.parent == node && e.left <= position && position < e.right)
                    .count();
                assert_ne!(arity, 1, "unary node {node:?} at {position}");
            }
        }
    }

    #[test]
    fn test_overlapping_generations() {
        let mut sim = WrightFisherSimulator::new(30, SEED).with_survival(0.85);
        let tables = sim.run(10).unwrap();
        assert!(!tables.edges.is_empty());
        assert!(tables.sites.is_empty());
        let simplified = simplified_to_samples(&tables);
        let samples = simplified.nodes.samples();
        let index = TreeIndex::new(&simplified);
        for position in tree_midpoints(&simplified) {
            let root = index.root_at(samples[0], position);
            for &sample in &samples {
                assert_eq!(index.root_at(sample, position), root);
            }
        }
    }

    #[test]
    fn test_one_generation_no_deep_history() {
        let popsize = 10;
        let mut sim = WrightFisherSimulator::new(popsize, SEED).with_deep_history(false);
        let tables = sim.run(1).unwrap();
        assert_eq!(tables.nodes.len(), 2 * popsize);
        assert!(!tables.edges.is_empty());
        assert!(tables.sites.is_empty());
        let simplified = simplified_to_samples(&tables);
        let samples = simplified.nodes.samples();
        assert_eq!(samples.len(), popsize);
        let index = TreeIndex::new(&simplified);
        for position in tree_midpoints(&simplified) {
            // One founder generation cannot have coalesced, so each
            // tree is a forest partitioning the samples among at most
            // `popsize` disjoint roots.
            let mut roots = vec![];
            for &sample in &samples {
                let root = index.root_at(sample, position);
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
            assert!(roots.len() <= popsize);
            let mut partitioned = 0;
            for &root in &roots {
                let below: Vec<_> = samples
                    .iter()
                    .filter(|&&s| index.root_at(s, position) == root)
                    .collect();
                partitioned += below.len();
            }
            assert_eq!(partitioned, popsize);
        }
    }

    #[test]
    fn test_many_generations_no_deep_history() {
        let popsize = 10;
        let ngens = 100;
        let mut sim = WrightFisherSimulator::new(popsize, SEED).with_deep_history(false);
        let tables = sim.run(ngens).unwrap();
        // One cohort per generation plus the founders, exactly.
        assert_eq!(tables.nodes.len(), popsize * (ngens as usize + 1));
        assert!(!tables.edges.is_empty());
        let simplified = simplified_to_samples(&tables);
        let samples = simplified.nodes.samples();
        let index = TreeIndex::new(&simplified);
        // Everything should have coalesced by now.
        for position in tree_midpoints(&simplified) {
            let root = index.root_at(samples[0], position);
            for &sample in &samples {
                assert_eq!(index.root_at(sample, position), root);
            }
        }
    }

    #[test]
    fn test_deep_history_coverage() {
        let mut sim = WrightFisherSimulator::new(8, SEED);
        let tables = sim.run(5).unwrap();
        verify_ancestral_coverage(&tables, 5);
    }

    #[test]
    fn test_reproducible_given_seed() {
        let first = WrightFisherSimulator::new(12, 91).with_survival(0.3).run(7).unwrap();
        let second = WrightFisherSimulator::new(12, 91).with_survival(0.3).run(7).unwrap();
        assert_tables_equal(&first, &second);
        let third = WrightFisherSimulator::new(12, 92).with_survival(0.3).run(7).unwrap();
        assert_ne!(second, third);
    }

    #[test]
    fn test_discrete_breakpoints() {
        let mut sim = WrightFisherSimulator::new(10, SEED)
            .with_deep_history(false)
            .with_num_loci(8);
        let tables = sim.run(20).unwrap();
        assert_eq!(tables.sequence_length(), 8.0);
        for edge in &tables.edges {
            assert_eq!(edge.left, edge.left.trunc());
            assert_eq!(edge.right, edge.right.trunc());
        }
    }

    #[test]
    fn test_initial_generation_samples() {
        let mut sim = WrightFisherSimulator::new(5, SEED)
            .with_deep_history(false)
            .with_initial_generation_samples(true);
        let tables = sim.run(2).unwrap();
        for index in 0..5 {
            assert!(tables.nodes.flags(Node::from(index)).is_sample());
        }
    }

    proptest! {
        #[test]
        fn test_coverage_invariant(seed in 0u64..500, popsize in 2usize..8, ngens in 1u32..8) {
            let mut sim = WrightFisherSimulator::new(popsize, seed);
            let tables = sim.run(ngens).unwrap();
            verify_ancestral_coverage(&tables, ngens);
        }

        #[test]
        fn test_continuous_breakpoint_range(seed in 0u64..1000) {
            let mut sim = WrightFisherSimulator::new(2, seed).with_deep_history(false);
            for _ in 0..100 {
                let breakpoint = sim.random_breakpoint();
                prop_assert!((0.0..=1.0).contains(&breakpoint));
            }
        }

        #[test]
        fn test_discrete_breakpoint_range(seed in 0u64..1000) {
            let mut sim = WrightFisherSimulator::new(2, seed)
                .with_deep_history(false)
                .with_num_loci(10);
            for _ in 0..100 {
                let breakpoint = sim.random_breakpoint();
                prop_assert!(breakpoint >= 1.0 && breakpoint <= 9.0);
                prop_assert_eq!(breakpoint, breakpoint.trunc());
            }
        }
    }
}
