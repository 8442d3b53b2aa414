//! Jukes-Cantor mutation overlay.
//!
//! Scatters mutations over an existing record: `num_sites` sites at
//! evenly spaced positions, and on every branch a Poisson number of
//! mutations with mean `mu` times the branch length. States come from
//! the four-letter alphabet `0123`; each mutation moves to one of the
//! other three states, chosen uniformly, and records the resulting
//! state.

use rand::Rng;
use rand_distr::Distribution;
use rand_distr::Poisson;

use crate::tables::Mutation;
use crate::tables::Tables;
use crate::trees::TreeIndex;
use crate::Node;

const ALPHABET: [u8; 4] = [b'0', b'1', b'2', b'3'];

fn transition<R: Rng>(current: u8, rng: &mut R) -> u8 {
    loop {
        let state = ALPHABET[rng.gen_range(0..ALPHABET.len())];
        if state != current {
            return state;
        }
    }
}

/// Return a copy of `tables` with sites and mutations added. The input
/// must not already carry variants. Mutations come out site-major and
/// oldest first, with parent mutations resolved, so the result is
/// already in canonical sort order.
pub fn jukes_cantor<R: Rng>(tables: &Tables, num_sites: usize, mu: f64, rng: &mut R) -> Tables {
    assert!(tables.sites.is_empty() && tables.mutations.is_empty());
    let mut output = tables.clone();
    let sequence_length = tables.sequence_length();
    let index = TreeIndex::new(tables);

    // Oldest nodes first, so a branch's top state is always resolved
    // before the branch itself is visited.
    let mut order: Vec<Node> = tables.nodes.iter().collect();
    order.sort_by(|a, b| tables.nodes.time(*b).total_cmp(&tables.nodes.time(*a)));

    for site_index in 0..num_sites {
        let position = site_index as f64 * sequence_length / num_sites as f64;
        let site = output.add_site(position, ALPHABET[0]);
        let mut state = vec![ALPHABET[0]; tables.nodes.len()];
        let mut last_mutation: Vec<Option<usize>> = vec![None; tables.nodes.len()];
        // Local, then renumbered by descending time below.
        let mut placed: Vec<Mutation> = vec![];
        for &node in &order {
            let Some(parent) = index.parent_at(node, position) else {
                continue;
            };
            state[node.as_index()] = state[parent.as_index()];
            last_mutation[node.as_index()] = last_mutation[parent.as_index()];
            let branch_length = tables.nodes.time(parent) - tables.nodes.time(node);
            let expected = mu * branch_length;
            if expected <= 0.0 {
                continue;
            }
            let count = Poisson::new(expected).unwrap().sample(rng) as usize;
            if count == 0 {
                continue;
            }
            let mut times: Vec<f64> = (0..count)
                .map(|_| tables.nodes.time(node) + rng.gen::<f64>() * branch_length)
                .collect();
            times.sort_by(|a, b| b.total_cmp(a));
            for time in times {
                let derived = transition(state[node.as_index()], rng);
                placed.push(Mutation {
                    site,
                    node,
                    parent: last_mutation[node.as_index()],
                    time,
                    derived_state: derived,
                });
                state[node.as_index()] = derived;
                last_mutation[node.as_index()] = Some(placed.len() - 1);
            }
        }
        // Renumber the site's mutations oldest first.
        let mut by_age: Vec<usize> = (0..placed.len()).collect();
        by_age.sort_by(|&a, &b| placed[b].time.total_cmp(&placed[a].time));
        let mut renumbered = vec![0_usize; placed.len()];
        for (new_id, &old_id) in by_age.iter().enumerate() {
            renumbered[old_id] = new_id;
        }
        let base = output.mutations.len();
        for &old_id in &by_age {
            let mutation = placed[old_id];
            output.add_mutation(
                mutation.site,
                mutation.node,
                mutation.parent.map(|p| base + renumbered[p]),
                mutation.time,
                mutation.derived_state,
            );
        }
    }
    output
}
