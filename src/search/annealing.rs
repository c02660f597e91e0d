//! Simulated annealing over mixed NNI/SPR moves.

use crate::error::Result;
use crate::objective::{Objective, ObjectiveFunctions};
use crate::quartet::ScoreOracle;
use crate::spr::valid_spr_move;
use crate::tree::Tree;
use rand::Rng;
use rand::seq::IndexedRandom;
use tracing::{debug, info, warn};

const NNI_PROBABILITY: f64 = 0.8;
const MIN_EPOCH_LENGTH: usize = 10;
const MIN_ACCEPT_RATIO: f64 = 0.02;

/// Cooling schedule parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnealingConfig {
    /// Start with an initial acceptance probability of 0.002 instead of 0.2.
    pub low_temperature: bool,
    /// Epoch length is `epoch_factor * edges²`, at least 10.
    pub epoch_factor: f64,
    /// Random-walk steps used to calibrate the start temperature.
    pub trials: usize,
    pub min_temperature: f64,
    /// Consecutive low-acceptance epochs before stopping.
    pub max_no_change: usize,
    pub max_epochs: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        AnnealingConfig {
            low_temperature: false,
            epoch_factor: 0.005,
            trials: 100,
            min_temperature: 0.001,
            max_no_change: 2,
            max_epochs: 10_000,
        }
    }
}

impl AnnealingConfig {
    fn initial_acceptance(&self) -> f64 {
        if self.low_temperature { 0.002 } else { 0.2 }
    }

    fn epoch_length(&self, edges: usize) -> usize {
        ((self.epoch_factor * (edges * edges) as f64) as usize).max(MIN_EPOCH_LENGTH)
    }
}

/// Apply one random score-updating move: NNI with probability 0.8 on a
/// uniformly chosen internal edge, otherwise a uniformly chosen valid SPR.
fn random_move<O: ScoreOracle, R: Rng>(
    tree: &mut Tree,
    functions: &ObjectiveFunctions<O>,
    oracle: &mut O,
    rng: &mut R,
) -> Result<()> {
    let internal: Vec<usize> = tree.internal_edges().collect();
    let Some(&edge) = internal.choose(rng) else {
        return Ok(());
    };
    if rng.random_bool(NNI_PROBABILITY) {
        let mv = if rng.random_bool(0.5) { functions.nni_a } else { functions.nni_b };
        return mv(tree, edge, oracle);
    }
    let m = tree.edge_count();
    loop {
        let prune = rng.random_range(0..m);
        let regraft = rng.random_range(0..m);
        if valid_spr_move(tree, prune, regraft) {
            return (functions.spr)(tree, prune, regraft, oracle);
        }
    }
}

/// Mean objective change of the downhill steps of a random walk, or `None`
/// if the walk never went downhill.
fn calibrate<O: ScoreOracle, R: Rng>(
    tree: &Tree,
    functions: &ObjectiveFunctions<O>,
    oracle: &mut O,
    config: &AnnealingConfig,
    rng: &mut R,
) -> Result<Option<f64>> {
    let mut walk = tree.clone();
    oracle.recompute_scores(&walk, false)?;
    let cap = config.trials.max(1) * 100;
    let mut sum = 0.0;
    let mut downhill = 0usize;
    let mut i = 0;
    while (i < config.trials || downhill < 2) && i < cap {
        let before = (functions.value)(oracle);
        random_move(&mut walk, functions, oracle, rng)?;
        let after = (functions.value)(oracle);
        if after < before {
            sum += after - before;
            downhill += 1;
        }
        i += 1;
    }
    Ok((downhill > 0).then(|| sum / downhill as f64))
}

/// Simulated annealing from `tree`, returning the best tree visited.
///
/// The start temperature is chosen so that an average downhill step of a
/// random walk is accepted with probability 0.2 (0.002 with
/// `low_temperature`). The temperature decays geometrically and the run
/// stops after `max_no_change` consecutive epochs with an acceptance ratio
/// below `max(1 / epoch_length, 0.02)`, or after `max_epochs` epochs.
///
/// On return the oracle holds the scores of the returned tree.
pub fn simulated_annealing<O: ScoreOracle, R: Rng>(
    tree: &Tree,
    oracle: &mut O,
    objective: Objective,
    config: &AnnealingConfig,
    rng: &mut R,
) -> Result<Tree> {
    let functions = ObjectiveFunctions::<O>::new(objective);
    if tree.internal_edge_count() == 0 {
        oracle.recompute_scores(tree, false)?;
        return Ok(tree.clone());
    }

    let Some(mean_downhill) = calibrate(tree, &functions, oracle, config, rng)? else {
        warn!("no downhill move found while calibrating, keeping the start tree");
        oracle.recompute_scores(tree, false)?;
        return Ok(tree.clone());
    };

    let m = tree.edge_count();
    let t0 = mean_downhill / config.initial_acceptance().ln();
    let alpha = (config.min_temperature / t0).powf(1.0 / (m as f64 - 1.0));
    let epoch_length = config.epoch_length(m);
    let min_accept = (1.0 / epoch_length as f64).max(MIN_ACCEPT_RATIO);
    debug!(t0, alpha, epoch_length, "annealing schedule");

    let mut current = tree.clone();
    oracle.recompute_scores(&current, false)?;
    let mut current_score = (functions.value)(oracle);
    let mut best = current.clone();
    let mut max = current_score;

    let mut temperature = t0;
    let mut no_change = 0;
    let mut epoch = 0;
    while no_change < config.max_no_change && epoch < config.max_epochs {
        let mut accepted = 0usize;
        for _ in 0..epoch_length {
            let saved = (functions.scores)(oracle).to_vec();
            let mut candidate = current.clone();
            random_move(&mut candidate, &functions, oracle, rng)?;
            let score = (functions.value)(oracle);
            let ratio = ((score - current_score) / temperature).exp();
            if ratio > 1.0 || rng.random::<f64>() < ratio {
                current = candidate;
                current_score = score;
                accepted += 1;
                if score > max {
                    max = score;
                    best = current.clone();
                }
            } else {
                functions.restore_scores(oracle, &saved);
            }
        }
        let ratio = accepted as f64 / epoch_length as f64;
        if ratio < min_accept {
            no_change += 1;
        } else {
            no_change = 0;
        }
        info!(epoch, temperature, accepted, current = current_score, best = max, "annealing epoch");
        temperature *= alpha;
        epoch += 1;
    }

    oracle.recompute_scores(&best, false)?;
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quartet::QuartetScoreComputer;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const REFS: [&str; 3] = [
        "((A,B),((C,D),(E,F)),(G,H));",
        "((A,B),((C,D),(E,G)),(F,H));",
        "((A,C),((B,D),(E,F)),(G,H));",
    ];

    fn quick() -> AnnealingConfig {
        AnnealingConfig { trials: 20, max_epochs: 50, ..AnnealingConfig::default() }
    }

    fn value(tree: &Tree, oracle: &mut QuartetScoreComputer, objective: Objective) -> f64 {
        oracle.recompute_scores(tree, false).unwrap();
        (ObjectiveFunctions::<QuartetScoreComputer>::new(objective).value)(oracle)
    }

    #[test]
    fn default_schedule() {
        let config = AnnealingConfig::default();
        assert_eq!(config.initial_acceptance(), 0.2);
        assert_eq!(config.epoch_length(13), MIN_EPOCH_LENGTH);
        assert_eq!(config.epoch_length(100), 50);
        let low = AnnealingConfig { low_temperature: true, ..config };
        assert_eq!(low.initial_acceptance(), 0.002);
    }

    #[test]
    fn best_is_never_worse_than_start() {
        let start = Tree::from_newick("((A,H),((C,B),(E,F)),(G,D));").unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
        for objective in [Objective::Lqic, Objective::Qpic, Objective::Eqpic] {
            let before = value(&start, &mut oracle, objective);
            let mut rng = StdRng::seed_from_u64(7);
            let result =
                simulated_annealing(&start, &mut oracle, objective, &quick(), &mut rng).unwrap();
            assert!(result.validate_topology());
            let reported = (ObjectiveFunctions::<QuartetScoreComputer>::new(objective).value)(&oracle);
            assert_eq!(reported, value(&result, &mut oracle, objective));
            assert!(reported >= before);
        }
    }

    #[test]
    fn same_seed_same_tree() {
        let start = Tree::from_newick("((A,H),((C,B),(E,F)),(G,D));").unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
        let a = simulated_annealing(
            &start,
            &mut oracle,
            Objective::Qpic,
            &quick(),
            &mut StdRng::seed_from_u64(42),
        )
        .unwrap();
        let b = simulated_annealing(
            &start,
            &mut oracle,
            Objective::Qpic,
            &quick(),
            &mut StdRng::seed_from_u64(42),
        )
        .unwrap();
        assert_eq!(a.to_newick(), b.to_newick());
    }

    #[test]
    fn star_like_tree_is_returned_unchanged() {
        let start = Tree::from_newick("(A,B,C);").unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&["(A,B,C);"]).unwrap();
        let result = simulated_annealing(
            &start,
            &mut oracle,
            Objective::Lqic,
            &quick(),
            &mut StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert_eq!(result, start);
    }
}
