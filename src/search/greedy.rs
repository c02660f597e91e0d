//! Greedy hill-climbing drivers.

use crate::error::Result;
use crate::neighbors::{NniNeighbors, Scored, SprNeighbors};
use crate::objective::{Objective, ObjectiveFunctions};
use crate::quartet::ScoreOracle;
use crate::tree::Tree;
use tracing::{debug, info};

/// Best-improvement NNI hill-climb.
///
/// Every pass scores all NNI neighbours of the current tree and moves to
/// the best one if it strictly improves the objective. On return the
/// oracle holds the scores of the returned tree.
pub fn treesearch_nni<O: ScoreOracle>(
    tree: &Tree,
    oracle: &mut O,
    objective: Objective,
    restricted: bool,
) -> Result<Tree> {
    let functions = ObjectiveFunctions::<O>::new(objective);
    let mut current = tree.clone();
    oracle.recompute_scores(&current, false)?;
    let mut old_score = (functions.value)(oracle);

    let mut global_best = current.clone();
    let mut global_max = old_score;

    loop {
        oracle.recompute_scores(&current, false)?;
        let mut max = f64::MIN;
        let mut best: Option<Tree> = None;
        {
            let mover = Scored::new(&functions, &mut *oracle, restricted);
            let mut neighbors = NniNeighbors::new(&mut current, mover);
            while neighbors.next_neighbor()?.is_some() {
                let score = neighbors.mover().value();
                if score > max {
                    max = score;
                    best = Some(neighbors.tree().clone());
                }
            }
        }
        match best {
            Some(tree) if max > old_score => {
                current = tree;
                old_score = max;
                info!(objective = %objective, score = max, "NNI improvement");
                if max > global_max {
                    global_max = max;
                    global_best = current.clone();
                }
            }
            _ => break,
        }
    }
    oracle.recompute_scores(&global_best, false)?;
    debug!(score = global_max, "NNI hill-climb finished");
    Ok(global_best)
}

/// Best-improvement SPR hill-climb over all valid SPR neighbours.
pub fn treesearch_spr<O: ScoreOracle>(
    tree: &Tree,
    oracle: &mut O,
    objective: Objective,
    restricted: bool,
) -> Result<Tree> {
    let functions = ObjectiveFunctions::<O>::new(objective);
    let mut current = tree.clone();
    oracle.recompute_scores(&current, false)?;
    let mut old_score = (functions.value)(oracle);

    let mut global_best = current.clone();
    let mut global_max = old_score;

    loop {
        oracle.recompute_scores(&current, false)?;
        let mut max = f64::MIN;
        let mut best: Option<Tree> = None;
        {
            let mover = Scored::new(&functions, &mut *oracle, restricted);
            let mut neighbors = SprNeighbors::new(&mut current, mover);
            while neighbors.next_neighbor()?.is_some() {
                let score = neighbors.mover().value();
                if score > max {
                    max = score;
                    best = Some(neighbors.tree().clone());
                }
            }
        }
        match best {
            Some(tree) if max > old_score => {
                current = tree;
                old_score = max;
                info!(objective = %objective, score = max, "SPR improvement");
                if max > global_max {
                    global_max = max;
                    global_best = current.clone();
                }
            }
            _ => break,
        }
    }
    oracle.recompute_scores(&global_best, false)?;
    debug!(score = global_max, "SPR hill-climb finished");
    Ok(global_best)
}

/// First-improvement SPR followed by an NNI hill-climb, until no SPR move
/// improves.
pub fn treesearch_combo<O: ScoreOracle>(
    tree: &Tree,
    oracle: &mut O,
    objective: Objective,
    restricted: bool,
) -> Result<Tree> {
    let functions = ObjectiveFunctions::<O>::new(objective);
    let mut best = tree.clone();
    oracle.recompute_scores(&best, false)?;
    let mut max = (functions.value)(oracle);

    loop {
        let mut current = best.clone();
        oracle.recompute_scores(&current, false)?;
        let mut found: Option<(Tree, f64)> = None;
        {
            let mover = Scored::new(&functions, &mut *oracle, restricted);
            let mut neighbors = SprNeighbors::new(&mut current, mover);
            while let Some(mv) = neighbors.next_neighbor()? {
                let score = neighbors.mover().value();
                if score > max {
                    debug!(prune = mv.prune, regraft = mv.regraft, score, "first improving SPR");
                    found = Some((neighbors.tree().clone(), score));
                    break;
                }
            }
        }
        let Some((improved, score)) = found else {
            break;
        };
        max = score;
        best = improved;
        info!(objective = %objective, score = max, "SPR improvement");

        let polished = treesearch_nni(&best, oracle, objective, restricted)?;
        let score = (functions.value)(oracle);
        if score > max {
            max = score;
            best = polished;
        }
    }
    oracle.recompute_scores(&best, false)?;
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quartet::QuartetScoreComputer;

    const REFS: [&str; 4] = [
        "((A,B),((C,D),(E,F)),(G,H));",
        "((A,B),((C,D),(E,G)),(F,H));",
        "((A,B),((C,E),(D,F)),(G,H));",
        "((A,B),((C,D),(E,F)),(H,G));",
    ];
    const START: &str = "((A,H),((C,B),(E,F)),(G,D));";

    fn score<O: ScoreOracle>(tree: &Tree, oracle: &mut O, objective: Objective) -> f64 {
        oracle.recompute_scores(tree, false).unwrap();
        (ObjectiveFunctions::<O>::new(objective).value)(oracle)
    }

    #[test]
    fn scenario_c_nni_never_loses_ground() {
        let start = Tree::from_newick(START).unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
        for objective in [Objective::Lqic, Objective::Qpic, Objective::Eqpic] {
            let before = score(&start, &mut oracle, objective);
            let result = treesearch_nni(&start, &mut oracle, objective, false).unwrap();
            assert!(result.validate_topology());
            let reported = (ObjectiveFunctions::<QuartetScoreComputer>::new(objective).value)(&oracle);
            let after = score(&result, &mut oracle, objective);
            assert_eq!(reported, after);
            assert!(after >= before, "{objective}: {after} < {before}");
        }
    }

    #[test]
    fn nni_local_optimum_has_no_better_neighbour() {
        let start = Tree::from_newick(START).unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
        let result = treesearch_nni(&start, &mut oracle, Objective::Lqic, false).unwrap();
        let best = score(&result, &mut oracle, Objective::Lqic);
        for neighbour in crate::nni::nni(&result).unwrap() {
            assert!(score(&neighbour, &mut oracle, Objective::Lqic) <= best);
        }
    }

    #[test]
    fn spr_search_stops_at_a_local_optimum() {
        let start = Tree::from_newick(START).unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS[..1]).unwrap();
        let before = score(&start, &mut oracle, Objective::Lqic);
        let result = treesearch_spr(&start, &mut oracle, Objective::Lqic, false).unwrap();
        assert!(result.validate_topology());
        let best = score(&result, &mut oracle, Objective::Lqic);
        assert!(best >= before);

        let edges = result.edge_count();
        for prune in 0..edges {
            for regraft in 0..edges {
                if !crate::spr::valid_spr_move(&result, prune, regraft) {
                    continue;
                }
                let mut neighbour = result.clone();
                crate::spr::spr(&mut neighbour, prune, regraft).unwrap();
                assert!(score(&neighbour, &mut oracle, Objective::Lqic) <= best);
            }
        }
    }

    #[test]
    fn reference_tree_is_already_optimal() {
        let reference = Tree::from_newick(REFS[0]).unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS[..1]).unwrap();
        let before = score(&reference, &mut oracle, Objective::Lqic);
        let result = treesearch_spr(&reference, &mut oracle, Objective::Lqic, false).unwrap();
        assert_eq!(result, reference);
        assert_eq!(score(&result, &mut oracle, Objective::Lqic), before);
    }

    #[test]
    fn combo_is_at_least_as_good_as_its_start() {
        let start = Tree::from_newick(START).unwrap();
        let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
        let before = score(&start, &mut oracle, Objective::Qpic);
        let result = treesearch_combo(&start, &mut oracle, Objective::Qpic, true).unwrap();
        assert!(result.validate_topology());
        assert!(score(&result, &mut oracle, Objective::Qpic) >= before);
        let mut names = result.leaf_names();
        names.sort();
        assert_eq!(names, ["A", "B", "C", "D", "E", "F", "G", "H"]);
    }
}
