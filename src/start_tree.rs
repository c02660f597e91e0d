//! Start trees: balanced random, stepwise addition and exhaustive search.

use crate::error::{Result, SearchError};
use crate::objective::{Objective, ObjectiveFunctions};
use crate::quartet::ScoreOracle;
use crate::tree::Tree;
use rand::Rng;
use rand::seq::SliceRandom;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Exhaustive search enumerates `(2n - 5)!!` trees; refuse anything larger.
pub const EXHAUSTIVE_MAX_LEAVES: usize = 9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StartTreeKind {
    #[default]
    Random,
    Stepwise,
    Exhaustive,
}

impl FromStr for StartTreeKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(StartTreeKind::Random),
            "stepwise" => Ok(StartTreeKind::Stepwise),
            "exhaustive" => Ok(StartTreeKind::Exhaustive),
            _ => Err(SearchError::UnknownStartTree(s.to_string())),
        }
    }
}

impl fmt::Display for StartTreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StartTreeKind::Random => "random",
            StartTreeKind::Stepwise => "stepwise",
            StartTreeKind::Exhaustive => "exhaustive",
        })
    }
}

fn too_few(leaves: &[String]) -> SearchError {
    SearchError::UnsupportedTopology(format!(
        "need at least 3 leaves to build an unrooted tree, got {}",
        leaves.len()
    ))
}

fn write_balanced(leaves: &[String], out: &mut String) {
    if let [leaf] = leaves {
        out.push_str(leaf);
        return;
    }
    let mid = leaves.len() / 2;
    out.push('(');
    write_balanced(&leaves[..mid], out);
    out.push(',');
    write_balanced(&leaves[mid..], out);
    out.push(')');
}

/// Balanced binary tree over `leaves` in the given order.
///
/// The root has three subtrees holding the first third, the second third
/// and the rest; every subtree below splits its range in halves.
pub fn random_tree_from_leaves(leaves: &[String]) -> Result<Tree> {
    let n = leaves.len();
    if n < 3 {
        return Err(too_few(leaves));
    }
    let a = n / 3;
    let b = 2 * a;
    let mut newick = String::from("(");
    write_balanced(&leaves[..a], &mut newick);
    newick.push(',');
    write_balanced(&leaves[a..b], &mut newick);
    newick.push(',');
    write_balanced(&leaves[b..], &mut newick);
    newick.push_str(");");
    debug!(%newick, "balanced start tree");
    Tree::from_newick(&newick)
}

pub fn random_tree<R: Rng>(leaves: &[String], rng: &mut R) -> Result<Tree> {
    let mut shuffled = leaves.to_vec();
    shuffled.shuffle(rng);
    random_tree_from_leaves(&shuffled)
}

fn triple(leaves: &[String]) -> Result<Tree> {
    match leaves {
        [a, b, c, ..] => Tree::from_newick(&format!("({a},{b},{c});")),
        _ => Err(too_few(leaves)),
    }
}

/// Greedy insertion in the given leaf order.
///
/// Starts from the first three leaves and hangs every further leaf on the
/// edge that maximises the objective, ties going to the lowest edge index.
pub fn stepwise_addition_from_leaves<O: ScoreOracle>(
    leaves: &[String],
    oracle: &mut O,
    objective: Objective,
) -> Result<Tree> {
    let functions = ObjectiveFunctions::<O>::new(objective);
    let mut tree = triple(leaves)?;
    for name in &leaves[3..] {
        let mut best: Option<Tree> = None;
        let mut max = f64::MIN;
        for edge in 0..tree.edge_count() {
            let mut candidate = tree.clone();
            candidate.add_leaf_on_edge(edge, name.as_str());
            oracle.recompute_scores(&candidate, false)?;
            let score = (functions.value)(oracle);
            if score > max {
                max = score;
                best = Some(candidate);
            }
        }
        if let Some(next) = best {
            tree = next;
        }
        debug!(leaf = %name, score = max, "stepwise insertion");
    }
    info!(leaves = leaves.len(), "stepwise addition tree built");
    Ok(tree)
}

/// Stepwise addition over a shuffled leaf order.
pub fn stepwise_addition_tree<O: ScoreOracle, R: Rng>(
    leaves: &[String],
    oracle: &mut O,
    objective: Objective,
    rng: &mut R,
) -> Result<Tree> {
    let mut shuffled = leaves.to_vec();
    shuffled.shuffle(rng);
    stepwise_addition_from_leaves(&shuffled, oracle, objective)
}

struct Exhaustive<'a, O: ScoreOracle> {
    functions: ObjectiveFunctions<O>,
    oracle: &'a mut O,
    best: Option<Tree>,
    max: f64,
    visited: usize,
}

impl<O: ScoreOracle> Exhaustive<'_, O> {
    fn visit(&mut self, tree: &Tree, rest: &[String]) -> Result<()> {
        let Some((name, rest)) = rest.split_first() else {
            self.oracle.recompute_scores(tree, true)?;
            let score = (self.functions.value)(self.oracle);
            self.visited += 1;
            if score > self.max {
                self.max = score;
                self.best = Some(tree.clone());
            }
            return Ok(());
        };
        for edge in 0..tree.edge_count() {
            let mut next = tree.clone();
            next.add_leaf_on_edge(edge, name.as_str());
            self.visit(&next, rest)?;
        }
        Ok(())
    }
}

/// Best-scoring tree among all binary topologies on `leaves`.
///
/// # Errors
/// `UnsupportedTopology` for fewer than 3 or more than
/// [`EXHAUSTIVE_MAX_LEAVES`] leaves.
pub fn exhaustive_search<O: ScoreOracle>(
    leaves: &[String],
    oracle: &mut O,
    objective: Objective,
) -> Result<Tree> {
    if leaves.len() > EXHAUSTIVE_MAX_LEAVES {
        return Err(SearchError::UnsupportedTopology(format!(
            "exhaustive search is limited to {EXHAUSTIVE_MAX_LEAVES} leaves, got {}",
            leaves.len()
        )));
    }
    let start = triple(leaves)?;
    let mut search = Exhaustive {
        functions: ObjectiveFunctions::new(objective),
        oracle: &mut *oracle,
        best: None,
        max: f64::MIN,
        visited: 0,
    };
    search.visit(&start, &leaves[3..])?;
    info!(trees = search.visited, score = search.max, "exhaustive search finished");
    let best = search.best.unwrap_or(start);
    oracle.recompute_scores(&best, false)?;
    Ok(best)
}

/// Build a start tree of the requested kind over `leaves`.
pub fn build_start_tree<O: ScoreOracle, R: Rng>(
    kind: StartTreeKind,
    leaves: &[String],
    oracle: &mut O,
    objective: Objective,
    rng: &mut R,
) -> Result<Tree> {
    match kind {
        StartTreeKind::Random => random_tree(leaves, rng),
        StartTreeKind::Stepwise => stepwise_addition_tree(leaves, oracle, objective, rng),
        StartTreeKind::Exhaustive => exhaustive_search(leaves, oracle, objective),
    }
}

/// Re-expand collapsed clusters.
///
/// For every set, the leaf named after its first member receives the other
/// members as new leaves hung on its own parent edge.
///
/// # Errors
/// `UnknownTaxon` when a set's first member is not a leaf of `tree`.
pub fn expand_cluster_tree(tree: &Tree, leaf_sets: &[Vec<String>]) -> Result<Tree> {
    let mut expanded = tree.clone();
    for set in leaf_sets {
        let Some((head, rest)) = set.split_first() else {
            continue;
        };
        let leaf = expanded
            .leaves()
            .find(|&n| expanded.node_name(n) == Some(head.as_str()))
            .ok_or_else(|| SearchError::UnknownTaxon(head.clone()))?;
        for name in rest {
            let Some(edge) = expanded.parent_edge(leaf) else {
                return Err(SearchError::CorruptTopology(format!("leaf {head} has no parent edge")));
            };
            expanded.add_leaf_on_edge(edge, name.as_str());
        }
    }
    expanded.check_topology()?;
    Ok(expanded)
}
