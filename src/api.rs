//! Python binding layer for quartet-based tree search.
//!
//! Provides Python functions for inferring and scoring trees against the
//! reference trees of Newick or BEAST/NEXUS files.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::SearchError;
use crate::io::read_reference_tree_files;
use crate::objective::{Objective, ObjectiveFunctions};
use crate::quartet::{QuartetScoreComputer, ScoreOracle};
use crate::search::{Algorithm, SearchConfig, run_search};
use crate::start_tree::{StartTreeKind, build_start_tree};
use crate::tree::Tree;

fn value_error(e: SearchError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Read every file and index the taxa of all reference trees.
fn load_oracle(paths: &[String]) -> PyResult<QuartetScoreComputer> {
    if paths.is_empty() {
        return Err(PyValueError::new_err("No reference tree files given"));
    }
    let trees = read_reference_tree_files(paths).map_err(value_error)?;
    QuartetScoreComputer::new(&trees).map_err(value_error)
}

/// Infer a tree maximising quartet internode certainty.
///
/// Args:
///     paths: List of reference tree files (Newick lists or BEAST/NEXUS)
///     objective: "lqic", "qpic" or "eqpic" (default: "lqic")
///     algorithm: "nni", "spr", "combo" or "annealing" (default: "annealing")
///     start_tree: "random", "stepwise" or "exhaustive" (default: "random")
///     restricted: Only try moves around negatively scored edges (default: False)
///     seed: Seed for the random number generator (default: OS entropy)
///
/// Returns:
///     The best tree found, as a Newick string
///
/// Raises:
///     ValueError: If the files hold no usable trees or a selector is unknown
#[pyfunction]
#[pyo3(signature = (paths, objective="lqic", algorithm="annealing", start_tree="random", restricted=false, seed=None))]
fn infer_tree(
    py: Python<'_>,
    paths: Vec<String>,
    objective: &str,
    algorithm: &str,
    start_tree: &str,
    restricted: bool,
    seed: Option<u64>,
) -> PyResult<String> {
    let objective: Objective = objective.parse().map_err(value_error)?;
    let algorithm: Algorithm = algorithm.parse().map_err(value_error)?;
    let kind: StartTreeKind = start_tree.parse().map_err(value_error)?;
    let mut oracle = load_oracle(&paths)?;

    let config = SearchConfig { algorithm, objective, restricted, ..SearchConfig::default() };
    py.detach(move || -> crate::error::Result<String> {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let leaves = oracle.taxa().to_vec();
        let start = build_start_tree(kind, &leaves, &mut oracle, objective, &mut rng)?;
        let result = run_search(&start, &mut oracle, &config, &mut rng)?;
        Ok(result.to_newick())
    })
    .map_err(value_error)
}

/// Objective value of a tree with respect to reference trees.
///
/// Args:
///     newick: The tree to score; must be binary with a trifurcating root
///     paths: List of reference tree files
///     objective: "lqic", "qpic" or "eqpic" (default: "lqic")
///
/// Returns:
///     Sum of the per-edge scores
///
/// Raises:
///     ValueError: If the tree does not parse or has taxa absent from the references
#[pyfunction]
#[pyo3(signature = (newick, paths, objective="lqic"))]
fn score_tree(newick: &str, paths: Vec<String>, objective: &str) -> PyResult<f64> {
    let objective: Objective = objective.parse().map_err(value_error)?;
    let tree = Tree::from_newick(newick).map_err(value_error)?;
    let mut oracle = load_oracle(&paths)?;
    oracle.recompute_scores(&tree, false).map_err(value_error)?;
    Ok((ObjectiveFunctions::<QuartetScoreComputer>::new(objective).value)(&oracle))
}

/// Python module definition
#[pymodule]
fn quartet_treesearch(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(infer_tree, m)?)?;
    m.add_function(wrap_pyfunction!(score_tree, m)?)?;
    Ok(())
}
