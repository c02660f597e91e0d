//! Search drivers and their configuration.

mod annealing;
mod greedy;

pub use annealing::{AnnealingConfig, simulated_annealing};
pub use greedy::{treesearch_combo, treesearch_nni, treesearch_spr};

use crate::error::{Result, SearchError};
use crate::objective::Objective;
use crate::quartet::ScoreOracle;
use crate::tree::Tree;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Nni,
    Spr,
    Combo,
    #[default]
    Annealing,
}

impl FromStr for Algorithm {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nni" => Ok(Algorithm::Nni),
            "spr" => Ok(Algorithm::Spr),
            "combo" => Ok(Algorithm::Combo),
            "annealing" | "sa" => Ok(Algorithm::Annealing),
            _ => Err(SearchError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Nni => "nni",
            Algorithm::Spr => "spr",
            Algorithm::Combo => "combo",
            Algorithm::Annealing => "annealing",
        })
    }
}

/// Everything a search run needs besides the start tree and the oracle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchConfig {
    pub algorithm: Algorithm,
    pub objective: Objective,
    /// Only try moves touching negatively scored edges. Ignored by annealing.
    pub restricted: bool,
    pub annealing: AnnealingConfig,
}

/// Run the configured search from `tree`.
///
/// The returned tree has passed `check_topology`, and the oracle holds its
/// scores.
pub fn run_search<O: ScoreOracle, R: Rng>(
    tree: &Tree,
    oracle: &mut O,
    config: &SearchConfig,
    rng: &mut R,
) -> Result<Tree> {
    info!(
        algorithm = %config.algorithm,
        objective = %config.objective,
        restricted = config.restricted,
        "starting tree search"
    );
    let result = match config.algorithm {
        Algorithm::Nni => treesearch_nni(tree, oracle, config.objective, config.restricted)?,
        Algorithm::Spr => treesearch_spr(tree, oracle, config.objective, config.restricted)?,
        Algorithm::Combo => treesearch_combo(tree, oracle, config.objective, config.restricted)?,
        Algorithm::Annealing => {
            simulated_annealing(tree, oracle, config.objective, &config.annealing, rng)?
        }
    };
    result.check_topology()?;
    Ok(result)
}
