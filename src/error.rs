//! Error types for tree search.
//!
//! Invalid moves are not errors: `valid_spr_move` is a predicate and the
//! neighbour generators skip rejected candidates. Everything in here either
//! aborts a run (bad input, unknown selector) or signals an operator defect
//! (corrupt topology, runaway re-orientation).

use std::error::Error;
use std::fmt;
use std::io;

/// Errors raised while reading trees, scoring or rearranging them.
#[derive(Debug)]
pub enum SearchError {
    /// phylotree rejected the Newick text, or the parsed tree is unusable.
    InvalidNewick(String),
    /// Tree is not binary with a trifurcating root.
    UnsupportedTopology(String),
    /// A search-tree leaf does not occur in any reference tree.
    UnknownTaxon(String),
    UnknownObjective(String),
    UnknownAlgorithm(String),
    UnknownStartTree(String),
    /// `validate_topology` failed after a mutation.
    CorruptTopology(String),
    /// Root-case re-orientation visited more links than the tree has.
    SprNonTermination { prune: usize, regraft: usize },
    /// `spr` was called with a pair rejected by `valid_spr_move`.
    InvalidMove { prune: usize, regraft: usize },
    /// A tree source produced no trees.
    NoTrees(String),
    Io(io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SearchError>;

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::InvalidNewick(msg) => write!(f, "invalid Newick input: {msg}"),
            SearchError::UnsupportedTopology(msg) => {
                write!(f, "unsupported tree topology: {msg}")
            }
            SearchError::UnknownTaxon(name) => {
                write!(f, "taxon '{name}' does not occur in the reference trees")
            }
            SearchError::UnknownObjective(s) => {
                write!(f, "unknown objective '{s}' (expected lqic, qpic or eqpic)")
            }
            SearchError::UnknownAlgorithm(s) => {
                write!(f, "unknown algorithm '{s}' (expected nni, spr, combo or annealing)")
            }
            SearchError::UnknownStartTree(s) => {
                write!(f, "unknown start tree '{s}' (expected random, stepwise or exhaustive)")
            }
            SearchError::CorruptTopology(msg) => write!(f, "corrupt tree topology: {msg}"),
            SearchError::SprNonTermination { prune, regraft } => write!(
                f,
                "SPR({prune}, {regraft}) not possible: re-orientation did not terminate"
            ),
            SearchError::InvalidMove { prune, regraft } => {
                write!(f, "SPR({prune}, {regraft}) is not a valid move")
            }
            SearchError::NoTrees(source) => write!(f, "no trees found in {source}"),
            SearchError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SearchError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SearchError {
    fn from(e: io::Error) -> Self {
        SearchError::Io(e)
    }
}
