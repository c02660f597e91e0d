//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `tree`: link/edge/node arena for unrooted binary trees and its primitives.
//! - `newick`: conversion between Newick (via `phylotree`) and the arena.
//! - `bitset`, `snapshot`: leaf-set bitsets and reference-tree split snapshots.
//! - `quartet`: quartet lookup table, QIC scores and the `ScoreOracle` trait.
//! - `nni`, `spr`: topology operators and their score-updating variants.
//! - `objective`: objective selection and the per-objective operation bundle.
//! - `neighbors`: lazy NNI/SPR neighbour generators.
//! - `search`: greedy NNI/SPR, combo and simulated annealing drivers.
//! - `start_tree`: random, stepwise-addition and exhaustive start trees.
//! - `io`: reading reference trees and writing result trees.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod bitset;
pub mod error;
pub mod io;
pub mod neighbors;
pub mod newick;
pub mod nni;
pub mod objective;
pub mod quartet;
pub mod search;
pub mod snapshot;
pub mod spr;
pub mod start_tree;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use error::{Result, SearchError};
pub use io::{read_reference_trees, read_start_tree, write_newick};
pub use objective::{Objective, ObjectiveFunctions};
pub use quartet::{QuartetScoreComputer, ScoreOracle};
pub use search::{Algorithm, AnnealingConfig, SearchConfig, run_search};
pub use start_tree::StartTreeKind;
pub use tree::Tree;
