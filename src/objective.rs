//! Objective selection and the per-objective operation bundle.

use crate::error::{Result, SearchError};
use crate::nni::{
    nni_a_with_eqpic_update, nni_a_with_lqic_update, nni_a_with_qpic_update,
    nni_b_with_eqpic_update, nni_b_with_lqic_update, nni_b_with_qpic_update,
};
use crate::quartet::ScoreOracle;
use crate::spr::{
    has_negative_on_spr_path, spr_with_eqpic_update, spr_with_lqic_update, spr_with_qpic_update,
};
use crate::tree::Tree;
use std::fmt;
use std::str::FromStr;

/// Which per-edge quartet score the search maximises.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Objective {
    #[default]
    Lqic,
    Qpic,
    Eqpic,
}

impl FromStr for Objective {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lqic" => Ok(Objective::Lqic),
            "qpic" => Ok(Objective::Qpic),
            "eqpic" => Ok(Objective::Eqpic),
            _ => Err(SearchError::UnknownObjective(s.to_string())),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Objective::Lqic => "lqic",
            Objective::Qpic => "qpic",
            Objective::Eqpic => "eqpic",
        })
    }
}

/// Sum of the scores inside `[-1, 1]`; anything else is not a score.
pub fn clipped_sum(scores: &[f64]) -> f64 {
    scores.iter().filter(|s| (-1.0..=1.0).contains(*s)).sum()
}

pub fn sum_lqic_scores<O: ScoreOracle>(oracle: &O) -> f64 {
    clipped_sum(oracle.lqic_scores())
}

pub fn sum_qpic_scores<O: ScoreOracle>(oracle: &O) -> f64 {
    clipped_sum(oracle.qpic_scores())
}

pub fn sum_eqpic_scores<O: ScoreOracle>(oracle: &O) -> f64 {
    clipped_sum(oracle.eqpic_scores())
}

fn lqic_of<O: ScoreOracle>(oracle: &O) -> &[f64] {
    oracle.lqic_scores()
}

fn qpic_of<O: ScoreOracle>(oracle: &O) -> &[f64] {
    oracle.qpic_scores()
}

fn eqpic_of<O: ScoreOracle>(oracle: &O) -> &[f64] {
    oracle.eqpic_scores()
}

fn set_lqic_of<O: ScoreOracle>(oracle: &mut O, edge: usize, value: f64) {
    oracle.set_lqic(edge, value);
}

fn set_qpic_of<O: ScoreOracle>(oracle: &mut O, edge: usize, value: f64) {
    oracle.set_qpic(edge, value);
}

fn set_eqpic_of<O: ScoreOracle>(oracle: &mut O, edge: usize, value: f64) {
    oracle.set_eqpic(edge, value);
}

pub type NniMoveFn<O> = fn(&mut Tree, usize, &mut O) -> Result<()>;
pub type SprMoveFn<O> = fn(&mut Tree, usize, usize, &mut O) -> Result<()>;

/// The operations a search driver needs, resolved once per objective.
///
/// Score-updating moves keep the selected score vector consistent with the
/// tree; the other two vectors of the oracle may go stale.
pub struct ObjectiveFunctions<O: ScoreOracle> {
    pub objective: Objective,
    /// Objective value of the oracle's current scores.
    pub value: fn(&O) -> f64,
    pub nni_a: NniMoveFn<O>,
    pub nni_b: NniMoveFn<O>,
    pub spr: SprMoveFn<O>,
    pub scores: fn(&O) -> &[f64],
    pub set_score: fn(&mut O, usize, f64),
}

impl<O: ScoreOracle> ObjectiveFunctions<O> {
    pub fn new(objective: Objective) -> Self {
        match objective {
            Objective::Lqic => ObjectiveFunctions {
                objective,
                value: sum_lqic_scores::<O>,
                nni_a: nni_a_with_lqic_update::<O>,
                nni_b: nni_b_with_lqic_update::<O>,
                spr: spr_with_lqic_update::<O>,
                scores: lqic_of::<O>,
                set_score: set_lqic_of::<O>,
            },
            Objective::Qpic => ObjectiveFunctions {
                objective,
                value: sum_qpic_scores::<O>,
                nni_a: nni_a_with_qpic_update::<O>,
                nni_b: nni_b_with_qpic_update::<O>,
                spr: spr_with_qpic_update::<O>,
                scores: qpic_of::<O>,
                set_score: set_qpic_of::<O>,
            },
            Objective::Eqpic => ObjectiveFunctions {
                objective,
                value: sum_eqpic_scores::<O>,
                nni_a: nni_a_with_eqpic_update::<O>,
                nni_b: nni_b_with_eqpic_update::<O>,
                spr: spr_with_eqpic_update::<O>,
                scores: eqpic_of::<O>,
                set_score: set_eqpic_of::<O>,
            },
        }
    }

    /// In restricted mode, skip NNI on edges that are not negatively scored.
    pub fn nni_restrict_edge(&self, edge: usize, oracle: &O, restricted: bool) -> bool {
        restricted && (self.scores)(oracle).get(edge).is_none_or(|&s| s >= 0.0)
    }

    /// In restricted mode, skip SPR pairs whose path has no negative edge.
    pub fn spr_restrict_edgepair(
        &self,
        tree: &Tree,
        prune: usize,
        regraft: usize,
        oracle: &O,
        restricted: bool,
    ) -> bool {
        restricted && !has_negative_on_spr_path(tree, prune, regraft, (self.scores)(oracle))
    }

    /// Overwrite the selected score vector, e.g. after a rejected move.
    pub fn restore_scores(&self, oracle: &mut O, saved: &[f64]) {
        for (e, &s) in saved.iter().enumerate() {
            (self.set_score)(oracle, e, s);
        }
    }
}
