//! Lazy NNI and SPR neighbour enumeration.
//!
//! A generator borrows the tree mutably, applies one move per call to
//! `next_neighbor`, and undoes it at the start of the following call. The
//! neighbour is therefore only observable between two calls, through
//! `tree()`; copy it to keep it. Dropping a generator with a move still
//! applied undoes that move.
//!
//! How a move is applied is left to a `Mover`: `TopologyOnly` touches the
//! tree alone, `Scored` also keeps one score vector of an oracle current and
//! can skip moves in restricted mode.

use crate::error::Result;
use crate::nni::{NniVariant, nni_inplace};
use crate::objective::ObjectiveFunctions;
use crate::quartet::ScoreOracle;
use crate::spr::{spr, valid_spr_move};
use crate::tree::Tree;
use tracing::error;

/// Applies moves for a generator and decides which ones to skip.
pub trait Mover {
    fn apply_nni(&mut self, tree: &mut Tree, edge: usize, variant: NniVariant) -> Result<()>;
    fn apply_spr(&mut self, tree: &mut Tree, prune: usize, regraft: usize) -> Result<()>;

    fn skip_nni(&self, _tree: &Tree, _edge: usize) -> bool {
        false
    }

    fn skip_spr(&self, _tree: &Tree, _prune: usize, _regraft: usize) -> bool {
        false
    }
}

/// Plain topology moves.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologyOnly;

impl Mover for TopologyOnly {
    fn apply_nni(&mut self, tree: &mut Tree, edge: usize, variant: NniVariant) -> Result<()> {
        nni_inplace(tree, edge, variant);
        Ok(())
    }

    fn apply_spr(&mut self, tree: &mut Tree, prune: usize, regraft: usize) -> Result<()> {
        spr(tree, prune, regraft).map(|_| ())
    }
}

/// Score-updating moves for one objective.
pub struct Scored<'a, O: ScoreOracle> {
    functions: &'a ObjectiveFunctions<O>,
    oracle: &'a mut O,
    restricted: bool,
}

impl<'a, O: ScoreOracle> Scored<'a, O> {
    pub fn new(functions: &'a ObjectiveFunctions<O>, oracle: &'a mut O, restricted: bool) -> Self {
        Scored { functions, oracle, restricted }
    }

    /// Objective value of the current tree.
    pub fn value(&self) -> f64 {
        (self.functions.value)(&*self.oracle)
    }

    pub fn oracle(&self) -> &O {
        &*self.oracle
    }
}

impl<O: ScoreOracle> Mover for Scored<'_, O> {
    fn apply_nni(&mut self, tree: &mut Tree, edge: usize, variant: NniVariant) -> Result<()> {
        match variant {
            NniVariant::A => (self.functions.nni_a)(tree, edge, &mut *self.oracle),
            NniVariant::B => (self.functions.nni_b)(tree, edge, &mut *self.oracle),
        }
    }

    fn apply_spr(&mut self, tree: &mut Tree, prune: usize, regraft: usize) -> Result<()> {
        (self.functions.spr)(tree, prune, regraft, &mut *self.oracle)
    }

    fn skip_nni(&self, _tree: &Tree, edge: usize) -> bool {
        self.functions
            .nni_restrict_edge(edge, &*self.oracle, self.restricted)
    }

    fn skip_spr(&self, tree: &Tree, prune: usize, regraft: usize) -> bool {
        self.functions
            .spr_restrict_edgepair(tree, prune, regraft, &*self.oracle, self.restricted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NniMove {
    pub edge: usize,
    pub variant: NniVariant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SprMove {
    pub prune: usize,
    pub regraft: usize,
}

/// All NNI neighbours: for each internal edge in index order, `nni_a`
/// then `nni_b`.
pub struct NniNeighbors<'a, M: Mover> {
    tree: &'a mut Tree,
    mover: M,
    edge: usize,
    next_variant: NniVariant,
    pending: Option<NniMove>,
}

impl<'a, M: Mover> NniNeighbors<'a, M> {
    pub fn new(tree: &'a mut Tree, mover: M) -> Self {
        NniNeighbors {
            tree,
            mover,
            edge: 0,
            next_variant: NniVariant::A,
            pending: None,
        }
    }

    /// The tree with the last yielded move applied.
    pub fn tree(&self) -> &Tree {
        self.tree
    }

    pub fn mover(&self) -> &M {
        &self.mover
    }

    /// Undo the applied move, if any.
    pub fn restore(&mut self) -> Result<()> {
        if let Some(mv) = self.pending.take() {
            self.mover.apply_nni(self.tree, mv.edge, mv.variant)?;
        }
        Ok(())
    }

    /// Undo the applied move and start over from the first edge.
    pub fn restart(&mut self) -> Result<()> {
        self.restore()?;
        self.edge = 0;
        self.next_variant = NniVariant::A;
        Ok(())
    }

    /// Apply the next move and return it, or `None` when exhausted.
    pub fn next_neighbor(&mut self) -> Result<Option<NniMove>> {
        self.restore()?;
        while self.edge < self.tree.edge_count() {
            let edge = self.edge;
            let variant = self.next_variant;
            if variant == NniVariant::A
                && (!self.tree.is_internal_edge(edge) || self.mover.skip_nni(self.tree, edge))
            {
                self.edge += 1;
                continue;
            }
            match variant {
                NniVariant::A => self.next_variant = NniVariant::B,
                NniVariant::B => {
                    self.next_variant = NniVariant::A;
                    self.edge += 1;
                }
            }
            self.mover.apply_nni(self.tree, edge, variant)?;
            let mv = NniMove { edge, variant };
            self.pending = Some(mv);
            return Ok(Some(mv));
        }
        Ok(None)
    }
}

impl<M: Mover> Drop for NniNeighbors<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("could not undo pending NNI move: {e}");
        }
    }
}

/// All valid SPR neighbours: prune edges in the outer loop, regraft edges
/// in the inner loop.
pub struct SprNeighbors<'a, M: Mover> {
    tree: &'a mut Tree,
    mover: M,
    prune: usize,
    regraft: usize,
    pending: Option<SprMove>,
}

impl<'a, M: Mover> SprNeighbors<'a, M> {
    pub fn new(tree: &'a mut Tree, mover: M) -> Self {
        SprNeighbors {
            tree,
            mover,
            prune: 0,
            regraft: 0,
            pending: None,
        }
    }

    pub fn tree(&self) -> &Tree {
        self.tree
    }

    pub fn mover(&self) -> &M {
        &self.mover
    }

    /// Undo the applied move, if any. SPR is its own inverse.
    pub fn restore(&mut self) -> Result<()> {
        if let Some(mv) = self.pending.take() {
            self.mover.apply_spr(self.tree, mv.prune, mv.regraft)?;
        }
        Ok(())
    }

    pub fn restart(&mut self) -> Result<()> {
        self.restore()?;
        self.prune = 0;
        self.regraft = 0;
        Ok(())
    }

    pub fn next_neighbor(&mut self) -> Result<Option<SprMove>> {
        self.restore()?;
        let m = self.tree.edge_count();
        while self.prune < m {
            let (prune, regraft) = (self.prune, self.regraft);
            self.regraft += 1;
            if self.regraft >= m {
                self.regraft = 0;
                self.prune += 1;
            }
            if !valid_spr_move(self.tree, prune, regraft)
                || self.mover.skip_spr(self.tree, prune, regraft)
            {
                continue;
            }
            self.mover.apply_spr(self.tree, prune, regraft)?;
            let mv = SprMove { prune, regraft };
            self.pending = Some(mv);
            return Ok(Some(mv));
        }
        Ok(None)
    }
}

impl<M: Mover> Drop for SprNeighbors<'_, M> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("could not undo pending SPR move: {e}");
        }
    }
}
