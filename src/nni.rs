//! Nearest-neighbour interchange.
//!
//! For an internal edge `e = P - S` let `x` be the child link of `P` that is
//! not `e` (the sibling of `S`), and `u`, `v` the two child links of `S`
//! in rotation order. `nni_a` exchanges the subtrees behind `x` and `v`,
//! `nni_b` those behind `x` and `u`:
//!
//! ```text
//!        x                         x <-> v   (nni_a)
//!         \       u                x <-> u   (nni_b)
//!          P --e-- S
//!         /       v
//! ```
//!
//! Both are involutions: applying the same operator to the same edge twice
//! restores the arena bit for bit.

use crate::error::{Result, SearchError};
use crate::quartet::ScoreOracle;
use crate::tree::Tree;
use rand::Rng;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NniVariant {
    A,
    B,
}

/// The two links whose subtrees a move on `edge` exchanges.
fn swap_links(tree: &Tree, edge: usize, variant: NniVariant) -> (usize, usize) {
    let pl = tree.primary_link(edge);
    let pn = tree.next(pl);
    // is the link after the primary link P's up link?
    let x = if tree.secondary_link(tree.link_edge(pn)) == pn {
        tree.next(pn)
    } else {
        pn
    };
    let s = tree.secondary_link(edge);
    let y = match variant {
        NniVariant::A => tree.next(tree.next(s)),
        NniVariant::B => tree.next(s),
    };
    (x, y)
}

/// Exchange the subtrees hanging behind links `x` and `y`. Both links keep
/// their edge, the subtrees move.
fn exchange(tree: &mut Tree, x: usize, y: usize) {
    let xo = tree.links[x].outer;
    let yo = tree.links[y].outer;
    tree.links[x].outer = yo;
    tree.links[yo].outer = x;
    tree.links[y].outer = xo;
    tree.links[xo].outer = y;

    let ex = tree.links[x].edge;
    let ey = tree.links[y].edge;
    tree.edges[ex].secondary = yo;
    tree.links[yo].edge = ex;
    tree.edges[ey].secondary = xo;
    tree.links[xo].edge = ey;
}

/// Apply an NNI move on `edge` in place. The edge must be internal.
pub fn nni_inplace(tree: &mut Tree, edge: usize, variant: NniVariant) {
    let (x, y) = swap_links(tree, edge, variant);
    exchange(tree, x, y);
}

pub fn nni_a_inplace(tree: &mut Tree, edge: usize) {
    nni_inplace(tree, edge, NniVariant::A);
}

pub fn nni_b_inplace(tree: &mut Tree, edge: usize) {
    nni_inplace(tree, edge, NniVariant::B);
}

/// Copy of `tree` with `nni_a` applied on `edge`.
pub fn nni_a(tree: &Tree, edge: usize) -> Tree {
    let mut t = tree.clone();
    nni_a_inplace(&mut t, edge);
    t
}

/// Copy of `tree` with `nni_b` applied on `edge`.
pub fn nni_b(tree: &Tree, edge: usize) -> Tree {
    let mut t = tree.clone();
    nni_b_inplace(&mut t, edge);
    t
}

fn neighbours_of(tree: &Tree, edges: impl Iterator<Item = usize>) -> Result<Vec<Tree>> {
    let mut trees = Vec::new();
    for e in edges {
        for variant in [NniVariant::A, NniVariant::B] {
            let mut t = tree.clone();
            nni_inplace(&mut t, e, variant);
            t.check_topology().map_err(|err| {
                SearchError::CorruptTopology(format!("NNI {variant:?} on edge {e}: {err}"))
            })?;
            trees.push(t);
        }
    }
    Ok(trees)
}

/// All `2 × #internal edges` NNI neighbours, in edge order, `nni_a` first.
///
/// # Errors
/// `CorruptTopology` if a neighbour fails validation.
pub fn nni(tree: &Tree) -> Result<Vec<Tree>> {
    neighbours_of(tree, tree.internal_edges())
}

/// NNI neighbours over internal edges with a negative score only.
pub fn nni_only_negative(tree: &Tree, scores: &[f64]) -> Result<Vec<Tree>> {
    neighbours_of(
        tree,
        tree.internal_edges()
            .filter(|&e| scores.get(e).is_some_and(|&s| s < 0.0)),
    )
}

/// Copy of `tree` with `n` random NNI moves applied.
pub fn make_random_nni_moves<R: Rng>(tree: &Tree, n: usize, rng: &mut R) -> Tree {
    let mut t = tree.clone();
    for _ in 0..n {
        // a move can turn an internal edge index into a leaf edge
        let internal: Vec<usize> = t.internal_edges().collect();
        if internal.is_empty() {
            break;
        }
        let e = internal[rng.random_range(0..internal.len())];
        let variant = if rng.random_bool(0.5) {
            NniVariant::A
        } else {
            NniVariant::B
        };
        nni_inplace(&mut t, e, variant);
    }
    t
}

// ----------------------------------------------------------------------
// Score-updating variants
// ----------------------------------------------------------------------

/// `edge` gets a new bipartition, and the edges behind `x` and `y` now lead
/// to each other's subtree, so they swap bipartitions.
fn lqic_update_set(tree: &Tree, edge: usize, variant: NniVariant) -> [usize; 3] {
    let (x, y) = swap_links(tree, edge, variant);
    [edge, tree.link_edge(x), tree.link_edge(y)]
}

/// `edge` and the four edges around it, whose subtree quadruples change.
fn qpic_update_set(tree: &Tree, edge: usize) -> Vec<usize> {
    let mut set = tree.incident_edges(tree.primary_node(edge));
    set.extend(tree.incident_edges(tree.secondary_node(edge)));
    set.sort_unstable();
    set.dedup();
    set
}

fn nni_with_lqic_update<O: ScoreOracle>(
    tree: &mut Tree,
    edge: usize,
    oracle: &mut O,
    variant: NniVariant,
) -> Result<()> {
    let changed = lqic_update_set(tree, edge, variant);
    nni_inplace(tree, edge, variant);
    debug!(edge, ?variant, "nni");
    for e in changed {
        oracle.recompute_lqic_for_edge(tree, e);
    }
    Ok(())
}

fn nni_with_qpic_update<O: ScoreOracle>(
    tree: &mut Tree,
    edge: usize,
    oracle: &mut O,
    variant: NniVariant,
) -> Result<()> {
    nni_inplace(tree, edge, variant);
    debug!(edge, ?variant, "nni");
    for e in qpic_update_set(tree, edge) {
        oracle.recompute_qpic_for_edge(tree, e);
    }
    Ok(())
}

/// EQPIC is refreshed on every edge after a move.
fn nni_with_eqpic_update<O: ScoreOracle>(
    tree: &mut Tree,
    edge: usize,
    oracle: &mut O,
    variant: NniVariant,
) -> Result<()> {
    nni_inplace(tree, edge, variant);
    debug!(edge, ?variant, "nni");
    for e in 0..tree.edge_count() {
        oracle.recompute_eqpic_for_edge(tree, e);
    }
    Ok(())
}

pub fn nni_a_with_lqic_update<O: ScoreOracle>(tree: &mut Tree, edge: usize, oracle: &mut O) -> Result<()> {
    nni_with_lqic_update(tree, edge, oracle, NniVariant::A)
}

pub fn nni_b_with_lqic_update<O: ScoreOracle>(tree: &mut Tree, edge: usize, oracle: &mut O) -> Result<()> {
    nni_with_lqic_update(tree, edge, oracle, NniVariant::B)
}

pub fn nni_a_with_qpic_update<O: ScoreOracle>(tree: &mut Tree, edge: usize, oracle: &mut O) -> Result<()> {
    nni_with_qpic_update(tree, edge, oracle, NniVariant::A)
}

pub fn nni_b_with_qpic_update<O: ScoreOracle>(tree: &mut Tree, edge: usize, oracle: &mut O) -> Result<()> {
    nni_with_qpic_update(tree, edge, oracle, NniVariant::B)
}

pub fn nni_a_with_eqpic_update<O: ScoreOracle>(tree: &mut Tree, edge: usize, oracle: &mut O) -> Result<()> {
    nni_with_eqpic_update(tree, edge, oracle, NniVariant::A)
}

pub fn nni_b_with_eqpic_update<O: ScoreOracle>(tree: &mut Tree, edge: usize, oracle: &mut O) -> Result<()> {
    nni_with_eqpic_update(tree, edge, oracle, NniVariant::B)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quartet::QuartetScoreComputer;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    const REFS: [&str; 3] = [
        "((A,B),((C,D),(E,F)),(G,H));",
        "((A,C),((B,D),(E,G)),(F,H));",
        "((A,B),((C,E),(D,F)),(G,H));",
    ];
    const START: &str = "((A,H),((C,B),(E,F)),(G,D));";

    fn root_edge(tree: &Tree) -> usize {
        tree.link_edge(tree.root_link())
    }

    #[test]
    fn scenario_a() {
        let t = Tree::from_newick("((A,B),C,D);").unwrap();
        let e = root_edge(&t);
        assert_eq!(nni_a(&t, e).to_newick(), "((A,C),B,D);");
        assert_eq!(nni_b(&t, e).to_newick(), "((C,B),A,D);");
    }

    #[test]
    fn swaps_a_whole_subtree() {
        let t = Tree::from_newick("(((A1,A2),B),C,D);").unwrap();
        let e = root_edge(&t);
        assert_eq!(nni_b(&t, e).to_newick(), "((C,B),(A1,A2),D);");
        assert_eq!(nni_a(&t, e).to_newick(), "(((A1,A2),C),B,D);");
    }

    #[test]
    fn non_root_edge_uses_the_sibling() {
        // edge 4 leads from (B,(C,D)) to (C,D); the sibling of (C,D) is B
        let t = Tree::from_newick("((A,(B,(C,D))),E,F);").unwrap();
        let e = 4;
        assert_eq!(t.leaves_beyond(t.primary_link(e)).len(), 2);
        let a = nni_a(&t, e).to_newick();
        let b = nni_b(&t, e).to_newick();
        assert_eq!(a, "((A,(D,(C,B))),E,F);");
        assert_eq!(b, "((A,(C,(B,D))),E,F);");
    }

    #[test]
    fn nni_enumerates_both_variants() {
        let t = Tree::from_newick(START).unwrap();
        let neighbours = nni(&t).unwrap();
        assert_eq!(neighbours.len(), 2 * t.internal_edge_count());
        let distinct: HashSet<String> = neighbours.iter().map(Tree::to_newick).collect();
        assert_eq!(distinct.len(), neighbours.len());
        assert!(!distinct.contains(&t.to_newick()));
    }

    #[test]
    fn only_negative_filters_edges() {
        let t = Tree::from_newick(START).unwrap();
        let mut scores = vec![1.0; t.edge_count()];
        assert!(nni_only_negative(&t, &scores).unwrap().is_empty());
        let e = t.internal_edges().next().unwrap();
        scores[e] = -0.5;
        assert_eq!(nni_only_negative(&t, &scores).unwrap().len(), 2);
    }

    fn assert_incremental_matches_full(
        update: fn(&mut Tree, usize, &mut QuartetScoreComputer) -> Result<()>,
        scores: fn(&QuartetScoreComputer) -> &[f64],
    ) {
        let tree = Tree::from_newick(START).unwrap();
        for e in tree.internal_edges().collect::<Vec<_>>() {
            let mut t = tree.clone();
            let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
            oracle.recompute_scores(&t, false).unwrap();
            update(&mut t, e, &mut oracle).unwrap();
            let incremental = scores(&oracle).to_vec();
            oracle.recompute_scores(&t, false).unwrap();
            assert_eq!(incremental, scores(&oracle), "edge {e}");
        }
    }

    #[test]
    fn lqic_update_matches_full_recompute() {
        assert_incremental_matches_full(nni_a_with_lqic_update, |o| o.lqic_scores());
        assert_incremental_matches_full(nni_b_with_lqic_update, |o| o.lqic_scores());
    }

    #[test]
    fn qpic_update_matches_full_recompute() {
        assert_incremental_matches_full(nni_a_with_qpic_update, |o| o.qpic_scores());
        assert_incremental_matches_full(nni_b_with_qpic_update, |o| o.qpic_scores());
    }

    #[test]
    fn eqpic_update_matches_full_recompute() {
        assert_incremental_matches_full(nni_a_with_eqpic_update, |o| o.eqpic_scores());
        assert_incremental_matches_full(nni_b_with_eqpic_update, |o| o.eqpic_scores());
    }

    #[test]
    fn random_moves_keep_the_tree_valid() {
        let start = Tree::from_newick(START).unwrap();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let t = make_random_nni_moves(&start, 5, &mut rng);
            assert!(t.validate_topology(), "seed {seed}: {:?}", t.check_topology());
            let mut names = t.leaf_names();
            names.sort();
            assert_eq!(names, ["A", "B", "C", "D", "E", "F", "G", "H"]);
        }
    }

    proptest! {
        #[test]
        fn every_nni_is_an_involution(seed in 0u64..500) {
            let mut rng = StdRng::seed_from_u64(seed);
            let start = Tree::from_newick(START).unwrap();
            let t = make_random_nni_moves(&start, 5, &mut rng);
            prop_assert!(t.validate_topology());
            for e in t.internal_edges().collect::<Vec<_>>() {
                let mut a = t.clone();
                nni_a_inplace(&mut a, e);
                prop_assert!(a.validate_topology());
                nni_a_inplace(&mut a, e);
                prop_assert_eq!(&a, &t);

                let mut b = t.clone();
                nni_b_inplace(&mut b, e);
                prop_assert!(b.validate_topology());
                nni_b_inplace(&mut b, e);
                prop_assert_eq!(&b, &t);
            }
        }
    }
}
