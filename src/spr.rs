//! Subtree prune and regraft.
//!
//! `spr(tree, p, r)` cuts the subtree below edge `p` off at its attachment
//! node `P` and reinserts it on edge `r`. `P` travels with the subtree: the
//! two edges that met at `P` merge into one, and `r` is split in two.
//!
//! # Non-root case
//! With `G` the parent of `P`, `Sib` the sibling of the pruned subtree and
//! `Rp -> Rc` the regraft edge, edge labels move as follows:
//!
//! ```text
//!        G                        G           Rp
//!        | a                      | r         | a
//!        P          Rp   ==>      Sib         P
//!      p/ \b        | r                     p/ \b
//!      S   Sib      Rc                      S   Rc
//! ```
//!
//! # Root case
//! When `P` is the root, `r` lies below one of the root's other children
//! `X` (the other is `Y`). The edges to `X` and `Y` are joined into `r`,
//! the root is reattached to both halves of the old `r`, and edge
//! orientation is re-derived by a bounded traversal from the root.
//!
//! In both cases a second call with the same arguments restores the arena
//! bit for bit.

use crate::error::{Result, SearchError};
use crate::quartet::ScoreOracle;
use crate::tree::Tree;
use tracing::debug;

/// Whether `spr(tree, prune, regraft)` is a legal, non-trivial move.
///
/// Rejects out-of-range indices, `prune == regraft`, the two edges meeting
/// `prune` at its primary node, and any edge inside the pruned subtree.
pub fn valid_spr_move(tree: &Tree, prune: usize, regraft: usize) -> bool {
    let m = tree.edge_count();
    if prune >= m || regraft >= m || prune == regraft {
        return false;
    }
    let pl = tree.primary_link(prune);
    let n1 = tree.next(pl);
    let n2 = tree.next(n1);
    if regraft == tree.link_edge(n1) || regraft == tree.link_edge(n2) {
        return false;
    }
    !tree.subtree_edges(prune).contains(&regraft)
}

/// Move the subtree below `prune` onto `regraft`.
///
/// Returns `Ok(false)` without touching the tree when the move is invalid.
///
/// # Errors
/// - `CorruptTopology` when the subtree below `prune` cannot be walked
///   within `#links` steps
/// - `SprNonTermination` when the root-case re-orientation does not finish
///   within `#links` steps
pub fn spr(tree: &mut Tree, prune: usize, regraft: usize) -> Result<bool> {
    if prune < tree.edge_count() {
        tree.try_subtree_edges(prune)?;
    }
    if !valid_spr_move(tree, prune, regraft) {
        return Ok(false);
    }
    if tree.primary_node(prune) == tree.root_node() {
        spr_root(tree, prune, regraft)?;
    } else {
        spr_inner(tree, prune, regraft);
    }
    debug!(prune, regraft, "spr");
    Ok(true)
}

fn spr_inner(tree: &mut Tree, prune: usize, regraft: usize) {
    let pl = tree.primary_link(prune);
    let up = tree.node_link(tree.link_node(pl));
    let n1 = tree.next(pl);
    let sib_slot = if n1 == up { tree.next(n1) } else { n1 };

    let parent_edge = tree.link_edge(up);
    let sib_edge = tree.link_edge(sib_slot);
    let sib_up = tree.outer(sib_slot);
    let rs = tree.secondary_link(regraft);

    // G - Sib
    tree.reconnect_secondary(parent_edge, sib_up);
    // Rp - P
    tree.reconnect_secondary(regraft, up);
    // P - Rc
    tree.reconnect_secondary(sib_edge, rs);
    tree.swap_edges(parent_edge, regraft);
}

fn spr_root(tree: &mut Tree, prune: usize, regraft: usize) -> Result<()> {
    let pl = tree.primary_link(prune);
    let l1 = tree.next(pl);
    let l2 = tree.next(l1);
    let (lx, ly) = if tree.try_subtree_edges(tree.link_edge(l1))?.contains(&regraft) {
        (l1, l2)
    } else if tree.try_subtree_edges(tree.link_edge(l2))?.contains(&regraft) {
        (l2, l1)
    } else {
        return Err(SearchError::InvalidMove { prune, regraft });
    };

    let ex = tree.link_edge(lx);
    let ey = tree.link_edge(ly);
    let x_up = tree.outer(lx);
    let y_up = tree.outer(ly);
    let rl = tree.primary_link(regraft);
    let rs = tree.secondary_link(regraft);

    // X - Y through the old regraft label
    tree.reconnect_primary(regraft, x_up);
    tree.reconnect_secondary(regraft, y_up);
    // root - Rp and root - Rc
    tree.reconnect_secondary(ex, rl);
    tree.reconnect_secondary(ey, rs);

    tree.reorient_from_root().map_err(|steps| {
        debug!(prune, regraft, steps, "re-orientation ran away");
        SearchError::SprNonTermination { prune, regraft }
    })
}

/// Edges whose bipartition `spr(prune, regraft)` changes, computed on the
/// tree before the move: the path from the prune attachment node to the
/// regraft edge, the regraft edge included.
pub fn spr_path(tree: &Tree, prune: usize, regraft: usize) -> Vec<usize> {
    let mut path = tree.path_edges(tree.primary_node(prune), tree.secondary_node(regraft));
    if !path.contains(&regraft) {
        path.push(regraft);
    }
    path
}

/// Restriction test: does the move touch a negatively scored edge?
pub fn has_negative_on_spr_path(tree: &Tree, prune: usize, regraft: usize, scores: &[f64]) -> bool {
    spr_path(tree, prune, regraft)
        .into_iter()
        .any(|e| scores.get(e).is_some_and(|&s| s < 0.0))
}

/// Edges whose bipartition changed, computed on the tree after the move:
/// the edges at the prune attachment node, the regraft edge and the path
/// between the prune attachment node and the regraft edge's primary node.
pub fn spr_changed_edges(tree: &Tree, prune: usize, regraft: usize) -> Vec<usize> {
    let p_node = tree.primary_node(prune);
    let mut set = tree.incident_edges(p_node);
    set.push(regraft);
    set.extend(tree.path_edges(p_node, tree.primary_node(regraft)));
    set.sort_unstable();
    set.dedup();
    set
}

/// LQIC refresh after `spr(prune, regraft)` has been applied.
pub fn spr_lqic_update<O: ScoreOracle>(tree: &Tree, prune: usize, regraft: usize, oracle: &mut O) {
    for e in spr_changed_edges(tree, prune, regraft) {
        oracle.recompute_lqic_for_edge(tree, e);
    }
}

/// QPIC refresh: changed edges plus every edge sharing a node with one.
pub fn spr_qpic_update<O: ScoreOracle>(tree: &Tree, prune: usize, regraft: usize, oracle: &mut O) {
    let mut set = Vec::new();
    for e in spr_changed_edges(tree, prune, regraft) {
        set.extend(tree.incident_edges(tree.primary_node(e)));
        set.extend(tree.incident_edges(tree.secondary_node(e)));
    }
    set.sort_unstable();
    set.dedup();
    for e in set {
        oracle.recompute_qpic_for_edge(tree, e);
    }
}

/// EQPIC refresh on every edge.
pub fn spr_eqpic_update<O: ScoreOracle>(tree: &Tree, _prune: usize, _regraft: usize, oracle: &mut O) {
    for e in 0..tree.edge_count() {
        oracle.recompute_eqpic_for_edge(tree, e);
    }
}

fn checked_spr(tree: &mut Tree, prune: usize, regraft: usize) -> Result<()> {
    if spr(tree, prune, regraft)? {
        Ok(())
    } else {
        Err(SearchError::InvalidMove { prune, regraft })
    }
}

pub fn spr_with_lqic_update<O: ScoreOracle>(tree: &mut Tree, prune: usize, regraft: usize, oracle: &mut O) -> Result<()> {
    checked_spr(tree, prune, regraft)?;
    spr_lqic_update(tree, prune, regraft, oracle);
    Ok(())
}

pub fn spr_with_qpic_update<O: ScoreOracle>(tree: &mut Tree, prune: usize, regraft: usize, oracle: &mut O) -> Result<()> {
    checked_spr(tree, prune, regraft)?;
    spr_qpic_update(tree, prune, regraft, oracle);
    Ok(())
}

pub fn spr_with_eqpic_update<O: ScoreOracle>(tree: &mut Tree, prune: usize, regraft: usize, oracle: &mut O) -> Result<()> {
    checked_spr(tree, prune, regraft)?;
    spr_eqpic_update(tree, prune, regraft, oracle);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nni::make_random_nni_moves;
    use crate::quartet::QuartetScoreComputer;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const NINE: &str = "((A,B),((C,(D,E)),((F,(G,H)),I)),(J,K));";
    const REFS: [&str; 3] = [
        "((A,B),((C,(D,E)),((F,(G,H)),I)),(J,K));",
        "((A,C),((B,(D,E)),((F,(G,I)),H)),(J,K));",
        "((A,B),((C,(D,F)),((E,(G,H)),I)),(K,J));",
    ];

    fn nine() -> Tree {
        Tree::from_newick(NINE).unwrap()
    }

    #[test]
    fn scenario_b_validity() {
        let t = nine();
        assert!(valid_spr_move(&t, 16, 2));
        assert!(valid_spr_move(&t, 16, 11));
        assert!(valid_spr_move(&t, 16, 6));
        assert!(valid_spr_move(&t, 12, 6));
        assert!(valid_spr_move(&t, 12, 3));
        assert!(!valid_spr_move(&t, 12, 11));
        assert!(!valid_spr_move(&t, 12, 15));
        assert!(!valid_spr_move(&t, 12, 14));
        assert!(!valid_spr_move(&t, 12, 12));
        assert!(!valid_spr_move(&t, 12, 99));
        // the root siblings of a root-attached prune edge
        assert!(!valid_spr_move(&t, 16, 3));
        assert!(!valid_spr_move(&t, 16, 0));
    }

    #[test]
    fn corrupt_rings_fail_fast() {
        let mut t = Tree::from_newick("((A,B),(C,D),E);").unwrap();
        let e = t.internal_edges().next().unwrap();
        let regraft = t
            .leaves()
            .find(|&n| t.node_name(n) == Some("B"))
            .and_then(|n| t.parent_edge(n))
            .unwrap();
        assert!(valid_spr_move(&t, e, regraft));
        let up = t.secondary_link(e);
        let child = t.next(up);
        t.links[child].outer = up;
        assert!(matches!(spr(&mut t, e, regraft), Err(SearchError::CorruptTopology(_))));
    }

    #[test]
    fn scenario_b_moves_are_self_inverse() {
        let original = nine();
        for (p, r) in [(16, 2), (16, 11), (16, 6), (12, 6), (12, 3)] {
            let mut t = original.clone();
            assert!(spr(&mut t, p, r).unwrap());
            assert!(t.validate_topology(), "SPR({p}, {r}) -> {}", t.to_newick());
            assert_ne!(t, original);
            assert!(spr(&mut t, p, r).unwrap());
            assert_eq!(t, original, "SPR({p}, {r}) twice");
        }
    }

    #[test]
    fn non_root_move_regrafts_the_subtree() {
        let mut t = nine();
        // (D,E) onto the edge leading to (F,(G,H))
        spr(&mut t, 12, 6).unwrap();
        assert_eq!(t.to_newick(), "((A,B),(C,(((F,(G,H)),(D,E)),I)),(J,K));");
    }

    #[test]
    fn root_move_regrafts_the_subtree() {
        let mut t = Tree::from_newick("((A,B),(C,D),(E,F));").unwrap();
        let ab = t.link_edge(t.root_link());
        // edge 0 leads to (E,F), edge 1 to F
        assert!(spr(&mut t, ab, 1).unwrap());
        assert!(t.validate_topology());
        let mut leaves_with_ab: Vec<String> = t
            .leaves_beyond(t.primary_link(ab))
            .into_iter()
            .map(|n| t.node_name(n).unwrap().to_string())
            .collect();
        leaves_with_ab.sort();
        assert_eq!(leaves_with_ab, ["A", "B"]);
        // F is now a neighbour of the pruned cherry
        let f = t.leaves().find(|&n| t.node_name(n) == Some("F")).unwrap();
        let a = t.leaves().find(|&n| t.node_name(n) == Some("A")).unwrap();
        assert_eq!(t.path_edges(a, f).len(), 3);
    }

    #[test]
    fn invalid_move_leaves_tree_alone() {
        let original = nine();
        let mut t = original.clone();
        assert!(!spr(&mut t, 12, 14).unwrap());
        assert_eq!(t, original);
        let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
        oracle.recompute_scores(&t, false).unwrap();
        assert!(matches!(
            spr_with_lqic_update(&mut t, 12, 14, &mut oracle),
            Err(SearchError::InvalidMove { prune: 12, regraft: 14 })
        ));
    }

    #[test]
    fn restriction_path_sees_negative_edges() {
        let t = nine();
        let mut scores = vec![1.0; t.edge_count()];
        assert!(!has_negative_on_spr_path(&t, 12, 6, &scores));
        scores[6] = -0.25;
        assert!(has_negative_on_spr_path(&t, 12, 6, &scores));
        // the path from (C,(D,E)) to edge 6 does not use edge 16
        scores[6] = 1.0;
        scores[16] = -0.25;
        assert!(!has_negative_on_spr_path(&t, 12, 6, &scores));
    }

    type Update = fn(&mut Tree, usize, usize, &mut QuartetScoreComputer) -> Result<()>;
    type Scores = fn(&QuartetScoreComputer) -> &[f64];

    fn assert_incremental_matches_full(update: Update, scores: Scores) {
        let tree = nine();
        let m = tree.edge_count();
        for p in 0..m {
            for r in 0..m {
                if !valid_spr_move(&tree, p, r) {
                    continue;
                }
                let mut t = tree.clone();
                let mut oracle = QuartetScoreComputer::from_newick(&REFS).unwrap();
                oracle.recompute_scores(&t, false).unwrap();
                let before = scores(&oracle).to_vec();

                update(&mut t, p, r, &mut oracle).unwrap();
                let incremental = scores(&oracle).to_vec();
                let mut full = oracle.clone();
                full.recompute_scores(&t, false).unwrap();
                assert_eq!(incremental, scores(&full), "SPR({p}, {r})");

                update(&mut t, p, r, &mut oracle).unwrap();
                assert_eq!(t, tree);
                assert_eq!(scores(&oracle), &before[..], "SPR({p}, {r}) undo");
            }
        }
    }

    #[test]
    fn lqic_update_matches_full_recompute() {
        assert_incremental_matches_full(spr_with_lqic_update, |o| o.lqic_scores());
    }

    #[test]
    fn qpic_update_matches_full_recompute() {
        assert_incremental_matches_full(spr_with_qpic_update, |o| o.qpic_scores());
    }

    #[test]
    fn eqpic_update_matches_full_recompute() {
        assert_incremental_matches_full(spr_with_eqpic_update, |o| o.eqpic_scores());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]
        #[test]
        fn every_valid_spr_is_self_inverse(seed in 0u64..1000) {
            let mut rng = StdRng::seed_from_u64(seed);
            let t = make_random_nni_moves(&nine(), 8, &mut rng);
            let m = t.edge_count();
            for p in 0..m {
                for r in 0..m {
                    let mut u = t.clone();
                    let moved = spr(&mut u, p, r).unwrap();
                    prop_assert_eq!(moved, valid_spr_move(&t, p, r));
                    prop_assert!(u.validate_topology());
                    if moved {
                        spr(&mut u, p, r).unwrap();
                    }
                    prop_assert_eq!(&u, &t);
                }
            }
        }
    }
}
