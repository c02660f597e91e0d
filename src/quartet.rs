//! Quartet concordance scores for the edges of a search tree.
//!
//! # Overview
//! The reference trees are reduced once to a lookup table holding, for every
//! set of four taxa, how often each of the three possible quartet
//! topologies occurs. Edge scores are then computed from the table:
//!
//! - **LQIC**: the minimum QIC over quartets with two taxa on each side of
//!   the edge
//! - **QPIC**: the QIC of the counts summed over quartets taking one taxon
//!   from each of the four subtrees around the edge
//! - **EQPIC**: like QPIC, summed over all quartets with two taxa on each side
//!
//! # QIC
//! For counts `(n1, n2, n3)` with `n1` the topology displayed by the search
//! tree and `p_i = n_i / (n1 + n2 + n3)`:
//!
//! ```text
//! QIC = 1 + Σ p_i ln p_i / ln 3      negated when n1 < max(n2, n3)
//! ```
//!
//! and 0 when no reference tree resolves the quartet.
//!
//! Counts are summed as integers before QIC is applied, so a score only
//! depends on the leaf sets around an edge. Incremental and full
//! recomputation therefore agree bit for bit.

use crate::bitset::Bitset;
use crate::error::{Result, SearchError};
use crate::snapshot::{ReferenceSnapshot, TaxonIndex};
use crate::tree::Tree;
use itertools::Itertools;
use phylotree::tree::Tree as PhyloTree;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// `n choose k`, exact for the small `k` used here.
fn choose(n: usize, k: usize) -> usize {
    if n < k {
        return 0;
    }
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

/// Position of a sorted quartet in the combinatorial number system.
fn rank(q: [usize; 4]) -> usize {
    choose(q[0], 1) + choose(q[1], 2) + choose(q[2], 3) + choose(q[3], 4)
}

/// Quartet topology counts over all reference trees.
///
/// Entry `rank(q)` holds the counts for `q0q1|q2q3`, `q0q2|q1q3` and
/// `q0q3|q1q2` of the sorted quartet `q`. Memory grows with `C(n, 4)`.
#[derive(Debug, Clone)]
pub struct QuartetLookupTable {
    num_taxa: usize,
    counts: Vec<[u32; 3]>,
}

impl QuartetLookupTable {
    pub fn from_snapshots(snapshots: &[ReferenceSnapshot], num_taxa: usize) -> Self {
        let size = choose(num_taxa, 4);
        let counts = snapshots
            .par_iter()
            .fold(
                || vec![[0u32; 3]; size],
                |mut acc, snap| {
                    for q in snap.leaves.iter().copied().combinations(4) {
                        let q = [q[0], q[1], q[2], q[3]];
                        if let Some(t) = snap.resolve(q) {
                            acc[rank(q)][t] += 1;
                        }
                    }
                    acc
                },
            )
            .reduce(
                || vec![[0u32; 3]; size],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(&b) {
                        for k in 0..3 {
                            x[k] += y[k];
                        }
                    }
                    a
                },
            );
        QuartetLookupTable { num_taxa, counts }
    }

    pub fn num_taxa(&self) -> usize {
        self.num_taxa
    }

    /// Counts for the quartet `ab|cd`: first the topology `ab|cd` itself,
    /// then the two alternatives.
    pub fn counts(&self, a: usize, b: usize, c: usize, d: usize) -> [u32; 3] {
        let mut s = [a, b, c, d];
        s.sort_unstable();
        let stored = self.counts[rank(s)];
        let partner = if s[0] == a {
            b
        } else if s[0] == b {
            a
        } else if s[0] == c {
            d
        } else {
            c
        };
        let t = if s[1] == partner {
            0
        } else if s[2] == partner {
            1
        } else {
            2
        };
        [stored[t], stored[(t + 1) % 3], stored[(t + 2) % 3]]
    }
}

/// Quartet internode certainty of one count triple.
pub fn qic(counts: [u64; 3]) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = n as f64 / total;
            p * p.ln()
        })
        .sum();
    let value = 1.0 + entropy / 3f64.ln();
    if counts[0] < counts[1].max(counts[2]) {
        -value
    } else {
        value
    }
}

fn widen(c: [u32; 3]) -> [u64; 3] {
    c.map(u64::from)
}

fn add(acc: &mut [u64; 3], c: [u32; 3]) {
    for k in 0..3 {
        acc[k] += u64::from(c[k]);
    }
}

/// Per-edge scoring service used by the move operators and search drivers.
///
/// Score vectors are indexed by edge. Implementations only read the tree.
pub trait ScoreOracle {
    /// Recompute all three score vectors for every edge.
    fn recompute_scores(&mut self, tree: &Tree, cached: bool) -> Result<()>;

    /// Per-edge refreshes always compute and never touch the memo.
    fn recompute_lqic_for_edge(&mut self, tree: &Tree, edge: usize);
    fn recompute_qpic_for_edge(&mut self, tree: &Tree, edge: usize);
    fn recompute_eqpic_for_edge(&mut self, tree: &Tree, edge: usize);

    fn lqic_scores(&self) -> &[f64];
    fn qpic_scores(&self) -> &[f64];
    fn eqpic_scores(&self) -> &[f64];

    fn set_lqic(&mut self, edge: usize, value: f64);
    fn set_qpic(&mut self, edge: usize, value: f64);
    fn set_eqpic(&mut self, edge: usize, value: f64);

    /// Enable or disable memoization of edge scores by leaf sets.
    fn set_cache_enabled(&mut self, enabled: bool);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScoreKind {
    Lqic,
    Qpic,
    Eqpic,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: ScoreKind,
    sets: Vec<Bitset>,
}

/// Quartet scores backed by a `QuartetLookupTable`.
#[derive(Debug, Clone)]
pub struct QuartetScoreComputer {
    taxa: TaxonIndex,
    table: QuartetLookupTable,
    lqic: Vec<f64>,
    qpic: Vec<f64>,
    eqpic: Vec<f64>,
    cache_enabled: bool,
    cache: HashMap<CacheKey, f64>,
}

impl QuartetScoreComputer {
    /// Build the lookup table from parsed reference trees.
    ///
    /// # Errors
    /// - `NoTrees` if `reference` is empty
    /// - `InvalidNewick` for unnamed leaves
    pub fn new(reference: &[PhyloTree]) -> Result<Self> {
        if reference.is_empty() {
            return Err(SearchError::NoTrees("reference set".into()));
        }
        let taxa = TaxonIndex::from_trees(reference)?;
        let snapshots = reference
            .iter()
            .map(|t| ReferenceSnapshot::from_tree(t, &taxa))
            .collect::<Result<Vec<_>>>()?;
        let table = QuartetLookupTable::from_snapshots(&snapshots, taxa.len());
        info!(
            trees = reference.len(),
            taxa = taxa.len(),
            "quartet lookup table ready"
        );
        Ok(QuartetScoreComputer {
            taxa,
            table,
            lqic: Vec::new(),
            qpic: Vec::new(),
            eqpic: Vec::new(),
            cache_enabled: true,
            cache: HashMap::new(),
        })
    }

    /// Parse reference trees from Newick strings and build the table.
    pub fn from_newick<S: AsRef<str>>(newicks: &[S]) -> Result<Self> {
        let trees = newicks
            .iter()
            .enumerate()
            .map(|(i, s)| {
                PhyloTree::from_newick(s.as_ref().trim())
                    .map_err(|e| SearchError::InvalidNewick(format!("reference tree {i}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(&trees)
    }

    pub fn taxa(&self) -> &[String] {
        self.taxa.names()
    }

    pub fn table(&self) -> &QuartetLookupTable {
        &self.table
    }

    /// Every leaf of `tree` must be a reference taxon.
    pub fn check_tree(&self, tree: &Tree) -> Result<()> {
        for leaf in tree.leaves() {
            let name = tree.node_name(leaf).unwrap_or_default();
            if self.taxa.get(name).is_none() {
                return Err(SearchError::UnknownTaxon(name.to_string()));
            }
        }
        Ok(())
    }

    /// Taxon indices of the leaves beyond `link`.
    fn taxa_beyond(&self, tree: &Tree, link: usize) -> Vec<usize> {
        let mut taxa: Vec<usize> = tree
            .leaves_beyond(link)
            .into_iter()
            .filter_map(|n| tree.node_name(n).and_then(|name| self.taxa.get(name)))
            .collect();
        taxa.sort_unstable();
        taxa
    }

    fn to_bitset(&self, taxa: &[usize]) -> Bitset {
        Bitset::from_indices(self.taxa.len(), taxa.iter().copied())
    }

    /// The leaf sets an edge score depends on: the two sides for LQIC and
    /// EQPIC, the four surrounding subtrees for QPIC. `None` for leaf edges.
    fn edge_groups(&self, tree: &Tree, edge: usize, kind: ScoreKind) -> Option<Vec<Vec<usize>>> {
        if !tree.is_internal_edge(edge) {
            return None;
        }
        let p = tree.primary_link(edge);
        let s = tree.secondary_link(edge);
        match kind {
            ScoreKind::Lqic | ScoreKind::Eqpic => {
                Some(vec![self.taxa_beyond(tree, p), self.taxa_beyond(tree, s)])
            }
            ScoreKind::Qpic => Some(vec![
                self.taxa_beyond(tree, tree.next(s)),
                self.taxa_beyond(tree, tree.next(tree.next(s))),
                self.taxa_beyond(tree, tree.next(p)),
                self.taxa_beyond(tree, tree.next(tree.next(p))),
            ]),
        }
    }

    fn score_groups(&self, groups: &[Vec<usize>], kind: ScoreKind) -> f64 {
        match kind {
            ScoreKind::Lqic => {
                let (below, above) = (&groups[0], &groups[1]);
                let mut min: Option<f64> = None;
                for (&a, &b) in below.iter().tuple_combinations() {
                    for (&c, &d) in above.iter().tuple_combinations() {
                        let q = qic(widen(self.table.counts(a, b, c, d)));
                        min = Some(min.map_or(q, |m| m.min(q)));
                    }
                }
                min.unwrap_or(0.0)
            }
            ScoreKind::Eqpic => {
                let (below, above) = (&groups[0], &groups[1]);
                let mut acc = [0u64; 3];
                for (&a, &b) in below.iter().tuple_combinations() {
                    for (&c, &d) in above.iter().tuple_combinations() {
                        add(&mut acc, self.table.counts(a, b, c, d));
                    }
                }
                qic(acc)
            }
            ScoreKind::Qpic => {
                let mut acc = [0u64; 3];
                for &a in &groups[0] {
                    for &b in &groups[1] {
                        for &c in &groups[2] {
                            for &d in &groups[3] {
                                add(&mut acc, self.table.counts(a, b, c, d));
                            }
                        }
                    }
                }
                qic(acc)
            }
        }
    }

    fn cache_key(&self, groups: &[Vec<usize>], kind: ScoreKind) -> CacheKey {
        let mut sets: Vec<Bitset> = groups.iter().map(|g| self.to_bitset(g)).collect();
        if kind == ScoreKind::Qpic {
            // {A,B} and {C,D} are unordered pairs of unordered pairs
            if sets[0] > sets[1] {
                sets.swap(0, 1);
            }
            if sets[2] > sets[3] {
                sets.swap(2, 3);
            }
            if sets[0..2] > sets[2..4] {
                sets.rotate_left(2);
            }
        } else {
            sets.sort();
        }
        CacheKey { kind, sets }
    }

    /// Score of one edge without touching the cache.
    pub fn score_edge(&self, tree: &Tree, edge: usize, kind: ScoreKind) -> f64 {
        self.edge_groups(tree, edge, kind)
            .map_or(0.0, |g| self.score_groups(&g, kind))
    }

    /// Score plus the cache entry to store, if the value was computed.
    fn evaluate(
        &self,
        tree: &Tree,
        edge: usize,
        kind: ScoreKind,
        use_cache: bool,
    ) -> (f64, Option<CacheKey>) {
        let Some(groups) = self.edge_groups(tree, edge, kind) else {
            return (0.0, None);
        };
        if !use_cache {
            return (self.score_groups(&groups, kind), None);
        }
        let key = self.cache_key(&groups, kind);
        match self.cache.get(&key) {
            Some(&v) => (v, None),
            None => (self.score_groups(&groups, kind), Some(key)),
        }
    }

    fn recompute_edge(&mut self, tree: &Tree, edge: usize, kind: ScoreKind) {
        let (value, _) = self.evaluate(tree, edge, kind, false);
        let m = tree.edge_count();
        let scores = match kind {
            ScoreKind::Lqic => &mut self.lqic,
            ScoreKind::Qpic => &mut self.qpic,
            ScoreKind::Eqpic => &mut self.eqpic,
        };
        if scores.len() < m {
            scores.resize(m, 0.0);
        }
        scores[edge] = value;
    }
}

const KINDS: [ScoreKind; 3] = [ScoreKind::Lqic, ScoreKind::Qpic, ScoreKind::Eqpic];

impl ScoreOracle for QuartetScoreComputer {
    fn recompute_scores(&mut self, tree: &Tree, cached: bool) -> Result<()> {
        self.check_tree(tree)?;
        let use_cache = cached && self.cache_enabled;
        let this = &*self;
        let results: Vec<[(f64, Option<CacheKey>); 3]> = (0..tree.edge_count())
            .into_par_iter()
            .map(|e| KINDS.map(|kind| this.evaluate(tree, e, kind, use_cache)))
            .collect();

        let m = results.len();
        self.lqic = Vec::with_capacity(m);
        self.qpic = Vec::with_capacity(m);
        self.eqpic = Vec::with_capacity(m);
        let mut fresh = 0usize;
        for [(l, kl), (q, kq), (x, kx)] in results {
            self.lqic.push(l);
            self.qpic.push(q);
            self.eqpic.push(x);
            for (key, value) in [(kl, l), (kq, q), (kx, x)] {
                if let Some(key) = key {
                    self.cache.insert(key, value);
                    fresh += 1;
                }
            }
        }
        debug!(edges = m, fresh, cached = self.cache.len(), "recomputed all edge scores");
        Ok(())
    }

    fn recompute_lqic_for_edge(&mut self, tree: &Tree, edge: usize) {
        self.recompute_edge(tree, edge, ScoreKind::Lqic);
    }

    fn recompute_qpic_for_edge(&mut self, tree: &Tree, edge: usize) {
        self.recompute_edge(tree, edge, ScoreKind::Qpic);
    }

    fn recompute_eqpic_for_edge(&mut self, tree: &Tree, edge: usize) {
        self.recompute_edge(tree, edge, ScoreKind::Eqpic);
    }

    fn lqic_scores(&self) -> &[f64] {
        &self.lqic
    }

    fn qpic_scores(&self) -> &[f64] {
        &self.qpic
    }

    fn eqpic_scores(&self) -> &[f64] {
        &self.eqpic
    }

    fn set_lqic(&mut self, edge: usize, value: f64) {
        self.lqic[edge] = value;
    }

    fn set_qpic(&mut self, edge: usize, value: f64) {
        self.qpic[edge] = value;
    }

    fn set_eqpic(&mut self, edge: usize, value: f64) {
        self.eqpic[edge] = value;
    }

    fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
        if !enabled {
            self.cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn computer(refs: &[&str]) -> QuartetScoreComputer {
        QuartetScoreComputer::from_newick(refs).unwrap()
    }

    #[test]
    fn rank_is_a_bijection() {
        let n = 7;
        let mut seen: Vec<usize> = (0..n)
            .combinations(4)
            .map(|q| rank([q[0], q[1], q[2], q[3]]))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..choose(n, 4)).collect::<Vec<_>>());
    }

    #[test]
    fn qic_extremes() {
        assert_eq!(qic([0, 0, 0]), 0.0);
        assert!((qic([5, 0, 0]) - 1.0).abs() < 1e-12);
        assert!((qic([0, 5, 0]) + 1.0).abs() < 1e-12);
        assert!(qic([2, 2, 2]).abs() < 1e-12);
        assert!(qic([3, 1, 0]) > 0.0);
        assert!(qic([1, 3, 0]) < 0.0);
    }

    #[test]
    fn counts_follow_the_query_pairing() {
        let oracle = computer(&["((A,B),C,D);", "((A,B),C,D);", "((A,C),B,D);"]);
        let t = oracle.table();
        assert_eq!(t.counts(0, 1, 2, 3), [2, 1, 0]);
        assert_eq!(t.counts(3, 2, 1, 0), [2, 1, 0]);
        assert_eq!(t.counts(0, 2, 1, 3)[0], 1);
        assert_eq!(t.counts(0, 3, 1, 2)[0], 0);
    }

    #[test]
    fn scores_of_a_concordant_tree() {
        let oracle_refs = ["((A,B),(C,D),E);", "((A,B),(C,D),E);"];
        let mut oracle = computer(&oracle_refs);
        let tree = Tree::from_newick("((A,B),(C,D),E);").unwrap();
        oracle.recompute_scores(&tree, false).unwrap();
        for e in 0..tree.edge_count() {
            let expected = if tree.is_internal_edge(e) { 1.0 } else { 0.0 };
            assert!((oracle.lqic_scores()[e] - expected).abs() < 1e-12);
            assert!((oracle.qpic_scores()[e] - expected).abs() < 1e-12);
            assert!((oracle.eqpic_scores()[e] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn discordant_edge_is_negative() {
        let mut oracle = computer(&["((A,B),C,D);"]);
        let tree = Tree::from_newick("((A,C),B,D);").unwrap();
        oracle.recompute_scores(&tree, false).unwrap();
        let e = tree.internal_edges().next().unwrap();
        assert!(oracle.lqic_scores()[e] < 0.0);
        assert!(oracle.qpic_scores()[e] < 0.0);
    }

    #[test]
    fn cached_and_uncached_scores_agree() {
        let refs = ["((A,B),(C,D),(E,F));", "((A,C),(B,D),(E,F));", "((A,B),(C,E),(D,F));"];
        let tree = Tree::from_newick("((A,B),(C,(D,E)),F);").unwrap();
        let mut cached = computer(&refs);
        cached.recompute_scores(&tree, true).unwrap();
        cached.recompute_scores(&tree, true).unwrap();
        let mut plain = computer(&refs);
        plain.set_cache_enabled(false);
        plain.recompute_scores(&tree, true).unwrap();
        assert_eq!(cached.lqic_scores(), plain.lqic_scores());
        assert_eq!(cached.qpic_scores(), plain.qpic_scores());
        assert_eq!(cached.eqpic_scores(), plain.eqpic_scores());
    }

    #[test]
    fn edge_refreshes_leave_the_memo_alone() {
        let refs = ["((A,B),(C,D),(E,F));", "((A,C),(B,D),(E,F));"];
        let tree = Tree::from_newick("((A,B),(C,(D,E)),F);").unwrap();
        let mut oracle = computer(&refs);
        oracle.recompute_scores(&tree, true).unwrap();
        let memo = oracle.cache.len();
        let full = oracle.lqic_scores().to_vec();
        for e in 0..tree.edge_count() {
            oracle.recompute_lqic_for_edge(&tree, e);
            oracle.recompute_qpic_for_edge(&tree, e);
            oracle.recompute_eqpic_for_edge(&tree, e);
        }
        assert_eq!(oracle.cache.len(), memo);
        assert_eq!(oracle.lqic_scores(), &full[..]);
    }

    #[test]
    fn unknown_leaf_is_rejected() {
        let mut oracle = computer(&["((A,B),C,D);"]);
        let tree = Tree::from_newick("((A,B),C,X);").unwrap();
        let err = oracle.recompute_scores(&tree, false).unwrap_err();
        assert!(matches!(err, SearchError::UnknownTaxon(name) if name == "X"));
    }

    #[test]
    fn empty_reference_set_is_rejected() {
        let refs: [&str; 0] = [];
        assert!(matches!(
            QuartetScoreComputer::from_newick(&refs),
            Err(SearchError::NoTrees(_))
        ));
    }
}
