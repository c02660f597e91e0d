//! Extract split snapshots from reference trees.
//!
//! # Overview
//! A `ReferenceSnapshot` captures every non-trivial clade of a reference tree
//! as a bitset over the global `TaxonIndex`. Snapshots are immutable and are
//! scanned in parallel when the quartet lookup table is filled.
//!
//! # Why taxon NAMES and not node IDs
//! Node IDs are assigned during parsing and differ across files; taxon names
//! do not. Taxa are sorted alphabetically once, over all reference trees, so
//! the same name always maps to the same bit.
//!
//! Clades are kept as-is rather than canonicalized: a reference tree may miss
//! some taxa, and the complement would then invent members.

use crate::bitset::Bitset;
use crate::error::{Result, SearchError};
use phylotree::tree::Tree as PhyloTree;
use std::collections::{BTreeSet, HashMap};

/// Alphabetical taxon numbering shared by all reference trees.
#[derive(Debug, Clone, Default)]
pub struct TaxonIndex {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl TaxonIndex {
    /// Collect the leaf names of all trees.
    ///
    /// # Errors
    /// `InvalidNewick` if a leaf has no name.
    pub fn from_trees(trees: &[PhyloTree]) -> Result<Self> {
        let mut names = BTreeSet::new();
        for (i, tree) in trees.iter().enumerate() {
            for leaf_id in tree.get_leaves() {
                let node = tree
                    .get(&leaf_id)
                    .map_err(|e| SearchError::InvalidNewick(format!("tree {i}: {e}")))?;
                match &node.name {
                    Some(name) if !name.is_empty() => {
                        names.insert(name.clone());
                    }
                    _ => {
                        return Err(SearchError::InvalidNewick(format!(
                            "tree {i} has an unnamed leaf"
                        )));
                    }
                }
            }
        }
        Ok(Self::from_names(names))
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        let index = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        TaxonIndex { names, index }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// The clades of one reference tree over global taxon indices.
#[derive(Debug, Clone)]
pub struct ReferenceSnapshot {
    /// Taxa present in this tree, ascending.
    pub leaves: Vec<usize>,
    /// Clades with at least two members and at least two non-members.
    pub splits: Vec<Bitset>,
}

impl ReferenceSnapshot {
    /// # Algorithm
    /// 1. Map each leaf to its global taxon index
    /// 2. DFS from the root, OR-ing child bitsets bottom-up
    /// 3. Keep every non-root clade that splits off at least two taxa on
    ///    both sides
    pub fn from_tree(tree: &PhyloTree, taxa: &TaxonIndex) -> Result<Self> {
        let invalid = |e: phylotree::tree::TreeError| SearchError::InvalidNewick(e.to_string());
        let words = taxa.len().div_ceil(64);

        let mut leaf_index: HashMap<usize, usize> = HashMap::new();
        for leaf_id in tree.get_leaves() {
            let node = tree.get(&leaf_id).map_err(invalid)?;
            let name = node.name.clone().unwrap_or_default();
            let idx = taxa
                .get(&name)
                .ok_or_else(|| SearchError::UnknownTaxon(name.clone()))?;
            leaf_index.insert(leaf_id, idx);
        }
        let mut leaves: Vec<usize> = leaf_index.values().copied().collect();
        leaves.sort_unstable();
        leaves.dedup();

        let root_id = tree.get_root().map_err(invalid)?;
        let mut cache: HashMap<usize, Bitset> = HashMap::new();
        Self::compute_bitsets(root_id, tree, &leaf_index, words, &mut cache)?;

        let n = leaves.len();
        let mut splits: Vec<Bitset> = cache
            .into_iter()
            .filter(|(id, _)| *id != root_id)
            .map(|(_, bs)| bs)
            .filter(|bs| {
                let k = bs.count_ones();
                k >= 2 && k + 2 <= n
            })
            .collect();
        splits.sort_unstable();
        splits.dedup();

        Ok(ReferenceSnapshot { leaves, splits })
    }

    /// Recursively compute the clade bitset of every node.
    fn compute_bitsets(
        node_id: usize,
        tree: &PhyloTree,
        leaf_index: &HashMap<usize, usize>,
        words: usize,
        cache: &mut HashMap<usize, Bitset>,
    ) -> Result<Bitset> {
        if let Some(bitset) = cache.get(&node_id) {
            return Ok(bitset.clone());
        }
        let node = tree
            .get(&node_id)
            .map_err(|e| SearchError::InvalidNewick(e.to_string()))?;

        let mut bitset = Bitset::zeros(words);
        if node.children.is_empty() {
            if let Some(&idx) = leaf_index.get(&node_id) {
                bitset.set(idx);
            }
        } else {
            for &child_id in &node.children {
                let child = Self::compute_bitsets(child_id, tree, leaf_index, words, cache)?;
                bitset.or_assign(&child);
            }
        }
        cache.insert(node_id, bitset.clone());
        Ok(bitset)
    }

    /// Topology this tree induces on a sorted quartet `q0 < q1 < q2 < q3`:
    /// 0 for q0q1|q2q3, 1 for q0q2|q1q3, 2 for q0q3|q1q2.
    ///
    /// `None` when a taxon is missing or the quartet is unresolved.
    pub fn resolve(&self, q: [usize; 4]) -> Option<usize> {
        if !q.iter().all(|t| self.leaves.binary_search(t).is_ok()) {
            return None;
        }
        for split in &self.splits {
            let inside = q.map(|t| split.contains(t));
            if inside.iter().filter(|&&b| b).count() == 2 {
                let partner = (1..4).find(|&k| inside[k] == inside[0])?;
                return Some(partner - 1);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phylo(newick: &str) -> PhyloTree {
        PhyloTree::from_newick(newick).unwrap()
    }

    #[test]
    fn test_taxa_sorted_across_trees() {
        let trees = vec![phylo("((Human,Chimp),Gorilla,Orang);"), phylo("((Gorilla,Bonobo),Human,Chimp);")];
        let taxa = TaxonIndex::from_trees(&trees).unwrap();
        assert_eq!(taxa.names(), ["Bonobo", "Chimp", "Gorilla", "Human", "Orang"]);
        assert_eq!(taxa.get("Human"), Some(3));
        assert_eq!(taxa.get("Macaque"), None);
    }

    /// ```text
    ///           root
    ///          /    \
    ///      node1     node2
    ///      /   \     /   \
    ///     A     B   C    node3
    ///                    /   \
    ///                   D     E
    /// ```
    /// Non-trivial clades: {A,B}, {C,D,E}. {D,E} leaves only A,B,C outside
    /// and is kept; the root is skipped.
    #[test]
    fn test_splits_of_rooted_tree() {
        let tree = phylo("((A,B),(C,(D,E)));");
        let taxa = TaxonIndex::from_trees(std::slice::from_ref(&tree)).unwrap();
        let snap = ReferenceSnapshot::from_tree(&tree, &taxa).unwrap();
        assert_eq!(snap.leaves, vec![0, 1, 2, 3, 4]);
        let raw: Vec<u64> = snap.splits.iter().map(|b| b.0[0]).collect();
        assert!(raw.contains(&0b00011));
        assert!(raw.contains(&0b11100));
        assert!(raw.contains(&0b11000));
        assert_eq!(raw.len(), 3);
    }

    #[test]
    fn test_resolve_quartets() {
        let tree = phylo("((A,C),B,D);");
        let taxa = TaxonIndex::from_names(["A", "B", "C", "D"]);
        let snap = ReferenceSnapshot::from_tree(&tree, &taxa).unwrap();
        // AC|BD is topology 1 for the sorted quartet A<B<C<D
        assert_eq!(snap.resolve([0, 1, 2, 3]), Some(1));
    }

    #[test]
    fn test_missing_taxon_is_unresolved() {
        let tree = phylo("((A,B),C,D);");
        let taxa = TaxonIndex::from_names(["A", "B", "C", "D", "E"]);
        let snap = ReferenceSnapshot::from_tree(&tree, &taxa).unwrap();
        assert_eq!(snap.resolve([0, 1, 2, 3]), Some(0));
        assert_eq!(snap.resolve([0, 1, 2, 4]), None);
    }

    #[test]
    fn test_unknown_leaf_is_reported() {
        let tree = phylo("((A,B),C,X);");
        let taxa = TaxonIndex::from_names(["A", "B", "C", "D"]);
        let err = ReferenceSnapshot::from_tree(&tree, &taxa).unwrap_err();
        assert!(matches!(err, SearchError::UnknownTaxon(name) if name == "X"));
    }
}
