//! Newick reading and writing for the search tree.
//!
//! Parsing is delegated to phylotree; the parsed tree is then laid out in the
//! arena. Nodes are numbered in preorder from the root, visiting children in
//! reverse Newick order, and the edge leading to node `i` gets index `i - 1`.
//! Rotations follow Newick order, so reading and writing a tree reproduces
//! the input topology and child order. Branch lengths and inner node labels
//! are dropped.

use crate::error::{Result, SearchError};
use crate::tree::{Edge, Link, Node, Tree};
use phylotree::tree::Tree as PhyloTree;

impl Tree {
    /// Parse a Newick string into a tree with a trifurcating root.
    ///
    /// # Errors
    /// - `InvalidNewick` when phylotree rejects the text or a leaf is unnamed
    /// - `UnsupportedTopology` unless the root has three children and every
    ///   other inner node two
    pub fn from_newick(newick: &str) -> Result<Tree> {
        let phylo = PhyloTree::from_newick(newick.trim())
            .map_err(|e| SearchError::InvalidNewick(e.to_string()))?;
        Tree::from_phylo(&phylo)
    }

    /// Lay out a parsed phylotree tree in the arena.
    pub fn from_phylo(phylo: &PhyloTree) -> Result<Tree> {
        let invalid = |e: phylotree::tree::TreeError| SearchError::InvalidNewick(e.to_string());
        let root_id = phylo.get_root().map_err(invalid)?;

        let mut links: Vec<Link> = Vec::new();
        let mut edges: Vec<Edge> = Vec::new();
        let mut nodes: Vec<Node> = Vec::new();

        // (phylotree id, link at the parent that leads here)
        let mut stack: Vec<(usize, Option<usize>)> = vec![(root_id, None)];
        while let Some((pid, parent_link)) = stack.pop() {
            let pnode = phylo.get(&pid).map_err(invalid)?;
            let index = nodes.len();
            let children = &pnode.children;

            match (parent_link, children.len()) {
                (None, 3) | (Some(_), 0) | (Some(_), 2) => {}
                (None, n) => {
                    return Err(SearchError::UnsupportedTopology(format!(
                        "root has {n} children, expected 3"
                    )));
                }
                (Some(_), n) => {
                    return Err(SearchError::UnsupportedTopology(format!(
                        "inner node has {n} children, expected 2"
                    )));
                }
            }

            let mut ring = Vec::with_capacity(3);
            if let Some(pl) = parent_link {
                let up = links.len();
                let edge = edges.len();
                links.push(Link { node: index, edge, outer: pl, next: up });
                links[pl].outer = up;
                links[pl].edge = edge;
                edges.push(Edge { primary: pl, secondary: up });
                ring.push(up);
            }
            let first_child = links.len();
            for k in 0..children.len() {
                let l = first_child + k;
                links.push(Link { node: index, edge: usize::MAX, outer: usize::MAX, next: l });
                ring.push(l);
            }
            for (k, &l) in ring.iter().enumerate() {
                links[l].next = ring[(k + 1) % ring.len()];
            }

            let name = if children.is_empty() {
                match &pnode.name {
                    Some(n) if !n.is_empty() => Some(n.clone()),
                    _ => return Err(SearchError::InvalidNewick("unnamed leaf".into())),
                }
            } else {
                None
            };
            nodes.push(Node { link: ring[0], name });

            // the last child is popped first
            for (k, &cid) in children.iter().enumerate() {
                stack.push((cid, Some(first_child + k)));
            }
        }

        let tree = Tree::from_parts(links, edges, nodes, 0);
        tree.check_topology()?;
        Ok(tree)
    }

    /// Serialize the topology, children in rotation order.
    pub fn to_newick(&self) -> String {
        let mut out = String::new();
        let root_ring = self.rotation(self.root_link());
        out.push('(');
        for (i, &l) in root_ring.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.write_subtree(self.outer(l), &mut out);
        }
        out.push_str(");");
        out
    }

    /// Write the subtree entered through `up`.
    fn write_subtree(&self, up: usize, out: &mut String) {
        let node = self.link_node(up);
        if self.is_leaf(node) {
            out.push_str(self.node_name(node).unwrap_or_default());
            return;
        }
        out.push('(');
        let mut l = self.next(up);
        let mut first = true;
        while l != up {
            if !first {
                out.push(',');
            }
            first = false;
            self.write_subtree(self.outer(l), out);
            l = self.next(l);
        }
        out.push(')');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NINE: &str = "((A,B),((C,(D,E)),((F,(G,H)),I)),(J,K));";

    fn leaf(tree: &Tree, name: &str) -> usize {
        tree.leaves().find(|&n| tree.node_name(n) == Some(name)).unwrap()
    }

    #[test]
    fn round_trip_keeps_order() {
        for newick in ["(A,B,C);", "((A,B),C,D);", "((C,B),A,D);", NINE] {
            assert_eq!(Tree::from_newick(newick).unwrap().to_newick(), newick);
        }
    }

    #[test]
    fn branch_lengths_are_dropped() {
        let t = Tree::from_newick("((A:0.1,B:0.2):0.3,C:1,D:2);").unwrap();
        assert_eq!(t.to_newick(), "((A,B),C,D);");
    }

    #[test]
    fn edge_indices_follow_reverse_preorder() {
        let t = Tree::from_newick(NINE).unwrap();
        assert_eq!(t.edge_count(), 19);
        assert_eq!(t.secondary_node(2), leaf(&t, "J"));
        assert_eq!(t.secondary_node(15), leaf(&t, "C"));
        assert_eq!(t.secondary_node(14), leaf(&t, "D"));
        // edge 16 leads from the root to (A,B)
        assert_eq!(t.primary_node(16), t.root_node());
        assert_eq!(t.parent_edge(leaf(&t, "A")), Some(18));
        // edge 12 leads to (D,E), its parent edge 11 to (C,(D,E))
        assert_eq!(t.primary_node(12), t.secondary_node(11));
        for e in 0..t.edge_count() {
            assert_eq!(t.secondary_node(e), e + 1);
        }
    }

    #[test]
    fn rooted_input_is_rejected() {
        let err = Tree::from_newick("((A,B),(C,D));").unwrap_err();
        assert!(matches!(err, SearchError::UnsupportedTopology(_)));
    }

    #[test]
    fn multifurcation_is_rejected() {
        let err = Tree::from_newick("((A,B,E),C,D);").unwrap_err();
        assert!(matches!(err, SearchError::UnsupportedTopology(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(Tree::from_newick("").is_err());
        assert!(Tree::from_newick("(A,B);").is_err());
    }
}
