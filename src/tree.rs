//! Link-based unrooted binary tree stored as an index arena.
//!
//! # Overview
//! Every undirected edge is made of two half-edges ("links"), one at each of
//! its end nodes. A link knows
//! - the node it is attached to,
//! - the edge it belongs to,
//! - its `outer` partner (the link at the other end of the same edge),
//! - `next`, the following link around its own node.
//!
//! ```text
//!            primary link (at the root-ward node P)
//!                 |
//!       P  ->-[l]---------[l']-<-  C
//!                           |
//!            secondary link (at the leaf-ward node C, C's "up" link)
//! ```
//!
//! Leaves own a single link (`next` points to itself), inner nodes own three.
//! The root is an inner node with three children and no up link; for every
//! other node `node.link` is its up link, i.e. the secondary link of the edge
//! leading towards the root.
//!
//! All references are plain `usize` indices into the arena vectors, so a tree
//! can be cloned with a single `Vec` copy and compared bit for bit.
//!
//! # Invariants
//! 1. `outer` is a symmetric pairing of links.
//! 2. Following `next` `degree(node)` times returns to the start link.
//! 3. `edge.primary` and `edge.secondary` belong to `edge`, are `outer`
//!    partners and sit at different nodes.
//! 4. `#edges == #nodes - 1`; leaves are exactly the degree-1 nodes.
//! 5. Following up links from any node reaches the root without cycling.
//!
//! The mutation primitives do not check these; `check_topology` does.

use crate::error::{Result, SearchError};
use tracing::error;

fn unbounded_walk(link: usize, limit: usize) -> SearchError {
    SearchError::CorruptTopology(format!(
        "walk beyond link {link} exceeded {limit} links"
    ))
}

/// A half-edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub(crate) node: usize,
    pub(crate) edge: usize,
    pub(crate) outer: usize,
    pub(crate) next: usize,
}

/// An edge with its current root-ward (`primary`) and leaf-ward (`secondary`) link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub(crate) primary: usize,
    pub(crate) secondary: usize,
}

/// A vertex. Leaves carry the taxon label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub(crate) link: usize,
    pub(crate) name: Option<String>,
}

/// Semantic type of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Internal,
    Leaf,
}

/// Unrooted binary tree with a designated trifurcating root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    pub(crate) links: Vec<Link>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: usize,
}

impl Tree {
    pub(crate) fn from_parts(
        links: Vec<Link>,
        edges: Vec<Edge>,
        nodes: Vec<Node>,
        root: usize,
    ) -> Self {
        Tree { links, edges, nodes, root }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_node(&self) -> usize {
        self.root
    }

    /// The link the root's rotation starts from.
    pub fn root_link(&self) -> usize {
        self.nodes[self.root].link
    }

    pub fn outer(&self, link: usize) -> usize {
        self.links[link].outer
    }

    pub fn next(&self, link: usize) -> usize {
        self.links[link].next
    }

    pub fn link_node(&self, link: usize) -> usize {
        self.links[link].node
    }

    pub fn link_edge(&self, link: usize) -> usize {
        self.links[link].edge
    }

    pub fn primary_link(&self, edge: usize) -> usize {
        self.edges[edge].primary
    }

    pub fn secondary_link(&self, edge: usize) -> usize {
        self.edges[edge].secondary
    }

    pub fn primary_node(&self, edge: usize) -> usize {
        self.links[self.edges[edge].primary].node
    }

    pub fn secondary_node(&self, edge: usize) -> usize {
        self.links[self.edges[edge].secondary].node
    }

    /// The node's designated link: its up link, or the first root link.
    pub fn node_link(&self, node: usize) -> usize {
        self.nodes[node].link
    }

    pub fn node_name(&self, node: usize) -> Option<&str> {
        self.nodes[node].name.as_deref()
    }

    pub fn kind(&self, node: usize) -> NodeKind {
        if node == self.root {
            NodeKind::Root
        } else if self.is_leaf(node) {
            NodeKind::Leaf
        } else {
            NodeKind::Internal
        }
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        let l = self.nodes[node].link;
        self.links[l].next == l
    }

    pub fn is_inner(&self, node: usize) -> bool {
        !self.is_leaf(node)
    }

    /// Number of links in the node's rotation (bounded by the link count).
    pub fn degree(&self, node: usize) -> usize {
        let start = self.nodes[node].link;
        let mut l = self.links[start].next;
        let mut degree = 1;
        while l != start && degree <= self.links.len() {
            l = self.links[l].next;
            degree += 1;
        }
        degree
    }

    /// Both end nodes are inner nodes.
    pub fn is_internal_edge(&self, edge: usize) -> bool {
        self.is_inner(self.primary_node(edge)) && self.is_inner(self.secondary_node(edge))
    }

    pub fn internal_edges(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.edges.len()).filter(|&e| self.is_internal_edge(e))
    }

    pub fn internal_edge_count(&self) -> usize {
        self.internal_edges().count()
    }

    /// Edge towards the root, `None` for the root itself.
    pub fn parent_edge(&self, node: usize) -> Option<usize> {
        if node == self.root {
            None
        } else {
            Some(self.links[self.nodes[node].link].edge)
        }
    }

    /// Leaf node indices in index order.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len()).filter(|&n| self.is_leaf(n))
    }

    pub fn leaf_names(&self) -> Vec<String> {
        self.leaves()
            .filter_map(|n| self.nodes[n].name.clone())
            .collect()
    }

    /// The links of a node's rotation, starting at `link`.
    pub fn rotation(&self, link: usize) -> Vec<usize> {
        let mut out = vec![link];
        let mut l = self.links[link].next;
        while l != link && out.len() <= self.links.len() {
            out.push(l);
            l = self.links[l].next;
        }
        out
    }

    /// Edges incident to `node`.
    pub fn incident_edges(&self, node: usize) -> Vec<usize> {
        self.rotation(self.nodes[node].link)
            .into_iter()
            .map(|l| self.links[l].edge)
            .collect()
    }

    // ------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------

    /// Leaves reached by leaving the link's node through `link`.
    ///
    /// Walks `outer`/`next` only, so the result does not depend on edge
    /// orientation. A corrupt arena yields an empty list; use
    /// [`Tree::try_leaves_beyond`] to see the error.
    pub fn leaves_beyond(&self, link: usize) -> Vec<usize> {
        self.try_leaves_beyond(link).unwrap_or_else(|e| {
            error!("{e}");
            Vec::new()
        })
    }

    /// Like [`Tree::leaves_beyond`], visiting at most `#links` links.
    ///
    /// # Errors
    /// `CorruptTopology` when the `outer`/`next` rings do not close.
    pub fn try_leaves_beyond(&self, link: usize) -> Result<Vec<usize>> {
        let limit = self.links.len();
        let mut steps = 0;
        let mut leaves = Vec::new();
        let mut stack = vec![self.links[link].outer];
        while let Some(entry) = stack.pop() {
            let node = self.links[entry].node;
            if self.is_leaf(node) {
                leaves.push(node);
                continue;
            }
            let mut l = self.links[entry].next;
            while l != entry {
                steps += 1;
                if steps > limit {
                    return Err(unbounded_walk(link, limit));
                }
                stack.push(self.links[l].outer);
                l = self.links[l].next;
            }
        }
        Ok(leaves)
    }

    /// Edges reached by leaving the link's node through `link`, excluding the
    /// link's own edge. Empty on a corrupt arena.
    pub fn edges_beyond(&self, link: usize) -> Vec<usize> {
        self.try_edges_beyond(link).unwrap_or_else(|e| {
            error!("{e}");
            Vec::new()
        })
    }

    /// Like [`Tree::edges_beyond`], visiting at most `#links` links.
    ///
    /// # Errors
    /// `CorruptTopology` when the `outer`/`next` rings do not close.
    pub fn try_edges_beyond(&self, link: usize) -> Result<Vec<usize>> {
        let limit = self.links.len();
        let mut edges = Vec::new();
        let mut stack = vec![self.links[link].outer];
        while let Some(entry) = stack.pop() {
            let mut l = self.links[entry].next;
            while l != entry {
                if edges.len() >= limit {
                    return Err(unbounded_walk(link, limit));
                }
                edges.push(self.links[l].edge);
                stack.push(self.links[l].outer);
                l = self.links[l].next;
            }
        }
        Ok(edges)
    }

    /// Edges strictly below `edge`.
    pub fn subtree_edges(&self, edge: usize) -> Vec<usize> {
        self.edges_beyond(self.edges[edge].primary)
    }

    pub fn try_subtree_edges(&self, edge: usize) -> Result<Vec<usize>> {
        self.try_edges_beyond(self.edges[edge].primary)
    }

    /// Edges from `node` up to the root, nearest first.
    pub fn root_path(&self, node: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut n = node;
        while let Some(e) = self.parent_edge(n) {
            if path.len() >= self.edges.len() {
                break;
            }
            path.push(e);
            n = self.primary_node(e);
        }
        path
    }

    /// Edges on the path between two nodes.
    pub fn path_edges(&self, u: usize, v: usize) -> Vec<usize> {
        let mut up = self.root_path(u);
        let mut vp = self.root_path(v);
        while let (Some(a), Some(b)) = (up.last(), vp.last()) {
            if a != b {
                break;
            }
            up.pop();
            vp.pop();
        }
        up.extend(vp.into_iter().rev());
        up
    }

    // ------------------------------------------------------------------
    // Mutation primitives
    // ------------------------------------------------------------------

    /// Bind `link` as the secondary end of `edge`, pairing it with the
    /// edge's primary link.
    ///
    /// The link's previous edge and partner are left untouched; callers
    /// rebind those in the same topology change.
    pub fn reconnect_secondary(&mut self, edge: usize, link: usize) {
        let primary = self.edges[edge].primary;
        self.edges[edge].secondary = link;
        self.links[link].edge = edge;
        self.links[link].outer = primary;
        self.links[primary].outer = link;
    }

    /// Bind `link` as the primary end of `edge`, pairing it with the edge's
    /// secondary link.
    pub fn reconnect_primary(&mut self, edge: usize, link: usize) {
        let secondary = self.edges[edge].secondary;
        self.edges[edge].primary = link;
        self.links[link].edge = edge;
        self.links[link].outer = secondary;
        self.links[secondary].outer = link;
    }

    /// Exchange the link endpoints owned by two edges, leaving `outer` and
    /// `next` as they are.
    pub fn swap_edges(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.edges.swap(a, b);
        for e in [a, b] {
            let Edge { primary, secondary } = self.edges[e];
            self.links[primary].edge = e;
            self.links[secondary].edge = e;
        }
    }

    /// Re-derive every edge's orientation and every node's up link from the
    /// root.
    ///
    /// Fails if more than `#links` links are visited, which only happens when
    /// the `outer`/`next` structure is no longer a tree.
    pub(crate) fn reorient_from_root(&mut self) -> std::result::Result<(), usize> {
        let limit = self.links.len();
        let mut steps = 0;
        let mut stack = self.rotation(self.root_link());
        stack.reverse();
        while let Some(l) = stack.pop() {
            steps += 1;
            if steps > limit {
                return Err(steps);
            }
            let e = self.links[l].edge;
            if self.edges[e].primary != l {
                let outer = self.links[l].outer;
                self.edges[e].primary = l;
                self.edges[e].secondary = outer;
            }
            let up = self.links[l].outer;
            let child = self.links[up].node;
            self.nodes[child].link = up;
            let mut k = self.links[up].next;
            let mut children = Vec::with_capacity(2);
            while k != up {
                children.push(k);
                k = self.links[k].next;
                if children.len() > limit {
                    return Err(steps);
                }
            }
            stack.extend(children.into_iter().rev());
        }
        Ok(())
    }

    /// Subdivide `edge` with a new inner node and hang a new leaf there.
    ///
    /// Existing indices stay valid; the new edges are appended. Returns the
    /// index of the new leaf edge.
    pub fn add_leaf_on_edge(&mut self, edge: usize, name: impl Into<String>) -> usize {
        let pl = self.edges[edge].primary;
        let cs = self.edges[edge].secondary;

        let mid = self.nodes.len();
        let leaf = mid + 1;
        let m_up = self.links.len();
        let m_child = m_up + 1;
        let m_leaf = m_up + 2;
        let leaf_link = m_up + 3;
        let e_child = self.edges.len();
        let e_leaf = e_child + 1;

        self.nodes.push(Node { link: m_up, name: None });
        self.nodes.push(Node { link: leaf_link, name: Some(name.into()) });

        self.links.push(Link { node: mid, edge, outer: pl, next: m_child });
        self.links.push(Link { node: mid, edge: e_child, outer: cs, next: m_leaf });
        self.links.push(Link { node: mid, edge: e_leaf, outer: leaf_link, next: m_up });
        self.links.push(Link { node: leaf, edge: e_leaf, outer: m_leaf, next: leaf_link });

        self.edges[edge].secondary = m_up;
        self.links[pl].outer = m_up;
        self.edges.push(Edge { primary: m_child, secondary: cs });
        self.edges.push(Edge { primary: m_leaf, secondary: leaf_link });
        self.links[cs].edge = e_child;
        self.links[cs].outer = m_child;

        e_leaf
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Check all structural invariants, naming the first violation.
    ///
    /// Walks every link, node and edge; not meant for hot loops.
    pub fn check_topology(&self) -> Result<()> {
        let corrupt = |msg: String| Err(SearchError::CorruptTopology(msg));
        let nl = self.links.len();
        let ne = self.edges.len();
        let nn = self.nodes.len();

        if nn == 0 || self.root >= nn {
            return corrupt("tree has no root node".into());
        }
        for (i, link) in self.links.iter().enumerate() {
            if link.outer >= nl || link.next >= nl || link.node >= nn || link.edge >= ne {
                return corrupt(format!("link {i} references an index out of range"));
            }
            if link.outer == i || self.links[link.outer].outer != i {
                return corrupt(format!("outer of link {i} is not symmetric"));
            }
            if self.links[link.outer].node == link.node {
                return corrupt(format!("link {i} and its outer sit at the same node"));
            }
            if self.links[link.next].node != link.node {
                return corrupt(format!("next of link {i} leaves node {}", link.node));
            }
        }

        let mut degrees = vec![0usize; nn];
        for link in &self.links {
            degrees[link.node] += 1;
        }
        for (n, node) in self.nodes.iter().enumerate() {
            if node.link >= nl || self.links[node.link].node != n {
                return corrupt(format!("designated link of node {n} is not attached to it"));
            }
            let degree = degrees[n];
            let mut l = node.link;
            for _ in 0..degree {
                l = self.links[l].next;
            }
            if l != node.link {
                return corrupt(format!("rotation of node {n} does not close after {degree} steps"));
            }
            if degree != 1 && degree != 3 {
                return corrupt(format!("node {n} has degree {degree}"));
            }
            if n == self.root && degree != 3 {
                return corrupt(format!("root {n} has degree {degree}"));
            }
            if degree == 1 && node.name.is_none() {
                return corrupt(format!("leaf {n} has no name"));
            }
        }

        if ne + 1 != nn {
            return corrupt(format!("{ne} edges for {nn} nodes"));
        }
        for (e, edge) in self.edges.iter().enumerate() {
            if edge.primary >= nl || edge.secondary >= nl {
                return corrupt(format!("edge {e} references a link out of range"));
            }
            if self.links[edge.primary].edge != e || self.links[edge.secondary].edge != e {
                return corrupt(format!("links of edge {e} point to another edge"));
            }
            if self.links[edge.primary].outer != edge.secondary {
                return corrupt(format!("primary and secondary of edge {e} are not partners"));
            }
        }

        for n in 0..nn {
            if n == self.root {
                continue;
            }
            let up = self.nodes[n].link;
            if self.edges[self.links[up].edge].secondary != up {
                return corrupt(format!("up link of node {n} is not secondary on its edge"));
            }
            let mut cur = n;
            let mut steps = 0;
            while cur != self.root {
                let e = self.links[self.nodes[cur].link].edge;
                if self.edges[e].secondary != self.nodes[cur].link {
                    return corrupt(format!("edge {e} is oriented away from the root"));
                }
                cur = self.links[self.edges[e].primary].node;
                steps += 1;
                if steps > nn {
                    return corrupt(format!("node {n} does not reach the root"));
                }
            }
        }
        Ok(())
    }

    /// `true` when all structural invariants hold.
    pub fn validate_topology(&self) -> bool {
        self.check_topology().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(newick: &str) -> Tree {
        Tree::from_newick(newick).unwrap()
    }

    #[test]
    fn small_tree_is_valid() {
        let t = tree("((A,B),C,D);");
        assert!(t.validate_topology());
        assert_eq!(t.node_count(), 6);
        assert_eq!(t.edge_count(), 5);
        assert_eq!(t.link_count(), 10);
        assert_eq!(t.kind(t.root_node()), NodeKind::Root);
        assert_eq!(t.internal_edge_count(), 1);
    }

    #[test]
    fn broken_outer_is_detected() {
        let mut t = tree("((A,B),C,D);");
        let l = t.root_link();
        let o = t.outer(l);
        t.links[o].outer = t.next(o);
        let err = t.check_topology().unwrap_err();
        assert!(matches!(err, SearchError::CorruptTopology(_)));
        assert!(!t.validate_topology());
    }

    #[test]
    fn flipped_edge_is_detected() {
        let mut t = tree("((A,B),C,D);");
        let e = t.link_edge(t.root_link());
        let Edge { primary, secondary } = t.edges[e].clone();
        t.edges[e] = Edge { primary: secondary, secondary: primary };
        assert!(!t.validate_topology());
        t.reorient_from_root().unwrap();
        assert!(t.validate_topology());
    }

    #[test]
    fn swap_edges_is_its_own_inverse() {
        let original = tree("((A,B),(C,D),E);");
        let mut t = original.clone();
        t.swap_edges(0, 3);
        assert!(t.validate_topology());
        assert_ne!(t, original);
        t.swap_edges(0, 3);
        assert_eq!(t, original);
    }

    #[test]
    fn leaves_beyond_splits_the_tree() {
        let t = tree("((A,B),(C,D),E);");
        for e in 0..t.edge_count() {
            let mut below = t.leaves_beyond(t.primary_link(e));
            let above = t.leaves_beyond(t.secondary_link(e));
            assert_eq!(below.len() + above.len(), 5);
            below.extend(above);
            below.sort_unstable();
            below.dedup();
            assert_eq!(below.len(), 5);
        }
    }

    #[test]
    fn path_edges_between_leaves() {
        let t = tree("((A,B),(C,D),E);");
        let a = t.leaves().find(|&n| t.node_name(n) == Some("A")).unwrap();
        let b = t.leaves().find(|&n| t.node_name(n) == Some("B")).unwrap();
        let c = t.leaves().find(|&n| t.node_name(n) == Some("C")).unwrap();
        assert_eq!(t.path_edges(a, b).len(), 2);
        assert_eq!(t.path_edges(a, c).len(), 4);
        assert!(t.path_edges(a, a).is_empty());
    }

    #[test]
    fn subtree_edges_stay_below() {
        let t = tree("((A,B),((C,(D,E)),((F,(G,H)),I)),(J,K));");
        // edge 12 leads to (D,E)
        let mut below = t.subtree_edges(12);
        below.sort_unstable();
        assert_eq!(below, vec![13, 14]);
    }

    #[test]
    fn cyclic_rings_stop_the_walk() {
        let mut t = tree("((A,B),(C,D),E);");
        let e = t.internal_edges().next().unwrap();
        let up = t.secondary_link(e);
        let child = t.next(up);
        // the child slot now leads back into the same node
        t.links[child].outer = up;
        assert!(matches!(t.try_subtree_edges(e), Err(SearchError::CorruptTopology(_))));
        assert!(matches!(t.try_leaves_beyond(t.primary_link(e)), Err(SearchError::CorruptTopology(_))));
        assert!(t.subtree_edges(e).is_empty());
        assert!(t.leaves_beyond(t.primary_link(e)).is_empty());
    }

    #[test]
    fn add_leaf_keeps_invariants() {
        let mut t = tree("(A,B,C);");
        for (i, name) in ["D", "E", "F"].iter().enumerate() {
            let leaf_edge = t.add_leaf_on_edge(i, *name);
            assert!(t.validate_topology(), "{}", t.to_newick());
            assert!(t.is_leaf(t.secondary_node(leaf_edge)));
        }
        assert_eq!(t.leaf_names().len(), 6);
        assert_eq!(t.internal_edge_count(), 3);
    }
}
