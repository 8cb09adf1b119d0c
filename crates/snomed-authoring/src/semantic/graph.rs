//! In-memory is-a graph used to compute transitive closures.

use std::collections::{BTreeSet, HashMap};

use snomed_types::SctId;
use thiserror::Error;
use tracing::warn;

/// Deepest ancestor chain followed before giving up.
pub const MAX_CLOSURE_DEPTH: usize = 500;

/// Depth at which the updated-ancestor check stops looking.
pub const UPDATED_CHECK_DEPTH: usize = 50;

/// Errors raised while computing closures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A concept is its own ancestor.
    #[error("Loop found in transitive closure for concept {concept_id} on branch '{path}', through parent {parent_id}.")]
    Loop {
        /// Concept whose closure was being computed.
        concept_id: SctId,
        /// Parent that leads back into the chain.
        parent_id: SctId,
        /// Branch being indexed.
        path: String,
    },

    /// The ancestor chain is deeper than [`MAX_CLOSURE_DEPTH`].
    #[error("Transitive closure depth exceeded for concept {concept_id} on branch '{path}'.")]
    DepthExceeded {
        /// Concept whose closure was being computed.
        concept_id: SctId,
        /// Branch being indexed.
        path: String,
    },
}

/// A concept in the graph.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Concept id.
    pub id: SctId,
    /// Direct parents.
    pub parents: BTreeSet<SctId>,
    /// Whether this node's parents changed in the current update.
    pub updated: bool,
}

/// Builds a graph from parent edges and answers closure queries.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: HashMap<SctId, Node>,
    closures: HashMap<SctId, BTreeSet<SctId>>,
}

impl GraphBuilder {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn node_mut(&mut self, id: SctId) -> &mut Node {
        self.nodes.entry(id).or_insert_with(|| Node {
            id,
            ..Node::default()
        })
    }

    /// Adds an edge, creating either node if needed.
    pub fn add_parent(&mut self, child: SctId, parent: SctId) -> &Node {
        self.closures.clear();
        self.node_mut(parent);
        let node = self.node_mut(child);
        node.parents.insert(parent);
        node
    }

    /// Removes an edge and returns the child node, if present.
    pub fn remove_parent(&mut self, child: SctId, parent: SctId) -> Option<&Node> {
        self.closures.clear();
        let node = self.nodes.get_mut(&child)?;
        node.parents.remove(&parent);
        Some(&*node)
    }

    /// Drops all parents of a node and marks it updated.
    pub fn clear_parents_and_mark_updated(&mut self, id: SctId) -> &Node {
        self.closures.clear();
        let node = self.node_mut(id);
        node.parents.clear();
        node.updated = true;
        node
    }

    /// Marks a node updated.
    pub fn mark_updated(&mut self, id: SctId) {
        self.node_mut(id).updated = true;
    }

    /// Looks up a node.
    pub fn node(&self, id: SctId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All ancestors of a node.
    ///
    /// With `fail_on_loop` unset, a parent that leads back into the chain is
    /// skipped with a warning instead of failing.
    pub fn transitive_closure(
        &mut self,
        id: SctId,
        path: &str,
        fail_on_loop: bool,
    ) -> Result<BTreeSet<SctId>, GraphError> {
        let mut chain = Vec::new();
        self.closure_of(id, id, 1, &mut chain, path, fail_on_loop)
    }

    fn closure_of(
        &mut self,
        root: SctId,
        id: SctId,
        depth: usize,
        chain: &mut Vec<SctId>,
        path: &str,
        fail_on_loop: bool,
    ) -> Result<BTreeSet<SctId>, GraphError> {
        if let Some(closure) = self.closures.get(&id) {
            return Ok(closure.clone());
        }
        if depth > MAX_CLOSURE_DEPTH {
            return Err(GraphError::DepthExceeded {
                concept_id: root,
                path: path.to_string(),
            });
        }

        chain.push(id);
        let parents: Vec<SctId> = self
            .nodes
            .get(&id)
            .map(|n| n.parents.iter().copied().collect())
            .unwrap_or_default();
        let mut closure = BTreeSet::new();
        for parent in parents {
            if chain.contains(&parent) {
                if fail_on_loop {
                    return Err(GraphError::Loop {
                        concept_id: id,
                        parent_id: parent,
                        path: path.to_string(),
                    });
                }
                warn!(
                    "Loop in transitive closure of {} on {}: skipping parent {}",
                    id, path, parent
                );
                continue;
            }
            closure.insert(parent);
            closure.extend(self.closure_of(root, parent, depth + 1, chain, path, fail_on_loop)?);
        }
        chain.pop();

        self.closures.insert(id, closure.clone());
        Ok(closure)
    }

    /// Whether the node or any of its ancestors is marked updated.
    pub fn is_ancestor_or_self_updated(&self, id: SctId, path: &str) -> bool {
        self.updated_within(id, 1, path)
    }

    fn updated_within(&self, id: SctId, depth: usize, path: &str) -> bool {
        if depth > UPDATED_CHECK_DEPTH {
            warn!(
                "Node updated check exceeded the soft limit for concept {} on {}, working around.",
                id, path
            );
            return false;
        }
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        node.updated
            || node
                .parents
                .iter()
                .any(|parent| self.updated_within(*parent, depth + 1, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_graph(edges: &[(SctId, SctId)]) -> GraphBuilder {
        let mut graph = GraphBuilder::new();
        for (child, parent) in edges {
            graph.add_parent(*child, *parent);
        }
        graph
    }

    #[test]
    fn test_closure_follows_all_parents() {
        let mut graph = make_graph(&[(4, 2), (4, 3), (2, 1), (3, 1)]);
        let closure = graph.transitive_closure(4, "MAIN", true).unwrap();
        assert_eq!(closure, BTreeSet::from([1, 2, 3]));
        assert!(graph.transitive_closure(1, "MAIN", true).unwrap().is_empty());
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn test_loop_fails_or_is_skipped() {
        let mut graph = make_graph(&[(1, 2), (2, 3), (3, 1)]);
        let err = graph.transitive_closure(1, "MAIN/A", true).unwrap_err();
        assert!(matches!(err, GraphError::Loop { .. }));

        let closure = graph.transitive_closure(1, "MAIN/A", false).unwrap();
        assert_eq!(closure, BTreeSet::from([2, 3]));
    }

    #[test]
    fn test_depth_limit() {
        let edges: Vec<(SctId, SctId)> = (1..=MAX_CLOSURE_DEPTH as u64 + 1).map(|i| (i, i + 1)).collect();
        let mut graph = make_graph(&edges);
        let err = graph.transitive_closure(1, "MAIN", true).unwrap_err();
        assert!(matches!(err, GraphError::DepthExceeded { concept_id: 1, .. }));
    }

    #[test]
    fn test_edges_can_be_removed_and_cleared() {
        let mut graph = make_graph(&[(3, 2), (2, 1), (3, 1)]);
        assert_eq!(graph.remove_parent(3, 2).unwrap().parents, BTreeSet::from([1]));
        assert!(graph.remove_parent(9, 1).is_none());

        graph.clear_parents_and_mark_updated(2);
        assert!(graph.node(2).unwrap().parents.is_empty());
        assert!(graph.transitive_closure(2, "MAIN", true).unwrap().is_empty());
    }

    #[test]
    fn test_updated_propagates_to_descendants() {
        let mut graph = make_graph(&[(3, 2), (2, 1), (5, 4)]);
        graph.mark_updated(1);
        assert!(graph.is_ancestor_or_self_updated(3, "MAIN"));
        assert!(graph.is_ancestor_or_self_updated(1, "MAIN"));
        assert!(!graph.is_ancestor_or_self_updated(5, "MAIN"));
    }
}
