//! Graph topology: nodes, edges, entry points, and build-time validation.
//!
//! Grounded on the teacher's `graphs::GraphBuilder` (fluent construction,
//! `compile()` to a ready-to-run artifact) and `graphs::edges::ConditionalEdge`
//! (predicate-over-snapshot routing), generalized from the teacher's fixed
//! `NodeKind`/`StateSnapshot` pair to the generic `NodeId`/`GraphWorkflowState<S>`
//! built up in `command.rs`/`state.rs`. Topology is stored as
//! `(map<NodeId, Node>, ordered list<Edge>)` per the governing design notes,
//! never as node-to-node back references, so cyclic graphs pose no ownership
//! issue for the interpreter that walks it by id.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::command::Node;
use crate::errors::{ErrorCode, ValidationError};
use crate::ids::{EdgeId, NodeId};
use crate::state::GraphWorkflowState;

/// A pure predicate over the originating state, evaluated as an assertion
/// (not a re-router) when the interpreter processes a `Traverse` (§4.2).
pub type EdgeCondition<S> = Arc<dyn Fn(&GraphWorkflowState<S>) -> bool + Send + Sync>;

/// A directed edge, optionally guarded by a condition.
pub struct GraphEdge<S> {
    id: EdgeId,
    from: NodeId,
    to: NodeId,
    condition: Option<EdgeCondition<S>>,
}

impl<S> Clone for GraphEdge<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            condition: self.condition.clone(),
        }
    }
}

impl<S> GraphEdge<S> {
    pub fn id(&self) -> &EdgeId {
        &self.id
    }
    pub fn from(&self) -> &NodeId {
        &self.from
    }
    pub fn to(&self) -> &NodeId {
        &self.to
    }
    pub fn condition(&self) -> Option<&EdgeCondition<S>> {
        self.condition.as_ref()
    }

    /// Evaluates this edge's condition against `state`; unconditional edges
    /// always hold.
    pub fn holds(&self, state: &GraphWorkflowState<S>) -> bool {
        match &self.condition {
            Some(predicate) => predicate(state),
            None => true,
        }
    }
}

/// Outcome of topology validation: a pure function of the builder's
/// accumulated nodes/edges/entry points. Warnings never block construction.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A validated, immutable graph of nodes and edges.
pub struct Topology<S> {
    nodes: FxHashMap<NodeId, Arc<dyn Node<S> + Send + Sync>>,
    edges: Vec<GraphEdge<S>>,
    entry_points: Vec<NodeId>,
    default_entry_point: Option<NodeId>,
    warnings: Vec<String>,
}

impl<S> Topology<S> {
    pub fn node(&self, id: &NodeId) -> Option<&Arc<dyn Node<S> + Send + Sync>> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Outgoing edges of `from`, in declaration order — the tie-break the
    /// interpreter relies on when multiple edges connect the same pair.
    pub fn edges_from(&self, from: &NodeId) -> impl Iterator<Item = &GraphEdge<S>> {
        self.edges.iter().filter(move |e| e.from() == from)
    }

    pub fn edge(&self, from: &NodeId, to: &NodeId) -> Option<&GraphEdge<S>> {
        self.edges.iter().find(|e| e.from() == from && e.to() == to)
    }

    pub fn entry_points(&self) -> &[NodeId] {
        &self.entry_points
    }

    pub fn default_entry_point(&self) -> Option<&NodeId> {
        self.default_entry_point.as_ref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Renders this topology as a [`petgraph`] directed graph, node-weighted
    /// by [`NodeId`] and edge-weighted by [`EdgeId`], for callers that want
    /// petgraph's algorithms (shortest path, SCCs, DOT export) on top of a
    /// compiled topology.
    #[cfg(feature = "petgraph-compat")]
    pub fn to_petgraph(&self) -> petgraph::graph::DiGraph<NodeId, EdgeId> {
        let mut graph = petgraph::graph::DiGraph::new();
        let mut indices: FxHashMap<NodeId, petgraph::graph::NodeIndex> = FxHashMap::default();
        for id in self.nodes.keys() {
            indices.insert(id.clone(), graph.add_node(id.clone()));
        }
        for edge in &self.edges {
            if let (Some(&from), Some(&to)) = (indices.get(edge.from()), indices.get(edge.to())) {
                graph.add_edge(from, to, edge.id().clone());
            }
        }
        graph
    }
}

/// Fluent builder for a [`Topology`], in the teacher's `GraphBuilder` idiom.
pub struct GraphBuilder<S> {
    nodes: Vec<Arc<dyn Node<S> + Send + Sync>>,
    edges: Vec<GraphEdge<S>>,
    entry_points: Vec<NodeId>,
    default_entry_point: Option<NodeId>,
    next_edge_seq: u64,
}

impl<S> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            entry_points: Vec::new(),
            default_entry_point: None,
            next_edge_seq: 0,
        }
    }
}

impl<S> GraphBuilder<S>
where
    S: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_node(mut self, node: Arc<dyn Node<S> + Send + Sync>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Adds an unconditional edge, auto-assigning a declaration-order id.
    #[must_use]
    pub fn add_edge(self, from: NodeId, to: NodeId) -> Self {
        self.add_conditional_edge(from, to, None)
    }

    /// Adds an edge guarded by `condition`; a `None` condition is
    /// unconditional.
    #[must_use]
    pub fn add_conditional_edge(
        mut self,
        from: NodeId,
        to: NodeId,
        condition: Option<EdgeCondition<S>>,
    ) -> Self {
        let id = EdgeId::new(format!("{from}->{to}#{}", self.next_edge_seq))
            .expect("generated edge id is never empty");
        self.next_edge_seq += 1;
        self.edges.push(GraphEdge {
            id,
            from,
            to,
            condition,
        });
        self
    }

    /// Adds an edge with an explicitly chosen id, needed when callers must
    /// reference a specific edge (e.g. in tests asserting `lastEdgeId`).
    #[must_use]
    pub fn add_edge_with_id(
        mut self,
        id: EdgeId,
        from: NodeId,
        to: NodeId,
        condition: Option<EdgeCondition<S>>,
    ) -> Self {
        self.edges.push(GraphEdge {
            id,
            from,
            to,
            condition,
        });
        self
    }

    #[must_use]
    pub fn entry_point(mut self, node: NodeId) -> Self {
        self.entry_points.push(node);
        self
    }

    #[must_use]
    pub fn default_entry_point(mut self, node: NodeId) -> Self {
        self.default_entry_point = Some(node);
        self
    }

    /// Validates the accumulated configuration without consuming it.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.nodes.is_empty() {
            report.errors.push(ValidationError::new(
                ErrorCode::ValidationFailed,
                "topology has no nodes",
            ));
        }

        let mut node_ids: FxHashMap<NodeId, &Arc<dyn Node<S> + Send + Sync>> = FxHashMap::default();
        for node in &self.nodes {
            if node_ids.insert(node.node_id().clone(), node).is_some() {
                report.errors.push(ValidationError::new(
                    ErrorCode::ValidationFailed,
                    format!("duplicate node id: {}", node.node_id()),
                ));
            }
        }

        let mut edge_ids: FxHashSet<EdgeId> = FxHashSet::default();
        for edge in &self.edges {
            if !edge_ids.insert(edge.id().clone()) {
                report.errors.push(ValidationError::new(
                    ErrorCode::ValidationFailed,
                    format!("duplicate edge id: {}", edge.id()),
                ));
            }
            if !node_ids.contains_key(edge.from()) {
                report.errors.push(ValidationError::new(
                    ErrorCode::ValidationFailed,
                    format!("edge {} references unknown source node {}", edge.id(), edge.from()),
                ));
            }
            if !node_ids.contains_key(edge.to()) {
                report.errors.push(ValidationError::new(
                    ErrorCode::ValidationFailed,
                    format!("edge {} references unknown target node {}", edge.id(), edge.to()),
                ));
            }
        }

        if self.entry_points.is_empty() {
            report.errors.push(ValidationError::new(
                ErrorCode::ValidationFailed,
                "topology has no entry points",
            ));
        }
        for entry in &self.entry_points {
            match node_ids.get(entry) {
                None => report.errors.push(ValidationError::new(
                    ErrorCode::ValidationFailed,
                    format!("entry point {entry} is not a registered node"),
                )),
                Some(node) if !node.can_be_entry_point() => {
                    report.errors.push(ValidationError::new(
                        ErrorCode::ValidationFailed,
                        format!("node {entry} cannot serve as an entry point"),
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(default_entry) = &self.default_entry_point {
            if !self.entry_points.contains(default_entry) {
                report.errors.push(ValidationError::new(
                    ErrorCode::ValidationFailed,
                    format!("default entry point {default_entry} is not among entry points"),
                ));
            }
        }

        if report.is_valid() {
            report.warnings.extend(self.unreachable_node_warnings());
        }

        report
    }

    fn unreachable_node_warnings(&self) -> Vec<String> {
        let mut reachable: FxHashSet<NodeId> = self.entry_points.iter().cloned().collect();
        let mut frontier: Vec<NodeId> = self.entry_points.clone();
        while let Some(current) = frontier.pop() {
            for edge in self.edges.iter().filter(|e| *e.from() == current) {
                if reachable.insert(edge.to().clone()) {
                    frontier.push(edge.to().clone());
                }
            }
        }
        self.nodes
            .iter()
            .map(|n| n.node_id())
            .filter(|id| !reachable.contains(*id))
            .map(|id| format!("node {id} is unreachable from any entry point"))
            .collect()
    }

    /// Validates and constructs the topology, or returns the accumulated
    /// errors.
    pub fn build(self) -> Result<Topology<S>, Vec<ValidationError>> {
        let report = self.validate();
        if !report.is_valid() {
            return Err(report.errors);
        }
        let nodes = self
            .nodes
            .into_iter()
            .map(|n| (n.node_id().clone(), n))
            .collect();
        Ok(Topology {
            nodes,
            edges: self.edges,
            entry_points: self.entry_points,
            default_entry_point: self.default_entry_point,
            warnings: report.warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, NodeType};
    use crate::concurrency::CancelToken;
    use crate::context::WorkflowContext;
    use crate::errors::WorkflowError;
    use async_trait::async_trait;

    struct Stub(NodeId, bool);

    #[async_trait]
    impl Node<()> for Stub {
        async fn process(&self, _state: &GraphWorkflowState<()>, _cancel: &CancelToken) -> Result<Command<()>, WorkflowError> {
            Ok(Command::Complete {
                result: (),
                context_updates: WorkflowContext::new(),
            })
        }
        fn node_id(&self) -> &NodeId {
            &self.0
        }
        fn node_type(&self) -> NodeType {
            NodeType::Agent
        }
        fn can_be_entry_point(&self) -> bool {
            self.1
        }
    }

    fn node(name: &str, entry: bool) -> Arc<dyn Node<()> + Send + Sync> {
        Arc::new(Stub(NodeId::new(name).unwrap(), entry))
    }

    #[test]
    fn empty_topology_fails_validation() {
        let report = GraphBuilder::<()>::new().validate();
        assert!(!report.is_valid());
    }

    #[test]
    fn unknown_edge_target_is_rejected() {
        let builder = GraphBuilder::<()>::new()
            .add_node(node("a", true))
            .add_edge(NodeId::new("a").unwrap(), NodeId::new("ghost").unwrap())
            .entry_point(NodeId::new("a").unwrap());
        assert!(builder.build().is_err());
    }

    #[test]
    fn non_entry_node_in_entry_points_is_rejected() {
        let builder = GraphBuilder::<()>::new()
            .add_node(node("a", false))
            .entry_point(NodeId::new("a").unwrap());
        assert!(builder.build().is_err());
    }

    #[test]
    fn unreachable_node_is_a_warning_not_an_error() {
        let topology = GraphBuilder::<()>::new()
            .add_node(node("a", true))
            .add_node(node("b", true))
            .entry_point(NodeId::new("a").unwrap())
            .build()
            .unwrap();
        assert_eq!(topology.warnings().len(), 1);
    }

    #[cfg(feature = "petgraph-compat")]
    #[test]
    fn to_petgraph_preserves_node_and_edge_count() {
        let a = NodeId::new("a").unwrap();
        let b = NodeId::new("b").unwrap();
        let topology = GraphBuilder::<()>::new()
            .add_node(node("a", true))
            .add_node(node("b", true))
            .add_edge(a.clone(), b.clone())
            .entry_point(a)
            .build()
            .unwrap();
        let graph = topology.to_petgraph();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn declaration_order_is_preserved_for_tie_break() {
        let a = NodeId::new("a").unwrap();
        let b = NodeId::new("b").unwrap();
        let c = NodeId::new("c").unwrap();
        let topology = GraphBuilder::<()>::new()
            .add_node(node("a", true))
            .add_node(node("b", true))
            .add_node(node("c", true))
            .add_edge_with_id(EdgeId::new("first").unwrap(), a.clone(), b.clone(), None)
            .add_edge_with_id(EdgeId::new("second").unwrap(), a.clone(), c.clone(), None)
            .entry_point(a.clone())
            .build()
            .unwrap();
        let first = topology.edges_from(&a).next().unwrap();
        assert_eq!(first.id().as_str(), "first");
    }
}
