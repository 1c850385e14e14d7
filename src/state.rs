//! The runtime state snapshot threaded through interpreter steps.
//!
//! The teacher's `VersionedState` splits a workflow's data across three
//! fixed channels (messages, extra, errors), each independently versioned.
//! `GraphWorkflowState<S>` keeps that "versioned, clone-on-write value"
//! discipline but generalizes the payload to a single generic `S` plus a
//! typed [`WorkflowContext`] standing in for the old `extra` channel, and a
//! single [`StateMetadata`] version counter standing in for the three
//! independent channel versions.

use chrono::Utc;

use crate::context::WorkflowContext;
use crate::ids::{NodeId, WorkflowId};
use crate::position::{GraphPosition, StateMetadata};

/// The sole runtime snapshot of a workflow execution.
///
/// `GraphWorkflowState<S>` is a plain value: every derivation method
/// returns a new instance rather than mutating `self` (invariant I4).
/// Its three core invariants, enforced jointly by this type and the
/// interpreter that drives it:
///
/// - **I1**: `current_node` is set unless the state is terminal
///   (reached via [`GraphWorkflowState::complete`]) or freshly suspended at
///   a join point ([`GraphWorkflowState::suspend_at_join`]).
/// - **I2**: whenever `current_node` is set, the interpreter has already
///   checked it names a real node in the topology before constructing this
///   state.
/// - **I3**: `metadata.version()` strictly increases along any chain of
///   derivations from this state; every derivation method below bumps it.
#[derive(Clone, Debug)]
pub struct GraphWorkflowState<S> {
    workflow_id: WorkflowId,
    data: S,
    context: WorkflowContext,
    current_node: Option<NodeId>,
    position: GraphPosition,
    metadata: StateMetadata,
}

impl<S> GraphWorkflowState<S> {
    /// Creates the initial state for a workflow starting at `entry`.
    pub fn new(workflow_id: WorkflowId, entry: NodeId, data: S) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            data,
            context: WorkflowContext::new(),
            position: GraphPosition::initial(entry.clone()),
            current_node: Some(entry),
            metadata: StateMetadata::new(now),
        }
    }

    /// Reconstructs a state from its constituent parts without bumping the
    /// version — used when rehydrating a suspension snapshot (§4.6).
    pub fn from_parts(
        workflow_id: WorkflowId,
        data: S,
        context: WorkflowContext,
        current_node: Option<NodeId>,
        position: GraphPosition,
        metadata: StateMetadata,
    ) -> Self {
        Self {
            workflow_id,
            data,
            context,
            current_node,
            position,
            metadata,
        }
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn data(&self) -> &S {
        &self.data
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.context
    }

    pub fn current_node(&self) -> Option<&NodeId> {
        self.current_node.as_ref()
    }

    pub fn position(&self) -> &GraphPosition {
        &self.position
    }

    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// True when this state carries no current node — either Completed or
    /// freshly suspended at a join point.
    pub fn is_terminal_position(&self) -> bool {
        self.current_node.is_none()
    }

    /// Derives a new state that has traversed to `target`: position
    /// advances, context is merged with `context_updates` (right-biased),
    /// and `data` is replaced if `new_data` is supplied.
    #[must_use]
    pub fn traverse(&self, target: NodeId, context_updates: &WorkflowContext, new_data: Option<S>) -> Self
    where
        S: Clone,
    {
        let now = Utc::now();
        Self {
            workflow_id: self.workflow_id.clone(),
            data: new_data.unwrap_or_else(|| self.data.clone()),
            context: self.context.merge(context_updates),
            current_node: Some(target.clone()),
            position: self.position.advance(target),
            metadata: self.metadata.derive(now),
        }
    }

    /// Derives a new state for a forked branch: the branch observes an
    /// isolated copy of the parent context plus the branch-local seed,
    /// never the parent's subsequent updates (§4.3 Isolation).
    #[must_use]
    pub fn fork_branch(&self, target: NodeId, branch_context: WorkflowContext, branch_data: S) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: self.workflow_id.clone(),
            data: branch_data,
            context: branch_context,
            current_node: Some(target.clone()),
            position: self.position.fork_to(target),
            metadata: StateMetadata::new(now),
        }
    }

    /// Derives a new state carrying merged context updates but no change
    /// in position or current node — used by `Join` outside a fork region
    /// and by `Suspend` when resumption should continue at the same node.
    #[must_use]
    pub fn with_context_updates(&self, context_updates: &WorkflowContext) -> Self
    where
        S: Clone,
    {
        let now = Utc::now();
        Self {
            workflow_id: self.workflow_id.clone(),
            data: self.data.clone(),
            context: self.context.merge(context_updates),
            current_node: self.current_node.clone(),
            position: self.position.clone(),
            metadata: self.metadata.derive(now),
        }
    }

    /// Derives the terminal state reached by `Complete`: `current_node`
    /// becomes `None`, satisfying the "terminal" carve-out of I1.
    #[must_use]
    pub fn complete(&self, context_updates: &WorkflowContext) -> Self
    where
        S: Clone,
    {
        let mut next = self.with_context_updates(context_updates);
        next.current_node = None;
        next
    }

    /// Derives a state suspended at a join point: `current_node` becomes
    /// `None` per the I1 carve-out, pending the containing fork's other
    /// branches.
    #[must_use]
    pub fn suspend_at_join(&self, context_updates: &WorkflowContext) -> Self
    where
        S: Clone,
    {
        self.complete(context_updates)
    }

    /// Replaces the context outright (used by the suspension serializer
    /// when restoring typed values into an otherwise-reconstructed state).
    #[must_use]
    pub fn with_context(&self, context: WorkflowContext) -> Self
    where
        S: Clone,
    {
        Self {
            context,
            ..self.clone()
        }
    }
}
