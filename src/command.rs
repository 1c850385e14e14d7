//! The node contract and the sealed command set nodes use to drive
//! transitions.
//!
//! Grounded on the teacher's `node::Node` trait (async, object-safe via
//! `async_trait`) and `control::FrontierCommand`, but replacing the
//! teacher's append/replace routing directives with the sealed
//! `Traverse`/`Fork`/`Join`/`Suspend`/`Complete`/`Error` variant set the
//! governing design notes call for in place of the source's dynamic
//! dispatch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::concurrency::CancelToken;
use crate::context::WorkflowContext;
use crate::errors::{ValidationError, WorkflowError};
use crate::ids::NodeId;
use crate::state::GraphWorkflowState;

/// The kind of work a node performs, used by topology validation and by
/// routing to tell ordinary agents apart from routers and join points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Agent,
    Router,
    Join,
    Other,
}

/// A function that seeds a forked branch's user data from the parent state
/// and the branch's target node.
pub type BranchDataFactory<S> = Arc<dyn Fn(&GraphWorkflowState<S>, &NodeId) -> S + Send + Sync>;

/// The sealed set of outcomes a node's `process` step may produce.
///
/// Every non-`Error` variant carries its own `context_updates`, merged into
/// the resulting state's context by the interpreter (never applied
/// in-place — see invariant I4 on [`GraphWorkflowState`]).
pub enum Command<S> {
    /// Move to `target`, optionally replacing the user data.
    Traverse {
        target: NodeId,
        context_updates: WorkflowContext,
        new_data: Option<S>,
    },
    /// Fan out to each of `targets`, each branch seeded by `branch_data_factory`.
    Fork {
        targets: Vec<NodeId>,
        context_updates: WorkflowContext,
        branch_data_factory: BranchDataFactory<S>,
    },
    /// Converge at a fork's join point.
    Join { context_updates: WorkflowContext },
    /// Pause execution, capturable as a suspension snapshot.
    Suspend {
        timeout: Option<Duration>,
        context_updates: WorkflowContext,
        reason: String,
    },
    /// Terminate the workflow successfully with `result`.
    Complete {
        result: S,
        context_updates: WorkflowContext,
    },
    /// Terminate the workflow with a fatal error.
    Error(WorkflowError),
}

impl<S: fmt::Debug> fmt::Debug for Command<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Traverse { target, new_data, .. } => f
                .debug_struct("Traverse")
                .field("target", target)
                .field("new_data", &new_data.is_some())
                .finish(),
            Command::Fork { targets, .. } => {
                f.debug_struct("Fork").field("targets", targets).finish()
            }
            Command::Join { .. } => f.debug_struct("Join").finish(),
            Command::Suspend { reason, timeout, .. } => f
                .debug_struct("Suspend")
                .field("reason", reason)
                .field("timeout", timeout)
                .finish(),
            Command::Complete { result, .. } => {
                f.debug_struct("Complete").field("result", result).finish()
            }
            Command::Error(err) => f.debug_tuple("Error").field(err).finish(),
        }
    }
}

impl<S> Command<S> {
    /// Convenience constructor for the common case of traversing without
    /// replacing the user data.
    pub fn traverse(target: NodeId) -> Self {
        Command::Traverse {
            target,
            context_updates: WorkflowContext::new(),
            new_data: None,
        }
    }

    #[must_use]
    pub fn with_context_updates(mut self, updates: WorkflowContext) -> Self {
        match &mut self {
            Command::Traverse { context_updates, .. }
            | Command::Fork { context_updates, .. }
            | Command::Join { context_updates }
            | Command::Suspend { context_updates, .. }
            | Command::Complete { context_updates, .. } => *context_updates = updates,
            Command::Error(_) => {}
        }
        self
    }
}

/// A single unit of computation in a topology.
///
/// Mirrors the external interface's node contract: `process` plus the
/// small capability set (`node_id`, `name`, `node_type`,
/// `can_be_entry_point`, `can_suspend`, `validate`) the design notes ask
/// for in place of the source's deep inheritance.
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Execute this node against the current state, producing a command.
    ///
    /// `cancel` is the cooperative cancellation flag for this run (or, for
    /// a forked branch, for that branch's fork group, §4.3/§5): a node
    /// performing a long-running sub-operation should check
    /// `cancel.is_cancelled()` between logical steps and return
    /// `Command::Error` promptly if it's set, rather than relying solely on
    /// the interpreter's own hard abort.
    async fn process(&self, state: &GraphWorkflowState<S>, cancel: &CancelToken) -> Result<Command<S>, WorkflowError>;

    fn node_id(&self) -> &NodeId;

    fn name(&self) -> &str {
        self.node_id().as_str()
    }

    fn node_type(&self) -> NodeType {
        NodeType::Other
    }

    /// Whether a topology may designate this node as an entry point.
    fn can_be_entry_point(&self) -> bool {
        true
    }

    /// Whether this node may legitimately return `Suspend`.
    fn can_suspend(&self) -> bool {
        false
    }

    /// Self-check invoked during topology validation (§4.1); the default
    /// accepts any node.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(NodeId);

    #[async_trait]
    impl Node<u32> for Noop {
        async fn process(&self, state: &GraphWorkflowState<u32>, _cancel: &CancelToken) -> Result<Command<u32>, WorkflowError> {
            Ok(Command::Complete {
                result: *state.data(),
                context_updates: WorkflowContext::new(),
            })
        }

        fn node_id(&self) -> &NodeId {
            &self.0
        }
    }

    #[tokio::test]
    async fn default_capabilities_are_entry_capable_and_non_suspending() {
        let node = Noop(NodeId::new("a").unwrap());
        assert!(node.can_be_entry_point());
        assert!(!node.can_suspend());
        assert!(node.validate().is_ok());
    }

    #[tokio::test]
    async fn process_completes_with_state_data() {
        let node = Noop(NodeId::new("a").unwrap());
        let state = GraphWorkflowState::new(
            crate::ids::WorkflowId::new("wf").unwrap(),
            NodeId::new("a").unwrap(),
            7u32,
        );
        match node.process(&state, &CancelToken::new()).await.unwrap() {
            Command::Complete { result, .. } => assert_eq!(result, 7),
            _ => panic!("expected Complete"),
        }
    }
}
