//! Fork/Join scheduling: parallel branch execution, isolation, aggregation,
//! and cooperative cancellation (§4.3).
//!
//! No literal teacher module grounds this directly — the scheduler module
//! its `runtimes::session::SessionState` imports isn't present in the
//! retrieval pack — so the fan-out/fan-in shape here follows the same
//! `tokio::task::JoinSet` pattern the teacher's async stack is already built
//! around, and the aggregation bookkeeping mirrors `app.rs`'s
//! `apply_barrier` ("collect partials per node, merge, report what
//! changed"), generalized from a single barrier step to whole recursive
//! sub-workflow executions per branch.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::command::BranchDataFactory;
use crate::context::{ContextKey, WorkflowContext};
use crate::errors::{ErrorCode, ExecutionError, WorkflowError};
use crate::ids::NodeId;
use crate::interpreter::{Executor, WorkflowResult};
use crate::state::GraphWorkflowState;

/// A cooperative, idempotent cancellation flag observable by nodes that
/// choose to check it between logical sub-operations (§5 "Cancellation
/// semantics"). Plain `AtomicBool` rather than a channel-based primitive:
/// the only operations needed are "signal" and "poll".
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The context key a fork's branch completion values are recorded under, in
/// declaration order, for downstream nodes to consume (e.g. scenario S3's
/// `["x", "y"]`).
pub fn fork_results_key<S: Send + Sync + 'static>() -> ContextKey<Vec<S>> {
    ContextKey::new("graphloom::fork_results")
}

/// The merged outcome of a completed fork: branch contexts folded in
/// declaration order (right-biased, §4.3 Aggregation) plus each branch's
/// terminal value in the same order.
pub struct ForkOutcome<S> {
    pub context: WorkflowContext,
    pub results: Vec<S>,
}

/// Runs `targets` as isolated, concurrent sub-executions of `executor`,
/// then aggregates their outcomes.
///
/// Each branch is driven by a full, independent [`Executor::execute`] call
/// starting from a state produced by [`GraphWorkflowState::fork_branch`];
/// a branch that itself emits `Join` or reaches a dead end with no current
/// node converges to `WorkflowResult::Success` via the interpreter's own
/// terminal check, so "a branch is done" and "a top-level workflow is done"
/// share one code path. Per §9's design notes, the sealed `Command` set has
/// no field naming where control resumes after a join, so this fork's
/// aggregated context and branch results become the state the *parent*
/// converges into — the fork is itself a convergence point for its
/// containing branch.
pub fn run_fork<'a, S>(
    executor: &'a Executor<S>,
    state: &'a GraphWorkflowState<S>,
    targets: Vec<NodeId>,
    context_updates: WorkflowContext,
    branch_data_factory: BranchDataFactory<S>,
    cancel: &'a CancelToken,
) -> Pin<Box<dyn Future<Output = Result<ForkOutcome<S>, WorkflowError>> + Send + 'a>>
where
    S: Clone + Send + Sync + serde::Serialize + 'static,
{
    Box::pin(run_fork_inner(executor, state, targets, context_updates, branch_data_factory, cancel))
}

async fn run_fork_inner<S>(
    executor: &Executor<S>,
    state: &GraphWorkflowState<S>,
    targets: Vec<NodeId>,
    context_updates: WorkflowContext,
    branch_data_factory: BranchDataFactory<S>,
    cancel: &CancelToken,
) -> Result<ForkOutcome<S>, WorkflowError>
where
    S: Clone + Send + Sync + serde::Serialize + 'static,
{
    if targets.is_empty() {
        // B4: a fork of size zero is equivalent to an immediate join.
        return Ok(ForkOutcome {
            context: context_updates,
            results: Vec::new(),
        });
    }

    let branch_context = state.context().merge(&context_updates);
    let mut set: JoinSet<(usize, WorkflowResult<S>)> = JoinSet::new();

    // Every branch shares one cancellation flag: the first fatal branch
    // (under `fail_fast`) or an already-cancelled parent trips it, and each
    // branch's nodes can observe it via `Node::process`'s `cancel` argument
    // between their own logical sub-operations (§4.3/§5), independent of
    // the `JoinSet::abort_all` hard cancel below.
    let branch_cancel = CancelToken::new();
    if cancel.is_cancelled() {
        branch_cancel.cancel();
    }

    for (index, target) in targets.iter().cloned().enumerate() {
        let branch_data = branch_data_factory(state, &target);
        let branch_state = state.fork_branch(target, branch_context.clone(), branch_data);
        let branch_executor = executor.clone();
        let branch_cancel = branch_cancel.clone();
        set.spawn(async move {
            let outcome = branch_executor.execute_with_cancel(branch_state, &branch_cancel).await;
            (index, outcome)
        });
    }

    let fail_fast = executor.config().fail_fast;
    let mut slots: Vec<Option<WorkflowResult<S>>> = (0..targets.len()).map(|_| None).collect();
    let mut first_fatal: Option<WorkflowError> = None;

    let join_all = async {
        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(pair) => pair,
                Err(join_error) => {
                    return Err(WorkflowError::from(ExecutionError::new(
                        ErrorCode::NodeExecutionError,
                        format!("fork branch task did not complete cleanly: {join_error}"),
                    )));
                }
            };

            let is_fatal = matches!(
                &outcome,
                WorkflowResult::Failure { error, .. } if !error.recoverable()
            );
            if is_fatal {
                if let WorkflowResult::Failure { error, .. } = &outcome {
                    first_fatal.get_or_insert_with(|| error.clone());
                }
                slots[index] = Some(outcome);
                if fail_fast {
                    branch_cancel.cancel();
                    set.abort_all();
                    break;
                }
                continue;
            }
            slots[index] = Some(outcome);
        }
        Ok(())
    };

    match executor.config().fork_timeout {
        Some(timeout) => match tokio::time::timeout(timeout, join_all).await {
            Ok(result) => result?,
            Err(_elapsed) => {
                branch_cancel.cancel();
                set.abort_all();
                return Err(WorkflowError::from(ExecutionError::new(
                    ErrorCode::ExecutionTimeout,
                    format!("fork group exceeded its {timeout:?} timeout"),
                )));
            }
        },
        None => join_all.await?,
    }

    if let Some(error) = first_fatal {
        return Err(error);
    }

    let mut context = branch_context;
    let mut results = Vec::with_capacity(targets.len());
    for outcome in slots.into_iter().flatten() {
        match outcome {
            WorkflowResult::Success { value, final_context } => {
                context = context.merge(&final_context);
                results.push(value);
            }
            WorkflowResult::Failure { error, final_context, .. } => {
                if let Some(final_context) = final_context {
                    context = context.merge(&final_context);
                }
                return Err(error);
            }
            WorkflowResult::Suspended { reason, .. } => {
                return Err(WorkflowError::from(ExecutionError::new(
                    ErrorCode::StrategyExecutionFailed,
                    format!("a fork branch suspended (\"{reason}\"); nested suspension inside a fork is not supported"),
                )));
            }
        }
    }

    Ok(ForkOutcome { context, results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, Node, NodeType};
    use crate::context::WorkflowContext;
    use crate::errors::ValidationError;
    use crate::ids::WorkflowId;
    use crate::interpreter::ExecutorConfig;
    use crate::suspension::ContextRegistry;
    use crate::topology::GraphBuilder;
    use async_trait::async_trait;

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    struct CompletesWith(NodeId, String);

    #[async_trait]
    impl Node<String> for CompletesWith {
        async fn process(&self, _state: &GraphWorkflowState<String>, _cancel: &CancelToken) -> Result<Command<String>, WorkflowError> {
            Ok(Command::Complete {
                result: self.1.clone(),
                context_updates: WorkflowContext::new(),
            })
        }
        fn node_id(&self) -> &NodeId {
            &self.0
        }
        fn node_type(&self) -> NodeType {
            NodeType::Agent
        }
    }

    struct Forker {
        id: NodeId,
        targets: Vec<NodeId>,
    }

    #[async_trait]
    impl Node<String> for Forker {
        async fn process(&self, _state: &GraphWorkflowState<String>, _cancel: &CancelToken) -> Result<Command<String>, WorkflowError> {
            let targets = self.targets.clone();
            Ok(Command::Fork {
                targets,
                context_updates: WorkflowContext::new(),
                branch_data_factory: Arc::new(|_state, _target| String::new()),
            })
        }
        fn node_id(&self) -> &NodeId {
            &self.id
        }
        fn node_type(&self) -> NodeType {
            NodeType::Other
        }
        fn can_be_entry_point(&self) -> bool {
            true
        }
    }

    fn executor_for(nodes: Vec<Arc<dyn Node<String> + Send + Sync>>, entry: NodeId) -> Executor<String> {
        let mut builder = GraphBuilder::new();
        for n in nodes {
            builder = builder.add_node(n);
        }
        let topology = builder.entry_point(entry).build().unwrap();
        Executor::new(Arc::new(topology), ExecutorConfig::default(), Arc::new(ContextRegistry::new()))
    }

    #[tokio::test]
    async fn fork_of_two_branches_aggregates_results_in_declaration_order() {
        let executor = executor_for(
            vec![
                Arc::new(Forker { id: node("start"), targets: vec![node("x"), node("y")] }),
                Arc::new(CompletesWith(node("x"), "x".into())),
                Arc::new(CompletesWith(node("y"), "y".into())),
            ],
            node("start"),
        );
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("start"), String::new());
        match executor.execute(state).await {
            WorkflowResult::Success { final_context, .. } => {
                let results = final_context.get(&fork_results_key::<String>()).unwrap();
                assert_eq!(results, &vec!["x".to_string(), "y".to_string()]);
            }
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn fork_of_zero_targets_converges_immediately() {
        let outcome = run_fork(
            &executor_for(vec![Arc::new(CompletesWith(node("only"), "unused".into()))], node("only")),
            &GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("only"), String::new()),
            Vec::new(),
            WorkflowContext::new(),
            Arc::new(|_state, _target| String::new()),
            &CancelToken::new(),
        )
        .await
        .unwrap();
        assert!(outcome.results.is_empty());
    }

    struct FailsImmediately(NodeId);

    #[async_trait]
    impl Node<String> for FailsImmediately {
        async fn process(&self, _state: &GraphWorkflowState<String>, _cancel: &CancelToken) -> Result<Command<String>, WorkflowError> {
            Ok(Command::Error(WorkflowError::from(ValidationError::new(
                ErrorCode::ValidationFailed,
                "branch failed",
            ))))
        }
        fn node_id(&self) -> &NodeId {
            &self.0
        }
    }

    #[tokio::test]
    async fn fail_fast_propagates_the_fatal_branch_error() {
        let executor = executor_for(
            vec![
                Arc::new(Forker { id: node("start"), targets: vec![node("x"), node("y")] }),
                Arc::new(FailsImmediately(node("x"))),
                Arc::new(CompletesWith(node("y"), "y".into())),
            ],
            node("start"),
        );
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("start"), String::new());
        match executor.execute(state).await {
            WorkflowResult::Failure { error, .. } => assert_eq!(error.code(), ErrorCode::ValidationFailed),
            _ => panic!("expected failure"),
        }
    }

    struct ChecksCancel(NodeId);

    #[async_trait]
    impl Node<String> for ChecksCancel {
        async fn process(&self, _state: &GraphWorkflowState<String>, cancel: &CancelToken) -> Result<Command<String>, WorkflowError> {
            if cancel.is_cancelled() {
                return Ok(Command::Error(WorkflowError::from(ExecutionError::new(
                    ErrorCode::Cancelled,
                    "observed cancellation before starting work",
                ))));
            }
            Ok(Command::Complete {
                result: "ran".to_string(),
                context_updates: WorkflowContext::new(),
            })
        }
        fn node_id(&self) -> &NodeId {
            &self.0
        }
    }

    #[tokio::test]
    async fn fork_branch_node_observes_an_already_cancelled_token() {
        let executor = executor_for(
            vec![
                Arc::new(Forker { id: node("start"), targets: vec![node("x")] }),
                Arc::new(ChecksCancel(node("x"))),
            ],
            node("start"),
        );
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("start"), String::new());
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = run_fork(
            &executor,
            &state,
            vec![node("x")],
            WorkflowContext::new(),
            Arc::new(|_state, _target| String::new()),
            &cancel,
        )
        .await;

        match outcome {
            Err(error) => assert_eq!(error.code(), ErrorCode::Cancelled),
            Ok(_) => panic!("expected the branch's node to observe cancellation via its process argument"),
        }
    }
}
