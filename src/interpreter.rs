//! The interpreter: the step loop that drives a [`GraphWorkflowState`]
//! through a [`Topology`] one command at a time.
//!
//! Grounded on the teacher's `App::invoke` (the top-level run loop) and
//! `App::apply_barrier` (its `#[instrument(skip(..))]` and
//! `tracing::debug!`/`tracing::info!` instrumentation style), replacing the
//! source's node-kind frontier and reducer/barrier mechanics with the
//! single-current-node, command-driven loop the design notes describe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::command::Command;
use crate::concurrency::{self, fork_results_key, CancelToken};
use crate::context::{ContextKey, WorkflowContext};
use crate::errors::{ErrorCode, ExecutionError, WorkflowError};
use crate::ids::{EdgeId, NodeId, WorkflowId};
use crate::monitor::{self, Monitor, NoopMonitor, WorkflowEvent};
use crate::state::GraphWorkflowState;
use crate::suspension::{ContextRegistry, SuspensionError, SuspensionSnapshot};
use crate::topology::Topology;

/// The context key the last traversed edge's id is recorded under,
/// satisfying scenario S1's `finalContext` expectation.
pub fn last_edge_id_key() -> ContextKey<EdgeId> {
    ContextKey::new("graphloom::last_edge_id")
}

/// Tunable limits and collaborators for a single interpreter run (§6
/// Configuration).
#[derive(Clone)]
pub struct ExecutorConfig {
    pub max_steps: u64,
    pub max_execution_time: Duration,
    pub detect_cycles: bool,
    pub allow_cycles: bool,
    /// Whether the first fatal branch of a fork cancels its siblings
    /// (§4.3 Join semantics). Not a field of `Command::Fork` itself, since
    /// the sealed command set carries no per-fork policy.
    pub fail_fast: bool,
    /// An optional ceiling on how long any single fork group may run,
    /// independent of the workflow-wide `max_execution_time`.
    pub fork_timeout: Option<Duration>,
    pub monitor: Arc<dyn Monitor>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            max_execution_time: Duration::from_secs(5 * 60),
            detect_cycles: true,
            allow_cycles: false,
            fail_fast: true,
            fork_timeout: None,
            monitor: Arc::new(NoopMonitor),
        }
    }
}

/// The outcome of driving a workflow to completion, suspension, or failure
/// (§6 `WorkflowResult`).
pub enum WorkflowResult<S> {
    Success {
        value: S,
        final_context: WorkflowContext,
    },
    Failure {
        error: WorkflowError,
        partial_value: Option<S>,
        final_context: Option<WorkflowContext>,
    },
    Suspended {
        workflow_id: WorkflowId,
        snapshot: SuspensionSnapshot,
        reason: String,
    },
}

/// Drives a [`GraphWorkflowState`] through a [`Topology`] to completion.
///
/// Cheap to clone: `topology` and `registry` are `Arc`-backed and `config`
/// is a small value type, matching the teacher's `App` (itself
/// `#[derive(Clone)]` over `Arc`-wrapped nodes).
pub struct Executor<S> {
    topology: Arc<Topology<S>>,
    config: ExecutorConfig,
    registry: Arc<ContextRegistry>,
}

impl<S> Clone for Executor<S> {
    fn clone(&self) -> Self {
        Self {
            topology: Arc::clone(&self.topology),
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S> Executor<S> {
    pub fn new(topology: Arc<Topology<S>>, config: ExecutorConfig, registry: Arc<ContextRegistry>) -> Self {
        Self {
            topology,
            config,
            registry,
        }
    }

    pub fn topology(&self) -> &Topology<S> {
        &self.topology
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    fn succeed(&self, workflow_id: WorkflowId, value: S, final_context: WorkflowContext) -> WorkflowResult<S> {
        monitor::notify(
            self.config.monitor.as_ref(),
            WorkflowEvent::WorkflowCompleted { workflow_id },
        );
        WorkflowResult::Success { value, final_context }
    }

    fn fail(&self, state: &GraphWorkflowState<S>, error: WorkflowError) -> WorkflowResult<S>
    where
        S: Clone,
    {
        monitor::notify(
            self.config.monitor.as_ref(),
            WorkflowEvent::WorkflowError {
                workflow_id: state.workflow_id().clone(),
                error: error.clone(),
            },
        );
        WorkflowResult::Failure {
            error,
            partial_value: Some(state.data().clone()),
            final_context: Some(state.context().clone()),
        }
    }

    /// Runs the step loop from `state` to Complete, Suspend, or Error
    /// (§4.2), with no external cancellation source.
    pub async fn execute(&self, state: GraphWorkflowState<S>) -> WorkflowResult<S>
    where
        S: Clone + Send + Sync + Serialize + 'static,
    {
        self.execute_with_cancel(state, &CancelToken::new()).await
    }

    /// Runs the step loop from `state`, observing `cancel` cooperatively
    /// (§4.3/§5) in addition to the step/time limits. Emits
    /// `WorkflowStarted` before entering the loop.
    #[instrument(skip(self, state, cancel))]
    pub async fn execute_with_cancel(&self, state: GraphWorkflowState<S>, cancel: &CancelToken) -> WorkflowResult<S>
    where
        S: Clone + Send + Sync + Serialize + 'static,
    {
        monitor::notify(
            self.config.monitor.as_ref(),
            WorkflowEvent::WorkflowStarted {
                workflow_id: state.workflow_id().clone(),
            },
        );
        self.run_loop(state, cancel).await
    }

    /// Restores `snapshot` via this executor's registry and re-enters the
    /// step loop with a fresh step counter, emitting `WorkflowResumed`
    /// rather than `WorkflowStarted` (§4.6/§4.7).
    pub async fn resume(&self, snapshot: &SuspensionSnapshot) -> Result<WorkflowResult<S>, SuspensionError>
    where
        S: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
    {
        let state: GraphWorkflowState<S> = snapshot.restore(&self.registry)?;
        monitor::notify(
            self.config.monitor.as_ref(),
            WorkflowEvent::WorkflowResumed {
                workflow_id: state.workflow_id().clone(),
            },
        );
        Ok(self.run_loop(state, &CancelToken::new()).await)
    }

    async fn run_loop(&self, mut state: GraphWorkflowState<S>, cancel: &CancelToken) -> WorkflowResult<S>
    where
        S: Clone + Send + Sync + Serialize + 'static,
    {
        let start = Instant::now();
        let mut step: u64 = 0;
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();

        loop {
            if cancel.is_cancelled() {
                let error = WorkflowError::from(ExecutionError::new(ErrorCode::Cancelled, "execution was cancelled"));
                return self.fail(&state, error);
            }
            if step >= self.config.max_steps {
                let error = WorkflowError::from(ExecutionError::new(
                    ErrorCode::MaxStepsExceeded,
                    format!("exceeded {} steps", self.config.max_steps),
                ));
                return self.fail(&state, error);
            }
            if start.elapsed() > self.config.max_execution_time {
                let error = WorkflowError::from(ExecutionError::new(
                    ErrorCode::ExecutionTimeout,
                    format!("exceeded {:?}", self.config.max_execution_time),
                ));
                return self.fail(&state, error);
            }

            let current_id = match state.current_node() {
                Some(id) => id.clone(),
                None => {
                    let workflow_id = state.workflow_id().clone();
                    let value = state.data().clone();
                    let context = state.context().clone();
                    return self.succeed(workflow_id, value, context);
                }
            };

            let node = match self.topology.node(&current_id).map(Arc::clone) {
                Some(node) => node,
                None => {
                    let error = WorkflowError::from(
                        ExecutionError::new(
                            ErrorCode::NodeNotFound,
                            format!("node {current_id} is not registered in the topology"),
                        )
                        .at_node(current_id.clone()),
                    );
                    return self.fail(&state, error);
                }
            };

            if self.config.detect_cycles {
                if visited.contains(&current_id) && !self.config.allow_cycles {
                    let error = WorkflowError::from(
                        ExecutionError::new(ErrorCode::CycleDetected, format!("node {current_id} revisited"))
                            .at_node(current_id.clone()),
                    );
                    return self.fail(&state, error);
                }
                visited.insert(current_id.clone());
            }

            monitor::notify(
                self.config.monitor.as_ref(),
                WorkflowEvent::NodeStarted {
                    node_id: current_id.clone(),
                },
            );
            let node_start = Instant::now();
            let command = match node.process(&state, cancel).await {
                Ok(command) => command,
                Err(error) => {
                    monitor::notify(
                        self.config.monitor.as_ref(),
                        WorkflowEvent::NodeError {
                            node_id: current_id.clone(),
                            error: error.clone(),
                        },
                    );
                    return self.fail(&state, error);
                }
            };
            monitor::notify(
                self.config.monitor.as_ref(),
                WorkflowEvent::NodeCompleted {
                    node_id: current_id.clone(),
                    duration: node_start.elapsed(),
                },
            );

            match command {
                Command::Complete { result, context_updates } => {
                    let next = state.complete(&context_updates);
                    let workflow_id = next.workflow_id().clone();
                    let context = next.context().clone();
                    return self.succeed(workflow_id, result, context);
                }
                Command::Error(error) => {
                    monitor::notify(
                        self.config.monitor.as_ref(),
                        WorkflowEvent::NodeError {
                            node_id: current_id.clone(),
                            error: error.clone(),
                        },
                    );
                    return self.fail(&state, error);
                }
                Command::Suspend { context_updates, reason, .. } => {
                    let parked = state.with_context_updates(&context_updates);
                    monitor::notify(
                        self.config.monitor.as_ref(),
                        WorkflowEvent::WorkflowSuspended {
                            workflow_id: parked.workflow_id().clone(),
                            reason: reason.clone(),
                        },
                    );
                    let snapshot = match SuspensionSnapshot::capture(&parked, &self.registry) {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            let error = WorkflowError::from(ExecutionError::new(
                                ErrorCode::NodeExecutionError,
                                format!("failed to capture suspension snapshot: {err}"),
                            ));
                            return self.fail(&parked, error);
                        }
                    };
                    return WorkflowResult::Suspended {
                        workflow_id: parked.workflow_id().clone(),
                        snapshot,
                        reason,
                    };
                }
                Command::Traverse {
                    target,
                    context_updates,
                    new_data,
                } => match self.topology.edge(&current_id, &target).cloned() {
                    Some(edge) => {
                        if !edge.holds(&state) {
                            let error = WorkflowError::from(
                                ExecutionError::new(
                                    ErrorCode::ConditionFailed,
                                    format!("edge {current_id} -> {target} condition did not hold"),
                                )
                                .at_node(current_id.clone()),
                            );
                            return self.fail(&state, error);
                        }
                        let with_edge = context_updates.with(&last_edge_id_key(), edge.id().clone());
                        monitor::notify(
                            self.config.monitor.as_ref(),
                            WorkflowEvent::NodeTransition {
                                edge_id: Some(edge.id().clone()),
                                from: current_id,
                                to: target.clone(),
                            },
                        );
                        state = state.traverse(target, &with_edge, new_data);
                    }
                    None => {
                        monitor::notify(
                            self.config.monitor.as_ref(),
                            WorkflowEvent::Warning {
                                message: format!("no declared edge {current_id} -> {target}; transitioning anyway"),
                            },
                        );
                        monitor::notify(
                            self.config.monitor.as_ref(),
                            WorkflowEvent::NodeTransition {
                                edge_id: None,
                                from: current_id,
                                to: target.clone(),
                            },
                        );
                        state = state.traverse(target, &context_updates, new_data);
                    }
                },
                Command::Fork {
                    targets,
                    context_updates,
                    branch_data_factory,
                } => match concurrency::run_fork(self, &state, targets, context_updates, branch_data_factory, cancel).await {
                    Ok(outcome) => {
                        let with_results = outcome.context.with(&fork_results_key::<S>(), outcome.results);
                        state = state.suspend_at_join(&with_results);
                    }
                    Err(error) => return self.fail(&state, error),
                },
                Command::Join { context_updates } => {
                    // A no-op outside a fork region (§4.3): merge the
                    // updates and let the next iteration's terminal check
                    // converge the workflow to success.
                    state = state.suspend_at_join(&context_updates);
                }
            }

            step += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Node;
    use crate::errors::ValidationError;
    use crate::topology::GraphBuilder;
    use async_trait::async_trait;

    struct Appender {
        id: NodeId,
        next: Option<NodeId>,
        suffix: String,
    }

    #[async_trait]
    impl Node<String> for Appender {
        async fn process(&self, state: &GraphWorkflowState<String>, _cancel: &CancelToken) -> Result<Command<String>, WorkflowError> {
            let mut value = state.data().clone();
            value.push_str(&self.suffix);
            match &self.next {
                Some(next) => Ok(Command::Traverse {
                    target: next.clone(),
                    context_updates: WorkflowContext::new(),
                    new_data: Some(value),
                }),
                None => Ok(Command::Complete {
                    result: value,
                    context_updates: WorkflowContext::new(),
                }),
            }
        }

        fn node_id(&self) -> &NodeId {
            &self.id
        }
    }

    fn node(name: &str) -> NodeId {
        NodeId::new(name).unwrap()
    }

    fn build_linear_topology() -> Topology<String> {
        let a = Arc::new(Appender {
            id: node("a"),
            next: Some(node("b")),
            suffix: "A".into(),
        });
        let b = Arc::new(Appender {
            id: node("b"),
            next: Some(node("c")),
            suffix: "B".into(),
        });
        let c = Arc::new(Appender {
            id: node("c"),
            next: None,
            suffix: "C".into(),
        });
        GraphBuilder::new()
            .add_node(a)
            .add_node(b)
            .add_node(c)
            .add_edge(node("a"), node("b"))
            .add_edge(node("b"), node("c"))
            .entry_point(node("a"))
            .build()
            .unwrap()
    }

    fn linear_executor(config: ExecutorConfig) -> Executor<String> {
        Executor::new(Arc::new(build_linear_topology()), config, Arc::new(ContextRegistry::new()))
    }

    #[tokio::test]
    async fn linear_sequence_completes_with_concatenated_value() {
        let executor = linear_executor(ExecutorConfig::default());
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("a"), String::new());
        match executor.execute(state).await {
            WorkflowResult::Success { value, final_context } => {
                assert_eq!(value, "ABC");
                assert_eq!(
                    final_context.get(&last_edge_id_key()),
                    Some(&EdgeId::new("b->c#1").unwrap())
                );
            }
            _ => panic!("expected success"),
        }
    }

    struct LoopsForever {
        id: NodeId,
        target: NodeId,
    }

    #[async_trait]
    impl Node<u32> for LoopsForever {
        async fn process(&self, _state: &GraphWorkflowState<u32>, _cancel: &CancelToken) -> Result<Command<u32>, WorkflowError> {
            Ok(Command::traverse(self.target.clone()))
        }

        fn node_id(&self) -> &NodeId {
            &self.id
        }
    }

    #[tokio::test]
    async fn cycle_is_detected() {
        let a = Arc::new(LoopsForever { id: node("a"), target: node("b") });
        let b = Arc::new(LoopsForever { id: node("b"), target: node("a") });
        let topology = GraphBuilder::new()
            .add_node(a)
            .add_node(b)
            .add_edge(node("a"), node("b"))
            .add_edge(node("b"), node("a"))
            .entry_point(node("a"))
            .build()
            .unwrap();
        let executor = Executor::new(Arc::new(topology), ExecutorConfig::default(), Arc::new(ContextRegistry::new()));
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("a"), 0u32);
        match executor.execute(state).await {
            WorkflowResult::Failure { error, .. } => assert_eq!(error.code(), ErrorCode::CycleDetected),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn max_steps_of_one_fails_on_two_hop_graph() {
        let config = ExecutorConfig {
            max_steps: 1,
            ..ExecutorConfig::default()
        };
        let executor = linear_executor(config);
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("a"), String::new());
        match executor.execute(state).await {
            WorkflowResult::Failure { error, .. } => assert_eq!(error.code(), ErrorCode::MaxStepsExceeded),
            _ => panic!("expected failure"),
        }
    }

    struct RejectsEverything(NodeId);

    #[async_trait]
    impl Node<()> for RejectsEverything {
        async fn process(&self, _state: &GraphWorkflowState<()>, _cancel: &CancelToken) -> Result<Command<()>, WorkflowError> {
            Ok(Command::Error(WorkflowError::from(ValidationError::new(
                ErrorCode::ValidationFailed,
                "nope",
            ))))
        }

        fn node_id(&self) -> &NodeId {
            &self.0
        }
    }

    #[tokio::test]
    async fn node_returning_error_short_circuits() {
        let topology = GraphBuilder::new()
            .add_node(Arc::new(RejectsEverything(node("a"))))
            .entry_point(node("a"))
            .build()
            .unwrap();
        let executor = Executor::new(Arc::new(topology), ExecutorConfig::default(), Arc::new(ContextRegistry::new()));
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("a"), ());
        match executor.execute(state).await {
            WorkflowResult::Failure { error, .. } => assert_eq!(error.code(), ErrorCode::ValidationFailed),
            _ => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn already_cancelled_token_fails_before_the_first_node_runs() {
        let executor = linear_executor(ExecutorConfig::default());
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("a"), String::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        match executor.execute_with_cancel(state, &cancel).await {
            WorkflowResult::Failure { error, partial_value, .. } => {
                assert_eq!(error.code(), ErrorCode::Cancelled);
                assert_eq!(partial_value, Some(String::new()));
            }
            _ => panic!("expected a cancelled failure"),
        }
    }

    #[tokio::test]
    async fn resume_restores_a_snapshot_and_emits_workflow_resumed() {
        use crate::monitor::MemoryMonitor;
        use crate::suspension::ContextRegistry;

        let monitor = Arc::new(MemoryMonitor::new());
        let registry = Arc::new(ContextRegistry::new());
        let executor = Executor::new(
            Arc::new(build_linear_topology()),
            ExecutorConfig { monitor: monitor.clone(), ..ExecutorConfig::default() },
            Arc::clone(&registry),
        );

        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), node("b"), "A".to_string());
        let snapshot = SuspensionSnapshot::capture(&state, &registry).unwrap();

        match executor.resume(&snapshot).await.unwrap() {
            WorkflowResult::Success { value, .. } => assert_eq!(value, "ABC"),
            _ => panic!("expected resumed workflow to complete"),
        }
        assert!(monitor
            .snapshot()
            .iter()
            .any(|event| matches!(event, WorkflowEvent::WorkflowResumed { .. })));
    }
}
