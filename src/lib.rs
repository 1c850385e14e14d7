//! # graphloom: a graph workflow engine for agent orchestration
//!
//! graphloom drives a typed, versioned state value through a directed graph
//! of nodes. Each node inspects the current state and returns a
//! [`Command`](command::Command) telling the interpreter what to do next —
//! traverse an edge, fork into parallel branches, suspend, or complete the
//! workflow. State is immutable: every operation returns a new
//! [`GraphWorkflowState`](state::GraphWorkflowState) rather than mutating
//! one in place.
//!
//! ## Core concepts
//!
//! - **State** ([`state`]): an immutable, versioned snapshot carrying the
//!   caller's data, a typed [`WorkflowContext`](context::WorkflowContext),
//!   and the workflow's current position in the graph.
//! - **Topology** ([`topology`]): the validated graph of nodes and
//!   conditional edges a workflow runs against.
//! - **Interpreter** ([`interpreter`]): the step loop that drives a state
//!   through a topology one command at a time.
//! - **Concurrency** ([`concurrency`]): fork/join scheduling for
//!   independent sub-executions.
//! - **Routing and strategies** ([`routing`], [`strategy`]): content-based
//!   routing and the four data-flow combinators (sequential, parallel,
//!   conditional, batch) nodes can build on.
//! - **Suspension** ([`suspension`]): capturing and restoring state across
//!   process boundaries.
//! - **Monitor** ([`monitor`]): passive observation of execution events.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::{Arc, OnceLock};
//! use async_trait::async_trait;
//! use graphloom::command::{Command, Node};
//! use graphloom::concurrency::CancelToken;
//! use graphloom::context::WorkflowContext;
//! use graphloom::errors::WorkflowError;
//! use graphloom::ids::{NodeId, WorkflowId};
//! use graphloom::interpreter::{Executor, ExecutorConfig, WorkflowResult};
//! use graphloom::state::GraphWorkflowState;
//! use graphloom::suspension::ContextRegistry;
//! use graphloom::topology::GraphBuilder;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Node<String> for Greet {
//!     async fn process(&self, state: &GraphWorkflowState<String>, _cancel: &CancelToken) -> Result<Command<String>, WorkflowError> {
//!         Ok(Command::Complete {
//!             result: format!("hello, {}", state.data()),
//!             context_updates: WorkflowContext::new(),
//!         })
//!     }
//!
//!     fn node_id(&self) -> &NodeId {
//!         static ID: OnceLock<NodeId> = OnceLock::new();
//!         ID.get_or_init(|| NodeId::new("greet").unwrap())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let entry = NodeId::new("greet")?;
//! let topology = GraphBuilder::new()
//!     .add_node(Arc::new(Greet))
//!     .entry_point(entry.clone())
//!     .build()
//!     .map_err(|errors| format!("{} validation error(s)", errors.len()))?;
//!
//! let executor = Executor::new(Arc::new(topology), ExecutorConfig::default(), Arc::new(ContextRegistry::new()));
//! let state = GraphWorkflowState::new(WorkflowId::new("wf-1")?, entry, "world".to_string());
//!
//! match executor.execute(state).await {
//!     WorkflowResult::Success { value, .. } => assert_eq!(value, "hello, world"),
//!     _ => panic!("expected success"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module guide
//!
//! - [`ids`] - opaque workflow/node/edge identifiers
//! - [`context`] - the typed side-channel map nodes and the interpreter share
//! - [`position`] - a workflow's depth/path/metadata bookkeeping
//! - [`state`] - the immutable, versioned state value the interpreter drives
//! - [`command`] - the `Node` trait and the commands a node can return
//! - [`topology`] - graph construction and validation
//! - [`interpreter`] - the step loop
//! - [`concurrency`] - fork/join scheduling
//! - [`routing`] - content-based routing over named routes
//! - [`strategy`] - sequential/parallel/conditional/batch data-flow combinators
//! - [`suspension`] - snapshotting and restoring state across process boundaries
//! - [`monitor`] - passive observation of execution events
//! - [`errors`] - the error taxonomy and diagnostics formatting

pub mod command;
pub mod concurrency;
pub mod context;
pub mod errors;
pub mod ids;
pub mod interpreter;
pub mod monitor;
pub mod position;
pub mod routing;
pub mod state;
pub mod strategy;
pub mod suspension;
pub mod topology;
