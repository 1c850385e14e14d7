//! Strategies: pure data-flow combinators that run a list of steps against
//! one input, independent of the graph interpreter (§4.5).
//!
//! Grounded on the retrieval pack's `pcastone-orca/src/crates/orca/src/router.rs`
//! (a narrow `async_trait` contract per unit of work, config structs per
//! strategy), adapted from task-id routing decisions to direct
//! `input -> output` value transformation, since the teacher crate has no
//! strategy-combinator concept of its own: a [`StrategyStep`] is a smaller
//! contract than [`crate::command::Node`] — it has no identity in a graph,
//! only `input -> output`, which is what data-flow combinators need.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::task::JoinSet;

use crate::context::{ContextKey, WorkflowContext};
use crate::errors::{ErrorCode, ExecutionError, WorkflowError};

/// A single data-flow step: `input -> output`, with no node identity or
/// routing of its own. Used as the unit of composition for all four
/// strategies.
#[async_trait]
pub trait StrategyStep<S>: Send + Sync {
    async fn call(&self, input: &S, context: &WorkflowContext) -> Result<S, WorkflowError>;

    fn name(&self) -> &str {
        "step"
    }
}

pub fn executed_nodes_key() -> ContextKey<Vec<String>> {
    ContextKey::new("graphloom::executed_nodes")
}

pub fn skipped_nodes_key() -> ContextKey<Vec<String>> {
    ContextKey::new("graphloom::skipped_nodes")
}

fn step_input_key(index: usize) -> ContextKey<serde_json::Value> {
    ContextKey::new(format!("graphloom::step_{index}_input"))
}

fn step_output_key(index: usize) -> ContextKey<serde_json::Value> {
    ContextKey::new(format!("graphloom::step_{index}_output"))
}

fn record_step<S: serde::Serialize>(
    context: &WorkflowContext,
    index: usize,
    input: &S,
    output: &S,
) -> WorkflowContext {
    let mut context = context.clone();
    if let Ok(value) = serde_json::to_value(input) {
        context = context.with(&step_input_key(index), value);
    }
    if let Ok(value) = serde_json::to_value(output) {
        context = context.with(&step_output_key(index), value);
    }
    context
}

fn push_executed(context: &WorkflowContext, name: &str) -> WorkflowContext {
    let mut names = context.get(&executed_nodes_key()).cloned().unwrap_or_default();
    names.push(name.to_string());
    context.with(&executed_nodes_key(), names)
}

fn push_skipped(context: &WorkflowContext, name: &str) -> WorkflowContext {
    let mut names = context.get(&skipped_nodes_key()).cloned().unwrap_or_default();
    names.push(name.to_string());
    context.with(&skipped_nodes_key(), names)
}

/// Wraps a failing step's error under the strategy-specific error code
/// (§7 "Route/strategy failures follow the same pattern with
/// strategy-specific codes"), preserving the original message as detail.
fn strategy_failure(step_name: &str, error: WorkflowError) -> WorkflowError {
    WorkflowError::from(
        ExecutionError::new(
            ErrorCode::StrategyExecutionFailed,
            format!("step \"{step_name}\" failed: {}", error.message()),
        )
        .with_details(serde_json::json!({ "code": error.code().to_string() })),
    )
}

/// The outcome of running a strategy: the resulting value and the context
/// entries the run recorded along the way.
#[derive(Debug)]
pub struct StrategyOutcome<S> {
    pub value: S,
    pub context: WorkflowContext,
}

#[derive(Debug, Clone, Default)]
pub struct SequentialConfig {
    pub continue_on_error: bool,
}

/// Runs `steps` one after another, each fed the previous step's output.
/// With `continue_on_error`, a failing step is skipped (tagged in context)
/// and the last successful output is carried forward instead of aborting.
pub async fn run_sequential<S>(
    steps: &[Arc<dyn StrategyStep<S>>],
    input: S,
    context: WorkflowContext,
    config: &SequentialConfig,
) -> Result<StrategyOutcome<S>, WorkflowError>
where
    S: Clone + serde::Serialize + Send + Sync,
{
    let mut value = input;
    let mut context = context;
    for (index, step) in steps.iter().enumerate() {
        match step.call(&value, &context).await {
            Ok(output) => {
                context = record_step(&context, index, &value, &output);
                context = push_executed(&context, step.name());
                value = output;
            }
            Err(error) => {
                context = push_skipped(&context, step.name());
                if config.continue_on_error {
                    continue;
                }
                return Err(strategy_failure(step.name(), error));
            }
        }
    }
    Ok(StrategyOutcome { value, context })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    List,
    Map,
    First,
}

#[derive(Clone)]
pub struct ParallelConfig {
    pub max_concurrency: Option<usize>,
    pub timeout: Option<Duration>,
    pub fail_fast: bool,
    pub aggregation: Aggregation,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            timeout: None,
            fail_fast: false,
            aggregation: Aggregation::List,
        }
    }
}

pub fn parallel_results_key<S: Send + Sync + 'static>() -> ContextKey<Vec<S>> {
    ContextKey::new("graphloom::parallel_results")
}

pub fn parallel_map_key<S: Send + Sync + 'static>() -> ContextKey<FxHashMap<String, S>> {
    ContextKey::new("graphloom::parallel_map")
}

/// Runs every step in `steps` against the same `input` concurrently.
///
/// `aggregation` determines what the returned value is: `List`/`Map` record
/// every step's result into context (under [`parallel_results_key`] or
/// [`parallel_map_key`]) and pass `input` through unchanged as the returned
/// value, since a single `S` cannot represent "all of them" on its own;
/// `First` substitutes the first step's result (by declaration order, not
/// completion order, to stay deterministic).
pub async fn run_parallel<S>(
    steps: &[Arc<dyn StrategyStep<S>>],
    input: S,
    context: WorkflowContext,
    config: &ParallelConfig,
) -> Result<StrategyOutcome<S>, WorkflowError>
where
    S: Clone + Send + Sync + 'static,
{
    if steps.is_empty() {
        return Ok(StrategyOutcome { value: input, context });
    }

    let limit = config.max_concurrency.unwrap_or(steps.len()).max(1);
    let run_all = async {
        let mut slots: Vec<Option<Result<S, WorkflowError>>> = (0..steps.len()).map(|_| None).collect();
        let mut pending: Vec<usize> = (0..steps.len()).collect();
        pending.reverse();
        let mut set: JoinSet<(usize, Result<S, WorkflowError>)> = JoinSet::new();

        let spawn_next = |set: &mut JoinSet<(usize, Result<S, WorkflowError>)>, pending: &mut Vec<usize>| {
            if let Some(index) = pending.pop() {
                let step = Arc::clone(&steps[index]);
                let input = input.clone();
                let context = context.clone();
                set.spawn(async move {
                    let outcome = step.call(&input, &context).await;
                    (index, outcome)
                });
            }
        };
        for _ in 0..limit {
            spawn_next(&mut set, &mut pending);
        }

        while let Some(joined) = set.join_next().await {
            let (index, outcome) = joined.map_err(|e| {
                WorkflowError::from(ExecutionError::new(
                    ErrorCode::NodeExecutionError,
                    format!("parallel step task did not complete cleanly: {e}"),
                ))
            })?;
            let failed = outcome.is_err();
            slots[index] = Some(outcome);
            if failed && config.fail_fast {
                set.abort_all();
                break;
            }
            spawn_next(&mut set, &mut pending);
        }
        Ok::<_, WorkflowError>(slots)
    };

    let slots = match config.timeout {
        Some(timeout) => tokio::time::timeout(timeout, run_all).await.map_err(|_| {
            WorkflowError::from(ExecutionError::new(ErrorCode::ExecutionTimeout, "parallel strategy exceeded its timeout"))
        })??,
        None => run_all.await?,
    };

    let mut results = Vec::with_capacity(steps.len());
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(value)) => results.push(value),
            Some(Err(error)) => return Err(strategy_failure(steps[index].name(), error)),
            None => {
                return Err(WorkflowError::from(ExecutionError::new(
                    ErrorCode::Cancelled,
                    format!("parallel step {index} was cancelled before completing"),
                )));
            }
        }
    }

    match config.aggregation {
        Aggregation::First => Ok(StrategyOutcome {
            value: results.into_iter().next().unwrap_or(input),
            context,
        }),
        Aggregation::List => {
            let context = context.with(&parallel_results_key::<S>(), results);
            Ok(StrategyOutcome { value: input, context })
        }
        Aggregation::Map => {
            let map: FxHashMap<String, S> = steps.iter().map(|s| s.name().to_string()).zip(results).collect();
            let context = context.with(&parallel_map_key::<S>(), map);
            Ok(StrategyOutcome { value: input, context })
        }
    }
}

pub type Predicate<S> = Arc<dyn Fn(&S, &WorkflowContext) -> bool + Send + Sync>;

pub struct ConditionalBranch<S> {
    pub step: Arc<dyn StrategyStep<S>>,
    pub predicate: Predicate<S>,
}

#[derive(Clone)]
pub struct ConditionalConfig {
    pub short_circuit: bool,
    pub require_at_least_one: bool,
}

impl Default for ConditionalConfig {
    fn default() -> Self {
        Self { short_circuit: false, require_at_least_one: false }
    }
}

/// Runs only the branches whose predicate matches. A predicate that panics
/// is not caught here (panics are a programmer error, not routing data);
/// a predicate that evaluates to `false` simply skips its branch, and `Ok`
/// paired with a later error is still recorded as failure, not skip.
pub async fn run_conditional<S>(
    branches: &[ConditionalBranch<S>],
    input: S,
    context: WorkflowContext,
    config: &ConditionalConfig,
) -> Result<StrategyOutcome<S>, WorkflowError>
where
    S: Clone + serde::Serialize + Send + Sync,
{
    let mut value = input;
    let mut context = context;
    let mut ran_any = false;

    for (index, branch) in branches.iter().enumerate() {
        if !(branch.predicate)(&value, &context) {
            context = push_skipped(&context, branch.step.name());
            continue;
        }
        match branch.step.call(&value, &context).await {
            Ok(output) => {
                context = record_step(&context, index, &value, &output);
                context = push_executed(&context, branch.step.name());
                value = output;
                ran_any = true;
                if config.short_circuit {
                    break;
                }
            }
            Err(error) => {
                context = push_skipped(&context, branch.step.name());
                return Err(strategy_failure(branch.step.name(), error));
            }
        }
    }

    if config.require_at_least_one && !ran_any {
        return Err(WorkflowError::from(ExecutionError::new(
            ErrorCode::ConditionFailed,
            "no conditional branch matched and requireAtLeastOne is set",
        )));
    }

    Ok(StrategyOutcome { value, context })
}

#[derive(Debug, Clone, Copy)]
pub enum BatchInnerStrategy {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub inner: BatchInnerStrategy,
}

/// Partitions `inputs` into chunks of `batch_size`, running `steps`
/// (sequentially per item) over every item in a chunk — concurrently when
/// `inner` is `Parallel`, one at a time when `Sequential` — before moving
/// to the next chunk. Context from every item is folded in, right-biased,
/// in processing order.
pub async fn run_batch<S>(
    steps: &[Arc<dyn StrategyStep<S>>],
    inputs: Vec<S>,
    context: WorkflowContext,
    config: &BatchConfig,
) -> Result<StrategyOutcome<Vec<S>>, WorkflowError>
where
    S: Clone + serde::Serialize + Send + Sync + 'static,
{
    let batch_size = config.batch_size.max(1);
    let mut outputs = Vec::with_capacity(inputs.len());
    let mut context = context;

    for chunk in inputs.chunks(batch_size) {
        match config.inner {
            BatchInnerStrategy::Sequential => {
                for item in chunk {
                    let outcome = run_sequential(steps, item.clone(), context.clone(), &SequentialConfig::default()).await?;
                    context = context.merge(&outcome.context);
                    outputs.push(outcome.value);
                }
            }
            BatchInnerStrategy::Parallel => {
                let mut set: JoinSet<Result<(S, WorkflowContext), WorkflowError>> = JoinSet::new();
                for item in chunk.iter().cloned() {
                    let steps: Vec<_> = steps.to_vec();
                    let context = context.clone();
                    set.spawn(async move {
                        let outcome = run_sequential(&steps, item, context, &SequentialConfig::default()).await?;
                        Ok((outcome.value, outcome.context))
                    });
                }
                let mut chunk_outputs = Vec::with_capacity(chunk.len());
                while let Some(joined) = set.join_next().await {
                    let (value, item_context) = joined.map_err(|e| {
                        WorkflowError::from(ExecutionError::new(
                            ErrorCode::NodeExecutionError,
                            format!("batch item task did not complete cleanly: {e}"),
                        ))
                    })??;
                    context = context.merge(&item_context);
                    chunk_outputs.push(value);
                }
                outputs.extend(chunk_outputs);
            }
        }
    }

    Ok(StrategyOutcome { value: outputs, context })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Append(String);

    #[async_trait]
    impl StrategyStep<String> for Append {
        async fn call(&self, input: &String, _context: &WorkflowContext) -> Result<String, WorkflowError> {
            Ok(format!("{input}{}", self.0))
        }
        fn name(&self) -> &str {
            &self.0
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl StrategyStep<String> for AlwaysFails {
        async fn call(&self, _input: &String, _context: &WorkflowContext) -> Result<String, WorkflowError> {
            Err(WorkflowError::from(ExecutionError::new(ErrorCode::NodeExecutionError, "nope")))
        }
        fn name(&self) -> &str {
            "fails"
        }
    }

    #[tokio::test]
    async fn sequential_chains_outputs_in_order() {
        let steps: Vec<Arc<dyn StrategyStep<String>>> = vec![Arc::new(Append("a".into())), Arc::new(Append("b".into()))];
        let outcome = run_sequential(&steps, String::new(), WorkflowContext::new(), &SequentialConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome.value, "ab");
        assert_eq!(outcome.context.get(&executed_nodes_key()).unwrap(), &vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn sequential_stops_on_error_without_continue_on_error() {
        let steps: Vec<Arc<dyn StrategyStep<String>>> = vec![Arc::new(AlwaysFails), Arc::new(Append("a".into()))];
        let result = run_sequential(&steps, String::new(), WorkflowContext::new(), &SequentialConfig::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sequential_continue_on_error_keeps_last_good_output() {
        let steps: Vec<Arc<dyn StrategyStep<String>>> = vec![Arc::new(Append("a".into())), Arc::new(AlwaysFails)];
        let config = SequentialConfig { continue_on_error: true };
        let outcome = run_sequential(&steps, String::new(), WorkflowContext::new(), &config).await.unwrap();
        assert_eq!(outcome.value, "a");
    }

    #[tokio::test]
    async fn parallel_list_aggregation_records_every_result() {
        let steps: Vec<Arc<dyn StrategyStep<String>>> = vec![Arc::new(Append("x".into())), Arc::new(Append("y".into()))];
        let outcome = run_parallel(&steps, "base-".to_string(), WorkflowContext::new(), &ParallelConfig::default())
            .await
            .unwrap();
        let mut results = outcome.context.get(&parallel_results_key::<String>()).unwrap().clone();
        results.sort();
        assert_eq!(results, vec!["base-x".to_string(), "base-y".to_string()]);
    }

    #[tokio::test]
    async fn conditional_skips_non_matching_predicates() {
        let only_if_empty: Predicate<String> = Arc::new(|s, _| s.is_empty());
        let branches = vec![ConditionalBranch { step: Arc::new(Append("a".into())), predicate: only_if_empty }];
        let outcome = run_conditional(&branches, "not-empty".to_string(), WorkflowContext::new(), &ConditionalConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome.value, "not-empty");
        assert_eq!(outcome.context.get(&skipped_nodes_key()).unwrap(), &vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn batch_processes_all_items_across_chunks() {
        let steps: Vec<Arc<dyn StrategyStep<String>>> = vec![Arc::new(Append("!".into()))];
        let config = BatchConfig { batch_size: 2, inner: BatchInnerStrategy::Parallel };
        let inputs = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let outcome = run_batch(&steps, inputs, WorkflowContext::new(), &config).await.unwrap();
        let mut values = outcome.value;
        values.sort();
        assert_eq!(values, vec!["a!".to_string(), "b!".to_string(), "c!".to_string()]);
    }
}
