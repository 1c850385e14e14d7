//! Content routing: a router node that picks its outgoing edge by analyzing
//! data, and the higher-level Routing Workflow that layers named routes,
//! confidence thresholds, and a fallback on top of it (§4.4).
//!
//! Grounded on the retrieval pack's `orca::router.rs` (`RoutingDecision`,
//! the `Router` trait, `create_router`/strategy-keyed dispatch), adapted
//! from routing between task-id strings to routing between typed route
//! bundles whose node lists run through [`crate::strategy`], since the
//! teacher crate has no routing concept of its own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::WorkflowContext;
use crate::errors::{ErrorCode, ExecutionError, WorkflowError};
use crate::ids::NodeId;
use crate::strategy::{
    self, ConditionalBranch, ConditionalConfig, ParallelConfig, SequentialConfig, StrategyOutcome, StrategyStep,
};

/// The low-confidence error code this module returns when no route clears
/// its threshold and no fallback is configured (§4.4 step 2).
pub const LOW_CONFIDENCE: ErrorCode = ErrorCode::LowConfidence;

pub fn routing_confidence_key() -> crate::context::ContextKey<f64> {
    crate::context::ContextKey::new("graphloom::routing_confidence")
}

pub fn fallback_reason_key() -> crate::context::ContextKey<String> {
    crate::context::ContextKey::new("graphloom::fallback_reason")
}

/// A router's choice among its candidates, with enough detail to explain
/// (or reject) the decision.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub target: NodeId,
    pub confidence: f64,
    pub reasoning: String,
    pub alternatives: Vec<NodeId>,
}

/// Analyzes `data` against `candidates` and picks one.
#[async_trait]
pub trait Router<S>: Send + Sync {
    async fn route(&self, data: &S, candidates: &[NodeId], context: &WorkflowContext) -> Result<RoutingDecision, WorkflowError>;
}

/// The strategy a route's node list runs under. `Batch` is intentionally
/// absent here: it operates over a list of inputs, while a route always
/// dispatches a single value (use [`crate::strategy::run_batch`] directly
/// for list-shaped inputs outside routing).
pub enum RouteStrategy<S> {
    Sequential(SequentialConfig),
    Parallel(ParallelConfig),
    Conditional { branches: Vec<ConditionalBranch<S>>, config: ConditionalConfig },
}

/// A named bundle of nodes executed together once a router selects it.
pub struct Route<S> {
    pub id: String,
    pub description: String,
    pub steps: Vec<Arc<dyn StrategyStep<S>>>,
    pub strategy: RouteStrategy<S>,
    pub confidence_threshold: Option<f64>,
    pub priority: i32,
    pub tags: Vec<String>,
}

impl<S> Route<S> {
    async fn execute(&self, input: S, context: WorkflowContext) -> Result<StrategyOutcome<S>, WorkflowError>
    where
        S: Clone + serde::Serialize + Send + Sync + 'static,
    {
        match &self.strategy {
            RouteStrategy::Sequential(config) => strategy::run_sequential(&self.steps, input, context, config).await,
            RouteStrategy::Parallel(config) => strategy::run_parallel(&self.steps, input, context, config).await,
            RouteStrategy::Conditional { branches, config } => strategy::run_conditional(branches, input, context, config).await,
        }
    }
}

/// Combines a router with a set of named routes and an optional fallback,
/// implementing the three-step procedure from §4.4.
pub struct RoutingWorkflow<S> {
    router: Arc<dyn Router<S>>,
    routes: Vec<Route<S>>,
    workflow_threshold: f64,
    fallback: Option<String>,
}

impl<S> RoutingWorkflow<S>
where
    S: Clone + serde::Serialize + Send + Sync + 'static,
{
    pub fn new(router: Arc<dyn Router<S>>, routes: Vec<Route<S>>, workflow_threshold: f64) -> Self {
        Self { router, routes, workflow_threshold, fallback: None }
    }

    #[must_use]
    pub fn with_fallback(mut self, route_id: impl Into<String>) -> Self {
        self.fallback = Some(route_id.into());
        self
    }

    fn route_by_id(&self, id: &str) -> Option<&Route<S>> {
        self.routes.iter().find(|r| r.id == id)
    }

    /// Runs the three-step routing procedure: invoke the router over the
    /// route ids, check its confidence against the applicable threshold
    /// (falling back, or failing `LOW_CONFIDENCE`, if it doesn't clear the
    /// bar), then execute the chosen route's steps under its strategy.
    pub async fn run(&self, data: S, context: WorkflowContext) -> Result<StrategyOutcome<S>, WorkflowError> {
        let candidates: Vec<NodeId> = self
            .routes
            .iter()
            .filter_map(|r| NodeId::new(r.id.clone()).ok())
            .collect();

        let decision = self.router.route(&data, &candidates, &context).await?;
        let chosen_id = decision.target.as_str();

        let route = match self.route_by_id(chosen_id) {
            Some(route) => route,
            None => {
                return Err(WorkflowError::from(ExecutionError::new(
                    ErrorCode::NodeNotFound,
                    format!("router selected unknown route \"{chosen_id}\""),
                )));
            }
        };

        let threshold = route.confidence_threshold.unwrap_or(self.workflow_threshold);
        if decision.confidence < threshold {
            let context = context.with(&routing_confidence_key(), decision.confidence);
            let reason = format!("Confidence {:.1} below threshold {:.1}", decision.confidence, threshold);
            if let Some(fallback_id) = &self.fallback {
                let fallback = self.route_by_id(fallback_id).ok_or_else(|| {
                    WorkflowError::from(ExecutionError::new(
                        ErrorCode::Misconfigured,
                        format!("fallback route \"{fallback_id}\" is not registered"),
                    ))
                })?;
                let context = context.with(&fallback_reason_key(), reason);
                return fallback.execute(data, context).await;
            }
            return Err(WorkflowError::from(ExecutionError::new(
                LOW_CONFIDENCE,
                format!(
                    "router confidence {:.2} for route \"{chosen_id}\" is below threshold {:.2}: {}",
                    decision.confidence, threshold, decision.reasoning
                ),
            )));
        }

        route.execute(data, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{executed_nodes_key, SequentialConfig};

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

    struct AlwaysPicks(&'static str, f64);

    #[async_trait]
    impl Router<String> for AlwaysPicks {
        async fn route(&self, _data: &String, candidates: &[NodeId], _context: &WorkflowContext) -> Result<RoutingDecision, WorkflowError> {
            Ok(RoutingDecision {
                target: NodeId::new(self.0).unwrap(),
                confidence: self.1,
                reasoning: "fixed choice".into(),
                alternatives: candidates.to_vec(),
            })
        }
    }

    fn sequential_route(id: &str, suffix: &str, threshold: Option<f64>) -> Route<String> {
        Route {
            id: id.to_string(),
            description: String::new(),
            steps: vec![Arc::new(Append(suffix.to_string()))],
            strategy: RouteStrategy::Sequential(SequentialConfig::default()),
            confidence_threshold: threshold,
            priority: 0,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn confident_route_executes_its_steps() {
        let workflow = RoutingWorkflow::new(
            Arc::new(AlwaysPicks("fast", 0.9)),
            vec![sequential_route("fast", "-fast", None), sequential_route("slow", "-slow", None)],
            0.5,
        );
        let outcome = workflow.run("in".to_string(), WorkflowContext::new()).await.unwrap();
        assert_eq!(outcome.value, "in-fast");
        assert_eq!(outcome.context.get(&executed_nodes_key()).unwrap(), &vec!["-fast".to_string()]);
    }

    #[tokio::test]
    async fn low_confidence_without_fallback_fails() {
        let workflow = RoutingWorkflow::new(Arc::new(AlwaysPicks("fast", 0.1)), vec![sequential_route("fast", "-fast", None)], 0.5);
        let result = workflow.run("in".to_string(), WorkflowContext::new()).await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::LowConfidence);
    }

    #[tokio::test]
    async fn low_confidence_with_fallback_runs_fallback_route() {
        let workflow = RoutingWorkflow::new(
            Arc::new(AlwaysPicks("fast", 0.1)),
            vec![sequential_route("fast", "-fast", None), sequential_route("safe", "-safe", None)],
            0.5,
        )
        .with_fallback("safe");
        let outcome = workflow.run("in".to_string(), WorkflowContext::new()).await.unwrap();
        assert_eq!(outcome.value, "in-safe");
        assert_eq!(outcome.context.get(&routing_confidence_key()), Some(&0.1));
        assert!(outcome.context.get(&fallback_reason_key()).unwrap().contains("below threshold"));
    }

    #[tokio::test]
    async fn per_route_threshold_overrides_workflow_threshold() {
        let workflow = RoutingWorkflow::new(
            Arc::new(AlwaysPicks("fast", 0.6)),
            vec![sequential_route("fast", "-fast", Some(0.8))],
            0.1,
        );
        let result = workflow.run("in".to_string(), WorkflowContext::new()).await;
        assert_eq!(result.unwrap_err().code(), ErrorCode::LowConfidence);
    }
}
