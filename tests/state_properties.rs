//! Property-based coverage for state invariants that hold for arbitrary
//! inputs, not just the handful of fixed examples exercised elsewhere.

use graphloom::context::{ContextKey, WorkflowContext};
use graphloom::ids::{NodeId, WorkflowId};
use graphloom::state::GraphWorkflowState;
use graphloom::suspension::{ContextRegistry, SuspensionSnapshot};
use proptest::prelude::*;

fn count_key() -> ContextKey<u32> {
    ContextKey::new("count")
}

proptest! {
    /// P1: every derivation strictly increases `metadata.version`, no
    /// matter how many traversals a run makes or what data they carry.
    #[test]
    fn p1_version_strictly_increases_along_any_chain(steps in proptest::collection::vec(any::<u32>(), 1..20)) {
        let mut state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), NodeId::new("n0").unwrap(), 0u32);
        let mut last_version = state.metadata().version();
        for (index, value) in steps.into_iter().enumerate() {
            let next_node = NodeId::new(format!("n{}", index + 1)).unwrap();
            state = state.traverse(next_node, &WorkflowContext::new(), Some(value));
            prop_assert!(state.metadata().version() > last_version);
            last_version = state.metadata().version();
        }
    }

    /// P5: a suspension snapshot round-trips arbitrary registered payloads
    /// and context values byte-for-byte through serialize/deserialize/restore.
    #[test]
    fn p5_suspension_round_trip_preserves_data_and_context(payload in any::<u32>(), count in any::<u32>()) {
        let registry = ContextRegistry::new().register::<u32>();
        let state = GraphWorkflowState::new(WorkflowId::new("wf").unwrap(), NodeId::new("n").unwrap(), payload)
            .with_context_updates(&WorkflowContext::new().with(&count_key(), count));

        let snapshot = SuspensionSnapshot::capture(&state, &registry).unwrap();
        let wire = serde_json::to_string(&snapshot).unwrap();
        let decoded: SuspensionSnapshot = serde_json::from_str(&wire).unwrap();
        let restored: GraphWorkflowState<u32> = decoded.restore(&registry).unwrap();

        prop_assert_eq!(*restored.data(), payload);
        prop_assert_eq!(restored.context().get(&count_key()), Some(&count));
        prop_assert_eq!(restored.metadata().version(), state.metadata().version());
    }
}
