//! Position and versioning metadata carried alongside workflow state.

use chrono::{DateTime, Utc};

use crate::ids::NodeId;

/// Where a workflow execution currently stands in the topology.
///
/// `depth` counts traversals since the entry node; `path` records every
/// node visited in order, including the current one. Forked branches each
/// receive a sibling position whose `path` diverges from the fork point,
/// the way the teacher's `GraphPosition` equivalent (frontier/step
/// tracking in `runtimes::runner::SessionState`) keeps per-branch history
/// distinct after a fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphPosition {
    depth: u64,
    path: Vec<NodeId>,
    previous: Option<NodeId>,
}

impl GraphPosition {
    /// The initial position at a given entry node: depth zero, a
    /// single-element path, no previous node.
    pub fn initial(entry: NodeId) -> Self {
        Self {
            depth: 0,
            path: vec![entry],
            previous: None,
        }
    }

    /// Current depth (number of traversals taken so far).
    pub fn depth(&self) -> u64 {
        self.depth
    }

    /// The ordered sequence of nodes visited, including the current one.
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    /// The node visited immediately before the current one, if any.
    pub fn previous(&self) -> Option<&NodeId> {
        self.previous.as_ref()
    }

    /// The node this position currently names (the last entry in `path`).
    pub fn current(&self) -> &NodeId {
        self.path.last().expect("path is never empty")
    }

    /// Advances to `target`, incrementing depth and appending to the path.
    #[must_use]
    pub fn advance(&self, target: NodeId) -> Self {
        let mut path = self.path.clone();
        let previous = path.last().cloned();
        path.push(target);
        Self {
            depth: self.depth + 1,
            path,
            previous,
        }
    }

    /// Creates a sibling position for a forked branch: same depth and path
    /// up to and including the fork point, then diverging to `target`.
    #[must_use]
    pub fn fork_to(&self, target: NodeId) -> Self {
        self.advance(target)
    }

    /// Restores a position directly, e.g. when rehydrating a suspension
    /// snapshot. The path-rehydration policy is left to callers (§9 Open
    /// Questions); this constructor performs no validation beyond
    /// requiring a non-empty path.
    pub fn from_parts(depth: u64, path: Vec<NodeId>, previous: Option<NodeId>) -> Option<Self> {
        if path.is_empty() {
            return None;
        }
        Some(Self {
            depth,
            path,
            previous,
        })
    }
}

/// Monotonic version and wall-clock bookkeeping for a
/// [`GraphWorkflowState`](crate::state::GraphWorkflowState).
///
/// `version` starts at 1 and strictly increases along any derivation chain
/// (invariant I3). `created_at` is fixed at the state's birth; `last_modified`
/// is refreshed on every derivation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateMetadata {
    version: u64,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
}

impl StateMetadata {
    /// Metadata for a freshly created state: version 1, both timestamps
    /// equal to `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: 1,
            created_at: now,
            last_modified: now,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// Produces the metadata for a derived state: version bumped by one,
    /// `last_modified` refreshed, `created_at` preserved.
    #[must_use]
    pub fn derive(&self, now: DateTime<Utc>) -> Self {
        Self {
            version: self.version + 1,
            created_at: self.created_at,
            last_modified: now,
        }
    }

    /// Reconstructs metadata from persisted parts, e.g. on suspension
    /// resume, without bumping the version.
    pub fn from_parts(version: u64, created_at: DateTime<Utc>, last_modified: DateTime<Utc>) -> Self {
        Self {
            version,
            created_at,
            last_modified,
        }
    }
}
