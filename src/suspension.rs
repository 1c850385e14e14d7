//! Capturing and restoring workflow state across process boundaries.
//!
//! Grounded on the teacher's `runtimes::checkpointer::Checkpoint`
//! (session id, step, versioned state, frontier, captured as a plain
//! struct off `SessionState`) and `runtimes::session::SessionInit`
//! (`Fresh`/`Resumed { checkpoint_step }`), generalized from an
//! in-process-only snapshot to the serializable, versioned wire layout
//! §6 specifies, and replacing the source's reflection-based type
//! resolution with the explicit [`ContextRegistry`] the design notes call
//! for.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::WorkflowContext;
use crate::ids::{NodeId, WorkflowId};
use crate::position::{GraphPosition, StateMetadata};
use crate::state::GraphWorkflowState;

/// `(major, minor)` schema version. Resume requires the major component to
/// match; minor mismatches are accepted and may pass through
/// [`ContextRegistry::migrate`].
pub const CURRENT_WORKFLOW_VERSION: (u32, u32) = (1, 0);

/// Errors that can occur while restoring a snapshot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SuspensionError {
    #[error("snapshot major version {found} is incompatible with supported major version {expected}")]
    IncompatibleVersion { expected: u32, found: u32 },
    #[error("failed to decode user data: {0}")]
    DataDecode(String),
    #[error("snapshot position is invalid (empty path)")]
    InvalidPosition,
}

type Serializer = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<serde_json::Value> + Send + Sync>;
type Deserializer = Arc<dyn Fn(serde_json::Value) -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// Maps a context value's type name to the functions needed to serialize
/// and reconstruct it, replacing runtime type discovery with an explicit,
/// locally-scoped table (§9 "Reflection-based serializer").
#[derive(Clone, Default)]
pub struct ContextRegistry {
    by_type_name: FxHashMap<&'static str, (Serializer, Deserializer)>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context value type so it can survive a serialize/restore
    /// round-trip. Types left unregistered are dropped on restore with a
    /// warning rather than failing the whole snapshot (§4.6).
    #[must_use]
    pub fn register<T>(mut self) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<T>();
        let serialize: Serializer = Arc::new(|value| {
            value
                .downcast_ref::<T>()
                .and_then(|v| serde_json::to_value(v).ok())
        });
        let deserialize: Deserializer = Arc::new(|json| {
            serde_json::from_value::<T>(json)
                .ok()
                .map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>)
        });
        self.by_type_name.insert(type_name, (serialize, deserialize));
        self
    }

    fn serialize(&self, type_name: &str, value: &(dyn Any + Send + Sync)) -> Option<serde_json::Value> {
        self.by_type_name.get(type_name).and_then(|(ser, _)| ser(value))
    }

    fn deserialize(&self, type_name: &str, json: serde_json::Value) -> Option<Arc<dyn Any + Send + Sync>> {
        self.by_type_name
            .get(type_name)
            .and_then(|(_, de)| de(json))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextEntry {
    value: serde_json::Value,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PositionData {
    depth: u64,
    path: Vec<NodeId>,
    #[serde(rename = "previousNode", skip_serializing_if = "Option::is_none")]
    previous_node: Option<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataData {
    version: u64,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "lastModified")]
    last_modified: DateTime<Utc>,
}

/// The wire layout from §6: a serializable capture of a
/// [`GraphWorkflowState`] plus the version stamps needed to validate
/// compatibility on resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionSnapshot {
    #[serde(rename = "workflowVersion")]
    workflow_version: String,
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "workflowId")]
    workflow_id: WorkflowId,
    #[serde(rename = "stateData")]
    state_data: serde_json::Value,
    #[serde(rename = "currentNode", skip_serializing_if = "Option::is_none")]
    current_node: Option<NodeId>,
    #[serde(rename = "contextData")]
    context_data: FxHashMap<String, ContextEntry>,
    #[serde(rename = "positionData")]
    position_data: PositionData,
    #[serde(rename = "metadataData")]
    metadata_data: MetadataData,
    #[serde(rename = "serializedAt")]
    serialized_at: DateTime<Utc>,
    #[serde(rename = "stateDataType")]
    state_data_type: String,
}

impl SuspensionSnapshot {
    /// Captures `state`, serializing `S` directly and every registered
    /// context entry via `registry`.
    pub fn capture<S>(state: &GraphWorkflowState<S>, registry: &ContextRegistry) -> Result<Self, SuspensionError>
    where
        S: Serialize + 'static,
    {
        let state_data = serde_json::to_value(state.data())
            .map_err(|e| SuspensionError::DataDecode(e.to_string()))?;

        let mut context_data = FxHashMap::default();
        for (name, type_name, value) in state.context().raw_entries() {
            if let Some(json) = registry.serialize(type_name, value.as_ref()) {
                context_data.insert(
                    name.to_string(),
                    ContextEntry {
                        value: json,
                        type_name: type_name.to_string(),
                    },
                );
            } else {
                tracing::warn!(key = name, r#type = type_name, "context value has no registered serializer; dropped");
            }
        }

        Ok(Self {
            workflow_version: format!("{}.{}", CURRENT_WORKFLOW_VERSION.0, CURRENT_WORKFLOW_VERSION.1),
            schema_version: 1,
            workflow_id: state.workflow_id().clone(),
            state_data,
            current_node: state.current_node().cloned(),
            context_data,
            position_data: PositionData {
                depth: state.position().depth(),
                path: state.position().path().to_vec(),
                previous_node: state.position().previous().cloned(),
            },
            metadata_data: MetadataData {
                version: state.metadata().version(),
                created_at: state.metadata().created_at(),
                last_modified: state.metadata().last_modified(),
            },
            serialized_at: Utc::now(),
            state_data_type: std::any::type_name::<S>().to_string(),
        })
    }

    /// Restores a [`GraphWorkflowState`], rejecting a major-version
    /// mismatch and dropping unregistered context entries with a warning.
    /// A minor-version mismatch is passed through [`IdentityMigration`]; to
    /// supply a real transform, call [`SuspensionSnapshot::restore_with_migration`]
    /// instead.
    pub fn restore<S>(&self, registry: &ContextRegistry) -> Result<GraphWorkflowState<S>, SuspensionError>
    where
        S: DeserializeOwned + 'static,
    {
        self.restore_with_migration(registry, &IdentityMigration)
    }

    /// As [`SuspensionSnapshot::restore`], but running the decoded
    /// `stateData` through `migration` whenever the snapshot's minor
    /// version differs from [`CURRENT_WORKFLOW_VERSION`]'s (§4.6).
    pub fn restore_with_migration<S>(
        &self,
        registry: &ContextRegistry,
        migration: &dyn Migration,
    ) -> Result<GraphWorkflowState<S>, SuspensionError>
    where
        S: DeserializeOwned + 'static,
    {
        let (found_major, found_minor) = self.parsed_version();
        if found_major != CURRENT_WORKFLOW_VERSION.0 {
            return Err(SuspensionError::IncompatibleVersion {
                expected: CURRENT_WORKFLOW_VERSION.0,
                found: found_major,
            });
        }

        let state_data = if found_minor == CURRENT_WORKFLOW_VERSION.1 {
            self.state_data.clone()
        } else {
            migration.migrate((found_major, found_minor), CURRENT_WORKFLOW_VERSION, self.state_data.clone())
        };

        let data: S = serde_json::from_value(state_data)
            .map_err(|e| SuspensionError::DataDecode(e.to_string()))?;

        let mut entries = Vec::new();
        for (name, entry) in &self.context_data {
            match registry.deserialize(&entry.type_name, entry.value.clone()) {
                Some(value) => entries.push((Arc::<str>::from(name.as_str()), leak_type_name(&entry.type_name), value)),
                None => tracing::warn!(key = name, r#type = entry.type_name, "no registered reconstructor; dropped"),
            }
        }
        let context = WorkflowContext::from_raw_entries(entries);

        let position = GraphPosition::from_parts(
            self.position_data.depth,
            self.position_data.path.clone(),
            self.position_data.previous_node.clone(),
        )
        .ok_or(SuspensionError::InvalidPosition)?;

        let metadata = StateMetadata::from_parts(
            self.metadata_data.version,
            self.metadata_data.created_at,
            self.metadata_data.last_modified,
        );

        Ok(GraphWorkflowState::from_parts(
            self.workflow_id.clone(),
            data,
            context,
            self.current_node.clone(),
            position,
            metadata,
        ))
    }

    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn current_node(&self) -> Option<&NodeId> {
        self.current_node.as_ref()
    }

    fn parsed_version(&self) -> (u32, u32) {
        let mut parts = self.workflow_version.split('.');
        let major = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        (major, minor)
    }
}

/// Leaks a type name string read back from a snapshot so it can stand in
/// for the `&'static str` the in-memory context uses as a slot key.
/// Snapshot restoration happens at most once per resumed workflow, so this
/// trades a small, bounded amount of memory for keeping `WorkflowContext`'s
/// slot representation uniform between freshly-built and restored contexts.
fn leak_type_name(name: &str) -> &'static str {
    Box::leak(name.to_string().into_boxed_str())
}

/// Transforms a serialized payload between two minor versions of the same
/// major version (§4.6 "A `migrate(from, to)` hook"). The default
/// implementation is the identity; callers with evolving context schemas
/// supply their own.
pub trait Migration: Send + Sync {
    fn migrate(&self, from: (u32, u32), to: (u32, u32), payload: serde_json::Value) -> serde_json::Value;
}

/// A migration that performs no transformation.
pub struct IdentityMigration;

impl Migration for IdentityMigration {
    fn migrate(&self, _from: (u32, u32), _to: (u32, u32), payload: serde_json::Value) -> serde_json::Value {
        payload
    }
}
