//! The error taxonomy: `ValidationError`, `ExecutionError`, `SystemError`,
//! `SecurityError`, unified under `WorkflowError`.
//!
//! Structurally this mirrors `channels::errors::ErrorEvent`/`LadderError` in
//! the teacher crate — a timestamped, taggable, JSON-context-carrying record
//! with a pretty-printer gated on TTY detection — generalized from a single
//! free-text `LadderError` to four typed causes with error codes and an
//! explicit recoverability classification, and annotated with
//! `miette::Diagnostic` behind the `diagnostics` feature the way the
//! teacher's `NodeError` is.

use std::io::IsTerminal;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::NodeId;

/// Stable, machine-matchable error codes referenced throughout §7/§8 of the
/// governing specification (e.g. `MAX_STEPS_EXCEEDED`, `CYCLE_DETECTED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MaxStepsExceeded,
    ExecutionTimeout,
    NodeNotFound,
    CycleDetected,
    NodeExecutionError,
    ConditionFailed,
    LowConfidence,
    StrategyExecutionFailed,
    ValidationFailed,
    ResourceUnavailable,
    Misconfigured,
    Bug,
    Unauthorized,
    Cancelled,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::MaxStepsExceeded => "MAX_STEPS_EXCEEDED",
            ErrorCode::ExecutionTimeout => "EXECUTION_TIMEOUT",
            ErrorCode::NodeNotFound => "NODE_NOT_FOUND",
            ErrorCode::CycleDetected => "CYCLE_DETECTED",
            ErrorCode::NodeExecutionError => "NODE_EXECUTION_ERROR",
            ErrorCode::ConditionFailed => "CONDITION_FAILED",
            ErrorCode::LowConfidence => "LOW_CONFIDENCE",
            ErrorCode::StrategyExecutionFailed => "STRATEGY_EXECUTION_FAILED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::ResourceUnavailable => "RESOURCE_UNAVAILABLE",
            ErrorCode::Misconfigured => "MISCONFIGURED",
            ErrorCode::Bug => "BUG",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Severity of a [`SystemError`]. `Critical` is never recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Topology or configuration invalid; fatal at construction.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ValidationError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Node threw, timed out, a cycle was detected, max steps were hit, or a
/// traverse condition failed.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ExecutionError {
    pub code: ErrorCode,
    pub message: String,
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

impl ExecutionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
            recoverable: !matches!(code, ErrorCode::Bug),
        }
    }

    #[must_use]
    pub fn at_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

/// Resource unavailable, misconfigured component, or an engine bug.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code} ({severity:?}): {message}")]
pub struct SystemError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SystemError {
    pub fn new(code: ErrorCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn recoverable(&self) -> bool {
        self.severity != Severity::Critical
    }
}

/// Authorization/authentication denial. Always surfaced as fatal.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct SecurityError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SecurityError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }
}

/// The single error type a caller ever observes, per §7's propagation
/// policy: inner causes live on the variant itself, never nested further.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum WorkflowError {
    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(graphloom::validation)))]
    Validation(ValidationError),
    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(graphloom::execution)))]
    Execution(ExecutionError),
    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(graphloom::system)))]
    System(SystemError),
    #[error(transparent)]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(graphloom::security)))]
    Security(SecurityError),
}

impl WorkflowError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkflowError::Validation(e) => e.code,
            WorkflowError::Execution(e) => e.code,
            WorkflowError::System(e) => e.code,
            WorkflowError::Security(e) => e.code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            WorkflowError::Validation(e) => &e.message,
            WorkflowError::Execution(e) => &e.message,
            WorkflowError::System(e) => &e.message,
            WorkflowError::Security(e) => &e.message,
        }
    }

    /// The node this error originated at, when applicable (§7 "User-visible
    /// behavior": a failure always includes the originating node).
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            WorkflowError::Execution(e) => e.node_id.as_ref(),
            _ => None,
        }
    }

    pub fn recoverable(&self) -> bool {
        match self {
            WorkflowError::Validation(_) => false,
            WorkflowError::Execution(e) => e.recoverable,
            WorkflowError::System(e) => e.recoverable(),
            WorkflowError::Security(_) => false,
        }
    }
}

impl From<ValidationError> for WorkflowError {
    fn from(e: ValidationError) -> Self {
        WorkflowError::Validation(e)
    }
}
impl From<ExecutionError> for WorkflowError {
    fn from(e: ExecutionError) -> Self {
        WorkflowError::Execution(e)
    }
}
impl From<SystemError> for WorkflowError {
    fn from(e: SystemError) -> Self {
        WorkflowError::System(e)
    }
}
impl From<SecurityError> for WorkflowError {
    fn from(e: SecurityError) -> Self {
        WorkflowError::Security(e)
    }
}

/// Where, in the running engine, an error record originated. Generalizes
/// the teacher's `ErrorScope` (node/scheduler/runner/app) to this crate's
/// component boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ErrorScope {
    Node { node_id: String, step: u64 },
    ForkGroup { fork_id: String },
    Interpreter { step: u64 },
    #[default]
    Workflow,
}

/// A structured, serializable error record suitable for monitor consumption
/// and pretty-printing — the `ErrorEvent` equivalent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub when: DateTime<Utc>,
    pub scope: ErrorScope,
    pub error: WorkflowError,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ErrorRecord {
    pub fn new(scope: ErrorScope, error: WorkflowError) -> Self {
        Self {
            when: Utc::now(),
            scope,
            error,
            tags: Vec::new(),
            context: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

/// Color behavior for [`pretty_print_with_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatterMode {
    Auto,
    Colored,
    Plain,
}

const LINE_COLOR: &str = "\x1b[35m";
const CONTEXT_COLOR: &str = "\x1b[32m";
const RESET_COLOR: &str = "\x1b[0m";

/// Render error records as human-readable text with explicit color control.
pub fn pretty_print_with_mode(records: &[ErrorRecord], mode: FormatterMode) -> String {
    let colored = match mode {
        FormatterMode::Auto => std::io::stderr().is_terminal(),
        FormatterMode::Colored => true,
        FormatterMode::Plain => false,
    };
    let (line, ctx, reset) = if colored {
        (LINE_COLOR, CONTEXT_COLOR, RESET_COLOR)
    } else {
        ("", "", "")
    };
    let mut out = String::new();
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "[{i}] {} | {ctx}{:?}{reset}\n",
            record.when, record.scope
        ));
        out.push_str(&format!(
            "{line}  {}: {}{reset}\n",
            record.error.code(),
            record.error.message()
        ));
        if !record.tags.is_empty() {
            out.push_str(&format!("{line}  tags: {:?}{reset}\n", record.tags));
        }
        if !record.context.is_null() {
            out.push_str(&format!("{line}  context: {}{reset}\n", record.context));
        }
    }
    out
}

/// Render error records with auto-detected color support.
pub fn pretty_print(records: &[ErrorRecord]) -> String {
    pretty_print_with_mode(records, FormatterMode::Auto)
}
