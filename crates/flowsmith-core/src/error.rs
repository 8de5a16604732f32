use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::id::EntityId;
use crate::types::{OutputStream, RunState};

/// Category of a single validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    MalformedId,
    DuplicateId,
    MissingReference,
    WrongRole,
    MissingField,
    UnreachableFunction,
    SelfLoop,
    UnterminatedCycle,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MalformedId => "malformed id",
            Self::DuplicateId => "duplicate id",
            Self::MissingReference => "missing reference",
            Self::WrongRole => "wrong role",
            Self::MissingField => "missing field",
            Self::UnreachableFunction => "unreachable function",
            Self::SelfLoop => "self loop",
            Self::UnterminatedCycle => "unterminated cycle",
        };
        f.write_str(s)
    }
}

/// One problem found in a flow, tied to the entity that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub entity: EntityId,
    pub kind: ViolationKind,
    pub cause: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.entity, self.cause)
    }
}

/// Ordered list of violations produced by the validator.
///
/// An empty report means the flow may be compiled. The caller decides
/// whether a non-empty report aborts or is only reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn push(&mut self, entity: &EntityId, kind: ViolationKind, cause: impl Into<String>) {
        self.violations.push(Violation {
            entity: entity.clone(),
            kind,
            cause: cause.into(),
        });
    }

    /// Violations of one kind, in report order.
    pub fn of_kind(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.kind == kind)
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(FlowsmithError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", v)?;
        }
        Ok(())
    }
}

/// The chat graph could not be turned into an execution plan.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequencingError {
    #[error("chat {chat} requires chat {predecessor}, which is not part of the top-level plan")]
    UnreachablePredecessor { chat: EntityId, predecessor: EntityId },

    #[error("group chat {chat} of manager {manager} is never started by a top-level chat")]
    UnreachableGroup { manager: EntityId, chat: EntityId },

    #[error("chat prerequisites form a cycle through {chat}")]
    Cycle { chat: EntityId, involved: Vec<EntityId> },

    #[error("flow has no chat to start from")]
    EmptyPlan,
}

/// Source text could not be produced for a flow.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("unsupported target form: {0}")]
    UnsupportedTarget(String),

    #[error("cannot embed {field} of {entity}: {reason}")]
    Embedding {
        entity: EntityId,
        field: String,
        reason: String,
    },

    #[error("credential of {entity} appears in generated source")]
    SecretLeak { entity: EntityId },

    #[error("entity {0} is referenced but not defined")]
    UnknownEntity(EntityId),
}

/// Failures and degradations of a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunnerError {
    #[error("failed to install {packages:?}: {message}")]
    InstallFailure { packages: Vec<String>, message: String },

    #[error("{chunks} undecodable chunk(s) on {stream}")]
    DecodeDegradation { stream: OutputStream, chunks: usize },

    #[error("artifact exited with code {exit_code}")]
    ExecutionFailure { exit_code: i32, tail: Vec<String> },

    #[error("artifact terminated abnormally (signal {})", .signal.map_or_else(|| "unknown".to_string(), |s| s.to_string()))]
    ExecutionCrash { signal: Option<i32>, tail: Vec<String> },

    #[error("run cancelled")]
    Cancelled,

    #[error("environment {0} is busy")]
    Busy(String),

    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("invalid run state transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

#[derive(Debug, Error)]
pub enum FlowsmithError {
    #[error("flow validation failed:\n{0}")]
    Validation(ValidationReport),

    #[error("sequencing error: {0}")]
    Sequencing(#[from] SequencingError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FlowsmithError>;
