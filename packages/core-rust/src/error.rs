//! Typed errors and failure classification.
//!
//! Services, handlers and listeners return `anyhow::Result`. The typed errors
//! below are what the engine itself raises; [`FailureKind::classify`] maps an
//! opaque `anyhow::Error` back onto a small sum type for the error trace and
//! for error-handler triggering.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Configuration errors: missing or duplicate ids, exhausted cursors,
/// registries used before or after their single initialization.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{registry} is already initialized")]
    AlreadyInitialized { registry: &'static str },
    #[error("{registry} is not initialized")]
    NotInitialized { registry: &'static str },
    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("unknown {kind} id: {id}")]
    UnknownId { kind: &'static str, id: String },
    #[error("{sequence} sequence exhausted for interface {interface_id}")]
    CursorExhausted {
        sequence: &'static str,
        interface_id: String,
    },
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors from parsing or evaluating `@{...}` expressions.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("malformed expression `{expr}`: {reason}")]
    Malformed { expr: String, reason: &'static str },
    #[error("unknown macro: {name}")]
    UnknownMacro { name: String },
    #[error("malformed status message option `{option}`: expected exactly one '='")]
    MalformedOption { option: String },
    #[error("unknown status code `{code}` in status message options")]
    UnknownStatusCode { code: String },
}

/// Errors raised while coordinating resource-executor transactions.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("no resource executor registered as `{name}`")]
    UnknownExecutor { name: String },
    #[error("failed to begin transaction on `{executor}`")]
    BeginFailed {
        executor: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("commit failed on `{executor}`")]
    CommitFailed {
        executor: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("rollback failed on `{executor}`")]
    RollbackFailed {
        executor: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors from the dynamic code registry and its loaders.
#[derive(Debug, thiserror::Error)]
pub enum DynamicCodeError {
    #[error("failed to load dynamic code from `{location}`")]
    Load {
        location: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("dynamic code `{id}` failed")]
    Execution {
        id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Deliberate failure raised by a service or handler to force the failure path.
#[derive(Debug, thiserror::Error)]
#[error("enforced failure: {message}")]
pub struct EnforcedFailure {
    pub message: String,
}

impl EnforcedFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A panic caught while invoking a service, handler or listener.
#[derive(Debug, thiserror::Error)]
#[error("panicked: {message}")]
pub struct PanicFailure {
    pub message: String,
}

impl PanicFailure {
    /// Builds a failure from a `catch_unwind` payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

/// Sum type of failure kinds recorded in the error trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Expression,
    Transaction,
    DynamicCode,
    Enforced,
    Panic,
    /// Any other error returned by a service.
    Service,
}

impl FailureKind {
    /// Classifies an opaque error by downcasting to the engine's typed errors.
    #[must_use]
    pub fn classify(err: &anyhow::Error) -> FailureKind {
        if err.is::<ConfigError>() {
            FailureKind::Configuration
        } else if err.is::<ExpressionError>() {
            FailureKind::Expression
        } else if err.is::<TransactionError>() {
            FailureKind::Transaction
        } else if err.is::<DynamicCodeError>() {
            FailureKind::DynamicCode
        } else if err.is::<EnforcedFailure>() {
            FailureKind::Enforced
        } else if err.is::<PanicFailure>() {
            FailureKind::Panic
        } else {
            FailureKind::Service
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Expression => "expression",
            FailureKind::Transaction => "transaction",
            FailureKind::DynamicCode => "dynamic_code",
            FailureKind::Enforced => "enforced",
            FailureKind::Panic => "panic",
            FailureKind::Service => "service",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
