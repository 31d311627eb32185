//! Processing status of a single transaction.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerated status of a transaction's processing.
///
/// State machine driven by the processor:
/// `NotStarted -> InProcess -> {Success | Failure}`. The remaining variants
/// are terminal statuses that services and handlers may report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessCode {
    #[default]
    NotStarted,
    InProcess,
    Success,
    Failure,
    /// No service chain is configured for the interface.
    ServiceNotFound,
    DynamicCodeFailure,
    EnforcedFailure,
}

impl ProcessCode {
    /// All variants, in declaration order.
    pub const ALL: [ProcessCode; 7] = [
        ProcessCode::NotStarted,
        ProcessCode::InProcess,
        ProcessCode::Success,
        ProcessCode::Failure,
        ProcessCode::ServiceNotFound,
        ProcessCode::DynamicCodeFailure,
        ProcessCode::EnforcedFailure,
    ];

    /// Short status code, used as the key in custom status message tables.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ProcessCode::NotStarted => "N",
            ProcessCode::InProcess => "P",
            ProcessCode::Success => "S",
            ProcessCode::Failure => "F",
            ProcessCode::ServiceNotFound => "NF",
            ProcessCode::DynamicCodeFailure => "DF",
            ProcessCode::EnforcedFailure => "EF",
        }
    }

    /// Upper-snake name of the status (e.g. `"IN_PROCESS"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessCode::NotStarted => "NOT_STARTED",
            ProcessCode::InProcess => "IN_PROCESS",
            ProcessCode::Success => "SUCCESS",
            ProcessCode::Failure => "FAILURE",
            ProcessCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ProcessCode::DynamicCodeFailure => "DYNAMIC_CODE_FAILURE",
            ProcessCode::EnforcedFailure => "ENFORCED_FAILURE",
        }
    }

    /// Parses a short status code. Matching is exact and case-sensitive.
    #[must_use]
    pub fn from_code(code: &str) -> Option<ProcessCode> {
        Self::ALL.into_iter().find(|pc| pc.code() == code)
    }

    /// Whether processing has finished unsuccessfully.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ProcessCode::Failure
                | ProcessCode::ServiceNotFound
                | ProcessCode::DynamicCodeFailure
                | ProcessCode::EnforcedFailure
        )
    }
}

impl fmt::Display for ProcessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
