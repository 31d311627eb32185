//! Interface definitions: the read-only configuration of one integration endpoint.

use serde::{Deserialize, Serialize};

/// One query in an interface's query sequence, bound to a resource executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMap {
    /// Query identifier; results are stored under this context parameter key.
    pub id: String,
    /// Name of the resource executor the query runs on.
    pub executor: String,
    /// Statement text handed to the executor. May contain `@{...}` macros.
    pub statement: String,
    /// Per-call timeout, enforced by the resource executor.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// One step in an interface's mapping sequence: copies a context parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// Configured integration endpoint. Immutable once loaded into the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDefinition {
    pub id: String,
    pub service_chain_id: String,
    #[serde(default)]
    pub error_handler_chain_id: Option<String>,
    #[serde(default)]
    pub query_maps: Vec<QueryMap>,
    #[serde(default)]
    pub dynamic_codes: Vec<String>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
}

impl InterfaceDefinition {
    /// Creates a definition with empty sequences and no error-handler chain.
    pub fn new(id: impl Into<String>, service_chain_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_chain_id: service_chain_id.into(),
            error_handler_chain_id: None,
            query_maps: Vec::new(),
            dynamic_codes: Vec::new(),
            mappings: Vec::new(),
        }
    }

    /// Resource-executor names declared by the query sequence, in first-seen
    /// order, without duplicates.
    #[must_use]
    pub fn executor_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for query in &self.query_maps {
            if !names.contains(&query.executor.as_str()) {
                names.push(&query.executor);
            }
        }
        names
    }
}
