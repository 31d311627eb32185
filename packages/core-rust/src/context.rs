//! The mutable per-transaction record shared by services, handlers and listeners.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ConfigError, FailureKind};
use crate::interface::{InterfaceDefinition, MappingRule, QueryMap};
use crate::process_code::ProcessCode;
use crate::transaction::TransactionContext;

/// Context parameter key under which dispatchers read the response body.
pub const RESPONSE_BODY_KEY: &str = "response_body";

/// One entry of the error trace: which step failed, how, and with what error.
#[derive(Debug)]
pub struct ErrorTraceEntry {
    /// Configured identifier of the failing step.
    pub service: String,
    pub kind: FailureKind,
    pub error: anyhow::Error,
}

/// Per-transaction execution context.
///
/// Created by a dispatcher for one inbound event and exclusively owned by the
/// worker processing it. Services communicate through the context
/// parameters; the processor records its progress in the status, the service
/// trace and the error trace.
#[derive(Debug)]
pub struct ServiceContext {
    interface: Arc<InterfaceDefinition>,
    tx_id: String,
    created_at: DateTime<Local>,
    ended_at: Option<DateTime<Local>>,
    process_code: ProcessCode,
    process_on: bool,
    service_trace: Vec<String>,
    error_trace: Vec<ErrorTraceEntry>,
    params: HashMap<String, Value>,
    transactions: Vec<TransactionContext>,
    query_cursor: usize,
    dynamic_code_cursor: usize,
    mapping_cursor: usize,
}

impl ServiceContext {
    /// Creates a fresh context for one transaction on `interface`.
    #[must_use]
    pub fn new(interface: Arc<InterfaceDefinition>) -> Self {
        let created_at = Local::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let tx_id = format!(
            "{}_{}_{}",
            interface.id,
            created_at.format("%Y%m%d%H%M%S%3f"),
            &suffix[..8]
        );
        Self {
            interface,
            tx_id,
            created_at,
            ended_at: None,
            process_code: ProcessCode::NotStarted,
            process_on: true,
            service_trace: Vec::new(),
            error_trace: Vec::new(),
            params: HashMap::new(),
            transactions: Vec::new(),
            query_cursor: 0,
            dynamic_code_cursor: 0,
            mapping_cursor: 0,
        }
    }

    // --- Identity and timing ---

    #[must_use]
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    #[must_use]
    pub fn interface(&self) -> &InterfaceDefinition {
        &self.interface
    }

    #[must_use]
    pub fn interface_id(&self) -> &str {
        &self.interface.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.ended_at
    }

    /// Stamps the end time.
    pub fn mark_ended(&mut self) {
        self.ended_at = Some(Local::now());
    }

    // --- Status ---

    #[must_use]
    pub fn process_code(&self) -> ProcessCode {
        self.process_code
    }

    pub fn set_process_code(&mut self, code: ProcessCode) {
        if code != self.process_code {
            tracing::trace!(tx_id = %self.tx_id, from = %self.process_code, to = %code, "status changed");
        }
        self.process_code = code;
    }

    /// Whether the main chain may invoke further services.
    #[must_use]
    pub fn is_process_on(&self) -> bool {
        self.process_on
    }

    /// Graceful-stop switch. Once `false`, no further service of the main
    /// chain is invoked. This is not a failure.
    pub fn set_process_on(&mut self, on: bool) {
        self.process_on = on;
    }

    // --- Context parameters ---

    /// Inserts or replaces a context parameter.
    pub fn add_context_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get_context_param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn remove_context_param(&mut self, key: &str) -> Option<Value> {
        self.params.remove(key)
    }

    #[must_use]
    pub fn context_params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    // --- Traces ---

    /// Appends a step to the service trace.
    pub fn add_service_trace(&mut self, service: impl Into<String>) {
        self.service_trace.push(service.into());
    }

    #[must_use]
    pub fn service_trace(&self) -> &[String] {
        &self.service_trace
    }

    /// Records a failure. A second failure of the same step replaces the
    /// first one in place, keeping the original insertion position.
    pub fn add_error_trace(&mut self, service: impl Into<String>, error: anyhow::Error) {
        let service = service.into();
        let kind = FailureKind::classify(&error);
        match self.error_trace.iter_mut().find(|e| e.service == service) {
            Some(entry) => {
                tracing::debug!(tx_id = %self.tx_id, %service, "replacing error trace entry");
                entry.kind = kind;
                entry.error = error;
            }
            None => self.error_trace.push(ErrorTraceEntry {
                service,
                kind,
                error,
            }),
        }
    }

    #[must_use]
    pub fn error_trace(&self) -> &[ErrorTraceEntry] {
        &self.error_trace
    }

    /// The context carries a recorded error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        !self.error_trace.is_empty()
    }

    /// Renders the service trace as `a -> b -> c`.
    #[must_use]
    pub fn service_trace_message(&self) -> String {
        self.service_trace.join(" -> ")
    }

    /// Renders the error trace, one `[service] kind: error` line per entry.
    #[must_use]
    pub fn error_trace_message(&self) -> String {
        let mut out = String::new();
        for (i, entry) in self.error_trace.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "[{}] {}: {:#}", entry.service, entry.kind, entry.error);
        }
        out
    }

    // --- Transaction contexts ---

    /// Registers an empty transaction context for `executor`.
    ///
    /// Returns `true` if a new context was created, `false` if one already existed.
    pub fn register_empty_transaction_context(&mut self, executor: &str) -> bool {
        if self.transaction_context(executor).is_some() {
            return false;
        }
        self.transactions.push(TransactionContext::new(executor));
        true
    }

    #[must_use]
    pub fn transaction_context(&self, executor: &str) -> Option<&TransactionContext> {
        self.transactions.iter().find(|tc| tc.name() == executor)
    }

    pub fn transaction_context_mut(&mut self, executor: &str) -> Option<&mut TransactionContext> {
        self.transactions.iter_mut().find(|tc| tc.name() == executor)
    }

    /// Transaction contexts in registration order.
    #[must_use]
    pub fn transaction_contexts(&self) -> &[TransactionContext] {
        &self.transactions
    }

    pub fn transaction_contexts_mut(&mut self) -> &mut [TransactionContext] {
        &mut self.transactions
    }

    // --- Sequence cursors ---

    #[must_use]
    pub fn has_more_query_maps(&self) -> bool {
        self.query_cursor < self.interface.query_maps.len()
    }

    /// Advances the query cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CursorExhausted`] when no query map is left.
    pub fn next_query_map(&mut self) -> Result<QueryMap, ConfigError> {
        let query = self
            .interface
            .query_maps
            .get(self.query_cursor)
            .cloned()
            .ok_or_else(|| self.exhausted("query"))?;
        self.query_cursor += 1;
        Ok(query)
    }

    #[must_use]
    pub fn has_more_dynamic_codes(&self) -> bool {
        self.dynamic_code_cursor < self.interface.dynamic_codes.len()
    }

    /// Advances the dynamic-code cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CursorExhausted`] when no id is left.
    pub fn next_dynamic_code_id(&mut self) -> Result<String, ConfigError> {
        let id = self
            .interface
            .dynamic_codes
            .get(self.dynamic_code_cursor)
            .cloned()
            .ok_or_else(|| self.exhausted("dynamic code"))?;
        self.dynamic_code_cursor += 1;
        Ok(id)
    }

    #[must_use]
    pub fn has_more_mappings(&self) -> bool {
        self.mapping_cursor < self.interface.mappings.len()
    }

    /// Advances the mapping cursor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CursorExhausted`] when no mapping is left.
    pub fn next_mapping(&mut self) -> Result<MappingRule, ConfigError> {
        let mapping = self
            .interface
            .mappings
            .get(self.mapping_cursor)
            .cloned()
            .ok_or_else(|| self.exhausted("mapping"))?;
        self.mapping_cursor += 1;
        Ok(mapping)
    }

    fn exhausted(&self, sequence: &'static str) -> ConfigError {
        ConfigError::CursorExhausted {
            sequence,
            interface_id: self.interface.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::EnforcedFailure;

    fn interface() -> Arc<InterfaceDefinition> {
        let mut def = InterfaceDefinition::new("IF100", "main");
        def.query_maps = vec![QueryMap {
            id: "q1".into(),
            executor: "orders".into(),
            statement: "select 1".into(),
            timeout_ms: Some(500),
        }];
        def.dynamic_codes = vec!["calc".into(), "notify".into()];
        Arc::new(def)
    }

    #[test]
    fn new_context_defaults() {
        let ctx = ServiceContext::new(interface());
        assert!(ctx.tx_id().starts_with("IF100_"));
        assert_eq!(ctx.process_code(), ProcessCode::NotStarted);
        assert!(ctx.is_process_on());
        assert!(ctx.service_trace().is_empty());
        assert!(!ctx.has_error());
        assert!(ctx.ended_at().is_none());
    }

    #[test]
    fn tx_ids_are_unique() {
        let def = interface();
        let a = ServiceContext::new(def.clone());
        let b = ServiceContext::new(def);
        assert_ne!(a.tx_id(), b.tx_id());
    }

    #[test]
    fn context_params_round_trip() {
        let mut ctx = ServiceContext::new(interface());
        ctx.add_context_param("order", json!({"id": 1}));
        assert_eq!(ctx.get_context_param("order"), Some(&json!({"id": 1})));
        assert_eq!(ctx.get_context_param("missing"), None);
        ctx.add_context_param("order", "replaced");
        assert_eq!(ctx.get_context_param("order"), Some(&json!("replaced")));
        assert_eq!(ctx.remove_context_param("order"), Some(json!("replaced")));
    }

    #[test]
    fn trace_messages() {
        let mut ctx = ServiceContext::new(interface());
        ctx.add_service_trace("start");
        ctx.add_service_trace("query");
        ctx.add_service_trace("end");
        assert_eq!(ctx.service_trace_message(), "start -> query -> end");

        ctx.add_error_trace("query", anyhow::anyhow!("timeout"));
        ctx.add_error_trace("end", EnforcedFailure::new("stop").into());
        assert_eq!(
            ctx.error_trace_message(),
            "[query] service: timeout\n[end] enforced: enforced failure: stop"
        );
    }

    #[test]
    fn error_trace_replaces_same_service_in_place() {
        let mut ctx = ServiceContext::new(interface());
        ctx.add_error_trace("a", anyhow::anyhow!("first"));
        ctx.add_error_trace("b", anyhow::anyhow!("other"));
        ctx.add_error_trace("a", anyhow::anyhow!("second"));
        let services: Vec<_> = ctx.error_trace().iter().map(|e| e.service.as_str()).collect();
        assert_eq!(services, vec!["a", "b"]);
        assert_eq!(ctx.error_trace()[0].error.to_string(), "second");
    }

    #[test]
    fn register_empty_transaction_context_is_idempotent() {
        let mut ctx = ServiceContext::new(interface());
        assert!(ctx.register_empty_transaction_context("orders"));
        assert!(!ctx.register_empty_transaction_context("orders"));
        assert!(ctx.register_empty_transaction_context("billing"));
        let names: Vec<_> = ctx.transaction_contexts().iter().map(TransactionContext::name).collect();
        assert_eq!(names, vec!["orders", "billing"]);
    }

    #[test]
    fn cursors_advance_then_fail_when_exhausted() {
        let mut ctx = ServiceContext::new(interface());
        assert!(ctx.has_more_query_maps());
        assert_eq!(ctx.next_query_map().unwrap().id, "q1");
        assert!(!ctx.has_more_query_maps());
        assert!(matches!(
            ctx.next_query_map(),
            Err(ConfigError::CursorExhausted { sequence: "query", .. })
        ));

        assert_eq!(ctx.next_dynamic_code_id().unwrap(), "calc");
        assert_eq!(ctx.next_dynamic_code_id().unwrap(), "notify");
        assert!(ctx.next_dynamic_code_id().is_err());

        assert!(!ctx.has_more_mappings());
        assert!(ctx.next_mapping().is_err());
    }
}
