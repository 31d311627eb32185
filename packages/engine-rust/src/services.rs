//! Built-in chain steps and error handlers.

use std::sync::Arc;

use serde_json::Value;
use switchyard_core::{
    EnforcedFailure, ErrorHandler, ExpressionResolver, FailureKind, MacroResolver, ProcessCode,
    Service, ServiceContext, TransactionError, RESPONSE_BODY_KEY,
};

use crate::registry::ResourceExecutorRegistry;

// ---------------------------------------------------------------------------
// QueryService
// ---------------------------------------------------------------------------

/// Runs the next query map of the interface on its resource executor.
///
/// When the executor has a registered Transaction Context the statement runs
/// inside that executor's platform transaction, which is begun on first use.
/// Otherwise the statement runs untransacted. The executor's result is stored
/// as a context parameter under the query id.
pub struct QueryService {
    executors: Arc<ResourceExecutorRegistry>,
    resolver: Arc<MacroResolver>,
}

impl QueryService {
    #[must_use]
    pub fn new(executors: Arc<ResourceExecutorRegistry>) -> Self {
        Self::with_resolver(executors, Arc::new(MacroResolver::new()))
    }

    #[must_use]
    pub fn with_resolver(executors: Arc<ResourceExecutorRegistry>, resolver: Arc<MacroResolver>) -> Self {
        Self { executors, resolver }
    }
}

impl Service for QueryService {
    fn name(&self) -> &str {
        "query"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        let query = ctx.next_query_map()?;
        let statement = self.resolver.interpolate(&query.statement, ctx)?;
        let executor = self
            .executors
            .get(&query.executor)
            .ok_or_else(|| TransactionError::UnknownExecutor {
                name: query.executor.clone(),
            })?;

        let handle = match ctx.transaction_context_mut(&query.executor) {
            Some(tc) if tc.is_active() => tc.handle(),
            Some(tc) if !tc.is_started() => {
                let handle = executor
                    .begin()
                    .map_err(|source| TransactionError::BeginFailed {
                        executor: query.executor.clone(),
                        source,
                    })?;
                tc.begin(handle);
                Some(handle)
            }
            // Resolved earlier in the chain, or never registered.
            _ => None,
        };

        tracing::debug!(
            tx_id = %ctx.tx_id(),
            query = %query.id,
            executor = %query.executor,
            transacted = handle.is_some(),
            timeout_ms = ?query.timeout_ms,
            "executing query"
        );

        match executor.execute(handle, &query, &statement) {
            Ok(result) => {
                if let (Some(_), Some(tc)) = (handle, ctx.transaction_context_mut(&query.executor)) {
                    tc.record(format!("query {}", query.id));
                }
                ctx.add_context_param(query.id, result);
                Ok(())
            }
            Err(source) => {
                let source = source.context(format!(
                    "query `{}` on `{}` failed",
                    query.id, query.executor
                ));
                if let (Some(_), Some(tc)) = (handle, ctx.transaction_context_mut(&query.executor)) {
                    tc.record_error(format!("{source:#}"));
                }
                Err(source)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Context parameter steps
// ---------------------------------------------------------------------------

/// Applies the next mapping rule: copies one context parameter to another key.
#[derive(Debug, Default)]
pub struct MappingService;

impl Service for MappingService {
    fn name(&self) -> &str {
        "mapping"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        let rule = ctx.next_mapping()?;
        let value = ctx.get_context_param(&rule.source).cloned().ok_or_else(|| {
            anyhow::anyhow!(
                "mapping `{}`: context parameter `{}` is not set",
                rule.id,
                rule.source
            )
        })?;
        ctx.add_context_param(rule.target, value);
        Ok(())
    }
}

/// Stores a fixed value under a key. String values are interpolated first.
pub struct SetParamService {
    key: String,
    value: Value,
    resolver: Arc<MacroResolver>,
}

impl SetParamService {
    pub fn new(key: impl Into<String>, value: Value, resolver: Arc<MacroResolver>) -> Self {
        Self {
            key: key.into(),
            value,
            resolver,
        }
    }
}

impl Service for SetParamService {
    fn name(&self) -> &str {
        "set_param"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        let value = match &self.value {
            Value::String(template) => Value::String(self.resolver.interpolate(template, ctx)?),
            other => other.clone(),
        };
        ctx.add_context_param(self.key.clone(), value);
        Ok(())
    }
}

/// Switches processing off: the rest of the chain is skipped without error.
#[derive(Debug, Default)]
pub struct StopChainService;

impl Service for StopChainService {
    fn name(&self) -> &str {
        "stop_chain"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        tracing::debug!(tx_id = %ctx.tx_id(), "stopping chain");
        ctx.set_process_on(false);
        Ok(())
    }
}

/// Always fails with an [`EnforcedFailure`].
#[derive(Debug)]
pub struct EnforceFailureService {
    message: String,
}

impl EnforceFailureService {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Service for EnforceFailureService {
    fn name(&self) -> &str {
        "enforce_failure"
    }

    fn process(&self, _ctx: &mut ServiceContext) -> anyhow::Result<()> {
        Err(EnforcedFailure::new(self.message.clone()).into())
    }
}

// ---------------------------------------------------------------------------
// Error handlers
// ---------------------------------------------------------------------------

fn triggered_by(kinds: &[FailureKind], kind: FailureKind) -> bool {
    kinds.is_empty() || kinds.contains(&kind)
}

/// Resolves an expression (typically `@{custom_status_msg}:{...}`) and
/// stores the result under a context parameter, the response body by default.
///
/// Optionally overrides the process code first, so the message is resolved
/// against the overriding status.
pub struct StatusMessageHandler {
    expression: String,
    target: String,
    status: Option<ProcessCode>,
    triggered_by: Vec<FailureKind>,
    resolver: Arc<dyn ExpressionResolver>,
}

impl StatusMessageHandler {
    pub fn new(expression: impl Into<String>, resolver: Arc<dyn ExpressionResolver>) -> Self {
        Self {
            expression: expression.into(),
            target: RESPONSE_BODY_KEY.to_string(),
            status: None,
            triggered_by: Vec::new(),
            resolver,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: ProcessCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Restricts the handler to the given failure kinds. Empty means all.
    #[must_use]
    pub fn triggered_by(mut self, kinds: Vec<FailureKind>) -> Self {
        self.triggered_by = kinds;
        self
    }
}

impl ErrorHandler for StatusMessageHandler {
    fn name(&self) -> &str {
        "status_message"
    }

    fn is_triggered(&self, kind: FailureKind) -> bool {
        triggered_by(&self.triggered_by, kind)
    }

    fn handle_error(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        if let Some(status) = self.status {
            ctx.set_process_code(status);
        }
        let message = self.resolver.resolve(&self.expression, ctx)?;
        ctx.add_context_param(self.target.clone(), message.map_or(Value::Null, Value::String));
        Ok(())
    }
}

/// Logs the service and error traces of the failed transaction.
#[derive(Debug, Default)]
pub struct TraceLogHandler {
    triggered_by: Vec<FailureKind>,
}

impl TraceLogHandler {
    #[must_use]
    pub fn new(triggered_by: Vec<FailureKind>) -> Self {
        Self { triggered_by }
    }
}

impl ErrorHandler for TraceLogHandler {
    fn name(&self) -> &str {
        "trace_log"
    }

    fn is_triggered(&self, kind: FailureKind) -> bool {
        triggered_by(&self.triggered_by, kind)
    }

    fn handle_error(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        tracing::error!(
            tx_id = %ctx.tx_id(),
            interface = %ctx.interface_id(),
            status = %ctx.process_code(),
            services = %ctx.service_trace_message(),
            errors = %ctx.error_trace_message(),
            "transaction failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use switchyard_core::{InterfaceDefinition, MappingRule, QueryMap, ResourceExecutor};

    use super::*;
    use crate::coordinator::register_transactions;
    use crate::memory::MemoryExecutor;

    fn query(id: &str, executor: &str, statement: &str) -> QueryMap {
        QueryMap {
            id: id.to_string(),
            executor: executor.to_string(),
            statement: statement.to_string(),
            timeout_ms: None,
        }
    }

    fn setup(queries: Vec<QueryMap>) -> (Arc<MemoryExecutor>, QueryService, ServiceContext) {
        let exec = Arc::new(MemoryExecutor::new("db"));
        let registry = Arc::new(ResourceExecutorRegistry::new());
        registry
            .initialize(vec![("db".to_string(), exec.clone() as Arc<dyn ResourceExecutor>)])
            .unwrap();
        let mut def = InterfaceDefinition::new("IF600", "main");
        def.query_maps = queries;
        (exec, QueryService::new(registry), ServiceContext::new(Arc::new(def)))
    }

    #[test]
    fn query_without_transaction_context_runs_untransacted() {
        let (exec, service, mut ctx) = setup(vec![query("q1", "db", "select 1")]);
        service.process(&mut ctx).unwrap();
        assert_eq!(exec.committed_statements(), vec!["select 1"]);
        assert_eq!(ctx.get_context_param("q1").unwrap()["statement"], "select 1");
        assert!(ctx.transaction_contexts().is_empty());
    }

    #[test]
    fn query_begins_transaction_lazily_once() {
        let (exec, service, mut ctx) = setup(vec![
            query("q1", "db", "insert 1"),
            query("q2", "db", "insert 2"),
        ]);
        register_transactions(&mut ctx);
        service.process(&mut ctx).unwrap();
        service.process(&mut ctx).unwrap();

        let tc = ctx.transaction_context("db").unwrap();
        assert!(tc.is_active());
        assert_eq!(tc.history(), ["begin tx#1", "query q1", "query q2"]);
        assert!(exec.committed_statements().is_empty());
        assert_eq!(
            exec.journal(),
            vec!["db:begin tx#1", "db:query q1", "db:query q2"]
        );
    }

    #[test]
    fn query_statement_is_interpolated() {
        let (exec, service, mut ctx) = setup(vec![query("q1", "db", "select '@{if_id}'")]);
        service.process(&mut ctx).unwrap();
        assert_eq!(exec.committed_statements(), vec!["select 'IF600'"]);
    }

    #[test]
    fn failed_query_records_error_on_transaction_context() {
        let (exec, service, mut ctx) = setup(vec![query("q1", "db", "insert 1")]);
        exec.fail_query("q1");
        register_transactions(&mut ctx);
        let err = service.process(&mut ctx).unwrap_err();
        assert!(format!("{err:#}").contains("query `q1` on `db` failed"));
        assert!(ctx.transaction_context("db").unwrap().error().is_some());
        assert!(ctx.get_context_param("q1").is_none());
    }

    #[test]
    fn unknown_executor_is_transaction_error() {
        let (_exec, service, mut ctx) = setup(vec![query("q1", "other", "x")]);
        let err = service.process(&mut ctx).unwrap_err();
        assert_eq!(FailureKind::classify(&err), FailureKind::Transaction);
    }

    #[test]
    fn exhausted_query_sequence_is_configuration_error() {
        let (_exec, service, mut ctx) = setup(Vec::new());
        let err = service.process(&mut ctx).unwrap_err();
        assert_eq!(FailureKind::classify(&err), FailureKind::Configuration);
    }

    #[test]
    fn mapping_copies_parameters_in_sequence() {
        let mut def = InterfaceDefinition::new("IF601", "main");
        def.mappings = vec![
            MappingRule {
                id: "m1".into(),
                source: "in".into(),
                target: "mid".into(),
            },
            MappingRule {
                id: "m2".into(),
                source: "missing".into(),
                target: "out".into(),
            },
        ];
        let mut ctx = ServiceContext::new(Arc::new(def));
        ctx.add_context_param("in", json!({"a": 1}));

        MappingService.process(&mut ctx).unwrap();
        assert_eq!(ctx.get_context_param("mid"), Some(&json!({"a": 1})));

        let err = MappingService.process(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn set_param_interpolates_strings_only() {
        let resolver = Arc::new(MacroResolver::new());
        let mut ctx = ServiceContext::new(Arc::new(InterfaceDefinition::new("IF602", "main")));
        SetParamService::new("greeting", json!("hello @{if_id}"), resolver.clone())
            .process(&mut ctx)
            .unwrap();
        SetParamService::new("limit", json!(5), resolver).process(&mut ctx).unwrap();
        assert_eq!(ctx.get_context_param("greeting"), Some(&json!("hello IF602")));
        assert_eq!(ctx.get_context_param("limit"), Some(&json!(5)));
    }

    #[test]
    fn stop_and_enforce() {
        let mut ctx = ServiceContext::new(Arc::new(InterfaceDefinition::new("IF603", "main")));
        StopChainService.process(&mut ctx).unwrap();
        assert!(!ctx.is_process_on());

        let err = EnforceFailureService::new("limit reached").process(&mut ctx).unwrap_err();
        assert_eq!(FailureKind::classify(&err), FailureKind::Enforced);
    }

    #[test]
    fn status_message_handler_writes_response_body() {
        let mut ctx = ServiceContext::new(Arc::new(InterfaceDefinition::new("IF604", "main")));
        ctx.set_process_code(ProcessCode::Failure);
        let handler = StatusMessageHandler::new(
            "@{custom_status_msg}:{S=OK;F=Failed}",
            Arc::new(MacroResolver::new()),
        );
        handler.handle_error(&mut ctx).unwrap();
        assert_eq!(ctx.get_context_param(RESPONSE_BODY_KEY), Some(&json!("Failed")));
    }

    #[test]
    fn status_message_handler_status_override_and_target() {
        let mut ctx = ServiceContext::new(Arc::new(InterfaceDefinition::new("IF605", "main")));
        ctx.set_process_code(ProcessCode::Failure);
        let handler = StatusMessageHandler::new(
            "@{custom_status_msg}:{EF=Rejected}",
            Arc::new(MacroResolver::new()),
        )
        .with_status(ProcessCode::EnforcedFailure)
        .with_target("message");
        handler.handle_error(&mut ctx).unwrap();
        assert_eq!(ctx.process_code(), ProcessCode::EnforcedFailure);
        assert_eq!(ctx.get_context_param("message"), Some(&json!("Rejected")));
    }

    #[test]
    fn triggering_filters() {
        let resolver: Arc<dyn ExpressionResolver> = Arc::new(MacroResolver::new());
        let all = StatusMessageHandler::new("@{status}", resolver.clone());
        assert!(all.is_triggered(FailureKind::Panic));

        let enforced_only = StatusMessageHandler::new("@{status}", resolver)
            .triggered_by(vec![FailureKind::Enforced]);
        assert!(enforced_only.is_triggered(FailureKind::Enforced));
        assert!(!enforced_only.is_triggered(FailureKind::Service));

        let log = TraceLogHandler::new(vec![FailureKind::Transaction]);
        assert!(log.is_triggered(FailureKind::Transaction));
        assert!(!log.is_triggered(FailureKind::Expression));
    }
}
