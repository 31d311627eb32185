//! Engine configuration: command-line settings and the JSON engine file
//! that declares interfaces, service chains and error-handler chains.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use switchyard_core::{
    ConfigError, ErrorHandler, ExpressionResolver, FailureKind, InterfaceDefinition,
    MacroResolver, ProcessCode, Service,
};

use crate::coordinator::{TransactionEndService, TransactionStartService};
use crate::dispatch::Dispatcher;
use crate::dynamic_code::{DynamicCodeRegistry, DynamicCodeService};
use crate::processor::ServiceProcessor;
use crate::registry::{ChainRegistry, ChainStep, Chains, InterfaceRegistry, ResourceExecutorRegistry};
use crate::services::{
    EnforceFailureService, MappingService, QueryService, SetParamService, StatusMessageHandler,
    StopChainService, TraceLogHandler,
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Runtime settings for the `switchyard` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "switchyard", version, about = "Runs interface service chains")]
pub struct EngineConfig {
    /// Engine file (JSON) declaring interfaces and chains.
    #[arg(long, env = "SWITCHYARD_CONFIG")]
    pub config: PathBuf,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "SWITCHYARD_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Dynamic code locations, loaded in order after those in the engine file.
    #[arg(long = "dynamic-code", value_name = "LOCATION")]
    pub dynamic_code: Vec<String>,

    /// Upper bound on blocking worker threads.
    #[arg(long, default_value_t = 512, env = "SWITCHYARD_BLOCKING_THREADS")]
    pub blocking_threads: usize,

    /// Context parameter seeded into every dispatched transaction.
    /// The value is parsed as JSON, falling back to a plain string.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,

    /// Interface ids to dispatch, in order.
    #[arg(required = true, value_name = "INTERFACE")]
    pub interfaces: Vec<String>,
}

impl EngineConfig {
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] for a zero blocking thread count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blocking_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "blocking_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

// ---------------------------------------------------------------------------
// Engine file
// ---------------------------------------------------------------------------

/// The engine file document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineFile {
    #[serde(default)]
    pub interfaces: Vec<InterfaceDefinition>,
    #[serde(default)]
    pub service_chains: BTreeMap<String, Vec<StepConfig>>,
    #[serde(default)]
    pub error_handler_chains: BTreeMap<String, Vec<HandlerConfig>>,
    /// Dynamic code locations, loaded in order.
    #[serde(default)]
    pub dynamic_code: Vec<String>,
}

/// One configured step of a service chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Trace identifier. Defaults to `<type>#<position>`, 1-based.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ignore_error: bool,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Built-in step types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    TransactionStart,
    TransactionEnd,
    Query,
    Mapping,
    DynamicCode,
    SetParam { key: String, value: Value },
    StopChain,
    EnforceFailure { message: String },
}

impl StepKind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::TransactionStart => "transaction_start",
            StepKind::TransactionEnd => "transaction_end",
            StepKind::Query => "query",
            StepKind::Mapping => "mapping",
            StepKind::DynamicCode => "dynamic_code",
            StepKind::SetParam { .. } => "set_param",
            StepKind::StopChain => "stop_chain",
            StepKind::EnforceFailure { .. } => "enforce_failure",
        }
    }
}

/// One configured handler of an error-handler chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Failure kinds the handler reacts to. Empty means all.
    #[serde(default)]
    pub triggered_by: Vec<FailureKind>,
    #[serde(flatten)]
    pub kind: HandlerKind,
}

/// Built-in error handler types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerKind {
    StatusMessage {
        expression: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        status: Option<ProcessCode>,
    },
    TraceLog,
}

impl EngineFile {
    /// Reads and parses an engine file.
    ///
    /// # Errors
    ///
    /// I/O failures and malformed JSON, with the path attached.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing engine file {}", path.display()))
    }

    /// Every resource executor name declared by any interface, sorted.
    #[must_use]
    pub fn executor_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .interfaces
            .iter()
            .flat_map(InterfaceDefinition::executor_names)
            .map(str::to_owned)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Registries and dispatcher assembled from an [`EngineFile`].
pub struct Engine {
    pub interfaces: Arc<InterfaceRegistry>,
    pub chains: Arc<ChainRegistry>,
    pub executors: Arc<ResourceExecutorRegistry>,
    pub dynamic_codes: Arc<DynamicCodeRegistry>,
    pub dispatcher: Dispatcher,
}

impl Engine {
    /// Builds the chains and interface registry from `file` on top of
    /// already-initialized executor and dynamic code registries.
    ///
    /// # Errors
    ///
    /// Duplicate interface ids or chain ids.
    pub fn assemble(
        file: &EngineFile,
        executors: Arc<ResourceExecutorRegistry>,
        dynamic_codes: Arc<DynamicCodeRegistry>,
    ) -> Result<Self, ConfigError> {
        let resolver = Arc::new(MacroResolver::new());
        let mut chains = Chains::new();

        for (chain_id, configs) in &file.service_chains {
            let steps = configs
                .iter()
                .enumerate()
                .map(|(i, cfg)| build_step(i + 1, cfg, &executors, &dynamic_codes, &resolver))
                .collect();
            chains.add_service_chain(chain_id.clone(), steps)?;
        }
        for (chain_id, configs) in &file.error_handler_chains {
            let handlers = configs
                .iter()
                .map(|cfg| build_handler(cfg, resolver.clone()))
                .collect();
            chains.add_error_handler_chain(chain_id.clone(), handlers)?;
        }

        let interfaces = Arc::new(InterfaceRegistry::new());
        interfaces.initialize(file.interfaces.iter().cloned())?;
        let chains = Arc::new(ChainRegistry::with_chains(chains));
        let processor = Arc::new(ServiceProcessor::new(chains.clone(), executors.clone()));

        tracing::info!(
            interfaces = interfaces.len(),
            service_chains = file.service_chains.len(),
            error_handler_chains = file.error_handler_chains.len(),
            "engine assembled"
        );
        Ok(Self {
            dispatcher: Dispatcher::new(interfaces.clone(), processor),
            interfaces,
            chains,
            executors,
            dynamic_codes,
        })
    }
}

fn build_step(
    position: usize,
    cfg: &StepConfig,
    executors: &Arc<ResourceExecutorRegistry>,
    dynamic_codes: &Arc<DynamicCodeRegistry>,
    resolver: &Arc<MacroResolver>,
) -> ChainStep {
    let service: Arc<dyn Service> = match &cfg.kind {
        StepKind::TransactionStart => Arc::new(TransactionStartService),
        StepKind::TransactionEnd => Arc::new(TransactionEndService::new(executors.clone())),
        StepKind::Query => Arc::new(QueryService::with_resolver(executors.clone(), resolver.clone())),
        StepKind::Mapping => Arc::new(MappingService),
        StepKind::DynamicCode => Arc::new(DynamicCodeService::new(dynamic_codes.clone())),
        StepKind::SetParam { key, value } => {
            Arc::new(SetParamService::new(key.clone(), value.clone(), resolver.clone()))
        }
        StepKind::StopChain => Arc::new(StopChainService),
        StepKind::EnforceFailure { message } => Arc::new(EnforceFailureService::new(message.clone())),
    };
    let id = cfg
        .id
        .clone()
        .unwrap_or_else(|| format!("{}#{position}", cfg.kind.type_name()));
    let step = ChainStep::new(id, service);
    if cfg.ignore_error {
        step.ignoring_errors()
    } else {
        step
    }
}

fn build_handler(cfg: &HandlerConfig, resolver: Arc<MacroResolver>) -> Arc<dyn ErrorHandler> {
    match &cfg.kind {
        HandlerKind::StatusMessage {
            expression,
            target,
            status,
        } => {
            let resolver: Arc<dyn ExpressionResolver> = resolver;
            let mut handler = StatusMessageHandler::new(expression.clone(), resolver)
                .triggered_by(cfg.triggered_by.clone());
            if let Some(target) = target {
                handler = handler.with_target(target.clone());
            }
            if let Some(status) = status {
                handler = handler.with_status(*status);
            }
            Arc::new(handler)
        }
        HandlerKind::TraceLog => Arc::new(TraceLogHandler::new(cfg.triggered_by.clone())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use switchyard_core::{ResourceExecutor, RESPONSE_BODY_KEY};
    use tempfile::TempDir;

    use super::*;
    use crate::dynamic_code::CatalogLoader;
    use crate::memory::MemoryExecutor;

    const ENGINE_FILE: &str = r#"{
        "interfaces": [
            {
                "id": "IF100",
                "service_chain_id": "orders",
                "error_handler_chain_id": "on-error",
                "query_maps": [
                    {"id": "insert_order", "executor": "orders_db", "statement": "insert @{if_id}"},
                    {"id": "audit", "executor": "audit_db", "statement": "log @{if_id}"}
                ],
                "dynamic_codes": ["stamp"],
                "mappings": [{"id": "m1", "source": "insert_order", "target": "order"}]
            },
            {"id": "IF101", "service_chain_id": "failing", "error_handler_chain_id": "on-error"}
        ],
        "service_chains": {
            "orders": [
                {"type": "transaction_start"},
                {"type": "query"},
                {"type": "query", "id": "audit"},
                {"type": "mapping"},
                {"type": "dynamic_code"},
                {"type": "set_param", "key": "channel", "value": "web"},
                {"type": "transaction_end"}
            ],
            "failing": [
                {"type": "enforce_failure", "message": "soft", "ignore_error": true},
                {"type": "enforce_failure", "message": "hard"}
            ]
        },
        "error_handler_chains": {
            "on-error": [
                {"type": "trace_log"},
                {
                    "type": "status_message",
                    "expression": "@{custom_status_msg}:{EF=Rejected}",
                    "status": "ENFORCED_FAILURE",
                    "triggered_by": ["enforced"]
                }
            ]
        },
        "dynamic_code": ["builtin"]
    }"#;

    fn write_file(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("engine.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    fn engine(file: &EngineFile) -> (Engine, Vec<Arc<MemoryExecutor>>) {
        let memory: Vec<Arc<MemoryExecutor>> = file
            .executor_names()
            .into_iter()
            .map(|name| Arc::new(MemoryExecutor::new(name)))
            .collect();
        let executors = Arc::new(ResourceExecutorRegistry::new());
        executors
            .initialize(
                file.executor_names()
                    .into_iter()
                    .zip(&memory)
                    .map(|(name, exec)| (name, exec.clone() as Arc<dyn ResourceExecutor>)),
            )
            .unwrap();
        let dynamic_codes = Arc::new(DynamicCodeRegistry::new());
        dynamic_codes
            .initialize(&file.dynamic_code, &CatalogLoader::builtin())
            .unwrap();
        (Engine::assemble(file, executors, dynamic_codes).unwrap(), memory)
    }

    #[test]
    fn load_parses_engine_file() {
        let dir = TempDir::new().unwrap();
        let file = EngineFile::load(&write_file(&dir, ENGINE_FILE)).unwrap();

        assert_eq!(file.interfaces.len(), 2);
        assert_eq!(file.executor_names(), vec!["audit_db", "orders_db"]);
        assert_eq!(file.service_chains["orders"].len(), 7);
        assert_eq!(file.service_chains["orders"][2].id.as_deref(), Some("audit"));
        assert!(file.service_chains["failing"][0].ignore_error);
        assert_eq!(
            file.service_chains["orders"][5].kind,
            StepKind::SetParam {
                key: "channel".into(),
                value: json!("web"),
            }
        );
        assert_eq!(
            file.error_handler_chains["on-error"][1].triggered_by,
            vec![FailureKind::Enforced]
        );
    }

    #[test]
    fn load_reports_path_on_error() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "{ not json");
        let err = EngineFile::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("engine.json"));

        let missing = EngineFile::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(format!("{missing:#}").contains("absent.json"));
    }

    #[test]
    fn unknown_step_type_is_rejected() {
        let body = r#"{"service_chains": {"c": [{"type": "teleport"}]}}"#;
        assert!(serde_json::from_str::<EngineFile>(body).is_err());
    }

    #[test]
    fn default_step_ids_use_type_and_position() {
        let file: EngineFile = serde_json::from_str(ENGINE_FILE).unwrap();
        let (engine, _) = engine(&file);
        let chain = engine.chains.service_chain("orders").unwrap().unwrap();
        let ids: Vec<&str> = chain.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "transaction_start#1",
                "query#2",
                "audit",
                "mapping#4",
                "dynamic_code#5",
                "set_param#6",
                "transaction_end#7",
            ]
        );
    }

    #[tokio::test]
    async fn assembled_engine_runs_transactional_chain() {
        let file: EngineFile = serde_json::from_str(ENGINE_FILE).unwrap();
        let (engine, memory) = engine(&file);

        let ctx = engine.dispatcher.dispatch("IF100", Vec::new()).await.unwrap();

        assert_eq!(ctx.process_code(), ProcessCode::Success);
        assert!(!ctx.has_error());
        assert_eq!(ctx.get_context_param("order").unwrap()["statement"], "insert IF100");
        assert_eq!(ctx.get_context_param("channel"), Some(&json!("web")));
        assert_eq!(
            ctx.get_context_param("last_dynamic_code_status"),
            Some(&json!("SUCCESS"))
        );
        // memory[0] is audit_db, memory[1] is orders_db.
        assert_eq!(memory[0].committed_statements(), vec!["log IF100"]);
        assert_eq!(memory[1].committed_statements(), vec!["insert IF100"]);
        assert!(ctx.transaction_contexts().iter().all(|tc| tc.is_committed()));
    }

    #[tokio::test]
    async fn assembled_engine_runs_error_handlers() {
        let file: EngineFile = serde_json::from_str(ENGINE_FILE).unwrap();
        let (engine, _) = engine(&file);

        let ctx = engine.dispatcher.dispatch("IF101", Vec::new()).await.unwrap();

        assert_eq!(ctx.error_trace().len(), 2);
        assert_eq!(ctx.process_code(), ProcessCode::EnforcedFailure);
        assert_eq!(ctx.get_context_param(RESPONSE_BODY_KEY), Some(&json!("Rejected")));
    }

    #[test]
    fn duplicate_interface_ids_fail_assembly() {
        let mut file: EngineFile = serde_json::from_str(ENGINE_FILE).unwrap();
        file.interfaces.push(InterfaceDefinition::new("IF100", "orders"));
        let executors = Arc::new(ResourceExecutorRegistry::new());
        let dynamic_codes = Arc::new(DynamicCodeRegistry::new());
        let err = Engine::assemble(&file, executors, dynamic_codes).err().unwrap();
        assert!(matches!(err, ConfigError::DuplicateId { kind: "interface", .. }));
    }

    #[test]
    fn command_line_parsing_and_validation() {
        let config = EngineConfig::try_parse_from([
            "switchyard",
            "--config",
            "engine.json",
            "--log-format",
            "json",
            "--dynamic-code",
            "builtin",
            "--param",
            "user=ada",
            "--param",
            "limit=5",
            "IF100",
            "IF101",
        ])
        .unwrap();

        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.dynamic_code, vec!["builtin"]);
        assert_eq!(
            config.params,
            vec![
                ("user".to_string(), json!("ada")),
                ("limit".to_string(), json!(5)),
            ]
        );
        assert_eq!(config.interfaces, vec!["IF100", "IF101"]);
        assert!(config.validate().is_ok());

        let zero = EngineConfig {
            blocking_threads: 0,
            ..config
        };
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::InvalidValue { field: "blocking_threads", .. })
        ));
    }

    #[test]
    fn malformed_param_is_rejected() {
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
        assert_eq!(parse_param("a=b=c").unwrap(), ("a".to_string(), json!("b=c")));
    }
}
