//! Command-line entry point: loads an engine file, wires in-memory resource
//! executors and dispatches the requested interfaces, printing one JSON
//! outcome per line.

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use switchyard_core::ResourceExecutor;
use switchyard_engine::logging::init_tracing;
use switchyard_engine::{
    CatalogLoader, DynamicCodeRegistry, Engine, EngineConfig, EngineFile, MemoryExecutor, Outcome,
    ResourceExecutorRegistry,
};

fn main() -> anyhow::Result<()> {
    let config = EngineConfig::parse();
    init_tracing(config.log_format)?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.blocking_threads)
        .thread_name("switchyard")
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: EngineConfig) -> anyhow::Result<()> {
    let file = EngineFile::load(&config.config)?;

    let executors = Arc::new(ResourceExecutorRegistry::new());
    executors.initialize(file.executor_names().into_iter().map(|name| {
        let executor: Arc<dyn ResourceExecutor> = Arc::new(MemoryExecutor::new(name.clone()));
        (name, executor)
    }))?;

    let locations: Vec<String> = file
        .dynamic_code
        .iter()
        .chain(&config.dynamic_code)
        .cloned()
        .collect();
    let dynamic_codes = Arc::new(DynamicCodeRegistry::new());
    dynamic_codes.initialize(&locations, &CatalogLoader::builtin())?;

    let engine = Engine::assemble(&file, executors, dynamic_codes)?;

    for interface_id in &config.interfaces {
        let ctx = engine
            .dispatcher
            .dispatch(interface_id, config.params.iter().cloned())
            .await
            .with_context(|| format!("dispatching {interface_id}"))?;
        println!("{}", serde_json::to_string(&Outcome::from(&ctx))?);
    }
    Ok(())
}
