//! Event dispatch: builds a Service Context for an interface and processes
//! it on tokio's blocking pool.
//!
//! Every transaction gets its own blocking worker, so transactions run
//! concurrently with each other while each chain runs sequentially on one
//! thread. Services may block freely.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use switchyard_core::{ConfigError, ServiceContext};

use crate::processor::ServiceProcessor;
use crate::registry::InterfaceRegistry;

/// Errors returned to the caller of [`Dispatcher::dispatch`]. Processing
/// failures are not errors: they are reported through the returned context.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("processing worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Routes events to interfaces and runs them through the processor.
#[derive(Clone)]
pub struct Dispatcher {
    interfaces: Arc<InterfaceRegistry>,
    processor: Arc<ServiceProcessor>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(interfaces: Arc<InterfaceRegistry>, processor: Arc<ServiceProcessor>) -> Self {
        Self {
            interfaces,
            processor,
        }
    }

    /// Creates the Service Context for `interface_id`, seeded with `params`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownId`] if the interface is not registered.
    pub fn prepare<I>(&self, interface_id: &str, params: I) -> Result<ServiceContext, ConfigError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let definition = self.interfaces.get(interface_id)?;
        let mut ctx = ServiceContext::new(definition);
        for (key, value) in params {
            ctx.add_context_param(key, value);
        }
        Ok(ctx)
    }

    /// Processes one event for `interface_id` and returns the finished context.
    ///
    /// # Errors
    ///
    /// Unknown interface ids, or a worker that could not complete.
    pub async fn dispatch<I>(
        &self,
        interface_id: &str,
        params: I,
    ) -> Result<ServiceContext, DispatchError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let ctx = self.prepare(interface_id, params)?;
        tracing::debug!(tx_id = %ctx.tx_id(), interface = %interface_id, "dispatching");
        let processor = Arc::clone(&self.processor);
        let ctx = tokio::task::spawn_blocking(move || processor.unfold_services(ctx)).await?;
        Ok(ctx)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Serializable summary of a processed Service Context.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub tx_id: String,
    pub interface_id: String,
    pub status: String,
    pub status_code: String,
    pub is_failure: bool,
    pub created_at: String,
    pub ended_at: Option<String>,
    pub service_trace: Vec<String>,
    pub errors: Vec<OutcomeError>,
    pub params: BTreeMap<String, Value>,
    pub transactions: Vec<OutcomeTransaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeError {
    pub service: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeTransaction {
    pub executor: String,
    pub committed: bool,
    pub rolled_back: bool,
    pub history: Vec<String>,
}

impl From<&ServiceContext> for Outcome {
    fn from(ctx: &ServiceContext) -> Self {
        const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";
        Self {
            tx_id: ctx.tx_id().to_string(),
            interface_id: ctx.interface_id().to_string(),
            status: ctx.process_code().to_string(),
            status_code: ctx.process_code().code().to_string(),
            is_failure: ctx.process_code().is_failure(),
            created_at: ctx.created_at().format(TIME_FORMAT).to_string(),
            ended_at: ctx.ended_at().map(|t| t.format(TIME_FORMAT).to_string()),
            service_trace: ctx.service_trace().to_vec(),
            errors: ctx
                .error_trace()
                .iter()
                .map(|entry| OutcomeError {
                    service: entry.service.clone(),
                    kind: entry.kind.to_string(),
                    message: format!("{:#}", entry.error),
                })
                .collect(),
            params: ctx
                .context_params()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            transactions: ctx
                .transaction_contexts()
                .iter()
                .map(|tc| OutcomeTransaction {
                    executor: tc.name().to_string(),
                    committed: tc.is_committed(),
                    rolled_back: tc.is_rolled_back(),
                    history: tc.history().to_vec(),
                })
                .collect(),
        }
    }
}
