//! Service chain processor.
//!
//! Drives one [`ServiceContext`] through its interface's service chain,
//! runs the error-handler chain on an unrecovered failure, and always
//! finishes with the registered cleanup listeners.
//!
//! # Ordering
//!
//! 1. Each step is appended to the service trace *before* `processOn` is
//!    checked, so a step skipped by a graceful stop still shows in the trace.
//! 2. A failing step with `ignore_error` is recorded and the chain continues;
//!    any other failure ends the chain and enters the error handlers.
//! 3. Handler and listener failures are logged; the remaining ones still run.
//! 4. Listeners run from a scope guard, so they also run when processing
//!    unwinds.

use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use switchyard_core::{
    AfterProcessListener, FailureKind, PanicFailure, ProcessCode, ServiceContext,
};

use crate::coordinator::TransactionCleanupListener;
use crate::registry::{ChainRegistry, ChainStep, ResourceExecutorRegistry};

/// Runs `f`, converting a panic into a [`PanicFailure`] error.
fn guarded(f: impl FnOnce() -> anyhow::Result<()>) -> anyhow::Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(PanicFailure::from_payload(payload.as_ref()).into()),
    }
}

// ---------------------------------------------------------------------------
// CleanupScope
// ---------------------------------------------------------------------------

/// Exclusive access to the context for the duration of one run. Dropping
/// the scope stamps the end time and runs every listener in order.
struct CleanupScope<'a> {
    ctx: &'a mut ServiceContext,
    listeners: &'a [Arc<dyn AfterProcessListener>],
}

impl Deref for CleanupScope<'_> {
    type Target = ServiceContext;

    fn deref(&self) -> &ServiceContext {
        self.ctx
    }
}

impl DerefMut for CleanupScope<'_> {
    fn deref_mut(&mut self) -> &mut ServiceContext {
        self.ctx
    }
}

impl Drop for CleanupScope<'_> {
    fn drop(&mut self) {
        self.ctx.mark_ended();
        let ctx = &mut *self.ctx;
        for listener in self.listeners {
            if let Err(err) = guarded(|| listener.after_process(ctx)) {
                tracing::error!(
                    tx_id = %ctx.tx_id(),
                    listener = listener.name(),
                    error = %format!("{err:#}"),
                    "after-process listener failed"
                );
            }
        }
        tracing::info!(
            tx_id = %ctx.tx_id(),
            status = %ctx.process_code(),
            services = %ctx.service_trace_message(),
            "transaction processed"
        );
    }
}

// ---------------------------------------------------------------------------
// ServiceProcessor
// ---------------------------------------------------------------------------

/// Number of listeners registered by [`ServiceProcessor::new`], at the front
/// of the listener list.
const DEFAULT_LISTENERS: usize = 1;

/// Executes service chains. Shared across workers; holds no per-transaction state.
pub struct ServiceProcessor {
    chains: Arc<ChainRegistry>,
    listeners: Vec<Arc<dyn AfterProcessListener>>,
}

impl ServiceProcessor {
    /// Creates a processor with the transaction cleanup listener registered.
    #[must_use]
    pub fn new(chains: Arc<ChainRegistry>, executors: Arc<ResourceExecutorRegistry>) -> Self {
        Self {
            chains,
            listeners: vec![Arc::new(TransactionCleanupListener::new(executors))],
        }
    }

    /// Appends a listener. Listeners run in registration order.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn AfterProcessListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Names of the registered listeners, in run order.
    pub fn listener_names(&self) -> impl Iterator<Item = &str> {
        self.listeners.iter().map(|l| l.name())
    }

    /// Processes one transaction and returns the mutated context.
    ///
    /// Never fails: the outcome is reported through the context's status
    /// and traces.
    #[must_use]
    pub fn unfold_services(&self, mut ctx: ServiceContext) -> ServiceContext {
        let span = tracing::info_span!(
            "unfold_services",
            tx_id = %ctx.tx_id(),
            interface = %ctx.interface_id(),
        );
        let _entered = span.enter();
        self.run(&mut ctx);
        ctx
    }

    fn run(&self, ctx: &mut ServiceContext) {
        let chain_id = ctx.interface().service_chain_id.clone();
        let chain = match self.chains.service_chain(&chain_id) {
            Ok(Some(chain)) if !chain.is_empty() => chain,
            Ok(_) => {
                tracing::warn!(chain = %chain_id, "no service chain configured; nothing to do");
                self.service_not_found(ctx);
                return;
            }
            Err(err) => {
                tracing::error!(chain = %chain_id, error = %err, "service chain lookup failed");
                self.service_not_found(ctx);
                return;
            }
        };

        let mut scope = CleanupScope {
            ctx,
            listeners: &self.listeners,
        };
        scope.set_process_code(ProcessCode::InProcess);
        tracing::debug!(chain = %chain_id, steps = chain.len(), "chain started");
        if let Some(kind) = run_chain(&mut scope, &chain) {
            self.run_error_handlers(&mut scope, kind);
        }
    }

    /// Early exit without a chain: only the default cleanup listener runs.
    fn service_not_found(&self, ctx: &mut ServiceContext) {
        let mut scope = CleanupScope {
            ctx,
            listeners: &self.listeners[..DEFAULT_LISTENERS],
        };
        scope.set_process_code(ProcessCode::ServiceNotFound);
    }

    fn run_error_handlers(&self, ctx: &mut ServiceContext, kind: FailureKind) {
        let Some(handler_chain_id) = ctx.interface().error_handler_chain_id.clone() else {
            tracing::warn!(
                tx_id = %ctx.tx_id(),
                "no error handler chain configured; failure absorbed"
            );
            return;
        };
        let handlers = match self.chains.error_handler_chain(&handler_chain_id) {
            Ok(Some(handlers)) if !handlers.is_empty() => handlers,
            Ok(_) => {
                tracing::warn!(
                    chain = %handler_chain_id,
                    "error handler chain not found; failure absorbed"
                );
                return;
            }
            Err(err) => {
                tracing::error!(chain = %handler_chain_id, error = %err, "error handler lookup failed");
                return;
            }
        };

        for handler in handlers.iter() {
            if !handler.is_triggered(kind) {
                tracing::debug!(handler = handler.name(), %kind, "handler not triggered");
                continue;
            }
            if let Err(err) = guarded(|| handler.handle_error(ctx)) {
                tracing::error!(
                    tx_id = %ctx.tx_id(),
                    handler = handler.name(),
                    error = %format!("{err:#}"),
                    "error handler failed; continuing with the next one"
                );
            }
        }
    }
}

/// Runs the main chain. Returns the kind of the failure that ended it, if any.
fn run_chain(ctx: &mut ServiceContext, chain: &[ChainStep]) -> Option<FailureKind> {
    for step in chain {
        ctx.add_service_trace(step.id.as_str());
        if !ctx.is_process_on() {
            tracing::warn!(
                tx_id = %ctx.tx_id(),
                service = %step.id,
                "chain broken: process switched off"
            );
            return None;
        }

        match guarded(|| step.service.process(ctx)) {
            Ok(()) => ctx.set_process_code(ProcessCode::Success),
            Err(err) => {
                ctx.set_process_code(ProcessCode::Failure);
                let kind = FailureKind::classify(&err);
                if step.ignore_error {
                    tracing::warn!(
                        tx_id = %ctx.tx_id(),
                        service = %step.id,
                        %kind,
                        error = %format!("{err:#}"),
                        "service failed; error ignored"
                    );
                    ctx.add_error_trace(step.id.as_str(), err);
                    continue;
                }
                tracing::error!(
                    tx_id = %ctx.tx_id(),
                    service = %step.id,
                    %kind,
                    error = %format!("{err:#}"),
                    "service failed"
                );
                ctx.add_error_trace(step.id.as_str(), err);
                return Some(kind);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
