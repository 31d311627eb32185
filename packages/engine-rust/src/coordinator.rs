//! Multi-resource transaction coordination.
//!
//! Resources are committed one after another, never atomically: a crash
//! between two commits leaves the earlier resource committed. Two mechanisms
//! share the per-executor [`TransactionContext`]s of a Service Context:
//!
//! - explicit steps: [`TransactionStartService`] registers empty contexts,
//!   [`TransactionEndService`] commits them in declared order, and once one
//!   commit fails, rolls back that executor and every later one;
//! - [`TransactionCleanupListener`], always registered, which resolves any
//!   platform transaction still open after the chain ends.

use std::sync::Arc;

use switchyard_core::{
    AfterProcessListener, ResourceExecutor, Service, ServiceContext, TransactionContext,
    TransactionError, TransactionHandle,
};

use crate::registry::ResourceExecutorRegistry;

/// Registers an empty transaction context for every executor declared by
/// the interface's query sequence. Returns how many were newly created.
pub fn register_transactions(ctx: &mut ServiceContext) -> usize {
    let names: Vec<String> = ctx
        .interface()
        .executor_names()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut created = 0;
    for name in names {
        if ctx.register_empty_transaction_context(&name) {
            tracing::debug!(tx_id = %ctx.tx_id(), executor = %name, "transaction context registered");
            created += 1;
        } else {
            tracing::debug!(
                tx_id = %ctx.tx_id(),
                executor = %name,
                "transaction context already registered; skipping"
            );
        }
    }
    created
}

/// Commits every active transaction in declared executor order.
///
/// The first commit failure poisons the rest: that executor and all later
/// ones are rolled back without attempting commit. Executors earlier in the
/// order stay committed.
///
/// # Errors
///
/// Returns the first captured error, typically [`TransactionError::CommitFailed`].
pub fn end_transactions(
    ctx: &mut ServiceContext,
    executors: &ResourceExecutorRegistry,
) -> anyhow::Result<()> {
    let tx_id = ctx.tx_id().to_string();
    let names: Vec<String> = ctx
        .interface()
        .executor_names()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut first_error: Option<anyhow::Error> = None;
    for name in names {
        let Some(tc) = ctx.transaction_context_mut(&name) else {
            continue;
        };
        let Some(handle) = tc.handle().filter(|_| tc.is_active()) else {
            continue;
        };
        let Some(executor) = executors.get(&name) else {
            let err = TransactionError::UnknownExecutor { name: name.clone() };
            tc.record_error(err.to_string());
            tracing::error!(%tx_id, executor = %name, "no executor to resolve open transaction");
            first_error.get_or_insert_with(|| err.into());
            continue;
        };
        if executor.is_completed(handle) {
            continue;
        }

        if first_error.is_none() {
            match executor.commit(handle) {
                Ok(()) => {
                    tc.mark_committed();
                    tracing::debug!(%tx_id, executor = %name, "committed");
                    continue;
                }
                Err(source) => {
                    tc.record_error(format!("{source:#}"));
                    tracing::error!(
                        %tx_id,
                        executor = %name,
                        error = %format!("{source:#}"),
                        "commit failed; rolling back remaining executors"
                    );
                    first_error = Some(
                        TransactionError::CommitFailed {
                            executor: name.clone(),
                            source,
                        }
                        .into(),
                    );
                }
            }
        }
        rollback(tc, executor.as_ref(), handle, &tx_id);
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Rolls back one transaction. Failures are recorded on the context and logged.
fn rollback(
    tc: &mut TransactionContext,
    executor: &dyn ResourceExecutor,
    handle: TransactionHandle,
    tx_id: &str,
) {
    match executor.rollback(handle) {
        Ok(()) => {
            tc.mark_rolled_back();
            tracing::debug!(%tx_id, executor = %tc.name(), "rolled back");
        }
        Err(source) => {
            let err = TransactionError::RollbackFailed {
                executor: tc.name().to_string(),
                source,
            };
            tracing::error!(%tx_id, executor = %tc.name(), error = %format!("{err:#}"), "rollback failed");
            tc.record_error(format!("{:#}", anyhow::Error::from(err)));
        }
    }
}

// ---------------------------------------------------------------------------
// Chain steps
// ---------------------------------------------------------------------------

/// Chain step that registers transaction contexts for the interface's executors.
#[derive(Debug, Default)]
pub struct TransactionStartService;

impl Service for TransactionStartService {
    fn name(&self) -> &str {
        "transaction_start"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        register_transactions(ctx);
        Ok(())
    }
}

/// Chain step that commits (or rolls back) the interface's transactions.
pub struct TransactionEndService {
    executors: Arc<ResourceExecutorRegistry>,
}

impl TransactionEndService {
    #[must_use]
    pub fn new(executors: Arc<ResourceExecutorRegistry>) -> Self {
        Self { executors }
    }
}

impl Service for TransactionEndService {
    fn name(&self) -> &str {
        "transaction_end"
    }

    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        end_transactions(ctx, &self.executors)
    }
}

// ---------------------------------------------------------------------------
// TransactionCleanupListener
// ---------------------------------------------------------------------------

/// Resolves every platform transaction left open once processing ends:
/// rollback if the Service Context or the Transaction Context carries a
/// recorded error, commit otherwise. Already-completed transactions are
/// left alone, so running it twice is a no-op.
pub struct TransactionCleanupListener {
    executors: Arc<ResourceExecutorRegistry>,
}

impl TransactionCleanupListener {
    #[must_use]
    pub fn new(executors: Arc<ResourceExecutorRegistry>) -> Self {
        Self { executors }
    }
}

impl AfterProcessListener for TransactionCleanupListener {
    fn name(&self) -> &str {
        "transaction_cleanup"
    }

    fn after_process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()> {
        let tx_id = ctx.tx_id().to_string();
        let context_failed = ctx.has_error();

        for tc in ctx.transaction_contexts_mut() {
            let Some(handle) = tc.handle() else {
                continue;
            };
            let Some(executor) = self.executors.get(tc.name()) else {
                tracing::warn!(%tx_id, executor = %tc.name(), "no executor registered; cannot resolve transaction");
                continue;
            };
            if executor.is_completed(handle) {
                continue;
            }

            if context_failed || tc.error().is_some() {
                rollback(tc, executor.as_ref(), handle, &tx_id);
                continue;
            }
            match executor.commit(handle) {
                Ok(()) => {
                    tc.mark_committed();
                    tracing::debug!(%tx_id, executor = %tc.name(), "committed by cleanup");
                }
                Err(source) => {
                    tracing::error!(
                        %tx_id,
                        executor = %tc.name(),
                        error = %format!("{source:#}"),
                        "cleanup commit failed; rolling back"
                    );
                    tc.record_error(format!("{source:#}"));
                    rollback(tc, executor.as_ref(), handle, &tx_id);
                }
            }
        }
        Ok(())
    }
}
