//! Contracts for chain steps, error handlers, after-process listeners and
//! dynamic code units.

use crate::context::ServiceContext;
use crate::error::FailureKind;

/// One step of a service chain.
///
/// Services run sequentially on the worker that owns the transaction and
/// may block. A returned error is recorded in the error trace; whether it
/// ends the chain depends on the `ignore_error` flag the step was configured
/// with.
///
/// Used as `Arc<dyn Service>`.
pub trait Service: Send + Sync {
    /// Short type name used in logs (e.g. `"transaction_start"`).
    fn name(&self) -> &str;

    /// Runs the step against the live context.
    fn process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()>;
}

/// Step of an error-handler chain, run after an unrecovered chain failure.
///
/// Failures returned by `handle_error` are logged and do not stop the
/// remaining handlers.
pub trait ErrorHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler reacts to a failure of the given kind.
    /// Defaults to reacting to every failure.
    fn is_triggered(&self, _kind: FailureKind) -> bool {
        true
    }

    fn handle_error(&self, ctx: &mut ServiceContext) -> anyhow::Result<()>;
}

/// Cleanup hook run after the main chain and error handlers, on every exit path.
pub trait AfterProcessListener: Send + Sync {
    fn name(&self) -> &str;

    fn after_process(&self, ctx: &mut ServiceContext) -> anyhow::Result<()>;
}

/// Business logic unit produced by a dynamic code loader and dispatched by id.
///
/// Same failure contract as [`Service::process`].
pub trait DynamicCode: Send + Sync {
    fn id(&self) -> &str;

    fn execute(&self, ctx: &mut ServiceContext) -> anyhow::Result<()>;
}
