//! Per-resource transaction state and the resource-executor contract.

use std::fmt;

use serde_json::Value;

use crate::interface::QueryMap;

/// Opaque platform transaction handle issued by a [`ResourceExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.id())
    }
}

/// A named transactional resource (e.g. one database) whose commit and
/// rollback are coordinated independently per transaction.
///
/// Implementations wrap a concrete datastore driver. All operations block
/// the calling worker; per-call timeouts (`QueryMap::timeout_ms`) are the
/// implementation's responsibility.
///
/// Used as `Arc<dyn ResourceExecutor>`.
pub trait ResourceExecutor: Send + Sync {
    /// Opens a platform transaction.
    fn begin(&self) -> anyhow::Result<TransactionHandle>;

    /// Commits the transaction behind `handle`.
    fn commit(&self, handle: TransactionHandle) -> anyhow::Result<()>;

    /// Rolls back the transaction behind `handle`.
    fn rollback(&self, handle: TransactionHandle) -> anyhow::Result<()>;

    /// Whether the transaction behind `handle` has been committed or rolled back.
    fn is_completed(&self, handle: TransactionHandle) -> bool;

    /// Runs a query. With `handle == None` the query runs outside any
    /// coordinated transaction.
    fn execute(
        &self,
        handle: Option<TransactionHandle>,
        query: &QueryMap,
        statement: &str,
    ) -> anyhow::Result<Value>;
}

/// Transaction state for one resource executor within one Service Context.
///
/// Created empty by the transaction-start step, given a platform handle on
/// first use, and resolved (committed or rolled back) exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionContext {
    name: String,
    started: bool,
    ended: bool,
    committed: bool,
    rolled_back: bool,
    handle: Option<TransactionHandle>,
    history: Vec<String>,
    error: Option<String>,
}

impl TransactionContext {
    /// Creates an empty context with no platform handle.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: false,
            ended: false,
            committed: false,
            rolled_back: false,
            handle: None,
            history: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn handle(&self) -> Option<TransactionHandle> {
        self.handle
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// A platform transaction is open and has not been resolved through this context.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.handle.is_some() && !self.ended
    }

    /// Append-only record of the operations performed under this transaction.
    #[must_use]
    pub fn history(&self) -> &[String] {
        &self.history
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Attaches a freshly begun platform transaction.
    pub fn begin(&mut self, handle: TransactionHandle) {
        self.handle = Some(handle);
        self.started = true;
        self.history.push(format!("begin {handle}"));
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
        self.ended = true;
        self.history.push("commit".to_string());
    }

    pub fn mark_rolled_back(&mut self) {
        self.rolled_back = true;
        self.ended = true;
        self.history.push("rollback".to_string());
    }

    /// Appends an entry to the history.
    pub fn record(&mut self, operation: impl Into<String>) {
        self.history.push(operation.into());
    }

    /// Records an error. The first recorded error is kept.
    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.history.push(format!("error: {error}"));
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}
