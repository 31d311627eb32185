//! In-process resource executor.
//!
//! Keeps statements per open transaction and moves them to the committed
//! log on commit. Every operation is appended to a journal that can be
//! shared between executors to observe cross-resource ordering. Commits and
//! individual queries can be made to fail for testing partial-failure paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use switchyard_core::{QueryMap, ResourceExecutor, TransactionHandle};

/// Shared, ordered log of executor operations (e.g. `"orders:commit tx#1"`).
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct MemoryState {
    open: HashMap<TransactionHandle, Vec<String>>,
    completed: HashSet<TransactionHandle>,
    committed: Vec<String>,
    fail_commits: bool,
    failing_queries: HashSet<String>,
}

/// [`ResourceExecutor`] backed by process memory.
pub struct MemoryExecutor {
    name: String,
    next_handle: AtomicU64,
    state: Mutex<MemoryState>,
    journal: Journal,
}

impl MemoryExecutor {
    /// Creates an executor with its own journal.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_journal(name, Arc::new(Mutex::new(Vec::new())))
    }

    /// Creates an executor appending to a shared journal.
    pub fn with_journal(name: impl Into<String>, journal: Journal) -> Self {
        Self {
            name: name.into(),
            next_handle: AtomicU64::new(1),
            state: Mutex::new(MemoryState::default()),
            journal,
        }
    }

    /// Makes every subsequent commit fail (the transaction stays open).
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().fail_commits = fail;
    }

    /// Makes every execution of the query with this id fail.
    pub fn fail_query(&self, query_id: impl Into<String>) {
        self.state.lock().failing_queries.insert(query_id.into());
    }

    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    /// Statements made durable by commits or by untransacted execution.
    #[must_use]
    pub fn committed_statements(&self) -> Vec<String> {
        self.state.lock().committed.clone()
    }

    fn log(&self, entry: impl std::fmt::Display) {
        self.journal.lock().push(format!("{}:{entry}", self.name));
    }
}

impl ResourceExecutor for MemoryExecutor {
    fn begin(&self) -> anyhow::Result<TransactionHandle> {
        let handle = TransactionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.state.lock().open.insert(handle, Vec::new());
        self.log(format_args!("begin {handle}"));
        Ok(handle)
    }

    fn commit(&self, handle: TransactionHandle) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_commits {
            drop(state);
            self.log(format_args!("commit-failed {handle}"));
            anyhow::bail!("{}: commit rejected for {handle}", self.name);
        }
        let statements = state
            .open
            .remove(&handle)
            .ok_or_else(|| anyhow::anyhow!("{}: {handle} is not open", self.name))?;
        state.committed.extend(statements);
        state.completed.insert(handle);
        drop(state);
        self.log(format_args!("commit {handle}"));
        Ok(())
    }

    fn rollback(&self, handle: TransactionHandle) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state
            .open
            .remove(&handle)
            .ok_or_else(|| anyhow::anyhow!("{}: {handle} is not open", self.name))?;
        state.completed.insert(handle);
        drop(state);
        self.log(format_args!("rollback {handle}"));
        Ok(())
    }

    fn is_completed(&self, handle: TransactionHandle) -> bool {
        self.state.lock().completed.contains(&handle)
    }

    fn execute(
        &self,
        handle: Option<TransactionHandle>,
        query: &QueryMap,
        statement: &str,
    ) -> anyhow::Result<Value> {
        let mut state = self.state.lock();
        if state.failing_queries.contains(&query.id) {
            drop(state);
            self.log(format_args!("query-failed {}", query.id));
            anyhow::bail!("{}: query {} failed", self.name, query.id);
        }
        match handle {
            Some(handle) => state
                .open
                .get_mut(&handle)
                .ok_or_else(|| anyhow::anyhow!("{}: {handle} is not open", self.name))?
                .push(statement.to_string()),
            None => state.committed.push(statement.to_string()),
        }
        drop(state);
        self.log(format_args!("query {}", query.id));
        Ok(json!({
            "executor": self.name,
            "query": query.id,
            "statement": statement,
        }))
    }
}
