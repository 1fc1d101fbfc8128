//! In-memory executor double for unit tests.
//!
//! `RecordingExecutor` records every statement it is asked to run and replays
//! scripted results in order (an empty [`QueryOutput`] once the script runs out).
//! Statements issued inside a transaction are only published to the shared log when
//! that transaction commits.

use crate::error::{OrmError, OrmResult};
use crate::executor::{Executor, QueryOutput};
use crate::params::Params;
use crate::transaction::{TransactionScope, TransactionalExecutor};
use crate::value::FieldMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Recorded {
    pub sql: String,
    pub params: Params,
}

#[derive(Debug, Default)]
struct State {
    committed: Vec<Recorded>,
    script: VecDeque<OrmResult<QueryOutput>>,
    commits: usize,
    rollbacks: usize,
    fail_rollback: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RecordingExecutor {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows the next statement returns.
    pub fn returns(&self, rows: Vec<FieldMap>) -> &Self {
        self.respond(Ok(QueryOutput::from_rows(rows)))
    }

    /// Queue an affected-row count with no rows.
    pub fn affects(&self, affected_rows: u64) -> &Self {
        self.respond(Ok(QueryOutput::new(Vec::new(), affected_rows)))
    }

    /// Queue a failure for the next statement.
    pub fn fails(&self, error: OrmError) -> &Self {
        self.respond(Err(error))
    }

    pub fn respond(&self, result: OrmResult<QueryOutput>) -> &Self {
        lock(&self.state).script.push_back(result);
        self
    }

    pub fn fail_rollback(&self) {
        lock(&self.state).fail_rollback = true;
    }

    /// Statements visible outside any open transaction.
    pub fn committed(&self) -> Vec<Recorded> {
        lock(&self.state).committed.clone()
    }

    pub fn committed_sql(&self) -> Vec<String> {
        self.committed().into_iter().map(|r| r.sql).collect()
    }

    /// The most recent committed statement.
    pub fn last(&self) -> Recorded {
        lock(&self.state)
            .committed
            .last()
            .cloned()
            .expect("no statement recorded")
    }

    pub fn commits(&self) -> usize {
        lock(&self.state).commits
    }

    pub fn rollbacks(&self) -> usize {
        lock(&self.state).rollbacks
    }

    /// Open a transaction without going through `begin`.
    pub fn open(&self) -> RecordingTx {
        RecordingTx {
            state: Arc::clone(&self.state),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn next_result(state: &Mutex<State>) -> OrmResult<QueryOutput> {
        lock(state)
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(QueryOutput::default()))
    }
}

impl Executor for RecordingExecutor {
    async fn execute(&self, sql: &str, params: &Params) -> OrmResult<QueryOutput> {
        lock(&self.state).committed.push(Recorded {
            sql: sql.to_string(),
            params: params.clone(),
        });
        Self::next_result(&self.state)
    }
}

impl TransactionalExecutor for RecordingExecutor {
    type Transaction<'a> = RecordingTx;

    async fn begin(&mut self) -> OrmResult<RecordingTx> {
        Ok(self.open())
    }
}

#[derive(Debug)]
pub(crate) struct RecordingTx {
    state: Arc<Mutex<State>>,
    pending: Mutex<Vec<Recorded>>,
}

impl Executor for RecordingTx {
    async fn execute(&self, sql: &str, params: &Params) -> OrmResult<QueryOutput> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Recorded {
                sql: sql.to_string(),
                params: params.clone(),
            });
        RecordingExecutor::next_result(&self.state)
    }
}

impl TransactionScope for RecordingTx {
    async fn commit(self) -> OrmResult<()> {
        let pending = self
            .pending
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut state = lock(&self.state);
        state.committed.extend(pending);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self) -> OrmResult<()> {
        let mut state = lock(&self.state);
        state.rollbacks += 1;
        if state.fail_rollback {
            return Err(OrmError::Other("connection closed".into()));
        }
        Ok(())
    }
}
