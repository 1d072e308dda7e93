//! In-memory backends for testing.
//!
//! `MockBackend` replays scripted results and records every request it sees;
//! `FailingBackend` fails every call with one fixed driver error.

use super::{DriverError, ExecutionRequest, QueryBackend, RawResultSet, Value};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Scripted = std::result::Result<RawResultSet, DriverError>;

/// A backend that returns predefined results.
///
/// Scripted outcomes are consumed in order; once the script runs out every
/// call gets the default result.
#[derive(Debug, Default)]
pub struct MockBackend {
    script: Mutex<VecDeque<Scripted>>,
    default_result: RawResultSet,
    delay: Option<Duration>,
    requests: Mutex<Vec<ExecutionRequest>>,
    in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl MockBackend {
    /// Creates a backend that answers every call with a single one-column row.
    pub fn new() -> Self {
        Self::with_default(RawResultSet::with_data(
            vec!["result".to_string()],
            vec![vec![Value::Int(1)]],
        ))
    }

    /// Creates a backend whose fallback answer is `result`.
    pub fn with_default(result: RawResultSet) -> Self {
        Self {
            default_result: result,
            ..Self::default()
        }
    }

    /// Creates a backend that returns `count` rows of a single `id` column.
    pub fn with_rows(count: usize) -> Self {
        let rows = (1..=count as i64).map(|id| vec![Value::Int(id)]).collect();
        Self::with_default(RawResultSet::with_data(vec!["id".to_string()], rows))
    }

    /// Queues a successful result.
    pub fn then_ok(self, result: RawResultSet) -> Self {
        self.push(Ok(result));
        self
    }

    /// Queues a driver failure.
    pub fn then_err(self, error: DriverError) -> Self {
        self.push(Err(error));
        self
    }

    /// Makes every call sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// SQL of the most recent request.
    pub fn last_sql(&self) -> Option<String> {
        self.requests().last().map(|request| request.sql.clone())
    }

    /// Calls that have started but not yet returned.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Calls that ran to completion, successful or not.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn push(&self, outcome: Scripted) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    fn next_outcome(&self) -> Scripted {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| Ok(self.default_result.clone()))
    }
}

#[async_trait]
impl QueryBackend for MockBackend {
    async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> std::result::Result<RawResultSet, DriverError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.next_outcome();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A backend whose every call fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingBackend {
    error: DriverError,
}

impl FailingBackend {
    pub fn new(error: DriverError) -> Self {
        Self { error }
    }

    /// Fails like a Postgres statement cancelled by `statement_timeout`.
    pub fn timeout() -> Self {
        Self::new(DriverError::database(
            Some("57014"),
            "canceling statement due to statement timeout",
        ))
    }

    /// Fails like an unreachable server.
    pub fn unreachable() -> Self {
        Self::new(DriverError::Connection(
            "error communicating with database: Connection refused (os error 111)".to_string(),
        ))
    }
}

#[async_trait]
impl QueryBackend for FailingBackend {
    async fn execute(
        &self,
        _request: &ExecutionRequest,
    ) -> std::result::Result<RawResultSet, DriverError> {
        Err(self.error.clone())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
