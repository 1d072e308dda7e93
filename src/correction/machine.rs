//! Bounded self-correction state machine.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::diagnosis::{
    categorize, guidance, missing_identifier, plain_explanation, DiagnosticCategory,
};
use crate::error::ErrorKind;
use crate::query::{Envelope, ErrorBody};
use crate::safety::{extract_tables, Dialect};

/// Attempts allowed after the first failure before giving up.
pub const MAX_RETRIES: u32 = 3;

/// Where the machine is in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    AwaitingToolResult,
    Diagnosing,
}

/// Failure context for the current top-level request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorrectionState {
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<ErrorKind>,
    pub last_message: String,
    pub failed_sql: String,
    pub tables_involved: BTreeSet<String>,
    pub needs_correction: bool,
}

impl CorrectionState {
    pub fn new() -> Self {
        Self {
            retry_count: 0,
            max_retries: MAX_RETRIES,
            last_error: None,
            last_message: String::new(),
            failed_sql: String::new(),
            tables_involved: BTreeSet::new(),
            needs_correction: false,
        }
    }

    /// Clears everything, including the retry count.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

impl Default for CorrectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Guidance sent back to the generator after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    /// 1-based retry number this diagnostic starts.
    pub attempt: u32,
    pub max_retries: u32,
    pub missing_identifier: Option<String>,
    /// Full text for the generator.
    pub message: String,
}

/// What the conversation loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrectionAction {
    /// The query succeeded; nothing to correct.
    Completed,
    /// Feed the diagnostic to the generator and wait for a new query.
    Retry(Diagnostic),
    /// Stop retrying; feed this message to the generator so it can explain.
    GiveUp(String),
}

/// Drives one conversation's correction loop.
///
/// Owned by a single session. Create one per conversation and never share it
/// between concurrent requests.
#[derive(Debug, Clone, Default)]
pub struct CorrectionMachine {
    state: CorrectionState,
    phase: Phase,
    pending_sql: Option<String>,
    dialect: Dialect,
}

impl CorrectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `dialect` when extracting table names from failed SQL.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn state(&self) -> &CorrectionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A new top-level user message: drop every trace of the previous one.
    pub fn begin_request(&mut self) {
        if self.state.retry_count > 0 || self.state.needs_correction {
            debug!(
                retry_count = self.state.retry_count,
                "discarding correction context for new request"
            );
        }
        self.state.reset();
        self.phase = Phase::Idle;
        self.pending_sql = None;
    }

    /// Records that `sql` was sent to the query tool.
    pub fn dispatch(&mut self, sql: &str) {
        self.pending_sql = Some(sql.to_string());
        self.phase = Phase::AwaitingToolResult;
    }

    /// Consumes a tool result and decides what happens next.
    pub fn observe(&mut self, envelope: &Envelope) -> CorrectionAction {
        match envelope {
            Envelope::Success(_) => {
                if self.state.retry_count > 0 {
                    info!(retries = self.state.retry_count, "query corrected");
                }
                self.state.reset();
                self.phase = Phase::Idle;
                self.pending_sql = None;
                CorrectionAction::Completed
            }
            Envelope::Failure(error) => {
                self.record_failure(error);
                self.diagnose()
            }
        }
    }

    /// Like [`observe`](Self::observe), for a result that arrived as JSON.
    pub fn observe_json(&mut self, json: &str) -> CorrectionAction {
        self.observe(&Envelope::from_json(json))
    }

    fn record_failure(&mut self, error: &ErrorBody) {
        if self.phase != Phase::AwaitingToolResult {
            warn!(phase = ?self.phase, "tool result observed without a dispatched query");
        }

        let failed_sql = self.pending_sql.take().unwrap_or_default();
        self.state.tables_involved = extract_tables(&failed_sql, self.dialect);
        self.state.failed_sql = failed_sql;
        self.state.last_error = Some(error.code);
        self.state.last_message = error.message.clone();
        self.state.needs_correction = true;
        self.phase = Phase::Diagnosing;
    }

    fn diagnose(&mut self) -> CorrectionAction {
        // Without the SQL that failed there is nothing specific to say.
        let category = if self.state.failed_sql.is_empty() {
            DiagnosticCategory::Execution
        } else {
            categorize(self.state.last_error, &self.state.last_message)
        };

        if self.state.retries_exhausted() {
            let message = self.give_up_message(category);
            info!(
                retries = self.state.retry_count,
                category = %category,
                "giving up on query correction"
            );
            self.state.retry_count = self.state.max_retries;
            self.state.needs_correction = false;
            self.phase = Phase::Idle;
            return CorrectionAction::GiveUp(message);
        }

        self.state.retry_count += 1;
        let identifier = missing_identifier(&self.state.last_message);
        let message = self.diagnostic_message(category, identifier.as_deref());

        debug!(
            attempt = self.state.retry_count,
            max = self.state.max_retries,
            category = %category,
            "injecting diagnostic"
        );

        self.phase = Phase::AwaitingToolResult;
        CorrectionAction::Retry(Diagnostic {
            category,
            attempt: self.state.retry_count,
            max_retries: self.state.max_retries,
            missing_identifier: identifier,
            message,
        })
    }

    fn diagnostic_message(&self, category: DiagnosticCategory, identifier: Option<&str>) -> String {
        let state = &self.state;
        let code = state
            .last_error
            .map(|kind| kind.as_str())
            .unwrap_or("UNKNOWN");

        let mut message = format!(
            "The previous query failed (retry {} of {}).\n\nError [{}]: {}\n",
            state.retry_count, state.max_retries, code, state.last_message
        );

        if !state.failed_sql.is_empty() {
            message.push_str(&format!("\nFailed SQL:\n```sql\n{}\n```\n", state.failed_sql));
        }

        message.push_str(&format!(
            "\nDiagnosis: {}. {}\n\nReply with one corrected SQL query in a ```sql code block.",
            category.label(),
            guidance(category, identifier, &state.tables_involved)
        ));

        message
    }

    fn give_up_message(&self, category: DiagnosticCategory) -> String {
        let state = &self.state;
        let mut message = format!(
            "The query still fails after {} correction attempts. Do not send another query. \
             Explain the problem to the user instead.\n",
            state.max_retries
        );

        if !state.failed_sql.is_empty() {
            message.push_str(&format!(
                "\nLast attempted SQL:\n```sql\n{}\n```\n",
                state.failed_sql
            ));
        }

        message.push_str(&format!(
            "\nWhat went wrong: {}\n\
             \nSuggest alternatives to the user:\n\
             - Rephrase the question with the specific fields, filters or time range they need.\n\
             - Ask a smaller question first and build up from the answer.\n\
             - Check with whoever owns the data that it exists and is available here.\n",
            plain_explanation(category)
        ));

        if category.reveals_pattern() {
            message.push_str(
                "\nThis failure points at how the data is actually named or typed. Offer to \
                 record it as a correction so future questions avoid the same mistake.",
            );
        } else {
            message.push_str(
                "\nIf the user explains what was meant, offer to record it as a correction for \
                 future questions.",
            );
        }

        message
    }
}
