//! One conversation with the generator, including self-correction.

use std::sync::Arc;
use tracing::{debug, info};

use crate::correction::{CorrectionAction, CorrectionMachine};
use crate::error::Result;
use crate::llm::parser::extract_sql;
use crate::llm::types::Conversation;
use crate::llm::SqlGenerator;
use crate::query::{Envelope, QueryExecutor};
use crate::safety::ValidationPolicy;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// A query ran successfully.
    Answered,
    /// The generator replied without SQL.
    NoQuery,
    /// Retries ran out; the answer is the generator's explanation.
    GaveUp,
}

/// Result of one top-level question.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Generator prose for the user.
    pub answer: String,
    /// The last envelope produced in this turn, if any query ran.
    pub envelope: Option<Envelope>,
    /// Number of queries sent to the executor.
    pub attempts: u32,
}

/// Standing instructions derived from the policy.
pub fn system_prompt(policy: &ValidationPolicy) -> String {
    let mut prompt = format!(
        "You answer questions by writing one read-only {} SELECT query against the '{}' schema. \
         Put the query in a single ```sql code block. Results are capped at {} rows.",
        policy.dialect(),
        policy.primary_schema(),
        policy.max_row_limit()
    );

    if !policy.allowed_tables().is_empty() {
        let tables: Vec<&str> = policy.allowed_tables().iter().map(String::as_str).collect();
        prompt.push_str(&format!(" Only these tables may be used: {}.", tables.join(", ")));
    }

    prompt.push_str(
        " If a query fails you will be told why; reply with a corrected query. \
         If told to stop, explain the problem in plain language without SQL.",
    );
    prompt
}

/// Drives generator, executor and correction machine for one conversation.
///
/// Owns its correction state, so one session must serve one conversation.
pub struct ChatSession {
    generator: Arc<dyn SqlGenerator>,
    executor: QueryExecutor,
    conversation: Conversation,
    machine: CorrectionMachine,
}

impl ChatSession {
    pub fn new(generator: Arc<dyn SqlGenerator>, executor: QueryExecutor) -> Self {
        let mut conversation = Conversation::new();
        conversation.set_system(system_prompt(executor.policy()));
        let machine = CorrectionMachine::new().with_dialect(executor.policy().dialect());

        Self {
            generator,
            executor,
            conversation,
            machine,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn machine(&self) -> &CorrectionMachine {
        &self.machine
    }

    /// Answers one top-level question.
    ///
    /// Only generator transport failures are returned as errors; query
    /// failures end up in the outcome.
    pub async fn ask(&mut self, question: &str) -> Result<TurnOutcome> {
        self.machine.begin_request();
        self.conversation.begin_request(question);

        let mut attempts = 0;
        let mut gave_up = false;
        let mut last_envelope: Option<Envelope> = None;

        loop {
            let reply = self
                .generator
                .generate(&self.conversation.messages())
                .await?;
            self.conversation.add_assistant(reply.as_str());

            let parsed = extract_sql(&reply);
            let sql = match parsed.sql {
                Some(sql) if !gave_up => sql,
                _ => {
                    let status = if gave_up {
                        TurnStatus::GaveUp
                    } else {
                        TurnStatus::NoQuery
                    };
                    debug!(?status, attempts, "turn ended without a further query");
                    return Ok(TurnOutcome {
                        status,
                        answer: parsed.text,
                        envelope: last_envelope,
                        attempts,
                    });
                }
            };

            attempts += 1;
            self.machine.dispatch(&sql);
            let envelope = self.executor.execute(&sql).await;

            match self.machine.observe(&envelope) {
                CorrectionAction::Completed => {
                    info!(attempts, "question answered");
                    return Ok(TurnOutcome {
                        status: TurnStatus::Answered,
                        answer: parsed.text,
                        envelope: Some(envelope),
                        attempts,
                    });
                }
                CorrectionAction::Retry(diagnostic) => {
                    self.conversation.add_user(diagnostic.message);
                }
                CorrectionAction::GiveUp(message) => {
                    self.conversation.add_user(message);
                    gave_up = true;
                }
            }

            last_envelope = Some(envelope);
        }
    }
}
