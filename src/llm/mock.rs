//! Mock generator for testing.
//!
//! Replays a script of replies, then falls back on simple pattern matching
//! over the last user message.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{GuardError, Result};
use crate::llm::types::{Message, Role};
use crate::llm::SqlGenerator;

/// Deterministic generator used by unit and integration tests.
#[derive(Debug, Default)]
pub struct MockGenerator {
    script: Mutex<VecDeque<Result<String>>>,
    patterns: Vec<(String, String)>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply; queued replies are used before any pattern.
    pub fn then_reply(self, reply: impl Into<String>) -> Self {
        self.enqueue(Ok(reply.into()));
        self
    }

    /// Queues a reply wrapping `sql` in a fenced block.
    pub fn then_sql(self, sql: &str) -> Self {
        self.then_reply(format!("```sql\n{}\n```", sql))
    }

    /// Queues a transport failure.
    pub fn then_fail(self, message: &str) -> Self {
        self.enqueue(Err(GuardError::generator(message)));
        self
    }

    /// When the last user message contains `pattern`, reply with `reply`.
    pub fn with_response(mut self, pattern: impl Into<String>, reply: impl Into<String>) -> Self {
        self.patterns.push((pattern.into().to_lowercase(), reply.into()));
        self
    }

    /// Every message list passed to `generate`, in call order.
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.received().len()
    }

    fn enqueue(&self, reply: Result<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    fn pattern_reply(&self, input: &str) -> String {
        let lower = input.to_lowercase();

        if let Some((_, reply)) = self.patterns.iter().find(|(p, _)| lower.contains(p)) {
            return reply.clone();
        }

        if lower.contains("all users") || lower.contains("show users") {
            return "```sql\nSELECT * FROM users\n```".to_string();
        }
        if lower.contains("count") && lower.contains("orders") {
            return "```sql\nSELECT COUNT(*) FROM orders\n```".to_string();
        }
        if lower.contains("count") && lower.contains("users") {
            return "```sql\nSELECT COUNT(*) FROM users\n```".to_string();
        }

        "I don't know how to answer that from the available data.".to_string()
    }
}

#[async_trait]
impl SqlGenerator for MockGenerator {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        if let Ok(mut received) = self.received.lock() {
            received.push(messages.to_vec());
        }

        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        if let Some(reply) = scripted {
            return reply;
        }

        let input = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        Ok(self.pattern_reply(input))
    }
}
