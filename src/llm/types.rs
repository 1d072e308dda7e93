//! Message types exchanged with the SQL generator.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standing instructions.
    System,
    /// End-user questions, and diagnostics fed back by the correction loop.
    User,
    /// Generator replies.
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Conversation history, grouped by top-level request.
///
/// A request is the user's question plus every generator reply and correction
/// message that followed it. Only the most recent `max_requests` requests are
/// kept; the system prompt is never trimmed.
#[derive(Debug, Clone)]
pub struct Conversation {
    system: Option<Message>,
    requests: VecDeque<Vec<Message>>,
    max_requests: usize,
}

impl Conversation {
    /// Default number of requests kept in history.
    pub const DEFAULT_MAX_REQUESTS: usize = 10;

    pub fn new() -> Self {
        Self::with_max_requests(Self::DEFAULT_MAX_REQUESTS)
    }

    pub fn with_max_requests(max_requests: usize) -> Self {
        Self {
            system: None,
            requests: VecDeque::new(),
            max_requests: max_requests.max(1),
        }
    }

    /// Sets or replaces the system prompt.
    pub fn set_system(&mut self, content: impl Into<String>) {
        self.system = Some(Message::system(content));
    }

    /// Starts a new top-level request with the user's question.
    pub fn begin_request(&mut self, question: impl Into<String>) {
        self.requests.push_back(vec![Message::user(question)]);
        while self.requests.len() > self.max_requests {
            self.requests.pop_front();
        }
    }

    /// Appends to the current request, starting one if none is open.
    pub fn push(&mut self, message: Message) {
        match self.requests.back_mut() {
            Some(current) => current.push(message),
            None => self.requests.push_back(vec![message]),
        }
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn add_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    /// All messages in send order, system prompt first.
    pub fn messages(&self) -> Vec<Message> {
        self.system
            .iter()
            .cloned()
            .chain(self.requests.iter().flatten().cloned())
            .collect()
    }

    /// Messages belonging to the current request.
    pub fn current_request(&self) -> &[Message] {
        self.requests.back().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of requests in history.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Drops history but keeps the system prompt.
    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
