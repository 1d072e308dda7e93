//! Integration with the upstream SQL generator.
//!
//! The generator itself (a hosted language model, a rules engine, a human in
//! a test) is an external collaborator behind [`SqlGenerator`]. This module
//! owns the conversation around it: extracting SQL from replies and driving
//! the correction loop in [`ChatSession`].

pub mod mock;
pub mod parser;
pub mod session;
pub mod types;

pub use mock::MockGenerator;
pub use parser::{extract_sql, GeneratorReply};
pub use session::{system_prompt, ChatSession, TurnOutcome, TurnStatus};
pub use types::{Conversation, Message, Role};

use async_trait::async_trait;

use crate::error::Result;

/// Anything that can turn a conversation into a reply.
///
/// Implementations must be thread-safe (Send + Sync) to support async operations.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generates the next assistant reply for `messages`.
    ///
    /// Transport and provider failures are reported as
    /// [`GuardError::Generator`](crate::error::GuardError::Generator).
    async fn generate(&self, messages: &[Message]) -> Result<String>;
}
