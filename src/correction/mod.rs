//! Self-correction loop for generated SQL.
//!
//! A failed query is diagnosed and fed back to the generator, up to
//! [`MAX_RETRIES`] times per top-level request. After that the machine gives
//! up and asks the generator to explain the failure to the user.
//!
//! ```text
//! Idle -> AwaitingToolResult -> success -> Idle
//!                            -> failure -> Diagnosing -> retry  -> AwaitingToolResult
//!                                                     -> give up -> Idle
//! ```

mod diagnosis;
mod machine;

pub use diagnosis::{categorize, missing_identifier, DiagnosticCategory};
pub use machine::{
    CorrectionAction, CorrectionMachine, CorrectionState, Diagnostic, Phase, MAX_RETRIES,
};
