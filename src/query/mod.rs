//! Query execution, error classification and result envelopes.
//!
//! This module sits between the safety layer and the correction loop: it turns
//! untrusted SQL text into exactly one [`Envelope`].

pub mod classify;
pub mod envelope;
pub mod executor;

pub use classify::{classify, Classification, Disclosure};
pub use envelope::{Envelope, ErrorBody, QueryData, SuccessBody};
pub use executor::{QueryExecutor, DEFAULT_TIMEOUT};
