//! sqlguard - read-only SQL validation and bounded self-correction.
//!
//! Generated SQL passes through [`safety`] (policy validation and row-limit
//! rewriting), runs through [`query`] against a [`db`] backend, and comes back
//! as an [`query::Envelope`]. [`correction`] decides what the generator is
//! told after a failure.

pub mod cli;
pub mod config;
pub mod correction;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod query;
pub mod safety;
