//! Integration tests for sqlguard.

pub mod config_test;
pub mod correction_loop_test;
pub mod pipeline_test;
pub mod postgres_test;
