//! Deterministic, pure logic shared by the pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (contract text, produced file contents, command outcomes) and return
//! deterministic outputs suitable for tests.

pub mod checks;
pub mod constitution;
pub mod contract;
pub mod engine;
pub mod identity;
pub mod layers;
pub mod render;
pub mod report;
pub mod review;
pub mod run;
pub mod source;
pub mod types;
