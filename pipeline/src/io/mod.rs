//! I/O adapters for the pipeline.

pub mod agent;
pub mod attempt_log;
pub mod changes;
pub mod commands;
pub mod config;
pub mod contract;
pub mod git;
pub mod process;
pub mod prompt;
pub mod report_store;
