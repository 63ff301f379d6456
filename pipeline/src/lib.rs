//! Contract-driven build pipeline.
//!
//! A task contract declares the files an agent may produce, the layer it works
//! in and the commands that verify it. The pipeline drives an external agent
//! runtime through an implementation phase, judges the result with a local
//! merge gate, and feeds the gate's Re-Run Appendix back for a bounded number
//! of retries. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (contract parsing, the ten
//!   automated checks, constitution rules, report assembly and rendering, the
//!   run state machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (configuration, git, child
//!   processes, the agent runtime, report persistence). Isolated behind traits
//!   to enable fakes in tests.
//!
//! Orchestration modules ([`gate`], [`phases`], [`orchestrator`]) coordinate
//! core logic with I/O to implement the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod phases;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
