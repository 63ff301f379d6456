//! Stable exit codes for the `pipeline` binary.

/// The gate passed (or an implementation-only run completed).
pub const OK: i32 = 0;
/// The gate still failed after the last permitted attempt.
pub const GATE_FAILED: i32 = 1;
/// Invalid invocation (reported by clap).
pub const USAGE: i32 = 2;
/// The run aborted: unreadable contract, agent exhaustion or failure,
/// report write failure, or another I/O error.
pub const ABORTED: i32 = 3;
