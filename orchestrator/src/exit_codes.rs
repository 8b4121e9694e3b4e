//! Process exit codes shared by `run`, `select` and `preflight`.
//!
//! Scripts branch on these, so the numbers never change.

pub const OK: i32 = 0;
/// Bad arguments, unreadable config or workspace, or any other error.
pub const INVALID: i32 = 1;
/// Backlog has open stories but none is ready.
pub const NOTHING_READY: i32 = 2;
/// Operator action needed: an override, an environment repair or coverage work.
pub const BLOCKED: i32 = 3;

/// Exit code for a finished pass. Blocking wins over idleness.
pub fn for_pass(blocked: bool, idle: bool) -> i32 {
    if blocked {
        BLOCKED
    } else if idle {
        NOTHING_READY
    } else {
        OK
    }
}

/// Short label for log lines.
pub fn label(code: i32) -> &'static str {
    match code {
        OK => "ok",
        INVALID => "invalid",
        NOTHING_READY => "nothing_ready",
        BLOCKED => "blocked",
        _ => "unknown",
    }
}
