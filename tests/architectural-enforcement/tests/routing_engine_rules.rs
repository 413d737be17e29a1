//! Integration Test: Routing Engine Structure
//!
//! The routing engine reacts to requests and explicit refreshes only. It
//! owns no timers and spawns no background work; every probe runs inside
//! the caller's future. Bounded waits via `tokio::time::timeout` are fine.
//!
//! Process-wide mutable state is forbidden everywhere in the core so that
//! two routers in one process never share health or metrics.

use architectural_enforcement::{assert_clean, core_src, find_violations, Rule};

const NO_BACKGROUND_WORK: &[Rule] = &[
    Rule {
        pattern: "tokio::spawn",
        reason: "Background task",
    },
    Rule {
        pattern: "spawn_blocking",
        reason: "Background task",
    },
    Rule {
        pattern: "tokio::time::sleep",
        reason: "Timer",
    },
    Rule {
        pattern: "tokio::time::interval",
        reason: "Periodic timer",
    },
    Rule {
        pattern: "std::thread::spawn",
        reason: "Background thread",
    },
];

const NO_GLOBAL_STATE: &[Rule] = &[
    Rule {
        pattern: "static mut",
        reason: "Mutable global",
    },
    Rule {
        pattern: "lazy_static!",
        reason: "Lazy global",
    },
    Rule {
        pattern: "OnceLock",
        reason: "Lazy global",
    },
    Rule {
        pattern: "OnceCell",
        reason: "Lazy global",
    },
    Rule {
        pattern: "thread_local!",
        reason: "Thread-local state",
    },
];

#[test]
fn test_routing_engine_has_no_timers_or_tasks() {
    let violations = find_violations(&core_src().join("routing"), NO_BACKGROUND_WORK, &[]);
    assert_clean("Timers or background work in the routing engine", &violations);
}

#[test]
fn test_no_global_mutable_state_in_core() {
    let violations = find_violations(&core_src(), NO_GLOBAL_STATE, &[]);
    assert_clean("Global mutable state in router core", &violations);
}
