//! Integration Test: I/O Boundaries of the Router Core
//!
//! The core is pure routing logic plus async HTTP adapters. It never reads
//! files, the environment, or raw sockets, and never blocks a runtime thread.
//! Configuration loading belongs to the binary.

use architectural_enforcement::{assert_clean, core_src, find_violations, Rule};

const BLOCKING_IO: &[Rule] = &[
    Rule {
        pattern: "std::fs",
        reason: "Blocking file I/O",
    },
    Rule {
        pattern: "std::net",
        reason: "Blocking network I/O",
    },
    Rule {
        pattern: "std::process::Command",
        reason: "Blocking process I/O",
    },
    Rule {
        pattern: "reqwest::blocking",
        reason: "Blocking HTTP client",
    },
    Rule {
        pattern: "std::thread::sleep",
        reason: "Blocking sleep",
    },
];

const AMBIENT_INPUT: &[Rule] = &[
    Rule {
        pattern: "std::env::var",
        reason: "Environment read",
    },
    Rule {
        pattern: "dirs::",
        reason: "Config directory lookup",
    },
    Rule {
        pattern: "toml::",
        reason: "Config file parsing",
    },
];

#[test]
fn test_no_blocking_io_in_core() {
    let violations = find_violations(&core_src(), BLOCKING_IO, &[]);
    assert_clean("Blocking I/O in router core", &violations);
}

#[test]
fn test_core_reads_no_files_or_environment() {
    let violations = find_violations(&core_src(), AMBIENT_INPUT, &[]);
    assert_clean(
        "Configuration I/O in router core (resolve it in the binary instead)",
        &violations,
    );
}
