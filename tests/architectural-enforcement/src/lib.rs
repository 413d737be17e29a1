//! Architectural Enforcement Integration Tests
//!
//! Source-scanning checks for the structural rules of the router core:
//! - No blocking or ambient I/O (files, environment, sockets) in the core
//! - No timers or background tasks inside the routing engine
//! - No global mutable singletons
//!
//! The helpers here walk a source tree and yield production lines only,
//! skipping comments and everything from the first `#[cfg(test)]` onward.

use std::fs;
use std::path::{Path, PathBuf};

/// Root of the router core's sources
#[must_use]
pub fn core_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../router/core/src")
}

/// A forbidden pattern and why it is forbidden
pub struct Rule {
    /// Substring that must not appear in production code
    pub pattern: &'static str,
    /// Shown next to each violation
    pub reason: &'static str,
}

/// Every `.rs` file below `dir`, sorted for stable output
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of `content` as `(line_number, code)` pairs
///
/// Stops at the first `#[cfg(test)]`; our test modules always sit at the end
/// of a file. Trailing `//` comments are cut off the returned code.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter_map(|(idx, line)| {
            let code = line.split("//").next().unwrap_or(line).trim();
            (!code.is_empty()).then_some((idx + 1, code))
        })
        .collect()
}

/// Scan every file below `dir` for any of `rules`
///
/// `skip` lists file names (relative to `dir`) that are exempt.
#[must_use]
pub fn find_violations(dir: &Path, rules: &[Rule], skip: &[&str]) -> Vec<String> {
    let mut violations = Vec::new();

    for path in rust_files(dir) {
        let relative = path.strip_prefix(dir).unwrap_or(&path);
        if skip.iter().any(|s| Path::new(s) == relative) {
            continue;
        }

        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };

        for (line_number, code) in production_lines(&content) {
            for rule in rules {
                if code.contains(rule.pattern) {
                    violations.push(format!(
                        "{}:{} - {}: {}",
                        relative.display(),
                        line_number,
                        rule.reason,
                        code
                    ));
                }
            }
        }
    }

    violations
}

/// Panic with a readable report when `violations` is non-empty
pub fn assert_clean(title: &str, violations: &[String]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n{title}\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("Found {} violation(s): {title}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_tests_and_drop_comments() {
        let source = "use std::fmt;\n// std::fs is fine here\nlet x = 1; // trailing\n\n#[cfg(test)]\nmod tests { std::fs::read(\"x\"); }\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "use std::fmt;"), (3, "let x = 1;")]);
    }

    #[test]
    fn test_core_sources_are_found() {
        let files = rust_files(&core_src());
        assert!(files.iter().any(|p| p.ends_with("routing/router.rs")));
    }
}
