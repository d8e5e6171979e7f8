//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in production code MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `reqwest` (async client).
//!
//! Blocking reads are acceptable in plain functions that run before the page
//! boots (configuration loading).

use architectural_enforcement::{production_files, report, FnKind, SourceFile, Violation};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<Violation> = production_files().iter().flat_map(check_file).collect();

    report(
        "Blocking I/O calls found in async production code!",
        &[
            "",
            "❌ FORBIDDEN in async fn:",
            "  - std::fs::*, std::net::*, std::process::Command",
            "  - reqwest::blocking::*",
            "  - std::io::stdin() / std::io::stdout()",
            "",
            "✅ ACCEPTABLE:",
            "  - Non-async functions (configuration loading before boot)",
            "  - Test code",
        ],
        &violations,
    );
}

/// Test that nothing uses the blocking HTTP client, async or not
#[test]
fn test_no_blocking_http_client() {
    let violations: Vec<Violation> = production_files()
        .iter()
        .flat_map(|file| {
            file.production_lines()
                .into_iter()
                .filter(|(_, code)| code.contains("reqwest::blocking"))
                .map(|(idx, _)| file.violation(idx, "Blocking HTTP client"))
                .collect::<Vec<_>>()
        })
        .collect();

    report("Blocking HTTP client found!", &[], &violations);
}

fn check_file(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, code) in file.production_lines() {
        if file.enclosing_fn(idx) != Some(FnKind::Async) {
            continue;
        }

        if code.contains("std::fs::") {
            violations.push(file.violation(idx, "Blocking file I/O"));
        }
        if code.contains("std::net::") {
            violations.push(file.violation(idx, "Blocking network I/O"));
        }
        if code.contains("std::process::Command") {
            violations.push(file.violation(idx, "Blocking process I/O"));
        }
        if code.contains("std::io::stdin()") || code.contains("std::io::stdout()") {
            violations.push(file.violation(idx, "Blocking stdin/stdout"));
        }
    }

    violations
}

#[cfg(test)]
mod detector_tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_detects_blocking_read_in_async_fn() {
        let file = SourceFile::from_source(
            Path::new("bad.rs"),
            "async fn bad() {\n    let s = std::fs::read_to_string(\"f\");\n}\n",
        );
        assert_eq!(check_file(&file).len(), 1);
    }

    #[test]
    fn test_allows_blocking_read_in_sync_fn() {
        let file = SourceFile::from_source(
            Path::new("ok.rs"),
            "pub fn load() {\n    let s = std::fs::read_to_string(\"f\");\n}\n",
        );
        assert!(check_file(&file).is_empty());
    }
}
