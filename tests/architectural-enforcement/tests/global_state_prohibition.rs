//! Integration Test: Global State Prohibition
//!
//! **Policy**: the event bus and the ad manager are values passed to the
//! components that use them. Production code MUST NOT keep them (or any
//! other mutable shared state) in statics.
//!
//! **Exceptions**: atomic ID counters (`static COUNTER: AtomicU64`).

use architectural_enforcement::{production_files, report, SourceFile, Violation};

const FORBIDDEN_MACROS: &[&str] = &["lazy_static!", "thread_local!"];
const FORBIDDEN_CELLS: &[&str] = &["OnceLock<", "OnceCell<", "LazyLock<", "Lazy<"];
const BUS_TYPES: &[&str] = &["EventAggregator", "AdManager"];

/// Test that production code has no global bus or manager
#[test]
fn test_no_global_event_bus() {
    let violations: Vec<Violation> = production_files().iter().flat_map(check_file).collect();

    report(
        "Global state found in production code!",
        &[
            "",
            "✅ REQUIRED: pass EventAggregator / AdManager clones explicitly",
            "✅ ACCEPTABLE: static atomic counters for IDs",
        ],
        &violations,
    );
}

fn check_file(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, code) in file.production_lines() {
        let trimmed = code.trim_start();

        if FORBIDDEN_MACROS.iter().any(|m| trimmed.contains(m)) {
            violations.push(file.violation(idx, "Global state macro"));
            continue;
        }
        if FORBIDDEN_CELLS.iter().any(|c| trimmed.contains(c)) {
            violations.push(file.violation(idx, "Lazily initialised global"));
            continue;
        }

        let is_static = trimmed.starts_with("static ") || trimmed.starts_with("pub static ");
        if !is_static {
            continue;
        }
        if BUS_TYPES.iter().any(|t| trimmed.contains(t)) {
            violations.push(file.violation(idx, "Static event bus or ad manager"));
        } else if trimmed.contains("static mut ") {
            violations.push(file.violation(idx, "Mutable static"));
        } else if !trimmed.contains("Atomic") {
            violations.push(file.violation(idx, "Non-atomic static"));
        }
    }

    violations
}

#[cfg(test)]
mod detector_tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_static_bus_flagged() {
        let file = SourceFile::from_source(
            Path::new("bad.rs"),
            "static BUS: OnceLock<EventAggregator> = OnceLock::new();\n",
        );
        assert_eq!(check_file(&file).len(), 1);
    }

    #[test]
    fn test_atomic_counter_allowed() {
        let file = SourceFile::from_source(
            Path::new("ok.rs"),
            "fn next() {\n        static COUNTER: AtomicU64 = AtomicU64::new(1);\n}\n",
        );
        assert!(check_file(&file).is_empty());
    }
}
