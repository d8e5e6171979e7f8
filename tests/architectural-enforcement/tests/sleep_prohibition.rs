//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code MUST NOT block a thread with
//! `std::thread::sleep`, and MUST NOT use `tokio::time::sleep` as a poor
//! man's synchronisation.
//!
//! **Exceptions**: a sleep raced against a cancellation token inside
//! `tokio::select!` (the ad batch window), and one-shot timer helpers
//! (`spawn_timeout`). Periodic work uses `tokio::time::interval`.

use architectural_enforcement::{production_files, report, SourceFile, Violation};

/// Test that production code does not contain sleep calls outside timers
#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<Violation> = production_files().iter().flat_map(check_file).collect();

    report(
        "Sleep calls found in production code!",
        &[
            "",
            "✅ ACCEPTABLE sleep uses:",
            "  - tokio::time::sleep raced against cancellation in tokio::select!",
            "  - One-shot timer helpers (spawn_timeout)",
            "  - Test code",
            "  - Periodic tasks using tokio::time::interval()",
            "",
            "❌ FORBIDDEN:",
            "  - std::thread::sleep anywhere",
            "  - Sleep in polling loops",
            "  - Sleep to 'wait' for events",
        ],
        &violations,
    );
}

fn check_file(file: &SourceFile) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (idx, code) in file.production_lines() {
        if code.contains("thread::sleep(") {
            violations.push(file.violation(idx, "Thread sleep"));
            continue;
        }

        if code.contains("::sleep(") || code.contains(".sleep(") {
            if is_select_arm(file, idx) || is_timer_helper(file, idx) {
                continue;
            }
            violations.push(file.violation(idx, "Async sleep outside a timer"));
        }
    }

    violations
}

/// Sleep is one arm of a nearby `tokio::select!`
fn is_select_arm(file: &SourceFile, idx: usize) -> bool {
    let start = idx.saturating_sub(3);
    file.lines[start..=idx].iter().any(|l| l.contains("select!"))
}

/// Sleep sits in a function whose job is to fire after a delay
fn is_timer_helper(file: &SourceFile, idx: usize) -> bool {
    file.enclosing_signature(idx)
        .is_some_and(|sig| sig.contains("timeout"))
}

#[cfg(test)]
mod detector_tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_sleep_violation_detection() {
        let file = SourceFile::from_source(
            Path::new("bad.rs"),
            "async fn poll() {\n    loop {\n        tokio::time::sleep(d).await;\n    }\n}\n",
        );
        assert_eq!(check_file(&file).len(), 1);
    }

    #[test]
    fn test_thread_sleep_always_flagged() {
        let file = SourceFile::from_source(
            Path::new("bad.rs"),
            "pub fn spawn_timeout() {\n    std::thread::sleep(d);\n}\n",
        );
        assert_eq!(check_file(&file).len(), 1);
    }

    #[test]
    fn test_select_arm_allowed() {
        let file = SourceFile::from_source(
            Path::new("ok.rs"),
            "fn f() {\n    tokio::select! {\n        () = token.cancelled() => return,\n        () = tokio::time::sleep(window) => {}\n    }\n}\n",
        );
        assert!(check_file(&file).is_empty());
    }
}
