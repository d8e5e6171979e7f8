//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the tests in this package. The tests enforce:
//! - No blocking I/O inside async functions
//! - No thread sleeps, and async sleeps only as cancellable timers
//! - No global (static) event bus or ad manager; both are injected
//!
//! Scanning is line-based. Everything after a `#[cfg(test)]` marker is test
//! code and is skipped, as are comment lines and trailing comments.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["frontpage/core/src"];

/// Workspace root, derived from this package's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// A rule violation at one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the violation
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Short rule description
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Kind of the function enclosing a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn`
    Async,
    /// plain `fn`
    Sync,
}

/// A loaded source file
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path on disk
    pub path: PathBuf,
    /// Raw lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Read a file; `None` if unreadable
    pub fn load(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self::from_source(path, &content))
    }

    /// Build from in-memory source
    pub fn from_source(path: &Path, content: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Index of the first `#[cfg(test)]` line, or the line count
    pub fn test_boundary(&self) -> usize {
        self.lines
            .iter()
            .position(|l| l.trim().starts_with("#[cfg(test)]"))
            .unwrap_or(self.lines.len())
    }

    /// `(index, code)` for each production line, comments stripped
    pub fn production_lines(&self) -> Vec<(usize, &str)> {
        self.lines[..self.test_boundary()]
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let trimmed = line.trim_start();
                if trimmed.starts_with("//") {
                    return None;
                }
                let code = line.split("//").next().unwrap_or(line);
                Some((idx, code))
            })
            .collect()
    }

    /// The function enclosing line `idx`, by scanning backwards
    pub fn enclosing_fn(&self, idx: usize) -> Option<FnKind> {
        let lines: Vec<&str> = self.lines.iter().map(String::as_str).collect();
        enclosing_fn(&lines, idx)
    }

    /// The signature line of the function enclosing `idx`
    pub fn enclosing_signature(&self, idx: usize) -> Option<&str> {
        (0..=idx)
            .rev()
            .map(|i| self.lines[i].as_str())
            .find(|l| fn_kind(l).is_some())
    }

    /// Record a violation at line `idx`
    pub fn violation(&self, idx: usize, rule: &'static str) -> Violation {
        Violation {
            path: self.path.clone(),
            line: idx + 1,
            rule,
            text: self.lines[idx].trim().to_string(),
        }
    }
}

/// Classify a line as a function signature
pub fn fn_kind(line: &str) -> Option<FnKind> {
    let trimmed = line.trim_start();
    let without_vis = trimmed
        .strip_prefix("pub(crate) ")
        .or_else(|| trimmed.strip_prefix("pub(super) "))
        .or_else(|| trimmed.strip_prefix("pub "))
        .unwrap_or(trimmed);

    if without_vis.starts_with("async fn ") {
        Some(FnKind::Async)
    } else if without_vis.starts_with("fn ") || without_vis.starts_with("const fn ") {
        Some(FnKind::Sync)
    } else {
        None
    }
}

/// The function enclosing `lines[idx]`, stopping at module or impl boundaries
pub fn enclosing_fn(lines: &[&str], idx: usize) -> Option<FnKind> {
    for i in (0..=idx).rev() {
        let line = lines[i];
        if let Some(kind) = fn_kind(line) {
            return Some(kind);
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("mod ")
            || trimmed.starts_with("pub mod ")
            || (trimmed.starts_with("impl") && trimmed.contains('{'))
        {
            return None;
        }
    }
    None
}

/// All `.rs` files under the production directories
pub fn production_files() -> Vec<SourceFile> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| {
            walkdir::WalkDir::new(root.join(dir))
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .filter_map(|e| SourceFile::load(e.path()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Print violations and panic if there are any
pub fn report(title: &str, hint: &[&str], violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ CRITICAL: {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    for line in hint {
        eprintln!("{line}");
    }
    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_kind() {
        assert_eq!(fn_kind("    pub async fn flush(&self) {"), Some(FnKind::Async));
        assert_eq!(fn_kind("pub(crate) fn unregister("), Some(FnKind::Sync));
        assert_eq!(fn_kind("    fn schedule(&self) {"), Some(FnKind::Sync));
        assert_eq!(fn_kind("    let f = async move {"), None);
    }

    #[test]
    fn test_enclosing_fn() {
        let code = vec![
            "impl Loader {",
            "    pub async fn load(&self) {",
            "        let s = std::fs::read_to_string(p);",
            "    }",
            "}",
        ];
        assert_eq!(enclosing_fn(&code, 2), Some(FnKind::Async));
        assert_eq!(enclosing_fn(&code, 0), None);
    }

    #[test]
    fn test_production_lines_skip_tests_and_comments() {
        let file = SourceFile::from_source(
            Path::new("x.rs"),
            "/// doc\nfn a() {} // trailing\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n",
        );
        let lines = file.production_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], (1, "fn a() {} "));
    }
}
