//! Typed errors for the sync pipeline.
//!
//! Library components return these enums so the engine can tell an orphaned
//! file from a path convention mismatch from a write failure. Application
//! glue (CLI, store implementations) stays on `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// A single rule violated by a configured pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternViolation {
    /// Pattern name as configured (may be empty when the name itself is invalid).
    pub pattern: String,
    pub message: String,
}

impl std::fmt::Display for PatternViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pattern.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "pattern '{}': {}", self.pattern, self.message)
        }
    }
}

/// Fatal pattern configuration error. Raised before any file is scanned.
#[derive(Error, Debug)]
pub enum PatternConfigError {
    #[error("failed to read pattern config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pattern config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("pattern validation failed:\n  - {}", format_violations(.0))]
    Invalid(Vec<PatternViolation>),
}

fn format_violations(violations: &[PatternViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n  - ")
}

/// The directory layout around a file does not follow the epic/feature convention.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferError {
    #[error(
        "cannot infer epic/feature from path '{}': expected directory structure like \
         docs/plan/{{E##-epic-slug}}/{{E##-F##-feature-slug}}/tasks/{{file}}",
        .0.display()
    )]
    NoFeatureFolder(PathBuf),

    #[error("epic folder '{epic}' not found in path hierarchy for file '{}'", .path.display())]
    NoEpicFolder { epic: String, path: PathBuf },

    #[error("path '{}' has no parent directory", .0.display())]
    NoParent(PathBuf),
}

/// Failure while reading or rewriting a frontmatter block.
#[derive(Error, Debug)]
pub enum FrontmatterError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize frontmatter for {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which level of the hierarchy is missing from the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Epic,
    Feature,
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Epic => write!(f, "epic"),
            ScopeKind::Feature => write!(f, "feature"),
        }
    }
}

/// Key generation failure for one file.
#[derive(Error, Debug)]
pub enum KeygenError {
    /// The file's inferred scope has no database row. Not a regular error:
    /// the file is skipped with an actionable message.
    #[error("orphaned file: {kind} '{key}' not found in database")]
    Orphaned { kind: ScopeKind, key: String },

    #[error(transparent)]
    Path(#[from] InferError),

    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl KeygenError {
    pub fn is_orphaned(&self) -> bool {
        matches!(self, KeygenError::Orphaned { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_lists_every_violation() {
        let err = PatternConfigError::Invalid(vec![
            PatternViolation {
                pattern: "a".into(),
                message: "too long".into(),
            },
            PatternViolation {
                pattern: String::new(),
                message: "no enabled patterns".into(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("pattern 'a': too long"));
        assert!(msg.contains("\n  - no enabled patterns"));
    }

    #[test]
    fn orphaned_message_names_scope() {
        let err = KeygenError::Orphaned {
            kind: ScopeKind::Feature,
            key: "E04-F02".into(),
        };
        assert!(err.is_orphaned());
        assert_eq!(
            err.to_string(),
            "orphaned file: feature 'E04-F02' not found in database"
        );
    }
}
