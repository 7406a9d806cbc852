//! Markdown discovery under the documentation root.
//!
//! Walks the tree with `walkdir`, keeps `*.md` files, drops anything matched
//! by the exclude globs (`.git`, `target` and `node_modules` are always
//! excluded) and returns files sorted by path so key allocation order is
//! deterministic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::path_infer::absolutize;
use crate::report::{ErrorType, ReportEntry};

/// Modification times further ahead than this are reported as clock skew.
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 60;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the documentation root, `/`-separated.
    pub relative: String,
    pub file_name: String,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
}

impl ScannedFile {
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    /// Files seen but not handed to the pipeline (too large, unreadable).
    pub skipped: Vec<ReportEntry>,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
    pub max_file_size: u64,
}

impl From<&SyncConfig> for ScanOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            exclude_globs: config.exclude_globs.clone(),
            follow_symlinks: config.follow_symlinks,
            max_file_size: config.max_file_size,
        }
    }
}

pub fn scan_markdown(root: &Path, options: &ScanOptions) -> Result<ScanOutcome> {
    if !root.is_dir() {
        bail!("Documentation root does not exist: {}", root.display());
    }
    let root = absolutize(root);

    let include_set = build_globset(&["**/*.md".to_string()])?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut outcome = ScanOutcome::default();

    let walker = WalkDir::new(&root).follow_links(options.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                tracing::warn!(path = %path, error = %e, "walk error");
                outcome.skipped.push(ReportEntry::new(
                    path,
                    ErrorType::ParseError,
                    format!("cannot read directory entry: {}", e),
                    "Check file permissions",
                ));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            if entry.path_is_symlink() {
                tracing::debug!(path = %entry.path().display(), "skipping symlink");
            }
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                outcome.skipped.push(ReportEntry::new(
                    path.display().to_string(),
                    ErrorType::ParseError,
                    format!("cannot stat file: {}", e),
                    "Check file permissions",
                ));
                continue;
            }
        };

        if metadata.len() > options.max_file_size {
            outcome.skipped.push(ReportEntry::new(
                path.display().to_string(),
                ErrorType::ParseError,
                format!(
                    "file is {} bytes, larger than the {} byte limit",
                    metadata.len(),
                    options.max_file_size
                ),
                "Split the file or raise sync.max_file_size",
            ));
            continue;
        }

        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        outcome.files.push(ScannedFile {
            path: path.to_path_buf(),
            relative: rel_str,
            file_name: entry.file_name().to_string_lossy().to_string(),
            modified_at: modified,
            size: metadata.len(),
        });
    }

    // Sort for deterministic ordering
    outcome.files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(outcome)
}

/// Drop files the database already knows that have not changed since the
/// last checkpoint. Returns the kept files and how many were dropped.
pub fn filter_incremental(
    files: Vec<ScannedFile>,
    known_paths: &HashSet<String>,
    checkpoint: Option<DateTime<Utc>>,
) -> (Vec<ScannedFile>, u64) {
    let Some(checkpoint) = checkpoint else {
        return (files, 0);
    };

    let before = files.len();
    let kept: Vec<ScannedFile> = files
        .into_iter()
        .filter(|f| !known_paths.contains(&f.path_string()) || f.modified_at > checkpoint)
        .collect();
    let dropped = (before - kept.len()) as u64;
    (kept, dropped)
}

/// Whether `modified_at` lies beyond the clock-skew tolerance from `now`.
pub fn is_clock_skewed(modified_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    modified_at - now > Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS)
}

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options() -> ScanOptions {
        ScanOptions {
            exclude_globs: vec!["**/archive/**".into()],
            follow_symlinks: false,
            max_file_size: 64,
        }
    }

    fn touch(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(root, "E01-a/E01-F01-b/tasks/02-second.md", "x");
        touch(root, "E01-a/E01-F01-b/tasks/01-first.md", "x");
        touch(root, "E01-a/notes.txt", "x");
        touch(root, "archive/old.md", "x");
        touch(root, "node_modules/pkg/README.md", "x");
        touch(root, "big.md", &"x".repeat(100));

        let outcome = scan_markdown(root, &options()).unwrap();
        let rels: Vec<&str> = outcome.files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(
            rels,
            vec!["E01-a/E01-F01-b/tasks/01-first.md", "E01-a/E01-F01-b/tasks/02-second.md"]
        );
        assert!(outcome.files[0].path.is_absolute());
        assert_eq!(outcome.files[0].file_name, "01-first.md");

        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].file_path.ends_with("big.md"));
        assert!(outcome.skipped[0].suggested_fix.contains("max_file_size"));
    }

    #[test]
    fn test_missing_root_is_error() {
        assert!(scan_markdown(Path::new("/definitely/not/here"), &options()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_skipped_unless_followed() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        touch(&root, "real.md", "x");
        touch(tmp.path(), "outside/linked.md", "x");
        std::os::unix::fs::symlink(tmp.path().join("outside/linked.md"), root.join("link.md")).unwrap();

        let outcome = scan_markdown(&root, &options()).unwrap();
        assert_eq!(outcome.files.len(), 1);

        let mut follow = options();
        follow.follow_symlinks = true;
        let outcome = scan_markdown(&root, &follow).unwrap();
        assert_eq!(outcome.files.len(), 2);
    }

    #[test]
    fn test_incremental_filter() {
        let now = Utc::now();
        let file = |name: &str, modified: DateTime<Utc>| ScannedFile {
            path: PathBuf::from(format!("/docs/{}", name)),
            relative: name.to_string(),
            file_name: name.to_string(),
            modified_at: modified,
            size: 1,
        };
        let files = vec![
            file("old-known.md", now - Duration::hours(2)),
            file("new-known.md", now),
            file("old-unknown.md", now - Duration::hours(2)),
        ];
        let known: HashSet<String> = ["/docs/old-known.md", "/docs/new-known.md"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let (kept, dropped) =
            filter_incremental(files.clone(), &known, Some(now - Duration::hours(1)));
        let names: Vec<&str> = kept.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["new-known.md", "old-unknown.md"]);
        assert_eq!(dropped, 1);

        let (kept, dropped) = filter_incremental(files, &known, None);
        assert_eq!(kept.len(), 3);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_clock_skew() {
        let now = Utc::now();
        assert!(!is_clock_skewed(now + Duration::seconds(30), now));
        assert!(is_clock_skewed(now + Duration::seconds(61), now));
        assert!(!is_clock_skewed(now - Duration::days(1), now));
    }
}
