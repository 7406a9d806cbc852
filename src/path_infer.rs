//! Epic/feature scope inference from a file's location.
//!
//! Expected layout:
//!
//! ```text
//! docs/plan/E04-epic-slug/E04-F02-feature-slug/tasks/T-E04-F02-001.md
//! docs/plan/E04-epic-slug/E04-P01-F02-feature-slug/prps/cache.prp.md
//! docs/plan/E04-epic-slug/E04-F02-feature-slug/01-notes.md
//! ```
//!
//! The feature folder is the file's parent, or its grandparent when the
//! parent is a `tasks`/`prps` container. The epic folder is searched for
//! upward from there, at most [`MAX_EPIC_DEPTH`] levels, and must not itself
//! look like a feature folder.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::InferError;

/// How many ancestors above the feature folder are searched for the epic.
pub const MAX_EPIC_DEPTH: usize = 5;

const CONTAINER_DIRS: &[&str] = &["tasks", "prps"];

/// Scope keys resolved for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathComponents {
    /// `E04-F02` or `E04-P01-F02`.
    pub feature_key: String,
    /// `E04`.
    pub epic_key: String,
    pub feature_dir: PathBuf,
    pub epic_dir: PathBuf,
    pub file_path: PathBuf,
}

static FEATURE_FOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<epic>E\d{2})(?:-P\d{2})?-F\d{2}")
        .unwrap_or_else(|err| panic!("invalid FEATURE_FOLDER regex: {err}"))
});

static EPIC_FOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<epic>E\d{2})").unwrap_or_else(|err| panic!("invalid EPIC_FOLDER regex: {err}"))
});

/// Feature key prefix of a folder name, with its epic key.
pub fn parse_feature_folder(name: &str) -> Option<(String, String)> {
    let caps = FEATURE_FOLDER.captures(name)?;
    let feature = caps.get(0)?.as_str().to_string();
    let epic = caps.name("epic")?.as_str().to_string();
    Some((feature, epic))
}

/// Epic key prefix of a folder name, unless the folder is a feature folder.
pub fn parse_epic_folder(name: &str) -> Option<String> {
    if FEATURE_FOLDER.is_match(name) {
        return None;
    }
    EPIC_FOLDER
        .captures(name)
        .and_then(|c| c.name("epic"))
        .map(|m| m.as_str().to_string())
}

/// Stateless resolver anchored at the documentation root.
#[derive(Debug, Clone)]
pub struct PathInferrer {
    docs_root: PathBuf,
}

impl PathInferrer {
    pub fn new(docs_root: impl Into<PathBuf>) -> Self {
        Self {
            docs_root: absolutize(&docs_root.into()),
        }
    }

    pub fn infer(&self, file: &Path) -> Result<PathComponents, InferError> {
        let file_path = absolutize(file);
        let parent = file_path
            .parent()
            .ok_or_else(|| InferError::NoParent(file_path.clone()))?;

        let feature_dir = if CONTAINER_DIRS.contains(&dir_name(parent).as_str()) {
            parent
                .parent()
                .ok_or_else(|| InferError::NoParent(parent.to_path_buf()))?
        } else {
            parent
        };

        let (feature_key, epic_key) = parse_feature_folder(&dir_name(feature_dir))
            .ok_or_else(|| InferError::NoFeatureFolder(file_path.clone()))?;

        let epic_dir = feature_dir
            .ancestors()
            .skip(1)
            .take(MAX_EPIC_DEPTH)
            .take_while(|dir| dir.starts_with(&self.docs_root))
            .find(|dir| parse_epic_folder(&dir_name(dir)).as_deref() == Some(epic_key.as_str()))
            .ok_or_else(|| InferError::NoEpicFolder {
                epic: epic_key.clone(),
                path: file_path.clone(),
            })?
            .to_path_buf();

        Ok(PathComponents {
            feature_key,
            epic_key,
            feature_dir: feature_dir.to_path_buf(),
            epic_dir,
            file_path,
        })
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// `path` joined onto the current directory when relative.
pub fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
