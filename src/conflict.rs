//! File-vs-database conflict detection and resolution.
//!
//! Both steps are pure: they compare an [`ExtractedMetadata`] against the
//! stored [`TaskRecord`] and never touch the filesystem or the database.
//!
//! Only `title`, `description` and `file_path` can conflict. Database-only
//! columns (status, timestamps) are never overwritten from a file. Empty
//! file values are treated as absent and never conflict.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::models::{ExtractedMetadata, TaskRecord};

/// Which side wins when a field differs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Non-empty file values overwrite the database.
    #[default]
    FileWins,
    /// The database keeps its values.
    DatabaseWins,
    /// File wins when its mtime is newer than the row's `updated_at`.
    NewerWins,
}

impl FromStr for ConflictStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file-wins" => Ok(ConflictStrategy::FileWins),
            "database-wins" => Ok(ConflictStrategy::DatabaseWins),
            "newer-wins" => Ok(ConflictStrategy::NewerWins),
            other => anyhow::bail!(
                "Unknown conflict strategy: '{}'. Must be file-wins, database-wins, or newer-wins.",
                other
            ),
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictStrategy::FileWins => "file-wins",
            ConflictStrategy::DatabaseWins => "database-wins",
            ConflictStrategy::NewerWins => "newer-wins",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictField {
    Title,
    Description,
    FilePath,
}

/// One differing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub field: ConflictField,
    pub database_value: Option<String>,
    pub file_value: String,
}

/// Fields where the file carries a non-empty value different from the row.
pub fn detect(file: &ExtractedMetadata, db: &TaskRecord) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    if !file.title.is_empty() && file.title != db.title {
        conflicts.push(Conflict {
            field: ConflictField::Title,
            database_value: Some(db.title.clone()),
            file_value: file.title.clone(),
        });
    }

    if let Some(desc) = file.description.as_deref().filter(|d| !d.is_empty()) {
        if db.description.as_deref() != Some(desc) {
            conflicts.push(Conflict {
                field: ConflictField::Description,
                database_value: db.description.clone(),
                file_value: desc.to_string(),
            });
        }
    }

    let path = file.source_file_path.to_string_lossy();
    if db.file_path.as_deref() != Some(path.as_ref()) {
        conflicts.push(Conflict {
            field: ConflictField::FilePath,
            database_value: db.file_path.clone(),
            file_value: path.to_string(),
        });
    }

    conflicts
}

/// Whether file values win under `strategy` for this pair.
pub fn file_wins(strategy: ConflictStrategy, file: &ExtractedMetadata, db: &TaskRecord) -> bool {
    match strategy {
        ConflictStrategy::FileWins => true,
        ConflictStrategy::DatabaseWins => false,
        ConflictStrategy::NewerWins => file.modified_at > db.updated_at,
    }
}

/// Apply `conflicts` to a copy of `db`.
///
/// `file_path` always follows the file: it records where the task lives,
/// not what it says.
pub fn resolve(
    conflicts: &[Conflict],
    strategy: ConflictStrategy,
    file: &ExtractedMetadata,
    db: &TaskRecord,
) -> TaskRecord {
    let take_file = file_wins(strategy, file, db);
    let mut resolved = db.clone();

    for conflict in conflicts {
        match conflict.field {
            ConflictField::Title if take_file => resolved.title = conflict.file_value.clone(),
            ConflictField::Description if take_file => {
                resolved.description = Some(conflict.file_value.clone())
            }
            ConflictField::FilePath => resolved.file_path = Some(conflict.file_value.clone()),
            _ => {}
        }
    }

    resolved
}
