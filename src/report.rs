//! Structured sync report.
//!
//! A [`ScanReport`] is built up during a run and rendered either as pretty
//! JSON (`--json`) or as the plain-text summary printed by `plansync sync`.
//! Rendering never needs to look at any file again.

use std::fmt::Write as _;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::conflict::{Conflict, ConflictField, ConflictStrategy};
use crate::patterns::EntityKind;

pub const SCHEMA_VERSION: &str = "1.0";

/// Classification of a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ParseError,
    OrphanedScope,
    PatternMismatch,
    WriteFailure,
    ConfigValidationError,
    MissingMetadata,
    DatabaseError,
    ClockSkew,
}

/// One skipped file, error or warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub file_path: String,
    pub reason: String,
    pub suggested_fix: String,
    pub error_type: ErrorType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

impl ReportEntry {
    pub fn new(
        file_path: impl Into<String>,
        error_type: ErrorType,
        reason: impl Into<String>,
        suggested_fix: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            reason: reason.into(),
            suggested_fix: suggested_fix.into(),
            error_type,
            line_number: None,
        }
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    Partial,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub scanned: u64,
    pub matched: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub matched: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Entities {
    pub epics: EntityCounts,
    pub features: EntityCounts,
    pub tasks: EntityCounts,
    pub related_docs: EntityCounts,
}

impl Entities {
    fn bucket(&mut self, kind: EntityKind) -> &mut EntityCounts {
        match kind {
            EntityKind::Epic => &mut self.epics,
            EntityKind::Feature => &mut self.features,
            EntityKind::Task => &mut self.tasks,
            EntityKind::Related => &mut self.related_docs,
        }
    }
}

/// Database-side outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    pub imported: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Files skipped by the incremental filter.
    pub not_modified: u64,
    pub keys_generated: u64,
    pub keys_written: u64,
    pub conflicts_resolved: u64,
    /// Epic and feature folders found by scope discovery.
    pub scopes_discovered: u64,
    /// Epic and feature rows created by discovery or for orphaned files.
    pub scopes_created: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub task_key: String,
    pub field: ConflictField,
    pub database_value: Option<String>,
    pub file_value: String,
    /// `"file"` or `"database"`.
    pub winner: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: f64,
    pub documentation_root: String,
    pub patterns: Vec<String>,
    pub strategy: ConflictStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub schema_version: &'static str,
    pub status: ReportStatus,
    pub dry_run: bool,
    pub metadata: ReportMetadata,
    pub counts: Counts,
    pub entities: Entities,
    pub sync: SyncCounts,
    pub skipped_files: Vec<ReportEntry>,
    pub errors: Vec<ReportEntry>,
    pub warnings: Vec<ReportEntry>,
    pub conflicts: Vec<ConflictEntry>,
}

impl ScanReport {
    pub fn new(
        documentation_root: impl Into<String>,
        patterns: Vec<String>,
        strategy: ConflictStrategy,
        dry_run: bool,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            status: ReportStatus::Success,
            dry_run,
            metadata: ReportMetadata {
                timestamp: Utc::now(),
                duration_seconds: 0.0,
                documentation_root: documentation_root.into(),
                patterns,
                strategy,
            },
            counts: Counts::default(),
            entities: Entities::default(),
            sync: SyncCounts::default(),
            skipped_files: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn record_scanned(&mut self) {
        self.counts.scanned += 1;
    }

    pub fn record_matched(&mut self, kind: EntityKind) {
        self.counts.matched += 1;
        self.entities.bucket(kind).matched += 1;
    }

    /// File left out of the run before it matched anything.
    pub fn record_skip(&mut self, entry: ReportEntry) {
        self.counts.skipped += 1;
        self.skipped_files.push(entry);
    }

    /// Matched file that could not be processed and was skipped.
    pub fn record_entity_skip(&mut self, kind: EntityKind, entry: ReportEntry) {
        self.entities.bucket(kind).skipped += 1;
        self.record_skip(entry);
    }

    /// Matched file that failed. Counted as skipped at both levels.
    pub fn record_error(&mut self, kind: EntityKind, entry: ReportEntry) {
        self.counts.skipped += 1;
        self.entities.bucket(kind).skipped += 1;
        self.errors.push(entry);
    }

    pub fn record_warning(&mut self, entry: ReportEntry) {
        self.warnings.push(entry);
    }

    pub fn record_conflicts(&mut self, task_key: &str, conflicts: &[Conflict], file_won: bool) {
        for c in conflicts {
            let winner = if file_won || c.field == ConflictField::FilePath {
                "file"
            } else {
                "database"
            };
            self.conflicts.push(ConflictEntry {
                task_key: task_key.to_string(),
                field: c.field,
                database_value: c.database_value.clone(),
                file_value: c.file_value.clone(),
                winner,
            });
        }
        self.sync.conflicts_resolved += conflicts.len() as u64;
    }

    /// Stamp duration and final status.
    pub fn finish(&mut self, started: Instant, cancelled: bool) {
        self.metadata.duration_seconds = started.elapsed().as_secs_f64();
        self.status = if cancelled {
            ReportStatus::Cancelled
        } else if self.errors.is_empty() {
            ReportStatus::Success
        } else {
            ReportStatus::Partial
        };
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text summary in the style of the other CLI commands.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let header = if self.dry_run {
            format!("sync {} (dry-run)", self.metadata.documentation_root)
        } else {
            format!("sync {}", self.metadata.documentation_root)
        };
        let _ = writeln!(out, "{}", header);
        let _ = writeln!(out, "  scanned: {} files", self.counts.scanned);
        let _ = writeln!(
            out,
            "  matched: {} (tasks {}, epics {}, features {}, related {})",
            self.counts.matched,
            self.entities.tasks.matched,
            self.entities.epics.matched,
            self.entities.features.matched,
            self.entities.related_docs.matched
        );
        let _ = writeln!(out, "  skipped: {}", self.counts.skipped);
        let _ = writeln!(out, "  imported: {}", self.sync.imported);
        let _ = writeln!(out, "  updated: {}", self.sync.updated);
        let _ = writeln!(out, "  unchanged: {}", self.sync.unchanged);
        if self.sync.not_modified > 0 {
            let _ = writeln!(out, "  not modified since last sync: {}", self.sync.not_modified);
        }
        let _ = writeln!(
            out,
            "  keys generated: {} ({} written)",
            self.sync.keys_generated, self.sync.keys_written
        );
        let _ = writeln!(out, "  conflicts resolved: {}", self.sync.conflicts_resolved);
        if self.sync.scopes_discovered > 0 {
            let _ = writeln!(out, "  scopes discovered: {}", self.sync.scopes_discovered);
        }
        if self.sync.scopes_created > 0 {
            let _ = writeln!(out, "  scopes created: {}", self.sync.scopes_created);
        }

        for (label, entries) in [
            ("skipped", &self.skipped_files),
            ("error", &self.errors),
            ("warning", &self.warnings),
        ] {
            for entry in entries
                .iter()
                .filter(|e| e.error_type != ErrorType::PatternMismatch)
            {
                let _ = writeln!(out, "  {}: {}: {}", label, entry.file_path, entry.reason);
                if !entry.suggested_fix.is_empty() {
                    let _ = writeln!(out, "    fix: {}", entry.suggested_fix);
                }
            }
        }

        let _ = writeln!(
            out,
            "{}",
            match self.status {
                ReportStatus::Success => "ok",
                ReportStatus::Partial => "completed with errors",
                ReportStatus::Cancelled => "cancelled",
            }
        );
        out
    }
}
