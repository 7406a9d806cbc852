//! Sync engine: markdown tree → task rows.
//!
//! For every markdown file under the documentation root:
//!
//! ```text
//! Scanned ─▶ Matched ─▶ KeyResolved ─▶ MetadataResolved ─▶ Reconciled ─▶ Persisted
//!    │                        │                                  │
//!    └─▶ Skipped              └─▶ Skipped (orphaned)             └─▶ Errored
//! ```
//!
//! Files are processed one at a time in path order. A failure on one file is
//! recorded in the [`ScanReport`] and the run moves on; only configuration
//! problems, an unreadable documentation root or a failing checkpoint query
//! abort the run.
//!
//! The key generator is created per [`SyncEngine::run`] call, so repeated
//! runs in one process never share allocation state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::SyncConfig;
use crate::conflict::{self, ConflictStrategy};
use crate::discovery::{self, folder_title};
use crate::error::{KeygenError, ScopeKind};
use crate::extract::{self, ExtractInput};
use crate::frontmatter;
use crate::keygen::{KeyGenerator, KeyWriter, TASK_KEY_FIELD};
use crate::models::{ExtractedMetadata, GenerationResult, NewTask};
use crate::path_infer::PathInferrer;
use crate::patterns::{EntityKind, PatternMatch, PatternRegistry};
use crate::progress::{NoProgress, SyncProgressEvent, SyncProgressReporter};
use crate::report::{ErrorType, ReportEntry, ScanReport};
use crate::scanner::{self, ScanOptions, ScannedFile};
use crate::store::TaskStore;

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub docs_root: PathBuf,
    pub scan: ScanOptions,
    pub strategy: ConflictStrategy,
    /// Allocate keys and reconcile in memory only.
    pub dry_run: bool,
    /// Ignore the incremental checkpoint.
    pub full: bool,
    /// Create missing epic/feature rows instead of skipping orphaned files.
    pub create_missing: bool,
    /// Register epic and feature folders before any task file is processed.
    pub discover_scopes: bool,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self {
            docs_root: config.docs_root.clone(),
            scan: ScanOptions::from(config),
            strategy: config.conflict_strategy()?,
            dry_run: false,
            full: false,
            create_missing: config.create_missing,
            discover_scopes: config.discover_scopes,
        })
    }
}

/// Why a matched file left the pipeline early.
enum FileFailure {
    /// Reported under `skipped_files`.
    Skipped(ReportEntry),
    /// Reported under `errors`.
    Failed(ReportEntry),
}

impl FileFailure {
    fn from_keygen(file_path: &str, err: KeygenError) -> Self {
        let reason = err.to_string();
        match err {
            KeygenError::Orphaned { kind, key } => FileFailure::Skipped(ReportEntry::new(
                file_path,
                ErrorType::OrphanedScope,
                reason,
                format!("Create {kind} '{key}' first or move file to existing {kind} folder"),
            )),
            KeygenError::Path(_) => FileFailure::Failed(ReportEntry::new(
                file_path,
                ErrorType::ParseError,
                reason,
                "Move the file under {docs_root}/E##-epic/E##-F##-feature/ (optionally in tasks/ or prps/)",
            )),
            KeygenError::Frontmatter(_) => FileFailure::Failed(ReportEntry::new(
                file_path,
                ErrorType::ParseError,
                reason,
                "Ensure the file is readable UTF-8 text",
            )),
            KeygenError::Store(e) => Self::database(file_path, e),
        }
    }

    fn database(file_path: &str, err: anyhow::Error) -> Self {
        FileFailure::Failed(ReportEntry::new(
            file_path,
            ErrorType::DatabaseError,
            format!("{:#}", err),
            "Check the database file and run `plansync init`",
        ))
    }
}

pub struct SyncEngine<S: TaskStore + ?Sized> {
    store: Arc<S>,
    registry: PatternRegistry,
    inferrer: PathInferrer,
    options: SyncOptions,
    progress: Box<dyn SyncProgressReporter>,
    cancel: Arc<AtomicBool>,
    key_writer: KeyWriter,
}

impl<S: TaskStore + ?Sized> SyncEngine<S> {
    pub fn new(store: Arc<S>, registry: PatternRegistry, options: SyncOptions) -> Self {
        Self {
            store,
            registry,
            inferrer: PathInferrer::new(&options.docs_root),
            options,
            progress: Box::new(NoProgress),
            cancel: Arc::new(AtomicBool::new(false)),
            key_writer: frontmatter::write,
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn SyncProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop scheduling new files once `flag` is set. The file in flight
    /// finishes normally.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Replace how generated keys are written into task files.
    pub fn with_key_writer(mut self, writer: KeyWriter) -> Self {
        self.key_writer = writer;
        self
    }

    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    fn checkpoint_name(&self) -> String {
        format!("sync:{}", self.options.docs_root.display())
    }

    pub async fn run(&self) -> Result<ScanReport> {
        let started = Instant::now();
        let run_started_at = Utc::now();
        let root_label = self.options.docs_root.display().to_string();

        let mut report = ScanReport::new(
            root_label.clone(),
            self.registry
                .patterns()
                .iter()
                .map(|p| p.name.clone())
                .collect(),
            self.options.strategy,
            self.options.dry_run,
        );
        for warning in self.registry.warnings() {
            report.record_warning(ReportEntry::new(
                "",
                ErrorType::ConfigValidationError,
                warning.clone(),
                "Rename the capture group to a recognized name",
            ));
        }

        self.progress.report(SyncProgressEvent::Discovering {
            root: root_label.clone(),
        });
        let outcome = scanner::scan_markdown(&self.options.docs_root, &self.options.scan)?;
        for entry in outcome.skipped {
            report.record_scanned();
            report.record_skip(entry);
        }
        for _ in &outcome.files {
            report.record_scanned();
        }

        if self.options.discover_scopes {
            self.discover_scopes(&mut report).await?;
        }

        let files = if self.options.full {
            outcome.files
        } else {
            let checkpoint = self.store.get_checkpoint(&self.checkpoint_name()).await?;
            let known = self.store.known_file_paths().await?;
            let (kept, not_modified) = scanner::filter_incremental(outcome.files, &known, checkpoint);
            report.sync.not_modified = not_modified;
            kept
        };

        let keygen = KeyGenerator::new(self.store.clone(), self.inferrer.clone())
            .dry_run(self.options.dry_run)
            .with_writer(self.key_writer);
        self.observe_existing_keys(&keygen, &files);

        let total = files.len() as u64;
        let mut cancelled = false;
        for (i, file) in files.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::warn!(remaining = files.len() - i, "sync cancelled");
                cancelled = true;
                break;
            }

            self.process_file(&keygen, file, &mut report).await;

            self.progress.report(SyncProgressEvent::Processing {
                root: root_label.clone(),
                n: i as u64 + 1,
                total,
                path: file.relative.clone(),
            });
        }

        if !self.options.dry_run && !cancelled {
            if let Err(e) = self
                .store
                .set_checkpoint(&self.checkpoint_name(), run_started_at)
                .await
            {
                tracing::warn!(error = %e, "failed to store sync checkpoint");
                report.record_warning(ReportEntry::new(
                    "",
                    ErrorType::DatabaseError,
                    format!("failed to store sync checkpoint: {:#}", e),
                    "The next sync will rescan every file; check the database",
                ));
            }
        }

        report.finish(started, cancelled);
        tracing::info!(
            scanned = report.counts.scanned,
            matched = report.counts.matched,
            imported = report.sync.imported,
            updated = report.sync.updated,
            errors = report.errors.len(),
            "sync finished"
        );
        Ok(report)
    }

    /// Create rows for epic and feature folders the database does not know.
    /// Existing rows keep their titles. A dry run only counts.
    async fn discover_scopes(&self, report: &mut ScanReport) -> Result<()> {
        let found = discovery::discover(&self.options.docs_root)?;
        for warning in found.warnings {
            report.record_warning(ReportEntry::new(
                discovery::INDEX_FILE,
                ErrorType::ParseError,
                warning,
                "Check the permissions of the epic index",
            ));
        }

        for epic in &found.epics {
            report.sync.scopes_discovered += 1;
            if self.store.epic_id(&epic.key).await?.is_some() {
                continue;
            }
            if self.options.dry_run {
                tracing::info!(key = %epic.key, "would create epic");
                continue;
            }
            let row = self.store.create_epic(&epic.key, &epic.title).await?;
            tracing::info!(key = %row.key, title = %row.title, "created epic from folder");
            report.sync.scopes_created += 1;
        }

        for feature in &found.features {
            report.sync.scopes_discovered += 1;
            if self.store.feature_id(&feature.key).await?.is_some() {
                continue;
            }
            // In a dry run the parent epic may exist only on disk.
            let epic_id = match self.store.epic_id(&feature.epic_key).await? {
                Some(id) if !self.options.dry_run => id,
                _ => {
                    tracing::info!(key = %feature.key, "would create feature");
                    continue;
                }
            };
            let row = self
                .store
                .create_feature(epic_id, &feature.key, &feature.title)
                .await?;
            tracing::info!(key = %row.key, title = %row.title, "created feature from folder");
            report.sync.scopes_created += 1;
        }
        Ok(())
    }

    /// Seed the key generator with every key already present in the batch so
    /// new allocations skip them regardless of file order.
    fn observe_existing_keys(
        &self,
        keygen: &KeyGenerator<S>,
        files: &[ScannedFile],
    ) {
        for file in files {
            let Some(m) = self.registry.match_file(&file.file_name) else {
                continue;
            };
            if m.entity != EntityKind::Task {
                continue;
            }
            let from_file = frontmatter::has_key(&file.path, TASK_KEY_FIELD).ok().flatten();
            if let Some(key) = from_file.or_else(|| m.get("task_key").map(str::to_string)) {
                if let Err(e) = keygen.observe_existing(&key) {
                    tracing::warn!(key = %key, error = %e, "failed to record existing key");
                }
            }
        }
    }

    async fn process_file(
        &self,
        keygen: &KeyGenerator<S>,
        file: &ScannedFile,
        report: &mut ScanReport,
    ) {
        let file_path = file.path_string();

        let Some(pattern) = self.registry.match_file(&file.file_name) else {
            tracing::debug!(path = %file_path, "no pattern matched");
            report.record_skip(ReportEntry::new(
                file_path,
                ErrorType::PatternMismatch,
                "filename does not match any enabled pattern",
                "Rename the file to match a configured pattern or add a pattern for it",
            ));
            return;
        };
        report.record_matched(pattern.entity);

        // Epic and feature documents are registered by folder discovery;
        // the documents themselves, like related docs, are only counted.
        if pattern.entity != EntityKind::Task {
            return;
        }

        if let Err(failure) = self.sync_task(keygen, file, &pattern, report).await {
            match failure {
                FileFailure::Skipped(entry) => {
                    tracing::warn!(path = %entry.file_path, reason = %entry.reason, "file skipped");
                    report.record_entity_skip(EntityKind::Task, entry);
                }
                FileFailure::Failed(entry) => {
                    tracing::warn!(path = %entry.file_path, reason = %entry.reason, "file failed");
                    report.record_error(EntityKind::Task, entry);
                }
            }
        }
    }

    async fn sync_task(
        &self,
        keygen: &KeyGenerator<S>,
        file: &ScannedFile,
        pattern: &PatternMatch,
        report: &mut ScanReport,
    ) -> Result<(), FileFailure> {
        let file_path = file.path_string();

        let content = std::fs::read_to_string(&file.path).map_err(|e| {
            FileFailure::Failed(ReportEntry::new(
                file_path.as_str(),
                ErrorType::ParseError,
                format!("cannot read file: {}", e),
                "Ensure the file is readable UTF-8 text",
            ))
        })?;

        if scanner::is_clock_skewed(file.modified_at, Utc::now()) {
            report.record_warning(ReportEntry::new(
                file_path.as_str(),
                ErrorType::ClockSkew,
                format!(
                    "file modification time {} is in the future",
                    file.modified_at.to_rfc3339()
                ),
                "Check the system clock; incremental sync may miss later edits to this file",
            ));
        }

        let fm = frontmatter::parse(&content);
        let existing = frontmatter::get_str(&fm, TASK_KEY_FIELD)
            .or_else(|| pattern.get("task_key").map(str::to_string));

        let generation = self
            .generate_key(keygen, &file.path, existing.as_deref(), report)
            .await
            .map_err(|e| FileFailure::from_keygen(&file_path, e))?;

        if generation.is_new() {
            report.sync.keys_generated += 1;
            if generation.written_to_file {
                report.sync.keys_written += 1;
            }
        }
        if let Some(warning) = &generation.warning {
            report.record_warning(ReportEntry::new(
                file_path.as_str(),
                ErrorType::WriteFailure,
                warning.clone(),
                format!(
                    "Make the file writable or add `{}: {}` to its frontmatter by hand",
                    TASK_KEY_FIELD, generation.task_key
                ),
            ));
        }

        let input = ExtractInput {
            frontmatter: &fm,
            filename: &file.file_name,
            pattern: Some(pattern),
            content: &content,
        };
        let title = extract::resolve_title(&input);
        if title.is_placeholder() {
            report.record_warning(
                ReportEntry::new(
                    file_path.as_str(),
                    ErrorType::MissingMetadata,
                    format!("no title found; using '{}'", title.value),
                    "Add a `title:` field to the frontmatter or a `# Heading` to the body",
                )
                .at_line(1),
            );
        }
        let description = extract::resolve_description(&input);

        // Hash what is on disk after any key write so the next run sees it unchanged.
        let content_hash = if generation.written_to_file {
            match std::fs::read(&file.path) {
                Ok(bytes) => hash_bytes(&bytes),
                Err(_) => hash_bytes(content.as_bytes()),
            }
        } else {
            hash_bytes(content.as_bytes())
        };

        let metadata = ExtractedMetadata {
            key: Some(generation.task_key.clone()),
            title: title.value.clone(),
            description,
            source_file_path: file.path.clone(),
            modified_at: file.modified_at,
            content_hash,
        };

        self.reconcile(keygen, &generation, &metadata, title.is_placeholder(), report)
            .await
    }

    /// Key for the file, creating missing scopes first when configured to.
    async fn generate_key(
        &self,
        keygen: &KeyGenerator<S>,
        path: &Path,
        existing: Option<&str>,
        report: &mut ScanReport,
    ) -> Result<GenerationResult, KeygenError> {
        match keygen.generate(path, existing).await {
            Err(KeygenError::Orphaned { .. }) if self.can_create_missing() => {
                self.create_missing_scopes(path, report).await?;
                keygen.generate(path, existing).await
            }
            other => other,
        }
    }

    fn can_create_missing(&self) -> bool {
        self.options.create_missing && !self.options.dry_run
    }

    async fn create_missing_scopes(
        &self,
        path: &Path,
        report: &mut ScanReport,
    ) -> Result<i64, KeygenError> {
        let components = self.inferrer.infer(path)?;

        let epic_id = match self.store.epic_id(&components.epic_key).await? {
            Some(id) => id,
            None => {
                let title = folder_title(&components.epic_dir, &components.epic_key);
                let epic = self.store.create_epic(&components.epic_key, &title).await?;
                tracing::info!(key = %epic.key, title = %epic.title, "created missing epic");
                report.sync.scopes_created += 1;
                epic.id
            }
        };

        match self.store.feature_id(&components.feature_key).await? {
            Some(id) => Ok(id),
            None => {
                let title = folder_title(&components.feature_dir, &components.feature_key);
                let feature = self
                    .store
                    .create_feature(epic_id, &components.feature_key, &title)
                    .await?;
                tracing::info!(key = %feature.key, title = %feature.title, "created missing feature");
                report.sync.scopes_created += 1;
                Ok(feature.id)
            }
        }
    }

    /// Feature row id for a task whose key was already known.
    async fn feature_for_existing(
        &self,
        keygen: &KeyGenerator<S>,
        generation: &GenerationResult,
        path: &Path,
        report: &mut ScanReport,
    ) -> Result<i64, KeygenError> {
        if let Some(id) = generation.feature_id {
            return Ok(id);
        }
        if generation.feature_key.is_empty() {
            // Key without a parsable scope: fall back to the folder layout.
            return match keygen.resolve_scope(path).await {
                Ok((_, id)) => Ok(id),
                Err(KeygenError::Orphaned { .. }) if self.can_create_missing() => {
                    self.create_missing_scopes(path, report).await
                }
                Err(e) => Err(e),
            };
        }

        match self.store.feature_id(&generation.feature_key).await? {
            Some(id) => Ok(id),
            None if self.can_create_missing() => self.create_missing_scopes(path, report).await,
            None => Err(KeygenError::Orphaned {
                kind: ScopeKind::Feature,
                key: generation.feature_key.clone(),
            }),
        }
    }

    async fn reconcile(
        &self,
        keygen: &KeyGenerator<S>,
        generation: &GenerationResult,
        metadata: &ExtractedMetadata,
        placeholder_title: bool,
        report: &mut ScanReport,
    ) -> Result<(), FileFailure> {
        let file_path = metadata.source_file_path.to_string_lossy().to_string();
        let key = &generation.task_key;

        let existing = self
            .store
            .get_task(key)
            .await
            .map_err(|e| FileFailure::database(&file_path, e))?;

        let Some(db) = existing else {
            let feature_id = self
                .feature_for_existing(keygen, generation, &metadata.source_file_path, report)
                .await
                .map_err(|e| FileFailure::from_keygen(&file_path, e))?;

            if !self.options.dry_run {
                let id = self
                    .store
                    .insert_task(&NewTask {
                        feature_id,
                        key: key.clone(),
                        title: metadata.title.clone(),
                        description: metadata.description.clone(),
                        file_path: file_path.clone(),
                        content_hash: metadata.content_hash.clone(),
                    })
                    .await
                    .map_err(|e| FileFailure::database(&file_path, e))?;
                self.store
                    .record_history(id, "Imported from file")
                    .await
                    .map_err(|e| FileFailure::database(&file_path, e))?;
            }
            tracing::debug!(key = %key, path = %file_path, "imported task");
            report.sync.imported += 1;
            return Ok(());
        };

        // A placeholder title must never overwrite a stored one.
        let mut compare = metadata.clone();
        if placeholder_title {
            compare.title.clear();
        }

        let conflicts = conflict::detect(&compare, &db);
        let hash_unchanged = db.content_hash.as_deref() == Some(metadata.content_hash.as_str());

        if conflicts.is_empty() {
            if !hash_unchanged && !self.options.dry_run {
                let mut refreshed = db.clone();
                refreshed.content_hash = Some(metadata.content_hash.clone());
                self.store
                    .update_task(&refreshed)
                    .await
                    .map_err(|e| FileFailure::database(&file_path, e))?;
            }
            report.sync.unchanged += 1;
            return Ok(());
        }

        let strategy = self.options.strategy;
        let file_won = conflict::file_wins(strategy, &compare, &db);
        let mut resolved = conflict::resolve(&conflicts, strategy, &compare, &db);
        resolved.content_hash = Some(metadata.content_hash.clone());
        report.record_conflicts(key, &conflicts, file_won);

        if !self.options.dry_run {
            self.store
                .update_task(&resolved)
                .await
                .map_err(|e| FileFailure::database(&file_path, e))?;
            self.store
                .record_history(
                    db.id,
                    &format!("Updated from file ({} conflicts resolved)", conflicts.len()),
                )
                .await
                .map_err(|e| FileFailure::database(&file_path, e))?;
        }
        tracing::debug!(key = %key, conflicts = conflicts.len(), %strategy, "updated task");
        report.sync.updated += 1;
        Ok(())
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
