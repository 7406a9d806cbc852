//! Task key allocation.
//!
//! Keys look like `T-E04-F02-007`: the feature key plus a three-digit,
//! zero-padded sequence that is unique within the feature.
//!
//! A batch of new files in one feature is usually processed before any of
//! them reaches the database, so "max persisted sequence + 1" alone would hand
//! every file the same key. [`KeyGenerator`] keeps a per-run high-water mark
//! for each feature and allocates `max(persisted, high-water) + 1` under a
//! mutex. Keys already present in files are recorded as floors so later
//! allocations never collide with them.
//!
//! A generator is meant to live for exactly one sync run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use anyhow::anyhow;
use regex::Regex;

use crate::error::{FrontmatterError, KeygenError, ScopeKind};
use crate::frontmatter;
use crate::models::GenerationResult;
use crate::path_infer::{PathComponents, PathInferrer};
use crate::store::ScopeLookup;

/// Frontmatter field holding the task key.
pub const TASK_KEY_FIELD: &str = "task_key";

static TASK_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^T-(?P<scope>(?P<epic>E\d{2})(?:-P\d{2})?-F\d{2})-(?P<seq>\d{3,})$")
        .unwrap_or_else(|err| panic!("invalid TASK_KEY regex: {err}"))
});

/// Split a task key into its feature key and sequence number.
pub fn parse_task_key(key: &str) -> Option<(&str, u32)> {
    let caps = TASK_KEY.captures(key)?;
    let scope = caps.name("scope")?.as_str();
    let seq = caps.name("seq")?.as_str().parse().ok()?;
    Some((scope, seq))
}

fn epic_of(key: &str) -> Option<&str> {
    TASK_KEY
        .captures(key)
        .and_then(|c| c.name("epic"))
        .map(|m| m.as_str())
}

pub fn format_task_key(feature_key: &str, seq: u32) -> String {
    format!("T-{}-{:03}", feature_key, seq)
}

/// Writes a `field: value` pair into a task file's frontmatter.
pub type KeyWriter = fn(&Path, &str, &str) -> Result<(), FrontmatterError>;

/// Per-run key allocator.
pub struct KeyGenerator<L: ScopeLookup + ?Sized> {
    lookup: Arc<L>,
    inferrer: PathInferrer,
    /// feature key -> highest sequence allocated or observed this run
    high_water: Mutex<HashMap<String, u32>>,
    write_files: bool,
    writer: KeyWriter,
}

impl<L: ScopeLookup + ?Sized> KeyGenerator<L> {
    pub fn new(lookup: Arc<L>, inferrer: PathInferrer) -> Self {
        Self {
            lookup,
            inferrer,
            high_water: Mutex::new(HashMap::new()),
            write_files: true,
            writer: frontmatter::write,
        }
    }

    /// Allocate keys without writing them back to files.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.write_files = !dry_run;
        self
    }

    /// Replace the frontmatter writer used for new keys.
    pub fn with_writer(mut self, writer: KeyWriter) -> Self {
        self.writer = writer;
        self
    }

    fn high_water(&self) -> Result<MutexGuard<'_, HashMap<String, u32>>, KeygenError> {
        self.high_water
            .lock()
            .map_err(|_| KeygenError::Store(anyhow!("key tracker lock poisoned")))
    }

    /// Record an existing key as a floor for its feature. Keys that do not
    /// follow the task key format are ignored.
    pub fn observe_existing(&self, key: &str) -> Result<(), KeygenError> {
        let Some((scope, seq)) = parse_task_key(key) else {
            tracing::debug!(key, "existing key has no parsable sequence");
            return Ok(());
        };
        let mut high_water = self.high_water()?;
        let entry = high_water.entry(scope.to_string()).or_insert(0);
        *entry = (*entry).max(seq);
        Ok(())
    }

    /// Next free sequence number in `feature_key`.
    pub async fn allocate(&self, feature_key: &str) -> Result<u32, KeygenError> {
        let persisted = self.lookup.max_sequence(feature_key).await?;

        let next = {
            let mut high_water = self.high_water()?;
            let floor = high_water.get(feature_key).copied().unwrap_or(0);
            let next = persisted.max(floor) + 1;
            high_water.insert(feature_key.to_string(), next);
            next
        };

        tracing::debug!(feature_key, persisted, next, "allocated sequence");
        Ok(next)
    }

    /// Resolve the owning feature of `path` and check both levels exist.
    pub async fn resolve_scope(&self, path: &Path) -> Result<(PathComponents, i64), KeygenError> {
        let components = self.inferrer.infer(path)?;

        if self.lookup.epic_id(&components.epic_key).await?.is_none() {
            return Err(KeygenError::Orphaned {
                kind: ScopeKind::Epic,
                key: components.epic_key,
            });
        }
        let Some(feature_id) = self.lookup.feature_id(&components.feature_key).await? else {
            return Err(KeygenError::Orphaned {
                kind: ScopeKind::Feature,
                key: components.feature_key,
            });
        };

        Ok((components, feature_id))
    }

    /// Key for the file at `path`, reading any existing key from its frontmatter.
    pub async fn generate_for_file(&self, path: &Path) -> Result<GenerationResult, KeygenError> {
        let existing = frontmatter::has_key(path, TASK_KEY_FIELD)?;
        self.generate(path, existing.as_deref()).await
    }

    /// Key for the file at `path` given an already known key, if any.
    ///
    /// An existing key is returned unchanged: no write, no database access.
    /// A new key is written to the file's frontmatter; a failed write still
    /// returns the key with `written_to_file == false` and a warning.
    pub async fn generate(
        &self,
        path: &Path,
        existing: Option<&str>,
    ) -> Result<GenerationResult, KeygenError> {
        if let Some(key) = existing {
            self.observe_existing(key)?;
            let feature_key = parse_task_key(key).map(|(s, _)| s).unwrap_or_default();
            return Ok(GenerationResult {
                task_key: key.to_string(),
                epic_key: epic_of(key).unwrap_or_default().to_string(),
                feature_key: feature_key.to_string(),
                feature_id: None,
                written_to_file: false,
                warning: None,
            });
        }

        let (components, feature_id) = self.resolve_scope(path).await?;
        let seq = self.allocate(&components.feature_key).await?;
        let task_key = format_task_key(&components.feature_key, seq);

        let mut result = GenerationResult {
            task_key,
            epic_key: components.epic_key,
            feature_key: components.feature_key,
            feature_id: Some(feature_id),
            written_to_file: false,
            warning: None,
        };

        if !self.write_files {
            return Ok(result);
        }

        match (self.writer)(path, TASK_KEY_FIELD, &result.task_key) {
            Ok(()) => result.written_to_file = true,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    key = %result.task_key,
                    error = %e,
                    "generated key could not be written to file"
                );
                result.warning = Some(format!(
                    "generated key {} but could not write it to the file ({}); \
                     it will be regenerated on the next sync",
                    result.task_key, e
                ));
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::TaskStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        store: Arc<MemoryStore>,
    }

    impl Fixture {
        async fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let root = tmp.path().join("plan");
            std::fs::create_dir_all(root.join("E04-search/E04-F02-cache/tasks")).unwrap();

            let store = Arc::new(MemoryStore::new());
            let epic = store.create_epic("E04", "Search").await.unwrap();
            let feature = store.create_feature(epic.id, "E04-F02", "Cache").await.unwrap();
            for seq in 1..=3 {
                store
                    .seed_task(feature.id, &format_task_key("E04-F02", seq), "seeded")
                    .unwrap();
            }

            Self { _tmp: tmp, root, store }
        }

        fn task_file(&self, name: &str, content: &str) -> PathBuf {
            let path = self.root.join("E04-search/E04-F02-cache/tasks").join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        fn generator(&self) -> KeyGenerator<MemoryStore> {
            KeyGenerator::new(self.store.clone(), PathInferrer::new(&self.root))
        }
    }

    #[test]
    fn test_parse_and_format() {
        assert_eq!(parse_task_key("T-E04-F02-007"), Some(("E04-F02", 7)));
        assert_eq!(parse_task_key("T-E04-P01-F02-120"), Some(("E04-P01-F02", 120)));
        assert_eq!(parse_task_key("T-E04-F02-1000"), Some(("E04-F02", 1000)));
        assert_eq!(parse_task_key("TASK-1"), None);
        assert_eq!(format_task_key("E01-F01", 4), "T-E01-F01-004");
        assert_eq!(format_task_key("E01-F01", 1234), "T-E01-F01-1234");
    }

    #[tokio::test]
    async fn test_batch_continues_from_persisted_max() {
        let fx = Fixture::new().await;
        let generator = fx.generator();

        let mut keys = Vec::new();
        for name in ["a.md", "b.md", "c.md", "d.md"] {
            let path = fx.task_file(name, "# Task\n");
            let result = generator.generate_for_file(&path).await.unwrap();
            assert!(result.written_to_file);
            assert_eq!(result.feature_key, "E04-F02");
            assert_eq!(
                frontmatter::has_key(&path, TASK_KEY_FIELD).unwrap().as_deref(),
                Some(result.task_key.as_str())
            );
            keys.push(result.task_key);
        }

        assert_eq!(
            keys,
            vec!["T-E04-F02-004", "T-E04-F02-005", "T-E04-F02-006", "T-E04-F02-007"]
        );
    }

    #[tokio::test]
    async fn test_existing_key_is_returned_unchanged() {
        let fx = Fixture::new().await;
        let content = "---\ntask_key: T-E04-F02-042\ntitle: Keep\n---\n# Body\n";
        let path = fx.task_file("keep.md", content);
        let generator = fx.generator();

        let result = generator.generate_for_file(&path).await.unwrap();
        assert_eq!(result.task_key, "T-E04-F02-042");
        assert_eq!(result.epic_key, "E04");
        assert!(!result.written_to_file);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);

        // The observed key is a floor for later allocations.
        let fresh = fx.task_file("fresh.md", "");
        let result = generator.generate_for_file(&fresh).await.unwrap();
        assert_eq!(result.task_key, "T-E04-F02-043");
    }

    #[tokio::test]
    async fn test_orphaned_scopes() {
        let fx = Fixture::new().await;
        let generator = fx.generator();

        let dir = fx.root.join("E04-search/E04-F09-missing/tasks");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("x.md"), "").unwrap();
        let err = generator.generate_for_file(&dir.join("x.md")).await.unwrap_err();
        assert!(err.is_orphaned());
        assert!(matches!(err, KeygenError::Orphaned { kind: ScopeKind::Feature, ref key } if key == "E04-F09"));

        let dir = fx.root.join("E07-other/E07-F01-x/tasks");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("y.md"), "").unwrap();
        let err = generator.generate_for_file(&dir.join("y.md")).await.unwrap_err();
        assert!(matches!(err, KeygenError::Orphaned { kind: ScopeKind::Epic, ref key } if key == "E07"));
    }

    #[tokio::test]
    async fn test_bad_layout_is_path_error() {
        let fx = Fixture::new().await;
        let path = fx.root.join("loose.md");
        std::fs::write(&path, "").unwrap();
        let err = fx.generator().generate_for_file(&path).await.unwrap_err();
        assert!(matches!(err, KeygenError::Path(_)));
        assert!(!err.is_orphaned());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_write() {
        let fx = Fixture::new().await;
        let path = fx.task_file("dry.md", "# Dry\n");
        let generator = fx.generator().dry_run(true);

        let result = generator.generate_for_file(&path).await.unwrap();
        assert_eq!(result.task_key, "T-E04-F02-004");
        assert!(!result.written_to_file);
        assert!(result.warning.is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Dry\n");
    }

    #[tokio::test]
    async fn test_malformed_frontmatter_gets_fresh_block() {
        let fx = Fixture::new().await;
        let path = fx.task_file("broken.md", "---\ntitle: [oops\n---\n# Body\n");

        let result = fx.generator().generate_for_file(&path).await.unwrap();
        assert!(result.written_to_file);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "---\ntask_key: T-E04-F02-004\n---\n# Body\n"
        );
    }

    #[tokio::test]
    async fn test_fresh_generator_has_no_memory_of_previous_run() {
        let fx = Fixture::new().await;
        let first = fx.generator();
        first.allocate("E04-F02").await.unwrap();
        first.allocate("E04-F02").await.unwrap();

        assert_eq!(fx.generator().allocate("E04-F02").await.unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_are_unique() {
        let fx = Fixture::new().await;
        let generator = Arc::new(fx.generator());

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let generator = generator.clone();
                tokio::spawn(async move { generator.allocate("E04-F02").await.unwrap() })
            })
            .collect();

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (4..36).collect::<Vec<u32>>());
    }

    fn refuse_write(path: &Path, _: &str, _: &str) -> Result<(), FrontmatterError> {
        Err(FrontmatterError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    #[tokio::test]
    async fn test_write_failure_keeps_key_with_warning() {
        let fx = Fixture::new().await;
        let path = fx.task_file("locked.md", "# Locked\n");
        let generator = fx.generator().with_writer(refuse_write);

        let result = generator.generate_for_file(&path).await.unwrap();
        assert_eq!(result.task_key, "T-E04-F02-004");
        assert!(result.feature_id.is_some());
        assert!(!result.written_to_file);
        let warning = result.warning.unwrap();
        assert!(warning.contains("regenerated"), "{}", warning);
        assert!(warning.contains("read-only"), "{}", warning);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Locked\n");

        // The failed key still counts toward the run's high-water mark.
        let next = generator.generate_for_file(&fx.task_file("next.md", "")).await.unwrap();
        assert_eq!(next.task_key, "T-E04-F02-005");
    }
}
