//! Epic and feature discovery from the folder tree.
//!
//! An epic folder is any directory named `E##-slug` that is not itself a
//! feature folder. A feature folder is a direct child of an epic folder named
//! `E##-F##-slug` (or `E##-P##-F##-slug`) with the same epic key. Hidden
//! directories are not entered.
//!
//! Titles come from the folder slug. When `epic-index.md` exists at the
//! documentation root, the text of links pointing at a discovered folder
//! (`[Search Platform](./E04-search/)`) replaces the slug title.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use walkdir::WalkDir;

use crate::extract;
use crate::path_infer::{absolutize, parse_epic_folder, parse_feature_folder};

/// Index file read from the documentation root.
pub const INDEX_FILE: &str = "epic-index.md";

const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

static MD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)").unwrap_or_else(|err| panic!("invalid MD_LINK regex: {err}"))
});

static INDEX_EPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<epic>E\d{2})-[a-z0-9-]+$")
        .unwrap_or_else(|err| panic!("invalid INDEX_EPIC regex: {err}"))
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEpic {
    pub key: String,
    pub title: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFeature {
    pub key: String,
    pub epic_key: String,
    pub title: String,
    pub dir: PathBuf,
}

/// Everything found under one documentation root, in path order.
#[derive(Debug, Default)]
pub struct Discovery {
    pub epics: Vec<FolderEpic>,
    pub features: Vec<FolderFeature>,
    /// Problems reading the index file. Discovery still succeeds.
    pub warnings: Vec<String>,
}

/// Walk `root` for epic and feature folders and apply index titles.
pub fn discover(root: &Path) -> Result<Discovery> {
    if !root.is_dir() {
        bail!("Documentation root does not exist: {}", root.display());
    }
    let root = absolutize(root);
    let mut found = scan_folders(&root);

    let index_path = root.join(INDEX_FILE);
    match std::fs::read_to_string(&index_path) {
        Ok(content) => apply_index_titles(&mut found, &parse_index(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %index_path.display(), "no epic index");
        }
        Err(e) => {
            tracing::warn!(path = %index_path.display(), error = %e, "cannot read epic index");
            found
                .warnings
                .push(format!("cannot read {}: {}", index_path.display(), e));
        }
    }

    tracing::debug!(
        epics = found.epics.len(),
        features = found.features.len(),
        "folder discovery finished"
    );
    Ok(found)
}

fn scan_folders(root: &Path) -> Discovery {
    let mut found = Discovery::default();
    // epic folder -> epic key
    let mut epic_dirs: HashMap<PathBuf, String> = HashMap::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir()
                && (name.starts_with('.') || SKIPPED_DIRS.iter().any(|d| name == *d)))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "walk error during discovery");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let dir = entry.path().to_path_buf();

        if let Some(key) = parse_epic_folder(&name) {
            found.epics.push(FolderEpic {
                title: folder_title(&dir, &key),
                key: key.clone(),
                dir: dir.clone(),
            });
            epic_dirs.insert(dir, key);
            continue;
        }

        let Some((feature_key, epic_key)) = parse_feature_folder(&name) else {
            continue;
        };
        let parent_epic = dir.parent().and_then(|p| epic_dirs.get(p));
        if parent_epic != Some(&epic_key) {
            tracing::debug!(path = %dir.display(), "feature folder outside its epic folder");
            continue;
        }
        found.features.push(FolderFeature {
            title: folder_title(&dir, &feature_key),
            key: feature_key,
            epic_key,
            dir,
        });
    }

    found
}

/// A folder link in the epic index: relative path and link text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLink {
    pub path: String,
    pub title: String,
}

/// Folder links of an epic index. File links, external links and paths
/// deeper than epic/feature are dropped.
pub fn parse_index(content: &str) -> Vec<IndexLink> {
    MD_LINK
        .captures_iter(content)
        .filter_map(|caps| {
            let title = caps.get(1)?.as_str().trim();
            let raw = caps.get(2)?.as_str();
            if raw.contains("://") {
                return None;
            }
            let path = raw.trim_start_matches("./").trim_matches('/');
            if path.ends_with(".md") || path.ends_with(".txt") {
                return None;
            }
            let depth = path.split('/').filter(|s| !s.is_empty()).count();
            if !(1..=2).contains(&depth) || title.is_empty() {
                return None;
            }
            Some(IndexLink {
                path: path.to_string(),
                title: title.to_string(),
            })
        })
        .collect()
}

fn apply_index_titles(found: &mut Discovery, links: &[IndexLink]) {
    let titles: HashMap<&str, &str> = links
        .iter()
        .map(|l| (l.path.as_str(), l.title.as_str()))
        .collect();

    for epic in &mut found.epics {
        let Some(name) = epic.dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        if !INDEX_EPIC.is_match(&name) {
            continue;
        }
        if let Some(title) = titles.get(name.as_str()) {
            epic.title = title.to_string();
        }
    }

    for feature in &mut found.features {
        let (Some(epic_dir), Some(name)) = (
            feature.dir.parent().and_then(|p| p.file_name()),
            feature.dir.file_name(),
        ) else {
            continue;
        };
        let rel = format!("{}/{}", epic_dir.to_string_lossy(), name.to_string_lossy());
        if let Some(title) = titles.get(rel.as_str()) {
            feature.title = title.to_string();
        }
    }
}

/// Title for a scope row, from its folder name.
pub fn folder_title(dir: &Path, key: &str) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let rest = name.strip_prefix(key).unwrap_or(&name).trim_start_matches('-');
    let title = extract::humanize(rest);
    if title.is_empty() {
        key.to_string()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree(dirs: &[&str]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for dir in dirs {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        tmp
    }

    #[test]
    fn test_folder_title() {
        assert_eq!(
            folder_title(Path::new("/plan/E04-search-infra"), "E04"),
            "Search Infra"
        );
        assert_eq!(
            folder_title(Path::new("/plan/E04/E04-F02-redis_cache"), "E04-F02"),
            "Redis Cache"
        );
        assert_eq!(folder_title(Path::new("/plan/E04"), "E04"), "E04");
    }

    #[test]
    fn test_discovers_epics_and_features() {
        let tmp = tree(&[
            "E04-search/E04-F02-cache/tasks",
            "E04-search/E04-P01-F03-ranking",
            "E05-billing",
            ".archive/E09-old",
            "notes",
        ]);

        let found = discover(tmp.path()).unwrap();
        let epics: Vec<(&str, &str)> = found
            .epics
            .iter()
            .map(|e| (e.key.as_str(), e.title.as_str()))
            .collect();
        assert_eq!(epics, vec![("E04", "Search"), ("E05", "Billing")]);

        let features: Vec<(&str, &str, &str)> = found
            .features
            .iter()
            .map(|f| (f.key.as_str(), f.epic_key.as_str(), f.title.as_str()))
            .collect();
        assert_eq!(
            features,
            vec![("E04-F02", "E04", "Cache"), ("E04-P01-F03", "E04", "Ranking")]
        );
        assert!(found.warnings.is_empty());
    }

    #[test]
    fn test_feature_needs_matching_epic_parent() {
        let tmp = tree(&["E04-search/E05-F01-misfiled", "loose/E06-F01-stray"]);

        let found = discover(tmp.path()).unwrap();
        assert_eq!(found.epics.len(), 1);
        assert!(found.features.is_empty());
    }

    #[test]
    fn test_index_titles_override_slugs() {
        let tmp = tree(&["E04-search/E04-F02-cache", "E05-billing"]);
        std::fs::write(
            tmp.path().join(INDEX_FILE),
            "# Epics\n\n\
             - [Search Platform](./E04-search/)\n  \
               - [Result Cache](./E04-search/E04-F02-cache/)\n  \
               - [PRD](./E04-search/E04-F02-cache/prd.md)\n\
             - [Docs](https://example.com/E05-billing)\n",
        )
        .unwrap();

        let found = discover(tmp.path()).unwrap();
        assert_eq!(found.epics[0].title, "Search Platform");
        assert_eq!(found.epics[1].title, "Billing");
        assert_eq!(found.features[0].title, "Result Cache");
    }

    #[test]
    fn test_parse_index_keeps_folder_links_only() {
        let links = parse_index(
            "[A](E01-a) [B](/E01-a/E01-F01-b/) [C](E01-a/E01-F01-b/tasks) \
             [D](notes.txt) [E](http://x/y)",
        );
        assert_eq!(
            links,
            vec![
                IndexLink { path: "E01-a".into(), title: "A".into() },
                IndexLink { path: "E01-a/E01-F01-b".into(), title: "B".into() },
            ]
        );
    }

    #[test]
    fn test_missing_root_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(discover(&tmp.path().join("nope")).is_err());
    }
}
