//! Filename pattern registry.
//!
//! Patterns are named regular expressions that map a markdown filename to an
//! entity type and a set of named captures (`task_key`, `number`, `slug`, ...).
//! They are validated and compiled once per process in [`PatternRegistry::load`]
//! and never recompiled per file.
//!
//! # Validation
//!
//! Loading fails with [`PatternConfigError::Invalid`] listing *every*
//! violation when any of these rules is broken:
//!
//! 1. the regex compiles;
//! 2. the regex is at most [`MAX_PATTERN_LEN`] characters;
//! 3. the regex contains no nested unbounded quantifier such as `(.*)*` or `(.+)+`;
//! 4. the regex declares at least one of [`REQUIRED_GROUPS`];
//! 5. names are unique and use only ASCII alphanumerics and `-`;
//! 6. at least one pattern is enabled.
//!
//! Disabled patterns only have their names checked.
//!
//! # Matching
//!
//! Enabled patterns are tried in configured order; the first match wins.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PatternConfigError, PatternViolation};

/// Maximum regex source length, in characters.
pub const MAX_PATTERN_LEN: usize = 200;

/// A pattern must declare at least one of these: an explicit identifier,
/// a numeric ordinal, or a slug.
pub const REQUIRED_GROUPS: &[&str] = &["task_key", "number", "slug"];

/// Group names the pipeline understands. Anything else is ignored with a warning.
const RECOGNIZED_GROUPS: &[&str] = &[
    "task_key",
    "number",
    "slug",
    "epic_num",
    "feature_num",
    "epic_id",
    "feature_id",
];

/// Which report bucket a matched file counts towards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Epic,
    Feature,
    #[default]
    Task,
    Related,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Epic => "epic",
            EntityKind::Feature => "feature",
            EntityKind::Task => "task",
            EntityKind::Related => "related",
        };
        write!(f, "{}", s)
    }
}

/// A pattern as written in the JSON config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub name: String,
    pub regex: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub entity: EntityKind,
}

fn default_enabled() -> bool {
    true
}

impl PatternDefinition {
    pub fn task(name: &str, regex: &str) -> Self {
        Self {
            name: name.to_string(),
            regex: regex.to_string(),
            enabled: true,
            entity: EntityKind::Task,
        }
    }
}

/// Top-level shape of the pattern config file.
#[derive(Debug, Default, Deserialize)]
pub struct PatternConfig {
    #[serde(default)]
    pub patterns: Option<Vec<PatternDefinition>>,
}

/// Built-in patterns used when the config supplies none.
pub fn default_patterns() -> Vec<PatternDefinition> {
    vec![
        // T-E04-F02-001.md, T-E04-P01-F02-001-add-cache.md
        PatternDefinition::task(
            "task-key",
            r"^(?P<task_key>T-E\d{2}(?:-P\d{2})?-F\d{2}-\d{3})(?:-(?P<slug>[a-z0-9-]+))?\.md$",
        ),
        // 01-research-phase.md, 004-wire-up-cli.md
        PatternDefinition::task("numbered", r"^(?P<number>\d{2,3})-(?P<slug>[^.]+)\.md$"),
        // implement-caching.prp.md
        PatternDefinition::task("prp", r"^(?P<slug>[A-Za-z0-9_-]+)\.prp\.md$"),
    ]
}

/// A validated, compiled pattern. Immutable after load.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub source: String,
    pub entity: EntityKind,
    pub groups: Vec<String>,
    regex: Regex,
}

/// Result of matching a filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub pattern: String,
    pub entity: EntityKind,
    pub captures: HashMap<String, String>,
}

impl PatternMatch {
    pub fn get(&self, group: &str) -> Option<&str> {
        self.captures
            .get(group)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Lookup failure for [`PatternRegistry::captured_groups`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PatternLookupError {
    #[error("no enabled pattern named '{0}'")]
    UnknownPattern(String),
    #[error("'{filename}' does not match pattern '{pattern}'")]
    NoMatch { pattern: String, filename: String },
}

/// Ordered set of compiled patterns.
#[derive(Debug, Clone)]
pub struct PatternRegistry {
    patterns: Vec<CompiledPattern>,
    warnings: Vec<String>,
}

impl PatternRegistry {
    /// Validate and compile `defs`. An empty list loads [`default_patterns`].
    pub fn load(defs: Vec<PatternDefinition>) -> Result<Self, PatternConfigError> {
        let defs = if defs.is_empty() {
            tracing::debug!("no patterns configured, using built-in defaults");
            default_patterns()
        } else {
            defs
        };

        let patterns = validate_definitions(&defs).map_err(PatternConfigError::Invalid)?;
        let warnings = patterns.iter().flat_map(unknown_group_warnings).collect();

        Ok(Self { patterns, warnings })
    }

    pub fn from_defaults() -> Result<Self, PatternConfigError> {
        Self::load(default_patterns())
    }

    /// Load from a JSON pattern config. A missing file or a missing/empty
    /// `patterns` list falls back to the defaults.
    pub fn load_file(path: Option<&Path>) -> Result<Self, PatternConfigError> {
        let Some(path) = path else {
            return Self::from_defaults();
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "pattern config not found, using defaults");
            return Self::from_defaults();
        }

        let content = std::fs::read_to_string(path).map_err(|source| PatternConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PatternConfig =
            serde_json::from_str(&content).map_err(|source| PatternConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        Self::load(config.patterns.unwrap_or_default())
    }

    /// First enabled pattern matching `filename`, in configured order.
    pub fn match_file(&self, filename: &str) -> Option<PatternMatch> {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.captures(filename) {
                tracing::trace!(filename, pattern = %pattern.name, "pattern matched");
                return Some(PatternMatch {
                    pattern: pattern.name.clone(),
                    entity: pattern.entity,
                    captures,
                });
            }
        }
        None
    }

    /// Named captures of `filename` against one specific pattern.
    pub fn captured_groups(
        &self,
        filename: &str,
        pattern_name: &str,
    ) -> Result<HashMap<String, String>, PatternLookupError> {
        let pattern = self
            .patterns
            .iter()
            .find(|p| p.name == pattern_name)
            .ok_or_else(|| PatternLookupError::UnknownPattern(pattern_name.to_string()))?;

        pattern
            .captures(filename)
            .ok_or_else(|| PatternLookupError::NoMatch {
                pattern: pattern_name.to_string(),
                filename: filename.to_string(),
            })
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    /// Non-fatal findings from load (unrecognised capture groups).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

impl CompiledPattern {
    fn captures(&self, input: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(input)?;
        let mut out = HashMap::new();
        for name in self.regex.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                out.insert(name.to_string(), m.as_str().to_string());
            }
        }
        Some(out)
    }
}

/// Check every definition, collecting all violations.
fn validate_definitions(
    defs: &[PatternDefinition],
) -> Result<Vec<CompiledPattern>, Vec<PatternViolation>> {
    let mut violations = Vec::new();
    let mut compiled = Vec::new();
    let mut seen = HashSet::new();

    for def in defs {
        let mut violate = |message: String| {
            violations.push(PatternViolation {
                pattern: def.name.clone(),
                message,
            })
        };

        if !is_valid_name(&def.name) {
            violate("name must be non-empty and contain only letters, digits and '-'".into());
        }
        if !seen.insert(def.name.as_str()) {
            violate("duplicate pattern name".into());
        }

        if !def.enabled {
            continue;
        }

        let len = def.regex.chars().count();
        if len > MAX_PATTERN_LEN {
            violate(format!(
                "regex is {} characters long (max {})",
                len, MAX_PATTERN_LEN
            ));
        }
        if has_nested_quantifier(&def.regex) {
            violate(
                "regex has catastrophic backtracking potential \
                 (nested quantifiers like (a+)+ are not allowed)"
                    .into(),
            );
        }

        match Regex::new(&def.regex) {
            Ok(regex) => {
                let groups: Vec<String> = regex
                    .capture_names()
                    .flatten()
                    .map(str::to_string)
                    .collect();
                if !groups.iter().any(|g| REQUIRED_GROUPS.contains(&g.as_str())) {
                    violate(format!(
                        "missing required capture group: must include at least one of {}",
                        REQUIRED_GROUPS
                            .iter()
                            .map(|g| format!("'{}'", g))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
                compiled.push(CompiledPattern {
                    name: def.name.clone(),
                    source: def.regex.clone(),
                    entity: def.entity,
                    groups,
                    regex,
                });
            }
            Err(e) => violate(format!("invalid regex syntax: {}", e)),
        }
    }

    if !defs.iter().any(|d| d.enabled) {
        violations.push(PatternViolation {
            pattern: String::new(),
            message: "at least one pattern must be enabled".into(),
        });
    }

    if violations.is_empty() {
        Ok(compiled)
    } else {
        Err(violations)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Detect a group that contains an unbounded quantifier and is itself
/// followed by one, e.g. `(.*)*`, `(a+)+`, `((x+)y){2,}`.
///
/// Escapes and character classes are skipped; `?` is not treated as
/// unbounded.
pub fn has_nested_quantifier(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    // One entry per open group: does it contain an unbounded quantifier?
    let mut groups: Vec<bool> = Vec::new();
    let mut in_class = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            i += 2;
            continue;
        }
        if in_class {
            if c == ']' {
                in_class = false;
            }
            i += 1;
            continue;
        }

        match c {
            '[' => in_class = true,
            '(' => groups.push(false),
            ')' => {
                let inner = groups.pop().unwrap_or(false);
                let repeated = is_unbounded_quantifier(&chars, i + 1);
                if inner && repeated {
                    return true;
                }
                if inner || repeated {
                    if let Some(parent) = groups.last_mut() {
                        *parent = true;
                    }
                }
            }
            '+' | '*' => {
                if let Some(top) = groups.last_mut() {
                    *top = true;
                }
            }
            '{' => {
                if is_unbounded_quantifier(&chars, i) {
                    if let Some(top) = groups.last_mut() {
                        *top = true;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    false
}

/// `+`, `*` or `{n,}` starting at `at`.
fn is_unbounded_quantifier(chars: &[char], at: usize) -> bool {
    match chars.get(at) {
        Some('+') | Some('*') => true,
        Some('{') => {
            let body: String = chars[at + 1..].iter().take_while(|c| **c != '}').collect();
            match body.split_once(',') {
                Some((min, max)) => {
                    !min.is_empty() && min.chars().all(|c| c.is_ascii_digit()) && max.trim().is_empty()
                }
                None => false,
            }
        }
        _ => false,
    }
}

fn unknown_group_warnings(pattern: &CompiledPattern) -> Vec<String> {
    pattern
        .groups
        .iter()
        .filter(|g| !RECOGNIZED_GROUPS.contains(&g.as_str()))
        .map(|g| {
            let lower = g.to_lowercase();
            let suggestions: Vec<&str> = RECOGNIZED_GROUPS
                .iter()
                .copied()
                .filter(|r| r.contains(lower.as_str()) || lower.contains(r))
                .take(2)
                .collect();
            let mut warning = format!(
                "pattern '{}': capture group '{}' is not recognized and will be ignored",
                pattern.name, g
            );
            if !suggestions.is_empty() {
                warning.push_str(&format!(". Did you mean '{}'?", suggestions.join("' or '")));
            }
            warning
        })
        .collect()
}
