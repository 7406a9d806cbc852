//! Title and description extraction for task documents.
//!
//! Each field is resolved by an ordered list of pure strategies; the first
//! one returning a non-empty value wins. Title falls back to
//! [`PLACEHOLDER_TITLE`], which the engine reports as missing metadata.
//!
//! Title order: frontmatter `title`, filename, first `# ` heading.
//! Description order: frontmatter `description`, first paragraph after the
//! first `# ` heading.

use serde_yaml::Mapping;

use crate::frontmatter;
use crate::patterns::PatternMatch;

pub const PLACEHOLDER_TITLE: &str = "Untitled Task";

/// Descriptions longer than this are truncated (in characters).
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Heading prefixes dropped from heading-derived titles (case-insensitive).
const HEADING_PREFIXES: &[&str] = &["Task:", "PRP:", "TODO:", "WIP:"];

/// Everything a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct ExtractInput<'a> {
    pub frontmatter: &'a Mapping,
    pub filename: &'a str,
    pub pattern: Option<&'a PatternMatch>,
    /// Full file content, frontmatter included.
    pub content: &'a str,
}

pub type Strategy = fn(&ExtractInput<'_>) -> Option<String>;

/// Title strategies in priority order.
pub const TITLE_STRATEGIES: &[(&str, Strategy)] = &[
    ("frontmatter", title_from_frontmatter),
    ("filename", title_from_filename),
    ("heading", title_from_heading),
];

/// Description strategies in priority order.
pub const DESCRIPTION_STRATEGIES: &[(&str, Strategy)] = &[
    ("frontmatter", description_from_frontmatter),
    ("paragraph", description_from_paragraph),
];

/// A resolved title and the strategy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Title {
    pub value: String,
    /// Strategy name, or `"placeholder"`.
    pub source: &'static str,
}

impl Title {
    pub fn is_placeholder(&self) -> bool {
        self.source == "placeholder"
    }
}

pub fn resolve_title(input: &ExtractInput<'_>) -> Title {
    match run_strategies(TITLE_STRATEGIES, input) {
        Some((source, value)) => Title { value, source },
        None => {
            tracing::debug!(filename = input.filename, "no title found, using placeholder");
            Title {
                value: PLACEHOLDER_TITLE.to_string(),
                source: "placeholder",
            }
        }
    }
}

pub fn resolve_description(input: &ExtractInput<'_>) -> Option<String> {
    run_strategies(DESCRIPTION_STRATEGIES, input).map(|(_, value)| value)
}

fn run_strategies(
    strategies: &[(&'static str, Strategy)],
    input: &ExtractInput<'_>,
) -> Option<(&'static str, String)> {
    strategies.iter().find_map(|(name, strategy)| {
        let value = strategy(input).filter(|v| !v.trim().is_empty())?;
        tracing::debug!(filename = input.filename, policy = *name, value = %value, "field resolved");
        Some((*name, value))
    })
}

pub fn title_from_frontmatter(input: &ExtractInput<'_>) -> Option<String> {
    frontmatter::get_str(input.frontmatter, "title")
}

pub fn title_from_filename(input: &ExtractInput<'_>) -> Option<String> {
    title_from_name(input.filename, input.pattern)
}

pub fn title_from_heading(input: &ExtractInput<'_>) -> Option<String> {
    let heading = first_h1(frontmatter::body(input.content))?;
    let title = strip_heading_prefix(heading);
    (!title.is_empty()).then(|| title.to_string())
}

pub fn description_from_frontmatter(input: &ExtractInput<'_>) -> Option<String> {
    frontmatter::get_str(input.frontmatter, "description")
}

pub fn description_from_paragraph(input: &ExtractInput<'_>) -> Option<String> {
    let paragraph = description(input.content);
    (!paragraph.is_empty()).then_some(paragraph)
}

/// Title derived from a filename and the pattern it matched.
///
/// Uses the `slug` capture when present; otherwise strips the `task_key` or
/// `number` prefix. Separators become spaces and each word is capitalised.
pub fn title_from_name(filename: &str, pattern: Option<&PatternMatch>) -> Option<String> {
    let stem = strip_extension(filename);

    let raw = match pattern {
        Some(m) => {
            if let Some(slug) = m.get("slug") {
                slug.to_string()
            } else if let Some(key) = m.get("task_key") {
                stem.strip_prefix(key)
                    .unwrap_or(stem)
                    .trim_start_matches('-')
                    .to_string()
            } else if let Some(number) = m.get("number") {
                stem.strip_prefix(number)
                    .map(|rest| rest.trim_start_matches('-'))
                    .unwrap_or(stem)
                    .to_string()
            } else {
                stem.to_string()
            }
        }
        None => stem.to_string(),
    };

    let title = humanize(strip_extension(&raw));
    (!title.is_empty()).then_some(title)
}

/// First paragraph after the first `# ` heading, line breaks kept, capped at
/// [`MAX_DESCRIPTION_CHARS`]. Empty when there is no such paragraph.
pub fn description(content: &str) -> String {
    let mut lines = frontmatter::body(content).lines();

    if !lines.by_ref().any(|l| is_h1(l)) {
        return String::new();
    }

    let paragraph: Vec<&str> = lines
        .map(str::trim)
        .skip_while(|l| l.is_empty())
        .take_while(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    paragraph
        .join("\n")
        .chars()
        .take(MAX_DESCRIPTION_CHARS)
        .collect()
}

fn strip_extension(name: &str) -> &str {
    name.strip_suffix(".prp.md")
        .or_else(|| name.strip_suffix(".md"))
        .unwrap_or(name)
}

/// `add-redis_cache` -> `Add Redis Cache`.
pub fn humanize(raw: &str) -> String {
    raw.split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_h1(line: &str) -> bool {
    line.trim_start().starts_with("# ")
}

fn first_h1(body: &str) -> Option<&str> {
    body.lines()
        .find(|l| is_h1(l))
        .map(|l| l.trim_start()[2..].trim())
}

fn strip_heading_prefix(heading: &str) -> &str {
    for prefix in HEADING_PREFIXES {
        if heading.len() >= prefix.len()
            && heading.is_char_boundary(prefix.len())
            && heading[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            return heading[prefix.len()..].trim();
        }
    }
    heading
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::PatternRegistry;

    fn input<'a>(
        fm: &'a Mapping,
        filename: &'a str,
        pattern: Option<&'a PatternMatch>,
        content: &'a str,
    ) -> ExtractInput<'a> {
        ExtractInput {
            frontmatter: fm,
            filename,
            pattern,
            content,
        }
    }

    #[test]
    fn test_title_prefers_frontmatter() {
        let content = "---\ntitle: From Frontmatter\n---\n# Heading\n";
        let fm = frontmatter::parse(content);
        let registry = PatternRegistry::from_defaults().unwrap();
        let m = registry.match_file("01-from-file.md");
        let t = resolve_title(&input(&fm, "01-from-file.md", m.as_ref(), content));
        assert_eq!(t.value, "From Frontmatter");
        assert_eq!(t.source, "frontmatter");
    }

    #[test]
    fn test_title_from_filename_variants() {
        let registry = PatternRegistry::from_defaults().unwrap();
        let cases = [
            ("T-E04-F02-001-add-redis-cache.md", Some("Add Redis Cache")),
            ("T-E04-F02-001.md", None),
            ("01-research_phase.md", Some("Research Phase")),
            ("implement-caching.prp.md", Some("Implement Caching")),
        ];
        for (name, expected) in cases {
            let m = registry.match_file(name);
            assert_eq!(title_from_name(name, m.as_ref()).as_deref(), expected, "{}", name);
        }
        assert_eq!(title_from_name("loose_notes.md", None).as_deref(), Some("Loose Notes"));
    }

    #[test]
    fn test_title_strips_key_prefix_without_slug_group() {
        let m = PatternMatch {
            pattern: "custom".into(),
            entity: Default::default(),
            captures: [("task_key".to_string(), "T-E01-F01-002".to_string())].into(),
        };
        assert_eq!(
            title_from_name("T-E01-F01-002-wire-cli.md", Some(&m)).as_deref(),
            Some("Wire Cli")
        );
    }

    #[test]
    fn test_title_falls_back_to_heading() {
        let content = "---\nstatus: todo\n---\n\n# Task: Build the index\n\nBody.\n";
        let fm = frontmatter::parse(content);
        let registry = PatternRegistry::from_defaults().unwrap();
        let m = registry.match_file("T-E04-F02-001.md");
        let t = resolve_title(&input(&fm, "T-E04-F02-001.md", m.as_ref(), content));
        assert_eq!(t.value, "Build the index");
        assert_eq!(t.source, "heading");
    }

    #[test]
    fn test_heading_prefixes_case_insensitive() {
        assert_eq!(strip_heading_prefix("wip: Later"), "Later");
        assert_eq!(strip_heading_prefix("PRP:Design"), "Design");
        assert_eq!(strip_heading_prefix("Todo list"), "Todo list");
    }

    #[test]
    fn test_placeholder_when_nothing_found() {
        let fm = Mapping::new();
        let registry = PatternRegistry::from_defaults().unwrap();
        let m = registry.match_file("T-E04-F02-001.md");
        let t = resolve_title(&input(&fm, "T-E04-F02-001.md", m.as_ref(), "just text\n"));
        assert_eq!(t.value, PLACEHOLDER_TITLE);
        assert!(t.is_placeholder());
    }

    #[test]
    fn test_description_first_paragraph() {
        let content = "---\ndescription_hint: no\n---\nintro line\n# Title\n\nFirst line\nsecond line\n\nNext paragraph\n";
        assert_eq!(description(content), "First line\nsecond line");
    }

    #[test]
    fn test_description_stops_at_heading() {
        assert_eq!(description("# T\nabove\n## Sub\nbelow\n"), "above");
        assert_eq!(description("# T\n\n## Sub\ntext\n"), "");
    }

    #[test]
    fn test_description_requires_heading() {
        assert_eq!(description("Plain paragraph.\n"), "");
        assert_eq!(description(""), "");
    }

    #[test]
    fn test_description_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_DESCRIPTION_CHARS + 20);
        let d = description(&format!("# T\n{}\n", long));
        assert_eq!(d.chars().count(), MAX_DESCRIPTION_CHARS);
    }

    #[test]
    fn test_description_prefers_frontmatter() {
        let content = "---\ndescription: Short summary\n---\n# T\n\nLong body.\n";
        let fm = frontmatter::parse(content);
        let d = resolve_description(&input(&fm, "x.md", None, content));
        assert_eq!(d.as_deref(), Some("Short summary"));

        let fm = Mapping::new();
        let d = resolve_description(&input(&fm, "x.md", None, "no heading"));
        assert_eq!(d, None);
    }
}
