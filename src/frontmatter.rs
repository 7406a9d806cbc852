//! Leading YAML frontmatter blocks.
//!
//! A block opens with a first line of `---` and closes at the next `---`
//! line. Anything after the closing delimiter is the body and is never
//! touched. A block that is opened but never closed is treated as body text.
//!
//! Malformed YAML (or YAML that is not a mapping) reads as an empty map so a
//! later [`write`] can replace it with a fresh, valid block.
//!
//! [`write`] edits the block textually: the target field's line is replaced
//! or appended and every other line is kept byte-for-byte. The new file
//! content goes through [`atomic_write`].

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::error::FrontmatterError;
use crate::fileops::atomic_write;

/// Byte ranges of a frontmatter block inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawBlock<'a> {
    /// Text between the delimiter lines, including its trailing newline.
    yaml: &'a str,
    /// Everything after the three dashes of the closing delimiter.
    after_close: &'a str,
    /// Offset of the first body byte (after the closing line).
    body_start: usize,
    newline: &'static str,
}

fn split_raw(content: &str) -> Option<RawBlock<'_>> {
    let mut lines = content.split_inclusive('\n');
    let first = lines.next()?;
    if first.trim_end() != "---" || !first.ends_with('\n') {
        return None;
    }
    let newline = if first.ends_with("\r\n") { "\r\n" } else { "\n" };

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim_end() == "---" {
            return Some(RawBlock {
                yaml: &content[yaml_start..offset],
                after_close: &content[offset + 3..],
                body_start: offset + line.len(),
                newline,
            });
        }
        offset += line.len();
    }
    None
}

fn parse_mapping(yaml: &str) -> Option<Mapping> {
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(map)) => Some(map),
        Ok(Value::Null) => Some(Mapping::new()),
        _ => None,
    }
}

/// Parse the frontmatter of `content`. Missing or malformed blocks yield an
/// empty map.
pub fn parse(content: &str) -> Mapping {
    let Some(raw) = split_raw(content) else {
        return Mapping::new();
    };
    parse_mapping(raw.yaml).unwrap_or_else(|| {
        tracing::debug!("malformed frontmatter treated as empty");
        Mapping::new()
    })
}

/// The markdown body: everything after the closing delimiter line, or the
/// whole document when there is no block.
pub fn body(content: &str) -> &str {
    match split_raw(content) {
        Some(raw) => &content[raw.body_start..],
        None => content,
    }
}

/// Scalar field as a trimmed, non-empty string.
pub fn get_str(map: &Mapping, field: &str) -> Option<String> {
    let value = map.get(field)?;
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Return `content` with `key` set to `value` in its frontmatter.
///
/// - well-formed block: the `key:` line (and its indented continuation) is
///   replaced, or a line is appended before the closing delimiter;
///   a block the line edit would break (flow or indented mapping) is
///   re-serialised with every existing field kept;
/// - malformed block: replaced by a fresh block holding only `key`;
/// - no block: a new block is prepended, followed by a blank line.
pub fn set_field(content: &str, key: &str, value: &str) -> Result<String, serde_yaml::Error> {
    let mut fresh = Mapping::new();
    fresh.insert(Value::String(key.to_string()), Value::String(value.to_string()));
    let fresh_yaml = serde_yaml::to_string(&fresh)?;

    let Some(raw) = split_raw(content) else {
        return Ok(format!("---\n{}---\n\n{}", fresh_yaml, content));
    };

    let Some(mut existing) = parse_mapping(raw.yaml) else {
        tracing::debug!(key, "replacing malformed frontmatter block");
        let yaml = fresh_yaml.replace('\n', raw.newline);
        return Ok(format!("---{}{}---{}", raw.newline, yaml, raw.after_close));
    };

    let entry = fresh_yaml.trim_end();
    let mut yaml = upsert_line(raw.yaml, key, entry, raw.newline);

    // Flow mappings and indented blocks do not survive a line edit.
    let edited = parse_mapping(&yaml);
    if edited.as_ref().and_then(|m| get_str(m, key)).as_deref() != Some(value) {
        tracing::debug!(key, "line edit broke frontmatter; re-serialising block");
        existing.insert(Value::String(key.to_string()), Value::String(value.to_string()));
        yaml = serde_yaml::to_string(&existing)?.replace('\n', raw.newline);
    }
    Ok(format!("---{}{}---{}", raw.newline, yaml, raw.after_close))
}

fn upsert_line(yaml: &str, key: &str, entry: &str, newline: &str) -> String {
    let mut out = String::with_capacity(yaml.len() + entry.len() + 2);
    let mut replaced = false;
    let mut skipping = false;

    for line in yaml.split_inclusive('\n') {
        if skipping {
            if is_continuation(line) {
                continue;
            }
            skipping = false;
        }
        if !replaced && is_key_line(line, key) {
            out.push_str(entry);
            out.push_str(newline);
            replaced = true;
            skipping = true;
            continue;
        }
        out.push_str(line);
    }

    if !replaced {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push_str(newline);
        }
        out.push_str(entry);
        out.push_str(newline);
    }
    out
}

fn is_key_line(line: &str, key: &str) -> bool {
    let rest = line
        .strip_prefix(key)
        .or_else(|| {
            line.strip_prefix('"')
                .and_then(|l| l.strip_prefix(key))
                .and_then(|l| l.strip_prefix('"'))
        })
        .or_else(|| {
            line.strip_prefix('\'')
                .and_then(|l| l.strip_prefix(key))
                .and_then(|l| l.strip_prefix('\''))
        });
    match rest.and_then(|r| r.strip_prefix(':')) {
        Some(after) => after.is_empty() || after.starts_with(char::is_whitespace),
        None => false,
    }
}

/// Indented lines and same-level sequence items belong to the previous key.
fn is_continuation(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('\t') || line.starts_with("- ") || line.trim_end() == "-"
}

/// Read and parse the frontmatter of the file at `path`.
pub fn read(path: &Path) -> Result<Mapping, FrontmatterError> {
    let content = read_file(path)?;
    Ok(parse(&content))
}

/// `Some(value)` when `field` is present with a non-empty scalar value.
pub fn has_key(path: &Path, field: &str) -> Result<Option<String>, FrontmatterError> {
    let map = read(path)?;
    Ok(get_str(&map, field))
}

/// Set `key: value` in the file's frontmatter and replace the file atomically.
pub fn write(path: &Path, key: &str, value: &str) -> Result<(), FrontmatterError> {
    let content = read_file(path)?;
    let updated = set_field(&content, key, value).map_err(|source| FrontmatterError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    atomic_write(path, updated.as_bytes(), None).map_err(|source| FrontmatterError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), key, value, "frontmatter updated");
    Ok(())
}

fn read_file(path: &Path) -> Result<String, FrontmatterError> {
    std::fs::read_to_string(path).map_err(|source| FrontmatterError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_well_formed() {
        let map = parse("---\ntitle: Add cache\nstatus: todo\n---\n# Body\n");
        assert_eq!(get_str(&map, "title").as_deref(), Some("Add cache"));
        assert_eq!(get_str(&map, "status").as_deref(), Some("todo"));
        assert_eq!(get_str(&map, "missing"), None);
    }

    #[test]
    fn test_parse_tolerates_bad_input() {
        assert!(parse("no frontmatter here").is_empty());
        assert!(parse("---\ntitle: [unclosed\n---\nbody").is_empty());
        assert!(parse("---\n- a\n- b\n---\nbody").is_empty());
        assert!(parse("---\n---\nbody").is_empty());
        // Never closed: not frontmatter.
        assert!(parse("---\ntitle: x\nbody without end").is_empty());
    }

    #[test]
    fn test_parse_crlf() {
        let map = parse("---\r\ntitle: Windows\r\n---\r\nbody\r\n");
        assert_eq!(get_str(&map, "title").as_deref(), Some("Windows"));
        assert_eq!(body("---\r\ntitle: Windows\r\n---\r\nbody\r\n"), "body\r\n");
    }

    #[test]
    fn test_get_str_scalars() {
        let map = parse("---\nnum: 7\nflag: true\nblank: \"  \"\nlist: [1]\n---\n");
        assert_eq!(get_str(&map, "num").as_deref(), Some("7"));
        assert_eq!(get_str(&map, "flag").as_deref(), Some("true"));
        assert_eq!(get_str(&map, "blank"), None);
        assert_eq!(get_str(&map, "list"), None);
    }

    #[test]
    fn test_body_after_block() {
        assert_eq!(body("---\na: 1\n---\n\n# T\n"), "\n# T\n");
        assert_eq!(body("# Only body\n"), "# Only body\n");
    }

    #[test]
    fn test_set_field_preserves_other_bytes() {
        let original = "---\ntitle: \"Quoted Title\"\ntags: [a, b]   # keep me\n---\n\n# Body\n\ntext\n";
        let updated = set_field(original, "task_key", "T-E04-F02-001").unwrap();
        assert_eq!(
            updated,
            "---\ntitle: \"Quoted Title\"\ntags: [a, b]   # keep me\ntask_key: T-E04-F02-001\n---\n\n# Body\n\ntext\n"
        );
    }

    #[test]
    fn test_set_field_replaces_existing_value() {
        let original = "---\ntask_key: \"\"\nnotes:\n  - one\n  - two\n---\nbody";
        let updated = set_field(original, "notes", "flat").unwrap();
        assert_eq!(updated, "---\ntask_key: \"\"\nnotes: flat\n---\nbody");

        let updated = set_field(original, "task_key", "T-E01-F01-002").unwrap();
        assert_eq!(
            updated,
            "---\ntask_key: T-E01-F01-002\nnotes:\n  - one\n  - two\n---\nbody"
        );
    }

    #[test]
    fn test_set_field_does_not_match_key_prefix() {
        let original = "---\ntask_key_old: x\n---\n";
        let updated = set_field(original, "task_key", "T-E01-F01-001").unwrap();
        assert_eq!(updated, "---\ntask_key_old: x\ntask_key: T-E01-F01-001\n---\n");
    }

    #[test]
    fn test_set_field_without_block() {
        let updated = set_field("# Title\n\nBody.\n", "task_key", "T-E01-F01-001").unwrap();
        assert_eq!(updated, "---\ntask_key: T-E01-F01-001\n---\n\n# Title\n\nBody.\n");
    }

    #[test]
    fn test_set_field_replaces_malformed_block() {
        let updated = set_field("---\ntitle: [oops\n---\n# Body\n", "task_key", "T-E01-F01-001").unwrap();
        assert_eq!(updated, "---\ntask_key: T-E01-F01-001\n---\n# Body\n");
        assert_eq!(
            get_str(&parse(&updated), "task_key").as_deref(),
            Some("T-E01-F01-001")
        );
    }

    #[test]
    fn test_set_field_flow_mapping_keeps_fields() {
        let content = "---\n{title: Flow, owner: sam}\n---\n# Body\n";
        let updated = set_field(content, "task_key", "T-E01-F01-001").unwrap();
        let map = parse(&updated);
        assert_eq!(get_str(&map, "title").as_deref(), Some("Flow"));
        assert_eq!(get_str(&map, "owner").as_deref(), Some("sam"));
        assert_eq!(get_str(&map, "task_key").as_deref(), Some("T-E01-F01-001"));
        assert_eq!(body(&updated), "# Body\n");
    }

    #[test]
    fn test_set_field_indented_mapping_keeps_fields() {
        let content = "---\n  title: Indented\n  status: todo\n---\n\n# Body\n";
        let updated = set_field(content, "task_key", "T-E01-F01-001").unwrap();
        assert_eq!(
            updated,
            "---\ntitle: Indented\nstatus: todo\ntask_key: T-E01-F01-001\n---\n\n# Body\n"
        );

        // A second write is a no-op on the now regular block.
        let again = set_field(&updated, "task_key", "T-E01-F01-001").unwrap();
        assert_eq!(again, updated);
    }

    #[test]
    fn test_set_field_keeps_crlf() {
        let updated = set_field("---\r\ntitle: A\r\n---\r\nbody\r\n", "task_key", "T-E01-F01-001").unwrap();
        assert_eq!(updated, "---\r\ntitle: A\r\ntask_key: T-E01-F01-001\r\n---\r\nbody\r\n");
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("task.md");
        let body_text = "\n# Task: Build it\n\nSome *markdown* body.\n";
        std::fs::write(&path, format!("---\ntitle: Build it\nowner: sam\n---\n{}", body_text)).unwrap();

        write(&path, "task_key", "T-E04-F02-004").unwrap();

        assert_eq!(
            has_key(&path, "task_key").unwrap().as_deref(),
            Some("T-E04-F02-004")
        );
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body(&content), body_text);
        let map = read(&path).unwrap();
        assert_eq!(get_str(&map, "owner").as_deref(), Some("sam"));
        assert_eq!(get_str(&map, "title").as_deref(), Some("Build it"));
    }

    #[test]
    fn test_write_missing_file_is_read_error() {
        let tmp = TempDir::new().unwrap();
        let err = write(&tmp.path().join("nope.md"), "k", "v").unwrap_err();
        assert!(matches!(err, FrontmatterError::Read { .. }));
    }
}
