//! Raw-text section editor for Move.lock / Move.toml / Published.toml
//!
//! Edits work on lines, never on a parsed document, so everything outside the
//! touched section comes back byte-for-byte. Line endings (LF or CRLF) and the
//! trailing-newline convention of the input are kept.
//!
//! A section starts at its header. Its *body* ends at the next header of any
//! kind; the *section* (what removal drops) also swallows descendant tables such
//! as `[env.testnet.extra]` and stops at the next unrelated header.

use crate::core::error::{PublisherError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;

lazy_static! {
    static ref HEADER_REGEX: Regex =
        Regex::new(r"^\s*\[\[?\s*([^\[\]]+?)\s*\]\]?\s*(#.*)?$").expect("header pattern is valid");
}

/// Line terminator used by a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
}

impl LineEnding {
    pub fn detect(text: &str) -> Self {
        if text.contains("\r\n") { Self::CrLf } else { Self::Lf }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

#[derive(Debug, Clone)]
struct Document {
    lines: Vec<String>,
    eol: LineEnding,
    trailing_newline: bool,
}

impl Document {
    fn parse(text: &str) -> Self {
        let eol = LineEnding::detect(text);

        if text.is_empty() {
            return Self {
                lines: Vec::new(),
                eol,
                trailing_newline: true,
            };
        }

        let trailing_newline = text.ends_with('\n');
        let body = if trailing_newline {
            let without_lf = &text[..text.len() - 1];
            without_lf.strip_suffix('\r').unwrap_or(without_lf)
        } else {
            text
        };

        let lines = body
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();

        Self {
            lines,
            eol,
            trailing_newline,
        }
    }

    fn render(&self) -> String {
        if self.lines.is_empty() {
            return String::new();
        }

        let mut out = self.lines.join(self.eol.as_str());
        if self.trailing_newline {
            out.push_str(self.eol.as_str());
        }
        out
    }

    fn find_header(&self, name: &str) -> Option<usize> {
        self.lines
            .iter()
            .position(|line| header_name(line).as_deref() == Some(name))
    }

    fn locate(&self, name: &str) -> Option<SectionRange> {
        let header = self.find_header(name)?;
        let child_prefix = format!("{}.", name);

        let mut body_end = self.lines.len();
        let mut end = self.lines.len();
        let mut body_end_found = false;

        for (index, line) in self.lines.iter().enumerate().skip(header + 1) {
            let Some(other) = header_name(line) else {
                continue;
            };
            if !body_end_found {
                body_end = index;
                body_end_found = true;
            }
            if other != name && !other.starts_with(&child_prefix) {
                end = index;
                break;
            }
        }

        Some(SectionRange {
            header,
            body_end,
            end,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct SectionRange {
    header: usize,
    body_end: usize,
    end: usize,
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Normalized table name of a header line, `None` for anything else
///
/// `[ published . "testnet" ]` and `[published.testnet]` both yield
/// `published.testnet`.
pub fn header_name(line: &str) -> Option<String> {
    let captures = HEADER_REGEX.captures(line)?;
    let raw = captures.get(1)?.as_str();

    let name = raw
        .split('.')
        .map(|segment| {
            let segment = segment.trim();
            segment
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| segment.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(segment)
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(".");

    Some(name)
}

/// Split a `key = value` line, `None` for blanks, comments and headers
fn parse_entry(line: &str) -> Option<(String, &str)> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('[') {
        return None;
    }

    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    let key = key
        .strip_prefix('"')
        .and_then(|k| k.strip_suffix('"'))
        .unwrap_or(key);

    Some((key.to_string(), value.trim()))
}

/// Value of a right-hand side: quoted strings are unquoted, bare values are
/// returned without their trailing comment
fn parse_value(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => value.push(chars.next()?),
                '"' => return Some(value),
                other => value.push(other),
            }
        }
        return None;
    }

    if let Some(rest) = raw.strip_prefix('\'') {
        return rest.find('\'').map(|end| rest[..end].to_string());
    }

    let bare = raw.split('#').next().unwrap_or("").trim();
    if bare.is_empty() {
        None
    } else {
        Some(bare.to_string())
    }
}

fn format_key(key: &str) -> String {
    if !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        key.to_string()
    } else {
        format!("\"{}\"", escape(key))
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn leading_whitespace(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Whether a table with this (normalized) name exists
pub fn has_section(text: &str, section: &str) -> bool {
    Document::parse(text).find_header(section).is_some()
}

/// Entries of a section body in file order
pub fn section_entries(text: &str, section: &str) -> Vec<(String, String)> {
    let doc = Document::parse(text);
    let Some(range) = doc.locate(section) else {
        return Vec::new();
    };

    doc.lines[range.header + 1..range.body_end]
        .iter()
        .filter_map(|line| {
            let (key, raw) = parse_entry(line)?;
            Some((key, parse_value(raw)?))
        })
        .collect()
}

/// Read a single `key = value` entry from a section
pub fn read_entry(text: &str, section: &str, key: &str) -> Option<String> {
    section_entries(text, section)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

/// Pull `end` back over comments glued to the header at `end`
///
/// Comments directly above a header belong to it, not to the section before.
fn before_glued_comments(lines: &[String], header: usize, end: usize) -> usize {
    if end >= lines.len() {
        return end;
    }
    let mut end = end;
    while end > header + 1 && is_comment(&lines[end - 1]) {
        end -= 1;
    }
    end
}

/// Remove a section (and its descendant tables)
///
/// The blank lines around the cut collapse to a single separating blank line.
/// Removing a section that does not exist returns the input untouched.
pub fn remove_section(text: &str, section: &str) -> (String, bool) {
    let doc = Document::parse(text);
    let Some(range) = doc.locate(section) else {
        return (text.to_string(), false);
    };

    let end = before_glued_comments(&doc.lines, range.header, range.end);

    let mut before: Vec<String> = doc.lines[..range.header].to_vec();
    while before.last().is_some_and(|line| is_blank(line)) {
        before.pop();
    }

    let mut after = doc.lines[end..].iter().skip_while(|line| is_blank(line));

    let mut lines = before;
    if let Some(first) = after.next() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(first.clone());
        lines.extend(after.cloned());
    }

    let updated = Document { lines, ..doc };
    (updated.render(), true)
}

/// Insert or update `key = "value"` inside `section`
///
/// When the section is missing it is created right before the first `anchor`
/// header (together with any comments glued to it), or at the end of the file
/// when no anchor is given or found. A value already equal to `value` reports
/// no change.
pub fn upsert_entry(
    text: &str,
    section: &str,
    key: &str,
    value: &str,
    anchor: Option<&str>,
) -> (String, bool) {
    let mut doc = Document::parse(text);
    let render_entry = |indent: &str| format!("{}{} = \"{}\"", indent, format_key(key), escape(value));

    if let Some(range) = doc.locate(section) {
        let body = range.header + 1..range.body_end;

        for index in body.clone() {
            let Some((existing_key, raw)) = parse_entry(&doc.lines[index]) else {
                continue;
            };
            if existing_key != key {
                continue;
            }
            if parse_value(raw).as_deref() == Some(value) {
                return (text.to_string(), false);
            }
            let indent = leading_whitespace(&doc.lines[index]).to_string();
            doc.lines[index] = render_entry(&indent);
            return (doc.render(), true);
        }

        let indent = doc.lines[body.clone()]
            .iter()
            .find(|line| parse_entry(line).is_some())
            .map(|line| leading_whitespace(line).to_string())
            .unwrap_or_default();

        let content_end = before_glued_comments(&doc.lines, range.header, range.body_end);
        let insert_at = (range.header + 1..content_end)
            .rev()
            .find(|&index| !is_blank(&doc.lines[index]))
            .map(|index| index + 1)
            .unwrap_or(range.header + 1);

        doc.lines.insert(insert_at, render_entry(&indent));
        return (doc.render(), true);
    }

    let block = vec![format!("[{}]", section), render_entry("")];

    match anchor.and_then(|name| doc.find_header(name)) {
        Some(anchor_index) => {
            let mut insert_at = anchor_index;
            while insert_at > 0 && is_comment(&doc.lines[insert_at - 1]) {
                insert_at -= 1;
            }

            let mut insertion = Vec::new();
            if insert_at > 0 && !is_blank(&doc.lines[insert_at - 1]) {
                insertion.push(String::new());
            }
            insertion.extend(block);
            insertion.push(String::new());

            doc.lines.splice(insert_at..insert_at, insertion);
        }
        None => {
            if doc.lines.last().is_some_and(|line| !is_blank(line)) {
                doc.lines.push(String::new());
            }
            doc.lines.extend(block);
        }
    }

    (doc.render(), true)
}

/// Apply an edit to a file on disk
///
/// A missing file means there is nothing to edit and returns `Ok(false)`. The
/// file is only rewritten when the edit reports a change.
pub async fn edit_file<F>(path: &Path, edit: F) -> Result<bool>
where
    F: FnOnce(&str) -> (String, bool),
{
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(PublisherError::persistence(path, e)),
    };

    let (updated, changed) = edit(&content);
    if !changed {
        return Ok(false);
    }

    write_atomic(path, updated).await?;
    Ok(true)
}

/// Replace `path` with `contents` through a temp file in the same directory
///
/// An existing file keeps its permissions. The temp file is removed when any
/// step fails.
pub async fn write_atomic(path: &Path, contents: String) -> Result<()> {
    let target = path.to_path_buf();
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    tokio::task::spawn_blocking(move || {
        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| PublisherError::persistence(&dir, e))?;
        temp.write_all(contents.as_bytes())
            .map_err(|e| PublisherError::persistence(temp.path(), e))?;

        if let Ok(metadata) = std::fs::metadata(&target)
            && metadata.is_file()
        {
            temp.as_file()
                .set_permissions(metadata.permissions())
                .map_err(|e| PublisherError::persistence(temp.path(), e))?;
        }

        temp.persist(&target)
            .map_err(|e| PublisherError::persistence(&target, e.error))?;
        Ok::<(), PublisherError>(())
    })
    .await
    .map_err(|e| PublisherError::persistence(path, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LOCK: &str = r#"# @generated by Move, please check-in and do not edit manually.

[move]
version = 3

[published.localnet]
chain-id = "aaaa1111"
published-at = "0x01"

[published.testnet]
chain-id = "4c78adac"
published-at = "0x02"
"#;

    #[test]
    fn test_header_name_normalizes() {
        assert_eq!(header_name("[move]").as_deref(), Some("move"));
        assert_eq!(header_name("[[move.package]]").as_deref(), Some("move.package"));
        assert_eq!(
            header_name("  [ published . \"testnet\" ]  # note").as_deref(),
            Some("published.testnet")
        );
        assert_eq!(header_name("deps = [\"a\"]"), None);
        assert_eq!(header_name("[1, 2],"), None);
    }

    #[test]
    fn test_remove_missing_section_is_noop() {
        let (text, changed) = remove_section(LOCK, "published.devnet");

        assert!(!changed);
        assert_eq!(text, LOCK);
    }

    #[test]
    fn test_remove_middle_section_normalizes_blank_lines() {
        let (text, changed) = remove_section(LOCK, "published.localnet");

        assert!(changed);
        assert_eq!(
            text,
            r#"# @generated by Move, please check-in and do not edit manually.

[move]
version = 3

[published.testnet]
chain-id = "4c78adac"
published-at = "0x02"
"#
        );
    }

    #[test]
    fn test_remove_last_section_keeps_trailing_newline() {
        let (text, changed) = remove_section(LOCK, "published.testnet");

        assert!(changed);
        assert!(text.ends_with("published-at = \"0x01\"\n"));
        assert!(!text.contains("4c78adac"));
    }

    #[test]
    fn test_remove_keeps_comment_of_next_section() {
        let input = "[a]\nx = 1\n\n# about b\n[b]\ny = 2\n";
        let (text, changed) = remove_section(input, "a");

        assert!(changed);
        assert_eq!(text, "# about b\n[b]\ny = 2\n");
    }

    #[test]
    fn test_remove_drops_descendant_tables() {
        let input = "[env.localnet]\nid = 1\n\n[env.localnet.extra]\nz = 2\n\n[other]\nk = 3\n";
        let (text, _) = remove_section(input, "env.localnet");

        assert_eq!(text, "[other]\nk = 3\n");
    }

    #[test]
    fn test_upsert_existing_equal_value_is_noop() {
        let (text, changed) =
            upsert_entry(LOCK, "published.testnet", "chain-id", "4c78adac", None);

        assert!(!changed);
        assert_eq!(text, LOCK);
    }

    #[test]
    fn test_upsert_rewrites_existing_value() {
        let (text, changed) =
            upsert_entry(LOCK, "published.localnet", "chain-id", "bbbb2222", None);

        assert!(changed);
        assert_eq!(
            read_entry(&text, "published.localnet", "chain-id").as_deref(),
            Some("bbbb2222")
        );
        // untouched section is byte-identical
        assert!(text.contains("[published.testnet]\nchain-id = \"4c78adac\"\npublished-at = \"0x02\"\n"));
    }

    #[test]
    fn test_upsert_inserts_key_with_inferred_indent() {
        let input = "[environments]\n    # comment\n    testnet = \"4c78adac\"\n\n[dependencies]\n";
        let (text, changed) = upsert_entry(input, "environments", "localnet", "abcd", None);

        assert!(changed);
        assert_eq!(
            text,
            "[environments]\n    # comment\n    testnet = \"4c78adac\"\n    localnet = \"abcd\"\n\n[dependencies]\n"
        );
    }

    #[test]
    fn test_upsert_leaves_comment_of_next_section_in_place() {
        let input = "[environments]\ntestnet = \"x\"\n\n# deps\n[dependencies]\n";
        let (text, changed) = upsert_entry(input, "environments", "localnet", "abcd", None);

        assert!(changed);
        assert_eq!(
            text,
            "[environments]\ntestnet = \"x\"\nlocalnet = \"abcd\"\n\n# deps\n[dependencies]\n"
        );
    }

    #[test]
    fn test_upsert_creates_section_before_anchor() {
        let input = "[package]\nname = \"shop\"\n\n# deps\n[dependencies]\nSui = { local = \"../sui\" }\n";
        let (text, changed) =
            upsert_entry(input, "environments", "localnet", "abcd", Some("dependencies"));

        assert!(changed);
        assert_eq!(
            text,
            "[package]\nname = \"shop\"\n\n[environments]\nlocalnet = \"abcd\"\n\n# deps\n[dependencies]\nSui = { local = \"../sui\" }\n"
        );
    }

    #[test]
    fn test_upsert_creates_section_at_end_without_anchor() {
        let input = "[move]\nversion = 3";
        let (text, changed) = upsert_entry(input, "published.devnet", "chain-id", "x", Some("missing"));

        assert!(changed);
        assert_eq!(text, "[move]\nversion = 3\n\n[published.devnet]\nchain-id = \"x\"");
    }

    #[test]
    fn test_upsert_into_empty_text() {
        let (text, changed) = upsert_entry("", "environments", "localnet", "abcd", None);

        assert!(changed);
        assert_eq!(text, "[environments]\nlocalnet = \"abcd\"\n");
    }

    #[test]
    fn test_crlf_is_preserved() {
        let input = "[package]\r\nname = \"shop\"\r\n\r\n[environments]\r\ntestnet = \"1\"\r\n";
        let (text, changed) = upsert_entry(input, "environments", "testnet", "2", None);

        assert!(changed);
        assert_eq!(
            text,
            "[package]\r\nname = \"shop\"\r\n\r\n[environments]\r\ntestnet = \"2\"\r\n"
        );

        let (removed, _) = remove_section(input, "environments");
        assert_eq!(removed, "[package]\r\nname = \"shop\"\r\n");
    }

    #[test]
    fn test_quoted_keys_and_values() {
        let (text, _) = upsert_entry("[addresses]\n", "addresses", "my env", "a\"b", None);

        assert!(text.contains("\"my env\" = \"a\\\"b\""));
        assert_eq!(read_entry(&text, "addresses", "my env").as_deref(), Some("a\"b"));
    }

    #[test]
    fn test_section_entries_skip_comments_and_bare_values() {
        let input = "[move]\n# c\nversion = 3 # inline\nname = 'lit'\n";
        let entries = section_entries(input, "move");

        assert_eq!(
            entries,
            vec![
                ("version".to_string(), "3".to_string()),
                ("name".to_string(), "lit".to_string())
            ]
        );
        assert!(has_section(input, "move"));
        assert!(!has_section(input, "pinned"));
    }

    #[tokio::test]
    async fn test_edit_file_missing_is_nothing_to_edit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Move.lock");

        let changed = edit_file(&path, |text| remove_section(text, "published.localnet"))
            .await
            .unwrap();

        assert!(!changed);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_edit_file_writes_only_on_change() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Move.lock");
        std::fs::write(&path, LOCK).unwrap();

        let changed = edit_file(&path, |text| remove_section(text, "published.devnet"))
            .await
            .unwrap();
        assert!(!changed);

        let changed = edit_file(&path, |text| remove_section(text, "published.localnet"))
            .await
            .unwrap();
        assert!(changed);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("localnet"));
    }

    #[tokio::test]
    async fn test_edits_of_sibling_files_leave_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let manifest = temp_dir.path().join("Move.toml");
        let lock = temp_dir.path().join("Move.lock");
        std::fs::write(&manifest, "[package]\nname = \"shop\"\n\n[dependencies]\n").unwrap();
        std::fs::write(&lock, LOCK).unwrap();

        let (first, second) = tokio::join!(
            edit_file(&manifest, |text| upsert_entry(text, "environments", "localnet", "abcd", Some("dependencies"))),
            edit_file(&lock, |text| remove_section(text, "published.localnet")),
        );
        assert!(first.unwrap());
        assert!(second.unwrap());

        let mut names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Move.lock", "Move.toml"]);
        assert_eq!(
            read_entry(&std::fs::read_to_string(&manifest).unwrap(), "environments", "localnet").as_deref(),
            Some("abcd")
        );
    }

    #[tokio::test]
    async fn test_failed_write_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("deployment.localnet.json");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        let err = write_atomic(&target, "[]\n".to_string()).await.unwrap_err();

        assert_eq!(err.code(), "PERSISTENCE");
        let names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("deployment.localnet.json")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Move.toml");
        std::fs::write(&path, "[package]\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_atomic(&path, "[package]\nname = \"shop\"\n".to_string()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
