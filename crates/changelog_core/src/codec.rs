//! Entry file codec.
//!
//! # Responsibility
//! - Map an `Entry` to and from its on-disk `---` delimited header + body text.
//! - Append timestamped note lines into the body's `## Notes` section.
//!
//! # Invariants
//! - Known header keys are always written in the order
//!   `id, title, created_iso, type, impact`, then preserved unknown keys.
//! - Only `"` is escaped inside the quoted title. Stored entries rely on this.
//! - A body never gains a second `## Notes` heading.

use crate::model::entry::{Entry, EntryTimestamp, DEFAULT_ENTRY_TYPE, DEFAULT_IMPACT};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter, Write as _};

/// Opening and closing line of the header block.
pub const HEADER_MARKER: &str = "---";
/// Section heading that collects appended notes.
pub const NOTES_HEADING: &str = "## Notes";

static HEADER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9_.-]+):\s*(.*?)\s*$").expect("valid header line regex")
});

/// Decoding failure for one entry file (`MalformedEntryError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    MissingOpeningMarker,
    MissingClosingMarker,
    /// Required for identity or ordering.
    MissingField(&'static str),
    InvalidTimestamp(String),
    InvalidImpact(String),
    NotUtf8,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOpeningMarker => {
                write!(f, "header must start with a `{HEADER_MARKER}` line")
            }
            Self::MissingClosingMarker => {
                write!(f, "header is not closed by a `{HEADER_MARKER}` line")
            }
            Self::MissingField(name) => write!(f, "required header field `{name}` is missing"),
            Self::InvalidTimestamp(value) => write!(
                f,
                "invalid created_iso `{value}`; expected YYYY-MM-DDTHH:MM:SSZ"
            ),
            Self::InvalidImpact(value) => {
                write!(f, "invalid impact `{value}`; expected an integer")
            }
            Self::NotUtf8 => write!(f, "file is not valid UTF-8"),
        }
    }
}

impl Error for CodecError {}

/// Parses one entry file.
///
/// Missing `type`, `impact` and `title` fall back to defaults; missing `id`
/// or `created_iso` fail with [`CodecError::MissingField`]. Non-blank header
/// lines that are not `key: value` pairs are kept verbatim.
pub fn parse_entry(input: &str) -> Result<Entry, CodecError> {
    let (header_lines, body) = split_header(input)?;

    let mut id = None;
    let mut title = None;
    let mut created_iso = None;
    let mut kind = None;
    let mut impact = None;
    let mut extra = Vec::new();
    let mut unparsed_header = Vec::new();

    for line in header_lines {
        let Some((key, value)) = header_field(line) else {
            if !line.trim().is_empty() {
                unparsed_header.push(line.to_string());
            }
            continue;
        };
        match key {
            "id" => {
                id.get_or_insert_with(|| value.to_string());
            }
            "title" => {
                title.get_or_insert_with(|| unquote_title(value));
            }
            "created_iso" => {
                if created_iso.is_none() {
                    let parsed = EntryTimestamp::parse(value)
                        .ok_or_else(|| CodecError::InvalidTimestamp(value.to_string()))?;
                    created_iso = Some(parsed);
                }
            }
            "type" => {
                kind.get_or_insert_with(|| value.to_string());
            }
            "impact" => {
                if impact.is_none() && !value.is_empty() {
                    let parsed = value
                        .parse::<i64>()
                        .map_err(|_| CodecError::InvalidImpact(value.to_string()))?;
                    impact = Some(parsed);
                }
            }
            other => extra.push((other.to_string(), value.to_string())),
        }
    }

    let id = id
        .filter(|value| !value.is_empty())
        .ok_or(CodecError::MissingField("id"))?;
    let created_iso = created_iso.ok_or(CodecError::MissingField("created_iso"))?;

    Ok(Entry {
        id,
        title: title.unwrap_or_default(),
        created_iso,
        kind: kind
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_ENTRY_TYPE.to_string()),
        impact: impact.unwrap_or(DEFAULT_IMPACT),
        extra,
        unparsed_header,
        body: body.to_string(),
    })
}

/// Reads only the header `id`, even when other fields are corrupt.
///
/// Lets a store treat a damaged file as still owning its id.
pub fn header_id(input: &str) -> Option<String> {
    let (header_lines, _) = split_header(input).ok()?;
    header_lines
        .into_iter()
        .filter_map(header_field)
        .find(|(key, _)| *key == "id")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn split_header(input: &str) -> Result<(Vec<&str>, &str), CodecError> {
    let input = input.trim_start_matches('\u{feff}');
    let mut segments = input.split_inclusive('\n');

    let first = segments.next().ok_or(CodecError::MissingOpeningMarker)?;
    if first.trim_end() != HEADER_MARKER {
        return Err(CodecError::MissingOpeningMarker);
    }

    let mut offset = first.len();
    let mut header_lines = Vec::new();
    for segment in segments {
        offset += segment.len();
        if segment.trim_end() == HEADER_MARKER {
            let rest = &input[offset..];
            let body = rest
                .strip_prefix("\r\n")
                .or_else(|| rest.strip_prefix('\n'))
                .unwrap_or(rest);
            return Ok((header_lines, body));
        }
        header_lines.push(segment.trim_end_matches(['\r', '\n']));
    }
    Err(CodecError::MissingClosingMarker)
}

fn header_field(line: &str) -> Option<(&str, &str)> {
    let caps = HEADER_LINE_RE.captures(line)?;
    let key = caps.get(1)?.as_str();
    let value = caps.get(2).map_or("", |m| m.as_str());
    Some((key, value))
}

/// Renders one entry file: header block, blank line, body verbatim.
pub fn serialize_entry(entry: &Entry) -> String {
    let mut out = String::with_capacity(128 + entry.body.len());
    // Writing into a String cannot fail.
    let _ = writeln!(out, "{HEADER_MARKER}");
    let _ = writeln!(out, "id: {}", entry.id);
    let _ = writeln!(out, "title: \"{}\"", escape_title(&entry.title));
    let _ = writeln!(out, "created_iso: {}", entry.created_iso);
    let _ = writeln!(out, "type: {}", entry.kind);
    let _ = writeln!(out, "impact: {}", entry.impact);
    for (key, value) in &entry.extra {
        let _ = writeln!(out, "{key}: {value}");
    }
    for line in &entry.unparsed_header {
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out, "{HEADER_MARKER}");
    out.push('\n');
    out.push_str(&entry.body);
    out
}

/// Returns `body` with one `**<timestamp>** <text>` line added to `## Notes`.
///
/// Creates the section at the end of the body when absent. Otherwise the
/// line goes after the last non-blank line of the section, so notes stay in
/// append order. Line breaks in `text` are folded into single spaces; a note
/// is always exactly one line.
pub fn append_note(body: &str, at: EntryTimestamp, text: &str) -> String {
    let note_line = format!("**{at}** {}", single_line(text));
    let mut lines: Vec<String> = body.lines().map(str::to_string).collect();

    match lines.iter().position(|line| line.trim_end() == NOTES_HEADING) {
        Some(heading) => {
            let section_end = lines[heading + 1..]
                .iter()
                .position(|line| line.starts_with('#'))
                .map_or(lines.len(), |pos| heading + 1 + pos);
            let last_note = (heading + 1..section_end)
                .rev()
                .find(|&idx| !lines[idx].trim().is_empty());

            match last_note {
                Some(idx) => lines.insert(idx + 1, note_line),
                None => {
                    lines.drain(heading + 1..section_end);
                    let mut inserted = vec![String::new(), note_line];
                    if heading + 1 < lines.len() {
                        inserted.push(String::new());
                    }
                    lines.splice(heading + 1..heading + 1, inserted);
                }
            }
        }
        None => {
            while lines.last().is_some_and(|line| line.trim().is_empty()) {
                lines.pop();
            }
            if !lines.is_empty() {
                lines.push(String::new());
            }
            lines.push(NOTES_HEADING.to_string());
            lines.push(String::new());
            lines.push(note_line);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_title(title: &str) -> String {
    title.replace('"', "\\\"")
}

fn unquote_title(raw: &str) -> String {
    match raw
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\\\"", "\""),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        append_note, header_id, parse_entry, serialize_entry, CodecError, NOTES_HEADING,
    };
    use crate::model::entry::{Entry, EntryTimestamp};

    fn ts(value: &str) -> EntryTimestamp {
        EntryTimestamp::parse(value).expect("fixture timestamp should parse")
    }

    #[test]
    fn parses_fixture_layout() {
        let input = concat!(
            "---\n",
            "id: fix-1\n",
            "title: \"Fix \\\"quoted\\\" bug\"\n",
            "created_iso: 2024-01-01T00:00:00Z\n",
            "type: bugfix\n",
            "impact: 5\n",
            "---\n",
            "\n",
            "Body line\n",
        );
        let entry = parse_entry(input).expect("fixture should parse");
        assert_eq!(entry.id, "fix-1");
        assert_eq!(entry.title, "Fix \"quoted\" bug");
        assert_eq!(entry.kind, "bugfix");
        assert_eq!(entry.impact, 5);
        assert_eq!(entry.body, "Body line\n");
    }

    #[test]
    fn serialize_then_parse_preserves_unknown_keys_in_order() {
        let mut entry = Entry::new("a1", "Title", ts("2024-05-06T07:08:09Z"));
        entry.extra = vec![
            ("owner".to_string(), "ops".to_string()),
            ("area".to_string(), "cli".to_string()),
        ];
        entry.body = "text\n".to_string();

        let rendered = serialize_entry(&entry);
        assert!(rendered.contains("impact: 3\nowner: ops\narea: cli\n---\n\ntext\n"));
        assert_eq!(parse_entry(&rendered).expect("rendered should parse"), entry);
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let entry = parse_entry("---\nid: x\ncreated_iso: 2024-01-01T00:00:00Z\n---\n")
            .expect("minimal header should parse");
        assert_eq!(entry.kind, "default");
        assert_eq!(entry.impact, 3);
        assert_eq!(entry.title, "");
        assert_eq!(entry.body, "");
    }

    #[test]
    fn missing_identity_fields_are_malformed() {
        assert_eq!(
            parse_entry("---\ntitle: \"t\"\ncreated_iso: 2024-01-01T00:00:00Z\n---\n"),
            Err(CodecError::MissingField("id"))
        );
        assert_eq!(
            parse_entry("---\nid: x\n---\n"),
            Err(CodecError::MissingField("created_iso"))
        );
        assert_eq!(
            parse_entry("no header"),
            Err(CodecError::MissingOpeningMarker)
        );
        assert_eq!(
            parse_entry("---\nid: x\n"),
            Err(CodecError::MissingClosingMarker)
        );
    }

    #[test]
    fn corrupt_values_are_malformed() {
        assert!(matches!(
            parse_entry("---\nid: x\ncreated_iso: soon\n---\n"),
            Err(CodecError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_entry("---\nid: x\ncreated_iso: 2024-01-01T00:00:00Z\nimpact: high\n---\n"),
            Err(CodecError::InvalidImpact(_))
        ));
    }

    #[test]
    fn append_note_creates_single_section_and_keeps_order() {
        let first = append_note("Some body\n", ts("2024-01-01T00:00:01Z"), "first");
        let second = append_note(&first, ts("2024-01-01T00:00:02Z"), "second");

        assert_eq!(
            second,
            concat!(
                "Some body\n\n## Notes\n\n",
                "**2024-01-01T00:00:01Z** first\n",
                "**2024-01-01T00:00:02Z** second\n",
            )
        );
        assert_eq!(second.matches(NOTES_HEADING).count(), 1);
    }

    #[test]
    fn append_note_targets_existing_empty_section() {
        let body = append_note("\n## Notes\n", ts("2024-01-01T00:00:00Z"), "hi");
        assert_eq!(body, "\n## Notes\n\n**2024-01-01T00:00:00Z** hi\n");
    }

    #[test]
    fn append_note_stays_inside_section_followed_by_heading() {
        let body = "## Notes\n\n**2024-01-01T00:00:00Z** a\n\n## Links\n\nx\n";
        let updated = append_note(body, ts("2024-01-01T00:00:05Z"), "b");
        assert_eq!(
            updated,
            "## Notes\n\n**2024-01-01T00:00:00Z** a\n**2024-01-01T00:00:05Z** b\n\n## Links\n\nx\n"
        );
    }

    #[test]
    fn multiline_note_text_stays_on_one_line() {
        let body = append_note(
            "Intro\n",
            ts("2024-01-01T00:00:01Z"),
            "line one\n## Notes\r\nline three\n",
        );
        assert_eq!(body.lines().filter(|line| *line == NOTES_HEADING).count(), 1);
        assert!(body.ends_with("**2024-01-01T00:00:01Z** line one ## Notes line three\n"));

        let later = append_note(&body, ts("2024-01-01T00:00:02Z"), "later");
        assert!(later.ends_with("line three\n**2024-01-01T00:00:02Z** later\n"));
    }

    #[test]
    fn unparsed_header_lines_survive_a_rewrite() {
        let input = concat!(
            "---\n",
            "id: keep-1\n",
            "created_iso: 2024-01-01T00:00:00Z\n",
            "# reviewed by ops\n",
            "owner: ops\n",
            "---\n",
            "\n",
            "body\n",
        );
        let entry = parse_entry(input).expect("header with free-form line should parse");
        assert_eq!(entry.unparsed_header, vec!["# reviewed by ops".to_string()]);

        let rendered = serialize_entry(&entry);
        assert!(rendered.contains("owner: ops\n# reviewed by ops\n---\n"));
        assert_eq!(parse_entry(&rendered).expect("rendered should parse"), entry);
    }

    #[test]
    fn header_id_is_recovered_from_otherwise_corrupt_header() {
        let corrupt = "---\nid: x1\ncreated_iso: 2024-01-01T00:00:00Z\nimpact: high\n---\n";
        assert!(parse_entry(corrupt).is_err());
        assert_eq!(header_id(corrupt), Some("x1".to_string()));
        assert_eq!(header_id("---\ntitle: t\n---\n"), None);
        assert_eq!(header_id("no header"), None);
    }
}
