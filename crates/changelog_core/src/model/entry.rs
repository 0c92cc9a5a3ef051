//! Entry domain model.
//!
//! # Responsibility
//! - Define the canonical record stored as one changelog file.
//! - Own the second-precision UTC timestamp used for ordering and filenames.
//!
//! # Invariants
//! - `id` is the only lookup key; filenames are never used as identity.
//! - `created_iso` is assigned once at creation and never rewritten.
//! - Header values never contain line breaks, so one header line holds one field.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Serialize, Serializer};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Stable identifier for one entry within a changelog directory.
pub type EntryId = String;

/// Category applied when the caller does not supply one.
pub const DEFAULT_ENTRY_TYPE: &str = "default";
/// Impact applied when the caller does not supply one.
pub const DEFAULT_IMPACT: i64 = 3;
/// Wire format of `created_iso` and note timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const FILE_STEM_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// UTC instant quantized to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryTimestamp(DateTime<Utc>);

impl EntryTimestamp {
    /// Quantizes `instant` to whole seconds.
    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self(instant.trunc_subsecs(0))
    }

    /// Current wall-clock time, second precision.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Parses the `YYYY-MM-DDTHH:MM:SSZ` form. Returns `None` for anything else.
    pub fn parse(value: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| Self(naive.and_utc()))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Filename stem without counter or suffix, e.g. `2024-01-01_00-00-00`.
    pub fn file_stem(&self) -> String {
        self.0.format(FILE_STEM_FORMAT).to_string()
    }
}

impl Display for EntryTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl Serialize for EntryTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Validation error for entry field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValidationError {
    EmptyId,
    /// Ids must fit on one header line and survive shell quoting.
    InvalidId(String),
    EmptyTitle,
    MultilineTitle,
    InvalidType(String),
}

impl Display for EntryValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "entry id cannot be empty"),
            Self::InvalidId(value) => write!(
                f,
                "invalid entry id `{value}`: whitespace and control characters are not allowed"
            ),
            Self::EmptyTitle => write!(f, "entry title cannot be empty"),
            Self::MultilineTitle => write!(f, "entry title must be a single line"),
            Self::InvalidType(value) => write!(
                f,
                "invalid entry type `{value}`: must be a non-empty single line \
                 without surrounding whitespace"
            ),
        }
    }
}

impl Error for EntryValidationError {}

/// One changelog record: fixed header fields plus free-form body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    /// Logical title, unescaped.
    pub title: String,
    pub created_iso: EntryTimestamp,
    /// Serialized as `type` in both the header and JSON output.
    pub kind: String,
    /// Signed weight. No range policy is applied.
    pub impact: i64,
    /// Unknown header keys in file order, kept for round-trip fidelity.
    pub extra: Vec<(String, String)>,
    /// Non-blank header lines that are not `key: value`, written back as-is.
    pub unparsed_header: Vec<String>,
    /// Everything after the header's trailing blank line, verbatim.
    pub body: String,
}

impl Entry {
    /// Creates an entry with default type, impact and an empty body.
    pub fn new(
        id: impl Into<EntryId>,
        title: impl Into<String>,
        created_iso: EntryTimestamp,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_iso,
            kind: DEFAULT_ENTRY_TYPE.to_string(),
            impact: DEFAULT_IMPACT,
            extra: Vec::new(),
            unparsed_header: Vec::new(),
            body: String::new(),
        }
    }

    /// Checks that every header value can be written on one line.
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        validate_id(&self.id)?;
        if self.title.trim().is_empty() {
            return Err(EntryValidationError::EmptyTitle);
        }
        if self.title.contains(['\n', '\r']) {
            return Err(EntryValidationError::MultilineTitle);
        }
        if self.kind.trim().is_empty()
            || self.kind.trim() != self.kind
            || self.kind.contains(['\n', '\r'])
        {
            return Err(EntryValidationError::InvalidType(self.kind.clone()));
        }
        Ok(())
    }

    /// Returns the first preserved value for an unknown header key.
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Validates a caller-supplied or generated entry id.
pub fn validate_id(id: &str) -> Result<(), EntryValidationError> {
    if id.is_empty() {
        return Err(EntryValidationError::EmptyId);
    }
    if id.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(EntryValidationError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{validate_id, Entry, EntryTimestamp, EntryValidationError};
    use chrono::{TimeZone, Utc};

    #[test]
    fn timestamp_quantizes_and_formats() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap()
            + chrono::Duration::milliseconds(750);
        let ts = EntryTimestamp::from_datetime(instant);
        assert_eq!(ts.to_string(), "2024-03-09T07:05:01Z");
        assert_eq!(ts.file_stem(), "2024-03-09_07-05-01");
    }

    #[test]
    fn timestamp_parse_rejects_other_forms() {
        assert!(EntryTimestamp::parse("2024-01-01T00:00:00Z").is_some());
        assert!(EntryTimestamp::parse("2024-01-01 00:00:00").is_none());
        assert!(EntryTimestamp::parse("yesterday").is_none());
    }

    #[test]
    fn validate_rejects_multiline_title() {
        let mut entry = Entry::new("a1", "ok", EntryTimestamp::now());
        entry.title = "line1\nline2".to_string();
        assert_eq!(entry.validate(), Err(EntryValidationError::MultilineTitle));
    }

    #[test]
    fn validate_id_rejects_whitespace() {
        assert_eq!(validate_id(""), Err(EntryValidationError::EmptyId));
        assert!(matches!(
            validate_id("has space"),
            Err(EntryValidationError::InvalidId(_))
        ));
        assert!(validate_id("cl-0001").is_ok());
    }

    #[test]
    fn validate_rejects_type_that_would_not_survive_a_reparse() {
        let mut entry = Entry::new("a1", "ok", EntryTimestamp::now());
        entry.kind = " bugfix ".to_string();
        assert!(matches!(
            entry.validate(),
            Err(EntryValidationError::InvalidType(_))
        ));
        entry.kind = "bugfix".to_string();
        assert!(entry.validate().is_ok());
    }
}
