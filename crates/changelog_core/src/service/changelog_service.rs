//! Changelog command engine.
//!
//! # Responsibility
//! - Implement `create`, `list`, `show` and `append-note` over a repository.
//! - Shape results as one JSON object or as JSON-Lines.
//!
//! # Invariants
//! - Each call is one transaction against the file store: the entry file is
//!   either fully written or untouched.
//! - `list` output is ordered by `created_iso`, then by the filename's
//!   same-second counter, then by filename.
//! - Malformed files never abort `list`; they are returned as skipped.
//! - The clock is injected, so one command uses one `now` for every write.

use crate::codec::{append_note, CodecError};
use crate::model::entry::{
    validate_id, Entry, EntryId, EntryTimestamp, EntryValidationError, DEFAULT_ENTRY_TYPE,
    DEFAULT_IMPACT,
};
use crate::repo::entry_repo::{EntryRepository, FileEntryRepository, RepoError, StoredEntry};
use crate::resolve::{ResolveError, ResolvedDir};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SHORT_ID_LEN: usize = 8;
const SHORT_ID_ATTEMPTS: usize = 8;
/// JSON keys owned by the record itself; extra header keys never shadow them.
const RESERVED_JSON_KEYS: &[&str] = &[
    "id",
    "title",
    "created_iso",
    "type",
    "impact",
    "body",
    "full_path",
];

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Command-boundary error. Every variant maps to a non-zero exit code.
#[derive(Debug)]
pub enum ServiceError {
    Resolve(ResolveError),
    DirectoryNotFound(PathBuf),
    EntryNotFound(EntryId),
    DuplicateId { id: EntryId, existing: PathBuf },
    Malformed { path: PathBuf, source: CodecError },
    InvalidInput(String),
    Repo(RepoError),
    /// Writing the command result to stdout failed.
    Output(io::Error),
}

impl ServiceError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Resolve(_) | Self::DirectoryNotFound(_) => 3,
            Self::EntryNotFound(_) => 4,
            Self::DuplicateId { .. } => 5,
            Self::Malformed { .. } => 6,
            Self::InvalidInput(_) => 7,
            Self::Repo(_) | Self::Output(_) => 1,
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve(err) => write!(f, "{err}"),
            Self::DirectoryNotFound(path) => {
                write!(f, "changelog directory not found: {}", path.display())
            }
            Self::EntryNotFound(id) => write!(f, "entry not found: {id}"),
            Self::DuplicateId { id, existing } => write!(
                f,
                "duplicate entry id `{id}`: already used by {}",
                existing.display()
            ),
            Self::Malformed { path, source } => {
                write!(f, "malformed entry {}: {source}", path.display())
            }
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Output(err) => write!(f, "failed to write output: {err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Resolve(err) => Some(err),
            Self::Malformed { source, .. } => Some(source),
            Self::Repo(err) => Some(err),
            Self::Output(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResolveError> for ServiceError {
    fn from(value: ResolveError) -> Self {
        Self::Resolve(value)
    }
}

impl From<EntryValidationError> for ServiceError {
    fn from(value: EntryValidationError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::DirectoryNotFound(path) => Self::DirectoryNotFound(path),
            RepoError::EntryNotFound(id) => Self::EntryNotFound(id),
            RepoError::DuplicateId { id, existing } => Self::DuplicateId { id, existing },
            RepoError::Malformed { path, source, .. } => Self::Malformed { path, source },
            RepoError::Validation(err) => err.into(),
            other => Self::Repo(other),
        }
    }
}

/// Source of "now" for creation and note timestamps.
pub trait Clock {
    fn now(&self) -> EntryTimestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> EntryTimestamp {
        EntryTimestamp::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub EntryTimestamp);

impl Clock for FixedClock {
    fn now(&self) -> EntryTimestamp {
        self.0
    }
}

/// Input for `create`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    pub title: String,
    /// Defaults to `default`.
    pub kind: Option<String>,
    /// Defaults to `3`.
    pub impact: Option<i64>,
    /// Generated when absent.
    pub id: Option<String>,
    /// Initial body text.
    pub description: Option<String>,
}

/// `create` result, emitted as `{"id": ..., "full_path": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedEntry {
    pub id: EntryId,
    pub full_path: PathBuf,
}

/// Optional `list` filters. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub kind: Option<String>,
    pub min_impact: Option<i64>,
    pub id: Option<String>,
    /// Applied after filtering and ordering.
    pub limit: Option<usize>,
}

impl ListFilter {
    pub fn matches(&self, entry: &Entry) -> bool {
        self.kind.as_deref().map_or(true, |kind| entry.kind == kind)
            && self.min_impact.map_or(true, |min| entry.impact >= min)
            && self.id.as_deref().map_or(true, |id| entry.id == id)
    }
}

/// File that `list` could not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: CodecError,
}

/// `list` result: matching entries in output order plus skipped files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListReport {
    pub entries: Vec<StoredEntry>,
    pub skipped: Vec<SkippedEntry>,
}

/// JSON shape of one entry in `list` and `show` output.
#[derive(Debug, Serialize)]
pub struct EntryRecord<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub created_iso: EntryTimestamp,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub impact: i64,
    #[serde(flatten)]
    pub extra: BTreeMap<&'a str, &'a str>,
    pub body: &'a str,
    pub full_path: &'a Path,
}

impl<'a> From<&'a StoredEntry> for EntryRecord<'a> {
    fn from(stored: &'a StoredEntry) -> Self {
        let entry = &stored.entry;
        let mut extra = BTreeMap::new();
        for (key, value) in &entry.extra {
            if !RESERVED_JSON_KEYS.contains(&key.as_str()) {
                extra.entry(key.as_str()).or_insert(value.as_str());
            }
        }
        Self {
            id: &entry.id,
            title: &entry.title,
            created_iso: entry.created_iso,
            kind: &entry.kind,
            impact: entry.impact,
            extra,
            body: &entry.body,
            full_path: &stored.path,
        }
    }
}

/// Command engine over one repository.
pub struct ChangelogService<R: EntryRepository, C: Clock = SystemClock> {
    repo: R,
    clock: C,
}

impl<R: EntryRepository> ChangelogService<R, SystemClock> {
    /// Creates a service using wall-clock time.
    pub fn new(repo: R) -> Self {
        Self::with_clock(repo, SystemClock)
    }
}

impl<R: EntryRepository, C: Clock> ChangelogService<R, C> {
    pub fn with_clock(repo: R, clock: C) -> Self {
        Self { repo, clock }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Creates one entry and returns its id and absolute path.
    ///
    /// # Errors
    /// - `DuplicateId` when an explicit id is already used in the directory.
    /// - `InvalidInput` for an empty/multi-line title or a malformed id.
    ///
    /// Surrounding whitespace is trimmed from `kind`, matching how the
    /// header is read back.
    pub fn create(&self, request: CreateRequest) -> ServiceResult<CreatedEntry> {
        let id = match request.id {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => self.generate_id()?,
        };

        let mut entry = Entry::new(id, request.title, self.clock.now());
        entry.kind = request
            .kind
            .map(|kind| kind.trim().to_string())
            .unwrap_or_else(|| DEFAULT_ENTRY_TYPE.to_string());
        entry.impact = request.impact.unwrap_or(DEFAULT_IMPACT);
        if let Some(description) = request.description {
            let trimmed = description.trim_end();
            if !trimmed.is_empty() {
                entry.body = format!("{trimmed}\n");
            }
        }
        entry.validate()?;

        let full_path = self.repo.create_entry(&entry)?;
        info!(
            "event=cmd_create module=service status=ok id={} type={} impact={}",
            entry.id, entry.kind, entry.impact
        );
        Ok(CreatedEntry {
            id: entry.id,
            full_path,
        })
    }

    /// Returns matching entries, oldest first.
    pub fn list(&self, filter: &ListFilter) -> ServiceResult<ListReport> {
        let mut report = ListReport::default();
        for item in self.repo.entries()? {
            match item {
                Ok(stored) => {
                    if filter.matches(&stored.entry) {
                        report.entries.push(stored);
                    }
                }
                Err(RepoError::Malformed { path, source, .. }) => {
                    warn!(
                        "event=entry_skip module=service status=malformed path={} reason={}",
                        path.display(),
                        source
                    );
                    report.skipped.push(SkippedEntry {
                        path,
                        reason: source,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }

        report.entries.sort_by(|a, b| {
            a.entry
                .created_iso
                .cmp(&b.entry.created_iso)
                .then_with(|| a.creation_counter().cmp(&b.creation_counter()))
                .then_with(|| a.file_name().cmp(b.file_name()))
        });
        if let Some(limit) = filter.limit {
            report.entries.truncate(limit);
        }
        Ok(report)
    }

    /// Loads one entry by id.
    pub fn show(&self, id: &str) -> ServiceResult<StoredEntry> {
        Ok(self.repo.find_by_id(id)?)
    }

    /// Appends a timestamped line to the entry's `## Notes` section.
    ///
    /// Line breaks in `text` are folded into spaces; other control
    /// characters are rejected.
    pub fn append_note(&self, id: &str, text: &str) -> ServiceResult<StoredEntry> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "note text cannot be empty".to_string(),
            ));
        }
        if text
            .chars()
            .any(|ch| ch.is_control() && !matches!(ch, '\n' | '\r' | '\t'))
        {
            return Err(ServiceError::InvalidInput(
                "note text cannot contain control characters".to_string(),
            ));
        }

        let mut stored = self.repo.find_by_id(id)?;
        stored.entry.body = append_note(&stored.entry.body, self.clock.now(), text);
        self.repo.update_entry(&stored)?;
        info!(
            "event=cmd_append_note module=service status=ok id={} path={}",
            stored.entry.id,
            stored.path.display()
        );
        Ok(stored)
    }

    fn generate_id(&self) -> ServiceResult<EntryId> {
        let taken = self.repo.id_index()?;
        for _ in 0..SHORT_ID_ATTEMPTS {
            let candidate = Uuid::new_v4().simple().to_string()[..SHORT_ID_LEN].to_string();
            if !taken.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Ok(Uuid::new_v4().simple().to_string())
    }
}

/// Opens an existing changelog directory for `list`, `show` and `append-note`.
pub fn open_existing(dir: &ResolvedDir) -> ServiceResult<ChangelogService<FileEntryRepository>> {
    let repo = FileEntryRepository::open(dir.path())?;
    Ok(ChangelogService::new(repo))
}

/// Opens the changelog directory for `create`, creating it when absent.
pub fn open_for_create(
    dir: &ResolvedDir,
) -> ServiceResult<ChangelogService<FileEntryRepository>> {
    let repo = FileEntryRepository::open_or_create(dir.path())?;
    Ok(ChangelogService::new(repo))
}

/// Writes `value` as one compact JSON document and a newline.
pub fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> ServiceResult<()> {
    serde_json::to_writer(&mut *out, value).map_err(|err| ServiceError::Output(err.into()))?;
    writeln!(out).map_err(ServiceError::Output)
}

/// Writes one JSON line per entry. Nothing is written for an empty slice.
pub fn write_jsonl<W: Write>(out: &mut W, entries: &[StoredEntry]) -> ServiceResult<()> {
    for stored in entries {
        write_json(out, &EntryRecord::from(stored))?;
    }
    out.flush().map_err(ServiceError::Output)
}

#[cfg(test)]
mod tests {
    use super::{EntryRecord, ListFilter, ServiceError};
    use crate::model::entry::{Entry, EntryTimestamp};
    use crate::repo::entry_repo::{RepoError, StoredEntry};
    use std::path::PathBuf;

    fn entry(kind: &str, impact: i64) -> Entry {
        let created = EntryTimestamp::parse("2024-01-01T00:00:00Z").unwrap();
        let mut entry = Entry::new("e1", "t", created);
        entry.kind = kind.to_string();
        entry.impact = impact;
        entry
    }

    #[test]
    fn filter_combines_all_set_fields() {
        let filter = ListFilter {
            kind: Some("bugfix".to_string()),
            min_impact: Some(4),
            ..ListFilter::default()
        };
        assert!(filter.matches(&entry("bugfix", 4)));
        assert!(!filter.matches(&entry("bugfix", 3)));
        assert!(!filter.matches(&entry("feature", 5)));
        assert!(ListFilter::default().matches(&entry("anything", -1)));
    }

    #[test]
    fn record_flattens_extra_keys_without_shadowing() {
        let mut e = entry("default", 3);
        e.extra = vec![
            ("owner".to_string(), "ops".to_string()),
            ("id".to_string(), "spoofed".to_string()),
        ];
        let stored = StoredEntry {
            entry: e,
            path: PathBuf::from("/tmp/change_log/2024-01-01_00-00-00Z.md"),
        };

        let json = serde_json::to_value(EntryRecord::from(&stored)).unwrap();
        assert_eq!(json["id"], "e1");
        assert_eq!(json["owner"], "ops");
        assert_eq!(json["type"], "default");
        assert_eq!(json["impact"], 3);
        assert_eq!(json["created_iso"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn repo_errors_map_to_distinct_exit_codes() {
        let not_found: ServiceError = RepoError::EntryNotFound("x".to_string()).into();
        let missing_dir: ServiceError =
            RepoError::DirectoryNotFound(PathBuf::from("/nope")).into();
        assert_eq!(not_found.exit_code(), 4);
        assert_eq!(missing_dir.exit_code(), 3);
        assert!(missing_dir.to_string().contains("/nope"));
    }
}
