//! Entry repository contracts and plain-file implementation.
//!
//! # Responsibility
//! - Enumerate, look up, create and rewrite entry files in one directory.
//! - Allocate collision-free filenames from the creation second.
//!
//! # Invariants
//! - Lookup is "scan and match the `id` header", never "build a filename".
//! - Entry files are written through a temp file in the same directory and
//!   moved into place, so readers never observe a half-written entry.
//! - Creation never replaces an existing file (`persist_noclobber`).
//! - Only regular, non-hidden `*.md` files are entries.
//! - A malformed file whose header still names an id keeps owning that id.
//! - New files get the process umask's default mode; rewrites keep the
//!   existing file's mode.

use crate::codec::{header_id, parse_entry, serialize_entry, CodecError};
use crate::model::entry::{Entry, EntryId, EntryTimestamp, EntryValidationError};
use log::{debug, info};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::{self, ReadDir};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

const ENTRY_FILE_EXTENSION: &str = ".md";
/// Length of `YYYY-MM-DD_HH-MM-SS`.
const FILE_STEM_LEN: usize = 19;
/// Highest two-digit disambiguator for entries created in the same second.
pub const MAX_SAME_SECOND_COUNTER: u8 = 99;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entry file enumeration and persistence.
#[derive(Debug)]
pub enum RepoError {
    /// Read operation against a directory that does not exist.
    DirectoryNotFound(PathBuf),
    EntryNotFound(EntryId),
    DuplicateId {
        id: EntryId,
        existing: PathBuf,
    },
    Validation(EntryValidationError),
    Malformed {
        path: PathBuf,
        /// Header `id`, when it could still be read.
        id: Option<EntryId>,
        source: CodecError,
    },
    /// Directory creation or new-file write failed.
    Create {
        path: PathBuf,
        source: io::Error,
    },
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// Every counter for one creation second is taken.
    FilenameSpaceExhausted(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DirectoryNotFound(path) => {
                write!(f, "changelog directory not found: {}", path.display())
            }
            Self::EntryNotFound(id) => write!(f, "entry not found: {id}"),
            Self::DuplicateId { id, existing } => write!(
                f,
                "duplicate entry id `{id}`: already used by {}",
                existing.display()
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Malformed { path, source, .. } => {
                write!(f, "malformed entry {}: {source}", path.display())
            }
            Self::Create { path, source } => {
                write!(f, "failed to create {}: {source}", path.display())
            }
            Self::Io { path, source } => write!(f, "i/o error on {}: {source}", path.display()),
            Self::FilenameSpaceExhausted(stem) => write!(
                f,
                "no free filename left for creation second `{stem}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Malformed { source, .. } => Some(source),
            Self::Create { source, .. } | Self::Io { source, .. } => Some(source),
            Self::DirectoryNotFound(_)
            | Self::EntryNotFound(_)
            | Self::DuplicateId { .. }
            | Self::FilenameSpaceExhausted(_) => None,
        }
    }
}

impl RepoError {
    /// Id claimed by a malformed file, if its header still names one.
    pub fn malformed_id(&self) -> Option<&str> {
        match self {
            Self::Malformed { id, .. } => id.as_deref(),
            _ => None,
        }
    }
}

impl From<EntryValidationError> for RepoError {
    fn from(value: EntryValidationError) -> Self {
        Self::Validation(value)
    }
}

/// One decoded entry together with the file holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry: Entry,
    pub path: PathBuf,
}

impl StoredEntry {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Same-second counter encoded in the filename; `0` for the bare form.
    pub fn creation_counter(&self) -> u8 {
        parse_creation_counter(self.file_name())
    }
}

/// Lazy, restartable scan over one directory.
pub type EntryStream<'a> = Box<dyn Iterator<Item = RepoResult<StoredEntry>> + 'a>;

/// Repository interface for entry storage.
pub trait EntryRepository {
    /// Directory this repository operates on.
    fn dir(&self) -> &Path;

    /// Scans every entry file. Order follows the filesystem, not time.
    fn entries(&self) -> RepoResult<EntryStream<'_>>;

    /// Writes a new entry file and returns its path.
    fn create_entry(&self, entry: &Entry) -> RepoResult<PathBuf>;

    /// Rewrites an existing entry file in place.
    fn update_entry(&self, stored: &StoredEntry) -> RepoResult<()>;

    /// Finds the entry whose header `id` equals `id`.
    ///
    /// A malformed file claiming `id` is returned as `Malformed`; other
    /// malformed files are skipped. Remaining scan errors abort the lookup.
    fn find_by_id(&self, id: &str) -> RepoResult<StoredEntry> {
        for item in self.entries()? {
            match item {
                Ok(stored) if stored.entry.id == id => return Ok(stored),
                Ok(_) => {}
                Err(err @ RepoError::Malformed { .. }) => {
                    if err.malformed_id() == Some(id) {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(RepoError::EntryNotFound(id.to_string()))
    }

    /// Builds an `id -> path` index from a fresh scan, including ids named
    /// by malformed files.
    fn id_index(&self) -> RepoResult<HashMap<EntryId, PathBuf>> {
        let mut index = HashMap::new();
        for item in self.entries()? {
            match item {
                Ok(stored) => {
                    index.entry(stored.entry.id).or_insert(stored.path);
                }
                Err(RepoError::Malformed {
                    path, id: Some(id), ..
                }) => {
                    index.entry(id).or_insert(path);
                }
                Err(RepoError::Malformed { id: None, .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(index)
    }
}

/// Plain-file entry repository rooted at one changelog directory.
#[derive(Debug, Clone)]
pub struct FileEntryRepository {
    dir: PathBuf,
}

impl FileEntryRepository {
    /// Opens an existing directory. Used by read-only and update commands.
    pub fn open(dir: impl Into<PathBuf>) -> RepoResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(RepoError::DirectoryNotFound(dir));
        }
        Ok(Self { dir })
    }

    /// Opens the directory, creating it and any parents when absent.
    pub fn open_or_create(dir: impl Into<PathBuf>) -> RepoResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|source| RepoError::Create {
                path: dir.clone(),
                source,
            })?;
            info!(
                "event=dir_create module=repo status=ok path={}",
                dir.display()
            );
        }
        Ok(Self { dir })
    }

    fn write_new(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut builder = Builder::new();
        if let Some(permissions) = new_file_permissions() {
            builder.permissions(permissions);
        }
        let tmp = builder.tempfile_in(&self.dir)?;
        let tmp = fill(tmp, contents)?;
        tmp.persist_noclobber(path)?;
        Ok(())
    }

    fn write_replace(&self, path: &Path, contents: &str) -> io::Result<()> {
        let permissions = fs::metadata(path)?.permissions();
        let tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.as_file().set_permissions(permissions)?;
        let tmp = fill(tmp, contents)?;
        tmp.persist(path)?;
        Ok(())
    }
}

impl EntryRepository for FileEntryRepository {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn entries(&self) -> RepoResult<EntryStream<'_>> {
        let read_dir = fs::read_dir(&self.dir).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                RepoError::DirectoryNotFound(self.dir.clone())
            } else {
                RepoError::Io {
                    path: self.dir.clone(),
                    source,
                }
            }
        })?;
        Ok(Box::new(EntryIter {
            dir: self.dir.clone(),
            read_dir,
        }))
    }

    fn create_entry(&self, entry: &Entry) -> RepoResult<PathBuf> {
        entry.validate()?;
        if let Some(existing) = self.id_index()?.remove(&entry.id) {
            return Err(RepoError::DuplicateId {
                id: entry.id.clone(),
                existing,
            });
        }

        let rendered = serialize_entry(entry);
        for _ in 0..=MAX_SAME_SECOND_COUNTER {
            let path = self.dir.join(allocate_file_name(&self.dir, entry.created_iso)?);
            match self.write_new(&path, &rendered) {
                Ok(()) => {
                    info!(
                        "event=entry_create module=repo status=ok id={} path={}",
                        entry.id,
                        path.display()
                    );
                    return Ok(path);
                }
                // Another writer claimed this name between allocation and rename.
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(
                        "event=entry_create module=repo status=retry path={}",
                        path.display()
                    );
                }
                Err(source) => return Err(RepoError::Create { path, source }),
            }
        }

        Err(RepoError::FilenameSpaceExhausted(
            entry.created_iso.file_stem(),
        ))
    }

    fn update_entry(&self, stored: &StoredEntry) -> RepoResult<()> {
        stored.entry.validate()?;
        let rendered = serialize_entry(&stored.entry);
        self.write_replace(&stored.path, &rendered)
            .map_err(|source| RepoError::Io {
                path: stored.path.clone(),
                source,
            })?;
        info!(
            "event=entry_update module=repo status=ok id={} path={}",
            stored.entry.id,
            stored.path.display()
        );
        Ok(())
    }
}

fn fill(mut tmp: NamedTempFile, contents: &str) -> io::Result<NamedTempFile> {
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Mode requested for new entry files before the umask applies.
#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

/// Filename for the `counter`-th entry created in the second `stem`.
///
/// Counter `0` yields the bare form `<stem>Z.md`; later ones insert a
/// two-digit suffix, e.g. `2024-01-01_00-00-0001Z.md`.
pub fn candidate_file_name(stem: &str, counter: u8) -> String {
    if counter == 0 {
        format!("{stem}Z{ENTRY_FILE_EXTENSION}")
    } else {
        format!("{stem}{counter:02}Z{ENTRY_FILE_EXTENSION}")
    }
}

/// First filename for `created` not yet present in `dir`.
pub fn allocate_file_name(dir: &Path, created: EntryTimestamp) -> RepoResult<String> {
    let stem = created.file_stem();
    let free = (0..=MAX_SAME_SECOND_COUNTER)
        .map(|counter| candidate_file_name(&stem, counter))
        .find(|name| !dir.join(name).exists());
    free.ok_or(RepoError::FilenameSpaceExhausted(stem))
}

fn parse_creation_counter(file_name: &str) -> u8 {
    file_name
        .strip_suffix(ENTRY_FILE_EXTENSION)
        .and_then(|name| name.strip_suffix('Z'))
        .and_then(|name| name.get(FILE_STEM_LEN..))
        .filter(|digits| digits.len() == 2)
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(0)
}

struct EntryIter {
    dir: PathBuf,
    read_dir: ReadDir,
}

impl Iterator for EntryIter {
    type Item = RepoResult<StoredEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let dir_entry = match self.read_dir.next()? {
                Ok(dir_entry) => dir_entry,
                Err(source) => {
                    return Some(Err(RepoError::Io {
                        path: self.dir.clone(),
                        source,
                    }))
                }
            };

            let path = dir_entry.path();
            if !is_entry_file(&path) {
                continue;
            }
            return Some(load_entry(path));
        }
    }
}

fn is_entry_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    !name.starts_with('.') && name.ends_with(ENTRY_FILE_EXTENSION) && path.is_file()
}

fn load_entry(path: PathBuf) -> RepoResult<StoredEntry> {
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(source) => return Err(RepoError::Io { path, source }),
    };
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => {
            return Err(RepoError::Malformed {
                path,
                id: None,
                source: CodecError::NotUtf8,
            })
        }
    };
    match parse_entry(&text) {
        Ok(entry) => Ok(StoredEntry { entry, path }),
        Err(source) => Err(RepoError::Malformed {
            path,
            id: header_id(&text),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        allocate_file_name, candidate_file_name, is_entry_file, parse_creation_counter,
    };
    use crate::model::entry::EntryTimestamp;
    use std::fs;

    #[test]
    fn candidate_names_follow_counter_pattern() {
        assert_eq!(
            candidate_file_name("2024-01-01_00-00-00", 0),
            "2024-01-01_00-00-00Z.md"
        );
        assert_eq!(
            candidate_file_name("2024-01-01_00-00-00", 7),
            "2024-01-01_00-00-0007Z.md"
        );
    }

    #[test]
    fn creation_counter_reads_two_digit_suffix_only() {
        assert_eq!(parse_creation_counter("2024-01-01_00-00-00Z.md"), 0);
        assert_eq!(parse_creation_counter("2024-01-01_00-00-0012Z.md"), 12);
        assert_eq!(parse_creation_counter("custom-name.md"), 0);
    }

    #[test]
    fn allocation_skips_names_already_taken_in_same_second() {
        let dir = tempfile::tempdir().unwrap();
        let created = EntryTimestamp::parse("2024-01-01T10:20:30Z").unwrap();

        let first = allocate_file_name(dir.path(), created).unwrap();
        assert_eq!(first, "2024-01-01_10-20-30Z.md");
        fs::write(dir.path().join(&first), "").unwrap();

        let second = allocate_file_name(dir.path(), created).unwrap();
        assert_eq!(second, "2024-01-01_10-20-3001Z.md");
    }

    #[test]
    fn hidden_and_foreign_files_are_not_entries() {
        let dir = tempfile::tempdir().unwrap();
        for name in [".tmpA1b2.md", "notes.txt", "ok.md"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.md")).unwrap();

        assert!(is_entry_file(&dir.path().join("ok.md")));
        assert!(!is_entry_file(&dir.path().join(".tmpA1b2.md")));
        assert!(!is_entry_file(&dir.path().join("notes.txt")));
        assert!(!is_entry_file(&dir.path().join("nested.md")));
    }
}
