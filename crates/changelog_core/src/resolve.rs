//! Changelog directory resolution.
//!
//! # Responsibility
//! - Compute the one authoritative changelog directory for an invocation.
//!
//! # Invariants
//! - Resolution order: explicit override, then enclosing repository root,
//!   then the working directory itself.
//! - The working directory is an explicit input; this module never reads
//!   process-global state.
//! - No directories are created here and no processes are spawned.

use log::debug;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Directory name used under a repository root or the working directory.
pub const CHANGELOG_DIR_NAME: &str = "change_log";

const REPOSITORY_MARKER: &str = ".git";

/// Which rule produced a resolved directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// `CHANGE_LOG_DIR` was set.
    Override,
    /// The working directory is inside a version-control checkout.
    RepositoryRoot,
    /// Plain `change_log` under the working directory.
    WorkingDirectory,
}

impl ResolutionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Override => "override",
            Self::RepositoryRoot => "repository_root",
            Self::WorkingDirectory => "working_directory",
        }
    }
}

/// Absolute changelog directory chosen for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDir {
    path: PathBuf,
    source: ResolutionSource,
}

impl ResolvedDir {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> ResolutionSource {
        self.source
    }
}

/// `DirectoryResolutionError` cases.
#[derive(Debug)]
pub enum ResolveError {
    /// The invocation's working directory cannot be determined.
    CurrentDir(std::io::Error),
    /// The override variable is set to an empty value.
    EmptyOverride,
    /// The override names something that exists but is not a directory.
    OverrideNotDirectory(PathBuf),
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CurrentDir(err) => write!(f, "cannot determine current directory: {err}"),
            Self::EmptyOverride => write!(f, "changelog directory override is set but empty"),
            Self::OverrideNotDirectory(path) => write!(
                f,
                "changelog directory override `{}` is not a directory",
                path.display()
            ),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CurrentDir(err) => Some(err),
            Self::EmptyOverride | Self::OverrideNotDirectory(_) => None,
        }
    }
}

/// Resolves the changelog directory for `cwd`.
///
/// A relative `override_dir` is joined onto `cwd`. Values that are not
/// UTF-8 are used byte for byte. The returned path may not exist yet;
/// callers decide whether to create it or fail.
pub fn resolve_changelog_dir(
    cwd: &Path,
    override_dir: Option<&OsStr>,
) -> Result<ResolvedDir, ResolveError> {
    let resolved = match override_dir {
        Some(raw) => {
            let raw = match raw.to_str() {
                Some(text) => OsStr::new(text.trim()),
                None => raw,
            };
            if raw.is_empty() {
                return Err(ResolveError::EmptyOverride);
            }
            let path = cwd.join(raw);
            if path.exists() && !path.is_dir() {
                return Err(ResolveError::OverrideNotDirectory(path));
            }
            ResolvedDir {
                path,
                source: ResolutionSource::Override,
            }
        }
        None => match find_repository_root(cwd) {
            Some(root) => ResolvedDir {
                path: root.join(CHANGELOG_DIR_NAME),
                source: ResolutionSource::RepositoryRoot,
            },
            None => ResolvedDir {
                path: cwd.join(CHANGELOG_DIR_NAME),
                source: ResolutionSource::WorkingDirectory,
            },
        },
    };

    debug!(
        "event=dir_resolve module=resolve status=ok source={} path={}",
        resolved.source.as_str(),
        resolved.path.display()
    );
    Ok(resolved)
}

/// Returns the nearest ancestor of `start` (inclusive) holding a `.git` entry.
///
/// `.git` may be a directory or a file (worktrees and submodules).
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(REPOSITORY_MARKER).exists())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::{resolve_changelog_dir, ResolutionSource, ResolveError, CHANGELOG_DIR_NAME};
    use std::ffi::OsStr;
    use std::fs;

    #[test]
    fn override_wins_and_is_joined_to_cwd() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        let resolved = resolve_changelog_dir(dir.path(), Some(OsStr::new("custom/log"))).unwrap();
        assert_eq!(resolved.source(), ResolutionSource::Override);
        assert_eq!(resolved.path(), dir.path().join("custom/log"));

        let absolute = dir.path().join("abs");
        let resolved = resolve_changelog_dir(dir.path(), Some(absolute.as_os_str())).unwrap();
        assert_eq!(resolved.path(), absolute);
    }

    #[test]
    fn empty_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_changelog_dir(dir.path(), Some(OsStr::new("  "))).unwrap_err();
        assert!(matches!(err, ResolveError::EmptyOverride));
    }

    #[test]
    fn override_pointing_at_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("plain"), "x").unwrap();
        let err = resolve_changelog_dir(dir.path(), Some(OsStr::new("plain"))).unwrap_err();
        assert!(matches!(err, ResolveError::OverrideNotDirectory(_)));
    }

    #[test]
    fn repository_root_anchors_nested_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let resolved = resolve_changelog_dir(&nested, None).unwrap();
        assert_eq!(resolved.source(), ResolutionSource::RepositoryRoot);
        assert_eq!(resolved.path(), dir.path().join(CHANGELOG_DIR_NAME));
    }

    #[test]
    fn git_file_marks_a_repository_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".git"), "gitdir: elsewhere\n").unwrap();
        let nested = dir.path().join("sub");
        fs::create_dir(&nested).unwrap();

        let resolved = resolve_changelog_dir(&nested, None).unwrap();
        assert_eq!(resolved.path(), dir.path().join(CHANGELOG_DIR_NAME));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_override_is_used_verbatim() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let raw = OsStr::from_bytes(b"log-\xff");

        let resolved = resolve_changelog_dir(dir.path(), Some(raw)).unwrap();
        assert_eq!(resolved.source(), ResolutionSource::Override);
        assert_eq!(resolved.path(), dir.path().join(raw));
    }
}
