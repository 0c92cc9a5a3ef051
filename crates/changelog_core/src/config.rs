//! Invocation configuration read from the process environment.
//!
//! # Responsibility
//! - Snapshot every environment input once, at process start.
//!
//! # Invariants
//! - Nothing below the CLI reads the environment directly; a `Config` value
//!   is passed down instead.
//! - An override that is present but empty is kept as `Some("")` so the
//!   resolver can reject it rather than silently ignoring it.
//! - The override is kept as raw `OsString`; a non-UTF-8 value still names
//!   the directory to use.

use crate::logging::default_log_level;
use crate::resolve::{resolve_changelog_dir, ResolveError, ResolvedDir};
use std::ffi::OsString;
use std::path::Path;

/// Overrides the changelog directory (absolute, or relative to the cwd).
pub const CHANGELOG_DIR_ENV: &str = "CHANGE_LOG_DIR";
/// Absolute directory for rolling log files. Unset disables file logging.
pub const LOG_DIR_ENV: &str = "CHANGE_LOG_LOG_DIR";
/// `trace|debug|info|warn|error`.
pub const LOG_LEVEL_ENV: &str = "CHANGE_LOG_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub changelog_dir_override: Option<OsString>,
    pub log_dir: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Reads configuration from the real process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Reads configuration through `lookup`, e.g. a fixed map in tests.
    ///
    /// Log settings that are blank or not UTF-8 are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let non_blank = |key: &str| {
            lookup(key)
                .and_then(|value| value.into_string().ok())
                .filter(|value| !value.trim().is_empty())
        };
        Self {
            changelog_dir_override: lookup(CHANGELOG_DIR_ENV),
            log_dir: non_blank(LOG_DIR_ENV),
            log_level: non_blank(LOG_LEVEL_ENV)
                .unwrap_or_else(|| default_log_level().to_string()),
        }
    }

    /// Resolves the changelog directory for `cwd` under this configuration.
    pub fn resolve_dir(&self, cwd: &Path) -> Result<ResolvedDir, ResolveError> {
        resolve_changelog_dir(cwd, self.changelog_dir_override.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, CHANGELOG_DIR_ENV, LOG_DIR_ENV, LOG_LEVEL_ENV};
    use crate::logging::default_log_level;
    use std::collections::HashMap;
    use std::ffi::{OsStr, OsString};
    use std::path::Path;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let map: HashMap<String, OsString> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[]));
        assert_eq!(config.changelog_dir_override, None);
        assert_eq!(config.log_dir, None);
        assert_eq!(config.log_level, default_log_level());
    }

    #[test]
    fn keeps_empty_override_but_drops_blank_log_settings() {
        let config = Config::from_lookup(lookup_from(&[
            (CHANGELOG_DIR_ENV, ""),
            (LOG_DIR_ENV, " "),
            (LOG_LEVEL_ENV, "warn"),
        ]));
        assert_eq!(config.changelog_dir_override.as_deref(), Some(OsStr::new("")));
        assert_eq!(config.log_dir, None);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn relative_override_resolves_under_cwd() {
        let config = Config::from_lookup(lookup_from(&[(CHANGELOG_DIR_ENV, "notes/log")]));
        let resolved = config.resolve_dir(Path::new("/work")).unwrap();
        assert_eq!(resolved.path(), Path::new("/work/notes/log"));
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_override_is_kept_not_dropped() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(b"/tmp/log-\xff".to_vec());
        let expected = raw.clone();
        let config = Config::from_lookup(move |key| {
            (key == CHANGELOG_DIR_ENV).then(|| raw.clone())
        });

        assert_eq!(config.changelog_dir_override.as_ref(), Some(&expected));
        let resolved = config.resolve_dir(Path::new("/work")).unwrap();
        assert_eq!(resolved.path(), Path::new(&expected));
    }
}
