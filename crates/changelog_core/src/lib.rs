//! Core of the `change_log` tool: one file per changelog entry.
//! This crate owns entry identity, file layout and the command semantics.

pub mod codec;
pub mod config;
pub mod logging;
pub mod model;
pub mod repo;
pub mod resolve;
pub mod service;

pub use codec::{
    append_note, header_id, parse_entry, serialize_entry, CodecError, NOTES_HEADING,
};
pub use config::Config;
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use model::entry::{Entry, EntryId, EntryTimestamp, EntryValidationError};
pub use repo::entry_repo::{
    EntryRepository, FileEntryRepository, RepoError, RepoResult, StoredEntry,
};
pub use resolve::{resolve_changelog_dir, ResolutionSource, ResolveError, ResolvedDir};
pub use service::changelog_service::{
    open_existing, open_for_create, write_json, write_jsonl, ChangelogService, Clock,
    CreateRequest, CreatedEntry, EntryRecord, FixedClock, ListFilter, ListReport, ServiceError,
    ServiceResult, SkippedEntry, SystemClock,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
