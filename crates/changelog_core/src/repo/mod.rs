//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the entry storage contract used by the command layer.
//! - Keep filesystem layout details (filenames, temp files) inside this layer.
//!
//! # Invariants
//! - Repository writes must enforce `Entry::validate()` before touching disk.
//! - Repository APIs return semantic errors (`EntryNotFound`, `DuplicateId`)
//!   in addition to filesystem errors.

pub mod entry_repo;
