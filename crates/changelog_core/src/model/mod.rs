//! Domain model for changelog entries.
//!
//! # Responsibility
//! - Define the record shape shared by codec, store and command layers.
//!
//! # Invariants
//! - Every entry is identified by its header `id`, never by its filename.
//! - Deletion and rewrite of header fields are not modeled.

pub mod entry;
