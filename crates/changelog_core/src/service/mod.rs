//! Command engine services.
//!
//! # Responsibility
//! - Compose resolver, repository and codec into command-level operations.
//! - Keep the CLI layer free of storage and format details.

pub mod changelog_service;
