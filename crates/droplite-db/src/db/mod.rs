//! Database repositories for the data access layer
//!
//! `file` holds the [`FileRepository`] trait and its PostgreSQL
//! implementation, `memory` a process-local implementation with the same
//! semantics, and `migrate` the embedded schema migrations.

pub mod file;
pub mod memory;
pub mod migrate;

pub use file::{FileRepository, PgFileRepository};
pub use memory::MemoryFileRepository;
pub use migrate::{migrations, run_migrations, Migration};
