//! Droplite Database Library
//!
//! Metadata persistence for uploaded files: the repository trait, its
//! PostgreSQL and in-memory implementations, schema migrations and pool setup.

pub mod db;
pub mod setup;

pub use db::{FileRepository, MemoryFileRepository, PgFileRepository};
pub use setup::setup_database;
