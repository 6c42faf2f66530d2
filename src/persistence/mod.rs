//! Persistence layer - SQLite-backed registry, status records and settings

mod database;

pub use database::Database;
