//! SQLite backend for Tally.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. One [`SqliteStore`] implements both the
//! upload registry and the dataset store over the same database file.

mod dataset;
mod encode;
mod schema;
mod store;

pub mod error;

pub use dataset::DatasetEntry;
pub use error::{Error, Result};
pub use schema::{MigrationFailed, SchemaReport};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
