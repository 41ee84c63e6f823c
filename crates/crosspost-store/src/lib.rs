//! SQLite persistence for crosspost.
//!
//! [`SqliteStore`] implements the scheduler's [`Store`](crosspost_scheduler::Store)
//! port on a single database file. Structured columns (target platforms,
//! per-platform results, weekday sets, thread metadata) are stored as JSON text.

mod error;
mod rows;
mod schema;
mod sqlite;

pub use error::DbError;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;
