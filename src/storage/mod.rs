//! Primary relational store.

pub mod sqlite;
pub mod unit_of_work;

pub use sqlite::SqliteStorage;
pub use unit_of_work::{CommitHook, PendingChanges, StorageError, TrackedEntity, UnitOfWork};
