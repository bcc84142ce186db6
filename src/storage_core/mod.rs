//! Durable persistence of consumed events
//!
//! - `schema`: embedded table definitions, applied idempotently at startup
//! - `store`: the `EventStore` trait (insert + half-open range query)
//! - `sqlite_store`: SQLite implementation
//! - `persister`: consume-write-commit loop over a durable consumer group

pub mod persister;
pub mod schema;
pub mod sqlite_store;
pub mod store;

pub use persister::{DurablePersister, MessageOutcome, PersisterCounters, PersisterState};
pub use schema::run_schema_migrations;
pub use sqlite_store::SqliteEventStore;
pub use store::{EventStore, PersistedEvent, StoreError};
