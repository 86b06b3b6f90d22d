//! pgcheck-store: the store connection used by the consistency probe.
//!
//! Owns one connection to the relational backend and runs the handful of
//! parameterized statements the probe needs against the counter table.
//!
//! # Architecture
//!
//! ```text
//! Connector (config, no handle)
//!   └── connect() → CounterStore (exactly one live handle)
//!         ├── ensure_schema(id)   CREATE TABLE IF NOT EXISTS + baseline row
//!         ├── read_counter(id)    SELECT number
//!         ├── write_counter(id)   BEGIN; UPDATE; COMMIT
//!         └── close()             never fails
//! ```
//!
//! Two backends implement the traits: [`PgConnector`] over `sqlx`, and
//! [`MemoryConnector`], an in-memory fake with fault injection.
//!
//! Operations never retry. Errors come back as [`StoreError`] with
//! connection-level failures kept apart from missing rows and rejected
//! statements; retry policy belongs to the caller.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryConnector, MemoryStore};
pub use postgres::{PgConnector, PgStore};
pub use store::{COUNTER_TABLE, Connector, CounterStore};
