//! Store traits: the seam between the probe and the backend.
//!
//! A [`Connector`] opens connections; each connection is a
//! [`CounterStore`] that owns exactly one live handle. Nothing here
//! retries: every failure is handed back to the caller, classified.

use async_trait::async_trait;

use crate::error::StoreResult;

/// Name of the counter table.
pub const COUNTER_TABLE: &str = "counting";

/// One open connection to the backend, owned by a single caller.
#[async_trait]
pub trait CounterStore: Send {
    /// Version string reported by the backend when the connection was opened.
    fn server_version(&self) -> &str;

    /// Create the counter table if absent and insert the baseline row
    /// (`number = 0`) for `id` if no row exists for it.
    ///
    /// Check-then-insert, not an upsert: an existing counter is never reset.
    async fn ensure_schema(&mut self, id: &str) -> StoreResult<()>;

    /// Read the persisted counter for `id`.
    async fn read_counter(&mut self, id: &str) -> StoreResult<i64>;

    /// Set the counter for `id` to `value` inside an explicit transaction.
    async fn write_counter(&mut self, id: &str, value: i64) -> StoreResult<()>;

    /// Release the connection. Never fails; errors on a broken handle are
    /// logged and dropped.
    async fn close(self)
    where
        Self: Sized;
}

/// Opens new connections. Holds the configuration, never a live handle.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: CounterStore;

    /// Open a fresh connection. A single attempt, no internal retry.
    async fn connect(&self) -> StoreResult<Self::Conn>;

    /// Human-readable description of the target, without credentials.
    fn target(&self) -> String;
}
