//! In-memory backend with fault injection.
//!
//! Behaves like the Postgres backend from the probe's point of view and
//! lets tests (and `pgcheckd --memory` dry runs) drop connections, refuse
//! connects, and tamper with counter rows between cycles.
//!
//! Severing bumps a generation number: every handle opened before the bump
//! fails all later statements, so a dead handle stays dead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::{COUNTER_TABLE, Connector, CounterStore};

const MEMORY_SERVER_VERSION: &str = "memory";

#[derive(Debug, Default)]
struct Shared {
    table_created: bool,
    rows: HashMap<String, i64>,
    generation: u64,
    refuse_connects: u32,
    unreachable: bool,
    connect_attempts: u64,
    connects: u64,
    writes: u64,
    reads: u64,
}

/// Handle to a shared in-memory backend. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A poisoned lock only means a test panicked mid-update; the map is still usable.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Refuse the next `n` connect attempts.
    pub fn refuse_next_connects(&self, n: u32) {
        self.lock().refuse_connects = n;
    }

    /// Refuse every connect attempt until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Break every connection opened so far.
    pub fn sever_connections(&self) {
        let mut shared = self.lock();
        shared.generation += 1;
        debug!(generation = shared.generation, "memory backend severed connections");
    }

    /// Overwrite a counter row behind the probe's back.
    pub fn set_counter(&self, id: &str, value: i64) {
        self.lock().rows.insert(id.to_string(), value);
    }

    /// Delete a counter row behind the probe's back.
    pub fn remove_counter(&self, id: &str) -> Option<i64> {
        self.lock().rows.remove(id)
    }

    /// Current persisted value for `id`.
    pub fn counter(&self, id: &str) -> Option<i64> {
        self.lock().rows.get(id).copied()
    }

    /// Number of counter rows.
    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    /// Connect attempts seen, including refused ones.
    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    /// Successful connects.
    pub fn connects(&self) -> u64 {
        self.lock().connects
    }

    /// Committed counter writes.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    /// Counter reads served.
    pub fn reads(&self) -> u64 {
        self.lock().reads
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Conn = MemoryStore;

    async fn connect(&self) -> StoreResult<MemoryStore> {
        let mut shared = self.lock();
        shared.connect_attempts += 1;
        if shared.unreachable {
            return Err(StoreError::Connection("memory backend unreachable".to_string()));
        }
        if shared.refuse_connects > 0 {
            shared.refuse_connects -= 1;
            return Err(StoreError::Connection(format!(
                "memory backend refused connection ({} more to refuse)",
                shared.refuse_connects
            )));
        }
        shared.connects += 1;
        Ok(MemoryStore {
            shared: Arc::clone(&self.shared),
            generation: shared.generation,
        })
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

/// One connection to a [`MemoryConnector`] backend.
#[derive(Debug)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
    generation: u64,
}

impl MemoryStore {
    /// Lock the shared state, failing if this handle has been severed.
    fn live(&self) -> StoreResult<MutexGuard<'_, Shared>> {
        let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.generation != self.generation {
            return Err(StoreError::Connection(
                "server closed the connection unexpectedly".to_string(),
            ));
        }
        Ok(shared)
    }

    fn table(shared: &Shared) -> StoreResult<()> {
        if shared.table_created {
            Ok(())
        } else {
            Err(StoreError::Statement(format!(
                "relation \"{COUNTER_TABLE}\" does not exist"
            )))
        }
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    fn server_version(&self) -> &str {
        MEMORY_SERVER_VERSION
    }

    async fn ensure_schema(&mut self, id: &str) -> StoreResult<()> {
        let mut shared = self.live()?;
        shared.table_created = true;
        shared.rows.entry(id.to_string()).or_insert(0);
        Ok(())
    }

    async fn read_counter(&mut self, id: &str) -> StoreResult<i64> {
        let mut shared = self.live()?;
        Self::table(&shared)?;
        shared.reads += 1;
        shared
            .rows
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn write_counter(&mut self, id: &str, value: i64) -> StoreResult<()> {
        let mut shared = self.live()?;
        Self::table(&shared)?;
        match shared.rows.get_mut(id) {
            Some(number) => *number = value,
            None => return Err(StoreError::NotFound { id: id.to_string() }),
        }
        shared.writes += 1;
        Ok(())
    }

    async fn close(self) {
        debug!(generation = self.generation, "memory connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_schema_creates_baseline_row() {
        let backend = MemoryConnector::new();
        let mut conn = backend.connect().await.unwrap();

        conn.ensure_schema("probe-1").await.unwrap();

        assert_eq!(backend.counter("probe-1"), Some(0));
        assert_eq!(conn.read_counter("probe-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_schema_twice_keeps_existing_counter() {
        let backend = MemoryConnector::new();
        let mut conn = backend.connect().await.unwrap();

        conn.ensure_schema("probe-1").await.unwrap();
        conn.write_counter("probe-1", 17).await.unwrap();
        conn.ensure_schema("probe-1").await.unwrap();

        assert_eq!(backend.row_count(), 1);
        assert_eq!(conn.read_counter("probe-1").await.unwrap(), 17);
    }

    #[tokio::test]
    async fn read_after_write_returns_written_value() {
        let backend = MemoryConnector::new();
        let mut conn = backend.connect().await.unwrap();
        conn.ensure_schema("probe-1").await.unwrap();

        for value in [1, 2, 1_000, i64::from(i32::MAX) + 1] {
            conn.write_counter("probe-1", value).await.unwrap();
            assert_eq!(conn.read_counter("probe-1").await.unwrap(), value);
        }
    }

    #[tokio::test]
    async fn read_before_schema_is_a_statement_error() {
        let backend = MemoryConnector::new();
        let mut conn = backend.connect().await.unwrap();

        let err = conn.read_counter("probe-1").await.unwrap_err();
        assert!(matches!(err, StoreError::Statement(_)));
    }

    #[tokio::test]
    async fn missing_row_is_not_found() {
        let backend = MemoryConnector::new();
        let mut conn = backend.connect().await.unwrap();
        conn.ensure_schema("probe-1").await.unwrap();

        assert!(conn.read_counter("other").await.unwrap_err().is_not_found());
        assert!(conn.write_counter("other", 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn severed_handle_stays_dead() {
        let backend = MemoryConnector::new();
        let mut old = backend.connect().await.unwrap();
        old.ensure_schema("probe-1").await.unwrap();

        backend.sever_connections();

        assert!(old.read_counter("probe-1").await.unwrap_err().is_connection());
        assert!(old.read_counter("probe-1").await.unwrap_err().is_connection());

        let mut fresh = backend.connect().await.unwrap();
        assert_eq!(fresh.read_counter("probe-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn refused_connects_are_counted() {
        let backend = MemoryConnector::new();
        backend.refuse_next_connects(2);

        assert!(backend.connect().await.unwrap_err().is_connection());
        assert!(backend.connect().await.unwrap_err().is_connection());
        assert!(backend.connect().await.is_ok());

        assert_eq!(backend.connect_attempts(), 3);
        assert_eq!(backend.connects(), 1);
    }

    #[tokio::test]
    async fn unreachable_refuses_until_cleared() {
        let backend = MemoryConnector::new();
        backend.set_unreachable(true);
        for _ in 0..5 {
            assert!(backend.connect().await.is_err());
        }
        backend.set_unreachable(false);
        assert!(backend.connect().await.is_ok());
    }

    #[tokio::test]
    async fn close_on_severed_handle_is_silent() {
        let backend = MemoryConnector::new();
        let conn = backend.connect().await.unwrap();
        backend.sever_connections();
        conn.close().await;
    }
}
