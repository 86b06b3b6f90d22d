//! Postgres backend over a single `sqlx::PgConnection`.
//!
//! The probe owns exactly one handle at a time, so there is no pool here:
//! a broken connection is closed and a new one is opened by the caller.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{Connector, CounterStore};

const CREATE_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS counting (id VARCHAR(255) PRIMARY KEY, number BIGINT NOT NULL)";
// Tables created by older probes use INT; widen on read.
const SELECT_COUNTER: &str = "SELECT number::BIGINT AS number FROM counting WHERE id = $1";
const INSERT_BASELINE: &str = "INSERT INTO counting (id, number) VALUES ($1, 0)";
const UPDATE_COUNTER: &str = "UPDATE counting SET number = $1 WHERE id = $2";

/// Opens Postgres connections from a [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: StoreConfig,
}

impl PgConnector {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.database)
            .username(&self.config.user)
            .password(&self.config.password)
            .application_name("pgcheck")
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgStore;

    async fn connect(&self) -> StoreResult<PgStore> {
        let target = self.config.target();
        info!(%target, "connecting to server");

        let options = self.connect_options();
        let mut conn = match tokio::time::timeout(
            self.config.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::Connection(format!(
                    "connect to {target} timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        };

        let server_version: String = sqlx::query_scalar("SELECT current_setting('server_version')")
            .fetch_one(&mut conn)
            .await?;
        info!(%server_version, "server version");

        Ok(PgStore {
            conn,
            server_version,
        })
    }

    fn target(&self) -> String {
        self.config.target()
    }
}

/// A live Postgres connection holding the counter table.
#[derive(Debug)]
pub struct PgStore {
    conn: PgConnection,
    server_version: String,
}

#[async_trait]
impl CounterStore for PgStore {
    fn server_version(&self) -> &str {
        &self.server_version
    }

    async fn ensure_schema(&mut self, id: &str) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE).execute(&mut self.conn).await?;

        let existing = sqlx::query(SELECT_COUNTER)
            .bind(id)
            .fetch_optional(&mut self.conn)
            .await?;
        if existing.is_none() {
            sqlx::query(INSERT_BASELINE)
                .bind(id)
                .execute(&mut self.conn)
                .await?;
            info!(instance_id = %id, "baseline counter row created");
        } else {
            debug!(instance_id = %id, "counter row already present");
        }
        Ok(())
    }

    async fn read_counter(&mut self, id: &str) -> StoreResult<i64> {
        let row = sqlx::query(SELECT_COUNTER)
            .bind(id)
            .fetch_optional(&mut self.conn)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let number: i64 = row.try_get("number")?;
        debug!(instance_id = %id, number, "counter read");
        Ok(number)
    }

    async fn write_counter(&mut self, id: &str, value: i64) -> StoreResult<()> {
        let mut tx = self.conn.begin().await?;
        let result = sqlx::query(UPDATE_COUNTER)
            .bind(value)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        tx.commit().await?;
        debug!(instance_id = %id, number = value, "counter written");
        Ok(())
    }

    async fn close(self) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "error while closing connection, dropped");
        }
    }
}
