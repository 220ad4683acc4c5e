use crate::engine::{AuthorizationOracle, AuthorizationVerdict, RemoteStore};
use crate::error::StoreError;
use crate::reading::{Reading, SensorIdentity};
use chrono::Utc;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tokio::time::timeout;

/// Farm database client. The pool is lazy so the agent still boots with the
/// network down; every call is bounded by the configured timeout so a hung
/// connection delays at most one cycle.
#[derive(Clone)]
pub struct MysqlStore {
    pool: MySqlPool,
    op_timeout: Duration,
}

impl MysqlStore {
    pub fn connect_lazy(database_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(op_timeout)
            .connect_lazy(database_url)?;
        Ok(Self { pool, op_timeout })
    }
}

impl RemoteStore for MysqlStore {
    async fn write(&self, reading: &Reading) -> Result<(), StoreError> {
        // One transaction per reading: a failed or timed-out write rolls
        // back, so a reading is never half-stored.
        let insert = async {
            let mut tx = self.pool.begin().await?;
            for (channel, value) in &reading.measurements {
                sqlx::query(
                    "INSERT INTO measurements (machine_id, recorded_at, channel, value) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&reading.sensor_id)
                .bind(reading.timestamp)
                .bind(channel)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        };

        timeout(self.op_timeout, insert)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
            .map_err(StoreError::from)
    }

    async fn register(&self, identity: &SensorIdentity) -> Result<(), StoreError> {
        // Upsert only identity fields; farm assignment and activation are
        // the server's decision and are never touched from the field.
        let upsert = sqlx::query(
            "INSERT INTO sensors (machine_id, metadata, registered_at) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE metadata = VALUES(metadata)",
        )
        .bind(&identity.machine_id)
        .bind(Json(&identity.metadata))
        .bind(Utc::now())
        .execute(&self.pool);

        timeout(self.op_timeout, upsert)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))??;
        Ok(())
    }
}

impl AuthorizationOracle for MysqlStore {
    async fn verdict(&self, machine_id: &str) -> AuthorizationVerdict {
        let lookup = sqlx::query_as::<_, (Option<i64>, bool)>(
            "SELECT farm_id, is_active FROM sensors WHERE machine_id = ?",
        )
        .bind(machine_id)
        .fetch_optional(&self.pool);

        match timeout(self.op_timeout, lookup).await {
            Ok(Ok(Some((Some(_farm_id), true)))) => AuthorizationVerdict::Authorized,
            Ok(Ok(_)) => AuthorizationVerdict::Unauthorized,
            Ok(Err(err)) => {
                tracing::warn!(machine_id = %machine_id, error = %err, "farm assignment lookup failed");
                AuthorizationVerdict::Unknown
            }
            Err(_) => {
                tracing::warn!(
                    machine_id = %machine_id,
                    timeout = ?self.op_timeout,
                    "farm assignment lookup timed out"
                );
                AuthorizationVerdict::Unknown
            }
        }
    }
}
