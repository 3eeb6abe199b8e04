// src/core/metastore/client.rs

//! Thin wrapper around the metadata store's client library (spec §4.5): a
//! `sqlx::PgPool` targeted at the configured URL, with `execute_array` and
//! explicit commit/rollback as the spec requires.

use crate::config::MetaStoreConfig;
use crate::core::errors::BrokerError;
use sqlx::{Postgres, Transaction, postgres::PgPoolOptions};
use std::time::Duration;

pub struct MetaStoreClient {
    pool: sqlx::PgPool,
}

impl MetaStoreClient {
    pub async fn connect(config: &MetaStoreConfig) -> Result<Self, BrokerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.query_timeout_ms))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, BrokerError> {
        Ok(self.pool.begin().await?)
    }

    /// Runs the schema DDL; idempotent, used by `INIT`.
    pub async fn create_schema(&self) -> Result<(), BrokerError> {
        sqlx::raw_sql(super::schema::CREATE_SCHEMA_SQL)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Executes a sequence of plain statements inside the given
    /// transaction, stopping at the first error and optionally asserting
    /// each statement affected at least one row (spec §4.5).
    pub async fn execute_array(
        tx: &mut Transaction<'_, Postgres>,
        statements: &[&str],
        check_affected_rows: bool,
    ) -> Result<(), BrokerError> {
        for sql in statements {
            let result = sqlx::query(sql).execute(&mut **tx).await?;
            if check_affected_rows && result.rows_affected() == 0 {
                return Err(BrokerError::MetaDb(format!(
                    "statement affected 0 rows: {sql}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_accepts_loopback_url() {
        let cfg = MetaStoreConfig {
            url: "postgres://localhost/shardmeta".to_string(),
            query_timeout_ms: 1000,
            max_connections: 1,
        };
        assert!(!cfg.url.is_empty());
    }
}
